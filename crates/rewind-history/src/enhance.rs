#![forbid(unsafe_code)]

//! Time travel layered over a [`Store`].
//!
//! [`enhance_store`] wraps a store with a [`SnapshotManager`], a
//! [`HistoryManager`] and a [`StateRestorer`]. With auto capture on, every
//! outermost user write records a snapshot labelled `set <atom name>`.
//! Writes performed by undo, redo and jumps carry [`SetOrigin::Restore`] and
//! are never captured.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use rewind_runtime::{Atom, AtomRegistry, RegistryMode, SetOrigin, Store, Subscription};
use rewind_value::Value;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info, trace, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::compression::{CompressionConfig, CompressionMetadata};
use crate::error::{HistoryError, Result};
use crate::history::{DEFAULT_MAX_HISTORY, HistoryEvent, HistoryManager};
use crate::restore::StateRestorer;
use crate::snapshot::{Snapshot, SnapshotEntry, SnapshotManager, SnapshotOptions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnhancerOptions {
    pub enable_dev_tools: bool,
    pub dev_tools_name: String,
    pub registry_mode: RegistryMode,
    pub enable_time_travel: bool,
    pub max_history: usize,
    pub auto_capture: bool,
    pub compression: Option<CompressionConfig>,
}

impl Default for EnhancerOptions {
    fn default() -> Self {
        Self {
            enable_dev_tools: false,
            dev_tools_name: "Rewind Store".into(),
            registry_mode: RegistryMode::Isolated,
            enable_time_travel: true,
            max_history: DEFAULT_MAX_HISTORY,
            auto_capture: true,
            compression: None,
        }
    }
}

impl EnhancerOptions {
    #[must_use]
    pub fn with_dev_tools(mut self, name: impl Into<String>) -> Self {
        self.enable_dev_tools = true;
        self.dev_tools_name = name.into();
        self
    }

    #[must_use]
    pub fn with_time_travel(mut self, enabled: bool) -> Self {
        self.enable_time_travel = enabled;
        self
    }

    #[must_use]
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    #[must_use]
    pub fn with_auto_capture(mut self, enabled: bool) -> Self {
        self.auto_capture = enabled;
        self
    }

    #[must_use]
    pub fn with_registry_mode(mut self, mode: RegistryMode) -> Self {
        self.registry_mode = mode;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, config: CompressionConfig) -> Self {
        self.compression = Some(config);
        self
    }
}

struct TimeTravel {
    snapshots: SnapshotManager,
    history: HistoryManager,
    /// State recorded by the most recent capture.
    last_captured: Option<BTreeMap<String, SnapshotEntry>>,
}

/// Capture into `time_travel`, skipping states equal to the last capture.
fn capture_into(time_travel: &RefCell<TimeTravel>, action: Option<&str>) -> Option<Snapshot> {
    let Ok(mut tt) = time_travel.try_borrow_mut() else {
        warn!(?action, "capture skipped: history busy");
        return None;
    };
    let state = tt.snapshots.capture_state();
    if tt.last_captured.as_ref() == Some(&state) {
        trace!(?action, "state unchanged since last capture");
        return None;
    }
    let snapshot = tt.snapshots.record(state, action, None);
    tt.last_captured = Some(snapshot.state.clone());
    tt.history.add(snapshot.clone());
    Some(snapshot)
}

/// Serialized form of the whole history for external inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryExport {
    pub name: String,
    pub snapshots: Vec<Snapshot>,
    pub current_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionMetadata>,
}

/// A store with snapshot history.
pub struct EnhancedStore {
    store: Store,
    options: EnhancerOptions,
    time_travel: Option<Rc<RefCell<TimeTravel>>>,
    restorer: StateRestorer,
    auto_capture: Option<Subscription>,
    dev_tools_connected: Cell<bool>,
}

/// Wrap `store` with time travel according to `options`.
pub fn enhance_store(store: Store, options: EnhancerOptions) -> Result<EnhancedStore> {
    EnhancedStore::with_clock(store, options, Rc::new(SystemClock))
}

impl EnhancedStore {
    /// Like [`enhance_store`] with an explicit clock for snapshot timestamps
    /// and time-based compression.
    pub fn with_clock(store: Store, options: EnhancerOptions, clock: SharedClock) -> Result<Self> {
        store.registry().attach_store(store.id(), options.registry_mode);

        let time_travel = if options.enable_time_travel {
            let snapshot_options =
                SnapshotOptions::default().with_max_history_length(options.max_history);
            let mut history = HistoryManager::new(options.max_history);
            if let Some(config) = &options.compression {
                history.set_compression(Some(config.build_with_clock(Rc::clone(&clock))?));
            }
            Some(Rc::new(RefCell::new(TimeTravel {
                snapshots: SnapshotManager::with_clock(store.clone(), snapshot_options, clock),
                history,
                last_captured: None,
            })))
        } else {
            None
        };

        let auto_capture = match &time_travel {
            Some(tt) if options.auto_capture => {
                Some(install_auto_capture(&store, store.registry(), Rc::downgrade(tt)))
            }
            _ => None,
        };

        debug!(
            store = %store.id(),
            time_travel = options.enable_time_travel,
            auto_capture = auto_capture.is_some(),
            max_history = options.max_history,
            "store enhanced"
        );
        Ok(Self {
            restorer: StateRestorer::new(store.clone()),
            store,
            options,
            time_travel,
            auto_capture,
            dev_tools_connected: Cell::new(false),
        })
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn options(&self) -> &EnhancerOptions {
        &self.options
    }

    // ========================================================================
    // Store surface
    // ========================================================================

    pub fn get(&self, atom: &Atom) -> rewind_runtime::Result<Value> {
        self.store.get(atom)
    }

    pub fn set(&self, atom: &Atom, value: impl Into<Value>) -> rewind_runtime::Result<()> {
        self.store.set(atom, value)
    }

    pub fn update(&self, atom: &Atom, f: impl FnOnce(&Value) -> Value) -> rewind_runtime::Result<()> {
        self.store.update(atom, f)
    }

    pub fn subscribe(&self, atom: &Atom, callback: impl Fn(&Value) + 'static) -> Subscription {
        self.store.subscribe(atom, callback)
    }

    #[must_use]
    pub fn get_state(&self) -> BTreeMap<String, Value> {
        self.store.get_state()
    }

    #[must_use]
    pub fn serialize_state(&self) -> BTreeMap<String, Json> {
        self.store.serialize_state()
    }

    pub fn apply_plugin(&self, plugin: impl FnOnce(&Store)) {
        self.store.apply_plugin(plugin);
    }

    // ========================================================================
    // Devtools
    // ========================================================================

    pub fn connect_dev_tools(&self) -> Result<()> {
        if !self.options.enable_dev_tools {
            return Err(HistoryError::FeatureDisabled { feature: "devtools" });
        }
        info!(name = %self.options.dev_tools_name, store = %self.store.id(), "devtools connected");
        self.dev_tools_connected.set(true);
        Ok(())
    }

    #[must_use]
    pub fn is_dev_tools_connected(&self) -> bool {
        self.dev_tools_connected.get()
    }

    // ========================================================================
    // Time travel
    // ========================================================================

    /// Record the current state. `None` when nothing changed since the last
    /// capture or time travel is disabled. A capture after an undo discards
    /// the redo branch.
    pub fn capture_snapshot(&self, action: Option<&str>) -> Option<Snapshot> {
        capture_into(self.time_travel.as_ref()?, action)
    }

    /// Restore the history entry chosen by `target`, then move the history
    /// with `step`. The history stays put when the restore fails.
    fn travel(
        &self,
        target: impl FnOnce(&HistoryManager) -> Option<usize>,
        step: impl FnOnce(&mut HistoryManager) -> Option<Snapshot>,
    ) -> bool {
        let Some(tt) = &self.time_travel else {
            return false;
        };
        let snapshot = match tt.try_borrow() {
            Ok(tt) => target(&tt.history).and_then(|index| tt.history.get(index).cloned()),
            Err(_) => {
                warn!("history busy, travel ignored");
                return false;
            }
        };
        let Some(snapshot) = snapshot else {
            return false;
        };
        if !self.restorer.restore_from_snapshot(&snapshot) {
            warn!(snapshot = %snapshot.id, "restore failed, history unchanged");
            return false;
        }
        match tt.try_borrow_mut() {
            Ok(mut tt) => step(&mut tt.history).is_some(),
            Err(_) => {
                warn!(snapshot = %snapshot.id, "history busy after restore");
                false
            }
        }
    }

    pub fn undo(&self) -> bool {
        self.travel(
            |history| {
                history
                    .current_index()
                    .filter(|_| history.can_undo())
                    .and_then(|index| index.checked_sub(1))
            },
            HistoryManager::undo,
        )
    }

    pub fn redo(&self) -> bool {
        self.travel(
            |history| {
                history
                    .current_index()
                    .filter(|_| history.can_redo())
                    .map(|index| index + 1)
            },
            HistoryManager::redo,
        )
    }

    /// Negative and out-of-range indices are ignored.
    pub fn jump_to(&self, index: i64) -> bool {
        match usize::try_from(index) {
            Ok(index) => self.travel(
                |history| (index < history.len()).then_some(index),
                |history| history.jump_to(index),
            ),
            Err(_) => false,
        }
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.with_history(HistoryManager::can_undo).unwrap_or(false)
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.with_history(HistoryManager::can_redo).unwrap_or(false)
    }

    pub fn clear_history(&self) {
        if let Some(tt) = &self.time_travel
            && let Ok(mut tt) = tt.try_borrow_mut()
        {
            tt.history.clear();
            tt.snapshots.clear_snapshots();
            tt.last_captured = None;
        }
    }

    /// Linearized history, oldest first.
    #[must_use]
    pub fn get_history(&self) -> Vec<Snapshot> {
        self.with_history(HistoryManager::history)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.with_history(HistoryManager::current_index).flatten()
    }

    /// Listen to history events. `None` when time travel is disabled.
    pub fn subscribe_history(&self, listener: impl Fn(&HistoryEvent) + 'static) -> Option<Subscription> {
        let tt = self.time_travel.as_ref()?;
        let mut tt = tt.try_borrow_mut().ok()?;
        Some(tt.history.subscribe(listener))
    }

    fn with_history<T>(&self, f: impl FnOnce(&HistoryManager) -> T) -> Option<T> {
        let tt = self.time_travel.as_ref()?;
        let tt = tt.try_borrow().ok()?;
        Some(f(&tt.history))
    }

    // ========================================================================
    // Import / export
    // ========================================================================

    /// The whole history as JSON.
    pub fn export_history(&self) -> Result<String> {
        let export = self
            .with_history(|history| HistoryExport {
                name: self.options.dev_tools_name.clone(),
                snapshots: history.history(),
                current_index: history.current_index(),
                compression: history.compression_metadata(),
            })
            .ok_or(HistoryError::FeatureDisabled {
                feature: "time travel",
            })?;
        Ok(serde_json::to_string(&export)?)
    }

    /// Restore a snapshot in the persisted schema and record the result as
    /// a new history entry.
    pub fn import_snapshot(&self, json: &str) -> bool {
        if !self.restorer.restore_from_json(json) {
            return false;
        }
        self.capture_snapshot(Some("import"));
        true
    }
}

fn install_auto_capture(
    store: &Store,
    registry: AtomRegistry,
    time_travel: std::rc::Weak<RefCell<TimeTravel>>,
) -> Subscription {
    store.on_set(move |atom, _, origin| {
        if origin == SetOrigin::Restore {
            return;
        }
        let Some(tt) = time_travel.upgrade() else {
            return;
        };
        let name = registry
            .name_of(atom.id())
            .unwrap_or_else(|| atom.id().to_string());
        capture_into(&tt, Some(&format!("set {name}")));
    })
}

impl fmt::Debug for EnhancedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnhancedStore")
            .field("store", &self.store)
            .field("options", &self.options)
            .field("history_len", &self.with_history(HistoryManager::len))
            .field("auto_capture", &self.auto_capture.is_some())
            .finish()
    }
}
