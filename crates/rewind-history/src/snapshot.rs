#![forbid(unsafe_code)]

//! Point-in-time captures of a store.
//!
//! A [`Snapshot`] stores every atom of a store in encoded form, keyed by
//! atom id string (`atom<N>`). The encoded values use the tagged wire format
//! of [`ValueSerializer`], so cyclic and shared structures survive a trip
//! through JSON.
//!
//! Persisted schema:
//!
//! ```json
//! {
//!   "id": "snap-1",
//!   "state": { "atom3": { "value": 1, "type": "primitive", "name": "count" } },
//!   "metadata": { "timestamp": 1700000000000, "action": "set count",
//!                 "atomCount": 1, "version": "1.0.0" }
//! }
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use rewind_runtime::{AtomKind, Store};
use rewind_value::{Value, ValueComparator, ValueSerializer};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::error::Result;

/// Format version written into every snapshot.
pub const SNAPSHOT_FORMAT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Encoded value.
    pub value: Json,
    #[serde(rename = "type")]
    pub kind: AtomKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub atom_count: usize,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// Immutable capture of a store's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub state: BTreeMap<String, SnapshotEntry>,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// True when both snapshots hold the same atoms with the same encoded
    /// values. Ids and metadata are ignored.
    #[must_use]
    pub fn same_state(&self, other: &Snapshot) -> bool {
        self.state == other.state
    }

    /// Decode every entry. Entries that fail to decode are left out.
    #[must_use]
    pub fn decoded_state(&self) -> BTreeMap<String, Value> {
        let serializer = ValueSerializer::new();
        self.state
            .iter()
            .filter_map(|(key, entry)| match serializer.deserialize(&entry.value) {
                Ok(value) => Some((key.clone(), value)),
                Err(err) => {
                    warn!(snapshot = %self.id, atom = %key, error = %err, "undecodable entry");
                    None
                }
            })
            .collect()
    }

    /// Atoms added, removed or changed relative to `base`.
    #[must_use]
    pub fn delta_from(&self, base: &Snapshot) -> SnapshotDelta {
        let comparator = ValueComparator::new();
        let before = base.decoded_state();
        let after = self.decoded_state();
        let mut delta = SnapshotDelta::default();
        for (key, value) in &after {
            match before.get(key) {
                None => delta.added.push(key.clone()),
                Some(old) if !comparator.equal(old, value) => delta.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        delta.removed = before
            .keys()
            .filter(|key| !after.contains_key(*key))
            .cloned()
            .collect();
        delta
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} atoms", self.id, self.metadata.atom_count)?;
        if let Some(action) = &self.metadata.action {
            write!(f, ", {action}")?;
        }
        f.write_str(")")
    }
}

/// Atom keys that differ between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SnapshotDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotOptions {
    /// Snapshots retained by the manager; 0 retains none.
    pub max_history_length: usize,
    /// Nesting limit handed to the serializer.
    pub max_depth: usize,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            max_history_length: 50,
            max_depth: rewind_value::serialize::DEFAULT_MAX_DEPTH,
        }
    }
}

impl SnapshotOptions {
    #[must_use]
    pub fn with_max_history_length(mut self, len: usize) -> Self {
        self.max_history_length = len;
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Builds snapshots of one store and keeps the most recent ones.
pub struct SnapshotManager {
    store: Store,
    options: SnapshotOptions,
    serializer: ValueSerializer,
    clock: SharedClock,
    snapshots: VecDeque<Snapshot>,
    next_id: u64,
}

impl SnapshotManager {
    #[must_use]
    pub fn new(store: Store, options: SnapshotOptions) -> Self {
        Self::with_clock(store, options, std::rc::Rc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: Store, options: SnapshotOptions, clock: SharedClock) -> Self {
        Self {
            store,
            serializer: ValueSerializer::with_max_depth(options.max_depth),
            options,
            clock,
            snapshots: VecDeque::new(),
            next_id: 0,
        }
    }

    /// Capture every atom the registry associates with the store.
    ///
    /// Atoms whose evaluation fails are skipped. The snapshot is returned
    /// even when the retention limit is 0.
    pub fn create_snapshot(&mut self, action: Option<&str>, stack_trace: Option<&str>) -> Snapshot {
        let state = self.capture_state();
        self.record(state, action, stack_trace)
    }

    /// Encode every atom the registry associates with the store, without
    /// allocating a snapshot id or retaining anything.
    #[must_use]
    pub fn capture_state(&self) -> BTreeMap<String, SnapshotEntry> {
        let mut state = BTreeMap::new();
        for atom in self.store.atoms() {
            match self.store.get(&atom) {
                Ok(value) => {
                    state.insert(
                        atom.id().to_string(),
                        SnapshotEntry {
                            value: self.serializer.serialize(&value),
                            kind: atom.kind(),
                            name: self.store.display_name(&atom),
                        },
                    );
                }
                Err(err) => {
                    warn!(atom = %atom.id(), error = %err, "atom skipped in snapshot");
                }
            }
        }
        state
    }

    /// Turn an already captured state into a numbered, retained snapshot.
    pub(crate) fn record(
        &mut self,
        state: BTreeMap<String, SnapshotEntry>,
        action: Option<&str>,
        stack_trace: Option<&str>,
    ) -> Snapshot {
        self.next_id += 1;
        let snapshot = Snapshot {
            id: format!("snap-{}", self.next_id),
            metadata: SnapshotMetadata {
                timestamp: self.clock.now_ms(),
                action: action.map(str::to_string),
                atom_count: state.len(),
                version: SNAPSHOT_FORMAT_VERSION.to_string(),
                stack_trace: stack_trace.map(str::to_string),
            },
            state,
        };
        debug!(snapshot = %snapshot.id, atoms = snapshot.metadata.atom_count, "snapshot created");

        if self.options.max_history_length > 0 {
            self.snapshots.push_back(snapshot.clone());
            while self.snapshots.len() > self.options.max_history_length {
                self.snapshots.pop_front();
            }
        }
        snapshot
    }

    #[must_use]
    pub fn get_snapshot_by_id(&self, id: &str) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.id == id)
    }

    /// Retained snapshots, oldest first.
    #[must_use]
    pub fn get_all_snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.iter().cloned().collect()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn clear_snapshots(&mut self) {
        self.snapshots.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    #[must_use]
    pub fn options(&self) -> SnapshotOptions {
        self.options
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }
}

impl fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("store", &self.store.id())
            .field("options", &self.options)
            .field("retained", &self.snapshots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use rewind_runtime::{Atom, StoreError};
    use std::rc::Rc;

    fn manager(store: &Store, max: usize) -> (SnapshotManager, ManualClock) {
        let clock = ManualClock::new(1_700_000_000_000);
        let manager = SnapshotManager::with_clock(
            store.clone(),
            SnapshotOptions::default().with_max_history_length(max),
            Rc::new(clock.clone()),
        );
        (manager, clock)
    }

    #[test]
    fn captures_every_touched_atom() {
        let store = Store::new();
        let count = Atom::primitive(1).with_name("count");
        let c = count.clone();
        let doubled = Atom::computed(move |get| {
            Ok(Value::from(get.get(&c)?.as_f64().unwrap_or_default() * 2.0))
        });
        store.get(&doubled).unwrap();

        let (mut manager, _) = manager(&store, 10);
        let snap = manager.create_snapshot(Some("init"), None);
        assert_eq!(snap.id, "snap-1");
        assert_eq!(snap.metadata.atom_count, 2);
        assert_eq!(snap.metadata.version, "1.0.0");
        assert_eq!(snap.metadata.timestamp, 1_700_000_000_000);
        assert_eq!(snap.metadata.action.as_deref(), Some("init"));

        let entry = &snap.state[&count.id().to_string()];
        assert_eq!(entry.kind, AtomKind::Primitive);
        assert_eq!(entry.name, "count");
        assert_eq!(entry.value, serde_json::json!(1));
        assert_eq!(snap.state[&doubled.id().to_string()].kind, AtomKind::Computed);
    }

    #[test]
    fn failing_atoms_are_skipped() {
        let store = Store::new();
        let broken = Atom::computed(|_| Err(StoreError::custom("nope")));
        let _ = store.get(&broken);
        store.get(&Atom::primitive(0)).unwrap();
        let (mut manager, _) = manager(&store, 10);
        let snap = manager.create_snapshot(None, None);
        assert_eq!(snap.metadata.atom_count, 1);
    }

    #[test]
    fn retention_is_fifo() {
        let store = Store::new();
        let (mut manager, _) = manager(&store, 2);
        let first = manager.create_snapshot(None, None);
        manager.create_snapshot(None, None);
        let third = manager.create_snapshot(None, None);
        assert_eq!(manager.len(), 2);
        assert!(manager.get_snapshot_by_id(&first.id).is_none());
        assert_eq!(manager.latest(), Some(&third));
        manager.clear_snapshots();
        assert!(manager.is_empty());
    }

    #[test]
    fn zero_retention_keeps_nothing() {
        let store = Store::new();
        let (mut manager, _) = manager(&store, 0);
        let snap = manager.create_snapshot(Some("x"), None);
        assert_eq!(snap.id, "snap-1");
        assert!(manager.is_empty());
    }

    #[test]
    fn persisted_schema_is_camel_case() {
        let store = Store::new();
        store.get(&Atom::primitive("a").with_name("letter")).unwrap();
        let (mut manager, _) = manager(&store, 1);
        let snap = manager.create_snapshot(None, Some("at main"));
        let json: Json = serde_json::from_str(&snap.to_json().unwrap()).unwrap();
        assert_eq!(json["metadata"]["atomCount"], 1);
        assert_eq!(json["metadata"]["stackTrace"], "at main");
        assert!(json["metadata"].get("action").is_none());
        let entry = json["state"].as_object().unwrap().values().next().unwrap();
        assert_eq!(entry["type"], "primitive");
        assert_eq!(entry["name"], "letter");

        let back = Snapshot::from_json(&snap.to_json().unwrap()).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn delta_reports_added_removed_changed() {
        let store = Store::new();
        let a = Atom::primitive(1);
        let b = Atom::primitive(2);
        store.get(&a).unwrap();
        store.get(&b).unwrap();
        let (mut manager, _) = manager(&store, 10);
        let base = manager.create_snapshot(None, None);

        store.set(&a, 5).unwrap();
        let mut next = manager.create_snapshot(None, None);
        next.state.remove(&b.id().to_string());
        next.state.insert(
            "atom999999".into(),
            SnapshotEntry {
                value: serde_json::json!(true),
                kind: AtomKind::Primitive,
                name: "extra".into(),
            },
        );

        let delta = next.delta_from(&base);
        assert_eq!(delta.changed, vec![a.id().to_string()]);
        assert_eq!(delta.removed, vec![b.id().to_string()]);
        assert_eq!(delta.added, vec!["atom999999".to_string()]);
        assert!(base.delta_from(&base).is_empty());
    }

    #[test]
    fn same_state_ignores_metadata() {
        let store = Store::new();
        store.get(&Atom::primitive(1)).unwrap();
        let (mut manager, clock) = manager(&store, 10);
        let one = manager.create_snapshot(Some("a"), None);
        clock.advance_ms(500);
        let two = manager.create_snapshot(Some("b"), None);
        assert_ne!(one, two);
        assert!(one.same_state(&two));
    }
}
