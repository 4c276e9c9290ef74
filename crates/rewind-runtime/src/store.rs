#![forbid(unsafe_code)]

//! The dependency-tracking atom store.
//!
//! # Design
//!
//! A [`Store`] keeps one [`AtomState`] per atom it has touched. Reading a
//! derived atom pushes its id onto an evaluation stack; every nested
//! [`Getter::get`] records an edge from the atom being read (dependency) to
//! the atom on top of the stack (dependent). Results are memoized until a
//! transitive dependency is written.
//!
//! # Invariants
//!
//! 1. A cached derived value is returned only while its `dirty` flag is
//!    clear; every write marks all transitive dependents dirty before any
//!    subscriber runs.
//! 2. Writing a value that [`is_same`](Value::is_same) as the current one
//!    bumps nothing and notifies nobody.
//! 3. Subscribers are notified in registration order.
//! 4. No `RefCell` borrow of the store is held while user code (read, write,
//!    subscriber or hook) runs.
//! 5. Reading an atom whose evaluation is already in progress fails with
//!    [`StoreError::CircularDependency`].
//!
//! # Failure Modes
//!
//! - **Read function fails**: the error reaches the caller of `get`
//!   unchanged; the atom stays dirty and is retried on the next read.
//! - **Subscriber panics**: the panic unwinds out of `set`. Remaining
//!   subscribers are skipped, but the value is already stored and
//!   dependents are already invalidated, so the store stays consistent.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use rewind_value::{Value, ValueSerializer};
use serde_json::Value as Json;
use tracing::{debug, trace, warn};

use crate::atom::{Atom, AtomBehavior, AtomId, ReadFn};
use crate::error::{Result, StoreError};
use crate::registry::{AtomRegistry, RegistryMode, StoreId};
use crate::subscription::Subscription;

type Listener = Rc<dyn Fn(&Value)>;
type SetHook = Rc<dyn Fn(&Atom, &Value, SetOrigin)>;

/// Where a write came from, as reported to [`Store::on_set`] hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOrigin {
    /// `set`/`update` called by application code.
    User,
    /// A value written back from a snapshot.
    Restore,
}

/// Per-atom bookkeeping inside one store.
#[derive(Default)]
struct AtomState {
    /// `None` until the first read (primitive) or evaluation (derived).
    value: Option<Value>,
    dirty: bool,
    derived: bool,
    version: u64,
    subscribers: Vec<(u64, Listener)>,
    dependents: BTreeSet<AtomId>,
    dependencies: BTreeSet<AtomId>,
}

impl AtomState {
    fn fresh_value(&self) -> Option<Value> {
        if self.dirty {
            None
        } else {
            self.value.clone()
        }
    }

    fn listeners(&self) -> Vec<Listener> {
        self.subscribers.iter().map(|(_, l)| Rc::clone(l)).collect()
    }
}

struct StoreInner {
    id: StoreId,
    registry: AtomRegistry,
    states: AHashMap<AtomId, AtomState>,
    evaluating: Vec<AtomId>,
    set_depth: usize,
    hooks: Vec<(u64, SetHook)>,
    next_listener_key: u64,
    destroyed: bool,
}

impl StoreInner {
    fn state_mut(&mut self, id: AtomId) -> &mut AtomState {
        self.states.entry(id).or_default()
    }

    fn listener_key(&mut self) -> u64 {
        self.next_listener_key += 1;
        self.next_listener_key
    }

    /// Drop the edges recorded by the previous evaluation of `id` and push it
    /// onto the evaluation stack.
    fn begin_evaluation(&mut self, id: AtomId) {
        let previous = std::mem::take(&mut self.state_mut(id).dependencies);
        for dependency in previous {
            if let Some(state) = self.states.get_mut(&dependency) {
                state.dependents.remove(&id);
            }
        }
        self.evaluating.push(id);
    }

    /// Mark every transitive dependent of `source` dirty. Returns them in
    /// breadth-first order.
    fn invalidate_dependents(&mut self, source: AtomId) -> Vec<AtomId> {
        let mut order = Vec::new();
        let mut seen = AHashSet::new();
        let mut queue: VecDeque<AtomId> = self
            .states
            .get(&source)
            .map(|s| s.dependents.iter().copied().collect())
            .unwrap_or_default();
        while let Some(id) = queue.pop_front() {
            if id == source || !seen.insert(id) {
                continue;
            }
            if let Some(state) = self.states.get_mut(&id) {
                state.dirty = true;
                queue.extend(state.dependents.iter().copied());
            }
            order.push(id);
        }
        order
    }
}

/// Read capability handed to atom read functions.
pub struct Getter<'a> {
    store: &'a Store,
}

impl Getter<'_> {
    /// Read `atom`, recording it as a dependency of the atom being evaluated.
    pub fn get(&self, atom: &Atom) -> Result<Value> {
        self.store.get(atom)
    }
}

/// Read/write capability handed to writable atoms' write functions.
pub struct WriteContext<'a> {
    store: &'a Store,
}

impl WriteContext<'_> {
    pub fn get(&self, atom: &Atom) -> Result<Value> {
        self.store.get(atom)
    }

    pub fn set(&self, atom: &Atom, value: impl Into<Value>) -> Result<()> {
        self.store.set(atom, value)
    }

    pub fn update(&self, atom: &Atom, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        self.store.update(atom, f)
    }
}

enum Pending<'f> {
    Value(Value),
    Update(Box<dyn FnOnce(&Value) -> Value + 'f>),
}

impl Pending<'_> {
    fn resolve(self, previous: &Value) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Update(f) => f(previous),
        }
    }
}

/// Pops the evaluation stack when an evaluation ends, including by panic.
struct EvaluationFrame<'a> {
    store: &'a Store,
}

impl Drop for EvaluationFrame<'_> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.store.inner.try_borrow_mut() {
            inner.evaluating.pop();
        }
    }
}

/// Tracks `set` nesting so hooks fire once per outermost write.
struct SetScope<'a> {
    store: &'a Store,
}

impl<'a> SetScope<'a> {
    fn enter(store: &'a Store) -> Self {
        store.inner.borrow_mut().set_depth += 1;
        Self { store }
    }
}

impl Drop for SetScope<'_> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.store.inner.try_borrow_mut() {
            inner.set_depth = inner.set_depth.saturating_sub(1);
        }
    }
}

/// A single-threaded atom store. Cloning shares the same state.
#[derive(Clone)]
pub struct Store {
    inner: Rc<RefCell<StoreInner>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// A store with its own registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(AtomRegistry::new(), RegistryMode::Isolated)
    }

    /// A store attached to a shared registry.
    #[must_use]
    pub fn with_registry(registry: AtomRegistry, mode: RegistryMode) -> Self {
        let id = StoreId::next();
        registry.attach_store(id, mode);
        debug!(store = %id, ?mode, "store created");
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                id,
                registry,
                states: AHashMap::new(),
                evaluating: Vec::new(),
                set_depth: 0,
                hooks: Vec::new(),
                next_listener_key: 0,
                destroyed: false,
            })),
        }
    }

    #[must_use]
    pub fn id(&self) -> StoreId {
        self.inner.borrow().id
    }

    #[must_use]
    pub fn registry(&self) -> AtomRegistry {
        self.inner.borrow().registry.clone()
    }

    /// Atoms the registry associates with this store.
    #[must_use]
    pub fn atoms(&self) -> Vec<Atom> {
        let inner = self.inner.borrow();
        inner.registry.atoms_for_store(inner.id)
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.borrow().destroyed
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(StoreError::StoreDestroyed)
        } else {
            Ok(())
        }
    }

    /// Register `atom` and, inside an evaluation, record the dependency edge.
    fn track(&self, atom: &Atom) {
        let mut inner = self.inner.borrow_mut();
        let id = atom.id();
        inner.registry.record_access(inner.id, atom);
        inner.state_mut(id).derived = atom.kind().is_derived();
        if let Some(&dependent) = inner.evaluating.last()
            && dependent != id
        {
            inner.state_mut(id).dependents.insert(dependent);
            inner.state_mut(dependent).dependencies.insert(id);
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current value of `atom`.
    ///
    /// Primitives yield their stored value, or the initial value on first
    /// access. Derived atoms are evaluated on demand and memoized.
    pub fn get(&self, atom: &Atom) -> Result<Value> {
        self.ensure_live()?;
        self.track(atom);
        match atom.behavior() {
            AtomBehavior::Primitive { initial } => Ok(self.primitive_value(atom.id(), initial)),
            AtomBehavior::Computed { read } | AtomBehavior::Writable { read, .. } => {
                self.evaluate(atom.id(), read)
            }
        }
    }

    fn primitive_value(&self, id: AtomId, initial: &Value) -> Value {
        let mut inner = self.inner.borrow_mut();
        let state = inner.state_mut(id);
        state.dirty = false;
        state.value.get_or_insert_with(|| initial.clone()).clone()
    }

    fn evaluate(&self, id: AtomId, read: &ReadFn) -> Result<Value> {
        {
            let inner = self.inner.borrow();
            if let Some(pos) = inner.evaluating.iter().position(|e| *e == id) {
                let mut cycle = inner.evaluating[pos..].to_vec();
                cycle.push(id);
                warn!(atom = %id, depth = cycle.len(), "circular dependency detected");
                return Err(StoreError::CircularDependency { cycle });
            }
            if let Some(value) = inner.states.get(&id).and_then(AtomState::fresh_value) {
                return Ok(value);
            }
        }

        self.inner.borrow_mut().begin_evaluation(id);
        trace!(atom = %id, "evaluating");
        let frame = EvaluationFrame { store: self };
        let result = read(&Getter { store: self });
        drop(frame);

        let mut inner = self.inner.borrow_mut();
        let state = inner.state_mut(id);
        match result {
            Ok(value) => {
                state.value = Some(value.clone());
                state.dirty = false;
                state.version += 1;
                Ok(value)
            }
            Err(err) => {
                state.dirty = true;
                Err(err)
            }
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write `value` to `atom`.
    ///
    /// Writable atoms forward the value to their write function. Computed
    /// atoms reject the write with [`StoreError::ComputedAtomWrite`].
    pub fn set(&self, atom: &Atom, value: impl Into<Value>) -> Result<()> {
        self.apply_set(atom, Pending::Value(value.into()), SetOrigin::User)
    }

    /// Write the result of `f` applied to the current value.
    pub fn update(&self, atom: &Atom, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        self.apply_set(atom, Pending::Update(Box::new(f)), SetOrigin::User)
    }

    /// Write a value read back from a snapshot. Hooks observe
    /// [`SetOrigin::Restore`].
    pub fn restore_value(&self, atom: &Atom, value: Value) -> Result<()> {
        self.apply_set(atom, Pending::Value(value), SetOrigin::Restore)
    }

    fn apply_set(&self, atom: &Atom, pending: Pending<'_>, origin: SetOrigin) -> Result<()> {
        self.ensure_live()?;
        {
            let inner = self.inner.borrow();
            inner.registry.record_access(inner.id, atom);
        }
        let written = {
            let _scope = SetScope::enter(self);
            match atom.behavior() {
                AtomBehavior::Computed { .. } => {
                    return Err(StoreError::ComputedAtomWrite { atom: atom.id() });
                }
                AtomBehavior::Primitive { initial } => {
                    self.write_primitive(atom.id(), initial, pending)
                }
                AtomBehavior::Writable { write, .. } => {
                    let value = match pending {
                        Pending::Value(value) => value,
                        update => update.resolve(&self.get(atom)?),
                    };
                    write(&WriteContext { store: self }, value.clone())?;
                    Some(value)
                }
            }
        };
        let outermost = self.inner.borrow().set_depth == 0;
        if let Some(value) = written
            && outermost
        {
            self.fire_hooks(atom, &value, origin);
        }
        Ok(())
    }

    /// Returns the stored value, or `None` when the write was a no-op.
    fn write_primitive(&self, id: AtomId, initial: &Value, pending: Pending<'_>) -> Option<Value> {
        let previous = self.primitive_value(id, initial);
        let next = pending.resolve(&previous);
        if previous.is_same(&next) {
            trace!(atom = %id, "unchanged value ignored");
            return None;
        }

        let (listeners, affected) = {
            let mut inner = self.inner.borrow_mut();
            let state = inner.state_mut(id);
            state.value = Some(next.clone());
            state.version += 1;
            let version = state.version;
            let listeners = state.listeners();
            let affected = inner.invalidate_dependents(id);
            debug!(atom = %id, version, dependents = affected.len(), "atom set");
            (listeners, affected)
        };

        for listener in &listeners {
            listener(&next);
        }
        self.refresh_dependents(&affected);
        Some(next)
    }

    /// Recompute subscribed dependents and notify those whose value changed.
    fn refresh_dependents(&self, affected: &[AtomId]) {
        let watched: Vec<(AtomId, Option<Value>)> = {
            let inner = self.inner.borrow();
            affected
                .iter()
                .filter_map(|id| {
                    let state = inner.states.get(id)?;
                    (!state.subscribers.is_empty()).then(|| (*id, state.value.clone()))
                })
                .collect()
        };
        if watched.is_empty() {
            return;
        }
        let registry = self.registry();
        for (id, previous) in watched {
            let Some(atom) = registry.get(id) else {
                continue;
            };
            match self.get(&atom) {
                Ok(next) => {
                    if previous.is_some_and(|p| p.is_same(&next)) {
                        continue;
                    }
                    let listeners = match self.inner.borrow().states.get(&id) {
                        Some(state) => state.listeners(),
                        None => continue,
                    };
                    for listener in &listeners {
                        listener(&next);
                    }
                }
                Err(err) => warn!(atom = %id, error = %err, "dependent recompute failed"),
            }
        }
    }

    fn fire_hooks(&self, atom: &Atom, value: &Value, origin: SetOrigin) {
        let hooks: Vec<SetHook> = self
            .inner
            .borrow()
            .hooks
            .iter()
            .map(|(_, h)| Rc::clone(h))
            .collect();
        for hook in hooks {
            hook(atom, value, origin);
        }
    }

    /// Mark every derived atom dirty so the next read re-evaluates it.
    pub fn invalidate_derived(&self) {
        let mut inner = self.inner.borrow_mut();
        let mut count = 0usize;
        for state in inner.states.values_mut().filter(|s| s.derived) {
            state.dirty = true;
            count += 1;
        }
        debug!(store = %inner.id, count, "derived atoms invalidated");
    }

    // ========================================================================
    // Subscriptions and hooks
    // ========================================================================

    /// Call `callback` with the new value whenever `atom` changes.
    ///
    /// Derived atoms are evaluated once up front so their dependency edges
    /// exist before the first write.
    pub fn subscribe(&self, atom: &Atom, callback: impl Fn(&Value) + 'static) -> Subscription {
        if self.is_destroyed() {
            warn!(atom = %atom.id(), "subscribe on destroyed store ignored");
            return Subscription::inert();
        }
        if atom.kind().is_derived() {
            if let Err(err) = self.get(atom) {
                warn!(atom = %atom.id(), error = %err, "initial evaluation for subscriber failed");
            }
        } else {
            self.track(atom);
        }

        let id = atom.id();
        let key = {
            let mut inner = self.inner.borrow_mut();
            let key = inner.listener_key();
            inner
                .state_mut(id)
                .subscribers
                .push((key, Rc::new(callback)));
            key
        };
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade()
                && let Some(state) = inner.borrow_mut().states.get_mut(&id)
            {
                state.subscribers.retain(|(k, _)| *k != key);
            }
        })
    }

    /// Register a hook fired after every outermost successful `set`,
    /// `update` or `restore_value` that stored a value.
    pub fn on_set(&self, hook: impl Fn(&Atom, &Value, SetOrigin) + 'static) -> Subscription {
        let key = {
            let mut inner = self.inner.borrow_mut();
            let key = inner.listener_key();
            inner.hooks.push((key, Rc::new(hook)));
            key
        };
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().hooks.retain(|(k, _)| *k != key);
            }
        })
    }

    /// Run `plugin` against this store.
    pub fn apply_plugin(&self, plugin: impl FnOnce(&Store)) {
        debug!(store = %self.id(), "applying plugin");
        plugin(self);
    }

    // ========================================================================
    // State dumps
    // ========================================================================

    /// Display name used in state dumps: registered name, atom label, or id.
    #[must_use]
    pub fn display_name(&self, atom: &Atom) -> String {
        self.registry()
            .name_of(atom.id())
            .unwrap_or_else(|| atom.id().to_string())
    }

    /// Name to current value for every atom of this store. Atoms whose
    /// evaluation fails are left out.
    #[must_use]
    pub fn get_state(&self) -> BTreeMap<String, Value> {
        let mut state = BTreeMap::new();
        for atom in self.atoms() {
            match self.get(&atom) {
                Ok(value) => {
                    state.insert(self.display_name(&atom), value);
                }
                Err(err) => warn!(atom = %atom.id(), error = %err, "atom left out of state"),
            }
        }
        state
    }

    /// [`get_state`](Self::get_state) with every value encoded.
    #[must_use]
    pub fn serialize_state(&self) -> BTreeMap<String, Json> {
        let serializer = ValueSerializer::new();
        self.get_state()
            .into_iter()
            .map(|(name, value)| (name, serializer.serialize(&value)))
            .collect()
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Bumped on every change or recomputation of `atom`; 0 if untouched.
    #[must_use]
    pub fn version_of(&self, atom: &Atom) -> u64 {
        self.inner
            .borrow()
            .states
            .get(&atom.id())
            .map_or(0, |s| s.version)
    }

    /// True when the next read of `atom` would evaluate it.
    #[must_use]
    pub fn is_dirty(&self, atom: &Atom) -> bool {
        self.inner
            .borrow()
            .states
            .get(&atom.id())
            .is_none_or(|s| s.dirty || s.value.is_none())
    }

    #[must_use]
    pub fn dependents_of(&self, atom: &Atom) -> Vec<AtomId> {
        self.inner
            .borrow()
            .states
            .get(&atom.id())
            .map(|s| s.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn dependencies_of(&self, atom: &Atom) -> Vec<AtomId> {
        self.inner
            .borrow()
            .states
            .get(&atom.id())
            .map(|s| s.dependencies.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop all atom state and detach from the registry. Every later
    /// operation fails with [`StoreError::StoreDestroyed`].
    pub fn destroy(&self) {
        let (states, hooks) = {
            let mut inner = self.inner.borrow_mut();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            inner.registry.detach_store(inner.id);
            debug!(store = %inner.id, atoms = inner.states.len(), "store destroyed");
            (
                std::mem::take(&mut inner.states),
                std::mem::take(&mut inner.hooks),
            )
        };
        drop(states);
        drop(hooks);
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Store")
            .field("id", &inner.id)
            .field("atoms", &inner.states.len())
            .field("hooks", &inner.hooks.len())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}
