#![forbid(unsafe_code)]

//! Shared atom registry.
//!
//! The registry maps atom ids to atom handles and debug names, and tracks
//! which atoms each attached store has touched. Stores register atoms
//! implicitly on every get, set and subscribe, so snapshotting can enumerate
//! the atoms of a store without the application listing them.
//!
//! Two stores sharing a registry in [`RegistryMode::Global`] see one
//! namespace: every registered atom belongs to both. In
//! [`RegistryMode::Isolated`] a store only sees atoms accessed through it.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::atom::{Atom, AtomId};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique store identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store{}", self.0)
    }
}

/// How a store shares the registry namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryMode {
    Global,
    #[default]
    Isolated,
}

struct AtomEntry {
    atom: Atom,
    name: Option<String>,
}

struct StoreAssociation {
    mode: RegistryMode,
    atoms: BTreeSet<AtomId>,
}

#[derive(Default)]
struct RegistryInner {
    atoms: IndexMap<AtomId, AtomEntry>,
    stores: AHashMap<StoreId, StoreAssociation>,
    destroyed: bool,
}

/// Cloneable handle to a registry. Clones share state.
#[derive(Clone, Default)]
pub struct AtomRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl AtomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `atom`, optionally overriding its debug name.
    ///
    /// Idempotent. Passing `None` keeps a previously registered name, falling
    /// back to the atom's own label.
    pub fn register(&self, atom: &Atom, name: Option<&str>) {
        let mut inner = self.inner.borrow_mut();
        if inner.destroyed {
            warn!(atom = %atom.id(), "registration on destroyed registry ignored");
            return;
        }
        let entry = inner
            .atoms
            .entry(atom.id())
            .or_insert_with(|| AtomEntry {
                atom: atom.clone(),
                name: None,
            });
        if let Some(name) = name {
            entry.name = Some(name.to_string());
        }
    }

    /// Register `atom` and associate it with `store`.
    pub(crate) fn record_access(&self, store: StoreId, atom: &Atom) {
        let mut inner = self.inner.borrow_mut();
        if inner.destroyed {
            return;
        }
        let id = atom.id();
        if !inner.atoms.contains_key(&id) {
            debug!(atom = %id, %store, "atom registered implicitly");
            inner.atoms.insert(
                id,
                AtomEntry {
                    atom: atom.clone(),
                    name: None,
                },
            );
        }
        if let Some(assoc) = inner.stores.get_mut(&store) {
            assoc.atoms.insert(id);
        }
    }

    #[must_use]
    pub fn get(&self, id: AtomId) -> Option<Atom> {
        self.inner.borrow().atoms.get(&id).map(|e| e.atom.clone())
    }

    #[must_use]
    pub fn contains(&self, id: AtomId) -> bool {
        self.inner.borrow().atoms.contains_key(&id)
    }

    /// Registered name, else the atom's own label.
    #[must_use]
    pub fn name_of(&self, id: AtomId) -> Option<String> {
        let inner = self.inner.borrow();
        let entry = inner.atoms.get(&id)?;
        entry.name.clone().or_else(|| entry.atom.name())
    }

    pub fn attach_store(&self, store: StoreId, mode: RegistryMode) {
        let mut inner = self.inner.borrow_mut();
        if inner.destroyed {
            warn!(%store, "attach on destroyed registry ignored");
            return;
        }
        inner
            .stores
            .entry(store)
            .and_modify(|assoc| assoc.mode = mode)
            .or_insert_with(|| StoreAssociation {
                mode,
                atoms: BTreeSet::new(),
            });
    }

    pub fn detach_store(&self, store: StoreId) {
        self.inner.borrow_mut().stores.remove(&store);
    }

    #[must_use]
    pub fn mode_of(&self, store: StoreId) -> Option<RegistryMode> {
        self.inner.borrow().stores.get(&store).map(|a| a.mode)
    }

    /// Atoms visible to `store`, in registration order. Empty for an
    /// unattached store.
    #[must_use]
    pub fn atoms_for_store(&self, store: StoreId) -> Vec<Atom> {
        let inner = self.inner.borrow();
        let Some(assoc) = inner.stores.get(&store) else {
            return Vec::new();
        };
        inner
            .atoms
            .iter()
            .filter(|(id, _)| assoc.mode == RegistryMode::Global || assoc.atoms.contains(*id))
            .map(|(_, entry)| entry.atom.clone())
            .collect()
    }

    /// Every registered atom, in registration order.
    #[must_use]
    pub fn all_atoms(&self) -> Vec<Atom> {
        self.inner
            .borrow()
            .atoms
            .values()
            .map(|e| e.atom.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().atoms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().atoms.is_empty()
    }

    /// Forget every atom and every store's associations. Attached stores
    /// stay attached.
    pub fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.atoms.clear();
        for assoc in inner.stores.values_mut() {
            assoc.atoms.clear();
        }
    }

    pub fn destroy(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.atoms.clear();
        inner.stores.clear();
        inner.destroyed = true;
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.borrow().destroyed
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for AtomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("AtomRegistry")
            .field("atoms", &inner.atoms.len())
            .field("stores", &inner.stores.len())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_idempotent_and_renames() {
        let registry = AtomRegistry::new();
        let atom = Atom::primitive(0);
        registry.register(&atom, Some("a"));
        registry.register(&atom, None);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.name_of(atom.id()).as_deref(), Some("a"));
        registry.register(&atom, Some("b"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.name_of(atom.id()).as_deref(), Some("b"));
    }

    #[test]
    fn name_falls_back_to_atom_label() {
        let registry = AtomRegistry::new();
        let atom = Atom::primitive(0).with_name("label");
        registry.register(&atom, None);
        assert_eq!(registry.name_of(atom.id()).as_deref(), Some("label"));
    }

    #[test]
    fn get_unknown_is_none() {
        let registry = AtomRegistry::new();
        let atom = Atom::primitive(0);
        assert!(registry.get(atom.id()).is_none());
        assert!(registry.name_of(atom.id()).is_none());
    }

    #[test]
    fn isolated_store_sees_only_its_atoms() {
        let registry = AtomRegistry::new();
        let (s1, s2) = (StoreId::next(), StoreId::next());
        registry.attach_store(s1, RegistryMode::Isolated);
        registry.attach_store(s2, RegistryMode::Isolated);
        let (a, b) = (Atom::primitive(1), Atom::primitive(2));
        registry.record_access(s1, &a);
        registry.record_access(s2, &b);
        assert_eq!(registry.atoms_for_store(s1), vec![a.clone()]);
        assert_eq!(registry.atoms_for_store(s2), vec![b.clone()]);
        assert_eq!(registry.all_atoms(), vec![a, b]);
    }

    #[test]
    fn global_store_sees_everything() {
        let registry = AtomRegistry::new();
        let (s1, s2) = (StoreId::next(), StoreId::next());
        registry.attach_store(s1, RegistryMode::Global);
        registry.attach_store(s2, RegistryMode::Isolated);
        let a = Atom::primitive(1);
        registry.record_access(s2, &a);
        assert_eq!(registry.atoms_for_store(s1), vec![a]);
        assert_eq!(registry.mode_of(s1), Some(RegistryMode::Global));
    }

    #[test]
    fn unattached_store_sees_nothing() {
        let registry = AtomRegistry::new();
        registry.register(&Atom::primitive(0), None);
        assert!(registry.atoms_for_store(StoreId::next()).is_empty());
    }

    #[test]
    fn clear_and_destroy() {
        let registry = AtomRegistry::new();
        let store = StoreId::next();
        registry.attach_store(store, RegistryMode::Isolated);
        registry.record_access(store, &Atom::primitive(0));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.atoms_for_store(store).is_empty());
        assert_eq!(registry.mode_of(store), Some(RegistryMode::Isolated));

        registry.destroy();
        assert!(registry.is_destroyed());
        registry.register(&Atom::primitive(0), Some("late"));
        assert!(registry.is_empty());
        assert_eq!(registry.mode_of(store), None);
    }

    #[test]
    fn mode_deserializes_lowercase() {
        let mode: RegistryMode = serde_json::from_str("\"global\"").unwrap();
        assert_eq!(mode, RegistryMode::Global);
        assert_eq!(RegistryMode::default(), RegistryMode::Isolated);
    }
}
