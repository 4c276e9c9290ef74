#![forbid(unsafe_code)]

//! Integration tests for the store's dependency graph.
//!
//! Covers diamond invalidation, shared registries, subscriber panics and a
//! property test that derived values always agree with a direct computation.

use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use proptest::prelude::*;
use rewind_runtime::{Atom, AtomRegistry, RegistryMode, Store, StoreError};
use rewind_value::Value;

fn number(value: &Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}

fn sum_of(atoms: &[Atom]) -> Atom {
    let atoms = atoms.to_vec();
    Atom::computed(move |get| {
        let mut total = 0.0;
        for atom in &atoms {
            total += number(&get.get(atom)?);
        }
        Ok(Value::from(total))
    })
}

// ============================================================================
// Diamond
// ============================================================================

#[test]
fn diamond_recomputes_once_per_read() {
    let store = Store::new();
    let root = Atom::primitive(1);
    let r1 = root.clone();
    let r2 = root.clone();
    let left = Atom::computed(move |get| Ok(Value::from(number(&get.get(&r1)?) + 1.0)));
    let right = Atom::computed(move |get| Ok(Value::from(number(&get.get(&r2)?) * 10.0)));

    let calls = Rc::new(Cell::new(0));
    let c = Rc::clone(&calls);
    let (l, r) = (left.clone(), right.clone());
    let bottom = Atom::computed(move |get| {
        c.set(c.get() + 1);
        Ok(Value::from(number(&get.get(&l)?) + number(&get.get(&r)?)))
    });

    assert_eq!(store.get(&bottom).unwrap(), Value::from(12));
    store.set(&root, 2).unwrap();
    assert_eq!(store.get(&bottom).unwrap(), Value::from(23));
    assert_eq!(store.get(&bottom).unwrap(), Value::from(23));
    assert_eq!(calls.get(), 2);
}

#[test]
fn diamond_subscriber_sees_final_value_once() {
    let store = Store::new();
    let root = Atom::primitive(1);
    let a = root.clone();
    let b = root.clone();
    let left = Atom::computed(move |get| get.get(&a));
    let right = Atom::computed(move |get| get.get(&b));
    let bottom = sum_of(&[left, right]);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    let _sub = store.subscribe(&bottom, move |v| s.borrow_mut().push(number(v)));
    store.set(&root, 5).unwrap();
    assert_eq!(*seen.borrow(), vec![10.0]);
}

#[test]
fn dependencies_follow_the_last_evaluation() {
    let store = Store::new();
    let flag = Atom::primitive(true);
    let yes = Atom::primitive("yes");
    let no = Atom::primitive("no");
    let (f, y, n) = (flag.clone(), yes.clone(), no.clone());
    let pick = Atom::computed(move |get| {
        if get.get(&f)?.as_bool().unwrap_or(false) {
            get.get(&y)
        } else {
            get.get(&n)
        }
    });

    assert_eq!(store.get(&pick).unwrap(), Value::from("yes"));
    store.set(&flag, false).unwrap();
    assert_eq!(store.get(&pick).unwrap(), Value::from("no"));
    assert!(store.dependents_of(&yes).is_empty());
    assert_eq!(store.dependents_of(&no), vec![pick.id()]);

    // Writing the abandoned branch leaves the cache alone.
    let version = store.version_of(&pick);
    store.set(&yes, "still yes").unwrap();
    assert!(!store.is_dirty(&pick));
    assert_eq!(store.version_of(&pick), version);
}

// ============================================================================
// Registries
// ============================================================================

#[test]
fn isolated_stores_share_atoms_but_not_values() {
    let registry = AtomRegistry::new();
    let s1 = Store::with_registry(registry.clone(), RegistryMode::Isolated);
    let s2 = Store::with_registry(registry.clone(), RegistryMode::Isolated);
    let count = Atom::primitive(0).with_name("count");
    let other = Atom::primitive(0).with_name("other");

    s1.set(&count, 1).unwrap();
    s2.get(&other).unwrap();
    assert_eq!(s2.get(&count).unwrap(), Value::from(0));
    assert_eq!(s1.get(&count).unwrap(), Value::from(1));

    assert_eq!(registry.len(), 2);
    assert_eq!(s1.atoms(), vec![count.clone()]);
    assert_eq!(s2.atoms(), vec![count, other]);
}

#[test]
fn global_store_dumps_every_registered_atom() {
    let registry = AtomRegistry::new();
    let global = Store::with_registry(registry.clone(), RegistryMode::Global);
    let count = Atom::primitive(3);
    registry.register(&count, Some("count"));
    assert_eq!(global.get_state().get("count"), Some(&Value::from(3)));
}

#[test]
fn implicit_registration_happens_once() {
    let store = Store::new();
    let count = Atom::primitive(0);
    for i in 0..5 {
        store.set(&count, i).unwrap();
        store.get(&count).unwrap();
    }
    assert_eq!(store.registry().len(), 1);
}

#[test]
fn destroyed_store_detaches_from_registry() {
    let registry = AtomRegistry::new();
    let store = Store::with_registry(registry.clone(), RegistryMode::Isolated);
    store.get(&Atom::primitive(0)).unwrap();
    store.destroy();
    assert_eq!(registry.mode_of(store.id()), None);
    assert_eq!(registry.len(), 1);
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn panicking_subscriber_propagates_and_store_recovers() {
    let store = Store::new();
    let count = Atom::primitive(0);
    let c = count.clone();
    let doubled = Atom::computed(move |get| Ok(Value::from(number(&get.get(&c)?) * 2.0)));
    store.get(&doubled).unwrap();

    let later = Rc::new(Cell::new(0));
    let l = Rc::clone(&later);
    let boom = store.subscribe(&count, |_| panic!("subscriber failure"));
    let _after = store.subscribe(&count, move |_| l.set(l.get() + 1));
    let hooks = Rc::new(Cell::new(0));
    let h = Rc::clone(&hooks);
    let _hook = store.on_set(move |_, _, _| h.set(h.get() + 1));

    let result = catch_unwind(AssertUnwindSafe(|| store.set(&count, 1)));
    assert!(result.is_err());
    assert_eq!(later.get(), 0, "first panic aborts remaining notifications");

    // Value stored and dependents invalidated before the panic.
    assert_eq!(store.get(&count).unwrap(), Value::from(1));
    assert_eq!(store.get(&doubled).unwrap(), Value::from(2));

    boom.unsubscribe();
    store.set(&count, 2).unwrap();
    assert_eq!(later.get(), 1);
    assert_eq!(hooks.get(), 1, "set scope unwound with the panic");
}

#[test]
fn self_reading_atom_is_a_cycle() {
    let store = Store::new();
    let slot: Rc<RefCell<Option<Atom>>> = Rc::new(RefCell::new(None));
    let s = Rc::clone(&slot);
    let selfish = Atom::computed(move |get| {
        let me = s.borrow().clone();
        match me {
            Some(me) => get.get(&me),
            None => Ok(Value::Null),
        }
    });
    *slot.borrow_mut() = Some(selfish.clone());
    match store.get(&selfish) {
        Err(StoreError::CircularDependency { cycle }) => {
            assert_eq!(cycle, vec![selfish.id(), selfish.id()]);
        }
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn read_error_reaches_dependents_unchanged() {
    let store = Store::new();
    let broken = Atom::computed(|_| Err(StoreError::custom("backend offline")));
    let b = broken.clone();
    let wrapper = Atom::computed(move |get| get.get(&b));
    assert_eq!(
        store.get(&wrapper).unwrap_err(),
        StoreError::custom("backend offline")
    );
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn derived_sum_tracks_writes(writes in proptest::collection::vec((0usize..4, -100i32..100), 1..40)) {
        let store = Store::new();
        let cells: Vec<Atom> = (0..4).map(|_| Atom::primitive(0)).collect();
        let total = sum_of(&cells);
        let mut expected = [0i32; 4];

        let notified = Rc::new(Cell::new(f64::NAN));
        let n = Rc::clone(&notified);
        let _sub = store.subscribe(&total, move |v| n.set(number(v)));

        for (index, value) in writes {
            store.set(&cells[index], value).unwrap();
            expected[index] = value;
            let want = f64::from(expected.iter().sum::<i32>());
            prop_assert_eq!(number(&store.get(&total).unwrap()), want);
        }
        let want = f64::from(expected.iter().sum::<i32>());
        if !notified.get().is_nan() {
            prop_assert_eq!(notified.get(), want);
        }
    }
}
