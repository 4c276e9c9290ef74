#![forbid(unsafe_code)]

//! Property-based invariant tests for history and compression.
//!
//! 1. History never exceeds its capacity.
//! 2. Undo then redo returns to the same current snapshot.
//! 3. Every strategy output is an ordered subset no longer than its input.
//! 4. Size-based compression never triggers at or below `max_snapshots`.
//! 5. A primitive written then read yields the same value.

use std::collections::BTreeMap;

use proptest::prelude::*;
use rewind_history::{
    CompressionFactory, CompressionOptions, HistoryManager, SNAPSHOT_FORMAT_VERSION, Snapshot,
    SnapshotEntry, SnapshotMetadata,
};
use rewind_runtime::{Atom, AtomKind, Store};
use rewind_value::Value;
use serde_json::json;

fn snapshot(n: usize, timestamp: i64, value: i64) -> Snapshot {
    let mut state = BTreeMap::new();
    state.insert(
        "atom1".to_string(),
        SnapshotEntry {
            value: json!(value),
            kind: AtomKind::Primitive,
            name: "a".into(),
        },
    );
    Snapshot {
        id: format!("snap-{n}"),
        metadata: SnapshotMetadata {
            timestamp,
            action: Some(format!("step{n}")),
            atom_count: state.len(),
            version: SNAPSHOT_FORMAT_VERSION.to_string(),
            stack_trace: None,
        },
        state,
    }
}

#[derive(Debug, Clone)]
enum Op {
    Add,
    Undo,
    Redo,
    Jump(usize),
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Add),
        2 => Just(Op::Undo),
        2 => Just(Op::Redo),
        1 => (0usize..12).prop_map(Op::Jump),
        1 => Just(Op::Clear),
    ]
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Capacity
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn history_respects_capacity(max in 0usize..8, ops in proptest::collection::vec(op(), 0..60)) {
        let mut history = HistoryManager::new(max);
        for (n, op) in ops.into_iter().enumerate() {
            match op {
                Op::Add => history.add(snapshot(n, 0, n as i64)),
                Op::Undo => { history.undo(); }
                Op::Redo => { history.redo(); }
                Op::Jump(i) => { history.jump_to(i); }
                Op::Clear => history.clear(),
            }
            prop_assert!(history.len() <= max);
            prop_assert_eq!(history.current_index().is_some(), history.current().is_some());
            prop_assert_eq!(history.can_undo(), !history.past().is_empty());
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Undo/redo symmetry
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn undo_then_redo_is_identity(adds in 1usize..10, undos in 0usize..10) {
        let mut history = HistoryManager::new(16);
        for n in 0..adds {
            history.add(snapshot(n, 0, n as i64));
        }
        for _ in 0..undos {
            let before = history.current().map(|s| s.id.clone());
            if history.undo().is_some() {
                history.redo();
                prop_assert_eq!(history.current().map(|s| s.id.clone()), before);
                history.undo();
            }
        }
        prop_assert_eq!(history.len(), adds);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Compression monotonicity
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn compression_never_grows(
        name in prop_oneof![Just("time"), Just("size"), Just("significance"), Just("none")],
        values in proptest::collection::vec(0i64..4, 0..40),
        keep_every in 1usize..6,
    ) {
        let options = CompressionOptions::default()
            .with_min_snapshots(0)
            .with_keep_every(keep_every)
            .with_max_snapshots(3);
        let mut strategy = CompressionFactory::create(name, &options).unwrap();
        let history: Vec<Snapshot> = values
            .iter()
            .enumerate()
            .map(|(n, v)| snapshot(n, 0, *v))
            .collect();

        let kept = strategy.compress(&history);
        prop_assert!(kept.len() <= history.len());

        // Survivors keep their relative order.
        let positions: Vec<usize> = kept
            .iter()
            .map(|s| history.iter().position(|h| h.id == s.id).unwrap())
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));

        let meta = strategy.metadata().unwrap();
        prop_assert_eq!(meta.original_size, history.len());
        prop_assert_eq!(meta.compressed_size, kept.len());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Size-based admission
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn size_based_waits_for_max(max in 1usize..20, len in 0usize..40) {
        let options = CompressionOptions::default()
            .with_min_snapshots(0)
            .with_max_snapshots(max);
        let strategy = CompressionFactory::create("size-based", &options).unwrap();
        let history: Vec<Snapshot> = (0..len).map(|n| snapshot(n, 0, 0)).collect();
        prop_assert_eq!(strategy.should_compress(&history, len), len > max);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Store set/get
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn primitive_set_then_get(values in proptest::collection::vec(any::<i32>(), 1..20)) {
        let store = Store::new();
        let atom = Atom::primitive(0);
        for v in values {
            store.set(&atom, v).unwrap();
            prop_assert_eq!(store.get(&atom).unwrap(), Value::from(v));
        }
    }
}
