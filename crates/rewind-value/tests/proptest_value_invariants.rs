#![forbid(unsafe_code)]

//! Property-based invariant tests for the comparator and serializer.
//!
//! 1. Every value is deep-equal to itself.
//! 2. Acyclic values survive a serialize/deserialize round trip.
//! 3. Serialization is deterministic: equal inputs encode identically.
//! 4. `diff` is `None` exactly when `equal` holds for acyclic values.
//! 5. Decoding arbitrary JSON never panics.

use proptest::prelude::*;
use rewind_value::{Value, ValueComparator, ValueSerializer};
use serde_json::Value as Json;

// ── Strategies ──────────────────────────────────────────────────────────

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Undefined),
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<f64>().prop_map(Value::from),
        any::<i64>().prop_map(|n| Value::BigInt(i128::from(n))),
        "[a-z]{0,8}".prop_map(Value::from),
        (-8_000_000_000_000i64..8_000_000_000_000i64).prop_map(Value::date),
        ("[a-z.+*]{1,6}", "[gimsuy]{0,3}").prop_map(|(s, f)| Value::regexp(s, f)),
    ]
}

fn acyclic_value() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::array),
            proptest::collection::vec(("[a-z]{1,4}", inner.clone()), 0..6)
                .prop_map(|entries| Value::object(entries)),
            proptest::collection::vec(("[a-z]{1,4}", inner.clone()), 0..4).prop_map(|entries| {
                Value::map(entries.into_iter().map(|(k, v)| (Value::from(k), v)))
            }),
            proptest::collection::vec("[a-z]{1,4}", 0..4)
                .prop_map(|members| Value::set(members.into_iter().map(Value::from))),
        ]
    })
}

fn arbitrary_json() -> impl Strategy<Value = Json> {
    let leaf = prop_oneof![
        Just(Json::Null),
        any::<bool>().prop_map(Json::from),
        any::<i32>().prop_map(Json::from),
        prop_oneof![
            Just("__type".to_string()),
            Just("__ref".to_string()),
            Just("Array".to_string()),
            "[a-zA-Z]{0,6}",
        ]
        .prop_map(Json::from),
    ];
    leaf.prop_recursive(4, 32, 5, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..5).prop_map(Json::Array),
            proptest::collection::btree_map(
                prop_oneof![
                    Just("__type".to_string()),
                    Just("__id".to_string()),
                    Just("__ref".to_string()),
                    Just("items".to_string()),
                    "[a-z]{1,4}",
                ],
                inner,
                0..4
            )
            .prop_map(|m| Json::Object(m.into_iter().collect())),
        ]
    })
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Reflexivity
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn equal_is_reflexive(value in acyclic_value()) {
        prop_assert!(ValueComparator::new().equal(&value, &value));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Round trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn roundtrip_is_deep_equal(value in acyclic_value()) {
        let serializer = ValueSerializer::new();
        let encoded = serializer.serialize(&value);
        let decoded = serializer.deserialize(&encoded).expect("own output decodes");
        prop_assert!(
            ValueComparator::new().equal(&value, &decoded),
            "round trip changed value: {:?} -> {:?}", value, decoded
        );
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Determinism
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn encoding_is_deterministic(value in acyclic_value()) {
        let serializer = ValueSerializer::new();
        let once = serializer.serialize(&value);
        let decoded = serializer.deserialize(&once).expect("decodes");
        let twice = serializer.serialize(&decoded);
        prop_assert_eq!(once, twice);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. diff agrees with equal
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn diff_none_iff_equal(a in acyclic_value(), b in acyclic_value()) {
        let cmp = ValueComparator::new();
        prop_assert_eq!(cmp.diff(&a, &b).is_none(), cmp.equal(&a, &b));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Decoder robustness
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn decoding_arbitrary_json_never_panics(data in arbitrary_json()) {
        let _ = ValueSerializer::new().deserialize(&data);
    }
}
