#![forbid(unsafe_code)]

//! Deep equality and structural diff over [`Value`]s.
//!
//! # Invariants
//!
//! 1. `equal(a, a)` holds for every value, including NaN and cyclic graphs.
//! 2. A container pair revisited while its own comparison is still open
//!    counts as equal, so cyclic structures terminate. Finished pairs are
//!    compared afresh.
//! 3. Beyond `max_depth` nesting levels, values are assumed equal.
//! 4. `diff(a, b)` is `None` exactly when `equal(a, b)` holds, except where a
//!    cycle is revisited on one side only (reported as
//!    [`ValueDiff::Circular`]).

use std::collections::BTreeMap;
use std::rc::Rc;

use ahash::AHashSet;

use crate::value::{MapRef, ObjectRef, SetRef, Value};

/// Default nesting bound for comparisons.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Deep-equality and diff engine.
#[derive(Debug, Clone, Copy)]
pub struct ValueComparator {
    max_depth: usize,
}

impl Default for ValueComparator {
    fn default() -> Self {
        Self::new()
    }
}

/// Category of a [`ValueDiff`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Primitive,
    Object,
    Array,
    Function,
    Circular,
}

/// Typed description of how two values differ.
#[derive(Debug, Clone)]
pub enum ValueDiff {
    /// Whole-value replacement (scalars, descriptors, maps, sets, or a change
    /// of category). Added and removed keys use `Undefined` on the missing
    /// side.
    Primitive { before: Value, after: Value },
    /// Per-key changes, in key order of `before` followed by keys new in
    /// `after`.
    Object { changes: Vec<(String, ValueDiff)> },
    /// Per-index changes.
    Array {
        changes: Vec<(usize, ValueDiff)>,
        before_len: usize,
        after_len: usize,
    },
    Function { before: Value, after: Value },
    /// One side revisits a container already seen in this diff while the
    /// other does not.
    Circular,
}

impl ValueDiff {
    #[must_use]
    pub fn kind(&self) -> DiffKind {
        match self {
            Self::Primitive { .. } => DiffKind::Primitive,
            Self::Object { .. } => DiffKind::Object,
            Self::Array { .. } => DiffKind::Array,
            Self::Function { .. } => DiffKind::Function,
            Self::Circular => DiffKind::Circular,
        }
    }

    /// Flattened paths of every leaf change, e.g. `user.tags[2]`. The root
    /// itself is reported as the empty path.
    #[must_use]
    pub fn changed_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths(String::new(), &mut out);
        out
    }

    fn collect_paths(&self, prefix: String, out: &mut Vec<String>) {
        match self {
            Self::Object { changes } => {
                for (key, child) in changes {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}.{key}")
                    };
                    child.collect_paths(path, out);
                }
            }
            Self::Array { changes, .. } => {
                for (index, child) in changes {
                    child.collect_paths(format!("{prefix}[{index}]"), out);
                }
            }
            Self::Primitive { .. } | Self::Function { .. } | Self::Circular => out.push(prefix),
        }
    }
}

/// Container pairs whose comparison is in progress.
type Visited = AHashSet<(usize, usize)>;

/// Bookkeeping for one `diff` call.
#[derive(Default)]
struct DiffState {
    pairs: Visited,
    seen_before: AHashSet<usize>,
    seen_after: AHashSet<usize>,
}

impl DiffState {
    /// `Some(true)` if the pair was already compared, `Some(false)` if only
    /// one side was seen before, `None` if both are new (and now recorded).
    fn enter(&mut self, a: usize, b: usize) -> Option<bool> {
        if self.pairs.contains(&(a, b)) {
            return Some(true);
        }
        if self.seen_before.contains(&a) || self.seen_after.contains(&b) {
            return Some(false);
        }
        self.pairs.insert((a, b));
        self.seen_before.insert(a);
        self.seen_after.insert(b);
        None
    }
}

impl ValueComparator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    #[must_use]
    pub const fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Deep equality.
    #[must_use]
    pub fn equal(&self, a: &Value, b: &Value) -> bool {
        let mut visited = Visited::default();
        self.equal_at(a, b, 0, &mut visited)
    }

    fn equal_at(&self, a: &Value, b: &Value, depth: usize, visited: &mut Visited) -> bool {
        if depth > self.max_depth {
            return true;
        }
        match (a, b) {
            (Value::Accessor(x), Value::Accessor(y)) if x.ptr_eq(y) => true,
            (Value::Accessor(x), _) => match x.resolve() {
                Ok(resolved) => self.equal_at(&resolved, b, depth, visited),
                Err(_) => false,
            },
            (_, Value::Accessor(y)) => match y.resolve() {
                Ok(resolved) => self.equal_at(a, &resolved, depth, visited),
                Err(_) => false,
            },
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
            (Value::BigInt(x), Value::BigInt(y)) => x == y,
            (Value::String(x), Value::String(y)) => x == y,
            (Value::Date(x), Value::Date(y)) => x == y,
            (Value::RegExp(x), Value::RegExp(y)) => Rc::ptr_eq(x, y) || x == y,
            (Value::Error(x), Value::Error(y)) => {
                Rc::ptr_eq(x, y) || (x.name == y.name && x.message == y.message)
            }
            (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y) || x == y,
            (Value::Array(x), Value::Array(y)) => {
                x.ptr_eq(y)
                    || self.open_pair((x.addr(), y.addr()), visited, |visited| {
                        let (xs, ys) = (x.to_vec(), y.to_vec());
                        xs.len() == ys.len()
                            && xs
                                .iter()
                                .zip(&ys)
                                .all(|(l, r)| self.equal_at(l, r, depth + 1, visited))
                    })
            }
            (Value::Object(x), Value::Object(y)) => {
                x.ptr_eq(y)
                    || self.open_pair((x.addr(), y.addr()), visited, |visited| {
                        self.objects_equal(x, y, depth, visited)
                    })
            }
            (Value::Map(x), Value::Map(y)) => {
                x.ptr_eq(y)
                    || self.open_pair((x.addr(), y.addr()), visited, |visited| {
                        self.maps_equal(x, y, depth, visited)
                    })
            }
            (Value::Set(x), Value::Set(y)) => {
                x.ptr_eq(y)
                    || self.open_pair((x.addr(), y.addr()), visited, |visited| {
                        self.sets_equal(x, y, depth, visited)
                    })
            }
            _ => false,
        }
    }

    /// Compares a container pair. A pair still open further up the stack
    /// counts as equal; the pair is closed again when `compare` returns.
    fn open_pair(
        &self,
        pair: (usize, usize),
        visited: &mut Visited,
        compare: impl FnOnce(&mut Visited) -> bool,
    ) -> bool {
        if !visited.insert(pair) {
            return true;
        }
        let equal = compare(visited);
        visited.remove(&pair);
        equal
    }

    fn objects_equal(&self, x: &ObjectRef, y: &ObjectRef, depth: usize, visited: &mut Visited) -> bool {
        let (xs, ys) = (x.entries(), y.entries());
        if xs.len() != ys.len() {
            return false;
        }
        xs.iter().all(|(key, l)| match y.get(key) {
            Some(r) => self.equal_at(l, &r, depth + 1, visited),
            None => false,
        })
    }

    fn maps_equal(&self, x: &MapRef, y: &MapRef, depth: usize, visited: &mut Visited) -> bool {
        let (xs, ys) = (x.entries(), y.entries());
        if xs.len() != ys.len() {
            return false;
        }
        xs.iter().all(|(key, l)| {
            let counterpart = ys
                .iter()
                .find(|(k, _)| k.is_same(key))
                .or_else(|| ys.iter().find(|(k, _)| self.equal_at(key, k, depth + 1, visited)));
            match counterpart {
                Some((_, r)) => self.equal_at(l, r, depth + 1, visited),
                None => false,
            }
        })
    }

    fn sets_equal(&self, x: &SetRef, y: &SetRef, depth: usize, visited: &mut Visited) -> bool {
        let (xs, ys) = (x.values(), y.values());
        if xs.len() != ys.len() {
            return false;
        }
        xs.iter().all(|member| {
            ys.iter().any(|m| m.is_same(member))
                || ys.iter().any(|m| self.equal_at(member, m, depth + 1, visited))
        })
    }

    /// Structural diff. `None` means no difference was found.
    #[must_use]
    pub fn diff(&self, a: &Value, b: &Value) -> Option<ValueDiff> {
        let mut state = DiffState::default();
        self.diff_at(a, b, 0, &mut state)
    }

    fn diff_at(&self, a: &Value, b: &Value, depth: usize, state: &mut DiffState) -> Option<ValueDiff> {
        if depth > self.max_depth {
            return None;
        }
        let replaced = || ValueDiff::Primitive {
            before: a.clone(),
            after: b.clone(),
        };
        match (a, b) {
            (Value::Accessor(x), Value::Accessor(y)) if x.ptr_eq(y) => None,
            (Value::Accessor(x), _) => match x.resolve() {
                Ok(resolved) => self.diff_at(&resolved, b, depth, state),
                Err(_) => Some(replaced()),
            },
            (_, Value::Accessor(y)) => match y.resolve() {
                Ok(resolved) => self.diff_at(a, &resolved, depth, state),
                Err(_) => Some(replaced()),
            },
            (Value::Array(x), Value::Array(y)) => {
                if x.ptr_eq(y) {
                    return None;
                }
                match state.enter(x.addr(), y.addr()) {
                    Some(true) => return None,
                    Some(false) => return Some(ValueDiff::Circular),
                    None => {}
                }
                let (xs, ys) = (x.to_vec(), y.to_vec());
                let mut changes = Vec::new();
                for index in 0..xs.len().max(ys.len()) {
                    let l = xs.get(index).cloned().unwrap_or_default();
                    let r = ys.get(index).cloned().unwrap_or_default();
                    if let Some(child) = self.diff_at(&l, &r, depth + 1, state) {
                        changes.push((index, child));
                    }
                }
                if changes.is_empty() && xs.len() == ys.len() {
                    None
                } else {
                    Some(ValueDiff::Array {
                        changes,
                        before_len: xs.len(),
                        after_len: ys.len(),
                    })
                }
            }
            (Value::Object(x), Value::Object(y)) => {
                if x.ptr_eq(y) {
                    return None;
                }
                match state.enter(x.addr(), y.addr()) {
                    Some(true) => return None,
                    Some(false) => return Some(ValueDiff::Circular),
                    None => {}
                }
                let mut keys = x.keys();
                keys.extend(y.keys().into_iter().filter(|k| !x.contains_key(k)));
                let mut changes = Vec::new();
                for key in keys {
                    let l = x.get(&key).unwrap_or_default();
                    let r = y.get(&key).unwrap_or_default();
                    let missing = !x.contains_key(&key) || !y.contains_key(&key);
                    if missing {
                        changes.push((key, ValueDiff::Primitive { before: l, after: r }));
                    } else if let Some(child) = self.diff_at(&l, &r, depth + 1, state) {
                        changes.push((key, child));
                    }
                }
                (!changes.is_empty()).then_some(ValueDiff::Object { changes })
            }
            (Value::Function(_), Value::Function(_)) => {
                (!self.equal(a, b)).then(|| ValueDiff::Function {
                    before: a.clone(),
                    after: b.clone(),
                })
            }
            _ => {
                let mut visited = Visited::default();
                (!self.equal_at(a, b, depth, &mut visited)).then(replaced)
            }
        }
    }

    /// Fraction of keys whose values differ between two keyed states, over
    /// the union of their keys. Missing keys count as changed. Two empty
    /// states have ratio `0.0`.
    #[must_use]
    pub fn changed_key_ratio(
        &self,
        before: &BTreeMap<String, Value>,
        after: &BTreeMap<String, Value>,
    ) -> f64 {
        let keys: AHashSet<&String> = before.keys().chain(after.keys()).collect();
        if keys.is_empty() {
            return 0.0;
        }
        let changed = keys
            .iter()
            .filter(|key| match (before.get(**key), after.get(**key)) {
                (Some(l), Some(r)) => !self.equal(l, r),
                _ => true,
            })
            .count();
        changed as f64 / keys.len() as f64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectRef;

    fn cmp() -> ValueComparator {
        ValueComparator::new()
    }

    #[test]
    fn nan_equals_nan() {
        assert!(cmp().equal(&Value::from(f64::NAN), &Value::from(f64::NAN)));
        assert!(!cmp().equal(&Value::from(1.0), &Value::from(f64::NAN)));
    }

    #[test]
    fn nested_structures() {
        let a = Value::object([
            ("name", Value::from("x")),
            ("tags", Value::array([Value::from(1), Value::from(2)])),
        ]);
        let b = Value::object([
            ("tags", Value::array([Value::from(1), Value::from(2)])),
            ("name", Value::from("x")),
        ]);
        assert!(cmp().equal(&a, &b));

        let c = Value::object([
            ("name", Value::from("x")),
            ("tags", Value::array([Value::from(1), Value::from(3)])),
        ]);
        assert!(!cmp().equal(&a, &c));
    }

    #[test]
    fn dates_regexps_maps_sets() {
        assert!(cmp().equal(&Value::date(5), &Value::date(5)));
        assert!(!cmp().equal(&Value::date(5), &Value::date(6)));
        assert!(cmp().equal(&Value::regexp("a+", "g"), &Value::regexp("a+", "g")));
        assert!(!cmp().equal(&Value::regexp("a+", "g"), &Value::regexp("a+", "i")));

        let m1 = Value::map([(Value::from("k"), Value::array([Value::from(1)]))]);
        let m2 = Value::map([(Value::from("k"), Value::array([Value::from(1)]))]);
        assert!(cmp().equal(&m1, &m2));

        let s1 = Value::set([Value::object([("a", Value::from(1))])]);
        let s2 = Value::set([Value::object([("a", Value::from(1))])]);
        let s3 = Value::set([Value::object([("a", Value::from(2))])]);
        assert!(cmp().equal(&s1, &s2));
        assert!(!cmp().equal(&s1, &s3));
    }

    #[test]
    fn category_mismatch_is_unequal() {
        assert!(!cmp().equal(&Value::from(1), &Value::from("1")));
        assert!(!cmp().equal(&Value::Null, &Value::Undefined));
        assert!(!cmp().equal(&Value::array([]), &Value::Object(ObjectRef::new())));
    }

    #[test]
    fn cyclic_structures_terminate() {
        let a = ObjectRef::new();
        a.insert("me", Value::Object(a.clone()));
        let b = ObjectRef::new();
        b.insert("me", Value::Object(b.clone()));
        assert!(cmp().equal(&Value::Object(a), &Value::Object(b)));
    }

    #[test]
    fn failed_set_match_does_not_leak_into_later_comparisons() {
        let obj = |v: i32| Value::object([("v", Value::from(v))]);
        let (a, a2) = (obj(1), obj(2));
        let (c, c2) = (obj(2), obj(1));
        let x = Value::array([Value::set([a.clone(), a2]), a]);
        let y = Value::array([Value::set([c.clone(), c2]), c]);
        // The set members match crosswise, but x[1] = {v:1} and y[1] = {v:2}.
        assert!(!cmp().equal(&x, &y));
        assert!(cmp().diff(&x, &y).is_some());
    }

    #[test]
    fn failed_map_key_match_does_not_leak() {
        let key = |v: i32| Value::object([("k", Value::from(v))]);
        let (k1, k2) = (key(1), key(2));
        let (j2, j1) = (key(2), key(1));
        let x = Value::array([
            Value::map([(k1.clone(), Value::from("a")), (k2, Value::from("b"))]),
            k1,
        ]);
        let y = Value::array([
            Value::map([(j2.clone(), Value::from("b")), (j1, Value::from("a"))]),
            j2,
        ]);
        assert!(!cmp().equal(&x, &y));
    }

    #[test]
    fn depth_limit_assumes_equal() {
        let deep = |leaf: i32| {
            let mut v = Value::from(leaf);
            for _ in 0..10 {
                v = Value::array([v]);
            }
            v
        };
        assert!(!ValueComparator::new().equal(&deep(1), &deep(2)));
        assert!(ValueComparator::with_max_depth(3).equal(&deep(1), &deep(2)));
    }

    #[test]
    fn failing_accessor_is_unequal() {
        let bad = Value::accessor(|| Err("boom".into()));
        assert!(!cmp().equal(&bad, &Value::from(1)));
        let good = Value::accessor(|| Ok(Value::from(1)));
        assert!(cmp().equal(&good, &Value::from(1)));
    }

    #[test]
    fn diff_reports_changed_keys() {
        let a = Value::object([
            ("keep", Value::from(1)),
            ("change", Value::from(2)),
            ("drop", Value::from(3)),
        ]);
        let b = Value::object([
            ("keep", Value::from(1)),
            ("change", Value::from(20)),
            ("add", Value::from(4)),
        ]);
        let diff = cmp().diff(&a, &b).expect("values differ");
        assert_eq!(diff.kind(), DiffKind::Object);
        assert_eq!(diff.changed_paths(), vec!["change", "drop", "add"]);
    }

    #[test]
    fn diff_array_indices_and_lengths() {
        let a = Value::array([Value::from(1), Value::from(2)]);
        let b = Value::array([Value::from(1), Value::from(5), Value::from(6)]);
        let Some(ValueDiff::Array {
            changes,
            before_len,
            after_len,
        }) = cmp().diff(&a, &b)
        else {
            panic!("expected array diff");
        };
        assert_eq!((before_len, after_len), (2, 3));
        let indices: Vec<usize> = changes.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn diff_equal_is_none() {
        let a = Value::object([("x", Value::array([Value::date(1)]))]);
        let b = Value::object([("x", Value::array([Value::date(1)]))]);
        assert!(cmp().diff(&a, &b).is_none());
    }

    #[test]
    fn diff_function_kind() {
        let d = cmp()
            .diff(&Value::function("f", "() => 1"), &Value::function("f", "() => 2"))
            .expect("differ");
        assert_eq!(d.kind(), DiffKind::Function);
    }

    #[test]
    fn diff_one_sided_cycle_is_circular() {
        let cyclic = ObjectRef::new();
        cyclic.insert("next", Value::Object(cyclic.clone()));

        let leaf = ObjectRef::new();
        let chain = ObjectRef::new();
        chain.insert("next", Value::Object(leaf));
        // Second level on the right is a fresh object, on the left it is the
        // root again.
        let d = cmp()
            .diff(&Value::Object(cyclic), &Value::Object(chain))
            .expect("differ");
        assert!(
            d.changed_paths().iter().any(|p| p == "next"),
            "unexpected diff: {d:?}"
        );
    }

    #[test]
    fn changed_key_ratio_counts_union() {
        let before: BTreeMap<String, Value> = [("a", 1), ("b", 2)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::from(v)))
            .collect();
        let after: BTreeMap<String, Value> = [("a", 1), ("b", 3), ("c", 4)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), Value::from(v)))
            .collect();
        let ratio = cmp().changed_key_ratio(&before, &after);
        assert!((ratio - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(cmp().changed_key_ratio(&BTreeMap::new(), &BTreeMap::new()), 0.0);
    }
}
