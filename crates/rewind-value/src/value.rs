#![forbid(unsafe_code)]

//! Dynamic values held by atoms.
//!
//! # Design
//!
//! [`Value`] is a closed enum over the categories the store knows how to
//! compare, serialize and restore. Scalars and descriptors are immutable;
//! containers ([`ArrayRef`], [`ObjectRef`], [`MapRef`], [`SetRef`]) are
//! shared handles around `Rc<RefCell<..>>`, so cloning a container clones
//! the handle and both clones observe the same contents. This is what makes
//! shared identity and cyclic graphs representable.
//!
//! # Invariants
//!
//! 1. Cloning a container never copies its contents.
//! 2. [`Value::is_same`] is the identity rule used for change detection:
//!    scalars by value (NaN is the same as NaN), containers and descriptors
//!    by handle.
//! 3. `==` on values is deep equality as defined by
//!    [`ValueComparator`](crate::ValueComparator).

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::compare::ValueComparator;

/// Insertion-ordered property table of an object.
pub type Properties = IndexMap<String, Value>;

/// Getter signature backing an [`Accessor`].
type AccessorFn = dyn Fn() -> Result<Value, String>;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    Bool(bool),
    /// IEEE-754 double; NaN and infinities are allowed.
    Number(f64),
    BigInt(i128),
    String(Rc<str>),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    RegExp(Rc<RegExp>),
    Error(Rc<ErrorValue>),
    Function(Rc<FunctionValue>),
    Array(ArrayRef),
    Object(ObjectRef),
    Map(MapRef),
    Set(SetRef),
    /// A lazily evaluated property whose evaluation may fail.
    Accessor(Accessor),
}

/// Regular expression descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegExp {
    pub source: String,
    pub flags: String,
}

/// Error descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

/// Function descriptor. Carries the name and source text only; it is not
/// callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionValue {
    pub name: String,
    pub source: String,
}

// ---------------------------------------------------------------------------
// Constructors and accessors
// ---------------------------------------------------------------------------

impl Value {
    /// Build an array from values.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Array(ArrayRef::new(items.into_iter().collect()))
    }

    /// Build an object from `(key, value)` pairs, preserving order.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Object(ObjectRef::from_entries(entries))
    }

    /// Build a map from `(key, value)` pairs. Later duplicates replace
    /// earlier ones.
    pub fn map(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let map = MapRef::default();
        for (k, v) in entries {
            map.insert(k, v);
        }
        Self::Map(map)
    }

    /// Build a set from members. Duplicates (by [`Value::is_same`]) are
    /// dropped.
    pub fn set(members: impl IntoIterator<Item = Value>) -> Self {
        let set = SetRef::default();
        for m in members {
            set.insert(m);
        }
        Self::Set(set)
    }

    #[must_use]
    pub fn date(epoch_ms: i64) -> Self {
        Self::Date(epoch_ms)
    }

    pub fn regexp(source: impl Into<String>, flags: impl Into<String>) -> Self {
        Self::RegExp(Rc::new(RegExp {
            source: source.into(),
            flags: flags.into(),
        }))
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(Rc::new(ErrorValue {
            name: name.into(),
            message: message.into(),
            stack: None,
        }))
    }

    pub fn function(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self::Function(Rc::new(FunctionValue {
            name: name.into(),
            source: source.into(),
        }))
    }

    /// Wrap a getter. The getter runs every time the value is read.
    pub fn accessor(getter: impl Fn() -> Result<Value, String> + 'static) -> Self {
        Self::Accessor(Accessor::new(getter))
    }

    /// Short category name, used in logs and diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::RegExp(_) => "regexp",
            Self::Error(_) => "error",
            Self::Function(_) => "function",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::Accessor(_) => "accessor",
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&MapRef> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_set(&self) -> Option<&SetRef> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Address of the shared allocation for container values.
    #[must_use]
    pub fn container_addr(&self) -> Option<usize> {
        match self {
            Self::Array(a) => Some(a.addr()),
            Self::Object(o) => Some(o.addr()),
            Self::Map(m) => Some(m.addr()),
            Self::Set(s) => Some(s.addr()),
            _ => None,
        }
    }

    /// Identity comparison (SameValueZero-like).
    #[must_use]
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::RegExp(a), Self::RegExp(b)) => Rc::ptr_eq(a, b),
            (Self::Error(a), Self::Error(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Map(a), Self::Map(b)) => a.ptr_eq(b),
            (Self::Set(a), Self::Set(b)) => a.ptr_eq(b),
            (Self::Accessor(a), Self::Accessor(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        ValueComparator::new().equal(self, other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Self::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(Rc::from(v))
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(ArrayRef::new(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Debug
// ---------------------------------------------------------------------------

/// Nesting shown by `Debug` before containers are elided. Keeps cyclic
/// values printable.
const DEBUG_DEPTH: usize = 4;

struct DebugValue<'a> {
    value: &'a Value,
    depth: usize,
}

impl DebugValue<'_> {
    fn child<'b>(&self, value: &'b Value) -> DebugValue<'b> {
        DebugValue {
            value,
            depth: self.depth + 1,
        }
    }
}

impl fmt::Debug for DebugValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elided = self.depth >= DEBUG_DEPTH;
        match self.value {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::BigInt(n) => write!(f, "{n}n"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Date(ms) => write!(f, "Date({ms})"),
            Value::RegExp(r) => write!(f, "/{}/{}", r.source, r.flags),
            Value::Error(e) => write!(f, "{}({:?})", e.name, e.message),
            Value::Function(func) => write!(f, "[Function {}]", func.name),
            Value::Accessor(_) => f.write_str("[Accessor]"),
            Value::Array(_) | Value::Object(_) | Value::Map(_) | Value::Set(_) if elided => {
                write!(f, "[{} …]", self.value.type_name())
            }
            Value::Array(a) => f
                .debug_list()
                .entries(a.to_vec().iter().map(|v| self.child(v)))
                .finish(),
            Value::Object(o) => {
                let entries = o.entries();
                let mut m = f.debug_map();
                for (k, v) in &entries {
                    m.entry(k, &self.child(v));
                }
                m.finish()
            }
            Value::Map(map) => {
                let entries = map.entries();
                f.write_str("Map")?;
                let mut m = f.debug_map();
                for (k, v) in &entries {
                    m.entry(&self.child(k), &self.child(v));
                }
                m.finish()
            }
            Value::Set(set) => {
                f.write_str("Set")?;
                f.debug_set()
                    .entries(set.values().iter().map(|v| self.child(v)))
                    .finish()
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DebugValue {
            value: self,
            depth: 0,
        }
        .fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

/// Shared, mutable array.
#[derive(Clone, Default)]
pub struct ArrayRef(Rc<RefCell<Vec<Value>>>);

impl ArrayRef {
    #[must_use]
    pub fn new(items: Vec<Value>) -> Self {
        Self(Rc::new(RefCell::new(items)))
    }

    pub fn borrow(&self) -> Ref<'_, Vec<Value>> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.0.borrow_mut()
    }

    /// Copy of the item handles. Used by traversals so no borrow is held
    /// across recursion.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().get(index).cloned()
    }

    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    /// Replace the item at `index`, growing with `Undefined` if needed.
    pub fn set(&self, index: usize, value: Value) {
        let mut items = self.0.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// Shared, mutable object with insertion-ordered string keys.
#[derive(Clone, Default)]
pub struct ObjectRef(Rc<RefCell<Properties>>);

impl ObjectRef {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let props: Properties = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self(Rc::new(RefCell::new(props)))
    }

    pub fn borrow(&self) -> Ref<'_, Properties> {
        self.0.borrow()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.borrow_mut().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().shift_remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Copy of the `(key, value)` handles in insertion order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// Shared map with arbitrary keys, insertion ordered. Keys are matched with
/// [`Value::is_same`].
#[derive(Clone, Default)]
pub struct MapRef(Rc<RefCell<Vec<(Value, Value)>>>);

impl MapRef {
    #[must_use]
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.0
            .borrow()
            .iter()
            .find(|(k, _)| k.is_same(key))
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&self, key: Value, value: Value) {
        let mut entries = self.0.borrow_mut();
        if let Some(slot) = entries.iter_mut().find(|(k, _)| k.is_same(&key)) {
            slot.1 = value;
        } else {
            entries.push((key, value));
        }
    }

    #[must_use]
    pub fn contains_key(&self, key: &Value) -> bool {
        self.0.borrow().iter().any(|(k, _)| k.is_same(key))
    }

    #[must_use]
    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.0.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// Shared set, insertion ordered. Membership uses [`Value::is_same`].
#[derive(Clone, Default)]
pub struct SetRef(Rc<RefCell<Vec<Value>>>);

impl SetRef {
    /// Insert a member. Returns `false` if it was already present.
    pub fn insert(&self, member: Value) -> bool {
        let mut members = self.0.borrow_mut();
        if members.iter().any(|m| m.is_same(&member)) {
            return false;
        }
        members.push(member);
        true
    }

    #[must_use]
    pub fn contains(&self, member: &Value) -> bool {
        self.0.borrow().iter().any(|m| m.is_same(member))
    }

    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// Lazily evaluated property.
#[derive(Clone)]
pub struct Accessor(Rc<AccessorFn>);

impl Accessor {
    pub fn new(getter: impl Fn() -> Result<Value, String> + 'static) -> Self {
        Self(Rc::new(getter))
    }

    /// Run the getter.
    ///
    /// # Errors
    ///
    /// Returns the getter's failure message.
    pub fn resolve(&self) -> Result<Value, String> {
        (self.0)()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
