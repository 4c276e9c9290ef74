#![forbid(unsafe_code)]

//! Atom handles.
//!
//! An [`Atom`] is a stable identity plus a behavior. Atoms hold no values
//! themselves: every [`Store`](crate::Store) keeps its own per-atom state
//! keyed by [`AtomId`], so the same atom can live in several stores at once.
//!
//! Behavior is a closed set:
//!
//! | Kind        | Read                      | Write                         |
//! |-------------|---------------------------|-------------------------------|
//! | `Primitive` | stored value (or initial) | replaces the stored value     |
//! | `Computed`  | `read(getter)`, memoized  | rejected                      |
//! | `Writable`  | `read(getter)`, memoized  | `write(ctx, value)`           |

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use rewind_value::Value;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{Getter, WriteContext};

static NEXT_ATOM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique atom identity, displayed as `atom<N>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AtomId(u64);

impl AtomId {
    fn next() -> Self {
        Self(NEXT_ATOM_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "atom{}", self.0)
    }
}

/// Error returned when a string is not of the form `atom<N>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAtomIdError(String);

impl fmt::Display for ParseAtomIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid atom id `{}`", self.0)
    }
}

impl std::error::Error for ParseAtomIdError {}

impl FromStr for AtomId {
    type Err = ParseAtomIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.strip_prefix("atom")
            .and_then(|digits| digits.parse::<u64>().ok())
            .map(Self)
            .ok_or_else(|| ParseAtomIdError(s.to_string()))
    }
}

/// Coarse classification recorded in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtomKind {
    Primitive,
    Computed,
    Writable,
}

impl AtomKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primitive => "primitive",
            Self::Computed => "computed",
            Self::Writable => "writable",
        }
    }

    /// Computed and writable atoms derive their value from a read function.
    #[must_use]
    pub const fn is_derived(self) -> bool {
        !matches!(self, Self::Primitive)
    }
}

impl fmt::Display for AtomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) type ReadFn = Rc<dyn Fn(&Getter<'_>) -> Result<Value>>;
pub(crate) type WriteFn = Rc<dyn Fn(&WriteContext<'_>, Value) -> Result<()>>;

pub(crate) enum AtomBehavior {
    Primitive { initial: Value },
    Computed { read: ReadFn },
    Writable { read: ReadFn, write: WriteFn },
}

struct AtomInner {
    id: AtomId,
    label: RefCell<Option<String>>,
    behavior: AtomBehavior,
}

/// A handle to an atom definition. Cloning shares the identity.
#[derive(Clone)]
pub struct Atom {
    inner: Rc<AtomInner>,
}

impl Atom {
    fn from_behavior(behavior: AtomBehavior) -> Self {
        Self {
            inner: Rc::new(AtomInner {
                id: AtomId::next(),
                label: RefCell::new(None),
                behavior,
            }),
        }
    }

    /// A value cell starting at `initial`.
    pub fn primitive(initial: impl Into<Value>) -> Self {
        Self::from_behavior(AtomBehavior::Primitive {
            initial: initial.into(),
        })
    }

    /// A read-only atom derived from other atoms.
    ///
    /// Every atom read through the [`Getter`] during evaluation becomes a
    /// dependency; the cached result is discarded when any of them changes.
    pub fn computed(read: impl Fn(&Getter<'_>) -> Result<Value> + 'static) -> Self {
        Self::from_behavior(AtomBehavior::Computed {
            read: Rc::new(read),
        })
    }

    /// A derived atom that also accepts writes, forwarded to `write`.
    pub fn writable(
        read: impl Fn(&Getter<'_>) -> Result<Value> + 'static,
        write: impl Fn(&WriteContext<'_>, Value) -> Result<()> + 'static,
    ) -> Self {
        Self::from_behavior(AtomBehavior::Writable {
            read: Rc::new(read),
            write: Rc::new(write),
        })
    }

    /// Attach a debug name. Shared by every clone of this handle.
    #[must_use]
    pub fn with_name(self, name: impl Into<String>) -> Self {
        *self.inner.label.borrow_mut() = Some(name.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> AtomId {
        self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> AtomKind {
        match self.inner.behavior {
            AtomBehavior::Primitive { .. } => AtomKind::Primitive,
            AtomBehavior::Computed { .. } => AtomKind::Computed,
            AtomBehavior::Writable { .. } => AtomKind::Writable,
        }
    }

    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.inner.label.borrow().clone()
    }

    /// The name if one was given, otherwise the id string.
    #[must_use]
    pub fn debug_label(&self) -> String {
        self.name().unwrap_or_else(|| self.id().to_string())
    }

    pub(crate) fn behavior(&self) -> &AtomBehavior {
        &self.inner.behavior
    }
}

impl PartialEq for Atom {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Atom {}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.inner.id)
            .field("kind", &self.kind())
            .field("name", &*self.inner.label.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_display_with_prefix() {
        let a = Atom::primitive(1);
        let b = Atom::primitive(1);
        assert_ne!(a.id(), b.id());
        assert!(a.id() < b.id());
        assert_eq!(a.id().to_string(), format!("atom{}", a.id().raw()));
    }

    #[test]
    fn id_parses_back() {
        let atom = Atom::primitive(0);
        let parsed: AtomId = atom.id().to_string().parse().unwrap();
        assert_eq!(parsed, atom.id());
        assert!("atomx".parse::<AtomId>().is_err());
        assert!("7".parse::<AtomId>().is_err());
    }

    #[test]
    fn clones_share_identity_and_name() {
        let atom = Atom::primitive(0);
        let clone = atom.clone();
        let named = atom.with_name("count");
        assert_eq!(named, clone);
        assert_eq!(clone.name().as_deref(), Some("count"));
        assert_eq!(clone.debug_label(), "count");
    }

    #[test]
    fn kinds() {
        assert_eq!(Atom::primitive(0).kind(), AtomKind::Primitive);
        let computed = Atom::computed(|_| Ok(Value::Null));
        assert_eq!(computed.kind(), AtomKind::Computed);
        assert!(computed.kind().is_derived());
        let writable = Atom::writable(|_| Ok(Value::Null), |_, _| Ok(()));
        assert_eq!(writable.kind().as_str(), "writable");
    }

    #[test]
    fn unnamed_label_falls_back_to_id() {
        let atom = Atom::primitive(0);
        assert_eq!(atom.debug_label(), atom.id().to_string());
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&AtomKind::Computed).unwrap();
        assert_eq!(json, "\"computed\"");
    }
}
