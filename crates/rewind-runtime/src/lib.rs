#![forbid(unsafe_code)]

//! Atoms and the dependency-tracking store.
//!
//! # Role in Rewind
//! `rewind-runtime` owns the live state: [`Atom`] definitions, the
//! [`AtomRegistry`] that names them, and the [`Store`] that evaluates,
//! caches and invalidates their values. The history layer in
//! `rewind-history` observes a store through [`Store::on_set`] and writes
//! snapshots back through [`Store::restore_value`].
//!
//! # Example
//! ```
//! use rewind_runtime::{Atom, Store};
//! use rewind_value::Value;
//!
//! let store = Store::new();
//! let count = Atom::primitive(1).with_name("count");
//! let c = count.clone();
//! let doubled = Atom::computed(move |get| {
//!     let n = get.get(&c)?.as_f64().unwrap_or_default();
//!     Ok(Value::from(n * 2.0))
//! });
//!
//! store.set(&count, 21).unwrap();
//! assert_eq!(store.get(&doubled).unwrap(), Value::from(42));
//! ```

pub mod atom;
pub mod error;
pub mod registry;
pub mod store;
pub mod subscription;

pub use atom::{Atom, AtomId, AtomKind, ParseAtomIdError};
pub use error::{Result, StoreError};
pub use registry::{AtomRegistry, RegistryMode, StoreId};
pub use store::{Getter, SetOrigin, Store, WriteContext};
pub use subscription::Subscription;
