#![forbid(unsafe_code)]

//! Rewind public facade crate.
//!
//! Reactive atoms with a time-travel history. The crate re-exports the
//! stable surface of the workspace crates; `prelude` pulls in the types most
//! applications need.

pub use rewind_runtime as runtime;
pub use rewind_value as value;

#[cfg(feature = "history")]
pub use rewind_history as history;

pub mod prelude {
    pub use rewind_runtime::{
        Atom, AtomId, AtomKind, AtomRegistry, Getter, RegistryMode, SetOrigin, Store, StoreError,
        Subscription, WriteContext,
    };
    pub use rewind_value::{Value, ValueComparator, ValueSerializer};

    #[cfg(feature = "history")]
    pub use rewind_history::{
        CompressionConfig, EnhancedStore, EnhancerOptions, HistoryError, Snapshot, StateRestorer,
        enhance_store,
    };
}
