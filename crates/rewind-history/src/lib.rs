#![forbid(unsafe_code)]

//! Time travel for Rewind stores.
//!
//! # Role in Rewind
//! This crate turns a live [`Store`](rewind_runtime::Store) into a sequence
//! of restorable [`Snapshot`]s:
//!
//! - [`SnapshotManager`] captures and encodes every atom of a store.
//! - [`HistoryManager`] keeps a bounded, linear undo/redo sequence and runs
//!   an optional [`CompressionStrategy`] over it.
//! - [`StateRestorer`] validates snapshots and writes primitives back.
//! - [`enhance_store`] wires all three to a store, with auto capture on
//!   every user write.
//!
//! # Example
//! ```
//! use rewind_history::{EnhancerOptions, enhance_store};
//! use rewind_runtime::{Atom, Store};
//! use rewind_value::Value;
//!
//! let store = enhance_store(Store::new(), EnhancerOptions::default()).unwrap();
//! let count = Atom::primitive(0).with_name("count");
//! store.set(&count, 1).unwrap();
//! store.set(&count, 2).unwrap();
//! assert!(store.undo());
//! assert_eq!(store.get(&count).unwrap(), Value::from(1));
//! ```

pub mod clock;
pub mod compression;
pub mod enhance;
pub mod error;
pub mod history;
pub mod restore;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use compression::{
    CompressionConfig, CompressionFactory, CompressionMetadata, CompressionOptions,
    CompressionStrategy, NoCompression, SignificanceStrategy, SizeBasedStrategy, StrategyBase,
    TimeBasedStrategy,
};
pub use enhance::{EnhancedStore, EnhancerOptions, HistoryExport, enhance_store};
pub use error::{AtomRestoreFailure, HistoryError, RestorationError, Result};
pub use history::{HistoryEvent, HistoryManager, HistoryOperation};
pub use restore::{RestoreReport, StateRestorer};
pub use snapshot::{
    SNAPSHOT_FORMAT_VERSION, Snapshot, SnapshotDelta, SnapshotEntry, SnapshotManager,
    SnapshotMetadata, SnapshotOptions,
};
