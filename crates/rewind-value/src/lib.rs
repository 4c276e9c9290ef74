#![forbid(unsafe_code)]

//! Values: the dynamic value model held by atoms, deep comparison, and the
//! cycle-safe snapshot serializer.

pub mod compare;
pub mod serialize;
pub mod value;

pub use compare::{DiffKind, ValueComparator, ValueDiff};
pub use serialize::{DecodeError, ID_TAG, REF_TAG, TYPE_TAG, ValueSerializer};
pub use value::{
    Accessor, ArrayRef, ErrorValue, FunctionValue, MapRef, ObjectRef, Properties, RegExp, SetRef,
    Value,
};
