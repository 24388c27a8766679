//! Core types and traits for DocModel Rust.
//!
//! This crate provides the foundational abstractions shared by every layer:
//!
//! - `Value` and `Document` for storage-side data
//! - `ObjectId` for 12-byte identifiers
//! - `Error` taxonomy (mapping, usage, store, conflict)
//! - `Store`, `Collection` and `Cursor` traits for document-store drivers
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod document;
pub mod error;
pub mod object_id;
pub mod store;
pub mod value;

pub use document::Document;
pub use error::{
    ConfigError, ConflictError, Error, MappingError, MappingIssue, Result, StoreError,
    StoreErrorKind, UsageError, UsageErrorKind,
};
pub use object_id::ObjectId;
pub use store::{
    BulkFind, BulkOperation, BulkWriteResult, Collection, Cursor, FindAndModifyOptions,
    IndexSpec, SortDirection, SortSpec, Store, UpdateOptions, UpdateResult, WriteError,
    WriteModel,
};
pub use value::Value;

/// Unwrap an `Outcome`, returning early from the enclosing async function on
/// anything but `Ok`.
///
/// `try_outcome!(result: expr)` does the same for a `Result`, lifting the
/// error into `Outcome::Err`.
#[macro_export]
macro_rules! try_outcome {
    (result: $e:expr) => {
        match $e {
            ::core::result::Result::Ok(v) => v,
            ::core::result::Result::Err(e) => {
                return $crate::Outcome::Err(::core::convert::Into::into(e));
            }
        }
    };
    ($e:expr) => {
        match $e {
            $crate::Outcome::Ok(v) => v,
            $crate::Outcome::Err(e) => return $crate::Outcome::Err(e),
            $crate::Outcome::Cancelled(r) => return $crate::Outcome::Cancelled(r),
            $crate::Outcome::Panicked(p) => return $crate::Outcome::Panicked(p),
        }
    };
}
