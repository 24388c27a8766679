//! Query pipeline for DocModel Rust.
//!
//! `docmodel-query` accumulates query state across chained calls and hands a
//! finished [`QueryDefinition`] to a [`QueryExecutor`] exactly once.
//!
//! # Example
//!
//! ```ignore
//! let people = session
//!     .query("Person")?
//!     .find_all(doc! { "name" => "Bob" })
//!     .sort(("name", 1))
//!     .limit(10)
//!     .fetch("children")
//!     .execute(&cx)
//!     .await;
//! ```
//!
//! # Execution rules
//!
//! - Exactly one operation (`find_all`, `count`, ...) per chain.
//! - `sort` and `fetch` append to what earlier calls set.
//! - An omitted criteria document matches everything, like `{}`.
//! - The first `execute` completes the chain; any later one fails with
//!   `UsageErrorKind::AlreadyExecuted` without reaching the executor.

pub mod builder;
pub mod completion;
pub mod definition;
pub mod kind;

pub use builder::{IntoFetchPaths, IntoSortSpec, Query};
pub use completion::Completion;
pub use definition::{EachIterator, QueryDefinition, QueryExecutor, QueryResult};
pub use kind::QueryKind;
