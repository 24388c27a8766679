//! In-memory document store for DocModel Rust.
//!
//! `docmodel-memory` implements the driver traits from `docmodel-core` over
//! plain vectors of documents. It evaluates a practical subset of query and
//! update operators and records index declarations, enforcing unique ones,
//! without building index structures. Sessions use it for tests and local
//! development exactly like a networked driver.
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new();
//! let people = store.collection("people");
//! let mut bulk = people.initialize_unordered_bulk_op();
//! bulk.insert(doc! { "_id" => 1, "name" => "Bob" });
//! bulk.execute(&cx).await;
//! ```

pub mod collection;
pub mod cursor;
pub mod filter;
pub mod update;

pub use collection::MemoryCollection;
pub use cursor::MemoryCursor;

use collection::{CollectionState, IdSource};
use docmodel_core::Store;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A set of named in-memory collections. Clones share the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    collections: Arc<Mutex<HashMap<String, Arc<Mutex<CollectionState>>>>>,
    ids: Arc<IdSource>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(Mutex::new(HashMap::new())),
            ids: Arc::new(IdSource::new()),
        }
    }

    /// Names of collections that have been opened, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let collections = self
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every collection.
    pub fn clear(&self) {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    type Collection = MemoryCollection;

    fn collection(&self, name: &str) -> MemoryCollection {
        let state = {
            let mut collections = self
                .collections
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(collections.entry(name.to_string()).or_default())
        };
        MemoryCollection::new(name, state, Arc::clone(&self.ids))
    }
}
