//! Document store driver traits.
//!
//! This module defines the boundary between the mapper and a concrete
//! document-store driver:
//!
//! - [`Store`] - Hands out collection handles by name
//! - [`Collection`] - Queries, single writes and bulk writes against one collection
//! - [`Cursor`] - Lazily evaluated result set with chainable modifiers
//! - [`BulkOperation`] - Unordered bulk-write builder
//!
//! All I/O integrates with asupersync's structured concurrency via `Cx`.

use crate::document::Document;
use crate::error::Error;
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// Sort direction for cursor ordering and index keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// Numeric form used in sort and index documents (1 / -1).
    pub const fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

impl From<i32> for SortDirection {
    fn from(v: i32) -> Self {
        if v < 0 {
            SortDirection::Descending
        } else {
            SortDirection::Ascending
        }
    }
}

/// Ordered sort specification: `[(field, direction), ...]`.
pub type SortSpec = Vec<(String, SortDirection)>;

/// Options for [`Collection::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Update every matching document instead of the first
    pub multi: bool,
    /// Insert when nothing matches
    pub upsert: bool,
}

/// Result of [`Collection::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Value>,
}

/// Options for [`Collection::find_and_modify`].
#[derive(Debug, Clone, Default)]
pub struct FindAndModifyOptions {
    /// Which document to pick when several match
    pub sort: SortSpec,
    /// Remove the matched document
    pub remove: bool,
    /// Update document (operators or replacement)
    pub update: Option<Document>,
    /// Return the document after modification instead of before
    pub new: bool,
    pub upsert: bool,
}

/// An index declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub keys: SortSpec,
    pub name: Option<String>,
    pub unique: bool,
    pub sparse: bool,
}

impl IndexSpec {
    pub fn new(keys: SortSpec) -> Self {
        Self {
            keys,
            name: None,
            unique: false,
            sparse: false,
        }
    }

    /// The explicit name, or the conventional `field_1_other_-1` form.
    pub fn effective_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.keys
                .iter()
                .map(|(field, dir)| format!("{}_{}", field, dir.as_i32()))
                .collect::<Vec<_>>()
                .join("_")
        })
    }
}

/// One operation inside a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    UpdateMany {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    ReplaceOne {
        filter: Document,
        replacement: Document,
        upsert: bool,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

/// A per-operation failure inside a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Index of the failing operation in the submitted list
    pub index: usize,
    pub message: String,
}

/// Aggregate counts reported by a bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub removed: u64,
    pub upserted: u64,
    pub write_errors: Vec<WriteError>,
}

impl BulkWriteResult {
    pub fn has_write_errors(&self) -> bool {
        !self.write_errors.is_empty()
    }
}

/// A document store: a namespace of collections.
pub trait Store: Send + Sync {
    /// The collection handle type produced by this store.
    type Collection: Collection;

    /// Get a handle to the named collection. Creating a handle never does I/O.
    fn collection(&self, name: &str) -> Self::Collection;
}

/// A handle to one collection.
///
/// Handles are cheap to clone and may be shared freely.
pub trait Collection: Clone + Send + Sync + 'static {
    /// The cursor type returned by [`find`](Collection::find).
    type Cursor: Cursor;

    /// The collection name.
    fn name(&self) -> &str;

    /// Open a cursor over documents matching `criteria`. No I/O happens until
    /// the cursor is read.
    fn find(&self, criteria: Document) -> Self::Cursor;

    /// Atomically find one document and update or remove it.
    fn find_and_modify(
        &self,
        cx: &Cx,
        criteria: Document,
        options: FindAndModifyOptions,
    ) -> impl Future<Output = Outcome<Option<Document>, Error>> + Send;

    /// Remove matching documents (only the first when `single`), returning
    /// the number removed.
    fn remove(
        &self,
        cx: &Cx,
        criteria: Document,
        single: bool,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Apply `update` to matching documents.
    fn update(
        &self,
        cx: &Cx,
        criteria: Document,
        update: Document,
        options: UpdateOptions,
    ) -> impl Future<Output = Outcome<UpdateResult, Error>> + Send;

    /// Count matching documents.
    fn count(
        &self,
        cx: &Cx,
        criteria: Document,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Distinct values of `key` across matching documents.
    fn distinct(
        &self,
        cx: &Cx,
        key: &str,
        criteria: Document,
    ) -> impl Future<Output = Outcome<Vec<Value>, Error>> + Send;

    /// Execute an unordered list of write operations.
    fn bulk_write(
        &self,
        cx: &Cx,
        operations: Vec<WriteModel>,
    ) -> impl Future<Output = Outcome<BulkWriteResult, Error>> + Send;

    /// Declare an index, returning its name.
    fn create_index(
        &self,
        cx: &Cx,
        index: IndexSpec,
    ) -> impl Future<Output = Outcome<String, Error>> + Send;

    /// Start an unordered bulk operation against this collection.
    fn initialize_unordered_bulk_op(&self) -> BulkOperation<Self> {
        BulkOperation::new(self.clone())
    }
}

/// A lazily evaluated result set.
///
/// Modifiers only take effect before the first document is read.
pub trait Cursor: Send {
    fn filter(&mut self, criteria: Document) -> &mut Self;
    fn sort(&mut self, sort: SortSpec) -> &mut Self;
    fn limit(&mut self, limit: u64) -> &mut Self;
    fn skip(&mut self, skip: u64) -> &mut Self;
    fn batch_size(&mut self, size: u32) -> &mut Self;

    /// Fetch the next document, or `None` when exhausted.
    fn next(&mut self, cx: &Cx) -> impl Future<Output = Outcome<Option<Document>, Error>> + Send;

    /// Drain the remaining documents.
    fn to_array(&mut self, cx: &Cx) -> impl Future<Output = Outcome<Vec<Document>, Error>> + Send;

    /// Number of documents matching the filter, ignoring skip and limit.
    fn count(&mut self, cx: &Cx) -> impl Future<Output = Outcome<u64, Error>> + Send;

    fn close(&mut self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    fn is_closed(&self) -> bool;
}

// ============================================================================
// Bulk builder
// ============================================================================

/// Unordered bulk-write builder.
///
/// ```rust,ignore
/// let mut bulk = collection.initialize_unordered_bulk_op();
/// bulk.insert(doc! { "_id" => 1 });
/// bulk.find(doc! { "_id" => 2 }).upsert().replace_one(doc! { "_id" => 2, "n" => 1 });
/// bulk.find(doc! { "_id" => 3 }).remove_one();
/// let result = bulk.execute(&cx).await;
/// ```
#[derive(Debug)]
pub struct BulkOperation<C> {
    collection: C,
    operations: Vec<WriteModel>,
}

/// Selector-scoped half of a bulk operation; returned by [`BulkOperation::find`].
#[derive(Debug)]
pub struct BulkFind<'a, C> {
    bulk: &'a mut BulkOperation<C>,
    selector: Document,
    upsert: bool,
}

impl<C: Collection> BulkOperation<C> {
    pub fn new(collection: C) -> Self {
        Self {
            collection,
            operations: Vec::new(),
        }
    }

    pub fn insert(&mut self, document: Document) -> &mut Self {
        self.operations.push(WriteModel::InsertOne { document });
        self
    }

    /// Scope the next write to documents matching `selector`.
    pub fn find(&mut self, selector: Document) -> BulkFind<'_, C> {
        BulkFind {
            bulk: self,
            selector,
            upsert: false,
        }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[WriteModel] {
        &self.operations
    }

    /// Submit every queued operation as one bulk write.
    pub async fn execute(self, cx: &Cx) -> Outcome<BulkWriteResult, Error> {
        if self.operations.is_empty() {
            return Outcome::Ok(BulkWriteResult::default());
        }
        tracing::trace!(
            collection = self.collection.name(),
            operations = self.operations.len(),
            "Executing unordered bulk operation"
        );
        self.collection.bulk_write(cx, self.operations).await
    }
}

impl<C> BulkFind<'_, C> {
    /// Insert when the selector matches nothing.
    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    pub fn update(self, update: Document) {
        self.bulk.operations.push(WriteModel::UpdateMany {
            filter: self.selector,
            update,
            upsert: self.upsert,
        });
    }

    pub fn update_one(self, update: Document) {
        self.bulk.operations.push(WriteModel::UpdateOne {
            filter: self.selector,
            update,
            upsert: self.upsert,
        });
    }

    pub fn replace_one(self, replacement: Document) {
        self.bulk.operations.push(WriteModel::ReplaceOne {
            filter: self.selector,
            replacement,
            upsert: self.upsert,
        });
    }

    pub fn remove(self) {
        self.bulk.operations.push(WriteModel::DeleteMany {
            filter: self.selector,
        });
    }

    pub fn remove_one(self) {
        self.bulk.operations.push(WriteModel::DeleteOne {
            filter: self.selector,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_direction_from_numbers() {
        assert_eq!(SortDirection::from(1), SortDirection::Ascending);
        assert_eq!(SortDirection::from(-1), SortDirection::Descending);
        assert_eq!(SortDirection::Descending.as_i32(), -1);
    }

    #[test]
    fn index_default_name() {
        let spec = IndexSpec::new(vec![
            ("name".to_string(), SortDirection::Ascending),
            ("age".to_string(), SortDirection::Descending),
        ]);
        assert_eq!(spec.effective_name(), "name_1_age_-1");
    }
}
