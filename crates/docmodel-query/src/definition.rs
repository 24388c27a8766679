//! Finished query state and the executor seam.

use crate::kind::QueryKind;
use docmodel_core::{Cx, Document, Outcome, Result, SortSpec, Value};
use docmodel_mapping::{MappingId, ObjectRef};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;

/// Per-entity callback for `each` and `each_series`.
///
/// The next entity is handed over only after the previous future resolves
/// (`each_series`) or when a concurrency slot frees up (`each`). An `Err`
/// stops iteration.
pub struct EachIterator(Box<dyn FnMut(ObjectRef) -> BoxFuture<'static, Result<()>> + Send>);

impl EachIterator {
    pub fn new<F, Fut>(mut f: F) -> Self
    where
        F: FnMut(ObjectRef) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self(Box::new(move |entity| Box::pin(f(entity))))
    }

    pub fn call(&mut self, entity: ObjectRef) -> BoxFuture<'static, Result<()>> {
        (self.0)(entity)
    }
}

impl fmt::Debug for EachIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EachIterator")
    }
}

/// Everything an executor needs to run one query.
#[derive(Debug)]
pub struct QueryDefinition {
    /// Entity mapping the query targets
    pub mapping: MappingId,
    pub kind: Option<QueryKind>,
    /// Selection criteria; empty matches every document
    pub criteria: Document,
    pub update_document: Option<Document>,
    /// Identifier for `find_one_by_id`
    pub id: Option<Value>,
    /// Field for `distinct`
    pub distinct_key: Option<String>,
    pub sort_by: SortSpec,
    pub limit_count: Option<u64>,
    pub skip_count: Option<u64>,
    pub batch_size: Option<u32>,
    /// Property paths to fetch on every returned entity
    pub fetch_paths: Vec<String>,
    /// `find_one_and_update` returns the document after the update
    pub return_updated: bool,
    pub iterator: Option<EachIterator>,
}

impl QueryDefinition {
    pub fn new(mapping: MappingId) -> Self {
        Self {
            mapping,
            kind: None,
            criteria: Document::new(),
            update_document: None,
            id: None,
            distinct_key: None,
            sort_by: Vec::new(),
            limit_count: None,
            skip_count: None,
            batch_size: None,
            fetch_paths: Vec::new(),
            return_updated: false,
            iterator: None,
        }
    }

    /// Copy of the accumulated state with the iterator moved out.
    pub fn take_for_execution(&mut self) -> QueryDefinition {
        QueryDefinition {
            mapping: self.mapping,
            kind: self.kind,
            criteria: self.criteria.clone(),
            update_document: self.update_document.clone(),
            id: self.id.clone(),
            distinct_key: self.distinct_key.clone(),
            sort_by: self.sort_by.clone(),
            limit_count: self.limit_count,
            skip_count: self.skip_count,
            batch_size: self.batch_size,
            fetch_paths: self.fetch_paths.clone(),
            return_updated: self.return_updated,
            iterator: self.iterator.take(),
        }
    }
}

/// What a query produced, by kind.
#[derive(Debug)]
pub enum QueryResult {
    /// `find_all`
    Entities(Vec<ObjectRef>),
    /// `find_one`, `find_one_by_id`, `find_one_and_remove`, `find_one_and_update`
    Entity(Option<ObjectRef>),
    /// `distinct`
    Values(Vec<Value>),
    /// `count`, and the number of documents a remove or update touched
    Count(u64),
    /// `each`, `each_series`
    Done,
}

impl QueryResult {
    pub fn into_entities(self) -> Option<Vec<ObjectRef>> {
        match self {
            QueryResult::Entities(entities) => Some(entities),
            _ => None,
        }
    }

    pub fn into_entity(self) -> Option<ObjectRef> {
        match self {
            QueryResult::Entity(entity) => entity,
            _ => None,
        }
    }

    pub fn into_values(self) -> Option<Vec<Value>> {
        match self {
            QueryResult::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            QueryResult::Count(n) => Some(*n),
            _ => None,
        }
    }
}

/// Runs finished query definitions; implemented by the session.
pub trait QueryExecutor: Send {
    fn execute_query(
        &mut self,
        cx: &Cx,
        definition: QueryDefinition,
    ) -> impl Future<Output = Outcome<QueryResult, docmodel_core::Error>> + Send;
}
