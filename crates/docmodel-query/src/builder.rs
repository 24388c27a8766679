//! Fluent query chains.

use crate::completion::Completion;
use crate::definition::{EachIterator, QueryDefinition, QueryExecutor, QueryResult};
use crate::kind::QueryKind;
use docmodel_core::{Cx, Document, Error, Outcome, SortDirection, SortSpec, UsageErrorKind, Value};
use docmodel_mapping::MappingId;

/// Values accepted by [`Query::sort`]: one `(field, direction)` pair or a
/// batch of them.
pub trait IntoSortSpec {
    fn into_sort_spec(self) -> SortSpec;
}

impl<S, D> IntoSortSpec for (S, D)
where
    S: Into<String>,
    D: Into<SortDirection>,
{
    fn into_sort_spec(self) -> SortSpec {
        vec![(self.0.into(), self.1.into())]
    }
}

impl<S, D> IntoSortSpec for Vec<(S, D)>
where
    S: Into<String>,
    D: Into<SortDirection>,
{
    fn into_sort_spec(self) -> SortSpec {
        self.into_iter().map(|(f, d)| (f.into(), d.into())).collect()
    }
}

impl<S, D, const N: usize> IntoSortSpec for [(S, D); N]
where
    S: Into<String>,
    D: Into<SortDirection>,
{
    fn into_sort_spec(self) -> SortSpec {
        self.into_iter().map(|(f, d)| (f.into(), d.into())).collect()
    }
}

/// Values accepted by [`Query::fetch`]: one path or several.
pub trait IntoFetchPaths {
    fn into_fetch_paths(self) -> Vec<String>;
}

impl IntoFetchPaths for &str {
    fn into_fetch_paths(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoFetchPaths for String {
    fn into_fetch_paths(self) -> Vec<String> {
        vec![self]
    }
}

impl<S: Into<String>> IntoFetchPaths for Vec<S> {
    fn into_fetch_paths(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<S: Into<String>, const N: usize> IntoFetchPaths for [S; N] {
    fn into_fetch_paths(self) -> Vec<String> {
        self.into_iter().map(Into::into).collect()
    }
}

/// A query chain bound to an executor.
///
/// Chain methods consume and return the builder. [`execute`](Self::execute)
/// runs the chain once; the guard travels with the builder, so chaining more
/// calls after execution and executing again yields `AlreadyExecuted`.
#[derive(Debug)]
pub struct Query<'e, E: QueryExecutor> {
    executor: &'e mut E,
    definition: QueryDefinition,
    completion: Completion,
    pending_error: Option<Error>,
}

impl<'e, E: QueryExecutor> Query<'e, E> {
    pub fn new(executor: &'e mut E, mapping: MappingId) -> Self {
        Self {
            executor,
            definition: QueryDefinition::new(mapping),
            completion: Completion::new(),
            pending_error: None,
        }
    }

    /// The state accumulated so far.
    pub fn definition(&self) -> &QueryDefinition {
        &self.definition
    }

    pub fn is_executed(&self) -> bool {
        self.completion.is_completed()
    }

    fn with_kind(mut self, kind: QueryKind, criteria: Option<Document>) -> Self {
        if let Some(existing) = self.definition.kind {
            if self.pending_error.is_none() {
                self.pending_error = Some(Error::usage(
                    UsageErrorKind::KindAlreadySet,
                    format!("Query kind is already '{}'; cannot also be '{}'.", existing, kind),
                ));
            }
            return self;
        }
        self.definition.kind = Some(kind);
        self.definition.criteria = criteria.unwrap_or_default();
        self
    }

    // ==================== Operations ====================

    pub fn find_all(self, criteria: impl Into<Option<Document>>) -> Self {
        self.with_kind(QueryKind::FindAll, criteria.into())
    }

    pub fn find_one(self, criteria: impl Into<Option<Document>>) -> Self {
        self.with_kind(QueryKind::FindOne, criteria.into())
    }

    pub fn find_one_by_id(mut self, id: impl Into<Value>) -> Self {
        if self.definition.kind.is_none() {
            self.definition.id = Some(id.into());
        }
        self.with_kind(QueryKind::FindOneById, None)
    }

    pub fn find_one_and_remove(self, criteria: impl Into<Option<Document>>) -> Self {
        self.with_kind(QueryKind::FindOneAndRemove, criteria.into())
    }

    pub fn find_one_and_update(
        mut self,
        criteria: impl Into<Option<Document>>,
        update: Document,
    ) -> Self {
        if self.definition.kind.is_none() {
            self.definition.update_document = Some(update);
        }
        self.with_kind(QueryKind::FindOneAndUpdate, criteria.into())
    }

    /// Make `find_one_and_update` return the entity as it is after the update.
    pub fn returning_updated(mut self) -> Self {
        self.definition.return_updated = true;
        self
    }

    pub fn remove_all(self, criteria: impl Into<Option<Document>>) -> Self {
        self.with_kind(QueryKind::RemoveAll, criteria.into())
    }

    pub fn remove_one(self, criteria: impl Into<Option<Document>>) -> Self {
        self.with_kind(QueryKind::RemoveOne, criteria.into())
    }

    pub fn update_all(mut self, criteria: impl Into<Option<Document>>, update: Document) -> Self {
        if self.definition.kind.is_none() {
            self.definition.update_document = Some(update);
        }
        self.with_kind(QueryKind::UpdateAll, criteria.into())
    }

    pub fn update_one(mut self, criteria: impl Into<Option<Document>>, update: Document) -> Self {
        if self.definition.kind.is_none() {
            self.definition.update_document = Some(update);
        }
        self.with_kind(QueryKind::UpdateOne, criteria.into())
    }

    pub fn distinct(mut self, key: impl Into<String>, criteria: impl Into<Option<Document>>) -> Self {
        if self.definition.kind.is_none() {
            self.definition.distinct_key = Some(key.into());
        }
        self.with_kind(QueryKind::Distinct, criteria.into())
    }

    pub fn count(self, criteria: impl Into<Option<Document>>) -> Self {
        self.with_kind(QueryKind::Count, criteria.into())
    }

    /// Hand each matching entity to `iterator`, several at a time.
    pub fn each(
        mut self,
        criteria: impl Into<Option<Document>>,
        iterator: impl Into<Option<EachIterator>>,
    ) -> Self {
        if self.definition.kind.is_none() {
            self.definition.iterator = iterator.into();
        }
        self.with_kind(QueryKind::Each, criteria.into())
    }

    /// Hand each matching entity to `iterator`, one after the other.
    pub fn each_series(
        mut self,
        criteria: impl Into<Option<Document>>,
        iterator: impl Into<Option<EachIterator>>,
    ) -> Self {
        if self.definition.kind.is_none() {
            self.definition.iterator = iterator.into();
        }
        self.with_kind(QueryKind::EachSeries, criteria.into())
    }

    // ==================== Modifiers ====================

    /// Append sort keys after any set earlier.
    pub fn sort(mut self, sort: impl IntoSortSpec) -> Self {
        self.definition.sort_by.extend(sort.into_sort_spec());
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.definition.limit_count = Some(count);
        self
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.definition.skip_count = Some(count);
        self
    }

    pub fn batch_size(mut self, size: u32) -> Self {
        self.definition.batch_size = Some(size);
        self
    }

    /// Append property paths to fetch on the results.
    pub fn fetch(mut self, paths: impl IntoFetchPaths) -> Self {
        self.definition.fetch_paths.extend(paths.into_fetch_paths());
        self
    }

    // ==================== Execution ====================

    /// Run the chain.
    ///
    /// Only the first call reaches the executor; every later call returns
    /// `AlreadyExecuted` and leaves the first result untouched.
    pub async fn execute(&mut self, cx: &Cx) -> Outcome<QueryResult, Error> {
        if let Err(e) = self.completion.complete() {
            tracing::debug!(kind = ?self.definition.kind, "Rejected second execution of query");
            return Outcome::Err(e);
        }
        if let Some(e) = self.pending_error.take() {
            return Outcome::Err(e);
        }
        let Some(kind) = self.definition.kind else {
            return Outcome::Err(Error::usage(
                UsageErrorKind::MissingKind,
                "Query has no operation; call find_all, count or another operation first.",
            ));
        };
        if kind.is_iteration() && self.definition.iterator.is_none() {
            return Outcome::Err(Error::usage(
                UsageErrorKind::MissingIterator,
                format!("Missing required argument 'iterator' for '{}'.", kind),
            ));
        }
        tracing::debug!(
            kind = %kind,
            mapping = %self.definition.mapping,
            fetch_paths = self.definition.fetch_paths.len(),
            "Executing query"
        );
        let definition = self.definition.take_for_execution();
        self.executor.execute_query(cx, definition).await
    }
}
