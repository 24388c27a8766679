//! Cursors over in-memory query results.

use crate::collection::MemoryCollection;
use docmodel_core::{Cursor, Cx, Document, Error, Outcome, Result, SortSpec, StoreErrorKind};
use std::collections::VecDeque;

/// Lazily evaluated result set.
///
/// Criteria, sort, skip and limit are applied when the first document is
/// requested; modifiers set after that have no effect.
#[derive(Debug)]
pub struct MemoryCursor {
    collection: MemoryCollection,
    criteria: Document,
    sort: SortSpec,
    limit: Option<u64>,
    skip: u64,
    batch_size: Option<u32>,
    buffer: Option<VecDeque<Document>>,
    closed: bool,
}

impl MemoryCursor {
    pub(crate) fn new(collection: MemoryCollection, criteria: Document) -> Self {
        Self {
            collection,
            criteria,
            sort: SortSpec::new(),
            limit: None,
            skip: 0,
            batch_size: None,
            buffer: None,
            closed: false,
        }
    }

    /// Requested batch size; results are already in memory, so it only
    /// documents intent.
    pub fn requested_batch_size(&self) -> Option<u32> {
        self.batch_size
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::store(StoreErrorKind::CursorClosed, "Cursor is closed"))
        } else {
            Ok(())
        }
    }

    fn buffer(&mut self) -> Result<&mut VecDeque<Document>> {
        self.ensure_open()?;
        if self.buffer.is_none() {
            let documents = self.collection.select(&self.criteria, &self.sort)?;
            let skip = usize::try_from(self.skip).unwrap_or(usize::MAX);
            let limit = self
                .limit
                .filter(|l| *l > 0)
                .map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
            let selected: VecDeque<Document> =
                documents.into_iter().skip(skip).take(limit).collect();
            tracing::trace!(
                collection = self.collection_name(),
                documents = selected.len(),
                "Cursor materialized"
            );
            self.buffer = Some(selected);
        }
        Ok(self.buffer.get_or_insert_with(VecDeque::new))
    }

    fn collection_name(&self) -> &str {
        docmodel_core::Collection::name(&self.collection)
    }

    fn next_sync(&mut self) -> Result<Option<Document>> {
        Ok(self.buffer()?.pop_front())
    }

    fn to_array_sync(&mut self) -> Result<Vec<Document>> {
        Ok(self.buffer()?.drain(..).collect())
    }

    fn count_sync(&self) -> Result<u64> {
        self.ensure_open()?;
        let documents = self.collection.select(&self.criteria, &SortSpec::new())?;
        Ok(documents.len() as u64)
    }
}

impl Cursor for MemoryCursor {
    fn filter(&mut self, criteria: Document) -> &mut Self {
        self.criteria = criteria;
        self
    }

    fn sort(&mut self, sort: SortSpec) -> &mut Self {
        self.sort = sort;
        self
    }

    fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    fn skip(&mut self, skip: u64) -> &mut Self {
        self.skip = skip;
        self
    }

    fn batch_size(&mut self, size: u32) -> &mut Self {
        self.batch_size = Some(size);
        self
    }

    fn next(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<Option<Document>, Error>> + Send {
        let result = self.next_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn to_array(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<Vec<Document>, Error>> + Send {
        let result = self.to_array_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn count(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.count_sync();
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn close(&mut self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.closed = true;
        self.buffer = None;
        async { Outcome::Ok(()) }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
