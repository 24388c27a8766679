//! Collections held in process memory.

use crate::cursor::MemoryCursor;
use crate::{filter, update};
use docmodel_core::{
    BulkWriteResult, Collection, Cx, Document, Error, FindAndModifyOptions, IndexSpec, ObjectId,
    Outcome, Result, SortSpec, StoreErrorKind, UpdateOptions, UpdateResult, Value, WriteError, WriteModel,
};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stored documents and declared indexes of one collection.
#[derive(Debug, Default)]
pub(crate) struct CollectionState {
    pub(crate) documents: Vec<Document>,
    pub(crate) indexes: Vec<IndexSpec>,
}

/// Source of `_id`s for inserted documents that lack one.
#[derive(Debug)]
pub(crate) struct IdSource {
    random: [u8; 5],
    counter: AtomicU32,
}

impl IdSource {
    pub(crate) fn new() -> Self {
        Self {
            random: rand::random(),
            counter: AtomicU32::new(rand::random()),
        }
    }

    fn next(&self) -> Value {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX));
        let counter = self.counter.fetch_add(1, AtomicOrdering::Relaxed);
        Value::ObjectId(ObjectId::from_parts(seconds, self.random, counter))
    }
}

/// Handle to one in-memory collection. Clones share state.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    name: String,
    state: Arc<Mutex<CollectionState>>,
    ids: Arc<IdSource>,
}

/// Compare two documents under a sort specification; missing fields sort as null.
pub(crate) fn compare_documents(a: &Document, b: &Document, sort: &SortSpec) -> Ordering {
    for (field, direction) in sort {
        let x = a.get_path(field).unwrap_or(&Value::Null);
        let y = b.get_path(field).unwrap_or(&Value::Null);
        let mut ord = x.compare(y);
        if direction.as_i32() < 0 {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl MemoryCollection {
    pub(crate) fn new(name: &str, state: Arc<Mutex<CollectionState>>, ids: Arc<IdSource>) -> Self {
        Self {
            name: name.to_string(),
            state,
            ids,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CollectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every stored document, in insertion order.
    pub fn documents(&self) -> Vec<Document> {
        self.lock().documents.clone()
    }

    /// Indexes declared through `create_index`.
    pub fn indexes(&self) -> Vec<IndexSpec> {
        self.lock().indexes.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().documents.is_empty()
    }

    /// Matching documents, sorted.
    pub(crate) fn select(&self, criteria: &Document, sort: &SortSpec) -> Result<Vec<Document>> {
        let state = self.lock();
        let mut out = Vec::new();
        for doc in &state.documents {
            if filter::matches(doc, criteria)? {
                out.push(doc.clone());
            }
        }
        drop(state);
        out.sort_by(|a, b| compare_documents(a, b, sort));
        Ok(out)
    }

    fn positions(state: &CollectionState, criteria: &Document, single: bool) -> Result<Vec<usize>> {
        let mut out = Vec::new();
        for (i, doc) in state.documents.iter().enumerate() {
            if filter::matches(doc, criteria)? {
                out.push(i);
                if single {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Name of a unique index (or `_id_`) that `doc` would duplicate.
    fn duplicate_key(state: &CollectionState, doc: &Document, skip: Option<usize>) -> Option<String> {
        if let Some(id) = doc.get("_id") {
            if others(state, skip).any(|d| d.get("_id").is_some_and(|other| other.loose_eq(id))) {
                return Some("_id_".to_string());
            }
        }
        for index in state.indexes.iter().filter(|i| i.unique) {
            let key: Vec<Option<&Value>> = index.keys.iter().map(|(f, _)| doc.get_path(f)).collect();
            if index.sparse && key.iter().all(Option::is_none) {
                continue;
            }
            let clash = others(state, skip).any(|d| {
                index
                    .keys
                    .iter()
                    .zip(&key)
                    .all(|((f, _), v)| match (d.get_path(f), v) {
                        (None, None) => true,
                        (Some(a), Some(b)) => a.loose_eq(b),
                        _ => false,
                    })
            });
            if clash {
                return Some(index.effective_name());
            }
        }
        None
    }

    fn duplicate_error(&self, index: &str) -> Error {
        Error::store(
            StoreErrorKind::WriteErrors,
            format!(
                "E11000 duplicate key error collection: {} index: {}",
                self.name, index
            ),
        )
    }

    fn insert_into(&self, state: &mut CollectionState, mut document: Document) -> Result<()> {
        if document.get("_id").is_none_or(Value::is_null) {
            let mut with_id = Document::new().with("_id", self.ids.next());
            for (k, v) in document.into_inner() {
                if k != "_id" {
                    with_id.insert(k, v);
                }
            }
            document = with_id;
        }
        if let Some(index) = Self::duplicate_key(state, &document, None) {
            return Err(self.duplicate_error(&index));
        }
        state.documents.push(document);
        Ok(())
    }

    /// Apply `update` to the document at `position`, enforcing unique keys.
    fn update_at(
        &self,
        state: &mut CollectionState,
        position: usize,
        update_doc: &Document,
    ) -> Result<bool> {
        let mut updated = state.documents[position].clone();
        let changed = update::apply(&mut updated, update_doc)?;
        if changed {
            if let Some(index) = Self::duplicate_key(state, &updated, Some(position)) {
                return Err(self.duplicate_error(&index));
            }
            state.documents[position] = updated;
        }
        Ok(changed)
    }

    fn upsert_into(
        &self,
        state: &mut CollectionState,
        criteria: &Document,
        update_doc: &Document,
    ) -> Result<Value> {
        let mut seed = update::upsert_seed(criteria);
        update::apply(&mut seed, update_doc)?;
        if !update::is_operator_update(update_doc) {
            if let Some(id) = criteria.get("_id") {
                seed.insert("_id", id.clone());
            }
        }
        if seed.get("_id").is_none() {
            let mut with_id = Document::new().with("_id", self.ids.next());
            for (k, v) in seed.into_inner() {
                with_id.insert(k, v);
            }
            seed = with_id;
        }
        let id = seed.get("_id").cloned().unwrap_or(Value::Null);
        self.insert_into(state, seed)?;
        Ok(id)
    }

    fn update_sync(
        &self,
        criteria: &Document,
        update_doc: &Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        let mut state = self.lock();
        let positions = Self::positions(&state, criteria, !options.multi)?;
        let mut result = UpdateResult {
            matched: positions.len() as u64,
            ..UpdateResult::default()
        };
        for position in positions {
            if self.update_at(&mut state, position, update_doc)? {
                result.modified += 1;
            }
        }
        if result.matched == 0 && options.upsert {
            result.upserted_id = Some(self.upsert_into(&mut state, criteria, update_doc)?);
        }
        Ok(result)
    }

    fn remove_sync(&self, criteria: &Document, single: bool) -> Result<u64> {
        let mut state = self.lock();
        Self::delete_matching(&mut state, criteria, single)
    }

    fn find_and_modify_sync(
        &self,
        criteria: &Document,
        options: &FindAndModifyOptions,
    ) -> Result<Option<Document>> {
        let mut state = self.lock();
        let mut positions = Self::positions(&state, criteria, false)?;
        positions.sort_by(|a, b| {
            compare_documents(&state.documents[*a], &state.documents[*b], &options.sort)
        });

        let Some(&position) = positions.first() else {
            if options.upsert && !options.remove {
                if let Some(update_doc) = &options.update {
                    let id = self.upsert_into(&mut state, criteria, update_doc)?;
                    if options.new {
                        return Ok(state
                            .documents
                            .iter()
                            .find(|d| d.get("_id") == Some(&id))
                            .cloned());
                    }
                }
            }
            return Ok(None);
        };

        let before = state.documents[position].clone();
        if options.remove {
            state.documents.remove(position);
            return Ok(Some(before));
        }
        if let Some(update_doc) = &options.update {
            self.update_at(&mut state, position, update_doc)?;
        }
        if options.new {
            Ok(Some(state.documents[position].clone()))
        } else {
            Ok(Some(before))
        }
    }

    fn bulk_write_sync(&self, operations: Vec<WriteModel>) -> BulkWriteResult {
        let mut state = self.lock();
        let mut result = BulkWriteResult::default();
        for (index, operation) in operations.into_iter().enumerate() {
            let outcome = self.apply_model(&mut state, operation, &mut result);
            if let Err(e) = outcome {
                result.write_errors.push(WriteError {
                    index,
                    message: e.to_string(),
                });
            }
        }
        result
    }

    fn apply_model(
        &self,
        state: &mut CollectionState,
        operation: WriteModel,
        result: &mut BulkWriteResult,
    ) -> Result<()> {
        match operation {
            WriteModel::InsertOne { document } => {
                self.insert_into(state, document)?;
                result.inserted += 1;
                Ok(())
            }
            WriteModel::UpdateOne {
                filter,
                update,
                upsert,
            } => self.apply_update_model(state, &filter, &update, upsert, false, result),
            WriteModel::UpdateMany {
                filter,
                update,
                upsert,
            } => self.apply_update_model(state, &filter, &update, upsert, true, result),
            WriteModel::ReplaceOne {
                filter,
                replacement,
                upsert,
            } => {
                if update::is_operator_update(&replacement) {
                    return Err(invalid_replacement());
                }
                self.apply_update_model(state, &filter, &replacement, upsert, false, result)
            }
            WriteModel::DeleteOne { filter } => {
                result.removed += Self::delete_matching(state, &filter, true)?;
                Ok(())
            }
            WriteModel::DeleteMany { filter } => {
                result.removed += Self::delete_matching(state, &filter, false)?;
                Ok(())
            }
        }
    }

    fn apply_update_model(
        &self,
        state: &mut CollectionState,
        filter: &Document,
        update_doc: &Document,
        upsert: bool,
        multi: bool,
        result: &mut BulkWriteResult,
    ) -> Result<()> {
        let positions = Self::positions(state, filter, !multi)?;
        if positions.is_empty() {
            if upsert {
                self.upsert_into(state, filter, update_doc)?;
                result.upserted += 1;
            }
            return Ok(());
        }
        result.matched += positions.len() as u64;
        for position in positions {
            if self.update_at(state, position, update_doc)? {
                result.modified += 1;
            }
        }
        Ok(())
    }

    fn delete_matching(state: &mut CollectionState, filter: &Document, single: bool) -> Result<u64> {
        let positions = Self::positions(state, filter, single)?;
        for position in positions.iter().rev() {
            state.documents.remove(*position);
        }
        Ok(positions.len() as u64)
    }
}

/// Stored documents except the one at `skip`.
fn others(state: &CollectionState, skip: Option<usize>) -> impl Iterator<Item = &Document> {
    state
        .documents
        .iter()
        .enumerate()
        .filter(move |(i, _)| Some(*i) != skip)
        .map(|(_, d)| d)
}

fn invalid_replacement() -> Error {
    Error::store(
        StoreErrorKind::InvalidOperation,
        "Replacement document must not contain update operators",
    )
}

impl Collection for MemoryCollection {
    type Cursor = MemoryCursor;

    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, criteria: Document) -> Self::Cursor {
        MemoryCursor::new(self.clone(), criteria)
    }

    fn find_and_modify(
        &self,
        _cx: &Cx,
        criteria: Document,
        options: FindAndModifyOptions,
    ) -> impl Future<Output = Outcome<Option<Document>, Error>> + Send {
        let result = self.find_and_modify_sync(&criteria, &options);
        tracing::trace!(collection = %self.name, remove = options.remove, "findAndModify");
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn remove(
        &self,
        _cx: &Cx,
        criteria: Document,
        single: bool,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self.remove_sync(&criteria, single);
        tracing::trace!(collection = %self.name, single, "remove");
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn update(
        &self,
        _cx: &Cx,
        criteria: Document,
        update: Document,
        options: UpdateOptions,
    ) -> impl Future<Output = Outcome<UpdateResult, Error>> + Send {
        let result = self.update_sync(&criteria, &update, options);
        tracing::trace!(collection = %self.name, multi = options.multi, "update");
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn count(
        &self,
        _cx: &Cx,
        criteria: Document,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        let result = self
            .select(&criteria, &SortSpec::new())
            .map(|docs| docs.len() as u64);
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn distinct(
        &self,
        _cx: &Cx,
        key: &str,
        criteria: Document,
    ) -> impl Future<Output = Outcome<Vec<Value>, Error>> + Send {
        let result = self.select(&criteria, &SortSpec::new()).map(|docs| {
            let mut values: Vec<Value> = Vec::new();
            let mut add = |v: &Value| {
                if !values.iter().any(|seen| seen.loose_eq(v)) {
                    values.push(v.clone());
                }
            };
            for doc in &docs {
                match doc.get_path(key) {
                    Some(Value::Array(items)) => items.iter().for_each(&mut add),
                    Some(v) => add(v),
                    None => {}
                }
            }
            values
        });
        async move { result.map_or_else(Outcome::Err, Outcome::Ok) }
    }

    fn bulk_write(
        &self,
        _cx: &Cx,
        operations: Vec<WriteModel>,
    ) -> impl Future<Output = Outcome<BulkWriteResult, Error>> + Send {
        let count = operations.len();
        let result = self.bulk_write_sync(operations);
        tracing::debug!(
            collection = %self.name,
            operations = count,
            write_errors = result.write_errors.len(),
            "Bulk write applied"
        );
        async move { Outcome::Ok(result) }
    }

    fn create_index(
        &self,
        _cx: &Cx,
        index: IndexSpec,
    ) -> impl Future<Output = Outcome<String, Error>> + Send {
        let name = index.effective_name();
        {
            let mut state = self.lock();
            if !state.indexes.iter().any(|i| i.effective_name() == name) {
                state.indexes.push(index);
            }
        }
        tracing::debug!(collection = %self.name, index = %name, "Index declared");
        async move { Outcome::Ok(name) }
    }
}
