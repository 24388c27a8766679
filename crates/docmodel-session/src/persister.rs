//! Per-hierarchy persistence adapter.
//!
//! A [`Persister`] owns the collection handle of one entity hierarchy. It
//! turns entities into batch operations (insert, dirty-checked update, upsert,
//! remove), executes commands as unordered bulk writes, and runs query
//! definitions, handing fetched documents to an [`EntityLoader`] for
//! hydration.

use crate::SessionConfig;
use crate::batch::{Batch, Command, Operation, OperationKind};
use crate::table_keys::TableKey;
use docmodel_core::{
    Collection, ConflictError, Cursor, Cx, Document, Error, FindAndModifyOptions, Outcome,
    Result, StoreErrorKind, UpdateOptions, UsageErrorKind, Value, doc, try_outcome,
};
use docmodel_mapping::{MappingId, MappingRegistry, ObjectRef, WriteContext};
use docmodel_query::{EachIterator, QueryDefinition, QueryKind, QueryResult};
use futures::stream::{self, TryStreamExt};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

/// Turns fetched documents into managed entities.
///
/// Implemented by the session so that query results go through the identity
/// map. `fetch_paths` are resolved on every returned entity; `overwrite`
/// re-reads already managed instances from the given documents.
pub trait EntityLoader: Send {
    fn load(
        &mut self,
        cx: &Cx,
        mapping: MappingId,
        documents: Vec<Document>,
        fetch_paths: &[String],
        overwrite: bool,
    ) -> impl Future<Output = Outcome<Vec<ObjectRef>, Error>> + Send;
}

/// Per-operation result of an executed [`Command`].
#[derive(Debug, Default)]
pub struct CommandReport {
    /// Positions, in command order, of operations the store did not apply
    pub failed: BTreeSet<usize>,
    /// First failure, describing every unapplied operation
    pub error: Option<Error>,
}

impl CommandReport {
    pub fn applied(&self, position: usize) -> bool {
        !self.failed.contains(&position)
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Persistence adapter for one entity hierarchy.
#[derive(Debug, Clone)]
pub struct Persister<C> {
    registry: Arc<MappingRegistry>,
    root: MappingId,
    collection: C,
    version_field: Option<String>,
    each_concurrency: usize,
    each_chunk_size: usize,
}

impl<C: Collection> Persister<C> {
    /// Persister for the hierarchy rooted at `root`.
    pub fn new(
        registry: Arc<MappingRegistry>,
        root: MappingId,
        collection: C,
        config: &SessionConfig,
    ) -> Result<Self> {
        let Some(entity) = registry.entity(root) else {
            return Err(Error::usage(
                UsageErrorKind::NotEntity,
                format!("Mapping {} is not an entity.", root),
            ));
        };
        let version_field = entity.version_field().map(str::to_string);
        Ok(Self {
            registry,
            root,
            collection,
            version_field,
            each_concurrency: config.each_concurrency.max(1),
            each_chunk_size: config.each_chunk_size.max(1),
        })
    }

    pub fn root(&self) -> MappingId {
        self.root
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    pub fn version_field(&self) -> Option<&str> {
        self.version_field.as_deref()
    }

    fn collection_name(&self) -> &str {
        self.collection.name()
    }

    fn format_id(&self, id: &Value) -> String {
        self.registry
            .entity(self.root)
            .map_or_else(|| id.to_string(), |e| e.identity().format_id(id))
    }

    /// Version stored in a document.
    pub fn stored_version(&self, document: &Document) -> Option<i64> {
        self.version_field
            .as_deref()
            .and_then(|field| document.get(field))
            .and_then(Value::as_i64)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// The entity's full document, identifier and discriminator included.
    pub fn write_entity(&self, entity: &ObjectRef) -> Result<Document> {
        entity_document(&self.registry, entity)
    }

    fn entity_id(entity: &ObjectRef) -> Result<Value> {
        entity.id().filter(|id| !id.is_null()).ok_or_else(|| {
            Error::usage(
                UsageErrorKind::InvalidIdentifier,
                format!(
                    "Entity of class '{}' has no identifier.",
                    entity.class().unwrap_or_default()
                ),
            )
        })
    }

    fn with_version(&self, mut document: Document, version: i64) -> Document {
        if let Some(field) = &self.version_field {
            document.insert(field.clone(), version);
        }
        document
    }

    fn push(
        &self,
        batch: &mut Batch,
        key: TableKey,
        kind: OperationKind,
        entity: &ObjectRef,
        document: Option<Document>,
        expected_version: Option<i64>,
    ) -> Result<()> {
        let id = Self::entity_id(entity)?;
        batch.command(self.root).add(
            key,
            Operation {
                kind,
                entity: entity.clone(),
                id,
                document,
                expected_version,
            },
        );
        Ok(())
    }

    /// Schedule an insert; versioned documents start at version 1.
    pub fn add_insert(&self, batch: &mut Batch, key: TableKey, entity: &ObjectRef) -> Result<Document> {
        let document = self.with_version(self.write_entity(entity)?, 1);
        self.push(batch, key, OperationKind::Insert, entity, Some(document.clone()), None)?;
        Ok(document)
    }

    /// Schedule a replace-or-insert for an entity whose stored state is unknown.
    pub fn add_upsert(&self, batch: &mut Batch, key: TableKey, entity: &ObjectRef) -> Result<Document> {
        let document = self.with_version(self.write_entity(entity)?, 1);
        self.push(batch, key, OperationKind::Upsert, entity, Some(document.clone()), None)?;
        Ok(document)
    }

    /// Schedule an update unconditionally, bumping the version.
    pub fn add_update(
        &self,
        batch: &mut Batch,
        key: TableKey,
        entity: &ObjectRef,
        original: &Document,
    ) -> Result<Document> {
        let written = self.write_entity(entity)?;
        self.add_update_document(batch, key, entity, original, written)
    }

    fn add_update_document(
        &self,
        batch: &mut Batch,
        key: TableKey,
        entity: &ObjectRef,
        original: &Document,
        written: Document,
    ) -> Result<Document> {
        let expected = self.stored_version(original);
        let document = self.with_version(written, expected.unwrap_or(0) + 1);
        self.push(batch, key, OperationKind::Update, entity, Some(document.clone()), expected)?;
        Ok(document)
    }

    /// Compare the entity against its last-known document.
    ///
    /// Schedules an update and returns the new document only when a mapped
    /// field differs; otherwise returns `original` unchanged and leaves the
    /// batch alone.
    pub fn dirty_check(
        &self,
        batch: &mut Batch,
        key: TableKey,
        entity: &ObjectRef,
        original: &Document,
    ) -> Result<Document> {
        let mapping = self.registry.entity_for_object(entity)?;
        let written = self.write_entity(entity)?;
        if self.registry.are_documents_equal(mapping, original, &written) {
            return Ok(original.clone());
        }
        tracing::trace!(collection = self.collection_name(), "Entity is dirty");
        self.add_update_document(batch, key, entity, original, written)
    }

    pub fn add_remove(&self, batch: &mut Batch, key: TableKey, entity: &ObjectRef) -> Result<()> {
        self.push(batch, key, OperationKind::Remove, entity, None, None)
    }

    /// Turn the upserts of `command` into guarded updates or inserts.
    ///
    /// Versioned hierarchies cannot replace a stored document blindly: the
    /// new version must continue from the stored one. Identifiers already
    /// stored become updates expecting the stored version; the rest become
    /// inserts at version 1.
    pub async fn resolve_upserts(&self, cx: &Cx, command: &mut Command) -> Outcome<(), Error> {
        let Some(field) = self.version_field.clone() else {
            return Outcome::Ok(());
        };
        let ids: Vec<Value> = command
            .operations()
            .filter(|op| op.kind == OperationKind::Upsert)
            .map(|op| op.id.clone())
            .collect();
        if ids.is_empty() {
            return Outcome::Ok(());
        }
        let mut cursor = self.collection.find(doc! { "_id" => doc! { "$in" => ids } });
        let stored = try_outcome!(cursor.to_array(cx).await);

        for operation in command
            .operations_mut()
            .filter(|op| op.kind == OperationKind::Upsert)
        {
            let existing = stored
                .iter()
                .find(|d| d.get("_id").is_some_and(|id| id.loose_eq(&operation.id)));
            let Some(existing) = existing else {
                operation.kind = OperationKind::Insert;
                continue;
            };
            let current = self.stored_version(existing);
            operation.kind = OperationKind::Update;
            operation.expected_version = current;
            if let Some(document) = &mut operation.document {
                document.insert(field.clone(), current.unwrap_or(0) + 1);
            }
            tracing::trace!(id = %operation.id, version = ?current, "Upsert continues stored version");
        }
        Outcome::Ok(())
    }

    /// Submit one command as an unordered bulk write.
    ///
    /// Operations are independent: the report names the positions the store
    /// did not apply, either because of a write error or because an update's
    /// version precondition matched nothing. `Err` means the bulk write as a
    /// whole failed and nothing is known to be applied.
    #[tracing::instrument(level = "debug", skip(self, cx, command), fields(collection = self.collection_name(), operations = command.len()))]
    pub async fn execute_command(&self, cx: &Cx, command: &Command) -> Outcome<CommandReport, Error> {
        let mut report = CommandReport::default();
        let mut bulk = self.collection.initialize_unordered_bulk_op();
        // Command position of each submitted write model
        let mut submitted = Vec::with_capacity(command.len());
        for (position, operation) in command.operations().enumerate() {
            let selector = doc! { "_id" => operation.id.clone() };
            match (operation.kind, &operation.document) {
                (OperationKind::Remove, _) => bulk.find(selector).remove_one(),
                (_, None) => {
                    report.failed.insert(position);
                    continue;
                }
                (OperationKind::Insert, Some(document)) => {
                    bulk.insert(document.clone());
                }
                (OperationKind::Update, Some(document)) => {
                    let mut selector = selector;
                    if let (Some(field), Some(version)) =
                        (&self.version_field, operation.expected_version)
                    {
                        selector.insert(field.clone(), version);
                    }
                    bulk.find(selector).replace_one(document.clone());
                }
                (OperationKind::Upsert, Some(document)) => {
                    bulk.find(selector).upsert().replace_one(document.clone());
                }
            }
            submitted.push(position);
        }

        let result = try_outcome!(bulk.execute(cx).await);

        let mut messages = Vec::new();
        for error in &result.write_errors {
            if let Some(&position) = submitted.get(error.index) {
                report.failed.insert(position);
            }
            messages.push(format!("#{}: {}", error.index, error.message));
        }

        let replacing = command
            .operations()
            .enumerate()
            .filter(|(position, op)| {
                matches!(op.kind, OperationKind::Update | OperationKind::Upsert)
                    && !report.failed.contains(position)
            })
            .count();
        let acknowledged = result.matched + result.upserted;
        let mut conflicts = Vec::new();
        if acknowledged < replacing as u64 {
            let unapplied = try_outcome!(self.unapplied_updates(cx, command, &report.failed).await);
            for position in unapplied {
                if let Some(operation) = command.operations().nth(position) {
                    conflicts.push(self.format_id(&operation.id));
                }
                report.failed.insert(position);
            }
        }

        if !messages.is_empty() {
            tracing::warn!(
                collection = self.collection_name(),
                errors = messages.len(),
                "Bulk write reported errors"
            );
            report.error = Some(Error::store(
                StoreErrorKind::WriteErrors,
                format!(
                    "Bulk write to '{}' failed: {}",
                    self.collection_name(),
                    messages.join("; ")
                ),
            ));
        } else if !conflicts.is_empty() {
            tracing::warn!(
                collection = self.collection_name(),
                conflicts = conflicts.len(),
                "Version precondition failed"
            );
            report.error = Some(Error::Conflict(ConflictError {
                collection: self.collection_name().to_string(),
                ids: conflicts,
            }));
        }

        tracing::debug!(
            inserted = result.inserted,
            matched = result.matched,
            upserted = result.upserted,
            removed = result.removed,
            failed = report.failed.len(),
            "Command executed"
        );
        Outcome::Ok(report)
    }

    /// Positions of updates whose document is not what the store holds.
    ///
    /// An update was applied when the stored document carries its version
    /// and its mapped fields; a missing document or anything else means the
    /// precondition failed.
    async fn unapplied_updates(
        &self,
        cx: &Cx,
        command: &Command,
        failed: &BTreeSet<usize>,
    ) -> Outcome<Vec<usize>, Error> {
        let updates: Vec<(usize, &Operation)> = command
            .operations()
            .enumerate()
            .filter(|(position, op)| op.kind == OperationKind::Update && !failed.contains(position))
            .collect();
        let ids: Vec<Value> = updates.iter().map(|(_, op)| op.id.clone()).collect();
        let mut cursor = self
            .collection
            .find(doc! { "_id" => doc! { "$in" => ids } });
        let stored = try_outcome!(cursor.to_array(cx).await);

        let unapplied = updates
            .into_iter()
            .filter(|(_, op)| {
                let Some(written) = &op.document else {
                    return true;
                };
                let Some(current) = stored
                    .iter()
                    .find(|d| d.get("_id").is_some_and(|id| id.loose_eq(&op.id)))
                else {
                    return true;
                };
                let same_fields = self
                    .registry
                    .entity_for_object(&op.entity)
                    .is_ok_and(|mapping| self.registry.are_documents_equal(mapping, current, written));
                !(same_fields && self.stored_version(current) == self.stored_version(written))
            })
            .map(|(position, _)| position)
            .collect();
        Outcome::Ok(unapplied)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Restrict `criteria` to documents of `mapping` and its subclasses.
    ///
    /// Queries against the hierarchy root see every document.
    pub fn scoped_criteria(&self, mapping: MappingId, criteria: Document) -> Document {
        let Some(class) = self.registry.class(mapping) else {
            return criteria;
        };
        let Some(field) = class.discriminator_field() else {
            return criteria;
        };
        if class.inheritance_root() == mapping {
            return criteria;
        }
        let values: Vec<Value> = self
            .registry
            .descendants(mapping)
            .into_iter()
            .filter_map(|id| self.registry.class(id)?.discriminator_value().map(Value::from))
            .collect();
        let filter = doc! { "$in" => values };
        if criteria.contains_key(field) {
            doc! { "$and" => vec![Value::from(criteria), Value::from(doc! { field => filter })] }
        } else {
            criteria.with(field, filter)
        }
    }

    /// Stored document of an entity of this hierarchy.
    pub async fn find_one_by_id(
        &self,
        cx: &Cx,
        mapping: MappingId,
        id: &Value,
    ) -> Outcome<Option<Document>, Error> {
        let criteria = self.scoped_criteria(mapping, doc! { "_id" => id.clone() });
        let mut cursor = self.collection.find(criteria);
        cursor.limit(1);
        cursor.next(cx).await
    }

    /// Reload the stored document of `entity`.
    pub async fn refresh_document(
        &self,
        cx: &Cx,
        entity: &ObjectRef,
    ) -> Outcome<Option<Document>, Error> {
        let id = try_outcome!(result: Self::entity_id(entity));
        self.find_one_by_id(cx, self.root, &id).await
    }

    /// Documents of `mapping` whose owning-side `field` points at `id`.
    pub async fn find_inverse_of(
        &self,
        cx: &Cx,
        mapping: MappingId,
        field: &str,
        id: &Value,
    ) -> Outcome<Vec<Document>, Error> {
        let criteria = self.scoped_criteria(mapping, doc! { field => id.clone() });
        let mut cursor = self.collection.find(criteria);
        cursor.to_array(cx).await
    }

    /// First document of `mapping` whose owning-side `field` points at `id`.
    pub async fn find_one_inverse_of(
        &self,
        cx: &Cx,
        mapping: MappingId,
        field: &str,
        id: &Value,
    ) -> Outcome<Option<Document>, Error> {
        let criteria = self.scoped_criteria(mapping, doc! { field => id.clone() });
        let mut cursor = self.collection.find(criteria);
        cursor.limit(1);
        cursor.next(cx).await
    }

    fn cursor_for(&self, definition: &QueryDefinition, criteria: Document) -> C::Cursor {
        let mut cursor = self.collection.find(criteria);
        if !definition.sort_by.is_empty() {
            cursor.sort(definition.sort_by.clone());
        }
        if let Some(skip) = definition.skip_count {
            cursor.skip(skip);
        }
        if let Some(limit) = definition.limit_count {
            cursor.limit(limit);
        }
        if let Some(size) = definition.batch_size {
            cursor.batch_size(size);
        }
        cursor
    }

    /// Run a query definition, dispatching on its kind.
    #[tracing::instrument(level = "debug", skip(self, cx, loader, definition), fields(collection = self.collection_name(), kind = ?definition.kind))]
    pub async fn execute_query<L: EntityLoader>(
        &self,
        cx: &Cx,
        loader: &mut L,
        mut definition: QueryDefinition,
    ) -> Outcome<QueryResult, Error> {
        let Some(kind) = definition.kind else {
            return Outcome::Err(Error::usage(
                UsageErrorKind::MissingKind,
                "Query has no operation.",
            ));
        };
        let mapping = definition.mapping;
        let criteria = self.scoped_criteria(mapping, std::mem::take(&mut definition.criteria));

        match kind {
            QueryKind::FindAll => {
                let mut cursor = self.cursor_for(&definition, criteria);
                let documents = try_outcome!(cursor.to_array(cx).await);
                let entities = try_outcome!(
                    loader
                        .load(cx, mapping, documents, &definition.fetch_paths, false)
                        .await
                );
                Outcome::Ok(QueryResult::Entities(entities))
            }
            QueryKind::FindOne | QueryKind::FindOneById => {
                let criteria = if kind == QueryKind::FindOneById {
                    let id = definition.id.clone().unwrap_or(Value::Null);
                    self.scoped_criteria(mapping, doc! { "_id" => id })
                } else {
                    criteria
                };
                let mut cursor = self.cursor_for(&definition, criteria);
                cursor.limit(1);
                let document = try_outcome!(cursor.next(cx).await);
                self.load_one(cx, loader, mapping, &definition.fetch_paths, document, false)
                    .await
            }
            QueryKind::FindOneAndRemove | QueryKind::FindOneAndUpdate => {
                let remove = kind == QueryKind::FindOneAndRemove;
                let options = FindAndModifyOptions {
                    sort: definition.sort_by.clone(),
                    remove,
                    update: definition.update_document.clone(),
                    new: definition.return_updated,
                    upsert: false,
                };
                let document =
                    try_outcome!(self.collection.find_and_modify(cx, criteria, options).await);
                let overwrite = !remove && definition.return_updated;
                self.load_one(cx, loader, mapping, &definition.fetch_paths, document, overwrite)
                    .await
            }
            QueryKind::RemoveAll | QueryKind::RemoveOne => {
                let single = kind == QueryKind::RemoveOne;
                let removed = try_outcome!(self.collection.remove(cx, criteria, single).await);
                Outcome::Ok(QueryResult::Count(removed))
            }
            QueryKind::UpdateAll | QueryKind::UpdateOne => {
                let update = definition.update_document.clone().unwrap_or_default();
                let options = UpdateOptions {
                    multi: kind == QueryKind::UpdateAll,
                    upsert: false,
                };
                let result =
                    try_outcome!(self.collection.update(cx, criteria, update, options).await);
                Outcome::Ok(QueryResult::Count(result.modified))
            }
            QueryKind::Distinct => {
                let key = definition.distinct_key.clone().unwrap_or_default();
                let values = try_outcome!(self.collection.distinct(cx, &key, criteria).await);
                Outcome::Ok(QueryResult::Values(values))
            }
            QueryKind::Count => {
                let count = try_outcome!(self.collection.count(cx, criteria).await);
                Outcome::Ok(QueryResult::Count(count))
            }
            QueryKind::Each | QueryKind::EachSeries => {
                let Some(iterator) = definition.iterator.take() else {
                    return Outcome::Err(Error::usage(
                        UsageErrorKind::MissingIterator,
                        "Iterator function required.",
                    ));
                };
                let cursor = self.cursor_for(&definition, criteria);
                let series = kind == QueryKind::EachSeries;
                let chunk_size = if series {
                    1
                } else {
                    definition.batch_size.map_or(self.each_chunk_size, |size| {
                        usize::try_from(size).unwrap_or(usize::MAX).max(1)
                    })
                };
                let plan = Iteration {
                    mapping,
                    fetch_paths: &definition.fetch_paths,
                    chunk_size,
                    series,
                };
                self.iterate(cx, loader, plan, cursor, iterator).await
            }
        }
    }

    async fn load_one<L: EntityLoader>(
        &self,
        cx: &Cx,
        loader: &mut L,
        mapping: MappingId,
        fetch_paths: &[String],
        document: Option<Document>,
        overwrite: bool,
    ) -> Outcome<QueryResult, Error> {
        let Some(document) = document else {
            return Outcome::Ok(QueryResult::Entity(None));
        };
        let entities = try_outcome!(
            loader
                .load(cx, mapping, vec![document], fetch_paths, overwrite)
                .await
        );
        Outcome::Ok(QueryResult::Entity(entities.into_iter().next()))
    }

    /// Drive `iterator` over the cursor.
    ///
    /// Series iteration hands over one entity at a time; otherwise documents
    /// are hydrated in chunks and each chunk runs with bounded concurrency.
    /// The first error stops iteration and closes the cursor.
    async fn iterate<L: EntityLoader>(
        &self,
        cx: &Cx,
        loader: &mut L,
        plan: Iteration<'_>,
        mut cursor: C::Cursor,
        mut iterator: EachIterator,
    ) -> Outcome<QueryResult, Error> {
        let Iteration {
            mapping,
            fetch_paths,
            chunk_size,
            series,
        } = plan;
        let mut visited = 0usize;

        loop {
            let mut documents = Vec::with_capacity(chunk_size);
            while documents.len() < chunk_size {
                match cursor.next(cx).await {
                    Outcome::Ok(Some(document)) => documents.push(document),
                    Outcome::Ok(None) => break,
                    Outcome::Err(e) => {
                        close_quietly(&mut cursor, cx).await;
                        return Outcome::Err(e);
                    }
                    Outcome::Cancelled(r) => {
                        close_quietly(&mut cursor, cx).await;
                        return Outcome::Cancelled(r);
                    }
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
            if documents.is_empty() {
                break;
            }
            let exhausted = documents.len() < chunk_size;

            let entities = match loader
                .load(cx, mapping, documents, fetch_paths, false)
                .await
            {
                Outcome::Ok(entities) => entities,
                Outcome::Err(e) => {
                    close_quietly(&mut cursor, cx).await;
                    return Outcome::Err(e);
                }
                Outcome::Cancelled(r) => {
                    close_quietly(&mut cursor, cx).await;
                    return Outcome::Cancelled(r);
                }
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            visited += entities.len();

            let result = if series {
                let mut result = Ok(());
                for entity in entities {
                    result = iterator.call(entity).await;
                    if result.is_err() {
                        break;
                    }
                }
                result
            } else {
                stream::iter(entities.into_iter().map(Ok::<ObjectRef, Error>))
                    .try_for_each_concurrent(self.each_concurrency, |entity| iterator.call(entity))
                    .await
            };
            if let Err(e) = result {
                tracing::debug!(visited, "Iterator failed; stopping");
                close_quietly(&mut cursor, cx).await;
                return Outcome::Err(e);
            }
            if exhausted {
                break;
            }
        }

        close_quietly(&mut cursor, cx).await;
        tracing::trace!(visited, "Iteration complete");
        Outcome::Ok(QueryResult::Done)
    }
}

/// How `each`/`each_series` walk a cursor.
struct Iteration<'a> {
    mapping: MappingId,
    fetch_paths: &'a [String],
    /// Documents hydrated per round
    chunk_size: usize,
    /// One callback at a time
    series: bool,
}

/// Write an entity through its mapping.
pub fn entity_document(registry: &MappingRegistry, entity: &ObjectRef) -> Result<Document> {
    let mapping = registry.entity_for_object(entity)?;
    let mut ctx = WriteContext::new(registry);
    let written = registry.write_document(&mut ctx, mapping, entity);
    ctx.finish(written)?.ok_or_else(|| {
        Error::usage(
            UsageErrorKind::NotEntity,
            format!("Mapping {} cannot write documents.", mapping),
        )
    })
}

/// Whether an entity's mapped fields differ from `original`.
pub fn differs_from(registry: &MappingRegistry, entity: &ObjectRef, original: &Document) -> Result<bool> {
    let mapping = registry.entity_for_object(entity)?;
    let written = entity_document(registry, entity)?;
    Ok(!registry.are_documents_equal(mapping, original, &written))
}

async fn close_quietly<K: Cursor>(cursor: &mut K, cx: &Cx) {
    if !cursor.is_closed() {
        if let Outcome::Err(e) = cursor.close(cx).await {
            tracing::warn!(error = %e, "Failed to close cursor");
        }
    }
}
