//! Session and unit of work for DocModel Rust.
//!
//! `docmodel-session` is the **unit-of-work layer**. A [`Session`] owns an
//! identity map, tracks every entity it has loaded or been asked to save, and
//! turns accumulated changes into one bulk write per entity hierarchy on
//! [`Session::flush`].
//!
//! # Role In The Architecture
//!
//! - **Identity map**: at most one live object per `(inheritance root, id)`.
//! - **Change tracking**: dirty checks against the last-known document, with
//!   explicit or revision-based variants per entity mapping.
//! - **Cascades**: save, remove, detach, refresh and merge follow the
//!   cascade flags declared on entity properties.
//! - **Query execution**: the session implements
//!   [`QueryExecutor`](docmodel_query::QueryExecutor), so every query result
//!   is hydrated through the identity map.
//!
//! # Example
//!
//! ```ignore
//! let mut session = Session::new(store, registry, SessionConfig::default());
//! let bob = ObjectRef::new("Person").with("name", "Bob");
//! session.save(&bob)?;
//! session.flush(&cx).await?;
//!
//! let people = session.query("Person")?.find_all(doc! { "name" => "Bob" }).execute(&cx).await?;
//! ```

pub mod batch;
pub mod identity_map;
pub mod persister;
pub mod table_keys;

pub use batch::{Batch, Command, Operation, OperationKind};
pub use identity_map::{IdentityKey, IdentityMap};
pub use persister::{CommandReport, EntityLoader, Persister};
pub use table_keys::{TableKey, TableKeys};

use docmodel_core::{
    Collection, Cx, Document, Error, Outcome, Result, Store, StoreErrorKind, UsageErrorKind, Value,
    try_outcome,
};
use docmodel_mapping::{
    ChangeTracking, MappingId, MappingRegistry, ObjectRef, ObjectValue, PropertyFlags,
    ReadContext, Reference, Relation, ResolvedSegment, WalkResult,
};
use docmodel_query::{Query, QueryDefinition, QueryExecutor, QueryKind, QueryResult};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

// ============================================================================
// Session Configuration
// ============================================================================

/// Tuning knobs for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Callbacks `each` runs at the same time.
    pub each_concurrency: usize,
    /// Documents `each` hydrates per chunk when the query sets no batch size.
    pub each_chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            each_concurrency: 4,
            each_chunk_size: 100,
        }
    }
}

// ============================================================================
// Entity State
// ============================================================================

/// Lifecycle state of an entity relative to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Saved but never written; the next flush inserts it.
    New,
    /// Tracked and written (or loaded); the next flush writes its changes.
    Managed,
    /// Scheduled for removal on the next flush.
    Removed,
    /// Not tracked by this session.
    Detached,
}

/// What the next flush would write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub new: usize,
    pub dirty: usize,
    pub removed: usize,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.new + self.dirty + self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[derive(Debug)]
struct TrackedEntity {
    object: ObjectRef,
    /// Concrete entity mapping
    mapping: MappingId,
    root: MappingId,
    /// Identifier the entity was registered under
    id: Value,
    state: EntityState,
    /// Document as last read or written; `None` when never seen in the store
    original: Option<Document>,
    /// Object revision matching `original`
    revision: u64,
    /// Saved explicitly since the last flush
    flagged: bool,
}

#[derive(Debug)]
enum ScheduledOp {
    Flush,
    Refresh(ObjectRef),
    Fetch(ObjectRef, Vec<String>),
}

impl ScheduledOp {
    fn targets(&self, obj: &ObjectRef) -> bool {
        match self {
            ScheduledOp::Flush => false,
            ScheduledOp::Refresh(target) | ScheduledOp::Fetch(target, _) => target.ptr_eq(obj),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Unit of work over one store.
///
/// Not shared between tasks: every operation takes `&mut self`, so pending
/// work always runs in the order it was submitted.
pub struct Session<S: Store> {
    store: S,
    registry: Arc<MappingRegistry>,
    config: SessionConfig,
    identity_map: IdentityMap,
    /// Tracked entities by object address, in registration order
    tracked: IndexMap<usize, TrackedEntity>,
    table_keys: TableKeys,
    /// Persisters by inheritance root
    persisters: HashMap<MappingId, Persister<S::Collection>>,
    scheduled: VecDeque<ScheduledOp>,
}

impl<S: Store> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("tracked", &self.tracked.len())
            .field("identity_map", &self.identity_map.len())
            .field("scheduled", &self.scheduled.len())
            .finish_non_exhaustive()
    }
}

impl<S: Store> Session<S> {
    pub fn new(store: S, registry: Arc<MappingRegistry>, config: SessionConfig) -> Self {
        Self {
            store,
            registry,
            config,
            identity_map: IdentityMap::new(),
            tracked: IndexMap::new(),
            table_keys: TableKeys::new(),
            persisters: HashMap::new(),
            scheduled: VecDeque::new(),
        }
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persister for the hierarchy `mapping` belongs to, created on first use.
    fn persister(&mut self, mapping: MappingId) -> Result<Persister<S::Collection>> {
        let root = self.registry.root_of(mapping);
        if let Some(persister) = self.persisters.get(&root) {
            return Ok(persister.clone());
        }
        let Some(entity) = self.registry.entity(root) else {
            return Err(Error::usage(
                UsageErrorKind::NotEntity,
                format!("Mapping {} is not an entity.", mapping),
            ));
        };
        let collection = self.store.collection(entity.collection_name());
        let persister = Persister::new(Arc::clone(&self.registry), root, collection, &self.config)?;
        tracing::debug!(root = %root, collection = entity.collection_name(), "Created persister");
        self.persisters.insert(root, persister.clone());
        Ok(persister)
    }

    // ==================== Tracking ====================

    fn entry(&self, obj: &ObjectRef) -> Option<&TrackedEntity> {
        self.tracked
            .get(&obj.addr())
            .filter(|entry| entry.object.ptr_eq(obj))
    }

    fn entry_mut(&mut self, obj: &ObjectRef) -> Option<&mut TrackedEntity> {
        self.tracked
            .get_mut(&obj.addr())
            .filter(|entry| entry.object.ptr_eq(obj))
    }

    fn track(
        &mut self,
        obj: &ObjectRef,
        mapping: MappingId,
        state: EntityState,
        original: Option<Document>,
    ) -> Result<()> {
        let root = self.registry.root_of(mapping);
        let id = obj.id().unwrap_or(Value::Null);
        if let Some(existing) = self.identity_map.insert(root, &id, obj) {
            return Err(Error::usage(
                UsageErrorKind::DuplicateIdentity,
                format!(
                    "Another instance of '{}' with identifier {} is already managed.",
                    existing.class().unwrap_or_default(),
                    id
                ),
            ));
        }
        self.table_keys.key_of(obj);
        self.tracked.insert(
            obj.addr(),
            TrackedEntity {
                object: obj.clone(),
                mapping,
                root,
                id,
                state,
                original,
                revision: obj.revision(),
                flagged: false,
            },
        );
        Ok(())
    }

    fn untrack(&mut self, obj: &ObjectRef) -> Option<TrackedEntity> {
        self.entry(obj)?;
        let entry = self.tracked.shift_remove(&obj.addr())?;
        self.identity_map.remove(entry.root, &entry.id, obj);
        self.table_keys.release(obj);
        self.scheduled.retain(|op| !op.targets(obj));
        Some(entry)
    }

    /// Whether a tracked entity would be written by the next flush.
    fn needs_write(&self, entry: &TrackedEntity) -> Result<bool> {
        let Some(original) = &entry.original else {
            return Ok(true);
        };
        match self.change_tracking(entry.mapping) {
            ChangeTracking::DeferredImplicit => {
                persister::differs_from(&self.registry, &entry.object, original)
            }
            ChangeTracking::DeferredExplicit => Ok(entry.flagged
                && persister::differs_from(&self.registry, &entry.object, original)?),
            ChangeTracking::Observe => Ok(entry.object.revision() != entry.revision),
        }
    }

    fn change_tracking(&self, mapping: MappingId) -> ChangeTracking {
        self.registry
            .entity(mapping)
            .map_or(ChangeTracking::DeferredImplicit, |entity| entity.change_tracking())
    }

    /// Replace a field without making the owner look modified.
    fn replace_field(&mut self, owner: &ObjectRef, name: &str, value: ObjectValue) {
        let before = owner.revision();
        owner.set(name, value);
        if let Some(entry) = self.entry_mut(owner) {
            if entry.revision == before {
                entry.revision = owner.revision();
            }
        }
    }

    // ==================== Queries about entities ====================

    /// Whether the session tracks this exact instance, in any state.
    pub fn contains(&self, entity: &ObjectRef) -> bool {
        self.entry(entity).is_some()
    }

    pub fn state(&self, entity: &ObjectRef) -> EntityState {
        self.entry(entity).map_or(EntityState::Detached, |entry| entry.state)
    }

    /// Identifier of a tracked entity.
    pub fn get_id(&self, entity: &ObjectRef) -> Option<Value> {
        self.entry(entity).map(|entry| entry.id.clone())
    }

    /// Whether a tracked entity has changes the store does not have.
    ///
    /// New and removed entities are always dirty. For managed ones the
    /// mapped fields are compared against the last-known document, except
    /// under observed change tracking where any modification counts.
    pub fn is_dirty(&self, entity: &ObjectRef) -> Result<bool> {
        let Some(entry) = self.entry(entity) else {
            return Err(not_managed(entity));
        };
        match (entry.state, &entry.original) {
            (EntityState::New | EntityState::Removed, _) | (_, None) => Ok(true),
            (_, Some(original)) => match self.change_tracking(entry.mapping) {
                ChangeTracking::Observe => Ok(entity.revision() != entry.revision),
                _ => persister::differs_from(&self.registry, entity, original),
            },
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Counts of what the next flush would insert, update and remove.
    pub fn pending_counts(&self) -> Result<PendingCounts> {
        let mut counts = PendingCounts::default();
        for entry in self.tracked.values() {
            match entry.state {
                EntityState::New => counts.new += 1,
                EntityState::Removed => counts.removed += 1,
                EntityState::Managed => {
                    if self.needs_write(entry)? {
                        counts.dirty += 1;
                    }
                }
                EntityState::Detached => {}
            }
        }
        Ok(counts)
    }

    // ==================== Save / Remove / Detach ====================

    /// Make an entity, and everything it cascades saves to, managed.
    ///
    /// Entities without an identifier get a generated one and are inserted
    /// on the next flush. Entities that already carry an identifier are
    /// upserted. Saving a removed entity cancels the removal. Nothing is
    /// registered when any reached entity is invalid.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(class = ?entity.class()))]
    pub fn save(&mut self, entity: &ObjectRef) -> Result<()> {
        self.registry.entity_for_object(entity)?;
        let mut walk = WalkResult::new();
        self.registry.walk_entity(
            entity,
            PropertyFlags::CASCADE_SAVE | PropertyFlags::WALK_ENTITIES,
            &mut walk,
        );
        for obj in &walk.entities {
            self.check_saveable(obj)?;
        }
        for obj in &walk.entities {
            self.register(obj)?;
        }
        tracing::debug!(entities = walk.entities.len(), "Saved");
        Ok(())
    }

    fn check_saveable(&self, obj: &ObjectRef) -> Result<()> {
        if self.entry(obj).is_some() {
            return Ok(());
        }
        let mapping = self.registry.entity_for_object(obj)?;
        let root = self.registry.root_of(mapping);
        match obj.id().filter(|id| !id.is_null()) {
            None if obj.is_sealed() => Err(Error::usage(
                UsageErrorKind::NotExtensible,
                format!(
                    "Cannot set identifier on non-extensible object of class '{}'.",
                    obj.class().unwrap_or_default()
                ),
            )),
            None => Ok(()),
            Some(id) => {
                let valid = self
                    .registry
                    .entity(root)
                    .is_some_and(|entity| entity.identity().validate(&id));
                if !valid {
                    return Err(Error::usage(
                        UsageErrorKind::InvalidIdentifier,
                        format!("Invalid identifier {} for class '{}'.", id, obj.class().unwrap_or_default()),
                    ));
                }
                match self.identity_map.get(root, &id) {
                    Some(existing) if !existing.ptr_eq(obj) => Err(Error::usage(
                        UsageErrorKind::DuplicateIdentity,
                        format!(
                            "Another instance of '{}' with identifier {} is already managed.",
                            existing.class().unwrap_or_default(),
                            id
                        ),
                    )),
                    _ => Ok(()),
                }
            }
        }
    }

    /// Register one entity without cascading.
    fn register(&mut self, obj: &ObjectRef) -> Result<()> {
        if let Some(entry) = self.entry_mut(obj) {
            if entry.state == EntityState::Removed {
                entry.state = EntityState::Managed;
            }
            entry.flagged = true;
            return Ok(());
        }
        let mapping = self.registry.entity_for_object(obj)?;
        let state = if obj.id().is_some_and(|id| !id.is_null()) {
            EntityState::Managed
        } else {
            let root = self.registry.root_of(mapping);
            let Some(entity) = self.registry.entity(root) else {
                return Err(not_managed(obj));
            };
            obj.set_id(entity.identity().generate())?;
            EntityState::New
        };
        self.track(obj, mapping, state, None)?;
        if let Some(entry) = self.entry_mut(obj) {
            entry.flagged = true;
        }
        Ok(())
    }

    /// Schedule a managed entity, and what it cascades removes to, for removal.
    ///
    /// Entities never written are simply forgotten. Removing an entity this
    /// session does not track is a no-op.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(class = ?entity.class()))]
    pub fn remove(&mut self, entity: &ObjectRef) -> Result<()> {
        self.registry.entity_for_object(entity)?;
        if self.entry(entity).is_none() {
            tracing::debug!("Entity is not tracked; nothing to remove");
            return Ok(());
        }
        let mut walk = WalkResult::new();
        self.registry.walk_entity(
            entity,
            PropertyFlags::CASCADE_REMOVE | PropertyFlags::ORPHAN_REMOVAL | PropertyFlags::WALK_ENTITIES,
            &mut walk,
        );
        for obj in &walk.entities {
            match self.entry(obj).map(|entry| entry.state) {
                Some(EntityState::New) => {
                    self.untrack(obj);
                }
                Some(EntityState::Managed) => {
                    if let Some(entry) = self.entry_mut(obj) {
                        entry.state = EntityState::Removed;
                        entry.flagged = false;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Stop tracking an entity and whatever it cascades detaches to.
    ///
    /// Pending changes of detached entities are discarded.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(class = ?entity.class()))]
    pub fn detach(&mut self, entity: &ObjectRef) -> Result<()> {
        self.registry.entity_for_object(entity)?;
        let mut walk = WalkResult::new();
        self.registry.walk_entity(
            entity,
            PropertyFlags::CASCADE_DETACH | PropertyFlags::WALK_ENTITIES,
            &mut walk,
        );
        let detached = walk
            .entities
            .iter()
            .filter(|obj| self.untrack(obj).is_some())
            .count();
        tracing::debug!(detached, "Detached");
        Ok(())
    }

    /// Forget every tracked entity and pending operation.
    pub fn clear(&mut self) {
        self.tracked.clear();
        self.identity_map.clear();
        self.table_keys.clear();
        self.scheduled.clear();
    }

    // ==================== Loading ====================

    /// Reference to an entity that need not be loaded.
    ///
    /// Returns the managed instance when there is one, otherwise an
    /// unresolved [`Reference`].
    pub fn get_reference(&self, class: &str, id: impl Into<Value>) -> Result<ObjectValue> {
        let mapping = self.registry.entity_by_class(class)?;
        let root = self.registry.root_of(mapping);
        let id = id.into();
        if let Some(managed) = self.identity_map.get(root, &id) {
            return Ok(ObjectValue::Object(managed));
        }
        Ok(ObjectValue::Reference(Reference::new(mapping, root, id)))
    }

    /// Start a query for `class`.
    pub fn query(&mut self, class: &str) -> Result<Query<'_, Self>> {
        let mapping = self.registry.entity_by_class(class)?;
        Ok(Query::new(self, mapping))
    }

    /// Load one entity by identifier, consulting the identity map first.
    #[tracing::instrument(level = "debug", skip(self, cx, id))]
    pub async fn find(
        &mut self,
        cx: &Cx,
        class: &str,
        id: impl Into<Value>,
    ) -> Outcome<Option<ObjectRef>, Error> {
        let id = id.into();
        let mapping = try_outcome!(result: self.registry.entity_by_class(class));
        let root = self.registry.root_of(mapping);
        if let Some(managed) = self.identity_map.get(root, &id) {
            let compatible = self
                .entry(&managed)
                .is_some_and(|entry| self.registry.descendants(mapping).contains(&entry.mapping));
            return Outcome::Ok(compatible.then_some(managed));
        }
        let persister = try_outcome!(result: self.persister(mapping));
        let document = try_outcome!(persister.find_one_by_id(cx, mapping, &id).await);
        match document {
            Some(document) => {
                let entity = try_outcome!(result: self.hydrate(mapping, &document, false));
                Outcome::Ok(Some(entity))
            }
            None => Outcome::Ok(None),
        }
    }

    /// Turn a stored document into a managed entity.
    ///
    /// An already managed instance with the same identity is returned as is,
    /// or re-read from the document when `overwrite` is set.
    fn hydrate(&mut self, mapping: MappingId, document: &Document, overwrite: bool) -> Result<ObjectRef> {
        let root = self.registry.root_of(mapping);
        if let Some(id) = document.get("_id").filter(|id| !id.is_null()) {
            if let Some(existing) = self.identity_map.get(root, id) {
                if overwrite {
                    let concrete = self.entry(&existing).map_or(mapping, |entry| entry.mapping);
                    self.read_into_managed(concrete, document, &existing)?;
                }
                return Ok(existing);
            }
        }
        let registry = Arc::clone(&self.registry);
        let mut ctx = ReadContext::new(&registry).with_source(&self.identity_map);
        let entity = registry.read_document(&mut ctx, mapping, document);
        let Some(entity) = ctx.finish(entity)? else {
            return Err(Error::usage(
                UsageErrorKind::NotEntity,
                format!("Mapping {} cannot read documents.", mapping),
            ));
        };
        let concrete = registry.entity_for_object(&entity)?;
        self.track(&entity, concrete, EntityState::Managed, Some(document.clone()))?;
        tracing::trace!(class = ?entity.class(), "Hydrated entity");
        Ok(entity)
    }

    fn read_into_managed(&mut self, mapping: MappingId, document: &Document, target: &ObjectRef) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let mut ctx = ReadContext::new(&registry).with_source(&self.identity_map);
        registry.read_into(&mut ctx, mapping, document, target);
        ctx.finish(())?;
        if let Some(entry) = self.entry_mut(target) {
            entry.original = Some(document.clone());
            entry.revision = target.revision();
            entry.flagged = false;
        }
        Ok(())
    }

    /// Reload a managed entity, and what it cascades refreshes to, from the store.
    ///
    /// Local changes are overwritten. An entity missing from the store fails
    /// with `NotFound`.
    #[tracing::instrument(level = "debug", skip(self, cx, entity), fields(class = ?entity.class()))]
    pub async fn refresh(&mut self, cx: &Cx, entity: &ObjectRef) -> Outcome<(), Error> {
        if self.entry(entity).is_none() {
            return Outcome::Err(not_managed(entity));
        }
        let mut walk = WalkResult::new();
        self.registry.walk_entity(
            entity,
            PropertyFlags::CASCADE_REFRESH | PropertyFlags::WALK_ENTITIES,
            &mut walk,
        );
        for obj in &walk.entities {
            let Some(mapping) = self.entry(obj).map(|entry| entry.mapping) else {
                continue;
            };
            let persister = try_outcome!(result: self.persister(mapping));
            let document = try_outcome!(persister.refresh_document(cx, obj).await);
            let Some(document) = document else {
                return Outcome::Err(Error::store(
                    StoreErrorKind::NotFound,
                    format!(
                        "Refresh failed: no document with identifier {} in '{}'.",
                        obj.id().unwrap_or(Value::Null),
                        persister.collection().name()
                    ),
                ));
            };
            try_outcome!(result: self.read_into_managed(mapping, &document, obj));
        }
        Outcome::Ok(())
    }

    // ==================== Fetch ====================

    /// Resolve property paths on an entity.
    ///
    /// Every path is validated before anything is loaded. References along a
    /// path are replaced with managed entities and inverse sides are filled
    /// in by querying the owning side; already resolved values are kept.
    #[tracing::instrument(level = "debug", skip_all, fields(paths = paths.len()))]
    pub async fn fetch<P: AsRef<str> + Sync>(
        &mut self,
        cx: &Cx,
        entity: &ObjectRef,
        paths: &[P],
    ) -> Outcome<(), Error> {
        if paths.is_empty() {
            return Outcome::Ok(());
        }
        let mapping = try_outcome!(result: self.registry.entity_for_object(entity));
        let mut resolved = Vec::with_capacity(paths.len());
        for path in paths {
            resolved.push(try_outcome!(result: self.registry.resolve_path(mapping, path.as_ref())));
        }
        for segments in &resolved {
            try_outcome!(self.fetch_segments(cx, entity, segments).await);
        }
        Outcome::Ok(())
    }

    async fn fetch_segments(
        &mut self,
        cx: &Cx,
        entity: &ObjectRef,
        segments: &[ResolvedSegment],
    ) -> Outcome<(), Error> {
        let mut owners = vec![entity.clone()];
        for segment in segments {
            let mut next = Vec::new();
            for owner in &owners {
                match segment.relation {
                    Relation::Value => {}
                    Relation::Embedded => {
                        if let Some(value) = owner.get(segment.property.name()) {
                            collect_objects(&value, &mut next);
                        }
                    }
                    Relation::Reference => {
                        try_outcome!(self.resolve_references(cx, owner, segment, &mut next).await);
                    }
                    Relation::Inverse => {
                        try_outcome!(self.resolve_inverse(cx, owner, segment, &mut next).await);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            owners = next;
        }
        Outcome::Ok(())
    }

    async fn resolve_references(
        &mut self,
        cx: &Cx,
        owner: &ObjectRef,
        segment: &ResolvedSegment,
        next: &mut Vec<ObjectRef>,
    ) -> Outcome<(), Error> {
        let name = segment.property.name();
        let Some(value) = owner.get(name) else {
            return Outcome::Ok(());
        };
        let (resolved, changed) = match value {
            ObjectValue::Reference(reference) => {
                match try_outcome!(self.resolve_reference(cx, &reference).await) {
                    Some(entity) => (ObjectValue::Object(entity), true),
                    None => (ObjectValue::Reference(reference), false),
                }
            }
            ObjectValue::Array(items) => {
                let mut changed = false;
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        ObjectValue::Reference(reference) => {
                            match try_outcome!(self.resolve_reference(cx, &reference).await) {
                                Some(entity) => {
                                    changed = true;
                                    resolved.push(ObjectValue::Object(entity));
                                }
                                None => resolved.push(ObjectValue::Reference(reference)),
                            }
                        }
                        other => resolved.push(other),
                    }
                }
                (ObjectValue::Array(resolved), changed)
            }
            other => (other, false),
        };
        collect_objects(&resolved, next);
        if changed {
            self.replace_field(owner, name, resolved);
        }
        Outcome::Ok(())
    }

    async fn resolve_reference(
        &mut self,
        cx: &Cx,
        reference: &Reference,
    ) -> Outcome<Option<ObjectRef>, Error> {
        if let Some(managed) = self.identity_map.get(reference.root(), reference.id()) {
            return Outcome::Ok(Some(managed));
        }
        let persister = try_outcome!(result: self.persister(reference.mapping()));
        let document = try_outcome!(
            persister
                .find_one_by_id(cx, reference.root(), reference.id())
                .await
        );
        let Some(document) = document else {
            tracing::debug!(id = %reference.id(), "Referenced document not found");
            return Outcome::Ok(None);
        };
        let entity = try_outcome!(result: self.hydrate(reference.mapping(), &document, false));
        Outcome::Ok(Some(entity))
    }

    async fn resolve_inverse(
        &mut self,
        cx: &Cx,
        owner: &ObjectRef,
        segment: &ResolvedSegment,
        next: &mut Vec<ObjectRef>,
    ) -> Outcome<(), Error> {
        let name = segment.property.name();
        if let Some(existing) = owner.get(name).filter(|value| !matches!(value, ObjectValue::Null)) {
            collect_objects(&existing, next);
            return Outcome::Ok(());
        }
        let Some(owner_id) = owner.id() else {
            return Outcome::Ok(());
        };
        let field = segment.property.inverse_of().and_then(|owning| {
            self.registry
                .get(segment.target)
                .as_object()
                .and_then(|object| object.property(owning))
                .map(|property| property.field().to_string())
        });
        let Some(field) = field else {
            return Outcome::Ok(());
        };
        let persister = try_outcome!(result: self.persister(segment.target));
        let value = if segment.many {
            let documents = try_outcome!(
                persister
                    .find_inverse_of(cx, segment.target, &field, &owner_id)
                    .await
            );
            let mut items = Vec::with_capacity(documents.len());
            for document in &documents {
                let entity = try_outcome!(result: self.hydrate(segment.target, document, false));
                items.push(ObjectValue::Object(entity));
            }
            ObjectValue::Array(items)
        } else {
            let document = try_outcome!(
                persister
                    .find_one_inverse_of(cx, segment.target, &field, &owner_id)
                    .await
            );
            match document {
                Some(document) => ObjectValue::Object(try_outcome!(
                    result: self.hydrate(segment.target, &document, false)
                )),
                None => ObjectValue::Null,
            }
        };
        collect_objects(&value, next);
        self.replace_field(owner, name, value);
        Outcome::Ok(())
    }

    // ==================== Merge ====================

    /// Copy the state of a detached graph onto managed instances.
    ///
    /// Each entity reached through merge cascades is matched to its managed
    /// counterpart: the instance in the identity map, one loaded from the
    /// store, or the entity itself, saved, when neither exists. Stored
    /// properties are then copied over with entity values swapped for their
    /// counterparts. Returns the managed counterpart of `entity`.
    #[tracing::instrument(level = "debug", skip(self, cx, entity), fields(class = ?entity.class()))]
    pub async fn merge(&mut self, cx: &Cx, entity: &ObjectRef) -> Outcome<ObjectRef, Error> {
        try_outcome!(result: self.registry.entity_for_object(entity));
        let mut walk = WalkResult::new();
        self.registry.walk_entity(
            entity,
            PropertyFlags::CASCADE_MERGE | PropertyFlags::WALK_ENTITIES,
            &mut walk,
        );
        let mut counterparts: HashMap<usize, ObjectRef> = HashMap::new();
        for obj in &walk.entities {
            let managed = try_outcome!(self.managed_counterpart(cx, obj).await);
            counterparts.insert(obj.addr(), managed);
        }
        for obj in &walk.entities {
            let Some(managed) = counterparts.get(&obj.addr()) else {
                continue;
            };
            if !managed.ptr_eq(obj) {
                self.copy_state(obj, managed, &counterparts);
            }
        }
        let merged = counterparts
            .get(&entity.addr())
            .cloned()
            .unwrap_or_else(|| entity.clone());
        Outcome::Ok(merged)
    }

    async fn managed_counterpart(&mut self, cx: &Cx, obj: &ObjectRef) -> Outcome<ObjectRef, Error> {
        if self.entry(obj).is_some() {
            return Outcome::Ok(obj.clone());
        }
        let mapping = try_outcome!(result: self.registry.entity_for_object(obj));
        let root = self.registry.root_of(mapping);
        if let Some(id) = obj.id().filter(|id| !id.is_null()) {
            if let Some(managed) = self.identity_map.get(root, &id) {
                return Outcome::Ok(managed);
            }
            let persister = try_outcome!(result: self.persister(mapping));
            let document = try_outcome!(persister.find_one_by_id(cx, root, &id).await);
            if let Some(document) = document {
                let managed = try_outcome!(result: self.hydrate(mapping, &document, false));
                return Outcome::Ok(managed);
            }
        }
        try_outcome!(result: self.check_saveable(obj));
        try_outcome!(result: self.register(obj));
        Outcome::Ok(obj.clone())
    }

    fn copy_state(&mut self, source: &ObjectRef, target: &ObjectRef, counterparts: &HashMap<usize, ObjectRef>) {
        let mapping = self
            .entry(target)
            .map(|entry| entry.mapping)
            .or_else(|| self.registry.entity_for_object(target).ok());
        let Some(object) = mapping.and_then(|mapping| self.registry.get(mapping).as_object()) else {
            return;
        };
        for property in object.stored_properties() {
            match source.get(property.name()) {
                Some(value) => target.set(property.name(), substitute(&value, counterparts)),
                None => {
                    target.unset(property.name());
                }
            }
        }
        if let Some(entry) = self.entry_mut(target) {
            entry.flagged = true;
        }
    }

    // ==================== Flush ====================

    /// Write every pending change.
    ///
    /// Scheduled operations run first, in order. Then one command per entity
    /// hierarchy is executed. Operations the store applied take effect even
    /// when others in the same command fail; the failed ones keep their
    /// pending state for the next flush. The first error is returned after
    /// every command has been attempted.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(tracked = self.tracked.len()))]
    pub async fn flush(&mut self, cx: &Cx) -> Outcome<(), Error> {
        try_outcome!(self.run_scheduled(cx).await);
        self.flush_pending(cx).await
    }

    async fn flush_pending(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let batch = try_outcome!(result: self.build_batch());
        // Addresses of entities whose operation is still pending
        let mut unapplied = HashSet::new();
        let mut first_error = None;
        if batch.is_empty() {
            tracing::trace!("Nothing to flush");
        }
        for mut command in batch.into_commands() {
            let persister = try_outcome!(result: self.persister(command.persister()));
            let report = match persister.resolve_upserts(cx, &mut command).await {
                Outcome::Ok(()) => persister.execute_command(cx, &command).await,
                Outcome::Err(e) => Outcome::Err(e),
                Outcome::Cancelled(reason) => Outcome::Cancelled(reason),
                Outcome::Panicked(payload) => Outcome::Panicked(payload),
            };
            match report {
                Outcome::Ok(report) => {
                    self.apply_command(&command, &report);
                    unapplied.extend(
                        command
                            .operations()
                            .enumerate()
                            .filter(|(position, _)| !report.applied(*position))
                            .map(|(_, op)| op.entity.addr()),
                    );
                    if let Some(e) = report.error {
                        tracing::warn!(
                            collection = persister.collection().name(),
                            failed = report.failed.len(),
                            error = %e,
                            "Flush command partially failed"
                        );
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
                Outcome::Err(e) => {
                    tracing::warn!(
                        collection = persister.collection().name(),
                        error = %e,
                        "Flush command failed"
                    );
                    unapplied.extend(command.operations().map(|op| op.entity.addr()));
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Outcome::Cancelled(reason) => return Outcome::Cancelled(reason),
                Outcome::Panicked(payload) => return Outcome::Panicked(payload),
            }
        }
        for (addr, entry) in &mut self.tracked {
            if !unapplied.contains(addr) {
                entry.flagged = false;
            }
        }
        match first_error {
            Some(e) => Outcome::Err(e),
            None => Outcome::Ok(()),
        }
    }

    fn build_batch(&mut self) -> Result<Batch> {
        let mut batch = Batch::new();
        let addresses: Vec<usize> = self.tracked.keys().copied().collect();
        for addr in addresses {
            let Some(entry) = self.tracked.get(&addr) else {
                continue;
            };
            let object = entry.object.clone();
            let mapping = entry.mapping;
            let state = entry.state;
            let original = entry.original.clone();
            let revision = entry.revision;
            let flagged = entry.flagged;

            let persister = self.persister(mapping)?;
            let key = self.table_keys.key_of(&object);
            match (state, original) {
                (EntityState::New, _) => {
                    persister.add_insert(&mut batch, key, &object)?;
                }
                (EntityState::Removed, _) => persister.add_remove(&mut batch, key, &object)?,
                (EntityState::Managed, None) => {
                    persister.add_upsert(&mut batch, key, &object)?;
                }
                (EntityState::Managed, Some(original)) => match self.change_tracking(mapping) {
                    ChangeTracking::DeferredImplicit => {
                        persister.dirty_check(&mut batch, key, &object, &original)?;
                    }
                    ChangeTracking::DeferredExplicit => {
                        if flagged {
                            persister.dirty_check(&mut batch, key, &object, &original)?;
                        }
                    }
                    ChangeTracking::Observe => {
                        if object.revision() != revision {
                            persister.add_update(&mut batch, key, &object, &original)?;
                        }
                    }
                },
                (EntityState::Detached, _) => {}
            }
        }
        Ok(batch)
    }

    /// Record the operations of `command` the store applied.
    fn apply_command(&mut self, command: &Command, report: &CommandReport) {
        for (position, operation) in command.operations().enumerate() {
            if !report.applied(position) {
                continue;
            }
            match operation.kind {
                OperationKind::Remove => {
                    self.untrack(&operation.entity);
                }
                OperationKind::Insert | OperationKind::Update | OperationKind::Upsert => {
                    if let Some(entry) = self.entry_mut(&operation.entity) {
                        entry.state = EntityState::Managed;
                        entry.original.clone_from(&operation.document);
                        entry.revision = operation.entity.revision();
                        entry.flagged = false;
                    }
                }
            }
        }
        tracing::debug!(
            persister = %command.persister(),
            inserted = command.count(OperationKind::Insert),
            updated = command.count(OperationKind::Update) + command.count(OperationKind::Upsert),
            removed = command.count(OperationKind::Remove),
            failed = report.failed.len(),
            "Applied flush command"
        );
    }

    // ==================== Scheduling ====================

    /// Queue a flush to run on the next [`wait`](Self::wait).
    pub fn schedule_flush(&mut self) {
        self.scheduled.push_back(ScheduledOp::Flush);
    }

    /// Queue a refresh of a managed entity.
    pub fn schedule_refresh(&mut self, entity: &ObjectRef) -> Result<()> {
        if self.entry(entity).is_none() {
            return Err(not_managed(entity));
        }
        self.scheduled.push_back(ScheduledOp::Refresh(entity.clone()));
        Ok(())
    }

    /// Queue a fetch of property paths on an entity.
    pub fn schedule_fetch<P: Into<String>>(
        &mut self,
        entity: &ObjectRef,
        paths: impl IntoIterator<Item = P>,
    ) -> Result<()> {
        let mapping = self.registry.entity_for_object(entity)?;
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        for path in &paths {
            self.registry.resolve_path(mapping, path)?;
        }
        self.scheduled.push_back(ScheduledOp::Fetch(entity.clone(), paths));
        Ok(())
    }

    /// Run every queued operation in submission order.
    ///
    /// All queued operations are attempted; the first error is returned.
    pub async fn wait(&mut self, cx: &Cx) -> Outcome<(), Error> {
        self.run_scheduled(cx).await
    }

    async fn run_scheduled(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let mut first_error = None;
        while let Some(op) = self.scheduled.pop_front() {
            let outcome = match op {
                ScheduledOp::Flush => self.flush_pending(cx).await,
                ScheduledOp::Refresh(entity) => self.refresh(cx, &entity).await,
                ScheduledOp::Fetch(entity, paths) => self.fetch(cx, &entity, &paths).await,
            };
            match outcome {
                Outcome::Ok(()) => {}
                Outcome::Err(e) => {
                    tracing::debug!(error = %e, "Scheduled operation failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Outcome::Cancelled(reason) => return Outcome::Cancelled(reason),
                Outcome::Panicked(payload) => return Outcome::Panicked(payload),
            }
        }
        match first_error {
            Some(e) => Outcome::Err(e),
            None => Outcome::Ok(()),
        }
    }

    /// Flush pending work, then forget everything.
    pub async fn close(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let outcome = self.flush(cx).await;
        if matches!(outcome, Outcome::Ok(())) {
            self.clear();
        }
        outcome
    }

    async fn run_query(&mut self, cx: &Cx, definition: QueryDefinition) -> Outcome<QueryResult, Error> {
        let mapping = definition.mapping;
        for path in &definition.fetch_paths {
            try_outcome!(result: self.registry.resolve_path(mapping, path));
        }
        let kind = definition.kind;
        let persister = try_outcome!(result: self.persister(mapping));
        let result = try_outcome!(persister.execute_query(cx, self, definition).await);
        if kind == Some(QueryKind::FindOneAndRemove) {
            if let QueryResult::Entity(Some(entity)) = &result {
                self.untrack(entity);
            }
        }
        Outcome::Ok(result)
    }
}

// ============================================================================
// Executor seams
// ============================================================================

impl<S: Store> QueryExecutor for Session<S> {
    fn execute_query(
        &mut self,
        cx: &Cx,
        definition: QueryDefinition,
    ) -> impl Future<Output = Outcome<QueryResult, Error>> + Send {
        self.run_query(cx, definition)
    }
}

impl<S: Store> EntityLoader for Session<S> {
    fn load(
        &mut self,
        cx: &Cx,
        mapping: MappingId,
        documents: Vec<Document>,
        fetch_paths: &[String],
        overwrite: bool,
    ) -> impl Future<Output = Outcome<Vec<ObjectRef>, Error>> + Send {
        async move {
            let mut entities = Vec::with_capacity(documents.len());
            for document in &documents {
                entities.push(try_outcome!(result: self.hydrate(mapping, document, overwrite)));
            }
            for entity in &entities {
                try_outcome!(self.fetch(cx, entity, fetch_paths).await);
            }
            Outcome::Ok(entities)
        }
    }
}

fn not_managed(entity: &ObjectRef) -> Error {
    Error::usage(
        UsageErrorKind::NotManaged,
        format!(
            "Object of class '{}' is not managed by this session.",
            entity.class().unwrap_or_default()
        ),
    )
}

/// Entities reachable at the top of a value, without duplicates.
fn collect_objects(value: &ObjectValue, out: &mut Vec<ObjectRef>) {
    match value {
        ObjectValue::Object(obj) => {
            if !out.iter().any(|seen| seen.ptr_eq(obj)) {
                out.push(obj.clone());
            }
        }
        ObjectValue::Array(items) => {
            for item in items {
                collect_objects(item, out);
            }
        }
        _ => {}
    }
}

fn substitute(value: &ObjectValue, counterparts: &HashMap<usize, ObjectRef>) -> ObjectValue {
    match value {
        ObjectValue::Object(obj) => counterparts
            .get(&obj.addr())
            .map_or_else(|| value.clone(), |managed| ObjectValue::Object(managed.clone())),
        ObjectValue::Array(items) => {
            ObjectValue::Array(items.iter().map(|item| substitute(item, counterparts)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;
    use docmodel_core::{Cursor, WriteModel, doc};
    use docmodel_mapping::{ClassDef, IdentityKind, MappingBuilder, MappingConfig, PropertyDef, TypeRef};
    use docmodel_memory::MemoryStore;
    use docmodel_query::EachIterator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => std::panic::panic_any(format!("unexpected outcome: {other:?}")),
        }
    }

    fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
        match outcome {
            Outcome::Err(e) => e,
            other => std::panic::panic_any(format!("expected an error, got: {other:?}")),
        }
    }

    fn registry(tracking: ChangeTracking) -> Arc<MappingRegistry> {
        let config = MappingConfig {
            identity: IdentityKind::Sequential,
            ..MappingConfig::default()
        };
        let registry = MappingBuilder::new(config)
            .add(
                ClassDef::entity("Person")
                    .collection("people")
                    .change_tracking(tracking)
                    .property(PropertyDef::new("name", TypeRef::String))
                    .property(PropertyDef::new("age", TypeRef::Number))
                    .property(
                        PropertyDef::new("parents", TypeRef::array(TypeRef::class("Person")))
                            .cascade(PropertyFlags::CASCADE_SAVE),
                    )
                    .property(
                        PropertyDef::new("children", TypeRef::array(TypeRef::class("Person")))
                            .inverse_of("parents"),
                    )
                    .property(
                        PropertyDef::new("pet", TypeRef::class("Animal"))
                            .cascade(PropertyFlags::CASCADE_ALL),
                    ),
            )
            .add(
                ClassDef::entity("Animal")
                    .collection("animals")
                    .property(PropertyDef::new("name", TypeRef::String)),
            )
            .add(
                ClassDef::entity("Dog")
                    .extends("Animal")
                    .property(PropertyDef::new("breed", TypeRef::String)),
            )
            .build()
            .expect("mappings build");
        Arc::new(registry)
    }

    fn session(tracking: ChangeTracking) -> Session<MemoryStore> {
        Session::new(MemoryStore::new(), registry(tracking), SessionConfig::default())
    }

    fn run<F: Future>(f: F) -> F::Output {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(f)
    }

    async fn stored(session: &Session<MemoryStore>, collection: &str, cx: &Cx) -> Vec<Document> {
        let mut cursor = session.store().collection(collection).find(Document::new());
        unwrap_outcome(cursor.to_array(cx).await)
    }

    #[test]
    fn save_generates_ids_and_flush_inserts() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let bob = ObjectRef::new("Person").with("name", "Bob").with("age", 40);

        session.save(&bob).expect("save");
        assert_eq!(session.state(&bob), EntityState::New);
        assert!(bob.id().is_some());
        assert_eq!(session.pending_counts().expect("counts").new, 1);

        run(async {
            unwrap_outcome(session.flush(&cx).await);
            let docs = stored(&session, "people", &cx).await;
            assert_eq!(docs.len(), 1);
            assert_eq!(docs[0].get("name"), Some(&Value::from("Bob")));
            assert_eq!(docs[0].get("__v"), Some(&Value::Int(1)));
        });
        assert_eq!(session.state(&bob), EntityState::Managed);
        assert!(session.pending_counts().expect("counts").is_empty());
    }

    #[test]
    fn save_cascades_and_rejects_invalid_graphs_without_registering() {
        let mut session = session(ChangeTracking::DeferredImplicit);
        let mom = ObjectRef::new("Person").with("name", "Alice");
        let bob = ObjectRef::new("Person")
            .with("name", "Bob")
            .with("parents", ObjectValue::Array(vec![ObjectValue::Object(mom.clone())]));
        session.save(&bob).expect("save");
        assert!(session.contains(&mom));

        let bad = ObjectRef::new("Person").with_id("not-a-number");
        let carol = ObjectRef::new("Person")
            .with("parents", ObjectValue::Array(vec![ObjectValue::Object(bad.clone())]));
        let err = session.save(&carol).expect_err("invalid id");
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::InvalidIdentifier));
        assert!(!session.contains(&carol));
        assert!(!session.contains(&bad));

        let sealed = ObjectRef::new("Person");
        sealed.seal();
        let err = session.save(&sealed).expect_err("sealed");
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::NotExtensible));
    }

    #[test]
    fn identity_map_returns_the_same_instance() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        run(async {
            let people = session.store().collection("people");
            let result = unwrap_outcome(
                people
                    .bulk_write(&cx, vec![WriteModel::InsertOne {
                        document: doc! { "_id" => 7, "name" => "Bob", "__v" => 1 },
                    }])
                    .await,
            );
            assert_eq!(result.inserted, 1);

            let first = unwrap_outcome(session.find(&cx, "Person", 7).await).expect("found");
            let second = unwrap_outcome(session.find(&cx, "Person", 7).await).expect("found");
            assert!(first.ptr_eq(&second));

            let mut query = session.query("Person").expect("query").find_one_by_id(7);
            let third = unwrap_outcome(query.execute(&cx).await).into_entity().expect("found");
            assert!(first.ptr_eq(&third));

            assert!(unwrap_outcome(session.find(&cx, "Animal", 7).await).is_none());
        });
    }

    #[test]
    fn dirty_check_is_idempotent() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let bob = ObjectRef::new("Person").with("name", "Bob");
        session.save(&bob).expect("save");
        run(async {
            unwrap_outcome(session.flush(&cx).await);
            assert!(!session.is_dirty(&bob).expect("tracked"));

            bob.set("age", 41);
            assert!(session.is_dirty(&bob).expect("tracked"));
            unwrap_outcome(session.flush(&cx).await);
            assert!(!session.is_dirty(&bob).expect("tracked"));
            unwrap_outcome(session.flush(&cx).await);

            let docs = stored(&session, "people", &cx).await;
            assert_eq!(docs[0].get("age"), Some(&Value::Int(41)));
            assert_eq!(docs[0].get("__v"), Some(&Value::Int(2)));
        });
    }

    #[test]
    fn explicit_tracking_writes_only_saved_entities() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredExplicit);
        let bob = ObjectRef::new("Person").with("name", "Bob");
        session.save(&bob).expect("save");
        run(async {
            unwrap_outcome(session.flush(&cx).await);
            bob.set("name", "Robert");
            assert_eq!(session.pending_counts().expect("counts").dirty, 0);
            unwrap_outcome(session.flush(&cx).await);
            let docs = stored(&session, "people", &cx).await;
            assert_eq!(docs[0].get("name"), Some(&Value::from("Bob")));

            session.save(&bob).expect("save again");
            assert_eq!(session.pending_counts().expect("counts").dirty, 1);
            unwrap_outcome(session.flush(&cx).await);
            let docs = stored(&session, "people", &cx).await;
            assert_eq!(docs[0].get("name"), Some(&Value::from("Robert")));
        });
    }

    #[test]
    fn remove_cascades_and_forgets_new_entities() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let rex = ObjectRef::new("Dog").with("name", "Rex").with("breed", "collie");
        let bob = ObjectRef::new("Person").with("name", "Bob").with("pet", rex.clone());
        session.save(&bob).expect("save");
        assert!(session.contains(&rex));

        run(async {
            unwrap_outcome(session.flush(&cx).await);
            assert_eq!(stored(&session, "animals", &cx).await[0].get("__t"), Some(&Value::from("Dog")));

            session.remove(&bob).expect("remove");
            assert_eq!(session.state(&bob), EntityState::Removed);
            assert_eq!(session.state(&rex), EntityState::Removed);
            session.remove(&bob).expect("second remove is a no-op");
            unwrap_outcome(session.flush(&cx).await);
            assert!(stored(&session, "people", &cx).await.is_empty());
            assert!(stored(&session, "animals", &cx).await.is_empty());
        });
        assert_eq!(session.tracked_count(), 0);

        let fresh = ObjectRef::new("Person");
        session.save(&fresh).expect("save");
        session.remove(&fresh).expect("remove");
        assert!(!session.contains(&fresh));
    }

    #[test]
    fn saving_a_removed_entity_cancels_the_removal() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let bob = ObjectRef::new("Person").with("name", "Bob");
        session.save(&bob).expect("save");
        run(async {
            unwrap_outcome(session.flush(&cx).await);
            session.remove(&bob).expect("remove");
            session.save(&bob).expect("save");
            assert_eq!(session.state(&bob), EntityState::Managed);
            unwrap_outcome(session.flush(&cx).await);
            assert_eq!(stored(&session, "people", &cx).await.len(), 1);
        });
    }

    #[test]
    fn detach_discards_pending_changes() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let bob = ObjectRef::new("Person").with("name", "Bob");
        session.save(&bob).expect("save");
        session.detach(&bob).expect("detach");
        assert_eq!(session.state(&bob), EntityState::Detached);
        run(async {
            unwrap_outcome(session.flush(&cx).await);
            assert!(stored(&session, "people", &cx).await.is_empty());
        });
        let err = session.is_dirty(&bob).expect_err("not managed");
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::NotManaged));
    }

    #[test]
    fn refresh_overwrites_local_changes() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let bob = ObjectRef::new("Person").with("name", "Bob");
        session.save(&bob).expect("save");
        run(async {
            unwrap_outcome(session.flush(&cx).await);
            bob.set("name", "Changed");
            unwrap_outcome(session.refresh(&cx, &bob).await);
            assert_eq!(bob.get("name").and_then(|v| v.as_str().map(str::to_string)), Some("Bob".into()));
            assert!(!session.is_dirty(&bob).expect("tracked"));

            let stranger = ObjectRef::new("Person");
            let err = expect_err(session.refresh(&cx, &stranger).await);
            assert_eq!(err.usage_kind(), Some(UsageErrorKind::NotManaged));
        });
    }

    #[test]
    fn entity_saved_with_unknown_id_is_inserted_at_version_one() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let bob = ObjectRef::new("Person").with_id(42).with("name", "Bob");
        session.save(&bob).expect("save");
        assert_eq!(session.state(&bob), EntityState::Managed);
        run(async {
            unwrap_outcome(session.flush(&cx).await);
            let docs = stored(&session, "people", &cx).await;
            assert_eq!(docs[0].get("_id"), Some(&Value::Int(42)));
            assert_eq!(docs[0].get("__v"), Some(&Value::Int(1)));
        });
        assert!(!session.is_dirty(&bob).expect("tracked"));

        let twin = ObjectRef::new("Person").with_id(42);
        let err = session.save(&twin).expect_err("duplicate");
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::DuplicateIdentity));
    }

    #[test]
    fn concurrent_modification_is_reported_as_conflict() {
        let cx = Cx::for_testing();
        let store = MemoryStore::new();
        let registry = registry(ChangeTracking::DeferredImplicit);
        let mut first = Session::new(store.clone(), Arc::clone(&registry), SessionConfig::default());
        let mut second = Session::new(store, registry, SessionConfig::default());
        let bob = ObjectRef::new("Person").with("name", "Bob");
        first.save(&bob).expect("save");
        run(async {
            unwrap_outcome(first.flush(&cx).await);
            let id = bob.id().expect("id");
            let other = unwrap_outcome(second.find(&cx, "Person", id).await).expect("found");

            other.set("name", "Robert");
            unwrap_outcome(second.flush(&cx).await);

            bob.set("name", "Bobby");
            let err = expect_err(first.flush(&cx).await);
            match err {
                Error::Conflict(conflict) => {
                    assert_eq!(conflict.collection, "people");
                    assert_eq!(conflict.ids, vec![bob.id().expect("id").to_string()]);
                }
                other => std::panic::panic_any(format!("expected a conflict, got {other}")),
            }
            assert!(first.is_dirty(&bob).expect("still tracked"));
        });
    }

    #[test]
    fn failed_operations_stay_pending_while_applied_ones_settle() {
        let cx = Cx::for_testing();
        let store = MemoryStore::new();
        let registry = registry(ChangeTracking::DeferredImplicit);
        let mut first = Session::new(store.clone(), Arc::clone(&registry), SessionConfig::default());
        let mut second = Session::new(store, registry, SessionConfig::default());
        let bob = ObjectRef::new("Person").with("name", "Bob");
        first.save(&bob).expect("save");
        run(async {
            unwrap_outcome(first.flush(&cx).await);
            let other = unwrap_outcome(second.find(&cx, "Person", bob.id().expect("id")).await)
                .expect("found");
            other.set("name", "Robert");
            unwrap_outcome(second.flush(&cx).await);

            let carol = ObjectRef::new("Person").with("name", "Carol");
            first.save(&carol).expect("save");
            bob.set("name", "Bobby");
            let err = expect_err(first.flush(&cx).await);
            assert!(err.is_conflict());
            assert_eq!(first.state(&carol), EntityState::Managed);
            assert!(!first.is_dirty(&carol).expect("tracked"));
            assert!(first.is_dirty(&bob).expect("tracked"));
            assert_eq!(first.pending_counts().expect("counts").new, 0);

            unwrap_outcome(first.refresh(&cx, &bob).await);
            bob.set("name", "Bobby");
            unwrap_outcome(first.flush(&cx).await);

            let docs = stored(&first, "people", &cx).await;
            assert_eq!(docs.len(), 2);
            let saved = docs
                .iter()
                .find(|d| d.get("_id").is_some_and(|id| id.loose_eq(&bob.id().unwrap_or(Value::Null))))
                .expect("bob stored");
            assert_eq!(saved.get("name"), Some(&Value::from("Bobby")));
            assert_eq!(saved.get("__v"), Some(&Value::Int(3)));
            assert!(first.pending_counts().expect("counts").is_empty());
        });
    }

    #[test]
    fn upsert_continues_from_the_stored_version() {
        let cx = Cx::for_testing();
        let store = MemoryStore::new();
        let registry = registry(ChangeTracking::DeferredImplicit);
        let mut writer = Session::new(store.clone(), Arc::clone(&registry), SessionConfig::default());
        let mut stale = Session::new(store.clone(), Arc::clone(&registry), SessionConfig::default());
        let mut replacer = Session::new(store, registry, SessionConfig::default());
        let bob = ObjectRef::new("Person").with("name", "Bob");
        writer.save(&bob).expect("save");
        run(async {
            unwrap_outcome(writer.flush(&cx).await);
            let id = bob.id().expect("id");
            let old = unwrap_outcome(stale.find(&cx, "Person", id.clone()).await).expect("found");

            bob.set("age", 1);
            unwrap_outcome(writer.flush(&cx).await);
            bob.set("age", 2);
            unwrap_outcome(writer.flush(&cx).await);

            let replacement = ObjectRef::new("Person").with_id(id.clone()).with("name", "Replacement");
            replacer.save(&replacement).expect("save");
            unwrap_outcome(replacer.flush(&cx).await);
            let docs = stored(&replacer, "people", &cx).await;
            assert_eq!(docs.len(), 1);
            assert_eq!(docs[0].get("__v"), Some(&Value::Int(4)));
            assert_eq!(docs[0].get("age"), None);
            assert!(!replacer.is_dirty(&replacement).expect("tracked"));

            replacement.set("name", "Again");
            unwrap_outcome(replacer.flush(&cx).await);
            assert_eq!(stored(&replacer, "people", &cx).await[0].get("__v"), Some(&Value::Int(5)));

            old.set("name", "Stale");
            let err = expect_err(stale.flush(&cx).await);
            assert!(err.is_conflict());
            assert_eq!(stored(&stale, "people", &cx).await[0].get("name"), Some(&Value::from("Again")));
        });
    }

    fn counting_iterator(in_flight: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>, seen: &Arc<AtomicUsize>) -> EachIterator {
        let (in_flight, peak, seen) = (Arc::clone(in_flight), Arc::clone(peak), Arc::clone(seen));
        EachIterator::new(move |_entity: ObjectRef| {
            let (in_flight, peak, seen) = (Arc::clone(&in_flight), Arc::clone(&peak), Arc::clone(&seen));
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                asupersync::runtime::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[test]
    fn each_overlaps_callbacks_up_to_the_configured_limit() {
        let cx = Cx::for_testing();
        let config = SessionConfig {
            each_concurrency: 2,
            ..SessionConfig::default()
        };
        let mut session = Session::new(MemoryStore::new(), registry(ChangeTracking::DeferredImplicit), config);
        for i in 0..7 {
            session
                .save(&ObjectRef::new("Person").with("name", format!("p{i}")))
                .expect("save");
        }
        run(async {
            unwrap_outcome(session.flush(&cx).await);

            let (in_flight, peak, seen) = (Arc::default(), Arc::default(), Arc::default());
            let mut query = session
                .query("Person")
                .expect("query")
                .each(None, counting_iterator(&in_flight, &peak, &seen));
            unwrap_outcome(query.execute(&cx).await);
            assert_eq!(seen.load(Ordering::SeqCst), 7);
            assert_eq!(peak.load(Ordering::SeqCst), 2);

            let (in_flight, peak, seen) = (Arc::default(), Arc::default(), Arc::default());
            let mut query = session
                .query("Person")
                .expect("query")
                .each_series(None, counting_iterator(&in_flight, &peak, &seen));
            unwrap_outcome(query.execute(&cx).await);
            assert_eq!(seen.load(Ordering::SeqCst), 7);
            assert_eq!(peak.load(Ordering::SeqCst), 1);
        });
    }

    #[test]
    fn query_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let mapping = session.registry().entity_by_class("Person").expect("mapped");
        let persister = session.persister(mapping).expect("persister");

        let mut definition = QueryDefinition::new(mapping);
        definition.kind = Some(QueryKind::EachSeries);
        definition.fetch_paths.push("parents".to_string());
        definition.iterator = Some(EachIterator::new(|_entity: ObjectRef| async { Ok(()) }));
        {
            let future = persister.execute_query(&cx, &mut session, definition);
            assert_send(&future);
        }

        let mut definition = QueryDefinition::new(mapping);
        definition.kind = Some(QueryKind::FindOne);
        let future = session.run_query(&cx, definition);
        assert_send(&future);
    }

    #[test]
    fn fetch_resolves_references_and_inverse_sides() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let mom = ObjectRef::new("Person").with("name", "Alice");
        let bob = ObjectRef::new("Person")
            .with("name", "Bob")
            .with("parents", ObjectValue::Array(vec![ObjectValue::Object(mom.clone())]));
        session.save(&bob).expect("save");
        run(async {
            unwrap_outcome(session.flush(&cx).await);
            session.clear();

            let bob_id = bob.id().expect("id");
            let loaded = unwrap_outcome(session.find(&cx, "Person", bob_id).await).expect("found");
            let parents = loaded.get("parents").expect("parents");
            assert!(parents.as_array().is_some_and(|items| items[0].as_reference().is_some()));

            unwrap_outcome(session.fetch(&cx, &loaded, &["parents.children"]).await);
            let parents = loaded.get("parents").expect("parents");
            let parent = parents.as_array().and_then(|items| items[0].as_object().cloned()).expect("resolved");
            assert_eq!(parent.get("name").and_then(|v| v.as_str().map(str::to_string)), Some("Alice".into()));

            let children = parent.get("children").expect("children");
            let child = children.as_array().and_then(|items| items[0].as_object().cloned()).expect("child");
            assert!(child.ptr_eq(&loaded));
            assert!(!session.is_dirty(&loaded).expect("tracked"));

            let err = expect_err(session.fetch(&cx, &loaded, &["name", "nope"]).await);
            assert!(!err.mapping_issues().is_empty() || err.usage_kind().is_some());
        });
    }

    #[test]
    fn merge_copies_detached_state_onto_managed_instance() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let bob = ObjectRef::new("Person").with("name", "Bob");
        session.save(&bob).expect("save");
        run(async {
            unwrap_outcome(session.flush(&cx).await);
            let copy = ObjectRef::new("Person")
                .with_id(bob.id().expect("id"))
                .with("name", "Robert");
            let merged = unwrap_outcome(session.merge(&cx, &copy).await);
            assert!(merged.ptr_eq(&bob));
            assert!(!session.contains(&copy));
            assert_eq!(bob.get("name").and_then(|v| v.as_str().map(str::to_string)), Some("Robert".into()));

            let newcomer = ObjectRef::new("Person").with("name", "Eve");
            let merged = unwrap_outcome(session.merge(&cx, &newcomer).await);
            assert!(merged.ptr_eq(&newcomer));
            assert_eq!(session.state(&newcomer), EntityState::New);
        });
    }

    #[test]
    fn scheduled_operations_run_in_order_on_wait() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let bob = ObjectRef::new("Person").with("name", "Bob");
        session.save(&bob).expect("save");
        session.schedule_flush();
        session.schedule_refresh(&bob).expect("schedule");
        run(async {
            unwrap_outcome(session.wait(&cx).await);
            assert_eq!(stored(&session, "people", &cx).await.len(), 1);
            assert_eq!(session.state(&bob), EntityState::Managed);
        });
        let stranger = ObjectRef::new("Person");
        assert!(session.schedule_refresh(&stranger).is_err());
    }

    #[test]
    fn find_one_and_remove_detaches_the_result() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::DeferredImplicit);
        let bob = ObjectRef::new("Person").with("name", "Bob");
        session.save(&bob).expect("save");
        run(async {
            unwrap_outcome(session.flush(&cx).await);
            let mut query = session
                .query("Person")
                .expect("query")
                .find_one_and_remove(doc! { "name" => "Bob" });
            let removed = unwrap_outcome(query.execute(&cx).await).into_entity().expect("removed");
            assert!(removed.ptr_eq(&bob));
            assert!(!session.contains(&bob));
            assert!(stored(&session, "people", &cx).await.is_empty());
        });
    }

    #[test]
    fn observed_tracking_uses_object_revisions() {
        let cx = Cx::for_testing();
        let mut session = session(ChangeTracking::Observe);
        let bob = ObjectRef::new("Person").with("name", "Bob");
        session.save(&bob).expect("save");
        run(async {
            unwrap_outcome(session.flush(&cx).await);
            assert!(!session.is_dirty(&bob).expect("tracked"));
            bob.set("name", "Bob");
            assert!(session.is_dirty(&bob).expect("tracked"));
            unwrap_outcome(session.flush(&cx).await);
            let docs = stored(&session, "people", &cx).await;
            assert_eq!(docs[0].get("__v"), Some(&Value::Int(2)));
        });
    }
}
