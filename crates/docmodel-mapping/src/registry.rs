//! The mapping arena.

use crate::config::MappingConfig;
use crate::flags::MappingFlags;
use crate::mapping::{ClassMapping, EntityMapping, Mapping, MappingId, MappingKind};
use crate::object::ObjectRef;
use docmodel_core::{Error, Result, UsageErrorKind};
use std::collections::HashMap;

/// Every mapping node of one configuration, addressed by [`MappingId`].
///
/// Ids are arena slots allocated by this registry, so two registries in the
/// same process never share an id space.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    mappings: Vec<Mapping>,
    by_class: HashMap<String, MappingId>,
    config: MappingConfig,
}

impl MappingRegistry {
    pub fn new(config: MappingConfig) -> Self {
        Self {
            mappings: Vec::new(),
            by_class: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub(crate) fn allocate(&mut self, flags: MappingFlags, kind: MappingKind) -> MappingId {
        let id = MappingId::from_index(self.mappings.len());
        self.mappings.push(Mapping { id, flags, kind });
        id
    }

    pub(crate) fn replace(&mut self, id: MappingId, flags: MappingFlags, kind: MappingKind) {
        if let Some(slot) = self.mappings.get_mut(id.index()) {
            slot.flags = flags;
            slot.kind = kind;
        }
    }

    pub(crate) fn register_class(&mut self, name: &str, id: MappingId) {
        self.by_class.insert(name.to_string(), id);
    }

    /// Look up a node. Ids are only ever handed out by this registry.
    pub fn get(&self, id: MappingId) -> &Mapping {
        &self.mappings[id.index()]
    }

    pub fn try_get(&self, id: MappingId) -> Option<&Mapping> {
        self.mappings.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Mapping of a class by name.
    pub fn by_class(&self, name: &str) -> Option<MappingId> {
        self.by_class.get(name).copied()
    }

    pub fn class(&self, id: MappingId) -> Option<&ClassMapping> {
        self.try_get(id).and_then(Mapping::as_class)
    }

    pub fn entity(&self, id: MappingId) -> Option<&EntityMapping> {
        self.try_get(id).and_then(Mapping::as_entity)
    }

    /// Inheritance root of a class mapping; other nodes are their own root.
    pub fn root_of(&self, id: MappingId) -> MappingId {
        self.class(id).map_or(id, ClassMapping::inheritance_root)
    }

    /// Every entity mapping, subclasses included.
    pub fn entities(&self) -> impl Iterator<Item = (MappingId, &EntityMapping)> {
        self.mappings
            .iter()
            .filter_map(|m| m.as_entity().map(|e| (m.id, e)))
    }

    /// Entity hierarchy roots; one per collection.
    pub fn root_entities(&self) -> impl Iterator<Item = (MappingId, &EntityMapping)> {
        self.entities()
            .filter(|(id, e)| e.class().inheritance_root() == *id)
    }

    /// `id` followed by every transitive subclass.
    pub fn descendants(&self, id: MappingId) -> Vec<MappingId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            if let Some(class) = self.class(out[i]) {
                out.extend_from_slice(class.subclasses());
            }
            i += 1;
        }
        out
    }

    /// The mapping an object should be handled with when a property declares
    /// `declared`: the object's own class when it belongs to the same
    /// hierarchy, `declared` otherwise.
    pub fn mapping_for_object(&self, declared: MappingId, obj: &ObjectRef) -> MappingId {
        let Some(declared_class) = self.class(declared) else {
            return declared;
        };
        obj.class()
            .and_then(|name| self.by_class(&name))
            .filter(|id| self.root_of(*id) == declared_class.inheritance_root())
            .unwrap_or(declared)
    }

    /// Entity mapping of an object, by its class name.
    pub fn entity_for_object(&self, obj: &ObjectRef) -> Result<MappingId> {
        let Some(class) = obj.class() else {
            return Err(Error::usage(
                UsageErrorKind::UnmappedClass,
                "Object has no class.",
            ));
        };
        let Some(id) = self.by_class(&class) else {
            return Err(Error::usage(
                UsageErrorKind::UnmappedClass,
                format!("No mapping for class '{}'.", class),
            ));
        };
        if self.entity(id).is_none() {
            return Err(Error::usage(
                UsageErrorKind::NotEntity,
                format!("Class '{}' is not an entity.", class),
            ));
        }
        Ok(id)
    }

    /// Entity mapping of a class name.
    pub fn entity_by_class(&self, class: &str) -> Result<MappingId> {
        match self.by_class(class) {
            Some(id) if self.entity(id).is_some() => Ok(id),
            Some(_) => Err(Error::usage(
                UsageErrorKind::NotEntity,
                format!("Class '{}' is not an entity.", class),
            )),
            None => Err(Error::usage(
                UsageErrorKind::UnmappedClass,
                format!("No mapping for class '{}'.", class),
            )),
        }
    }

    /// Whether values of `id` are (or contain) entities stored elsewhere.
    pub fn targets_entity(&self, id: MappingId) -> bool {
        match &self.get(id).kind {
            MappingKind::Entity(_) => true,
            MappingKind::Array(element) => self.targets_entity(*element),
            MappingKind::Tuple(items) => items.iter().any(|i| self.targets_entity(*i)),
            _ => false,
        }
    }

    /// Strip array wrappers: `[[Person]]` -> `Person`.
    pub fn element_of(&self, id: MappingId) -> MappingId {
        let mut current = id;
        while let MappingKind::Array(element) = &self.get(current).kind {
            current = *element;
        }
        current
    }
}
