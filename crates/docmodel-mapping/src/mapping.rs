//! Mapping metadata nodes.
//!
//! A [`Mapping`] describes the storage shape of one value. Nodes live in a
//! [`MappingRegistry`](crate::MappingRegistry) arena and point at each other
//! through [`MappingId`]s, so self-referencing entity types need no pointer
//! cycles. Behavior (read, write, walk, resolve, equality) dispatches on
//! [`MappingKind`] in the registry.

use crate::config::ChangeTracking;
use crate::flags::{MappingFlags, PropertyFlags};
use crate::identity::IdentityGenerator;
use docmodel_core::{IndexSpec, Value};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Stable identifier of a mapping node within its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MappingId(u32);

impl MappingId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).unwrap_or(u32::MAX))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One node of mapping metadata.
#[derive(Debug)]
pub struct Mapping {
    pub(crate) id: MappingId,
    pub(crate) flags: MappingFlags,
    pub(crate) kind: MappingKind,
}

/// The variant-specific part of a mapping node.
#[derive(Debug)]
pub enum MappingKind {
    Boolean,
    Number,
    String,
    Date,
    Binary,
    ObjectId,
    Enum(EnumMapping),
    /// Homogeneous list of the element mapping
    Array(MappingId),
    /// Fixed-length list with per-position mappings
    Tuple(Vec<MappingId>),
    /// Passed through without conversion
    Any,
    /// Untyped embedded object with a fixed property set
    Object(ObjectMapping),
    /// Embeddable class, possibly part of a hierarchy
    Class(ClassMapping),
    /// Class stored in its own collection
    Entity(EntityMapping),
}

impl Mapping {
    pub fn id(&self) -> MappingId {
        self.id
    }

    pub fn flags(&self) -> MappingFlags {
        self.flags
    }

    pub fn kind(&self) -> &MappingKind {
        &self.kind
    }

    pub fn is_entity(&self) -> bool {
        self.flags.contains(MappingFlags::ENTITY)
    }

    /// Property table for Object, Class and Entity nodes.
    pub fn as_object(&self) -> Option<&ObjectMapping> {
        match &self.kind {
            MappingKind::Object(o) => Some(o),
            MappingKind::Class(c) => Some(&c.object),
            MappingKind::Entity(e) => Some(&e.class.object),
            _ => None,
        }
    }

    /// Class part of Class and Entity nodes.
    pub fn as_class(&self) -> Option<&ClassMapping> {
        match &self.kind {
            MappingKind::Class(c) => Some(c),
            MappingKind::Entity(e) => Some(&e.class),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityMapping> {
        match &self.kind {
            MappingKind::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Short label for diagnostics.
    pub fn describe(&self) -> String {
        match &self.kind {
            MappingKind::Boolean => "boolean".to_string(),
            MappingKind::Number => "number".to_string(),
            MappingKind::String => "string".to_string(),
            MappingKind::Date => "date".to_string(),
            MappingKind::Binary => "binary".to_string(),
            MappingKind::ObjectId => "objectId".to_string(),
            MappingKind::Enum(_) => "enum".to_string(),
            MappingKind::Array(_) => "array".to_string(),
            MappingKind::Tuple(items) => format!("tuple[{}]", items.len()),
            MappingKind::Any => "any".to_string(),
            MappingKind::Object(_) => "object".to_string(),
            MappingKind::Class(c) => c.name.clone(),
            MappingKind::Entity(e) => e.class.name.clone(),
        }
    }
}

/// A named property of an object mapping.
#[derive(Debug, Clone)]
pub struct Property {
    pub(crate) name: String,
    pub(crate) field: String,
    pub(crate) flags: PropertyFlags,
    pub(crate) mapping: MappingId,
    pub(crate) inverse_of: Option<String>,
}

impl Property {
    /// Object-side name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Document-side field name.
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    pub fn has_flags(&self, flags: PropertyFlags) -> bool {
        self.flags.contains(flags)
    }

    pub fn mapping(&self) -> MappingId {
        self.mapping
    }

    /// Name of the owning-side property this inverse property mirrors.
    pub fn inverse_of(&self) -> Option<&str> {
        self.inverse_of.as_deref()
    }

    /// Whether the property appears in documents.
    pub fn is_stored(&self) -> bool {
        !self
            .flags
            .intersects(PropertyFlags::IGNORED | PropertyFlags::INVERSE_SIDE)
    }
}

/// Ordered property table.
#[derive(Debug, Clone, Default)]
pub struct ObjectMapping {
    pub(crate) properties: IndexMap<String, Property>,
}

impl ObjectMapping {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Properties that are read from and written to documents.
    pub fn stored_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values().filter(|p| p.is_stored())
    }

    pub fn property_by_field(&self, field: &str) -> Option<&Property> {
        self.properties.values().find(|p| p.field == field)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// Class-level metadata: name, hierarchy links and discriminator.
#[derive(Debug, Clone)]
pub struct ClassMapping {
    pub(crate) name: String,
    pub(crate) object: ObjectMapping,
    pub(crate) base: Option<MappingId>,
    pub(crate) root: MappingId,
    /// Set on every class of a hierarchy with more than one class.
    pub(crate) discriminator_field: Option<String>,
    pub(crate) discriminator_value: Option<String>,
    /// Populated on the inheritance root only.
    pub(crate) discriminator_map: HashMap<String, MappingId>,
    pub(crate) subclasses: Vec<MappingId>,
}

impl ClassMapping {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn object(&self) -> &ObjectMapping {
        &self.object
    }

    pub fn base(&self) -> Option<MappingId> {
        self.base
    }

    pub fn inheritance_root(&self) -> MappingId {
        self.root
    }

    pub fn discriminator_field(&self) -> Option<&str> {
        self.discriminator_field.as_deref()
    }

    pub fn discriminator_value(&self) -> Option<&str> {
        self.discriminator_value.as_deref()
    }

    /// Direct subclasses.
    pub fn subclasses(&self) -> &[MappingId] {
        &self.subclasses
    }

    pub fn is_polymorphic(&self) -> bool {
        self.discriminator_field.is_some()
    }
}

/// Persistence metadata for classes stored in their own collection.
#[derive(Debug, Clone)]
pub struct EntityMapping {
    pub(crate) class: ClassMapping,
    pub(crate) collection_name: String,
    pub(crate) indexes: Vec<IndexSpec>,
    pub(crate) identity: Arc<dyn IdentityGenerator>,
    pub(crate) change_tracking: ChangeTracking,
    pub(crate) versioned: bool,
    pub(crate) version_field: String,
}

impl EntityMapping {
    pub fn class(&self) -> &ClassMapping {
        &self.class
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn identity(&self) -> &Arc<dyn IdentityGenerator> {
        &self.identity
    }

    pub fn change_tracking(&self) -> ChangeTracking {
        self.change_tracking
    }

    pub fn versioned(&self) -> bool {
        self.versioned
    }

    /// Version field name, when the hierarchy is versioned.
    pub fn version_field(&self) -> Option<&str> {
        self.versioned.then_some(self.version_field.as_str())
    }
}

/// Named members and their stored values.
#[derive(Debug, Clone, Default)]
pub struct EnumMapping {
    pub(crate) members: IndexMap<String, Value>,
}

impl EnumMapping {
    /// Members stored by name.
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: names
                .into_iter()
                .map(|n| {
                    let n = n.into();
                    (n.clone(), Value::String(n))
                })
                .collect(),
        }
    }

    /// Members stored by position.
    pub fn ordinal<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: names
                .into_iter()
                .enumerate()
                .map(|(i, n)| (n.into(), Value::Int(i as i64)))
                .collect(),
        }
    }

    pub fn stored_value(&self, name: &str) -> Option<&Value> {
        self.members.get(name)
    }

    pub fn member_for(&self, stored: &Value) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, v)| *v == stored)
            .map(|(k, _)| k.as_str())
    }
}
