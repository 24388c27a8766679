//! Programmatic mapping declarations.
//!
//! Classes are declared with [`ClassDef`] and [`PropertyDef`] and turned into
//! a validated [`MappingRegistry`] by [`MappingBuilder::build`]:
//!
//! ```rust,ignore
//! let registry = MappingBuilder::new(MappingConfig::default())
//!     .add(
//!         ClassDef::entity("Person")
//!             .property(PropertyDef::new("name", TypeRef::String))
//!             .property(PropertyDef::new("parents", TypeRef::array(TypeRef::class("Person")))
//!                 .cascade(PropertyFlags::CASCADE_SAVE))
//!             .property(PropertyDef::new("children", TypeRef::array(TypeRef::class("Person")))
//!                 .inverse_of("parents")),
//!     )
//!     .build()?;
//! ```

use crate::config::{ChangeTracking, MappingConfig};
use crate::flags::{MappingFlags, PropertyFlags};
use crate::identity::IdentityGenerator;
use crate::mapping::{
    ClassMapping, EntityMapping, EnumMapping, MappingId, MappingKind, ObjectMapping, Property,
};
use crate::registry::MappingRegistry;
use docmodel_core::{Error, IndexSpec, MappingError, Result};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Declared type of a property.
#[derive(Debug, Clone)]
pub enum TypeRef {
    Boolean,
    Number,
    String,
    Date,
    Binary,
    ObjectId,
    Any,
    Enum(EnumMapping),
    Array(Box<TypeRef>),
    Tuple(Vec<TypeRef>),
    /// Inline untyped object with the given properties
    Object(Vec<PropertyDef>),
    /// A declared class (entity or embeddable) by name
    Class(String),
}

impl TypeRef {
    pub fn class(name: impl Into<String>) -> Self {
        TypeRef::Class(name.into())
    }

    pub fn array(element: TypeRef) -> Self {
        TypeRef::Array(Box::new(element))
    }
}

/// Declaration of one property.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    name: String,
    type_ref: TypeRef,
    flags: PropertyFlags,
    field: Option<String>,
    inverse_of: Option<String>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, type_ref: TypeRef) -> Self {
        Self {
            name: name.into(),
            type_ref,
            flags: PropertyFlags::NONE,
            field: None,
            inverse_of: None,
        }
    }

    /// Store under an explicit field name instead of the naming strategy's.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.flags |= PropertyFlags::NULLABLE;
        self
    }

    pub fn ignored(mut self) -> Self {
        self.flags |= PropertyFlags::IGNORED;
        self
    }

    pub fn cascade(mut self, flags: PropertyFlags) -> Self {
        self.flags |= flags & PropertyFlags::CASCADE_ALL;
        self
    }

    pub fn orphan_removal(mut self) -> Self {
        self.flags |= PropertyFlags::ORPHAN_REMOVAL;
        self
    }

    /// Mark as the inverse side of `owning_property` on the target entity.
    pub fn inverse_of(mut self, owning_property: impl Into<String>) -> Self {
        self.inverse_of = Some(owning_property.into());
        self.flags |= PropertyFlags::INVERSE_SIDE;
        self
    }
}

/// Declaration of one class.
#[derive(Debug, Clone)]
pub struct ClassDef {
    name: String,
    entity: bool,
    base: Option<String>,
    collection: Option<String>,
    discriminator: Option<String>,
    indexes: Vec<IndexSpec>,
    change_tracking: Option<ChangeTracking>,
    versioned: Option<bool>,
    identity: Option<Arc<dyn IdentityGenerator>>,
    properties: Vec<PropertyDef>,
}

impl ClassDef {
    fn new(name: impl Into<String>, entity: bool) -> Self {
        Self {
            name: name.into(),
            entity,
            base: None,
            collection: None,
            discriminator: None,
            indexes: Vec::new(),
            change_tracking: None,
            versioned: None,
            identity: None,
            properties: Vec::new(),
        }
    }

    /// A class stored in its own collection.
    pub fn entity(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    /// A class stored inline in its parent's document.
    pub fn embeddable(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Collection name (hierarchy roots only).
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    pub fn discriminator(mut self, value: impl Into<String>) -> Self {
        self.discriminator = Some(value.into());
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn change_tracking(mut self, tracking: ChangeTracking) -> Self {
        self.change_tracking = Some(tracking);
        self
    }

    pub fn versioned(mut self, versioned: bool) -> Self {
        self.versioned = Some(versioned);
        self
    }

    pub fn identity(mut self, generator: Arc<dyn IdentityGenerator>) -> Self {
        self.identity = Some(generator);
        self
    }

    pub fn property(mut self, property: PropertyDef) -> Self {
        self.properties.push(property);
        self
    }
}

/// Collects class declarations and builds a registry.
#[derive(Debug, Default)]
pub struct MappingBuilder {
    config: MappingConfig,
    classes: Vec<ClassDef>,
}

struct BuildState {
    registry: MappingRegistry,
    class_ids: HashMap<String, MappingId>,
    primitives: HashMap<&'static str, MappingId>,
    errors: MappingError,
}

impl BuildState {
    fn primitive(&mut self, key: &'static str, flags: MappingFlags, kind: MappingKind) -> MappingId {
        if let Some(id) = self.primitives.get(key) {
            return *id;
        }
        let id = self.registry.allocate(flags, kind);
        self.primitives.insert(key, id);
        id
    }

    fn resolve_type(&mut self, type_ref: &TypeRef, owner: &str) -> Option<MappingId> {
        let id = match type_ref {
            TypeRef::Boolean => self.primitive("boolean", MappingFlags::BOOLEAN, MappingKind::Boolean),
            TypeRef::Number => self.primitive("number", MappingFlags::NUMBER, MappingKind::Number),
            TypeRef::String => self.primitive("string", MappingFlags::STRING, MappingKind::String),
            TypeRef::Date => self.primitive("date", MappingFlags::DATE, MappingKind::Date),
            TypeRef::Binary => self.primitive("binary", MappingFlags::BINARY, MappingKind::Binary),
            TypeRef::ObjectId => {
                self.primitive("objectId", MappingFlags::OBJECT_ID, MappingKind::ObjectId)
            }
            TypeRef::Any => self.primitive("any", MappingFlags::ANY, MappingKind::Any),
            TypeRef::Enum(e) => self
                .registry
                .allocate(MappingFlags::ENUM, MappingKind::Enum(e.clone())),
            TypeRef::Array(element) => {
                let element = self.resolve_type(element, owner)?;
                self.registry
                    .allocate(MappingFlags::ARRAY, MappingKind::Array(element))
            }
            TypeRef::Tuple(elements) => {
                let mut ids = Vec::with_capacity(elements.len());
                for element in elements {
                    ids.push(self.resolve_type(element, owner)?);
                }
                self.registry
                    .allocate(MappingFlags::TUPLE, MappingKind::Tuple(ids))
            }
            TypeRef::Object(properties) => {
                let object = self.build_properties(properties, owner, &ObjectMapping::default());
                self.registry.allocate(
                    MappingFlags::OBJECT | MappingFlags::EMBEDDED,
                    MappingKind::Object(object),
                )
            }
            TypeRef::Class(name) => match self.class_ids.get(name) {
                Some(id) => *id,
                None => {
                    self.errors
                        .add(format!("Unknown class '{}' referenced by '{}'.", name, owner), owner);
                    return None;
                }
            },
        };
        Some(id)
    }

    fn build_properties(
        &mut self,
        defs: &[PropertyDef],
        owner: &str,
        inherited: &ObjectMapping,
    ) -> ObjectMapping {
        let field_naming = self.registry.config().field_naming;
        let mut properties: IndexMap<String, Property> = inherited.properties.clone();
        for def in defs {
            let label = format!("{}.{}", owner, def.name);
            let Some(mapping) = self.resolve_type(&def.type_ref, &label) else {
                continue;
            };
            let field = def
                .field
                .clone()
                .unwrap_or_else(|| field_naming.apply(&def.name));
            if field == "_id" {
                self.errors
                    .add(format!("Property '{}' may not use the reserved field '_id'.", label), label);
                continue;
            }
            properties.insert(
                def.name.clone(),
                Property {
                    name: def.name.clone(),
                    field,
                    flags: def.flags,
                    mapping,
                    inverse_of: def.inverse_of.clone(),
                },
            );
        }
        ObjectMapping { properties }
    }
}

impl MappingBuilder {
    pub fn new(config: MappingConfig) -> Self {
        Self {
            config,
            classes: Vec::new(),
        }
    }

    /// Builder-style [`push`](Self::push).
    pub fn add(mut self, class: ClassDef) -> Self {
        self.push(class);
        self
    }

    pub fn push(&mut self, class: ClassDef) {
        self.classes.push(class);
    }

    /// Order classes so that every base precedes its subclasses.
    fn ordered(&self, errors: &mut MappingError) -> Vec<usize> {
        let index: HashMap<&str, usize> = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), i))
            .collect();
        let mut order = Vec::with_capacity(self.classes.len());
        let mut placed = vec![false; self.classes.len()];
        for start in 0..self.classes.len() {
            let mut chain = Vec::new();
            let mut current = Some(start);
            while let Some(i) = current {
                if placed[i] {
                    break;
                }
                if chain.contains(&i) {
                    errors.add(
                        format!("Inheritance cycle involving '{}'.", self.classes[i].name),
                        self.classes[i].name.clone(),
                    );
                    return Vec::new();
                }
                chain.push(i);
                current = match &self.classes[i].base {
                    Some(base) => match index.get(base.as_str()) {
                        Some(b) => Some(*b),
                        None => {
                            errors.add(
                                format!(
                                    "Unknown base class '{}' for '{}'.",
                                    base, self.classes[i].name
                                ),
                                self.classes[i].name.clone(),
                            );
                            None
                        }
                    },
                    None => None,
                };
            }
            for i in chain.into_iter().rev() {
                if !placed[i] {
                    placed[i] = true;
                    order.push(i);
                }
            }
        }
        order
    }

    /// Validate the declarations and build the registry.
    pub fn build(self) -> Result<MappingRegistry> {
        let mut errors = MappingError::new();

        let mut names = HashSet::new();
        for class in &self.classes {
            if !names.insert(class.name.as_str()) {
                errors.add(
                    format!("Class '{}' is declared more than once.", class.name),
                    class.name.clone(),
                );
            }
        }
        let order = self.ordered(&mut errors);
        if !errors.is_empty() {
            return Err(Error::Mapping(errors));
        }

        let by_name: HashMap<&str, &ClassDef> =
            self.classes.iter().map(|c| (c.name.as_str(), c)).collect();
        let root_name = |name: &str| -> String {
            let mut current = name;
            while let Some(base) = by_name.get(current).and_then(|c| c.base.as_deref()) {
                current = base;
            }
            current.to_string()
        };

        for class in &self.classes {
            if let Some(base) = class.base.as_deref().and_then(|b| by_name.get(b)) {
                if base.entity != class.entity {
                    errors.add(
                        format!(
                            "Class '{}' and its base '{}' must both be entities or both embeddable.",
                            class.name, base.name
                        ),
                        class.name.clone(),
                    );
                }
            }
        }

        let config = self.config.clone();
        let mut state = BuildState {
            registry: MappingRegistry::new(self.config),
            class_ids: HashMap::new(),
            primitives: HashMap::new(),
            errors,
        };

        for &i in &order {
            let class = &self.classes[i];
            let id = state.registry.allocate(MappingFlags::CLASS, MappingKind::Any);
            state.registry.register_class(&class.name, id);
            state.class_ids.insert(class.name.clone(), id);
        }

        // Hierarchy layout: subclasses, roots, discriminators.
        let mut subclasses: HashMap<String, Vec<MappingId>> = HashMap::new();
        let mut hierarchy_size: HashMap<String, usize> = HashMap::new();
        for &i in &order {
            let class = &self.classes[i];
            if let Some(base) = &class.base {
                subclasses
                    .entry(base.clone())
                    .or_default()
                    .push(state.class_ids[&class.name]);
            }
            *hierarchy_size.entry(root_name(&class.name)).or_default() += 1;
        }
        let mut discriminator_maps: HashMap<String, HashMap<String, MappingId>> = HashMap::new();
        let mut discriminator_values: HashMap<String, String> = HashMap::new();
        for &i in &order {
            let class = &self.classes[i];
            let root = root_name(&class.name);
            if hierarchy_size.get(&root).copied().unwrap_or(0) < 2 {
                continue;
            }
            let value = class
                .discriminator
                .clone()
                .unwrap_or_else(|| config.discriminator_naming.apply(&class.name));
            let map = discriminator_maps.entry(root).or_default();
            if map
                .insert(value.clone(), state.class_ids[&class.name])
                .is_some()
            {
                state.errors.add(
                    format!(
                        "Discriminator value '{}' of '{}' is already in use.",
                        value, class.name
                    ),
                    class.name.clone(),
                );
            }
            discriminator_values.insert(class.name.clone(), value);
        }

        let mut identities: HashMap<String, Arc<dyn IdentityGenerator>> = HashMap::new();
        let mut built: HashMap<String, ObjectMapping> = HashMap::new();
        for &i in &order {
            let class = &self.classes[i];
            let id = state.class_ids[&class.name];
            let root = root_name(&class.name);
            let root_id = state.class_ids[&root];
            let inherited = class
                .base
                .as_ref()
                .and_then(|b| built.get(b))
                .cloned()
                .unwrap_or_default();
            let object = state.build_properties(&class.properties, &class.name, &inherited);
            built.insert(class.name.clone(), object.clone());

            let polymorphic = discriminator_values.contains_key(&class.name);
            let class_mapping = ClassMapping {
                name: class.name.clone(),
                object,
                base: class.base.as_ref().map(|b| state.class_ids[b]),
                root: root_id,
                discriminator_field: polymorphic.then(|| config.discriminator_field.clone()),
                discriminator_value: discriminator_values.get(&class.name).cloned(),
                discriminator_map: if root_id == id {
                    discriminator_maps.remove(&root).unwrap_or_default()
                } else {
                    HashMap::new()
                },
                subclasses: subclasses.remove(&class.name).unwrap_or_default(),
            };

            let mut flags = MappingFlags::CLASS;
            if root_id == id {
                flags |= MappingFlags::INHERITANCE_ROOT;
            }

            let kind = if class.entity {
                flags |= MappingFlags::ENTITY;
                let root_def = by_name.get(root.as_str()).copied().unwrap_or(class);
                let identity = identities
                    .entry(root.clone())
                    .or_insert_with(|| {
                        root_def
                            .identity
                            .clone()
                            .unwrap_or_else(|| config.identity.generator())
                    })
                    .clone();
                MappingKind::Entity(EntityMapping {
                    class: class_mapping,
                    collection_name: root_def
                        .collection
                        .clone()
                        .unwrap_or_else(|| config.collection_naming.apply(&root)),
                    indexes: class.indexes.clone(),
                    identity,
                    change_tracking: root_def
                        .change_tracking
                        .unwrap_or(config.change_tracking),
                    versioned: root_def.versioned.unwrap_or(config.versioned),
                    version_field: config.version_field.clone(),
                })
            } else {
                flags |= MappingFlags::EMBEDDED;
                MappingKind::Class(class_mapping)
            };
            state.registry.replace(id, flags, kind);
        }

        validate_inverse_properties(&state.registry, &mut state.errors);
        if !state.errors.is_empty() {
            return Err(Error::Mapping(state.errors));
        }
        tracing::debug!(
            classes = state.class_ids.len(),
            nodes = state.registry.len(),
            "Built mapping registry"
        );
        Ok(state.registry)
    }
}

fn validate_inverse_properties(registry: &MappingRegistry, errors: &mut MappingError) {
    for (_, entity) in registry.entities() {
        for property in entity.class().object().properties() {
            let Some(owning) = property.inverse_of() else {
                continue;
            };
            let label = format!("{}.{}", entity.class().name(), property.name());
            let target = registry.element_of(property.mapping());
            let Some(target_entity) = registry.entity(target) else {
                errors.add(
                    format!("Inverse property '{}' must refer to an entity.", label),
                    label,
                );
                continue;
            };
            let owning_ok = target_entity
                .class()
                .object()
                .property(owning)
                .is_some_and(|p| p.is_stored() && registry.targets_entity(p.mapping()));
            if !owning_ok {
                errors.add(
                    format!(
                        "Inverse property '{}' refers to unknown property '{}.{}'.",
                        label,
                        target_entity.class().name(),
                        owning
                    ),
                    label,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::naming::NamingStrategy;

    fn messages(result: Result<MappingRegistry>) -> Vec<String> {
        match result {
            Ok(_) => panic!("expected the build to fail"),
            Err(err) => err
                .mapping_issues()
                .iter()
                .map(|i| i.message.clone())
                .collect(),
        }
    }

    #[test]
    fn hierarchy_shares_collection_identity_and_discriminators() {
        let registry = fixtures::registry();
        let animal = registry.by_class("Animal").unwrap();
        let dog = registry.by_class("Dog").unwrap();
        let cat = registry.by_class("Cat").unwrap();

        let dog_entity = registry.entity(dog).unwrap();
        assert_eq!(dog_entity.collection_name(), "animals");
        assert_eq!(dog_entity.class().inheritance_root(), animal);
        assert!(Arc::ptr_eq(
            dog_entity.identity(),
            registry.entity(cat).unwrap().identity()
        ));
        assert_eq!(registry.discriminated(animal, "cat"), Some(cat));
        assert_eq!(registry.discriminated(animal, "Dog"), Some(dog));
        assert!(registry.get(animal).flags().contains(MappingFlags::INHERITANCE_ROOT));
        assert!(!registry.get(dog).flags().contains(MappingFlags::INHERITANCE_ROOT));

        // Subclasses inherit the base's properties.
        assert!(dog_entity.class().object().property("name").is_some());
        assert_eq!(registry.descendants(animal).len(), 3);
        assert_eq!(registry.root_entities().count(), 2);
    }

    #[test]
    fn single_class_hierarchies_have_no_discriminator() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        assert!(!registry.class(person).unwrap().is_polymorphic());
    }

    #[test]
    fn applies_naming_and_config_defaults() {
        let config = MappingConfig {
            field_naming: NamingStrategy::SnakeCase,
            ..MappingConfig::default()
        };
        let registry = MappingBuilder::new(config)
            .add(
                ClassDef::entity("UserAccount")
                    .versioned(false)
                    .property(PropertyDef::new("displayName", TypeRef::String))
                    .property(PropertyDef::new("email", TypeRef::String).field("mail")),
            )
            .build()
            .unwrap();
        let id = registry.by_class("UserAccount").unwrap();
        let entity = registry.entity(id).unwrap();
        assert_eq!(entity.collection_name(), "userAccount");
        assert_eq!(entity.version_field(), None);
        let object = entity.class().object();
        assert_eq!(object.property("displayName").unwrap().field(), "display_name");
        assert_eq!(object.property_by_field("mail").unwrap().name(), "email");
    }

    #[test]
    fn rejects_duplicates_and_unknown_bases() {
        let errors = messages(
            MappingBuilder::default()
                .add(ClassDef::entity("A"))
                .add(ClassDef::entity("A"))
                .add(ClassDef::entity("B").extends("Missing"))
                .build(),
        );
        assert!(errors.contains(&"Class 'A' is declared more than once.".to_string()));
        assert!(errors.contains(&"Unknown base class 'Missing' for 'B'.".to_string()));
    }

    #[test]
    fn rejects_inheritance_cycles() {
        let errors = messages(
            MappingBuilder::default()
                .add(ClassDef::entity("A").extends("B"))
                .add(ClassDef::entity("B").extends("A"))
                .build(),
        );
        assert!(errors[0].starts_with("Inheritance cycle"));
    }

    #[test]
    fn collects_every_property_error() {
        let errors = messages(
            MappingBuilder::default()
                .add(ClassDef::embeddable("Tag"))
                .add(ClassDef::entity("Mixed").extends("Tag"))
                .add(
                    ClassDef::entity("Post")
                        .property(PropertyDef::new("author", TypeRef::class("Nobody")))
                        .property(PropertyDef::new("key", TypeRef::String).field("_id"))
                        .property(
                            PropertyDef::new("tags", TypeRef::array(TypeRef::class("Tag")))
                                .inverse_of("posts"),
                        ),
                )
                .build(),
        );
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("must both be entities")));
        assert!(errors.iter().any(|e| e.contains("Unknown class 'Nobody'")));
        assert!(errors.iter().any(|e| e.contains("reserved field '_id'")));
        assert!(errors.iter().any(|e| e.contains("must refer to an entity")));
    }

    #[test]
    fn inverse_side_must_name_a_stored_entity_property() {
        let errors = messages(
            MappingBuilder::default()
                .add(
                    ClassDef::entity("Node")
                        .property(PropertyDef::new("label", TypeRef::String))
                        .property(
                            PropertyDef::new("children", TypeRef::array(TypeRef::class("Node")))
                                .inverse_of("label"),
                        ),
                )
                .build(),
        );
        assert_eq!(
            errors,
            vec!["Inverse property 'Node.children' refers to unknown property 'Node.label'."]
        );
    }

    #[test]
    fn duplicate_discriminator_values_are_rejected() {
        let errors = messages(
            MappingBuilder::default()
                .add(ClassDef::entity("Shape"))
                .add(ClassDef::entity("Circle").extends("Shape").discriminator("x"))
                .add(ClassDef::entity("Square").extends("Shape").discriminator("x"))
                .build(),
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("already in use"));
    }
}
