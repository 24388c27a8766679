//! Unresolved entity links.

use crate::mapping::MappingId;
use crate::object::ObjectRef;
use crate::registry::MappingRegistry;
use docmodel_core::Value;

/// An entity that is known by identifier only.
///
/// Produced when a document stores an id for an entity that is not managed
/// yet; replaced by the loaded object once the path is fetched.
#[derive(Debug, Clone)]
pub struct Reference {
    mapping: MappingId,
    root: MappingId,
    id: Value,
}

impl Reference {
    pub fn new(mapping: MappingId, root: MappingId, id: Value) -> Self {
        Self { mapping, root, id }
    }

    /// The declared mapping of the referencing property.
    pub fn mapping(&self) -> MappingId {
        self.mapping
    }

    /// Inheritance root of the referenced entity.
    pub fn root(&self) -> MappingId {
        self.root
    }

    pub fn id(&self) -> &Value {
        &self.id
    }

    /// Whether `entity` is the object this reference points at: same
    /// inheritance family, equal identifier.
    pub fn refers_to(&self, registry: &MappingRegistry, entity: &ObjectRef) -> bool {
        let Some(mapping) = entity.class().and_then(|c| registry.by_class(&c)) else {
            return false;
        };
        if registry.root_of(mapping) != self.root {
            return false;
        }
        let Some(id) = entity.id() else {
            return false;
        };
        registry
            .entity(self.root)
            .is_some_and(|e| e.identity().are_equal(&id, &self.id))
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root && self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::Reference;
    use crate::fixtures;
    use crate::object::ObjectRef;
    use docmodel_core::Value;

    #[test]
    fn refers_to_matches_family_and_identifier() {
        let registry = fixtures::registry();
        let animal = registry.by_class("Animal").unwrap();
        let person = registry.by_class("Person").unwrap();
        let reference = Reference::new(animal, animal, Value::Int(4));

        assert!(reference.refers_to(&registry, &ObjectRef::new("Dog").with_id(4)));
        assert!(!reference.refers_to(&registry, &ObjectRef::new("Dog").with_id(5)));
        assert!(!reference.refers_to(&registry, &ObjectRef::new("Person").with_id(4)));
        assert!(!reference.refers_to(&registry, &ObjectRef::new("Dog")));
        assert_ne!(reference, Reference::new(person, person, Value::Int(4)));
    }
}
