//! Object-graph traversal for cascades.

use crate::flags::PropertyFlags;
use crate::mapping::{MappingId, MappingKind};
use crate::object::{ObjectRef, ObjectValue};
use crate::reference::Reference;
use crate::registry::MappingRegistry;
use std::collections::HashSet;

/// What a walk reached.
#[derive(Debug, Default)]
pub struct WalkResult {
    /// Entities, in discovery order, starting with the walk root.
    pub entities: Vec<ObjectRef>,
    /// Embedded objects.
    pub embedded: Vec<ObjectRef>,
    /// Links to entities that are not loaded.
    pub references: Vec<Reference>,
    seen: HashSet<usize>,
}

impl WalkResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an object visited; false when it was already.
    fn visit(&mut self, obj: &ObjectRef) -> bool {
        self.seen.insert(obj.addr())
    }
}

impl MappingRegistry {
    /// Walk from a root entity.
    ///
    /// The entity itself is collected, then every value reachable from it.
    /// Embedded values are always traversed. Entity-typed properties are
    /// followed only when they carry one of the cascade flags in `flags`, and
    /// the reached entity's own properties are walked only when `flags`
    /// contains `WALK_ENTITIES`.
    pub fn walk_entity(&self, entity: &ObjectRef, flags: PropertyFlags, result: &mut WalkResult) {
        let Some(mapping) = entity.class().and_then(|c| self.by_class(&c)) else {
            return;
        };
        if !result.visit(entity) {
            return;
        }
        result.entities.push(entity.clone());
        self.walk_properties(mapping, entity, flags, result);
    }

    /// Walk a value declared as `mapping`.
    pub fn walk(
        &self,
        mapping: MappingId,
        value: &ObjectValue,
        flags: PropertyFlags,
        result: &mut WalkResult,
    ) {
        match value {
            ObjectValue::Array(items) => match &self.get(mapping).kind {
                MappingKind::Array(element) => {
                    for item in items {
                        self.walk(*element, item, flags, result);
                    }
                }
                MappingKind::Tuple(elements) => {
                    for (element, item) in elements.iter().zip(items) {
                        self.walk(*element, item, flags, result);
                    }
                }
                _ => {
                    for item in items {
                        self.walk(mapping, item, flags, result);
                    }
                }
            },
            ObjectValue::Reference(reference) => {
                if !result.references.contains(reference) {
                    result.references.push(reference.clone());
                }
            }
            ObjectValue::Object(obj) => {
                let declared = match &self.get(mapping).kind {
                    MappingKind::Any => match obj.class().and_then(|c| self.by_class(&c)) {
                        Some(mapped) => mapped,
                        None => return,
                    },
                    _ => mapping,
                };
                let concrete = self.mapping_for_object(declared, obj);
                match &self.get(concrete).kind {
                    MappingKind::Entity(_) => {
                        if result.visit(obj) {
                            result.entities.push(obj.clone());
                            if flags.contains(PropertyFlags::WALK_ENTITIES) {
                                self.walk_properties(concrete, obj, flags, result);
                            }
                        }
                    }
                    MappingKind::Object(_) | MappingKind::Class(_) => {
                        if result.visit(obj) {
                            result.embedded.push(obj.clone());
                            self.walk_properties(concrete, obj, flags, result);
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn walk_properties(
        &self,
        mapping: MappingId,
        obj: &ObjectRef,
        flags: PropertyFlags,
        result: &mut WalkResult,
    ) {
        let Some(object) = self.get(mapping).as_object() else {
            return;
        };
        let selector = flags.cascade_selector();
        for property in object.properties() {
            if property.has_flags(PropertyFlags::IGNORED) {
                continue;
            }
            if self.targets_entity(property.mapping()) && !property.flags().intersects(selector) {
                continue;
            }
            let Some(value) = obj.get(property.name()) else {
                continue;
            };
            self.walk(property.mapping(), &value, flags, result);
        }
    }
}
