//! Structural document equality for dirty checking.

use crate::mapping::{MappingId, MappingKind};
use crate::registry::MappingRegistry;
use docmodel_core::{Document, Value};

impl MappingRegistry {
    /// Compare two stored values as `mapping` sees them.
    ///
    /// Embedded documents compare property by property (unmapped fields are
    /// ignored); entity-typed values are identifiers and compare by identity.
    pub fn are_equal(&self, mapping: MappingId, a: &Value, b: &Value) -> bool {
        match (&self.get(mapping).kind, a, b) {
            (_, Value::Null, Value::Null) => true,
            (_, Value::Null, _) | (_, _, Value::Null) => false,
            (MappingKind::Number, x, y) => x.loose_eq(y),
            (MappingKind::Array(element), Value::Array(xs), Value::Array(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .zip(ys)
                        .all(|(x, y)| self.are_equal(*element, x, y))
            }
            (MappingKind::Tuple(elements), Value::Array(xs), Value::Array(ys)) => {
                xs.len() == ys.len()
                    && elements
                        .iter()
                        .zip(xs.iter().zip(ys))
                        .all(|(e, (x, y))| self.are_equal(*e, x, y))
            }
            (
                MappingKind::Object(_) | MappingKind::Class(_) | MappingKind::Entity(_),
                Value::Document(x),
                Value::Document(y),
            ) => self.are_documents_equal(mapping, x, y),
            (MappingKind::Entity(entity), x, y) => entity.identity().are_equal(x, y),
            (_, x, y) => x == y,
        }
    }

    /// Compare two documents of an object, class or entity mapping.
    pub fn are_documents_equal(&self, mapping: MappingId, a: &Document, b: &Document) -> bool {
        let concrete_a = self.concrete_for(mapping, a);
        let concrete_b = self.concrete_for(mapping, b);
        if concrete_a != concrete_b {
            return false;
        }
        let Some(object) = self.get(concrete_a).as_object() else {
            return a == b;
        };
        object.stored_properties().all(|p| {
            match (a.get(p.field()), b.get(p.field())) {
                (None, None) => true,
                (Some(x), Some(y)) => self.are_equal(p.mapping(), x, y),
                _ => false,
            }
        })
    }

    fn concrete_for(&self, mapping: MappingId, doc: &Document) -> MappingId {
        let Some(class) = self.class(mapping) else {
            return mapping;
        };
        class
            .discriminator_field()
            .and_then(|field| doc.get(field))
            .and_then(Value::as_str)
            .and_then(|v| self.discriminated(class.inheritance_root(), v))
            .unwrap_or(mapping)
    }
}
