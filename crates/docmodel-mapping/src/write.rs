//! Objects to documents.

use crate::context::WriteContext;
use crate::flags::PropertyFlags;
use crate::mapping::{MappingId, MappingKind, ObjectMapping};
use crate::object::{ObjectRef, ObjectValue};
use crate::registry::MappingRegistry;
use docmodel_core::{Document, Value};

impl MappingRegistry {
    /// Write an object-side value through `mapping`.
    ///
    /// Returns `None` for a value that failed to map; the failure is recorded
    /// in `ctx` and sibling values keep being written. Entity-typed values are
    /// written as their identifier.
    pub fn write(
        &self,
        ctx: &mut WriteContext<'_>,
        mapping: MappingId,
        value: &ObjectValue,
    ) -> Option<Value> {
        if value.is_null() {
            return Some(Value::Null);
        }
        match (&self.get(mapping).kind, value) {
            (MappingKind::Boolean, ObjectValue::Bool(b)) => Some(Value::Bool(*b)),
            (MappingKind::Number, ObjectValue::Int(n)) => Some(Value::Int(*n)),
            (MappingKind::Number, ObjectValue::Float(n)) => Some(Value::Double(*n)),
            (MappingKind::String, ObjectValue::String(s)) => Some(Value::String(s.clone())),
            (MappingKind::Date, ObjectValue::Date(ms)) => Some(Value::Date(*ms)),
            (MappingKind::Binary, ObjectValue::Binary(b)) => Some(Value::Binary(b.clone())),
            (MappingKind::ObjectId, ObjectValue::ObjectId(id)) => Some(Value::ObjectId(*id)),
            (MappingKind::Enum(e), ObjectValue::String(name)) => match e.stored_value(name) {
                Some(stored) => Some(stored.clone()),
                None => {
                    ctx.add_issue(format!("Invalid enum value '{}'.", name), None);
                    None
                }
            },
            (MappingKind::Array(element), ObjectValue::Array(items)) => {
                let element = *element;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    ctx.path.push(i.to_string());
                    out.push(self.write(ctx, element, item).unwrap_or(Value::Null));
                    ctx.path.pop();
                }
                Some(Value::Array(out))
            }
            (MappingKind::Tuple(elements), ObjectValue::Array(items)) => {
                if elements.len() != items.len() {
                    ctx.add_issue(
                        format!("Expected tuple of length {}.", elements.len()),
                        None,
                    );
                    return None;
                }
                let mut out = Vec::with_capacity(items.len());
                for (i, (element, item)) in elements.iter().zip(items).enumerate() {
                    ctx.path.push(i.to_string());
                    out.push(self.write(ctx, *element, item).unwrap_or(Value::Null));
                    ctx.path.pop();
                }
                Some(Value::Array(out))
            }
            (MappingKind::Any, v) => self.write_any(ctx, v),
            (MappingKind::Object(_) | MappingKind::Class(_), ObjectValue::Object(obj)) => {
                self.write_embedded(ctx, mapping, obj).map(Value::Document)
            }
            (MappingKind::Entity(_), ObjectValue::Object(obj)) => match obj.id() {
                Some(id) => Some(id),
                None => {
                    ctx.add_issue("Referenced entity has no identifier.", None);
                    None
                }
            },
            (MappingKind::Entity(_), ObjectValue::Reference(r)) => Some(r.id().clone()),
            (_, v) => {
                ctx.add_issue(
                    format!(
                        "Expected {}, found {}.",
                        self.get(mapping).describe(),
                        v.kind_name()
                    ),
                    None,
                );
                None
            }
        }
    }

    fn write_embedded(
        &self,
        ctx: &mut WriteContext<'_>,
        declared: MappingId,
        obj: &ObjectRef,
    ) -> Option<Document> {
        if !ctx.enter(obj) {
            ctx.add_issue("Circular reference of embedded object.", None);
            return None;
        }
        let concrete = self.mapping_for_object(declared, obj);
        let mut doc = Document::new();
        if let Some(class) = self.class(concrete) {
            if let (Some(field), Some(value)) =
                (class.discriminator_field(), class.discriminator_value())
            {
                doc.insert(field, value);
            }
        }
        if let Some(object) = self.get(concrete).as_object() {
            self.write_properties(ctx, object, obj, &mut doc);
        }
        ctx.leave();
        Some(doc)
    }

    fn write_properties(
        &self,
        ctx: &mut WriteContext<'_>,
        object: &ObjectMapping,
        obj: &ObjectRef,
        doc: &mut Document,
    ) {
        for property in object.stored_properties() {
            let Some(value) = obj.get(property.name()) else {
                continue;
            };
            if value.is_null() && !property.has_flags(PropertyFlags::NULLABLE) {
                continue;
            }
            ctx.path.push(property.name());
            if let Some(stored) = self.write(ctx, property.mapping(), &value) {
                doc.insert(property.field(), stored);
            }
            ctx.path.pop();
        }
    }

    /// Write a root entity, identifier and discriminator included.
    pub fn write_document(
        &self,
        ctx: &mut WriteContext<'_>,
        mapping: MappingId,
        entity: &ObjectRef,
    ) -> Option<Document> {
        let concrete = self.mapping_for_object(mapping, entity);
        let class = self.class(concrete)?;
        let object = self.get(concrete).as_object()?;
        if !ctx.enter(entity) {
            ctx.add_issue("Circular reference of embedded object.", None);
            return None;
        }
        let mut doc = Document::new();
        match entity.id() {
            Some(id) => {
                doc.insert("_id", id);
            }
            None => ctx.add_issue("Missing identifier.", None),
        }
        if let (Some(field), Some(value)) =
            (class.discriminator_field(), class.discriminator_value())
        {
            doc.insert(field, value);
        }
        self.write_properties(ctx, object, entity, &mut doc);
        ctx.leave();
        Some(doc)
    }

    fn write_any(&self, ctx: &mut WriteContext<'_>, value: &ObjectValue) -> Option<Value> {
        match value {
            ObjectValue::Null => Some(Value::Null),
            ObjectValue::Bool(b) => Some(Value::Bool(*b)),
            ObjectValue::Int(n) => Some(Value::Int(*n)),
            ObjectValue::Float(n) => Some(Value::Double(*n)),
            ObjectValue::String(s) => Some(Value::String(s.clone())),
            ObjectValue::Date(ms) => Some(Value::Date(*ms)),
            ObjectValue::ObjectId(id) => Some(Value::ObjectId(*id)),
            ObjectValue::Binary(b) => Some(Value::Binary(b.clone())),
            ObjectValue::Reference(r) => Some(r.id().clone()),
            ObjectValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    ctx.path.push(i.to_string());
                    out.push(self.write_any(ctx, item).unwrap_or(Value::Null));
                    ctx.path.pop();
                }
                Some(Value::Array(out))
            }
            ObjectValue::Object(obj) => {
                // Mapped classes keep their shape even under an untyped property.
                if let Some(mapped) = obj.class().and_then(|c| self.by_class(&c)) {
                    return self.write(ctx, mapped, value);
                }
                if !ctx.enter(obj) {
                    ctx.add_issue("Circular reference of embedded object.", None);
                    return None;
                }
                let fields: Vec<(String, ObjectValue)> = obj
                    .read()
                    .fields()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut doc = Document::new();
                for (name, field) in fields {
                    ctx.path.push(name.clone());
                    if let Some(stored) = self.write_any(ctx, &field) {
                        doc.insert(name, stored);
                    }
                    ctx.path.pop();
                }
                ctx.leave();
                Some(Value::Document(doc))
            }
        }
    }
}
