//! Documents to objects.

use crate::context::ReadContext;
use crate::mapping::{MappingId, MappingKind, ObjectMapping};
use crate::object::{ObjectRef, ObjectValue};
use crate::reference::Reference;
use crate::registry::MappingRegistry;
use docmodel_core::{Document, Value};

impl MappingRegistry {
    /// Read a stored value through `mapping`.
    ///
    /// Returns `None` for a value that failed to map; the failure is recorded
    /// in `ctx` and sibling values keep being read.
    pub fn read(
        &self,
        ctx: &mut ReadContext<'_>,
        mapping: MappingId,
        value: &Value,
    ) -> Option<ObjectValue> {
        if value.is_null() {
            return Some(ObjectValue::Null);
        }
        match (&self.get(mapping).kind, value) {
            (MappingKind::Boolean, Value::Bool(b)) => Some(ObjectValue::Bool(*b)),
            (MappingKind::Number, Value::Int(n)) => Some(ObjectValue::Int(*n)),
            (MappingKind::Number, Value::Double(n)) => Some(ObjectValue::Float(*n)),
            (MappingKind::String, Value::String(s)) => Some(ObjectValue::String(s.clone())),
            (MappingKind::Date, Value::Date(ms)) => Some(ObjectValue::Date(*ms)),
            (MappingKind::Binary, Value::Binary(b)) => Some(ObjectValue::Binary(b.clone())),
            (MappingKind::ObjectId, Value::ObjectId(id)) => Some(ObjectValue::ObjectId(*id)),
            (MappingKind::Enum(e), v) => match e.member_for(v) {
                Some(name) => Some(ObjectValue::String(name.to_string())),
                None => {
                    ctx.add_issue(format!("Invalid enum value '{}'.", v), Some(v));
                    None
                }
            },
            (MappingKind::Array(element), Value::Array(items)) => {
                let element = *element;
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    ctx.path.push(i.to_string());
                    out.push(self.read(ctx, element, item).unwrap_or(ObjectValue::Null));
                    ctx.path.pop();
                }
                Some(ObjectValue::Array(out))
            }
            (MappingKind::Tuple(elements), Value::Array(items)) => {
                if elements.len() != items.len() {
                    ctx.add_issue(
                        format!("Expected tuple of length {}.", elements.len()),
                        Some(value),
                    );
                    return None;
                }
                let mut out = Vec::with_capacity(items.len());
                for (i, (element, item)) in elements.iter().zip(items).enumerate() {
                    ctx.path.push(i.to_string());
                    out.push(self.read(ctx, *element, item).unwrap_or(ObjectValue::Null));
                    ctx.path.pop();
                }
                Some(ObjectValue::Array(out))
            }
            (MappingKind::Any, v) => Some(any_to_object(v)),
            (MappingKind::Object(o), Value::Document(doc)) => {
                let obj = ObjectRef::untyped();
                self.read_properties(ctx, o, doc, &obj);
                Some(ObjectValue::Object(obj))
            }
            (MappingKind::Class(_), Value::Document(doc)) => {
                let concrete = self.get_mapping(ctx, mapping, doc);
                let (Some(class), Some(object)) = (
                    self.class(concrete),
                    self.get(concrete).as_object(),
                ) else {
                    return None;
                };
                let obj = ObjectRef::new(class.name());
                self.read_properties(ctx, object, doc, &obj);
                Some(ObjectValue::Object(obj))
            }
            (MappingKind::Entity(entity), id) => {
                if matches!(id, Value::Document(_) | Value::Array(_)) {
                    ctx.add_issue("Expected identifier.", Some(id));
                    return None;
                }
                let root = entity.class().inheritance_root();
                if let Some(managed) = ctx.lookup(root, id) {
                    return Some(ObjectValue::Object(managed));
                }
                let reference = Reference::new(mapping, root, id.clone());
                ctx.add_reference(reference.clone());
                Some(ObjectValue::Reference(reference))
            }
            (_, v) => {
                ctx.add_issue(
                    format!(
                        "Expected {}, found {}.",
                        self.get(mapping).describe(),
                        v.type_name()
                    ),
                    Some(v),
                );
                None
            }
        }
    }

    fn read_properties(
        &self,
        ctx: &mut ReadContext<'_>,
        object: &ObjectMapping,
        doc: &Document,
        target: &ObjectRef,
    ) {
        for property in object.stored_properties() {
            let Some(stored) = doc.get(property.field()) else {
                continue;
            };
            ctx.path.push(property.name());
            if let Some(value) = self.read(ctx, property.mapping(), stored) {
                target.set(property.name(), value);
            }
            ctx.path.pop();
        }
    }

    /// Pick the concrete class for a document of a polymorphic hierarchy.
    ///
    /// An unknown discriminator value is recorded as an issue and the
    /// inheritance root's shape is used, so callers still get an object.
    pub fn get_mapping(
        &self,
        ctx: &mut ReadContext<'_>,
        mapping: MappingId,
        doc: &Document,
    ) -> MappingId {
        let Some(class) = self.class(mapping) else {
            return mapping;
        };
        let Some(field) = class.discriminator_field() else {
            return mapping;
        };
        let root = class.inheritance_root();
        match doc.get(field) {
            None => mapping,
            Some(Value::String(value)) => match self.discriminated(root, value) {
                Some(found) => found,
                None => {
                    ctx.add_issue(
                        format!("Unrecognized discriminator value '{}'.", value),
                        doc.get(field),
                    );
                    root
                }
            },
            Some(other) => {
                ctx.add_issue(
                    format!("Unrecognized discriminator value '{}'.", other),
                    Some(other),
                );
                root
            }
        }
    }

    /// Subclass of `root` registered under a discriminator value.
    pub fn discriminated(&self, root: MappingId, value: &str) -> Option<MappingId> {
        self.class(root)
            .and_then(|c| c.discriminator_map.get(value).copied())
    }

    /// Hydrate a root entity document, identifier included, into a new object.
    pub fn read_document(
        &self,
        ctx: &mut ReadContext<'_>,
        mapping: MappingId,
        doc: &Document,
    ) -> Option<ObjectRef> {
        let concrete = self.get_mapping(ctx, mapping, doc);
        let class = self.class(concrete)?;
        let object = self.get(concrete).as_object()?;
        let obj = match doc.get("_id") {
            Some(id) if !id.is_null() => ObjectRef::new(class.name()).with_id(id.clone()),
            _ => {
                ctx.add_issue("Missing identifier.", None);
                ObjectRef::new(class.name())
            }
        };
        self.read_properties(ctx, object, doc, &obj);
        Some(obj)
    }

    /// Overwrite the stored properties of `target` from `doc`.
    ///
    /// Properties missing from the document are cleared; inverse and
    /// ignored properties are left alone.
    pub fn read_into(
        &self,
        ctx: &mut ReadContext<'_>,
        mapping: MappingId,
        doc: &Document,
        target: &ObjectRef,
    ) {
        let concrete = self.mapping_for_object(mapping, target);
        let Some(object) = self.get(concrete).as_object() else {
            return;
        };
        for property in object.stored_properties() {
            if !doc.contains_key(property.field()) {
                target.unset(property.name());
            }
        }
        self.read_properties(ctx, object, doc, target);
    }
}

/// Untyped conversion for `Any` properties.
fn any_to_object(value: &Value) -> ObjectValue {
    match value {
        Value::Null => ObjectValue::Null,
        Value::Bool(b) => ObjectValue::Bool(*b),
        Value::Int(n) => ObjectValue::Int(*n),
        Value::Double(n) => ObjectValue::Float(*n),
        Value::String(s) => ObjectValue::String(s.clone()),
        Value::Date(ms) => ObjectValue::Date(*ms),
        Value::ObjectId(id) => ObjectValue::ObjectId(*id),
        Value::Binary(b) => ObjectValue::Binary(b.clone()),
        Value::Array(items) => ObjectValue::Array(items.iter().map(any_to_object).collect()),
        Value::Document(doc) => {
            let obj = ObjectRef::untyped();
            for (k, v) in doc {
                obj.set(k.clone(), any_to_object(v));
            }
            ObjectValue::Object(obj)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::context::{ReadContext, ReferenceSource};
    use crate::fixtures;
    use crate::mapping::MappingId;
    use crate::object::{ObjectRef, ObjectValue};
    use docmodel_core::{Value, doc};

    struct Managed(ObjectRef);

    impl ReferenceSource for Managed {
        fn lookup(&self, _root: MappingId, id: &Value) -> Option<ObjectRef> {
            (self.0.id().as_ref() == Some(id)).then(|| self.0.clone())
        }
    }

    #[test]
    fn reads_entity_document_with_embedded_and_references() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        let stored = doc! {
            "_id" => 7,
            "name" => "Bob",
            "age" => 42,
            "mood" => "happy",
            "address" => doc! { "street" => "Main", "city" => "Springfield" },
            "parents" => vec![Value::Int(1), Value::Int(2)],
        };

        let mut ctx = ReadContext::new(&registry);
        let obj = registry.read_document(&mut ctx, person, &stored).unwrap();
        assert!(!ctx.has_errors(), "{:?}", ctx.issues());
        assert_eq!(ctx.references().len(), 2);

        assert_eq!(obj.class().as_deref(), Some("Person"));
        assert_eq!(obj.id(), Some(Value::Int(7)));
        assert_eq!(obj.get("name"), Some(ObjectValue::from("Bob")));
        let address = obj.get("address").unwrap();
        let address = address.as_object().unwrap();
        assert_eq!(address.class().as_deref(), Some("Address"));
        assert_eq!(address.get("city"), Some(ObjectValue::from("Springfield")));

        let parents = obj.get("parents").unwrap();
        let parents = parents.as_array().unwrap();
        assert_eq!(parents[0].as_reference().unwrap().id(), &Value::Int(1));
    }

    #[test]
    fn managed_entities_replace_references() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        let parent = ObjectRef::new("Person").with_id(1);
        let source = Managed(parent.clone());

        let mut ctx = ReadContext::new(&registry).with_source(&source);
        let stored = doc! { "_id" => 2, "parents" => vec![Value::Int(1)] };
        let obj = registry.read_document(&mut ctx, person, &stored).unwrap();

        assert!(ctx.references().is_empty());
        let parents = obj.get("parents").unwrap();
        assert!(parents.as_array().unwrap()[0].as_object().unwrap().ptr_eq(&parent));
    }

    #[test]
    fn collects_every_issue_with_its_path() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        let stored = doc! {
            "_id" => 3,
            "name" => 12,
            "mood" => "sleepy",
            "tags" => vec![Value::from("ok"), Value::Bool(true)],
            "address" => doc! { "city" => false },
        };

        let mut ctx = ReadContext::new(&registry);
        let obj = registry.read_document(&mut ctx, person, &stored).unwrap();
        let paths: Vec<&str> = ctx.issues().iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["name", "mood", "tags.1", "address.city"]);
        assert_eq!(ctx.issues()[0].message, "Expected string, found int.");
        assert_eq!(ctx.issues()[1].message, "Invalid enum value 'sleepy'.");
        assert!(obj.get("name").is_none());

        let err = ctx.finish(obj).unwrap_err();
        assert_eq!(err.mapping_issues().len(), 4);
    }

    #[test]
    fn discriminator_selects_subclass() {
        let registry = fixtures::registry();
        let animal = registry.by_class("Animal").unwrap();
        let mut ctx = ReadContext::new(&registry);

        let dog = registry
            .read_document(&mut ctx, animal, &doc! { "_id" => 1, "__t" => "Dog", "breed" => "pug" })
            .unwrap();
        let cat = registry
            .read_document(&mut ctx, animal, &doc! { "_id" => 2, "__t" => "cat" })
            .unwrap();

        assert!(!ctx.has_errors());
        assert_eq!(dog.class().as_deref(), Some("Dog"));
        assert_eq!(dog.get("breed"), Some(ObjectValue::from("pug")));
        assert_eq!(cat.class().as_deref(), Some("Cat"));
    }

    #[test]
    fn unknown_discriminator_falls_back_to_root_and_reports() {
        let registry = fixtures::registry();
        let animal = registry.by_class("Animal").unwrap();
        let mut ctx = ReadContext::new(&registry);

        let obj = registry
            .read_document(&mut ctx, animal, &doc! { "_id" => 1, "__t" => "Parrot", "name" => "Polly" })
            .unwrap();

        assert_eq!(obj.class().as_deref(), Some("Animal"));
        assert_eq!(obj.get("name"), Some(ObjectValue::from("Polly")));
        assert_eq!(
            ctx.issues()[0].message,
            "Unrecognized discriminator value 'Parrot'."
        );
    }

    #[test]
    fn missing_identifier_is_reported() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        let mut ctx = ReadContext::new(&registry);
        let obj = registry.read_document(&mut ctx, person, &doc! { "name" => "x" });
        assert!(obj.is_some());
        assert_eq!(ctx.issues()[0].message, "Missing identifier.");
    }

    #[test]
    fn read_into_clears_missing_stored_properties_only() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        let target = ObjectRef::new("Person")
            .with_id(1)
            .with("name", "old")
            .with("age", 30)
            .with("scratch", "keep");

        let mut ctx = ReadContext::new(&registry);
        registry.read_into(&mut ctx, person, &doc! { "_id" => 1, "name" => "new" }, &target);

        assert_eq!(target.get("name"), Some(ObjectValue::from("new")));
        assert!(target.get("age").is_none());
        assert_eq!(target.get("scratch"), Some(ObjectValue::from("keep")));
    }

    #[test]
    fn entity_value_must_be_an_identifier() {
        let registry = fixtures::registry();
        let person = registry.by_class("Person").unwrap();
        let mut ctx = ReadContext::new(&registry);
        let obj = registry.read_document(
            &mut ctx,
            person,
            &doc! { "_id" => 1, "pet" => doc! { "name" => "Rex" } },
        );
        assert!(obj.unwrap().get("pet").is_none());
        assert_eq!(ctx.issues()[0].message, "Expected identifier.");
        assert_eq!(ctx.issues()[0].path, "pet");
    }
}
