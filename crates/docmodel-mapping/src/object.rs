//! Dynamic domain objects.
//!
//! Domain objects are shared, mutable bags of named values tagged with a
//! class name. The session tracks them by pointer identity, so two handles
//! to the same allocation are the same object.

use crate::reference::Reference;
use docmodel_core::{Error, ObjectId, Result, UsageErrorKind, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// A property value on the object side.
#[derive(Debug, Clone)]
pub enum ObjectValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Milliseconds since epoch
    Date(i64),
    ObjectId(ObjectId),
    Binary(Vec<u8>),
    Array(Vec<ObjectValue>),
    /// An embedded object or a resolved entity
    Object(ObjectRef),
    /// An entity that has not been loaded yet
    Reference(Reference),
}

impl ObjectValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, ObjectValue::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            ObjectValue::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            ObjectValue::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ObjectValue]> {
        match self {
            ObjectValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ObjectValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ObjectValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Short kind name used in mapping messages.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            ObjectValue::Null => "null",
            ObjectValue::Bool(_) => "boolean",
            ObjectValue::Int(_) | ObjectValue::Float(_) => "number",
            ObjectValue::String(_) => "string",
            ObjectValue::Date(_) => "date",
            ObjectValue::ObjectId(_) => "objectId",
            ObjectValue::Binary(_) => "binary",
            ObjectValue::Array(_) => "array",
            ObjectValue::Object(_) => "object",
            ObjectValue::Reference(_) => "reference",
        }
    }
}

impl PartialEq for ObjectValue {
    /// Scalars compare by value; objects by identity; references structurally.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ObjectValue::Null, ObjectValue::Null) => true,
            (ObjectValue::Bool(a), ObjectValue::Bool(b)) => a == b,
            (ObjectValue::Int(a), ObjectValue::Int(b)) => a == b,
            (ObjectValue::Float(a), ObjectValue::Float(b)) => a == b,
            (ObjectValue::String(a), ObjectValue::String(b)) => a == b,
            (ObjectValue::Date(a), ObjectValue::Date(b)) => a == b,
            (ObjectValue::ObjectId(a), ObjectValue::ObjectId(b)) => a == b,
            (ObjectValue::Binary(a), ObjectValue::Binary(b)) => a == b,
            (ObjectValue::Array(a), ObjectValue::Array(b)) => a == b,
            (ObjectValue::Object(a), ObjectValue::Object(b)) => a.ptr_eq(b),
            (ObjectValue::Reference(a), ObjectValue::Reference(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for ObjectValue {
    fn from(v: bool) -> Self {
        ObjectValue::Bool(v)
    }
}

impl From<i32> for ObjectValue {
    fn from(v: i32) -> Self {
        ObjectValue::Int(i64::from(v))
    }
}

impl From<i64> for ObjectValue {
    fn from(v: i64) -> Self {
        ObjectValue::Int(v)
    }
}

impl From<f64> for ObjectValue {
    fn from(v: f64) -> Self {
        ObjectValue::Float(v)
    }
}

impl From<&str> for ObjectValue {
    fn from(v: &str) -> Self {
        ObjectValue::String(v.to_string())
    }
}

impl From<String> for ObjectValue {
    fn from(v: String) -> Self {
        ObjectValue::String(v)
    }
}

impl From<ObjectId> for ObjectValue {
    fn from(v: ObjectId) -> Self {
        ObjectValue::ObjectId(v)
    }
}

impl From<ObjectRef> for ObjectValue {
    fn from(v: ObjectRef) -> Self {
        ObjectValue::Object(v)
    }
}

impl From<&ObjectRef> for ObjectValue {
    fn from(v: &ObjectRef) -> Self {
        ObjectValue::Object(v.clone())
    }
}

impl From<Reference> for ObjectValue {
    fn from(v: Reference) -> Self {
        ObjectValue::Reference(v)
    }
}

impl<T: Into<ObjectValue>> From<Vec<T>> for ObjectValue {
    fn from(v: Vec<T>) -> Self {
        ObjectValue::Array(v.into_iter().map(Into::into).collect())
    }
}

/// The object payload behind an [`ObjectRef`].
#[derive(Default)]
pub struct Object {
    class: Option<String>,
    id: Option<Value>,
    fields: IndexMap<String, ObjectValue>,
    revision: u64,
    sealed: bool,
}

impl Object {
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<&ObjectValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &IndexMap<String, ObjectValue> {
        &self.fields
    }

    /// Set a field, bumping the revision.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ObjectValue>) {
        self.fields.insert(name.into(), value.into());
        self.revision += 1;
    }

    /// Remove a field, bumping the revision when it existed.
    pub fn unset(&mut self, name: &str) -> Option<ObjectValue> {
        let old = self.fields.shift_remove(name);
        if old.is_some() {
            self.revision += 1;
        }
        old
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// A shared handle to a domain object.
///
/// Cloning the handle does not clone the object. Equality on handles is
/// pointer identity (see [`ObjectRef::ptr_eq`]).
#[derive(Clone, Default)]
pub struct ObjectRef(Arc<RwLock<Object>>);

/// A non-owning handle to a domain object.
#[derive(Clone, Default)]
pub struct WeakObjectRef(Weak<RwLock<Object>>);

impl ObjectRef {
    /// A new, empty object of the given class.
    pub fn new(class: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(Object {
            class: Some(class.into()),
            ..Object::default()
        })))
    }

    /// A new object without a class (for untyped embedded values).
    pub fn untyped() -> Self {
        Self::default()
    }

    /// Builder-style field assignment.
    pub fn with(self, name: impl Into<String>, value: impl Into<ObjectValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Builder-style identifier assignment, for objects that arrive with an id.
    pub fn with_id(self, id: impl Into<Value>) -> Self {
        self.write().id = Some(id.into());
        self
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Object> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Object> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn class(&self) -> Option<String> {
        self.read().class.clone()
    }

    pub fn id(&self) -> Option<Value> {
        self.read().id.clone()
    }

    /// Assign an identifier.
    ///
    /// Sealed objects reject a *new* identifier; re-assigning the same value is fine.
    pub fn set_id(&self, id: Value) -> Result<()> {
        let mut obj = self.write();
        if obj.sealed && obj.id.as_ref() != Some(&id) {
            return Err(Error::usage(
                UsageErrorKind::NotExtensible,
                format!(
                    "Cannot set identifier on non-extensible object of class '{}'.",
                    obj.class.as_deref().unwrap_or("<untyped>")
                ),
            ));
        }
        obj.id = Some(id);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<ObjectValue> {
        self.read().fields.get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<ObjectValue>) {
        self.write().set(name, value);
    }

    pub fn unset(&self, name: &str) -> Option<ObjectValue> {
        self.write().unset(name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.read().fields.keys().cloned().collect()
    }

    /// Mutation counter; bumps on every field write.
    pub fn revision(&self) -> u64 {
        self.read().revision
    }

    /// Prevent identifier assignment on this object.
    pub fn seal(&self) {
        self.write().sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.read().sealed
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the shared allocation; stable for the object's lifetime.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Arc::downgrade(&self.0))
    }
}

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl fmt::Debug for ObjectRef {
    // Fields are left out: object graphs may be cyclic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let obj = self.read();
        f.debug_struct("ObjectRef")
            .field("class", &obj.class)
            .field("id", &obj.id)
            .field("fields", &obj.fields.len())
            .field("addr", &format_args!("{:#x}", self.addr()))
            .finish()
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObjectRef(alive: {})", self.is_alive())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class)
            .field("id", &self.id)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("revision", &self.revision)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_share_state() {
        let a = ObjectRef::new("Person").with("name", "Bob");
        let b = a.clone();
        b.set("name", "Alice");
        assert_eq!(a.get("name"), Some(ObjectValue::from("Alice")));
        assert!(a.ptr_eq(&b));
        assert_eq!(a.addr(), b.addr());
        assert!(!a.ptr_eq(&ObjectRef::new("Person")));
    }

    #[test]
    fn revision_tracks_mutations() {
        let p = ObjectRef::new("Person");
        let start = p.revision();
        p.set("age", 3);
        p.set("age", 4);
        assert_eq!(p.revision(), start + 2);
        p.unset("missing");
        assert_eq!(p.revision(), start + 2);
    }

    #[test]
    fn sealed_objects_reject_new_ids() {
        let p = ObjectRef::new("Person");
        p.seal();
        let err = p.set_id(Value::Int(1)).unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::NotExtensible));

        let q = ObjectRef::new("Person").with_id(5);
        q.seal();
        assert!(q.set_id(Value::Int(5)).is_ok());
    }

    #[test]
    fn object_values_compare_objects_by_identity() {
        let a = ObjectRef::new("Address");
        let b = ObjectRef::new("Address");
        assert_eq!(ObjectValue::from(&a), ObjectValue::from(&a));
        assert_ne!(ObjectValue::from(&a), ObjectValue::from(&b));
    }

    #[test]
    fn weak_handles_expire() {
        let weak = {
            let p = ObjectRef::new("Person");
            p.downgrade()
        };
        assert!(weak.upgrade().is_none());
    }
}
