//! Identity map: one managed instance per (inheritance root, identifier).
//!
//! Entities of a class hierarchy share one collection and one key space, so
//! the map is keyed by the hierarchy's root mapping rather than the concrete
//! class. Identifiers are hashed for bucketing and compared with numeric
//! looseness (`Int(1)` and `Double(1.0)` are the same key).

use docmodel_core::Value;
use docmodel_mapping::{MappingId, ObjectRef, ReferenceSource};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Bucket key in the identity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    root: MappingId,
    id_hash: u64,
}

impl IdentityKey {
    pub fn new(root: MappingId, id: &Value) -> Self {
        let mut hasher = DefaultHasher::new();
        hash_value(id, &mut hasher);
        Self {
            root,
            id_hash: hasher.finish(),
        }
    }

    pub fn root(&self) -> MappingId {
        self.root
    }

    pub fn id_hash(&self) -> u64 {
        self.id_hash
    }
}

/// Hash a value consistently with [`Value::loose_eq`].
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Int(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            // Integral doubles hash like the equal int.
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                2u8.hash(hasher);
                (*f as i64).hash(hasher);
            } else {
                3u8.hash(hasher);
                f.to_bits().hash(hasher);
            }
        }
        Value::String(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Date(ms) => {
            5u8.hash(hasher);
            ms.hash(hasher);
        }
        Value::ObjectId(id) => {
            6u8.hash(hasher);
            id.bytes().hash(hasher);
        }
        Value::Binary(b) => {
            7u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Array(items) => {
            8u8.hash(hasher);
            items.len().hash(hasher);
            for item in items {
                hash_value(item, hasher);
            }
        }
        Value::Document(doc) => {
            9u8.hash(hasher);
            doc.len().hash(hasher);
            for (k, item) in doc {
                k.hash(hasher);
                hash_value(item, hasher);
            }
        }
    }
}

/// Managed entities by identity.
///
/// Each entry keeps the identifier it was registered under, so an entity
/// stays reachable by that identifier even if its own id field changes
/// afterwards.
#[derive(Debug, Default)]
pub struct IdentityMap {
    buckets: HashMap<IdentityKey, Vec<(Value, ObjectRef)>>,
    len: usize,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The managed instance for `(root, id)`.
    pub fn get(&self, root: MappingId, id: &Value) -> Option<ObjectRef> {
        self.buckets
            .get(&IdentityKey::new(root, id))?
            .iter()
            .find(|(registered, _)| registered.loose_eq(id))
            .map(|(_, obj)| obj.clone())
    }

    /// Register `obj` under `(root, id)`.
    ///
    /// Returns the instance already registered for that identity when it is a
    /// different object; the map is left unchanged in that case.
    pub fn insert(&mut self, root: MappingId, id: &Value, obj: &ObjectRef) -> Option<ObjectRef> {
        if let Some(existing) = self.get(root, id) {
            return (!existing.ptr_eq(obj)).then_some(existing);
        }
        self.buckets
            .entry(IdentityKey::new(root, id))
            .or_default()
            .push((id.clone(), obj.clone()));
        self.len += 1;
        None
    }

    /// Remove `obj` if it is the instance registered for `(root, id)`.
    pub fn remove(&mut self, root: MappingId, id: &Value, obj: &ObjectRef) -> bool {
        let key = IdentityKey::new(root, id);
        let Some(bucket) = self.buckets.get_mut(&key) else {
            return false;
        };
        let before = bucket.len();
        bucket.retain(|(_, o)| !o.ptr_eq(obj));
        let removed = bucket.len() < before;
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
        if removed {
            self.len -= 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }
}

impl ReferenceSource for IdentityMap {
    fn lookup(&self, root: MappingId, id: &Value) -> Option<ObjectRef> {
        self.get(root, id)
    }
}
