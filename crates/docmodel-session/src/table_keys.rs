//! Dense per-session keys for object identities.
//!
//! Batch operations are keyed by a small integer per entity so that scheduling
//! the same entity twice in one flush collapses to one operation. The key is
//! kept in a side-table from object address to weak handle; objects are never
//! tagged.

use docmodel_mapping::{ObjectRef, WeakObjectRef};
use std::collections::HashMap;
use std::fmt;

/// Key of one object identity within a [`TableKeys`] table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey(u32);

impl TableKey {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Weak side-table from object identity to [`TableKey`].
///
/// Counters are owned by the table, so independent sessions never share key
/// space.
#[derive(Debug, Default)]
pub struct TableKeys {
    entries: HashMap<usize, (WeakObjectRef, TableKey)>,
    next: u32,
}

impl TableKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for `obj`, assigning the next one on first sight.
    pub fn key_of(&mut self, obj: &ObjectRef) -> TableKey {
        if let Some(key) = self.get(obj) {
            return key;
        }
        let key = TableKey(self.next);
        self.next += 1;
        self.entries.insert(obj.addr(), (obj.downgrade(), key));
        key
    }

    /// Key for `obj` if one was assigned and the object is still the same
    /// allocation.
    pub fn get(&self, obj: &ObjectRef) -> Option<TableKey> {
        let (weak, key) = self.entries.get(&obj.addr())?;
        weak.upgrade()
            .filter(|live| live.ptr_eq(obj))
            .map(|_| *key)
    }

    pub fn release(&mut self, obj: &ObjectRef) {
        if self.get(obj).is_some() {
            self.entries.remove(&obj.addr());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
