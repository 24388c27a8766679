//! Mapping and property flag sets.

bitflags::bitflags! {
    /// Classifies the value kind a mapping node handles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MappingFlags: u32 {
        const NONE = 0;
        const ARRAY = 1;
        const BOOLEAN = 1 << 1;
        const CLASS = 1 << 2;
        const DATE = 1 << 3;
        const ENUM = 1 << 4;
        const NUMBER = 1 << 5;
        const OBJECT = 1 << 6;
        const STRING = 1 << 7;
        const TUPLE = 1 << 8;
        const ANY = 1 << 9;
        const BINARY = 1 << 10;
        const OBJECT_ID = 1 << 11;
        /// Persisted in its own collection.
        const ENTITY = 1 << 12;
        /// Stored inline inside its parent document.
        const EMBEDDED = 1 << 13;
        /// Top of a class hierarchy; owns the discriminator map.
        const INHERITANCE_ROOT = 1 << 14;
    }
}

bitflags::bitflags! {
    /// Per-property behavior.
    ///
    /// The cascade flags double as walk selectors: a walk requested with
    /// `CASCADE_SAVE` follows entity-typed properties carrying `CASCADE_SAVE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u32 {
        const NONE = 0;
        /// Neither read nor written.
        const IGNORED = 1;
        const CASCADE_SAVE = 1 << 1;
        const CASCADE_REMOVE = 1 << 2;
        const CASCADE_DETACH = 1 << 3;
        const CASCADE_REFRESH = 1 << 4;
        const CASCADE_MERGE = 1 << 5;
        const CASCADE_ALL = Self::CASCADE_SAVE.bits()
            | Self::CASCADE_REMOVE.bits()
            | Self::CASCADE_DETACH.bits()
            | Self::CASCADE_REFRESH.bits()
            | Self::CASCADE_MERGE.bits();
        /// Not stored; loaded by querying the owning side.
        const INVERSE_SIDE = 1 << 6;
        const NULLABLE = 1 << 7;
        /// Removing the parent removes the referenced entities.
        const ORPHAN_REMOVAL = 1 << 8;
        /// Walk selector: descend into entities reached through cascading properties.
        const WALK_ENTITIES = 1 << 9;
    }
}

impl PropertyFlags {
    /// The subset of flags that selects which entity-typed properties a walk follows.
    pub fn cascade_selector(self) -> PropertyFlags {
        self & (PropertyFlags::CASCADE_ALL | PropertyFlags::ORPHAN_REMOVAL)
    }
}
