//! Mapping metadata for DocModel Rust.
//!
//! `docmodel-mapping` describes how classes correspond to documents and
//! implements the object/document conversions the session builds on.
//!
//! # Core Concepts
//!
//! - **Object model**: [`ObjectRef`] handles to dynamic [`Object`]s holding
//!   [`ObjectValue`]s; identity is pointer identity.
//! - **Mappings**: a [`MappingRegistry`] arena of [`Mapping`] nodes, one
//!   variant per value kind (primitives, arrays, embedded objects, classes,
//!   entities).
//! - **Contexts**: [`ReadContext`], [`WriteContext`] and [`ResolveContext`]
//!   accumulate issues with their paths instead of failing fast.
//! - **Identity**: [`IdentityGenerator`] implementations and [`Reference`]
//!   placeholders for entities that are not loaded.
//! - **Declarations**: [`MappingBuilder`] validates [`ClassDef`]s into a registry.

pub mod builder;
mod compare;
pub mod config;
pub mod context;
pub mod flags;
pub mod identity;
pub mod mapping;
pub mod naming;
pub mod object;
mod read;
pub mod reference;
pub mod registry;
pub mod resolve;
pub mod walk;
mod write;

#[cfg(test)]
pub(crate) mod fixtures;

pub use builder::{ClassDef, MappingBuilder, PropertyDef, TypeRef};
pub use config::{ChangeTracking, IdentityKind, MappingConfig};
pub use context::{PathTracker, ReadContext, ReferenceSource, WriteContext};
pub use flags::{MappingFlags, PropertyFlags};
pub use identity::{IdentityGenerator, ObjectIdGenerator, SequentialIdGenerator};
pub use mapping::{
    ClassMapping, EntityMapping, EnumMapping, Mapping, MappingId, MappingKind, ObjectMapping,
    Property,
};
pub use naming::NamingStrategy;
pub use object::{Object, ObjectRef, ObjectValue, WeakObjectRef};
pub use reference::Reference;
pub use registry::MappingRegistry;
pub use resolve::{Relation, ResolveContext, ResolvedSegment};
pub use walk::WalkResult;
