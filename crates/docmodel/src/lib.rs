//! DocModel Rust - object-document mapping with unit-of-work sessions.
//!
//! DocModel maps dynamic domain objects to documents in a document store:
//!
//! - Declarative class mappings with inheritance, embedded objects,
//!   references and inverse relationships
//! - Sessions with an identity map, cascades and dirty checking
//! - Batched flushes with optimistic locking on a version field
//! - A chainable query builder that runs exactly once
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let factory = SessionFactory::new(MemoryStore::new(), &Configuration::default(), &|config: &MappingConfig| {
//!     MappingBuilder::new(config.clone())
//!         .add(
//!             ClassDef::entity("Person")
//!                 .property(PropertyDef::new("name", TypeRef::String))
//!                 .property(PropertyDef::new("age", TypeRef::Number)),
//!         )
//!         .build()
//! })?;
//!
//! let mut session = factory.create_session();
//! let bob = ObjectRef::new("Person").with("name", "Bob").with("age", 40);
//! session.save(&bob)?;
//! session.flush(&cx).await?;
//!
//! let adults = session
//!     .query("Person")?
//!     .find_all(doc! { "age" => doc! { "$gte" => 18 } })
//!     .sort(("name", SortDirection::Ascending))
//!     .execute(&cx)
//!     .await?;
//! ```
//!
//! # Layers
//!
//! - `docmodel-core`: values, documents, errors and the store traits
//! - `docmodel-mapping`: mapping metadata, read/write/walk/resolve
//! - `docmodel-query`: the query builder and its definition
//! - `docmodel-session`: session, persisters and batches
//! - `docmodel-memory`: an in-memory store for tests and embedding

pub mod config;
pub mod factory;

pub use config::Configuration;
pub use factory::{MappingProvider, SessionFactory};

pub use docmodel_core::{
    BulkWriteResult, Collection, ConfigError, ConflictError, Cursor, Cx, Document, Error,
    IndexSpec, MappingError, MappingIssue, ObjectId, Outcome, Result, SortDirection, SortSpec,
    Store, StoreError, StoreErrorKind, UsageError, UsageErrorKind, Value, doc, try_outcome,
};

pub use docmodel_mapping::{
    ChangeTracking, ClassDef, IdentityGenerator, IdentityKind, MappingBuilder, MappingConfig,
    MappingId, MappingRegistry, NamingStrategy, ObjectRef, ObjectValue, PropertyDef,
    PropertyFlags, Reference, TypeRef,
};

pub use docmodel_query::{EachIterator, Query, QueryDefinition, QueryKind, QueryResult};

pub use docmodel_session::{EntityState, PendingCounts, Session, SessionConfig};

pub use docmodel_memory::MemoryStore;

/// Everything a typical application needs.
pub mod prelude {
    pub use crate::{
        // Values and documents
        Cx,
        Document,
        Error,
        ObjectId,
        ObjectRef,
        ObjectValue,
        Outcome,
        Result,
        SortDirection,
        Value,
        doc,
        // Mapping
        ClassDef,
        MappingBuilder,
        MappingConfig,
        PropertyDef,
        PropertyFlags,
        TypeRef,
        // Sessions and queries
        Configuration,
        EachIterator,
        EntityState,
        MappingProvider,
        MemoryStore,
        Query,
        QueryResult,
        Session,
        SessionFactory,
    };
}
