//! Mapping-level configuration.

use crate::identity::{IdentityGenerator, ObjectIdGenerator, SequentialIdGenerator};
use crate::naming::NamingStrategy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How the session finds changes to managed entities at flush time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChangeTracking {
    /// Dirty-check every managed entity on flush.
    #[default]
    DeferredImplicit,
    /// Dirty-check only entities passed to `save` since the last flush.
    DeferredExplicit,
    /// Write entities whose revision counter moved since the last flush.
    Observe,
}

/// Which identifier generator new entity hierarchies get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    #[default]
    ObjectId,
    Sequential,
}

impl IdentityKind {
    /// A fresh generator instance.
    pub fn generator(self) -> Arc<dyn IdentityGenerator> {
        match self {
            IdentityKind::ObjectId => Arc::new(ObjectIdGenerator::new()),
            IdentityKind::Sequential => Arc::new(SequentialIdGenerator::new()),
        }
    }
}

/// Defaults applied while building mappings.
#[derive(Debug, Clone)]
pub struct MappingConfig {
    pub identity: IdentityKind,
    /// Entities get an optimistic-lock version field
    pub versioned: bool,
    pub version_field: String,
    pub discriminator_field: String,
    pub change_tracking: ChangeTracking,
    pub collection_naming: NamingStrategy,
    pub field_naming: NamingStrategy,
    pub discriminator_naming: NamingStrategy,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            identity: IdentityKind::ObjectId,
            versioned: true,
            version_field: "__v".to_string(),
            discriminator_field: "__t".to_string(),
            change_tracking: ChangeTracking::DeferredImplicit,
            collection_naming: NamingStrategy::CamelCase,
            field_naming: NamingStrategy::Identity,
            discriminator_naming: NamingStrategy::Identity,
        }
    }
}
