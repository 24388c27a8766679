//! Configuration surface.
//!
//! One serde-loadable struct covering both layers. Every field has a
//! default, so an empty JSON object is a valid configuration.

use docmodel_core::{ConfigError, Error, Result};
use docmodel_mapping::{ChangeTracking, IdentityKind, MappingConfig, NamingStrategy};
use docmodel_session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Settings for a [`SessionFactory`](crate::SessionFactory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Identifier generator for entity hierarchies
    pub identity: IdentityKind,
    pub versioned: bool,
    pub version_field: String,
    pub discriminator_field: String,
    pub change_tracking: ChangeTracking,
    /// Class name -> collection name
    pub collection_naming: NamingStrategy,
    /// Property name -> document field
    pub field_naming: NamingStrategy,
    /// Class name -> discriminator value
    pub discriminator_naming: NamingStrategy,
    /// Callbacks `each` runs at the same time
    pub each_concurrency: usize,
    /// Documents `each` hydrates per chunk
    pub each_chunk_size: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        let mapping = MappingConfig::default();
        let session = SessionConfig::default();
        Self {
            identity: mapping.identity,
            versioned: mapping.versioned,
            version_field: mapping.version_field,
            discriminator_field: mapping.discriminator_field,
            change_tracking: mapping.change_tracking,
            collection_naming: mapping.collection_naming,
            field_naming: mapping.field_naming,
            discriminator_naming: mapping.discriminator_naming,
            each_concurrency: session.each_concurrency,
            each_chunk_size: session.each_chunk_size,
        }
    }
}

impl Configuration {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no session could work with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(Error::Config(ConfigError {
                message: message.to_string(),
                source: None,
            }))
        };
        if self.version_field.is_empty() {
            return invalid("version_field must not be empty");
        }
        if self.discriminator_field.is_empty() {
            return invalid("discriminator_field must not be empty");
        }
        if self.version_field == self.discriminator_field {
            return invalid("version_field and discriminator_field must differ");
        }
        if self.version_field == "_id" || self.discriminator_field == "_id" {
            return invalid("'_id' is reserved for identifiers");
        }
        if self.each_concurrency == 0 || self.each_chunk_size == 0 {
            return invalid("each_concurrency and each_chunk_size must be at least 1");
        }
        Ok(())
    }

    pub fn mapping_config(&self) -> MappingConfig {
        MappingConfig {
            identity: self.identity,
            versioned: self.versioned,
            version_field: self.version_field.clone(),
            discriminator_field: self.discriminator_field.clone(),
            change_tracking: self.change_tracking,
            collection_naming: self.collection_naming,
            field_naming: self.field_naming,
            discriminator_naming: self.discriminator_naming,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            each_concurrency: self.each_concurrency,
            each_chunk_size: self.each_chunk_size,
        }
    }

    /// Split into the per-layer configurations.
    pub fn into_parts(self) -> (MappingConfig, SessionConfig) {
        (self.mapping_config(), self.session_config())
    }
}
