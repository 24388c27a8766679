//! Session factory and mapping providers.

use crate::config::Configuration;
use docmodel_core::{Collection, Cx, Error, Outcome, Result, Store};
use docmodel_mapping::{MappingConfig, MappingRegistry};
use docmodel_session::{Session, SessionConfig};
use std::sync::Arc;

/// Source of the mapping registry a factory hands to its sessions.
///
/// Called once, when the factory is built. Closures taking the mapping
/// configuration implement it:
///
/// ```ignore
/// let provider = |config: &MappingConfig| {
///     MappingBuilder::new(config.clone())
///         .add(ClassDef::entity("Person").property(PropertyDef::new("name", TypeRef::String)))
///         .build()
/// };
/// ```
pub trait MappingProvider {
    fn get_mappings(&self, config: &MappingConfig) -> Result<MappingRegistry>;
}

impl<F> MappingProvider for F
where
    F: Fn(&MappingConfig) -> Result<MappingRegistry>,
{
    fn get_mappings(&self, config: &MappingConfig) -> Result<MappingRegistry> {
        self(config)
    }
}

/// Creates sessions that share one store and one mapping registry.
#[derive(Debug, Clone)]
pub struct SessionFactory<S: Store + Clone> {
    store: S,
    registry: Arc<MappingRegistry>,
    session_config: SessionConfig,
}

impl<S: Store + Clone> SessionFactory<S> {
    /// Build mappings through `provider` and validate the configuration.
    pub fn new(store: S, configuration: &Configuration, provider: &impl MappingProvider) -> Result<Self> {
        configuration.validate()?;
        let (mapping_config, session_config) = configuration.clone().into_parts();
        let registry = provider.get_mappings(&mapping_config)?;
        tracing::debug!(
            mappings = registry.len(),
            entities = registry.entities().count(),
            "Session factory ready"
        );
        Ok(Self {
            store,
            registry: Arc::new(registry),
            session_config,
        })
    }

    pub fn registry(&self) -> &Arc<MappingRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn create_session(&self) -> Session<S> {
        Session::new(
            self.store.clone(),
            Arc::clone(&self.registry),
            self.session_config.clone(),
        )
    }

    /// Declare every index of every entity mapping on its collection.
    ///
    /// Returns the index names in declaration order.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn create_indexes(&self, cx: &Cx) -> Outcome<Vec<String>, Error> {
        let mut names = Vec::new();
        for (_, entity) in self.registry.entities() {
            if entity.indexes().is_empty() {
                continue;
            }
            let collection = self.store.collection(entity.collection_name());
            for index in entity.indexes() {
                match collection.create_index(cx, index.clone()).await {
                    Outcome::Ok(name) => names.push(name),
                    Outcome::Err(e) => {
                        tracing::warn!(collection = collection.name(), error = %e, "Index creation failed");
                        return Outcome::Err(e);
                    }
                    Outcome::Cancelled(reason) => return Outcome::Cancelled(reason),
                    Outcome::Panicked(payload) => return Outcome::Panicked(payload),
                }
            }
        }
        Outcome::Ok(names)
    }
}
