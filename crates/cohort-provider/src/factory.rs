use std::sync::Arc;

use cohort_common::ServiceKey;
use cohort_core::{CommandDispatcherFactory, Configuration, Group, LocalGroup};

use crate::{
    ClusteredServiceProviderRegistry, LocalServiceProviderRegistry, ProviderError,
    ServiceProviderRegistry,
};

/// Chooses between the clustered and local registry variants
pub enum ServiceProviderRegistryFactory<F> {
    Clustered(Arc<F>),
    Local(Arc<dyn Group>),
}

impl<F: CommandDispatcherFactory> ServiceProviderRegistryFactory<F> {
    /// Clustered when `cohort.clustering.enabled` is set, otherwise a local
    /// registry for the dispatcher factory's local node
    pub fn from_configuration(config: &Configuration, factory: Arc<F>) -> Self {
        if config.clustering_enabled() {
            return Self::Clustered(factory);
        }
        let group = factory.group();
        Self::Local(Arc::new(LocalGroup::new(
            group.name(),
            group.local_node().clone(),
        )))
    }

    pub fn is_clustered(&self) -> bool {
        matches!(self, Self::Clustered(_))
    }

    pub fn create_registry<T: ServiceKey>(
        &self,
        id: &str,
    ) -> Result<Arc<dyn ServiceProviderRegistry<T>>, ProviderError> {
        match self {
            Self::Clustered(factory) => Ok(Arc::new(ClusteredServiceProviderRegistry::new(
                factory.as_ref(),
                id,
            )?)),
            Self::Local(group) => Ok(Arc::new(LocalServiceProviderRegistry::new(group.clone()))),
        }
    }
}
