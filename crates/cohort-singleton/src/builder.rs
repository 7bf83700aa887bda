// Singleton builder selection
// Chooses the local or distributed singleton variant when the node starts

use std::sync::Arc;

use cohort_core::{CommandDispatcherFactory, Configuration, Group, LocalGroup};
use cohort_provider::{ClusteredServiceProviderRegistry, ServiceProviderRegistry};

use crate::{
    DistributedSingletonBuilder, ElectionPolicy, LocalSingletonBuilder, Singleton, SingletonError,
    SingletonService, election_policy_from_configuration,
};

/// Provider registry id shared by the distributed singletons of a group
pub const SINGLETON_REGISTRY_ID: &str = "singletons";

/// Creates singleton builders of the variant chosen for this node
pub enum SingletonBuilderFactory<F> {
    Local(Arc<dyn Group>),
    Distributed {
        factory: Arc<F>,
        registry: Arc<dyn ServiceProviderRegistry<String>>,
    },
}

impl<F: CommandDispatcherFactory> SingletonBuilderFactory<F> {
    pub fn local(group: Arc<dyn Group>) -> Self {
        Self::Local(group)
    }

    /// Distributed singletons tracked by a new clustered provider registry
    pub fn distributed(factory: Arc<F>) -> Result<Self, SingletonError> {
        let registry = ClusteredServiceProviderRegistry::<String>::new(
            factory.as_ref(),
            SINGLETON_REGISTRY_ID,
        )?;
        Ok(Self::Distributed {
            factory,
            registry: Arc::new(registry),
        })
    }

    /// Distributed when `cohort.clustering.enabled` is set, local otherwise
    pub fn from_configuration(
        config: &Configuration,
        factory: Arc<F>,
    ) -> Result<Self, SingletonError> {
        if config.clustering_enabled() {
            return Self::distributed(factory);
        }
        let group = factory.group();
        Ok(Self::local(Arc::new(LocalGroup::new(
            group.name(),
            group.local_node().clone(),
        ))))
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, Self::Distributed { .. })
    }

    pub fn create_singleton_builder<S: SingletonService>(
        &self,
        name: impl Into<String>,
        service: S,
    ) -> SingletonBuilder<S, F> {
        match self {
            Self::Local(group) => {
                SingletonBuilder::Local(LocalSingletonBuilder::new(name, service, group.clone()))
            }
            Self::Distributed { factory, registry } => SingletonBuilder::Distributed(
                DistributedSingletonBuilder::new(name, service, factory.clone(), registry.clone()),
            ),
        }
    }

    /// Close the provider registry backing distributed singletons
    pub async fn close(&self) {
        if let Self::Distributed { registry, .. } = self {
            registry.close().await;
        }
    }
}

/// Builder for either singleton variant
pub enum SingletonBuilder<S: SingletonService, F> {
    Local(LocalSingletonBuilder<S>),
    Distributed(DistributedSingletonBuilder<S, F>),
}

impl<S: SingletonService, F: CommandDispatcherFactory> SingletonBuilder<S, F> {
    pub fn require_quorum(self, quorum: usize) -> Self {
        match self {
            Self::Local(builder) => Self::Local(builder.require_quorum(quorum)),
            Self::Distributed(builder) => Self::Distributed(builder.require_quorum(quorum)),
        }
    }

    pub fn election_policy(self, policy: Arc<dyn ElectionPolicy>) -> Self {
        match self {
            Self::Local(builder) => Self::Local(builder.election_policy(policy)),
            Self::Distributed(builder) => Self::Distributed(builder.election_policy(policy)),
        }
    }

    pub fn backup_service(self, backup: Arc<dyn SingletonService<Value = S::Value>>) -> Self {
        match self {
            Self::Local(builder) => Self::Local(builder.backup_service(backup)),
            Self::Distributed(builder) => Self::Distributed(builder.backup_service(backup)),
        }
    }

    /// Apply `cohort.singleton.quorum` and the configured election policy
    pub fn configured(self, config: &Configuration) -> Result<Self, SingletonError> {
        let quorum = usize::try_from(config.singleton_quorum()).map_err(|_| {
            SingletonError::Configuration(format!(
                "invalid singleton quorum {}",
                config.singleton_quorum()
            ))
        })?;
        let policy = election_policy_from_configuration(config)?;
        Ok(self.require_quorum(quorum).election_policy(policy))
    }

    pub fn build(self) -> Result<Arc<dyn Singleton<Value = S::Value>>, SingletonError> {
        match self {
            Self::Local(builder) => Ok(Arc::new(builder.build())),
            Self::Distributed(builder) => Ok(Arc::new(builder.build()?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceError;
    use async_trait::async_trait;
    use cohort_core::InMemoryCluster;
    use config::Config;

    struct Greeting;

    #[async_trait]
    impl SingletonService for Greeting {
        type Value = String;

        async fn start(&self) -> Result<String, ServiceError> {
            Ok("hello".to_string())
        }

        async fn stop(&self) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn configuration(overrides: &[(&str, &str)]) -> Configuration {
        let mut builder = Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        Configuration::from_config(builder.build().unwrap())
    }

    #[tokio::test]
    async fn test_local_variant_when_clustering_disabled() {
        let cluster = InMemoryCluster::new("test");
        let member = Arc::new(cluster.join("a").await);
        let factory = SingletonBuilderFactory::from_configuration(
            &configuration(&[("cohort.clustering.enabled", "false")]),
            member,
        )
        .unwrap();
        assert!(!factory.is_distributed());

        let singleton = factory
            .create_singleton_builder("greeting", Greeting)
            .require_quorum(5)
            .build()
            .unwrap();
        assert!(singleton.is_primary().await);
        singleton.start().await.unwrap();
        assert_eq!(singleton.value().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn test_distributed_variant_applies_configuration() {
        let cluster = InMemoryCluster::new("test");
        let member = Arc::new(cluster.join("a").await);
        let factory =
            SingletonBuilderFactory::from_configuration(&Configuration::default(), member).unwrap();
        assert!(factory.is_distributed());

        let rejected = factory
            .create_singleton_builder("random", Greeting)
            .configured(&configuration(&[("cohort.singleton.election_policy", "random")]))
            .unwrap()
            .build();
        assert!(matches!(rejected, Err(SingletonError::Configuration(_))));

        let invalid = factory
            .create_singleton_builder("negative", Greeting)
            .configured(&configuration(&[("cohort.singleton.quorum", "-1")]));
        assert!(matches!(invalid, Err(SingletonError::Configuration(_))));

        let singleton = factory
            .create_singleton_builder("greeting", Greeting)
            .configured(&Configuration::default())
            .unwrap()
            .build()
            .unwrap();
        singleton.start().await.unwrap();

        let mut primary = false;
        for _ in 0..300 {
            if singleton.is_primary().await {
                primary = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(primary);
        assert_eq!(singleton.value().await, Some("hello".to_string()));

        singleton.stop().await;
        factory.close().await;
    }
}
