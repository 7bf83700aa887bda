use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use cohort_common::Node;
use cohort_core::{Group, metrics};

use crate::{ElectionPolicy, Singleton, SingletonError, SingletonService};

/// Builder for a singleton on a node running without clustering.
///
/// Quorum, election policy and backup service are accepted and ignored; with
/// a single node they have no effect.
pub struct LocalSingletonBuilder<S: SingletonService> {
    name: String,
    service: Arc<S>,
    group: Arc<dyn Group>,
}

impl<S: SingletonService> LocalSingletonBuilder<S> {
    pub fn new(name: impl Into<String>, service: S, group: Arc<dyn Group>) -> Self {
        Self {
            name: name.into(),
            service: Arc::new(service),
            group,
        }
    }

    pub fn require_quorum(self, _quorum: usize) -> Self {
        self
    }

    pub fn election_policy(self, _policy: Arc<dyn ElectionPolicy>) -> Self {
        self
    }

    pub fn backup_service(self, _backup: Arc<dyn SingletonService<Value = S::Value>>) -> Self {
        self
    }

    pub fn build(self) -> LocalSingleton<S> {
        LocalSingleton {
            name: self.name,
            service: self.service,
            group: self.group,
            value: Mutex::new(None),
        }
    }
}

/// Singleton whose only node is always primary
pub struct LocalSingleton<S: SingletonService> {
    name: String,
    service: Arc<S>,
    group: Arc<dyn Group>,
    value: Mutex<Option<S::Value>>,
}

#[async_trait]
impl<S: SingletonService> Singleton for LocalSingleton<S> {
    type Value = S::Value;

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), SingletonError> {
        let mut value = self.value.lock().await;
        if value.is_some() {
            return Ok(());
        }
        *value = Some(self.service.start().await?);
        metrics::set_singleton_primary(&self.name, true);
        info!(singleton = %self.name, "Started local singleton service");
        Ok(())
    }

    async fn stop(&self) {
        let mut value = self.value.lock().await;
        if value.take().is_none() {
            return;
        }
        if let Err(e) = self.service.stop().await {
            warn!(singleton = %self.name, "Failed to stop local singleton service: {}", e);
        }
        metrics::set_singleton_primary(&self.name, false);
        info!(singleton = %self.name, "Stopped local singleton service");
    }

    async fn value(&self) -> Option<S::Value> {
        self.value.lock().await.clone()
    }

    async fn is_primary(&self) -> bool {
        true
    }

    async fn providers(&self) -> HashSet<Node> {
        HashSet::from([self.group.local_node().clone()])
    }

    async fn primary_provider(&self) -> Option<Node> {
        Some(self.group.local_node().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RandomElectionPolicy, ServiceError};
    use cohort_core::LocalGroup;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl SingletonService for Arc<Counter> {
        type Value = usize;

        async fn start(&self) -> Result<usize, ServiceError> {
            Ok(self.starts.fetch_add(1, Ordering::SeqCst) + 1)
        }

        async fn stop(&self) -> Result<(), ServiceError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_local_singleton_is_always_primary() {
        let counter = Arc::new(Counter {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        let backup = Arc::new(counter.clone());
        let singleton = LocalSingletonBuilder::new(
            "demo",
            counter.clone(),
            Arc::new(LocalGroup::new("local", Node::new("solo"))),
        )
        .require_quorum(3)
        .election_policy(Arc::new(RandomElectionPolicy))
        .backup_service(backup)
        .build();

        assert!(singleton.is_primary().await);
        assert_eq!(singleton.providers().await, HashSet::from([Node::new("solo")]));
        assert_eq!(singleton.primary_provider().await, Some(Node::new("solo")));

        singleton.start().await.unwrap();
        singleton.start().await.unwrap();
        assert_eq!(singleton.value().await, Some(1));
        assert_eq!(counter.starts.load(Ordering::SeqCst), 1);

        singleton.stop().await;
        assert_eq!(singleton.value().await, None);
        assert_eq!(counter.stops.load(Ordering::SeqCst), 1);
    }
}
