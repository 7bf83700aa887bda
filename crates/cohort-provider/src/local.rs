use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use futures::FutureExt;
use tracing::debug;

use cohort_common::{Node, ServiceKey};
use cohort_core::Group;

use crate::{
    ProviderError, ProvidersListener, ServiceProviderRegistration, ServiceProviderRegistry,
    listener::notify,
};

struct LocalInner<T: ServiceKey> {
    group: Arc<dyn Group>,
    services: DashMap<T, Option<Arc<dyn ProvidersListener>>>,
    closed: AtomicBool,
}

impl<T: ServiceKey> LocalInner<T> {
    fn local(&self) -> HashSet<Node> {
        HashSet::from([self.group.local_node().clone()])
    }
}

/// Service provider registry for a process running without clustering.
///
/// The local node is the only possible provider; no commands are dispatched.
pub struct LocalServiceProviderRegistry<T: ServiceKey> {
    inner: Arc<LocalInner<T>>,
}

impl<T: ServiceKey> Clone for LocalServiceProviderRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ServiceKey> fmt::Debug for LocalServiceProviderRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalServiceProviderRegistry")
            .field("node", self.inner.group.local_node())
            .field("services", &self.inner.services.len())
            .finish()
    }
}

impl<T: ServiceKey> LocalServiceProviderRegistry<T> {
    pub fn new(group: Arc<dyn Group>) -> Self {
        Self {
            inner: Arc::new(LocalInner {
                group,
                services: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl<T: ServiceKey> ServiceProviderRegistry<T> for LocalServiceProviderRegistry<T> {
    fn group(&self) -> Arc<dyn Group> {
        self.inner.group.clone()
    }

    async fn register(
        &self,
        service: T,
        listener: Option<Arc<dyn ProvidersListener>>,
    ) -> Result<ServiceProviderRegistration<T>, ProviderError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ProviderError::Closed(self.inner.group.name().to_string()));
        }
        match self.inner.services.entry(service.clone()) {
            Entry::Occupied(_) => {
                return Err(ProviderError::AlreadyRegistered(format!("{service:?}")));
            }
            Entry::Vacant(entry) => {
                entry.insert(listener.clone());
            }
        }
        debug!(service = ?service, "Registered local service");

        if let Some(listener) = listener {
            notify(&listener, &service, &self.inner.local()).await;
        }

        let inner = self.inner.clone();
        let key = service.clone();
        Ok(ServiceProviderRegistration::new(
            service,
            Arc::new(self.clone()),
            Box::new(move || {
                async move {
                    inner.services.remove(&key);
                }
                .boxed()
            }),
        ))
    }

    async fn get_providers(&self, service: &T) -> HashSet<Node> {
        self.cached_providers(service)
    }

    async fn get_services(&self) -> HashSet<T> {
        self.get_local_services()
    }

    fn get_local_services(&self) -> HashSet<T> {
        self.inner.services.iter().map(|e| e.key().clone()).collect()
    }

    fn cached_providers(&self, service: &T) -> HashSet<Node> {
        if self.inner.services.contains_key(service) {
            self.inner.local()
        } else {
            HashSet::new()
        }
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.services.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::LocalGroup;
    use parking_lot::Mutex;

    fn registry() -> LocalServiceProviderRegistry<String> {
        LocalServiceProviderRegistry::new(Arc::new(LocalGroup::new("local", Node::new("solo"))))
    }

    #[tokio::test]
    async fn test_local_node_is_only_provider() {
        let registry = registry();
        let solo = HashSet::from([Node::new("solo")]);

        assert!(registry.get_providers(&"x".to_string()).await.is_empty());
        let registration = registry.register("x".to_string(), None).await.unwrap();
        assert_eq!(registry.get_providers(&"x".to_string()).await, solo);
        assert_eq!(registration.providers().await, solo);
        assert_eq!(
            registry.get_services().await,
            HashSet::from(["x".to_string()])
        );

        registration.close().await;
        assert!(registry.get_providers(&"x".to_string()).await.is_empty());
        assert!(registry.get_local_services().is_empty());
    }

    #[tokio::test]
    async fn test_listener_invoked_on_register() {
        let registry = registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let listener: Arc<dyn ProvidersListener> = Arc::new(move |providers: &HashSet<Node>| {
            s.lock().push(providers.clone());
        });

        let _registration = registry.register("x".to_string(), Some(listener)).await.unwrap();
        assert_eq!(*seen.lock(), vec![HashSet::from([Node::new("solo")])]);
    }

    #[tokio::test]
    async fn test_duplicate_and_closed() {
        let registry = registry();
        let _registration = registry.register("x".to_string(), None).await.unwrap();
        assert!(matches!(
            registry.register("x".to_string(), None).await,
            Err(ProviderError::AlreadyRegistered(_))
        ));

        registry.close().await;
        assert!(matches!(
            registry.register("y".to_string(), None).await,
            Err(ProviderError::Closed(_))
        ));
    }
}
