use std::{collections::HashSet, fmt, sync::Arc};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use cohort_common::{Node, ServiceKey};

use crate::ServiceProviderRegistry;

pub(crate) type CloseTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Handle to a service registered with a [`ServiceProviderRegistry`].
///
/// The registration stays in effect until [`close`](Self::close) is called.
pub struct ServiceProviderRegistration<T: ServiceKey> {
    service: T,
    registry: Arc<dyn ServiceProviderRegistry<T>>,
    close_task: Mutex<Option<CloseTask>>,
}

impl<T: ServiceKey> ServiceProviderRegistration<T> {
    pub(crate) fn new(
        service: T,
        registry: Arc<dyn ServiceProviderRegistry<T>>,
        close_task: CloseTask,
    ) -> Self {
        Self {
            service,
            registry,
            close_task: Mutex::new(Some(close_task)),
        }
    }

    pub fn service(&self) -> &T {
        &self.service
    }

    /// Current providers of the registered service
    pub async fn providers(&self) -> HashSet<Node> {
        self.registry.get_providers(&self.service).await
    }

    pub fn is_closed(&self) -> bool {
        self.close_task.lock().is_none()
    }

    /// Remove the local registration and announce the reduced provider set.
    /// Closing an already closed registration does nothing.
    pub async fn close(&self) {
        let task = self.close_task.lock().take();
        if let Some(task) = task {
            task().await;
        }
    }
}

impl<T: ServiceKey> fmt::Debug for ServiceProviderRegistration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProviderRegistration")
            .field("service", &self.service)
            .field("closed", &self.is_closed())
            .finish()
    }
}
