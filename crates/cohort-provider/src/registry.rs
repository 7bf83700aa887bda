use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;

use cohort_common::{Node, ServiceKey};
use cohort_core::Group;

use crate::{ProviderError, ProvidersListener, ServiceProviderRegistration};

/// Tracks which members of a group provide a given service.
///
/// Query operations never fail; dispatch errors reduce the result instead.
#[async_trait]
pub trait ServiceProviderRegistry<T: ServiceKey>: Send + Sync + 'static {
    /// The group whose members are tracked
    fn group(&self) -> Arc<dyn Group>;

    /// Register the local node as a provider of `service`.
    ///
    /// Fails if `service` is already registered on this node.
    async fn register(
        &self,
        service: T,
        listener: Option<Arc<dyn ProvidersListener>>,
    ) -> Result<ServiceProviderRegistration<T>, ProviderError>;

    /// Nodes that currently provide `service`
    async fn get_providers(&self, service: &T) -> HashSet<Node>;

    /// Every service provided by at least one reachable node
    async fn get_services(&self) -> HashSet<T>;

    /// Services registered on the local node
    fn get_local_services(&self) -> HashSet<T>;

    /// Provider set last delivered to this node for `service`
    fn cached_providers(&self, service: &T) -> HashSet<Node>;

    /// Stop tracking membership and release the registry's dispatcher
    async fn close(&self);
}
