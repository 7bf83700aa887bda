// Clustered service provider registry
// Tracks service providers across the group and re-synchronizes them on membership changes

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cohort_common::{CommandError, Membership, MembershipEvent, Node, ServiceKey};
use cohort_core::{
    Command, CommandDispatcher, CommandDispatcherFactory, Group, GroupListener, SerialExecutor,
    metrics,
};

use crate::{
    ProviderError, ProvidersListener, ServiceProviderRegistration, ServiceProviderRegistry,
    listener::notify,
};

/// Whether a node provides a service, as of one of that node's revisions.
///
/// Every node numbers the changes to its own registrations. A status only
/// replaces a known status of the same node when its revision is not older.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provided: bool,
    pub revision: u64,
}

/// Commands exchanged between provider registries of the same id
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ProviderCommand<T> {
    /// List the services registered on the receiving node
    Query,
    /// Whether the receiving node provides the service
    Locate(T),
    /// Provider statuses of a service, one per node that answered
    Notify {
        service: T,
        statuses: Vec<(Node, ProviderStatus)>,
    },
}

impl<T> ProviderCommand<T> {
    fn name(&self) -> &'static str {
        match self {
            ProviderCommand::Query => "query",
            ProviderCommand::Locate(_) => "locate",
            ProviderCommand::Notify { .. } => "notify",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProviderResponse<T> {
    Services { services: Vec<T>, revision: u64 },
    Located(ProviderStatus),
    Notified,
}

fn provided(statuses: &HashMap<Node, ProviderStatus>) -> HashSet<Node> {
    statuses
        .iter()
        .filter(|(_, status)| status.provided)
        .map(|(node, _)| node.clone())
        .collect()
}

/// Per-node state addressed by [`ProviderCommand`]s
pub struct ProviderState<T: ServiceKey> {
    id: String,
    local: DashMap<T, Option<Arc<dyn ProvidersListener>>>,
    /// Revision of `local`; held while `local` changes
    revision: Mutex<u64>,
    providers: DashMap<T, HashMap<Node, ProviderStatus>>,
    executor: SerialExecutor,
    closed: AtomicBool,
}

impl<T: ServiceKey> ProviderState<T> {
    fn new(id: &str) -> Self {
        // start above any revision an earlier registry on this node handed out
        let revision = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or_default();
        Self {
            id: id.to_string(),
            local: DashMap::new(),
            revision: Mutex::new(revision),
            providers: DashMap::new(),
            executor: SerialExecutor::new(format!("providers-{id}")),
            closed: AtomicBool::new(false),
        }
    }

    fn insert_local(&self, service: T, listener: Option<Arc<dyn ProvidersListener>>) -> bool {
        let mut revision = self.revision.lock();
        match self.local.entry(service) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(listener);
                *revision += 1;
                true
            }
        }
    }

    fn remove_local(&self, service: &T) -> bool {
        let mut revision = self.revision.lock();
        if self.local.remove(service).is_none() {
            return false;
        }
        *revision += 1;
        true
    }

    fn status(&self, service: &T) -> ProviderStatus {
        let revision = self.revision.lock();
        ProviderStatus {
            provided: self.local.contains_key(service),
            revision: *revision,
        }
    }

    fn local_services(&self) -> (Vec<T>, u64) {
        let revision = self.revision.lock();
        let services = self.local.iter().map(|e| e.key().clone()).collect();
        (services, *revision)
    }

    /// Merge the delivered statuses into the cache and queue the local
    /// listener, if any, with the resulting provider set.
    fn apply(&self, service: T, statuses: Vec<(Node, ProviderStatus)>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let listener = self.local.get(&service).and_then(|e| e.value().clone());
        // merge and listener queueing happen under the entry lock so listeners
        // observe provider sets in merge order
        let mut entry = self.providers.entry(service.clone()).or_default();
        let mut stale = 0;
        for (node, status) in statuses {
            match entry.get(&node) {
                Some(current) if current.revision > status.revision => stale += 1,
                _ => {
                    entry.insert(node, status);
                }
            }
        }
        if stale > 0 {
            debug!(
                registry = %self.id,
                service = ?service,
                stale,
                "Ignored outdated provider statuses"
            );
        }

        if let Some(listener) = listener {
            let providers = provided(&entry);
            self.executor.execute(async move {
                notify(&listener, &service, &providers).await;
            });
        }
    }

    fn cached(&self, service: &T) -> HashSet<Node> {
        self.providers
            .get(service)
            .map(|e| provided(e.value()))
            .unwrap_or_default()
    }

    fn prune(&self, membership: &Membership) {
        for mut entry in self.providers.iter_mut() {
            entry.value_mut().retain(|node, _| membership.contains(node));
        }
    }
}

#[async_trait]
impl<T: ServiceKey> Command for ProviderCommand<T> {
    type Context = ProviderState<T>;
    type Response = ProviderResponse<T>;

    async fn execute(
        self,
        context: &ProviderState<T>,
    ) -> Result<ProviderResponse<T>, CommandError> {
        match self {
            ProviderCommand::Query => {
                let (services, revision) = context.local_services();
                Ok(ProviderResponse::Services { services, revision })
            }
            ProviderCommand::Locate(service) => {
                Ok(ProviderResponse::Located(context.status(&service)))
            }
            ProviderCommand::Notify { service, statuses } => {
                context.apply(service, statuses);
                Ok(ProviderResponse::Notified)
            }
        }
    }
}

struct Inner<T: ServiceKey> {
    group: Arc<dyn Group>,
    state: Arc<ProviderState<T>>,
    dispatcher: Arc<dyn CommandDispatcher<ProviderCommand<T>>>,
    group_listener: Mutex<Option<Arc<dyn GroupListener>>>,
    generation: AtomicU64,
}

impl<T: ServiceKey> Inner<T> {
    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    fn dispatch_failed(&self, command: &ProviderCommand<T>) {
        metrics::record_dispatch_failure(&self.state.id, command.name());
    }

    /// Broadcast `command`, keeping only the successful responses
    async fn broadcast(&self, command: ProviderCommand<T>) -> Vec<(Node, ProviderResponse<T>)> {
        let responses = match self.dispatcher.execute_on_cluster(command.clone()).await {
            Ok(responses) => responses,
            Err(e) => {
                warn!(
                    registry = %self.state.id,
                    command = command.name(),
                    "Cluster dispatch failed: {}", e
                );
                self.dispatch_failed(&command);
                return Vec::new();
            }
        };

        responses
            .into_iter()
            .filter_map(|(node, response)| match response {
                Ok(response) => Some((node, response)),
                Err(e) => {
                    warn!(
                        registry = %self.state.id,
                        node = %node,
                        command = command.name(),
                        "Dispatch failed: {}", e
                    );
                    self.dispatch_failed(&command);
                    None
                }
            })
            .collect()
    }

    /// Status of `service` on every node that answered
    async fn statuses(&self, service: &T) -> Vec<(Node, ProviderStatus)> {
        self.broadcast(ProviderCommand::Locate(service.clone()))
            .await
            .into_iter()
            .filter_map(|(node, response)| match response {
                ProviderResponse::Located(status) => Some((node, status)),
                _ => None,
            })
            .collect()
    }

    async fn providers(&self, service: &T) -> HashSet<Node> {
        self.statuses(service)
            .await
            .into_iter()
            .filter(|(_, status)| status.provided)
            .map(|(node, _)| node)
            .collect()
    }

    async fn services(&self) -> HashSet<T> {
        self.broadcast(ProviderCommand::Query)
            .await
            .into_iter()
            .flat_map(|(_, response)| match response {
                ProviderResponse::Services { services, .. } => services,
                _ => Vec::new(),
            })
            .collect()
    }

    async fn announce(&self, service: T, statuses: Vec<(Node, ProviderStatus)>) {
        debug!(
            registry = %self.state.id,
            service = ?service,
            nodes = statuses.len(),
            "Broadcasting provider statuses"
        );
        self.broadcast(ProviderCommand::Notify { service, statuses })
            .await;
    }

    /// Collect the current statuses of `service` and announce them to the group
    async fn publish(&self, service: &T) {
        let statuses = self.statuses(service).await;
        if self.is_closed() {
            return;
        }
        self.announce(service.clone(), statuses).await;
    }

    async fn unregister(&self, service: &T) {
        if !self.state.remove_local(service) {
            return;
        }
        debug!(registry = %self.state.id, service = ?service, "Unregistered service");
        if !self.is_closed() {
            self.publish(service).await;
        }
    }

    fn membership_changed(self: Arc<Self>, event: &MembershipEvent) {
        if self.is_closed() {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.state.prune(&event.current);

        if !event.current.is_coordinator(self.group.local_node()) {
            return;
        }

        let inner = self.clone();
        self.state.executor.execute(async move {
            inner.resync(generation).await;
        });
    }

    /// Query every member for its services and rebroadcast the statuses of
    /// each service found.
    async fn resync(&self, generation: u64) {
        if self.is_closed() {
            return;
        }
        metrics::record_resync(&self.state.id);

        let mut answers: Vec<(Node, HashSet<T>, u64)> = Vec::new();
        for (node, response) in self.broadcast(ProviderCommand::Query).await {
            match response {
                ProviderResponse::Services { services, revision } => {
                    answers.push((node, services.into_iter().collect(), revision));
                }
                other => {
                    warn!(
                        registry = %self.state.id,
                        node = %node,
                        "Unexpected query response: {:?}", other
                    );
                }
            }
        }

        if self.generation.load(Ordering::Acquire) != generation {
            debug!(registry = %self.state.id, generation, "Discarding stale re-sync round");
            metrics::record_resync_discarded(&self.state.id);
            return;
        }
        if self.is_closed() {
            return;
        }

        let services: HashSet<T> = answers
            .iter()
            .flat_map(|(_, services, _)| services.iter().cloned())
            .collect();
        info!(
            registry = %self.state.id,
            services = services.len(),
            "Re-synchronizing service providers"
        );
        for service in services {
            let statuses = answers
                .iter()
                .map(|(node, services, revision)| {
                    let status = ProviderStatus {
                        provided: services.contains(&service),
                        revision: *revision,
                    };
                    (node.clone(), status)
                })
                .collect();
            self.announce(service, statuses).await;
        }
    }
}

struct MembershipListener<T: ServiceKey>(Weak<Inner<T>>);

#[async_trait]
impl<T: ServiceKey> GroupListener for MembershipListener<T> {
    async fn membership_changed(&self, event: &MembershipEvent) {
        if let Some(inner) = self.0.upgrade() {
            inner.membership_changed(event);
        }
    }
}

/// Service provider registry shared by every member of a group.
///
/// Cloning yields another handle to the same registry.
pub struct ClusteredServiceProviderRegistry<T: ServiceKey> {
    inner: Arc<Inner<T>>,
}

impl<T: ServiceKey> Clone for ClusteredServiceProviderRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ServiceKey> fmt::Debug for ClusteredServiceProviderRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusteredServiceProviderRegistry")
            .field("id", &self.inner.state.id)
            .field("node", self.inner.group.local_node())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl<T: ServiceKey> ClusteredServiceProviderRegistry<T> {
    /// Create the registry `id` on the local node of `factory`'s group.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<F: CommandDispatcherFactory>(factory: &F, id: &str) -> Result<Self, ProviderError> {
        let group = factory.group();
        let state = Arc::new(ProviderState::new(id));
        let dispatcher =
            factory.create_command_dispatcher::<ProviderCommand<T>>(id, state.clone())?;

        let inner = Arc::new(Inner {
            group: group.clone(),
            state,
            dispatcher,
            group_listener: Mutex::new(None),
            generation: AtomicU64::new(0),
        });

        let listener: Arc<dyn GroupListener> =
            Arc::new(MembershipListener(Arc::downgrade(&inner)));
        group.add_listener(listener.clone());
        *inner.group_listener.lock() = Some(listener);

        info!(
            registry = id,
            node = %group.local_node(),
            "Created clustered service provider registry"
        );
        Ok(Self { inner })
    }
}

#[async_trait]
impl<T: ServiceKey> ServiceProviderRegistry<T> for ClusteredServiceProviderRegistry<T> {
    fn group(&self) -> Arc<dyn Group> {
        self.inner.group.clone()
    }

    async fn register(
        &self,
        service: T,
        listener: Option<Arc<dyn ProvidersListener>>,
    ) -> Result<ServiceProviderRegistration<T>, ProviderError> {
        if self.inner.is_closed() {
            return Err(ProviderError::Closed(self.inner.state.id.clone()));
        }
        if !self.inner.state.insert_local(service.clone(), listener) {
            return Err(ProviderError::AlreadyRegistered(format!("{service:?}")));
        }
        debug!(registry = %self.inner.state.id, service = ?service, "Registered service");

        self.inner.publish(&service).await;

        let inner = self.inner.clone();
        let key = service.clone();
        Ok(ServiceProviderRegistration::new(
            service,
            Arc::new(self.clone()),
            Box::new(move || async move { inner.unregister(&key).await }.boxed()),
        ))
    }

    async fn get_providers(&self, service: &T) -> HashSet<Node> {
        self.inner.providers(service).await
    }

    async fn get_services(&self) -> HashSet<T> {
        self.inner.services().await
    }

    fn get_local_services(&self) -> HashSet<T> {
        self.inner.state.local_services().0.into_iter().collect()
    }

    fn cached_providers(&self, service: &T) -> HashSet<Node> {
        self.inner.state.cached(service)
    }

    async fn close(&self) {
        if self.inner.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let listener = self.inner.group_listener.lock().take();
        if let Some(listener) = listener {
            self.inner.group.remove_listener(&listener);
        }

        let dispatcher = self.inner.dispatcher.clone();
        self.inner
            .state
            .executor
            .close(async move { dispatcher.close() })
            .await;

        self.inner.state.local.clear();
        self.inner.state.providers.clear();
        info!(registry = %self.inner.state.id, "Closed clustered service provider registry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{ClusterConfig, InMemoryCluster};
    use std::{sync::atomic::AtomicUsize, time::Duration};

    const ID: &str = "providers";

    async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..300 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    fn nodes(names: &[&str]) -> HashSet<Node> {
        names.iter().map(|name| Node::new(*name)).collect()
    }

    type Seen = Arc<Mutex<Vec<HashSet<Node>>>>;

    fn recording_listener() -> (Seen, Arc<dyn ProvidersListener>) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let listener: Arc<dyn ProvidersListener> = Arc::new(move |providers: &HashSet<Node>| {
            s.lock().push(providers.clone());
        });
        (seen, listener)
    }

    fn last(seen: &Seen) -> Option<HashSet<Node>> {
        seen.lock().last().cloned()
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let registry = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();

        let _registration = registry.register("x".to_string(), None).await.unwrap();
        let result = registry.register("x".to_string(), None).await;
        assert!(matches!(result, Err(ProviderError::AlreadyRegistered(_))));
        assert_eq!(registry.get_local_services().len(), 1);
    }

    #[tokio::test]
    async fn test_providers_and_services_across_nodes() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let reg_a = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();
        let reg_b = ClusteredServiceProviderRegistry::<String>::new(&b, ID).unwrap();

        let _x = reg_a.register("x".to_string(), None).await.unwrap();
        let _y = reg_b.register("y".to_string(), None).await.unwrap();
        let _x_b = reg_b.register("x".to_string(), None).await.unwrap();

        assert_eq!(reg_b.get_providers(&"x".to_string()).await, nodes(&["a", "b"]));
        assert_eq!(reg_a.get_providers(&"y".to_string()).await, nodes(&["b"]));
        assert!(reg_a.get_providers(&"z".to_string()).await.is_empty());

        let services = reg_a.get_services().await;
        assert_eq!(services, ["x", "y"].into_iter().map(String::from).collect());
        assert_eq!(
            reg_a.get_local_services(),
            ["x"].into_iter().map(String::from).collect()
        );
    }

    #[tokio::test]
    async fn test_listener_follows_registrations() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let reg_a = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();
        let reg_b = ClusteredServiceProviderRegistry::<String>::new(&b, ID).unwrap();

        let (seen, listener) = recording_listener();
        let _x = reg_a.register("x".to_string(), Some(listener)).await.unwrap();
        assert!(eventually(|| last(&seen) == Some(nodes(&["a"]))).await);

        let x_b = reg_b.register("x".to_string(), None).await.unwrap();
        assert!(eventually(|| last(&seen) == Some(nodes(&["a", "b"]))).await);
        assert_eq!(reg_b.cached_providers(&"x".to_string()), nodes(&["a", "b"]));

        x_b.close().await;
        assert!(x_b.is_closed());
        assert!(eventually(|| last(&seen) == Some(nodes(&["a"]))).await);
        assert_eq!(reg_a.get_providers(&"x".to_string()).await, nodes(&["a"]));

        // second close is a no-op
        x_b.close().await;
    }

    #[tokio::test]
    async fn test_coordinator_resyncs_after_node_leaves() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let c = cluster.join("c").await;
        let reg_a = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();
        let reg_b = ClusteredServiceProviderRegistry::<String>::new(&b, ID).unwrap();
        let reg_c = ClusteredServiceProviderRegistry::<String>::new(&c, ID).unwrap();

        let (seen, listener) = recording_listener();
        let _x_b = reg_b.register("x".to_string(), Some(listener)).await.unwrap();
        let _x_c = reg_c.register("x".to_string(), None).await.unwrap();
        assert!(eventually(|| last(&seen) == Some(nodes(&["b", "c"]))).await);

        cluster.leave(c.node()).await;
        assert!(eventually(|| last(&seen) == Some(nodes(&["b"]))).await);
        assert_eq!(reg_a.get_providers(&"x".to_string()).await, nodes(&["b"]));
    }

    #[tokio::test]
    async fn test_departed_members_pruned_from_cache() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let reg_a = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();
        let reg_b = ClusteredServiceProviderRegistry::<String>::new(&b, ID).unwrap();

        let _x = reg_b.register("x".to_string(), None).await.unwrap();
        assert!(eventually(|| reg_a.cached_providers(&"x".to_string()) == nodes(&["b"])).await);

        cluster.leave(b.node()).await;
        assert!(reg_a.cached_providers(&"x".to_string()).is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_node_excluded_from_providers() {
        let config = ClusterConfig {
            command_timeout: Duration::from_millis(100),
        };
        let cluster = InMemoryCluster::with_config("test", config);
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let reg_a = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();
        let reg_b = ClusteredServiceProviderRegistry::<String>::new(&b, ID).unwrap();

        let _x_a = reg_a.register("x".to_string(), None).await.unwrap();
        let _x_b = reg_b.register("x".to_string(), None).await.unwrap();

        cluster.set_latency(b.node(), Duration::from_secs(1));
        assert_eq!(reg_a.get_providers(&"x".to_string()).await, nodes(&["a"]));

        cluster.clear_latency(b.node());
        cluster.isolate(b.node());
        assert!(reg_b.get_providers(&"x".to_string()).await.is_empty());
        assert_eq!(reg_a.get_providers(&"x".to_string()).await, nodes(&["a"]));
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_block_later_notifications() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let reg_a = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();
        let reg_b = ClusteredServiceProviderRegistry::<String>::new(&b, ID).unwrap();

        let panicking: Arc<dyn ProvidersListener> = Arc::new(|providers: &HashSet<Node>| {
            if providers.len() == 1 {
                panic!("listener failure");
            }
        });
        let _y = reg_a.register("y".to_string(), Some(panicking)).await.unwrap();

        let (seen, listener) = recording_listener();
        let _x = reg_a.register("x".to_string(), Some(listener)).await.unwrap();
        let _x_b = reg_b.register("x".to_string(), None).await.unwrap();
        assert!(eventually(|| last(&seen) == Some(nodes(&["a", "b"]))).await);
    }

    #[tokio::test]
    async fn test_closed_registry() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let reg_a = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();
        let reg_b = ClusteredServiceProviderRegistry::<String>::new(&b, ID).unwrap();

        let _x = reg_a.register("x".to_string(), None).await.unwrap();
        reg_a.close().await;
        reg_a.close().await;

        assert!(reg_a.get_local_services().is_empty());
        assert!(reg_a.get_providers(&"x".to_string()).await.is_empty());
        assert!(matches!(
            reg_a.register("y".to_string(), None).await,
            Err(ProviderError::Closed(_))
        ));
        assert!(reg_b.get_providers(&"x".to_string()).await.is_empty());

        // the dispatcher id is free again
        assert!(ClusteredServiceProviderRegistry::<String>::new(&a, ID).is_ok());
    }

    #[tokio::test]
    async fn test_outdated_announcement_does_not_replace_newer_providers() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let c = cluster.join("c").await;
        let reg_a = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();
        let reg_b = ClusteredServiceProviderRegistry::<String>::new(&b, ID).unwrap();
        let _reg_c = ClusteredServiceProviderRegistry::<String>::new(&c, ID).unwrap();

        // a's lookup waits on c while b registers and announces {a, b}
        cluster.set_latency(c.node(), Duration::from_millis(300));
        let slow = tokio::spawn({
            let reg_a = reg_a.clone();
            async move { reg_a.register("x".to_string(), None).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cluster.clear_latency(c.node());

        let (seen, listener) = recording_listener();
        let _x_b = reg_b.register("x".to_string(), Some(listener)).await.unwrap();
        let _x_a = slow.await.unwrap().unwrap();

        assert_eq!(reg_a.cached_providers(&"x".to_string()), nodes(&["a", "b"]));
        assert_eq!(reg_b.cached_providers(&"x".to_string()), nodes(&["a", "b"]));
        assert!(eventually(|| last(&seen) == Some(nodes(&["a", "b"]))).await);
        assert_eq!(reg_b.get_providers(&"x".to_string()).await, nodes(&["a", "b"]));
    }

    struct SlowListener(Arc<AtomicUsize>);

    #[async_trait]
    impl ProvidersListener for SlowListener {
        async fn providers_changed(&self, _providers: &HashSet<Node>) {
            self.0.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test]
    async fn test_close_drops_pending_notifications() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let reg_a = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();
        let reg_b = ClusteredServiceProviderRegistry::<String>::new(&b, ID).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let listener: Arc<dyn ProvidersListener> = Arc::new(SlowListener(calls.clone()));
        let _x = reg_a.register("x".to_string(), Some(listener)).await.unwrap();
        for _ in 0..3 {
            let x_b = reg_b.register("x".to_string(), None).await.unwrap();
            x_b.close().await;
        }

        reg_a.close().await;
        let at_close = calls.load(Ordering::SeqCst);
        assert!(at_close <= 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(calls.load(Ordering::SeqCst), at_close);
    }

    #[tokio::test]
    async fn test_superseded_resync_round_is_discarded() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let c = cluster.join("c").await;
        let _reg_a = ClusteredServiceProviderRegistry::<String>::new(&a, ID).unwrap();
        let reg_b = ClusteredServiceProviderRegistry::<String>::new(&b, ID).unwrap();
        let _reg_c = ClusteredServiceProviderRegistry::<String>::new(&c, ID).unwrap();

        let (seen, listener) = recording_listener();
        let _x = reg_b.register("x".to_string(), Some(listener)).await.unwrap();
        assert!(eventually(|| seen.lock().len() == 1).await);

        // the first round is still querying c when the second membership change lands
        cluster.set_latency(c.node(), Duration::from_millis(200));
        cluster.join("d").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        cluster.join("e").await;

        assert!(eventually(|| seen.lock().len() == 2).await);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(last(&seen), Some(nodes(&["b"])));
    }
}
