// In-memory cluster for tests and single-process demos
// Simulates group membership and command delivery between nodes in one process

use std::{
    marker::PhantomData,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use futures::future::{BoxFuture, join_all};
use parking_lot::RwLock;
use tracing::{debug, info};

use cohort_common::{CommandError, DispatchError, Membership, MembershipEvent, Node};

use super::{
    ClusterResponses, Command, CommandDispatcher, CommandDispatcherFactory, CommandOutcome,
    CommandResponse, decode, encode,
};
use crate::{
    config::Configuration,
    group::{Group, GroupListener, GroupListeners},
};

/// In-memory cluster configuration
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Per-node response timeout
    pub command_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl ClusterConfig {
    /// Create a ClusterConfig from application Configuration
    pub fn from_configuration(config: &Configuration) -> Self {
        Self {
            command_timeout: config.dispatcher_timeout(),
        }
    }
}

/// Type-erased command context registered on a node
trait CommandHandler: Send + Sync {
    fn handle(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes, DispatchError>>;
}

struct ContextHandler<M: Command> {
    context: Arc<M::Context>,
    _command: PhantomData<fn() -> M>,
}

impl<M: Command> CommandHandler for ContextHandler<M> {
    fn handle(&self, payload: Bytes) -> BoxFuture<'static, Result<Bytes, DispatchError>> {
        let context = self.context.clone();
        Box::pin(async move {
            let outcome = match decode::<M>(&payload) {
                Ok(command) => match command.execute(&context).await {
                    Ok(response) => CommandOutcome::Success(response),
                    Err(e) => CommandOutcome::Failure(e),
                },
                Err(e) => CommandOutcome::Failure(CommandError::new(e.to_string())),
            };
            encode(&outcome)
        })
    }
}

struct ClusterState {
    name: String,
    config: ClusterConfig,
    membership: RwLock<Membership>,
    groups: DashMap<Node, Arc<InMemoryGroup>>,
    handlers: DashMap<(Node, String), Arc<dyn CommandHandler>>,
    latency: DashMap<Node, Duration>,
    isolated: DashSet<Node>,
}

impl ClusterState {
    fn membership(&self) -> Membership {
        self.membership.read().clone()
    }

    fn is_member(&self, node: &Node) -> bool {
        self.membership.read().contains(node)
    }

    async fn publish(&self, event: MembershipEvent) {
        let groups: Vec<Arc<InMemoryGroup>> = event
            .current
            .nodes()
            .iter()
            .filter_map(|node| self.groups.get(node).map(|g| g.value().clone()))
            .collect();

        for group in groups {
            group.listeners.publish(&event).await;
        }
    }

    /// Deliver an encoded command to the context `id` on `target`
    async fn deliver(
        &self,
        source: &Node,
        id: &str,
        target: &Node,
        payload: Bytes,
    ) -> Result<Bytes, DispatchError> {
        if source != target && (self.isolated.contains(source) || self.isolated.contains(target))
        {
            return Err(DispatchError::NodeUnreachable(target.to_string()));
        }
        if !self.is_member(target) {
            return Err(DispatchError::NodeUnreachable(target.to_string()));
        }

        let handler = self
            .handlers
            .get(&(target.clone(), id.to_string()))
            .map(|h| h.value().clone())
            .ok_or_else(|| DispatchError::NoHandler {
                id: id.to_string(),
                node: target.to_string(),
            })?;
        let latency = self.latency.get(target).map(|d| *d.value());

        let delivery = async move {
            if let Some(delay) = latency {
                tokio::time::sleep(delay).await;
            }
            handler.handle(payload).await
        };

        tokio::time::timeout(self.config.command_timeout, delivery)
            .await
            .map_err(|_| DispatchError::Timeout {
                node: target.to_string(),
                timeout: self.config.command_timeout,
            })?
    }
}

/// A simulated cluster whose members live in the current process
#[derive(Clone)]
pub struct InMemoryCluster {
    state: Arc<ClusterState>,
}

impl std::fmt::Debug for InMemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCluster")
            .field("name", &self.state.name)
            .field("member_count", &self.state.membership.read().len())
            .finish()
    }
}

impl InMemoryCluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, ClusterConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ClusterConfig) -> Self {
        Self {
            state: Arc::new(ClusterState {
                name: name.into(),
                config,
                membership: RwLock::new(Membership::default()),
                groups: DashMap::new(),
                handlers: DashMap::new(),
                latency: DashMap::new(),
                isolated: DashSet::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn membership(&self) -> Membership {
        self.state.membership()
    }

    /// Add a node to the cluster and notify every member of the new view.
    ///
    /// Joining with the name of an existing member returns that member.
    pub async fn join(&self, name: &str) -> ClusterMember {
        let node = Node::new(name);
        if let Some(group) = self.state.groups.get(&node) {
            return ClusterMember {
                group: group.value().clone(),
                state: self.state.clone(),
            };
        }

        let group = Arc::new(InMemoryGroup {
            name: self.state.name.clone(),
            local: node.clone(),
            state: Arc::downgrade(&self.state),
            listeners: GroupListeners::new(),
        });
        self.state.groups.insert(node.clone(), group.clone());

        let (previous, current) = {
            let mut membership = self.state.membership.write();
            let previous = membership.clone();
            let mut nodes = previous.nodes().to_vec();
            nodes.push(node.clone());
            *membership = Membership::new(nodes);
            (previous, membership.clone())
        };

        info!(node = %node, members = current.len(), "Node joined cluster {}", self.state.name);
        self.state
            .publish(MembershipEvent::new(previous, current, false))
            .await;

        ClusterMember {
            group,
            state: self.state.clone(),
        }
    }

    /// Remove a node, dropping every command context it registered.
    pub async fn leave(&self, node: &Node) {
        let Some((previous, current)) = ({
            let mut membership = self.state.membership.write();
            if membership.contains(node) {
                let previous = membership.clone();
                let nodes = previous
                    .nodes()
                    .iter()
                    .filter(|n| *n != node)
                    .cloned()
                    .collect();
                *membership = Membership::new(nodes);
                Some((previous, membership.clone()))
            } else {
                None
            }
        }) else {
            return;
        };

        self.state.groups.remove(node);
        self.state.handlers.retain(|(owner, _), _| owner != node);
        self.state.latency.remove(node);
        self.state.isolated.remove(node);

        info!(node = %node, members = current.len(), "Node left cluster {}", self.state.name);
        self.state
            .publish(MembershipEvent::new(previous, current, false))
            .await;
    }

    /// Cut a node off from every other member without changing membership
    pub fn isolate(&self, node: &Node) {
        debug!(node = %node, "Isolating node");
        self.state.isolated.insert(node.clone());
    }

    pub fn heal(&self, node: &Node) {
        debug!(node = %node, "Healing node");
        self.state.isolated.remove(node);
    }

    /// Delay every response sent by `node`
    pub fn set_latency(&self, node: &Node, latency: Duration) {
        self.state.latency.insert(node.clone(), latency);
    }

    pub fn clear_latency(&self, node: &Node) {
        self.state.latency.remove(node);
    }
}

/// Group view of one in-memory cluster member
pub struct InMemoryGroup {
    name: String,
    local: Node,
    state: Weak<ClusterState>,
    listeners: GroupListeners,
}

impl Group for InMemoryGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_node(&self) -> &Node {
        &self.local
    }

    fn membership(&self) -> Membership {
        match self.state.upgrade() {
            Some(state) => state.membership(),
            None => Membership::new(vec![self.local.clone()]),
        }
    }

    fn add_listener(&self, listener: Arc<dyn GroupListener>) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn GroupListener>) {
        self.listeners.remove(listener);
    }
}

/// Handle to one member of an [`InMemoryCluster`]
#[derive(Clone)]
pub struct ClusterMember {
    group: Arc<InMemoryGroup>,
    state: Arc<ClusterState>,
}

impl ClusterMember {
    pub fn node(&self) -> &Node {
        &self.group.local
    }
}

impl CommandDispatcherFactory for ClusterMember {
    fn group(&self) -> Arc<dyn Group> {
        self.group.clone()
    }

    fn create_command_dispatcher<M: Command>(
        &self,
        id: &str,
        context: Arc<M::Context>,
    ) -> Result<Arc<dyn CommandDispatcher<M>>, DispatchError> {
        let key = (self.group.local.clone(), id.to_string());
        match self.state.handlers.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(DispatchError::AlreadyRegistered(id.to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Arc::new(ContextHandler::<M> {
                    context,
                    _command: PhantomData,
                }));
            }
        }

        debug!(node = %self.group.local, id, "Created command dispatcher");
        Ok(Arc::new(InMemoryDispatcher::<M> {
            id: id.to_string(),
            local: self.group.local.clone(),
            state: self.state.clone(),
            closed: AtomicBool::new(false),
            _command: PhantomData,
        }))
    }
}

struct InMemoryDispatcher<M> {
    id: String,
    local: Node,
    state: Arc<ClusterState>,
    closed: AtomicBool,
    _command: PhantomData<fn() -> M>,
}

impl<M: Command> InMemoryDispatcher<M> {
    fn check_open(&self) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::Acquire) {
            Err(DispatchError::Closed(self.id.clone()))
        } else {
            Ok(())
        }
    }

    async fn send(&self, payload: Bytes, node: &Node) -> CommandResponse<M::Response> {
        let reply = self.state.deliver(&self.local, &self.id, node, payload).await?;
        match decode::<CommandOutcome<M::Response>>(&reply)? {
            CommandOutcome::Success(response) => Ok(response),
            CommandOutcome::Failure(e) => Err(DispatchError::CommandFailed {
                node: node.to_string(),
                message: e.message,
            }),
        }
    }
}

#[async_trait]
impl<M: Command> CommandDispatcher<M> for InMemoryDispatcher<M> {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute_on_node(&self, command: M, node: &Node) -> CommandResponse<M::Response> {
        self.check_open()?;
        let payload = encode(&command)?;
        self.send(payload, node).await
    }

    async fn execute_on_cluster(
        &self,
        command: M,
    ) -> Result<ClusterResponses<M::Response>, DispatchError> {
        self.check_open()?;
        if !self.state.is_member(&self.local) {
            return Err(DispatchError::Unreachable(format!(
                "{} is not a member of {}",
                self.local, self.state.name
            )));
        }
        if self.state.isolated.contains(&self.local) {
            return Err(DispatchError::Unreachable(format!(
                "{} is partitioned from {}",
                self.local, self.state.name
            )));
        }

        let payload = encode(&command)?;
        let membership = self.state.membership();
        let sends = membership.nodes().iter().map(|node| {
            let payload = payload.clone();
            async move { (node.clone(), self.send(payload, node).await) }
        });

        Ok(join_all(sends).await.into_iter().collect())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.state
                .handlers
                .remove(&(self.local.clone(), self.id.clone()));
            debug!(node = %self.local, id = %self.id, "Closed command dispatcher");
        }
    }
}
