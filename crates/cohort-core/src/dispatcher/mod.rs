//! Cluster command dispatch
//!
//! A [`Command`] is a serializable tagged union executed against a named
//! context on the receiving node. Every component defines one command enum
//! and one response enum; the dispatcher for that component is bound to the
//! pair via the command's associated types.
//!
//! Commands are JSON-encoded whenever they cross a node boundary, wrapped in a
//! [`CommandOutcome`] on the way back.

pub mod memory;

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use cohort_common::{CommandError, DispatchError, Node};

use crate::group::Group;

pub use memory::{ClusterConfig, ClusterMember, InMemoryCluster};

/// Result of a command on a single node
pub type CommandResponse<R> = Result<R, DispatchError>;

/// Per-node responses of a cluster-wide dispatch
pub type ClusterResponses<R> = HashMap<Node, CommandResponse<R>>;

/// A serializable unit of work executed against a context on the receiving node
#[async_trait]
pub trait Command: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Object the command executes against on the receiving node
    type Context: Send + Sync + 'static;

    /// Response returned to the sender
    type Response: Debug + Serialize + DeserializeOwned + Send + 'static;

    async fn execute(self, context: &Self::Context) -> Result<Self::Response, CommandError>;
}

/// Wire envelope for command results
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CommandOutcome<R> {
    Success(R),
    Failure(CommandError),
}

/// Sends commands of one type to one or all members of the group
#[async_trait]
pub trait CommandDispatcher<M: Command>: Send + Sync {
    /// Identifier of the command context this dispatcher targets
    fn id(&self) -> &str;

    /// Execute a command on a single node
    async fn execute_on_node(&self, command: M, node: &Node) -> CommandResponse<M::Response>;

    /// Execute a command on every member of the group, the local node included.
    ///
    /// The outer error means the dispatch as a whole failed; per-node failures
    /// (timeouts, command errors, departed nodes) are reported in the map.
    async fn execute_on_cluster(
        &self,
        command: M,
    ) -> Result<ClusterResponses<M::Response>, DispatchError>;

    /// Close the dispatcher and unregister its context on the local node
    fn close(&self);
}

/// Creates command dispatchers bound to a local context object
pub trait CommandDispatcherFactory: Send + Sync + 'static {
    /// The group the created dispatchers address
    fn group(&self) -> Arc<dyn Group>;

    /// Register `context` under `id` on the local node and return a dispatcher
    /// targeting the contexts registered under the same id on other nodes.
    fn create_command_dispatcher<M: Command>(
        &self,
        id: &str,
        context: Arc<M::Context>,
    ) -> Result<Arc<dyn CommandDispatcher<M>>, DispatchError>;
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Bytes, DispatchError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| DispatchError::Codec(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DispatchError> {
    serde_json::from_slice(payload).map_err(|e| DispatchError::Codec(e.to_string()))
}
