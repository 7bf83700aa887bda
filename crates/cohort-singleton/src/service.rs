use std::{collections::HashSet, fmt, fmt::Debug};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use cohort_common::Node;

use crate::{ServiceError, SingletonError};

/// Value produced by a running singleton service.
///
/// Values are fetched from the primary by other nodes, so they must be
/// serializable.
pub trait ServiceValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<V> ServiceValue for V where
    V: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// A service that must run on at most one node of the group at a time
#[async_trait]
pub trait SingletonService: Send + Sync + 'static {
    type Value: ServiceValue;

    async fn start(&self) -> Result<Self::Value, ServiceError>;

    async fn stop(&self) -> Result<(), ServiceError>;
}

/// Lifecycle state of a singleton on the local node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SingletonState {
    /// Not primary; the service is not running
    Standby,
    Starting,
    /// Primary; the service is running
    Primary,
    Stopping,
}

impl fmt::Display for SingletonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SingletonState::Standby => "STANDBY",
            SingletonState::Starting => "STARTING",
            SingletonState::Primary => "PRIMARY",
            SingletonState::Stopping => "STOPPING",
        };
        f.write_str(name)
    }
}

/// Handle to a singleton service
#[async_trait]
pub trait Singleton: Send + Sync + 'static {
    type Value: ServiceValue;

    fn name(&self) -> &str;

    /// Make the local node a candidate for running the service
    async fn start(&self) -> Result<(), SingletonError>;

    /// Withdraw the local node, stopping the service if it runs here
    async fn stop(&self);

    /// Value of the running service, wherever it runs
    async fn value(&self) -> Option<Self::Value>;

    /// Whether the service runs on the local node
    async fn is_primary(&self) -> bool;

    /// Candidate nodes for the service
    async fn providers(&self) -> HashSet<Node>;

    /// Node the service runs on, if any
    async fn primary_provider(&self) -> Option<Node>;
}
