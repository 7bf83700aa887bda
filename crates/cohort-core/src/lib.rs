//! Cohort Core - Group membership and command dispatch
//!
//! This crate provides:
//! - The group membership contract and the single-node local group
//! - The command dispatcher contract and an in-memory cluster transport
//! - A serial executor for ordered background work
//! - Configuration and metrics

pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod group;
pub mod metrics;

pub use cohort_common::{
    CommandError, DispatchError, Membership, MembershipEvent, Node, ServiceKey,
};
pub use config::{ConfigError, Configuration};
pub use dispatcher::{
    ClusterConfig, ClusterMember, ClusterResponses, Command, CommandDispatcher,
    CommandDispatcherFactory, CommandOutcome, CommandResponse, InMemoryCluster,
};
pub use executor::SerialExecutor;
pub use group::{Group, GroupListener, GroupListeners, LocalGroup};
