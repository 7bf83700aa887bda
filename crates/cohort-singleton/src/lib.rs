//! Cohort Singleton - Cluster-wide singleton services
//!
//! This crate provides:
//! - Deterministic election policies over membership-ordered candidates
//! - A local singleton that is always primary
//! - A distributed singleton elected through the service provider registry,
//!   with quorum and an optional backup service
//! - Builders selecting the variant from configuration

pub mod builder;
pub mod context;
pub mod distributed;
pub mod election;
pub mod error;
pub mod local;
pub mod service;

pub use builder::{SINGLETON_REGISTRY_ID, SingletonBuilder, SingletonBuilderFactory};
pub use context::{SingletonCommand, SingletonContext, SingletonOperation, SingletonResponse};
pub use distributed::{DistributedSingleton, DistributedSingletonBuilder};
pub use election::{
    ElectionPolicy, RandomElectionPolicy, SimpleElectionPolicy, election_policy_from_configuration,
};
pub use error::{ServiceError, SingletonError};
pub use local::{LocalSingleton, LocalSingletonBuilder};
pub use service::{ServiceValue, Singleton, SingletonService, SingletonState};
