//! Cohort Provider - Service provider registry
//!
//! Tracks which cluster members provide each service:
//! - Clustered registry kept converged by coordinator-driven re-synchronization
//! - Local registry for processes running without clustering
//! - Registration handles and provider-change listeners

pub mod clustered;
pub mod error;
pub mod factory;
pub mod listener;
pub mod local;
pub mod registration;
pub mod registry;

pub use clustered::{
    ClusteredServiceProviderRegistry, ProviderCommand, ProviderResponse, ProviderStatus,
};
pub use error::ProviderError;
pub use factory::ServiceProviderRegistryFactory;
pub use listener::ProvidersListener;
pub use local::LocalServiceProviderRegistry;
pub use registration::ServiceProviderRegistration;
pub use registry::ServiceProviderRegistry;
