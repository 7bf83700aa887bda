//! Cohort - Cluster-wide service coordination
//!
//! Re-exports the workspace crates:
//! - [`common`]: nodes, membership views and error types
//! - [`core`]: group membership, command dispatch and the in-memory cluster
//! - [`provider`]: service provider registries
//! - [`registry`]: single-entry registries
//! - [`singleton`]: cluster-wide singleton services

pub use cohort_common as common;
pub use cohort_core as core;
pub use cohort_provider as provider;
pub use cohort_registry as registry;
pub use cohort_singleton as singleton;
