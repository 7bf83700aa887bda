//! Cohort Common - Shared types, traits, and errors
//!
//! This crate provides the foundational types used across all Cohort components:
//! - Node identity and membership snapshots
//! - The service key trait
//! - Dispatch and command error types

pub mod error;
pub mod node;
pub mod traits;
pub mod utils;

// Re-exports for convenience
pub use error::{CommandError, DispatchError};
pub use node::{Membership, MembershipEvent, Node};
pub use traits::ServiceKey;
pub use utils::local_node_name;

/// Default cluster (group) name
pub const DEFAULT_CLUSTER_NAME: &str = "cohort";
