//! Cohort Registry - Single-entry-per-node key/value registry
//!
//! Every member publishes one immutable entry; any member can read the entry
//! of any other. Entry change notification is not supported.

pub mod clustered;
pub mod error;
pub mod factory;
pub mod local;
pub mod registry;

pub use clustered::{ClusteredRegistry, FetchEntry, RegistryContext};
pub use error::RegistryError;
pub use factory::RegistryFactory;
pub use local::LocalRegistry;
pub use registry::{EntryValue, Registry, RegistryListener};
