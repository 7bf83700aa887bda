use cohort_common::DispatchError;

/// Errors surfaced to callers of a service provider registry.
///
/// Dispatch failures during queries never show up here; they degrade the
/// query result instead.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("service '{0}' is already registered on this node")]
    AlreadyRegistered(String),

    #[error("service provider registry '{0}' is closed")]
    Closed(String),

    #[error("failed to create command dispatcher: {0}")]
    Dispatch(#[from] DispatchError),
}
