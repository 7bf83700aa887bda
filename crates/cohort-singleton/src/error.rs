use cohort_common::DispatchError;
use cohort_provider::ProviderError;

/// Failure reported by a singleton service while starting or stopping
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SingletonError {
    #[error("invalid singleton configuration: {0}")]
    Configuration(String),

    #[error("failed to start singleton service: {0}")]
    Start(#[from] ServiceError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("failed to create command dispatcher: {0}")]
    Dispatch(#[from] DispatchError),
}
