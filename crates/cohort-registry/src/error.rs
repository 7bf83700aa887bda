use cohort_common::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a registry was already created by this factory")]
    AlreadyCreated,

    #[error("failed to create command dispatcher: {0}")]
    Dispatch(#[from] DispatchError),
}
