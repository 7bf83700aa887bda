use std::{fmt::Debug, hash::Hash};

use serde::{Serialize, de::DeserializeOwned};

/// Application-defined identifier of a logical service.
///
/// Keys travel inside commands, so they must be serializable; they index
/// local tables, so they need value equality and hashing.
pub trait ServiceKey:
    Clone + Debug + Eq + Hash + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> ServiceKey for T where
    T: Clone + Debug + Eq + Hash + Serialize + DeserializeOwned + Send + Sync + 'static
{
}
