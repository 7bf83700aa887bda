use std::{collections::HashMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use cohort_common::{Node, ServiceKey};
use cohort_core::Group;

/// Value half of a registry entry
pub trait EntryValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<V> EntryValue for V where
    V: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Receives registry entry changes.
///
/// Registries accept listeners but do not deliver change events.
pub trait RegistryListener<K, V>: Send + Sync + 'static {
    fn added_entries(&self, added: &HashMap<K, V>);

    fn updated_entries(&self, updated: &HashMap<K, V>);

    fn removed_entries(&self, removed: &HashMap<K, V>);
}

/// A group-wide registry in which every member publishes exactly one entry.
#[async_trait]
pub trait Registry<K: ServiceKey, V: EntryValue>: Send + Sync + 'static {
    fn group(&self) -> Arc<dyn Group>;

    /// The entry published by this node
    fn get_local_entry(&self) -> (K, V);

    /// Entries of every reachable member.
    ///
    /// If the cluster cannot be reached at all, only the local entry is
    /// returned.
    async fn get_entries(&self) -> HashMap<K, V>;

    /// Entry published by `node`, or `None` if it cannot be fetched
    async fn get_entry(&self, node: &Node) -> Option<(K, V)>;

    /// Accepted and never invoked
    fn add_listener(&self, listener: Arc<dyn RegistryListener<K, V>>);

    fn remove_listener(&self, listener: &Arc<dyn RegistryListener<K, V>>);

    /// Withdraw the local entry and release the registry
    async fn close(&self);
}
