// Clustered registry
// Each member publishes one entry; entries of other members are fetched on demand

use std::{
    collections::HashMap,
    fmt,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cohort_common::{CommandError, Node, ServiceKey};
use cohort_core::{Command, CommandDispatcher, CommandDispatcherFactory, Group, metrics};

use crate::{
    RegistryError,
    registry::{EntryValue, Registry, RegistryListener},
};

pub(crate) type CloseTask = Box<dyn FnOnce() + Send>;

/// Fetches the entry published by the receiving node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchEntry<K, V> {
    #[serde(skip)]
    entry: PhantomData<fn() -> (K, V)>,
}

impl<K, V> FetchEntry<K, V> {
    pub fn new() -> Self {
        Self { entry: PhantomData }
    }
}

impl<K, V> Default for FetchEntry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry published by the local node, addressed by [`FetchEntry`]
pub struct RegistryContext<K, V> {
    entry: RwLock<Option<(K, V)>>,
}

#[async_trait]
impl<K: ServiceKey, V: EntryValue> Command for FetchEntry<K, V> {
    type Context = RegistryContext<K, V>;
    type Response = Option<(K, V)>;

    async fn execute(
        self,
        context: &RegistryContext<K, V>,
    ) -> Result<Option<(K, V)>, CommandError> {
        Ok(context.entry.read().clone())
    }
}

/// Registry whose entries span every member of the group
pub struct ClusteredRegistry<K: ServiceKey, V: EntryValue> {
    id: String,
    group: Arc<dyn Group>,
    entry: (K, V),
    context: Arc<RegistryContext<K, V>>,
    dispatcher: Arc<dyn CommandDispatcher<FetchEntry<K, V>>>,
    close_task: Mutex<Option<CloseTask>>,
    closed: AtomicBool,
}

impl<K: ServiceKey, V: EntryValue> fmt::Debug for ClusteredRegistry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusteredRegistry")
            .field("id", &self.id)
            .field("node", self.group.local_node())
            .field("entry", &self.entry)
            .finish()
    }
}

impl<K: ServiceKey, V: EntryValue> ClusteredRegistry<K, V> {
    /// Publish `entry` for the local node under the registry `id`.
    ///
    /// `close_task` runs once when the registry is closed.
    pub fn new<F: CommandDispatcherFactory>(
        factory: &F,
        id: &str,
        entry: (K, V),
        close_task: impl FnOnce() + Send + 'static,
    ) -> Result<Self, RegistryError> {
        let context = Arc::new(RegistryContext {
            entry: RwLock::new(Some(entry.clone())),
        });
        let dispatcher =
            factory.create_command_dispatcher::<FetchEntry<K, V>>(id, context.clone())?;
        let group = factory.group();

        info!(registry = id, node = %group.local_node(), "Created clustered registry");
        Ok(Self {
            id: id.to_string(),
            group,
            entry,
            context,
            dispatcher,
            close_task: Mutex::new(Some(Box::new(close_task))),
            closed: AtomicBool::new(false),
        })
    }

    fn local_entries(&self) -> HashMap<K, V> {
        let (key, value) = self.entry.clone();
        HashMap::from([(key, value)])
    }
}

#[async_trait]
impl<K: ServiceKey, V: EntryValue> Registry<K, V> for ClusteredRegistry<K, V> {
    fn group(&self) -> Arc<dyn Group> {
        self.group.clone()
    }

    fn get_local_entry(&self) -> (K, V) {
        self.entry.clone()
    }

    async fn get_entries(&self) -> HashMap<K, V> {
        let responses = match self.dispatcher.execute_on_cluster(FetchEntry::new()).await {
            Ok(responses) => responses,
            Err(e) => {
                warn!(
                    registry = %self.id,
                    "Failed to fetch registry entries, using local entry: {}", e
                );
                metrics::record_dispatch_failure(&self.id, "fetch_entry");
                return self.local_entries();
            }
        };

        let mut entries = HashMap::with_capacity(responses.len());
        for (node, response) in responses {
            match response {
                Ok(Some((key, value))) => {
                    entries.insert(key, value);
                }
                Ok(None) => debug!(registry = %self.id, node = %node, "No entry published"),
                Err(e) => {
                    warn!(
                        registry = %self.id,
                        node = %node,
                        "Failed to fetch registry entry: {}", e
                    );
                    metrics::record_dispatch_failure(&self.id, "fetch_entry");
                }
            }
        }
        entries
    }

    async fn get_entry(&self, node: &Node) -> Option<(K, V)> {
        if node == self.group.local_node() {
            return Some(self.entry.clone());
        }

        match self.dispatcher.execute_on_node(FetchEntry::new(), node).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(registry = %self.id, node = %node, "Failed to fetch registry entry: {}", e);
                metrics::record_dispatch_failure(&self.id, "fetch_entry");
                None
            }
        }
    }

    fn add_listener(&self, _listener: Arc<dyn RegistryListener<K, V>>) {
        debug!(registry = %self.id, "Registry listeners are not notified of entry changes");
    }

    fn remove_listener(&self, _listener: &Arc<dyn RegistryListener<K, V>>) {}

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.dispatcher.close();
        *self.context.entry.write() = None;

        let task = self.close_task.lock().take();
        if let Some(task) = task {
            task();
        }
        info!(registry = %self.id, "Closed clustered registry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::InMemoryCluster;
    use std::sync::atomic::AtomicUsize;

    const ID: &str = "registry";

    fn registry<F: CommandDispatcherFactory>(
        factory: &F,
        key: &str,
        value: u32,
    ) -> ClusteredRegistry<String, u32> {
        ClusteredRegistry::new(factory, ID, (key.to_string(), value), || {}).unwrap()
    }

    #[tokio::test]
    async fn test_entries_from_every_member() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let reg_a = registry(&a, "key-a", 1);
        let _reg_b = registry(&b, "key-b", 2);

        let entries = reg_a.get_entries().await;
        assert_eq!(
            entries,
            HashMap::from([("key-a".to_string(), 1), ("key-b".to_string(), 2)])
        );
        assert_eq!(reg_a.get_local_entry(), ("key-a".to_string(), 1));
    }

    #[tokio::test]
    async fn test_get_entry_local_remote_and_missing() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let c = cluster.join("c").await;
        let reg_a = registry(&a, "key-a", 1);
        let _reg_b = registry(&b, "key-b", 2);

        assert_eq!(reg_a.get_entry(a.node()).await, Some(("key-a".to_string(), 1)));
        assert_eq!(reg_a.get_entry(b.node()).await, Some(("key-b".to_string(), 2)));
        // c has no registry
        assert_eq!(reg_a.get_entry(c.node()).await, None);

        cluster.leave(b.node()).await;
        assert_eq!(reg_a.get_entry(b.node()).await, None);
    }

    #[tokio::test]
    async fn test_partition_falls_back_to_local_entry() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let reg_a = registry(&a, "key-a", 1);
        let _reg_b = registry(&b, "key-b", 2);

        cluster.isolate(a.node());
        let entries = reg_a.get_entries().await;
        assert_eq!(entries, HashMap::from([("key-a".to_string(), 1)]));
    }

    #[tokio::test]
    async fn test_listeners_never_invoked() {
        struct Counting(AtomicUsize);

        impl RegistryListener<String, u32> for Counting {
            fn added_entries(&self, _: &HashMap<String, u32>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn updated_entries(&self, _: &HashMap<String, u32>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn removed_entries(&self, _: &HashMap<String, u32>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let reg_a = registry(&a, "key-a", 1);
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        reg_a.add_listener(counting.clone());

        let reg_b = registry(&b, "key-b", 2);
        reg_a.get_entries().await;
        reg_b.close().await;
        cluster.leave(b.node()).await;
        reg_a.get_entries().await;

        assert_eq!(counting.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_runs_task_once() {
        let cluster = InMemoryCluster::new("test");
        let a = cluster.join("a").await;
        let b = cluster.join("b").await;
        let closed = Arc::new(AtomicUsize::new(0));
        let c = closed.clone();
        let reg_a = ClusteredRegistry::new(&a, ID, ("key-a".to_string(), 1u32), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        let reg_b = registry(&b, "key-b", 2);

        reg_a.close().await;
        reg_a.close().await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(
            reg_b.get_entries().await,
            HashMap::from([("key-b".to_string(), 2)])
        );
    }
}
