use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;

use cohort_common::{Node, ServiceKey};
use cohort_core::Group;

use crate::{
    clustered::CloseTask,
    registry::{EntryValue, Registry, RegistryListener},
};

/// Registry of a process running without clustering; holds only the local entry
pub struct LocalRegistry<K: ServiceKey, V: EntryValue> {
    group: Arc<dyn Group>,
    entry: (K, V),
    close_task: Mutex<Option<CloseTask>>,
    closed: AtomicBool,
}

impl<K: ServiceKey, V: EntryValue> LocalRegistry<K, V> {
    pub fn new(
        group: Arc<dyn Group>,
        entry: (K, V),
        close_task: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            group,
            entry,
            close_task: Mutex::new(Some(Box::new(close_task))),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl<K: ServiceKey, V: EntryValue> Registry<K, V> for LocalRegistry<K, V> {
    fn group(&self) -> Arc<dyn Group> {
        self.group.clone()
    }

    fn get_local_entry(&self) -> (K, V) {
        self.entry.clone()
    }

    async fn get_entries(&self) -> HashMap<K, V> {
        let (key, value) = self.entry.clone();
        HashMap::from([(key, value)])
    }

    async fn get_entry(&self, node: &Node) -> Option<(K, V)> {
        (node == self.group.local_node()).then(|| self.entry.clone())
    }

    fn add_listener(&self, _listener: Arc<dyn RegistryListener<K, V>>) {}

    fn remove_listener(&self, _listener: &Arc<dyn RegistryListener<K, V>>) {}

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = self.close_task.lock().take();
        if let Some(task) = task {
            task();
        }
    }
}
