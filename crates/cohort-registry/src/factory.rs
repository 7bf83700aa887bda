use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use cohort_common::ServiceKey;
use cohort_core::{CommandDispatcherFactory, Configuration, Group, LocalGroup};

use crate::{
    ClusteredRegistry, LocalRegistry, RegistryError,
    clustered::CloseTask,
    registry::{EntryValue, Registry},
};

type CreateFn<K, V> =
    Box<dyn Fn((K, V), CloseTask) -> Result<Arc<dyn Registry<K, V>>, RegistryError> + Send + Sync>;

/// Creates the single registry of this node.
///
/// A second registry can only be created once the first has been closed.
pub struct RegistryFactory<K: ServiceKey, V: EntryValue> {
    created: Arc<Mutex<bool>>,
    create: CreateFn<K, V>,
}

impl<K: ServiceKey, V: EntryValue> RegistryFactory<K, V> {
    /// Factory driven by a custom constructor; the constructed registry must
    /// run the supplied close task when closed.
    pub fn new<C>(create: C) -> Self
    where
        C: Fn((K, V), CloseTask) -> Result<Arc<dyn Registry<K, V>>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            created: Arc::new(Mutex::new(false)),
            create: Box::new(create),
        }
    }

    pub fn clustered<F: CommandDispatcherFactory>(factory: Arc<F>, id: &str) -> Self {
        let id = id.to_string();
        Self::new(move |entry, close_task| {
            let registry = ClusteredRegistry::new(factory.as_ref(), &id, entry, close_task)?;
            Ok(Arc::new(registry) as Arc<dyn Registry<K, V>>)
        })
    }

    pub fn local(group: Arc<dyn Group>) -> Self {
        Self::new(move |entry, close_task| {
            let registry = LocalRegistry::new(group.clone(), entry, close_task);
            Ok(Arc::new(registry) as Arc<dyn Registry<K, V>>)
        })
    }

    /// Clustered or local depending on `cohort.clustering.enabled`
    pub fn from_configuration<F: CommandDispatcherFactory>(
        config: &Configuration,
        factory: Arc<F>,
        id: &str,
    ) -> Self {
        if config.clustering_enabled() {
            return Self::clustered(factory, id);
        }
        let group = factory.group();
        Self::local(Arc::new(LocalGroup::new(
            group.name(),
            group.local_node().clone(),
        )))
    }

    pub fn create_registry(&self, entry: (K, V)) -> Result<Arc<dyn Registry<K, V>>, RegistryError> {
        {
            let mut created = self.created.lock();
            if *created {
                return Err(RegistryError::AlreadyCreated);
            }
            *created = true;
        }

        let created = self.created.clone();
        let close_task: CloseTask = Box::new(move || {
            *created.lock() = false;
            debug!("Registry closed, factory slot released");
        });

        (self.create)(entry, close_task).inspect_err(|_| {
            *self.created.lock() = false;
        })
    }
}
