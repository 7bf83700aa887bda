// Singleton command context
// Owns the local lifecycle of a distributed singleton and answers commands from other nodes

use std::{
    fmt,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use cohort_common::CommandError;
use cohort_core::{Command, metrics};

use crate::{ServiceError, SingletonService, SingletonState};

type BackupService<V> = Arc<dyn SingletonService<Value = V>>;

struct Lifecycle<V> {
    state: SingletonState,
    value: Option<V>,
    backup_running: bool,
}

/// Local state of a distributed singleton.
///
/// Transitions are serialized; a transition in progress blocks value and
/// state reads until it completes.
pub struct SingletonContext<S: SingletonService> {
    name: String,
    service: Arc<S>,
    backup: Option<BackupService<S::Value>>,
    lifecycle: Mutex<Lifecycle<S::Value>>,
    candidate: AtomicBool,
}

impl<S: SingletonService> fmt::Debug for SingletonContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonContext")
            .field("name", &self.name)
            .field("candidate", &self.is_candidate())
            .finish()
    }
}

impl<S: SingletonService> SingletonContext<S> {
    pub(crate) fn new(
        name: String,
        service: Arc<S>,
        backup: Option<BackupService<S::Value>>,
    ) -> Self {
        Self {
            name,
            service,
            backup,
            lifecycle: Mutex::new(Lifecycle {
                state: SingletonState::Standby,
                value: None,
                backup_running: false,
            }),
            candidate: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_candidate(&self) -> bool {
        self.candidate.load(Ordering::Acquire)
    }

    pub(crate) fn set_candidate(&self, candidate: bool) {
        self.candidate.store(candidate, Ordering::Release);
    }

    pub async fn state(&self) -> SingletonState {
        self.lifecycle.lock().await.state
    }

    pub async fn is_primary(&self) -> bool {
        self.state().await == SingletonState::Primary
    }

    pub async fn value(&self) -> Option<S::Value> {
        self.lifecycle.lock().await.value.clone()
    }

    /// Start the primary service on this node.
    ///
    /// The backup service, if running, is stopped first. On failure the node
    /// is back in standby with its backup service restarted.
    pub async fn start(&self) -> Result<(), ServiceError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state == SingletonState::Primary {
            return Ok(());
        }

        lifecycle.state = SingletonState::Starting;
        self.stop_backup_locked(&mut lifecycle).await;

        match self.service.start().await {
            Ok(value) => {
                lifecycle.value = Some(value);
                lifecycle.state = SingletonState::Primary;
                metrics::set_singleton_primary(&self.name, true);
                info!(singleton = %self.name, "Started singleton service, this node is primary");
                Ok(())
            }
            Err(e) => {
                error!(singleton = %self.name, "Failed to start singleton service: {}", e);
                lifecycle.state = SingletonState::Standby;
                if self.is_candidate() {
                    self.start_backup_locked(&mut lifecycle).await;
                }
                Err(e)
            }
        }
    }

    /// Stop the primary service on this node.
    ///
    /// The node leaves primary state even if the service fails to stop.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != SingletonState::Primary {
            return;
        }

        lifecycle.state = SingletonState::Stopping;
        if let Err(e) = self.service.stop().await {
            warn!(singleton = %self.name, "Failed to stop singleton service: {}", e);
        }
        lifecycle.value = None;
        lifecycle.state = SingletonState::Standby;
        metrics::set_singleton_primary(&self.name, false);
        info!(singleton = %self.name, "Stopped singleton service, this node is standby");

        if self.is_candidate() {
            self.start_backup_locked(&mut lifecycle).await;
        }
    }

    pub(crate) async fn start_backup(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state == SingletonState::Standby {
            self.start_backup_locked(&mut lifecycle).await;
        }
    }

    pub(crate) async fn stop_backup(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_backup_locked(&mut lifecycle).await;
    }

    async fn start_backup_locked(&self, lifecycle: &mut Lifecycle<S::Value>) {
        let Some(backup) = &self.backup else {
            return;
        };
        if lifecycle.backup_running {
            return;
        }
        match backup.start().await {
            Ok(_) => lifecycle.backup_running = true,
            Err(e) => warn!(singleton = %self.name, "Failed to start backup service: {}", e),
        }
    }

    async fn stop_backup_locked(&self, lifecycle: &mut Lifecycle<S::Value>) {
        let Some(backup) = &self.backup else {
            return;
        };
        if !lifecycle.backup_running {
            return;
        }
        lifecycle.backup_running = false;
        if let Err(e) = backup.stop().await {
            warn!(singleton = %self.name, "Failed to stop backup service: {}", e);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SingletonOperation {
    /// Start the service on the receiving node if it is still a candidate
    Start,
    /// Fetch the value of the running service
    Value,
    /// Whether the receiving node is primary
    IsPrimary,
}

/// Command addressed to the [`SingletonContext`] of one singleton
#[derive(Serialize, Deserialize)]
pub struct SingletonCommand<S> {
    pub operation: SingletonOperation,
    #[serde(skip)]
    service: PhantomData<fn() -> S>,
}

impl<S> SingletonCommand<S> {
    pub fn new(operation: SingletonOperation) -> Self {
        Self {
            operation,
            service: PhantomData,
        }
    }
}

impl<S> Clone for SingletonCommand<S> {
    fn clone(&self) -> Self {
        Self::new(self.operation)
    }
}

impl<S> fmt::Debug for SingletonCommand<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SingletonCommand")
            .field(&self.operation)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SingletonResponse<V> {
    Started(bool),
    Value(Option<V>),
    Primary(bool),
}

#[async_trait]
impl<S: SingletonService> Command for SingletonCommand<S> {
    type Context = SingletonContext<S>;
    type Response = SingletonResponse<S::Value>;

    async fn execute(
        self,
        context: &SingletonContext<S>,
    ) -> Result<SingletonResponse<S::Value>, CommandError> {
        match self.operation {
            SingletonOperation::Start => {
                if !context.is_candidate() {
                    return Ok(SingletonResponse::Started(false));
                }
                context
                    .start()
                    .await
                    .map(|_| SingletonResponse::Started(true))
                    .map_err(|e| CommandError::new(e.to_string()))
            }
            SingletonOperation::Value => Ok(SingletonResponse::Value(context.value().await)),
            SingletonOperation::IsPrimary => {
                Ok(SingletonResponse::Primary(context.is_primary().await))
            }
        }
    }
}
