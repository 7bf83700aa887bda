// Distributed singleton
// Every candidate evaluates the election on each provider change and transitions itself

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cohort_common::Node;
use cohort_core::{CommandDispatcher, CommandDispatcherFactory, Group, metrics};
use cohort_provider::{ProvidersListener, ServiceProviderRegistration, ServiceProviderRegistry};

use crate::{
    ElectionPolicy, SimpleElectionPolicy, Singleton, SingletonError, SingletonService,
    SingletonState,
    context::{SingletonCommand, SingletonContext, SingletonOperation, SingletonResponse},
};

/// Builder for a singleton elected among the members of a group
pub struct DistributedSingletonBuilder<S: SingletonService, F> {
    name: String,
    service: S,
    factory: Arc<F>,
    registry: Arc<dyn ServiceProviderRegistry<String>>,
    quorum: usize,
    policy: Arc<dyn ElectionPolicy>,
    backup: Option<Arc<dyn SingletonService<Value = S::Value>>>,
}

impl<S: SingletonService, F: CommandDispatcherFactory> DistributedSingletonBuilder<S, F> {
    /// `registry` tracks the candidates of every singleton; `factory` must
    /// belong to the same group.
    pub fn new(
        name: impl Into<String>,
        service: S,
        factory: Arc<F>,
        registry: Arc<dyn ServiceProviderRegistry<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            service,
            factory,
            registry,
            quorum: 1,
            policy: Arc::new(SimpleElectionPolicy::default()),
            backup: None,
        }
    }

    /// Minimum number of candidates before any node may become primary
    pub fn require_quorum(mut self, quorum: usize) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn election_policy(mut self, policy: Arc<dyn ElectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Service run by candidates while they are not primary
    pub fn backup_service(mut self, backup: Arc<dyn SingletonService<Value = S::Value>>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn build(self) -> Result<DistributedSingleton<S>, SingletonError> {
        if self.quorum == 0 {
            return Err(SingletonError::Configuration(format!(
                "quorum of singleton '{}' must be at least 1",
                self.name
            )));
        }
        if !self.policy.is_deterministic() {
            return Err(SingletonError::Configuration(format!(
                "election policy {:?} of singleton '{}' is not deterministic",
                self.policy, self.name
            )));
        }

        let context = Arc::new(SingletonContext::new(
            self.name.clone(),
            Arc::new(self.service),
            self.backup,
        ));
        let dispatcher = self.factory.create_command_dispatcher::<SingletonCommand<S>>(
            &format!("singleton-{}", self.name),
            context.clone(),
        )?;

        debug!(
            singleton = %self.name,
            quorum = self.quorum,
            policy = ?self.policy,
            "Built distributed singleton"
        );
        Ok(DistributedSingleton {
            inner: Arc::new(Inner {
                name: self.name,
                group: self.registry.group(),
                registry: self.registry,
                dispatcher,
                context,
                quorum: self.quorum,
                policy: self.policy,
                registration: Mutex::new(None),
                quorum_met: AtomicBool::new(false),
            }),
        })
    }
}

struct Inner<S: SingletonService> {
    name: String,
    group: Arc<dyn Group>,
    registry: Arc<dyn ServiceProviderRegistry<String>>,
    dispatcher: Arc<dyn CommandDispatcher<SingletonCommand<S>>>,
    context: Arc<SingletonContext<S>>,
    quorum: usize,
    policy: Arc<dyn ElectionPolicy>,
    registration: Mutex<Option<ServiceProviderRegistration<String>>>,
    quorum_met: AtomicBool,
}

impl<S: SingletonService> Inner<S> {
    fn local(&self) -> &Node {
        self.group.local_node()
    }

    fn elect(&self, candidates: &[Node]) -> Option<Node> {
        if candidates.len() < self.quorum {
            return None;
        }
        self.policy.elect(candidates)
    }

    fn track_quorum(&self, candidates: usize) {
        let met = candidates >= self.quorum;
        let was_met = self.quorum_met.swap(met, Ordering::AcqRel);
        if self.quorum <= 1 {
            return;
        }
        if met && !was_met {
            info!(
                singleton = %self.name,
                quorum = self.quorum,
                "Quorum reached with {} candidates", candidates
            );
        } else if !met && was_met {
            warn!(
                singleton = %self.name,
                quorum = self.quorum,
                "Quorum lost, {} candidates remain", candidates
            );
        } else if !met {
            debug!(
                singleton = %self.name,
                quorum = self.quorum,
                "Quorum not reached, {} candidates", candidates
            );
        }
    }

    async fn providers_changed(&self, providers: &HashSet<Node>) {
        if !self.context.is_candidate() {
            return;
        }

        let candidates = self.group.membership().order(providers);
        self.track_quorum(candidates.len());
        let elected = self.elect(&candidates);

        if elected.as_ref() == Some(self.local()) {
            if self.context.state().await == SingletonState::Primary {
                return;
            }
            info!(
                singleton = %self.name,
                node = %self.local(),
                "Elected primary among {} candidates", candidates.len()
            );
            if self.context.start().await.is_err() {
                self.hand_off(candidates).await;
            }
        } else {
            if let Some(elected) = &elected {
                debug!(singleton = %self.name, primary = %elected, "Another node is primary");
            }
            self.context.stop().await;
        }
    }

    /// Withdraw candidacy after a failed start and ask the next elected
    /// candidate to take over.
    async fn hand_off(&self, candidates: Vec<Node>) {
        self.context.set_candidate(false);
        let registration = self.registration.lock().await.take();
        if let Some(registration) = registration {
            registration.close().await;
        }
        self.context.stop_backup().await;

        let remaining: Vec<Node> = candidates
            .into_iter()
            .filter(|node| node != self.local())
            .collect();
        let Some(successor) = self.elect(&remaining) else {
            warn!(singleton = %self.name, "No candidate can take over after failed start");
            return;
        };

        let command = SingletonCommand::new(SingletonOperation::Start);
        match self.dispatcher.execute_on_node(command, &successor).await {
            Ok(SingletonResponse::Started(true)) => {
                info!(
                    singleton = %self.name,
                    primary = %successor,
                    "Handed singleton over after failed start"
                );
            }
            Ok(response) => {
                warn!(
                    singleton = %self.name,
                    node = %successor,
                    "Successor declined to start: {:?}", response
                );
            }
            Err(e) => {
                warn!(
                    singleton = %self.name,
                    node = %successor,
                    "Failed to hand singleton over: {}", e
                );
                metrics::record_dispatch_failure(self.dispatcher.id(), "start");
            }
        }
    }

    async fn primary_provider(&self) -> Option<Node> {
        let command = SingletonCommand::new(SingletonOperation::IsPrimary);
        let responses = match self.dispatcher.execute_on_cluster(command).await {
            Ok(responses) => responses,
            Err(e) => {
                warn!(singleton = %self.name, "Failed to locate primary: {}", e);
                metrics::record_dispatch_failure(self.dispatcher.id(), "is_primary");
                return None;
            }
        };

        let mut primaries = HashSet::new();
        for (node, response) in responses {
            match response {
                Ok(SingletonResponse::Primary(true)) => {
                    primaries.insert(node);
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(
                        singleton = %self.name,
                        node = %node,
                        "No primary status from node: {}", e
                    );
                }
            }
        }

        let ordered = self.group.membership().order(&primaries);
        if ordered.len() > 1 {
            warn!(singleton = %self.name, "Multiple primaries found: {:?}", ordered);
        }
        ordered.into_iter().next()
    }
}

struct ElectionListener<S: SingletonService>(Weak<Inner<S>>);

#[async_trait]
impl<S: SingletonService> ProvidersListener for ElectionListener<S> {
    async fn providers_changed(&self, providers: &HashSet<Node>) {
        if let Some(inner) = self.0.upgrade() {
            inner.providers_changed(providers).await;
        }
    }
}

/// Singleton service elected among the candidates of a group
pub struct DistributedSingleton<S: SingletonService> {
    inner: Arc<Inner<S>>,
}

impl<S: SingletonService> fmt::Debug for DistributedSingleton<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedSingleton")
            .field("name", &self.inner.name)
            .field("node", self.inner.local())
            .field("quorum", &self.inner.quorum)
            .finish()
    }
}

impl<S: SingletonService> DistributedSingleton<S> {
    /// Local lifecycle state
    pub async fn state(&self) -> SingletonState {
        self.inner.context.state().await
    }

    pub fn quorum(&self) -> usize {
        self.inner.quorum
    }

    /// Stop the singleton and release its command dispatcher
    pub async fn close(&self) {
        self.stop().await;
        self.inner.dispatcher.close();
    }
}

#[async_trait]
impl<S: SingletonService> Singleton for DistributedSingleton<S> {
    type Value = S::Value;

    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn start(&self) -> Result<(), SingletonError> {
        let mut registration = self.inner.registration.lock().await;
        if registration.is_some() {
            return Ok(());
        }

        self.inner.context.set_candidate(true);
        self.inner.context.start_backup().await;

        let listener: Arc<dyn ProvidersListener> =
            Arc::new(ElectionListener(Arc::downgrade(&self.inner)));
        match self
            .inner
            .registry
            .register(self.inner.name.clone(), Some(listener))
            .await
        {
            Ok(r) => {
                *registration = Some(r);
                info!(
                    singleton = %self.inner.name,
                    node = %self.inner.local(),
                    "Joined singleton candidates"
                );
                Ok(())
            }
            Err(e) => {
                self.inner.context.set_candidate(false);
                self.inner.context.stop_backup().await;
                Err(e.into())
            }
        }
    }

    async fn stop(&self) {
        let registration = self.inner.registration.lock().await.take();
        self.inner.context.set_candidate(false);
        if let Some(registration) = registration {
            registration.close().await;
            info!(
                singleton = %self.inner.name,
                node = %self.inner.local(),
                "Left singleton candidates"
            );
        }
        self.inner.context.stop().await;
        self.inner.context.stop_backup().await;
    }

    async fn value(&self) -> Option<S::Value> {
        if self.inner.context.is_primary().await {
            return self.inner.context.value().await;
        }

        let primary = self.inner.primary_provider().await?;
        let command = SingletonCommand::new(SingletonOperation::Value);
        match self.inner.dispatcher.execute_on_node(command, &primary).await {
            Ok(SingletonResponse::Value(value)) => value,
            Ok(response) => {
                warn!(
                    singleton = %self.inner.name,
                    node = %primary,
                    "Unexpected value response: {:?}", response
                );
                None
            }
            Err(e) => {
                warn!(
                    singleton = %self.inner.name,
                    node = %primary,
                    "Failed to fetch singleton value: {}", e
                );
                metrics::record_dispatch_failure(self.inner.dispatcher.id(), "value");
                None
            }
        }
    }

    async fn is_primary(&self) -> bool {
        self.inner.context.is_primary().await
    }

    async fn providers(&self) -> HashSet<Node> {
        self.inner.registry.get_providers(&self.inner.name).await
    }

    async fn primary_provider(&self) -> Option<Node> {
        self.inner.primary_provider().await
    }
}
