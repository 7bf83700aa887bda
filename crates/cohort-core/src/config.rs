//! Configuration management for Cohort
//!
//! Values are layered: built-in defaults, then an optional configuration file,
//! then `COHORT__*` environment variables (`__` separates key segments, so
//! `COHORT__SINGLETON__QUORUM=2` sets `cohort.singleton.quorum`).

use std::{path::Path, time::Duration};

use config::{Config, Environment};

use cohort_common::{DEFAULT_CLUSTER_NAME, local_node_name};

pub const CLUSTER_NAME: &str = "cohort.cluster.name";
pub const NODE_NAME: &str = "cohort.node.name";
pub const CLUSTERING_ENABLED: &str = "cohort.clustering.enabled";
pub const DISPATCHER_TIMEOUT_MS: &str = "cohort.dispatcher.timeout_ms";
pub const SINGLETON_QUORUM: &str = "cohort.singleton.quorum";
pub const SINGLETON_ELECTION_POLICY: &str = "cohort.singleton.election_policy";
pub const SINGLETON_POSITION: &str = "cohort.singleton.position";
pub const SINGLETON_PREFERENCES: &str = "cohort.singleton.preferences";

pub const DEFAULT_DISPATCHER_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_ELECTION_POLICY: &str = "simple";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Create a new configuration from a Config instance
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("cohort")
                .prefix_separator("__")
                .separator("__")
                .keep_prefix(true)
                .try_parsing(true),
        );

        Ok(Self::from_config(builder.build()?))
    }

    /// Cluster (group) name
    pub fn cluster_name(&self) -> String {
        self.config
            .get_string(CLUSTER_NAME)
            .unwrap_or_else(|_| DEFAULT_CLUSTER_NAME.to_string())
    }

    /// Local node name (default: host name)
    pub fn node_name(&self) -> String {
        self.config
            .get_string(NODE_NAME)
            .unwrap_or_else(|_| local_node_name())
    }

    /// Whether clustered variants are used (default: true)
    pub fn clustering_enabled(&self) -> bool {
        self.config.get_bool(CLUSTERING_ENABLED).unwrap_or(true)
    }

    /// Per-node command response timeout (default: 5000ms)
    pub fn dispatcher_timeout(&self) -> Duration {
        let millis = self
            .config
            .get_int(DISPATCHER_TIMEOUT_MS)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_DISPATCHER_TIMEOUT_MS);
        Duration::from_millis(millis)
    }

    /// Minimum number of providers required to elect a primary (default: 1).
    ///
    /// Returned as configured; validation happens in the singleton builder.
    pub fn singleton_quorum(&self) -> i64 {
        self.config.get_int(SINGLETON_QUORUM).unwrap_or(1)
    }

    /// Election policy name: "simple" or "random"
    pub fn election_policy(&self) -> String {
        self.config
            .get_string(SINGLETON_ELECTION_POLICY)
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|_| DEFAULT_ELECTION_POLICY.to_string())
    }

    /// Position used by the simple election policy (default: 0)
    pub fn election_position(&self) -> i64 {
        self.config.get_int(SINGLETON_POSITION).unwrap_or(0)
    }

    /// Preferred node names, either a list or a comma separated string
    pub fn election_preferences(&self) -> Vec<String> {
        if let Ok(list) = self.config.get::<Vec<String>>(SINGLETON_PREFERENCES) {
            return list;
        }
        self.config
            .get_string(SINGLETON_PREFERENCES)
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
