//! Cohort demo binary.
//!
//! Runs an in-memory cluster with one singleton candidate per node, prints the
//! elected primary, then removes it and prints the node that takes over.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use async_trait::async_trait;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cohort::{
    common::Node,
    core::{ClusterConfig, ClusterMember, Configuration, InMemoryCluster, metrics},
    singleton::{ServiceError, Singleton, SingletonBuilderFactory, SingletonService},
};

const DEMO_SINGLETON: &str = "demo";

/// Command line arguments for the demo
#[derive(Debug, Parser)]
#[command(name = "cohort", version, about = "Elect a singleton across an in-memory cluster")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", env = "COHORT_CONFIG")]
    config: Option<PathBuf>,
    /// Number of cluster nodes
    #[arg(short = 'n', long = "nodes", default_value_t = 3)]
    nodes: usize,
    /// Minimum candidates before a primary is elected
    #[arg(short = 'q', long = "quorum")]
    quorum: Option<usize>,
}

struct DemoService {
    node: Node,
}

#[async_trait]
impl SingletonService for DemoService {
    type Value = String;

    async fn start(&self) -> Result<String, ServiceError> {
        info!(node = %self.node, "Demo service started");
        Ok(format!("served by {}", self.node))
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        info!(node = %self.node, "Demo service stopped");
        Ok(())
    }
}

struct DemoNode {
    member: Arc<ClusterMember>,
    singletons: SingletonBuilderFactory<ClusterMember>,
    singleton: Arc<dyn Singleton<Value = String>>,
}

async fn wait_for_primary(nodes: &[DemoNode]) -> Option<(Node, String)> {
    let observer = nodes.first()?;
    for _ in 0..50 {
        if let Some(primary) = observer.singleton.primary_provider().await {
            if let Some(value) = observer.singleton.value().await {
                return Some((primary, value));
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    metrics::init_metrics();

    let cli = Cli::parse();
    let configuration =
        Configuration::load(cli.config.as_deref()).context("failed to load configuration")?;
    if cli.nodes == 0 {
        bail!("at least one node is required");
    }

    let cluster = InMemoryCluster::with_config(
        configuration.cluster_name(),
        ClusterConfig::from_configuration(&configuration),
    );

    let mut nodes = Vec::with_capacity(cli.nodes);
    for index in 0..cli.nodes {
        let member = Arc::new(cluster.join(&format!("node-{index}")).await);
        let singletons =
            SingletonBuilderFactory::from_configuration(&configuration, member.clone())?;
        let mut builder = singletons
            .create_singleton_builder(
                DEMO_SINGLETON,
                DemoService {
                    node: member.node().clone(),
                },
            )
            .configured(&configuration)?;
        if let Some(quorum) = cli.quorum {
            builder = builder.require_quorum(quorum);
        }
        let singleton = builder.build()?;
        singleton.start().await?;
        nodes.push(DemoNode {
            member,
            singletons,
            singleton,
        });
    }

    let Some((primary, value)) = wait_for_primary(&nodes).await else {
        println!("No primary elected among {} nodes", nodes.len());
        return Ok(());
    };
    println!("Primary: {primary} ({value})");

    if nodes.len() > 1 {
        cluster.leave(&primary).await;
        let mut departed = Vec::new();
        nodes.retain(|node| {
            let keep = node.member.node() != &primary;
            if !keep {
                departed.push(node.singleton.clone());
            }
            keep
        });
        for singleton in departed {
            singleton.stop().await;
        }

        match wait_for_primary(&nodes).await {
            Some((successor, value)) => println!("Failover: {primary} -> {successor} ({value})"),
            None => println!("No primary after {primary} left"),
        }
    }

    for node in &nodes {
        node.singleton.stop().await;
        node.singletons.close().await;
    }
    Ok(())
}
