use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::Result;
use tokio::task::JoinHandle;
use tracing::instrument::Instrumented;

use courier_core::db::CourierDB;

use crate::{metrics::CoreMetrics, settings::Settings};

/// State shared by all agents: the database handle, the metrics registry,
/// and the settings the agent was booted with.
#[derive(Debug, Clone)]
pub struct AgentCore {
    /// A persistent KV store
    pub db: CourierDB,
    /// Prometheus metrics
    pub metrics: Arc<CoreMetrics>,
    /// The settings the agent was instantiated with
    pub settings: Settings,
}

/// A Courier agent.
///
/// Agents are constructed from settings, run as a set of supervised tasks,
/// and report errors through `color_eyre`.
#[async_trait]
pub trait CourierAgent: Send + Sync + Sized + AsRef<AgentCore> + 'static {
    /// The agent's name, used for metrics and config env prefixes
    const AGENT_NAME: &'static str;

    /// The settings object for this agent
    type Settings: AsRef<Settings> + Send;

    /// Instantiate the agent from its settings
    async fn from_settings(settings: Self::Settings) -> Result<Self>;

    /// Run the agent until it fails or is cancelled
    fn run(self) -> Instrumented<JoinHandle<Result<()>>>;

    /// The agent's DB handle
    fn db(&self) -> CourierDB {
        self.as_ref().db.clone()
    }

    /// The agent's metrics
    fn metrics(&self) -> Arc<CoreMetrics> {
        self.as_ref().metrics.clone()
    }
}
