//! Settings. Loaded in the following precedence order:
//!
//! 1. The file `./config/<RUN_ENV>/<BASE_CONFIG>` (`RUN_ENV` defaults to
//!    `default`, `BASE_CONFIG` to `base`).
//! 2. The agent partial `./config/<RUN_ENV>/<agent>-partial`.
//! 3. Env vars prefixed `COURIER_BASE`, shared by all agents.
//! 4. Env vars prefixed `COURIER_<AGENTNAME>`, for one agent.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::bail, Report};
use config::{Config, ConfigError, Environment, File};
use primitive_types::H256;
use serde::Deserialize;

use courier_core::db::CourierDB;
use courier_core::{CHALLENGE_WINDOW_SECS, DB};

use crate::agent::AgentCore;
use crate::metrics::CoreMetrics;

/// Tracing subscriber management
pub mod trace;

use trace::TracingConfig;

/// Connection information for a chain.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChainConf {
    /// An HTTP JSON adapter endpoint
    Http {
        /// Endpoint url
        url: String,
    },
}

/// A chain setup is a chain identifier plus connection info.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSetup {
    /// Chain name
    pub name: String,
    /// Chain identifier
    pub chain_id: u32,
    /// Connection details
    pub connection: ChainConf,
}

fn default_max_bundle_messages() -> usize {
    8
}

fn default_max_wait_secs() -> u64 {
    10 * 60
}

fn default_interval_secs() -> u64 {
    5
}

/// Bundler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlerConf {
    /// Hard cap on messages per bundle
    #[serde(default = "default_max_bundle_messages")]
    pub max_bundle_messages: usize,
    /// Max seconds the oldest pending message may wait before a short bundle
    /// is formed anyway
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
    /// Bundler tick interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl BundlerConf {
    /// Max wait as a duration
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    /// Tick interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Fee ledger configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeConf {
    /// Default fee unit per message, used when an event carries no fee
    pub message_fee: u128,
    /// Minimum share of collected fees owed to public goods, in bps
    pub min_public_goods_bps: u32,
    /// Pool capacity in fee units; reaching it forces a settlement
    pub full_pool_size: u128,
    /// Treasury destination address
    pub treasury: H256,
    /// Public goods destination address
    pub public_goods: H256,
}

fn default_confirmations() -> u64 {
    6
}

fn default_challenge_window_secs() -> u64 {
    CHALLENGE_WINDOW_SECS
}

fn default_max_submit_attempts() -> u32 {
    6
}

fn default_stuck_window_multiple() -> u64 {
    3
}

fn default_ingest_batch() -> usize {
    100
}

/// Relay driver and finality tracker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConf {
    /// Block confirmations required before the challenge window may close
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Challenge window in seconds. One week in production; configurable so
    /// tests and dev deployments can shrink it.
    #[serde(default = "default_challenge_window_secs")]
    pub challenge_window_secs: u64,
    /// Cap on submission attempts for one bundle
    #[serde(default = "default_max_submit_attempts")]
    pub max_submit_attempts: u32,
    /// Sweep/poll interval in seconds
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// A bundle stuck in Finalizing longer than this multiple of the
    /// challenge window raises an operator alert
    #[serde(default = "default_stuck_window_multiple")]
    pub stuck_window_multiple: u64,
    /// Max events fetched per ingestion poll
    #[serde(default = "default_ingest_batch")]
    pub ingest_batch: usize,
}

impl RelayConf {
    /// Challenge window as a duration
    pub fn challenge_window(&self) -> Duration {
        Duration::from_secs(self.challenge_window_secs)
    }

    /// Poll interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Settings shared by all Courier agents.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// The path to use for the DB file
    pub db: String,
    /// Port to serve metrics and queries on
    pub metrics: Option<u16>,
    /// The tracing configuration
    #[serde(default)]
    pub tracing: TracingConfig,
    /// The hub chain
    pub hub: ChainSetup,
    /// The spoke chains, keyed by name
    pub spokes: HashMap<String, ChainSetup>,
    /// Bundler configuration
    pub bundler: BundlerConf,
    /// Fee configuration
    pub fees: FeeConf,
    /// Relay configuration
    #[serde(default = "default_relay_conf")]
    pub relay: RelayConf,
}

fn default_relay_conf() -> RelayConf {
    RelayConf {
        confirmations: default_confirmations(),
        challenge_window_secs: default_challenge_window_secs(),
        max_submit_attempts: default_max_submit_attempts(),
        interval_secs: default_interval_secs(),
        stuck_window_multiple: default_stuck_window_multiple(),
        ingest_batch: default_ingest_batch(),
    }
}

impl Settings {
    /// Load settings for the named agent from config files and env vars.
    pub fn new(agent_name: &str) -> Result<Self, ConfigError> {
        let env = env::var("RUN_ENV").unwrap_or_else(|_| "default".into());
        let fname = env::var("BASE_CONFIG").unwrap_or_else(|_| "base".into());

        let agent_prefix = format!("COURIER_{}", agent_name.to_ascii_uppercase());

        Config::builder()
            .add_source(File::with_name(&format!("./config/{env}/{fname}")).required(false))
            .add_source(
                File::with_name(&format!("./config/{env}/{agent_name}-partial")).required(false),
            )
            .add_source(Environment::with_prefix("COURIER_BASE").separator("_"))
            .add_source(Environment::with_prefix(&agent_prefix).separator("_"))
            .build()?
            .try_deserialize()
    }

    /// Reject configurations that violate the documented bounds.
    pub fn validate(&self) -> Result<(), Report> {
        if self.bundler.max_bundle_messages < 1 {
            bail!("maxBundleMessages must be >= 1");
        }
        if self.fees.min_public_goods_bps > 10_000 {
            bail!(
                "minPublicGoodsBps must be within 0..=10000, got {}",
                self.fees.min_public_goods_bps
            );
        }
        if self.relay.max_submit_attempts < 1 {
            bail!("maxSubmitAttempts must be >= 1");
        }
        let hub = self.hub.chain_id;
        if self.spokes.values().any(|s| s.chain_id == hub) {
            bail!("hub chain id {hub} also configured as a spoke");
        }
        Ok(())
    }

    /// The spoke setup for a chain id, if configured.
    pub fn spoke_by_chain_id(&self, chain_id: u32) -> Option<&ChainSetup> {
        self.spokes.values().find(|s| s.chain_id == chain_id)
    }

    /// Open the DB and build the metrics registry for the named agent.
    pub fn try_into_core(&self, agent_name: &str) -> Result<AgentCore, Report> {
        self.validate()?;

        let metrics = Arc::new(CoreMetrics::new(
            agent_name,
            self.metrics,
            Arc::new(prometheus::Registry::new()),
        )?);
        let db = CourierDB::new(agent_name, DB::from_path(std::path::Path::new(&self.db))?);

        Ok(AgentCore {
            db,
            metrics,
            settings: self.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn settings() -> Settings {
        Settings {
            db: "/tmp/courier-test-db".into(),
            metrics: None,
            tracing: TracingConfig::default(),
            hub: ChainSetup {
                name: "hub".into(),
                chain_id: 1,
                connection: ChainConf::Http {
                    url: "http://localhost:8545".into(),
                },
            },
            spokes: HashMap::from([(
                "spokeA".into(),
                ChainSetup {
                    name: "spokeA".into(),
                    chain_id: 10,
                    connection: ChainConf::Http {
                        url: "http://localhost:8546".into(),
                    },
                },
            )]),
            bundler: BundlerConf {
                max_bundle_messages: 8,
                max_wait_secs: 600,
                interval_secs: 5,
            },
            fees: FeeConf {
                message_fee: 100,
                min_public_goods_bps: 500,
                full_pool_size: 10_000,
                treasury: H256::repeat_byte(1),
                public_goods: H256::repeat_byte(2),
            },
            relay: default_relay_conf(),
        }
    }

    #[test]
    fn accepts_valid_settings() {
        assert!(settings().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_bps() {
        let mut s = settings();
        s.fees.min_public_goods_bps = 10_001;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_zero_bundle_bound() {
        let mut s = settings();
        s.bundler.max_bundle_messages = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_hub_as_spoke() {
        let mut s = settings();
        s.spokes.get_mut("spokeA").unwrap().chain_id = 1;
        assert!(s.validate().is_err());
    }
}
