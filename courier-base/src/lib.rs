//! Shared scaffolding for Courier agents: settings loading, tracing
//! initialization, prometheus metrics, and the agent lifecycle trait.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]
#![forbid(unsafe_code)]

/// The agent trait and shared core
pub mod agent;

/// Loop and task macros
mod macros;

/// Useful metrics that all agents should track
pub mod metrics;

/// Settings and configuration
pub mod settings;

pub use agent::{AgentCore, CourierAgent};
pub use metrics::CoreMetrics;
pub use settings::{ChainConf, ChainSetup, Settings};
