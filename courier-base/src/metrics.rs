//! Useful metrics that all agents should track.

use std::sync::Arc;

use color_eyre::Result;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry};

#[derive(Debug)]
/// Metrics shared by all Courier agents
pub struct CoreMetrics {
    agent_name: String,
    messages: Box<IntCounterVec>,
    latest_sequence: Box<IntGaugeVec>,
    listen_port: Option<u16>,
    /// Metrics registry for adding new metrics and gathering reports
    registry: Arc<Registry>,
}

impl CoreMetrics {
    /// Track metrics for a particular agent name.
    pub fn new<S: Into<String>>(
        for_agent: S,
        listen_port: Option<u16>,
        registry: Arc<Registry>,
    ) -> prometheus::Result<CoreMetrics> {
        let metrics = CoreMetrics {
            agent_name: for_agent.into(),
            messages: Box::new(IntCounterVec::new(
                Opts::new(
                    "messages_total",
                    "Number of messages observed by this agent since boot, by status",
                )
                .namespace("courier")
                .const_label("VERSION", env!("CARGO_PKG_VERSION")),
                &["origin", "status", "agent"],
            )?),
            latest_sequence: Box::new(IntGaugeVec::new(
                Opts::new(
                    "latest_sequence",
                    "The latest message sequence seen per origin chain",
                )
                .namespace("courier")
                .const_label("VERSION", env!("CARGO_PKG_VERSION")),
                &["phase", "origin", "agent"],
            )?),
            registry,
            listen_port,
        };

        metrics.registry.register(metrics.messages.clone())?;
        metrics.registry.register(metrics.latest_sequence.clone())?;

        Ok(metrics)
    }

    /// The name of the agent these metrics are for.
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// The port the metrics endpoint should listen on, if any.
    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    /// Register an int gauge.
    pub fn new_int_gauge(
        &self,
        metric_name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntGaugeVec> {
        let gauge = IntGaugeVec::new(
            Opts::new(metric_name, help)
                .namespace("courier")
                .const_label("VERSION", env!("CARGO_PKG_VERSION")),
            labels,
        )?;
        self.registry.register(Box::new(gauge.clone()))?;

        Ok(gauge)
    }

    /// Register an int counter.
    pub fn new_int_counter(
        &self,
        metric_name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<IntCounterVec> {
        let counter = IntCounterVec::new(
            Opts::new(metric_name, help)
                .namespace("courier")
                .const_label("VERSION", env!("CARGO_PKG_VERSION")),
            labels,
        )?;
        self.registry.register(Box::new(counter.clone()))?;

        Ok(counter)
    }

    /// Counter of messages seen, labeled by origin and status.
    pub fn messages(&self) -> IntCounterVec {
        *self.messages.clone()
    }

    /// Gauge of the latest sequence per origin, labeled by phase.
    pub fn latest_sequence(&self) -> IntGaugeVec {
        *self.latest_sequence.clone()
    }

    /// Gather available metrics into an encoded (plaintext, OpenMetrics format) report.
    pub fn gather(&self) -> prometheus::Result<Vec<u8>> {
        let collected_metrics = self.registry.gather();
        let mut out_buf = Vec::with_capacity(1024 * 64);
        let encoder = prometheus::TextEncoder::new();
        encoder.encode(&collected_metrics, &mut out_buf)?;
        Ok(out_buf)
    }
}
