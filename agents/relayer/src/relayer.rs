//! The relayer agent: wires the store, fee ledger, and chain clients to the
//! worker loops and supervises them.

use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::Result;
use futures_util::future::select_all;
use tokio::task::JoinHandle;
use tracing::{info, info_span, instrument::Instrumented, Instrument};

use courier_base::{cancel_task, AgentCore, CourierAgent};
use courier_core::{HubChain, SpokeChain};

use crate::bundler::Bundler;
use crate::chains::{build_hub, build_spoke};
use crate::fees::FeeLedger;
use crate::finality::FinalityTracker;
use crate::ingest::Ingestor;
use crate::server::{self, ServerState};
use crate::settings::RelayerSettings;
use crate::store::MessageStore;
use crate::submit::RelayDriver;

#[derive(Debug)]
pub(crate) struct Relayer {
    core: AgentCore,
    store: Arc<MessageStore>,
    fees: Arc<FeeLedger>,
    hub: Arc<dyn HubChain>,
    spokes: Vec<Arc<dyn SpokeChain>>,
}

impl AsRef<AgentCore> for Relayer {
    fn as_ref(&self) -> &AgentCore {
        &self.core
    }
}

#[async_trait]
impl CourierAgent for Relayer {
    const AGENT_NAME: &'static str = "relayer";

    type Settings = RelayerSettings;

    async fn from_settings(settings: Self::Settings) -> Result<Self> {
        let core = settings.as_ref().try_into_core(Self::AGENT_NAME)?;
        let store = Arc::new(MessageStore::new(
            core.db.clone(),
            core.settings.bundler.max_bundle_messages,
        )?);
        let fees = Arc::new(FeeLedger::new(
            core.db.clone(),
            core.settings.fees.clone(),
        )?);
        let hub = build_hub(&core.settings.hub);
        let spokes = core.settings.spokes.values().map(build_spoke).collect();
        Ok(Self {
            core,
            store,
            fees,
            hub,
            spokes,
        })
    }

    fn run(self) -> Instrumented<JoinHandle<Result<()>>> {
        let span = info_span!("Relayer");
        tokio::spawn(async move {
            let settings = &self.core.settings;
            let metrics = self.metrics();

            let bundles_formed = metrics.new_int_counter(
                "bundles_formed_total",
                "Number of bundles sealed since boot",
                &["origin", "destination"],
            )?;
            let submissions = metrics.new_int_counter(
                "bundle_submissions_total",
                "Bundle submission outcomes since boot",
                &["outcome"],
            )?;
            let outcomes = metrics.new_int_counter(
                "finality_outcomes_total",
                "Bundle and message finality outcomes since boot",
                &["outcome"],
            )?;
            let stuck = metrics.new_int_gauge(
                "stuck_finalizing_bundles",
                "Bundles finalizing for longer than the alert bound",
                &["origin"],
            )?;

            let bundler = Arc::new(Bundler::new(
                self.store.clone(),
                settings.bundler.clone(),
                bundles_formed,
            ));
            let driver = Arc::new(RelayDriver::new(
                self.store.clone(),
                self.hub.clone(),
                settings.relay.clone(),
                submissions,
            ));
            let tracker = Arc::new(FinalityTracker::new(
                self.store.clone(),
                self.fees.clone(),
                self.hub.clone(),
                settings.relay.clone(),
                outcomes,
                stuck,
            ));

            let mut tasks = vec![bundler.spawn(), driver.spawn(), tracker.spawn()];
            for spoke in &self.spokes {
                let ingestor = Arc::new(Ingestor::new(
                    self.store.clone(),
                    self.fees.clone(),
                    spoke.clone(),
                    settings.relay.clone(),
                    settings.fees.clone(),
                    metrics.messages(),
                    metrics.latest_sequence(),
                ));
                tasks.push(ingestor.spawn());
            }
            if let Some(port) = metrics.listen_port() {
                let state = Arc::new(ServerState {
                    store: self.store.clone(),
                    fees: self.fees.clone(),
                    metrics: metrics.clone(),
                });
                tasks.push(server::spawn(state, port));
            }

            info!(
                hub = self.hub.name(),
                spokes = self.spokes.len(),
                "relayer started"
            );

            let (res, _, remaining) = select_all(tasks).await;
            for task in remaining {
                cancel_task!(task);
            }
            res?
        })
        .instrument(span)
    }
}
