//! The relay driver: pushes sealed bundles to the hub, one in-flight
//! submission per (origin, destination) pair, with bounded retry.
//!
//! Transient chain errors back off exponentially and retry up to the
//! configured attempt cap. A rejection from the hub is terminal for the
//! attempt series; the bundle is parked for operator attention rather than
//! hammered forever.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use primitive_types::H256;
use prometheus::IntCounterVec;
use tracing::{error, info, info_span, instrument::Instrumented, warn, Instrument};

use courier_base::settings::RelayConf;
use courier_core::{
    Bundle, BundleState, HubChain, MessageStatus, SubmissionHandle, SubmitError,
};

use crate::store::{unix_now, MessageStore, Pair};

/// Max backoff between submission attempts.
const MAX_BACKOFF_SECS: u64 = 60;

/// Exponential backoff for transient submission failures.
fn backoff(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(MAX_BACKOFF_SECS);
    Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
}

#[derive(Debug)]
pub(crate) struct RelayDriver {
    store: Arc<MessageStore>,
    hub: Arc<dyn HubChain>,
    conf: RelayConf,
    submissions: IntCounterVec,
    /// Bundles the hub rejected outright; retrying cannot help, so they are
    /// skipped until an operator steps in.
    parked: Mutex<HashSet<H256>>,
}

impl RelayDriver {
    pub(crate) fn new(
        store: Arc<MessageStore>,
        hub: Arc<dyn HubChain>,
        conf: RelayConf,
        submissions: IntCounterVec,
    ) -> Self {
        Self {
            store,
            hub,
            conf,
            submissions,
            parked: Mutex::new(HashSet::new()),
        }
    }

    /// Drive one bundle to acceptance, retrying transient failures with
    /// backoff up to the attempt cap.
    pub(crate) async fn drive_bundle(&self, bundle: &Bundle) -> Result<SubmissionHandle, SubmitError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = self
                .hub
                .submit_bundle(
                    bundle.id,
                    bundle.commitment,
                    bundle.message_ids.len() as u32,
                )
                .await;

            match result {
                Ok(outcome) if outcome.executed => {
                    let handle = SubmissionHandle {
                        bundle_id: bundle.id,
                        txid: outcome.txid,
                        submitted_at: unix_now(),
                    };
                    self.store.db().store_submission(&handle).map_err(courier_core::StoreError::from)?;
                    let bundle = self
                        .store
                        .transition_bundle(bundle.id, BundleState::Submitted)?;
                    self.store
                        .set_bundle_statuses(&bundle, MessageStatus::Submitted)?;
                    self.submissions.with_label_values(&["accepted"]).inc();
                    info!(
                        bundle = ?bundle.id,
                        txid = ?outcome.txid,
                        attempts,
                        "bundle commitment accepted by hub"
                    );
                    return Ok(handle);
                }
                Ok(outcome) => {
                    warn!(bundle = ?bundle.id, txid = ?outcome.txid, "submission tx not executed, retrying");
                }
                Err(e) if !e.is_retriable() => {
                    self.submissions.with_label_values(&["rejected"]).inc();
                    error!(bundle = ?bundle.id, error = %e, "hub rejected bundle submission");
                    self.parked.lock().expect("parked lock poisoned").insert(bundle.id);
                    return Err(SubmitError::Rejected(e.to_string()));
                }
                Err(e) => {
                    warn!(bundle = ?bundle.id, attempt = attempts, error = %e, "transient submission failure");
                }
            }

            if attempts >= self.conf.max_submit_attempts {
                self.submissions.with_label_values(&["timed_out"]).inc();
                return Err(SubmitError::TimedOut { attempts });
            }
            tokio::time::sleep(backoff(attempts)).await;
        }
    }

    /// One pass: drive the oldest sealed bundle of each pair, serially.
    pub(crate) async fn tick(&self) -> Result<(), SubmitError> {
        let parked: HashSet<H256> = self.parked.lock().expect("parked lock poisoned").clone();
        let mut sealed: Vec<Bundle> = self
            .store
            .bundles()
            .into_iter()
            .filter(|b| b.state == BundleState::Sealed && !parked.contains(&b.id))
            .collect();
        sealed.sort_by_key(|b| (b.created_at, b.message_ids.first().map(|id| id.sequence)));

        let mut driven: HashSet<Pair> = HashSet::new();
        for bundle in sealed {
            if !driven.insert((bundle.origin, bundle.destination)) {
                continue;
            }
            match self.drive_bundle(&bundle).await {
                Ok(_) => {}
                Err(SubmitError::Rejected(_)) => {}
                Err(e) => {
                    warn!(bundle = ?bundle.id, error = %e, "bundle submission will retry next pass");
                }
            }
        }
        Ok(())
    }

    pub(crate) fn spawn(self: Arc<Self>) -> Instrumented<tokio::task::JoinHandle<color_eyre::Result<()>>> {
        let span = info_span!("RelayDriver");
        let interval = self.conf.interval();
        tokio::spawn(async move {
            loop {
                self.tick().await?;
                tokio::time::sleep(interval).await;
            }
        })
        .instrument(span)
    }
}
