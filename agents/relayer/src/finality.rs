//! The finality tracker: watches submitted bundles through confirmation,
//! the challenge window, and hub-side execution.
//!
//! A submitted bundle begins finalizing once its commitment transaction has
//! enough confirmations. The challenge window runs from submission; when it
//! elapses with no revert signal the bundle finalizes and its messages
//! execute on the hub in emission order. A revert signal before finality
//! unwinds the bundle: members return to pending, still owing their fees,
//! and are re-bundled. A bundle whose window elapses without ever confirming
//! is expired and its members' unsettled fees are reversed.

use std::sync::Arc;

use prometheus::{IntCounterVec, IntGaugeVec};
use tracing::{error, info, info_span, instrument::Instrumented, warn, Instrument};

use courier_base::settings::RelayConf;
use courier_core::{
    Bundle, BundleState, ExecutionRecord, HubChain, MessageStatus, StoreError,
};

use crate::fees::FeeLedger;
use crate::store::{unix_now, MessageStore};

/// What the tracker should do with a bundle, given what the hub reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    /// Nothing yet
    Wait,
    /// Confirmation threshold reached; start the member bookkeeping
    BeginFinalizing,
    /// Challenge window elapsed cleanly; finalize and execute
    Finalize,
    /// Revert signal observed before finality; unwind
    Revert,
    /// Window elapsed without ever confirming
    Expire,
}

/// Pure finality decision for one bundle.
///
/// `submitted_at` is the acceptance time of the commitment transaction; the
/// challenge window runs from there. A revert signal takes precedence over
/// everything else.
pub(crate) fn decide(
    state: BundleState,
    submitted_at: u64,
    confirmations: u64,
    reverted: bool,
    now: u64,
    conf: &RelayConf,
) -> Action {
    let window_elapsed = now.saturating_sub(submitted_at) >= conf.challenge_window_secs;
    match state {
        _ if reverted && !state.is_terminal() => Action::Revert,
        BundleState::Submitted if confirmations >= conf.confirmations => Action::BeginFinalizing,
        BundleState::Submitted if window_elapsed => Action::Expire,
        BundleState::Finalizing if window_elapsed => Action::Finalize,
        _ => Action::Wait,
    }
}

/// Whether a finalizing bundle has been in flight long enough to demand
/// operator attention.
pub(crate) fn is_stuck(submitted_at: u64, now: u64, conf: &RelayConf) -> bool {
    now.saturating_sub(submitted_at) >= conf.stuck_window_multiple * conf.challenge_window_secs
}

#[derive(Debug)]
pub(crate) struct FinalityTracker {
    store: Arc<MessageStore>,
    fees: Arc<FeeLedger>,
    hub: Arc<dyn HubChain>,
    conf: RelayConf,
    outcomes: IntCounterVec,
    stuck: IntGaugeVec,
}

impl FinalityTracker {
    pub(crate) fn new(
        store: Arc<MessageStore>,
        fees: Arc<FeeLedger>,
        hub: Arc<dyn HubChain>,
        conf: RelayConf,
        outcomes: IntCounterVec,
        stuck: IntGaugeVec,
    ) -> Self {
        Self {
            store,
            fees,
            hub,
            conf,
            outcomes,
            stuck,
        }
    }

    /// Execute a finalized bundle's members on the hub, in emission order.
    ///
    /// Already-executed members are skipped; a failure stops the pass so
    /// later members never execute ahead of an earlier one. Once every
    /// member has executed and its fee is settled, the member content is
    /// purged; the bundle record and results are kept for audit.
    async fn execute_bundle(&self, bundle: &Bundle, now: u64) -> Result<(), StoreError> {
        for &id in &bundle.message_ids {
            if self.store.db().result_by_id(id)?.is_some() {
                continue;
            }
            let message = self
                .store
                .message(id)?
                .ok_or(StoreError::UnknownMessage(id))?;
            if let Err(e) = self
                .hub
                .execute_message(id, message.receiver, &message.payload)
                .await
            {
                warn!(message = %id, bundle = ?bundle.id, error = %e, "message execution failed, will retry");
                return Ok(());
            }
            let result = match self.hub.execution_result(id).await {
                Ok(Some(result)) => result,
                Ok(None) => {
                    warn!(message = %id, "executed but no result recorded yet");
                    return Ok(());
                }
                Err(e) => {
                    warn!(message = %id, error = %e, "result read failed, will retry");
                    return Ok(());
                }
            };
            self.store.record_execution(ExecutionRecord {
                message_id: id,
                result,
                set_at: now,
            })?;
            self.outcomes.with_label_values(&["executed"]).inc();
            info!(message = %id, result = ?result, "executed message on hub");
        }

        let all_executed = bundle
            .message_ids
            .iter()
            .map(|&id| self.store.db().result_by_id(id))
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .all(|r| r.is_some());
        if all_executed && !self.fees.has_unsettled(bundle.origin, &bundle.message_ids).unwrap_or(true) {
            self.store.purge_executed_messages(bundle)?;
        }
        Ok(())
    }

    async fn sweep_bundle(&self, bundle: Bundle, now: u64) -> Result<(), StoreError> {
        let handle = match self.store.db().submission_by_bundle(bundle.id)? {
            Some(handle) => handle,
            None => {
                warn!(bundle = ?bundle.id, state = %bundle.state, "bundle has no submission record");
                return Ok(());
            }
        };

        let confirmations = match self.hub.confirmations(handle.txid).await {
            Ok(c) => c,
            Err(e) => {
                warn!(bundle = ?bundle.id, error = %e, "confirmation read failed");
                return Ok(());
            }
        };
        let reverted = match self.hub.revert_signal(bundle.id).await {
            Ok(r) => r,
            Err(e) => {
                warn!(bundle = ?bundle.id, error = %e, "revert signal read failed");
                return Ok(());
            }
        };

        match decide(
            bundle.state,
            handle.submitted_at,
            confirmations,
            reverted,
            now,
            &self.conf,
        ) {
            Action::Wait => {
                if bundle.state == BundleState::Finalizing
                    && is_stuck(handle.submitted_at, now, &self.conf)
                {
                    error!(
                        bundle = ?bundle.id,
                        submitted_at = handle.submitted_at,
                        "bundle stuck finalizing well past the challenge window; operator attention required"
                    );
                    self.stuck
                        .with_label_values(&[&bundle.origin.to_string()])
                        .inc();
                }
            }
            Action::BeginFinalizing => {
                let bundle = self
                    .store
                    .transition_bundle(bundle.id, BundleState::Finalizing)?;
                self.store
                    .set_bundle_statuses(&bundle, MessageStatus::Confirmed)?;
                info!(bundle = ?bundle.id, confirmations, "bundle confirmed, challenge window running");
            }
            Action::Finalize => {
                let bundle = self
                    .store
                    .transition_bundle(bundle.id, BundleState::Finalized)?;
                self.outcomes.with_label_values(&["finalized"]).inc();
                info!(bundle = ?bundle.id, "challenge window closed, bundle finalized");
                self.execute_bundle(&bundle, now).await?;
            }
            Action::Revert => {
                let bundle = self
                    .store
                    .transition_bundle(bundle.id, BundleState::Reverted)?;
                // members stay owing their fees; they will be re-bundled
                // and delivered under a fresh bundle identity
                self.store.return_to_pending(&bundle)?;
                self.outcomes.with_label_values(&["reverted"]).inc();
                error!(bundle = ?bundle.id, "revert signal observed, bundle unwound");
            }
            Action::Expire => {
                // only raise the alarm once
                let Some(&first) = bundle.message_ids.first() else {
                    warn!(bundle = ?bundle.id, "bundle record has no members, skipping");
                    return Ok(());
                };
                if self.store.status(first)? != Some(MessageStatus::Expired) {
                    self.store
                        .set_bundle_statuses(&bundle, MessageStatus::Expired)?;
                    // these messages will never deliver; their pooled fees
                    // come back out
                    if let Err(e) = self.fees.reverse_fees(bundle.origin, &bundle.message_ids) {
                        warn!(bundle = ?bundle.id, error = %e, "fee reversal failed");
                    }
                    self.outcomes.with_label_values(&["expired"]).inc();
                    error!(
                        bundle = ?bundle.id,
                        submitted_at = handle.submitted_at,
                        "challenge window elapsed without confirmation, messages expired"
                    );
                }
            }
        }
        Ok(())
    }

    /// One pass over every live bundle.
    pub(crate) async fn sweep(&self, now: u64) -> Result<(), StoreError> {
        for bundle in self.store.bundles() {
            match bundle.state {
                BundleState::Submitted | BundleState::Finalizing => {
                    self.sweep_bundle(bundle, now).await?;
                }
                BundleState::Finalized => {
                    self.execute_bundle(&bundle, now).await?;
                }
                BundleState::Open | BundleState::Sealed | BundleState::Reverted => {}
            }
        }
        Ok(())
    }

    pub(crate) fn spawn(self: Arc<Self>) -> Instrumented<tokio::task::JoinHandle<color_eyre::Result<()>>> {
        let span = info_span!("FinalityTracker");
        let interval = self.conf.interval();
        tokio::spawn(async move {
            loop {
                self.sweep(unix_now()).await?;
                tokio::time::sleep(interval).await;
            }
        })
        .instrument(span)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mocks::MockHub;
    use crate::store::test::{message, sealed_bundle, test_db};
    use courier_base::settings::FeeConf;
    use courier_core::{ExecutionStatus, Message, SubmissionHandle};
    use primitive_types::H256;
    use prometheus::Opts;

    const WINDOW: u64 = 604_800;
    const T0: u64 = 1_700_000_000;

    fn conf() -> RelayConf {
        RelayConf {
            confirmations: 6,
            challenge_window_secs: WINDOW,
            max_submit_attempts: 3,
            interval_secs: 1,
            stuck_window_multiple: 3,
            ingest_batch: 100,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MessageStore>,
        fees: Arc<FeeLedger>,
        hub: Arc<MockHub>,
        tracker: FinalityTracker,
    }

    fn fixture() -> Fixture {
        let (dir, db) = test_db();
        let store = Arc::new(MessageStore::new(db.clone(), 8).unwrap());
        let fees = Arc::new(
            FeeLedger::new(
                db,
                FeeConf {
                    message_fee: 100,
                    min_public_goods_bps: 500,
                    full_pool_size: 1_000_000,
                    treasury: H256::repeat_byte(1),
                    public_goods: H256::repeat_byte(2),
                },
            )
            .unwrap(),
        );
        let hub = Arc::new(MockHub::default());
        let outcomes =
            IntCounterVec::new(Opts::new("outcomes", "test"), &["outcome"]).unwrap();
        let stuck = IntGaugeVec::new(Opts::new("stuck", "test"), &["origin"]).unwrap();
        let tracker = FinalityTracker::new(
            store.clone(),
            fees.clone(),
            hub.clone(),
            conf(),
            outcomes,
            stuck,
        );
        Fixture {
            _dir: dir,
            store,
            fees,
            hub,
            tracker,
        }
    }

    /// Enqueue, seal, and mark a bundle submitted at `T0`.
    fn submitted_bundle(f: &Fixture, messages: &[Message]) -> courier_core::Bundle {
        for m in messages {
            f.store.enqueue(m.clone()).unwrap();
            f.fees.record_fee(m).unwrap();
        }
        let bundle = sealed_bundle(&f.store, messages);
        let bundle = f
            .store
            .transition_bundle(bundle.id, BundleState::Submitted)
            .unwrap();
        f.store
            .set_bundle_statuses(&bundle, MessageStatus::Submitted)
            .unwrap();
        f.store
            .db()
            .store_submission(&SubmissionHandle {
                bundle_id: bundle.id,
                txid: MockHub::txid_for(bundle.id),
                submitted_at: T0,
            })
            .unwrap();
        bundle
    }

    #[test]
    fn decisions() {
        let conf = conf();
        use BundleState::*;

        // not enough confirmations, window still open
        assert_eq!(decide(Submitted, T0, 3, false, T0 + 60, &conf), Action::Wait);
        // threshold reached
        assert_eq!(
            decide(Submitted, T0, 6, false, T0 + 60, &conf),
            Action::BeginFinalizing
        );
        // revert beats everything before finality
        assert_eq!(decide(Submitted, T0, 9, true, T0 + 60, &conf), Action::Revert);
        assert_eq!(
            decide(Finalizing, T0, 9, true, T0 + WINDOW - 1, &conf),
            Action::Revert
        );
        // the window closes cleanly
        assert_eq!(
            decide(Finalizing, T0, 9, false, T0 + WINDOW - 1, &conf),
            Action::Wait
        );
        assert_eq!(
            decide(Finalizing, T0, 9, false, T0 + WINDOW, &conf),
            Action::Finalize
        );
        // never confirmed: expire at the window, not before
        assert_eq!(decide(Submitted, T0, 0, false, T0 + WINDOW - 1, &conf), Action::Wait);
        assert_eq!(decide(Submitted, T0, 0, false, T0 + WINDOW, &conf), Action::Expire);
        // terminal states never act
        assert_eq!(decide(Finalized, T0, 0, true, T0 + WINDOW, &conf), Action::Wait);
    }

    #[tokio::test]
    async fn confirms_then_finalizes_and_executes_in_order() {
        let f = fixture();
        let messages = vec![message(10, 0, 1), message(10, 1, 1), message(10, 2, 1)];
        let bundle = submitted_bundle(&f, &messages);

        // below threshold: nothing happens
        f.hub.set_confirmations(MockHub::txid_for(bundle.id), 5);
        f.tracker.sweep(T0 + 60).await.unwrap();
        assert_eq!(
            f.store.bundle(bundle.id).unwrap().unwrap().state,
            BundleState::Submitted
        );

        // threshold reached: members confirmed, window keeps running
        f.hub.set_confirmations(MockHub::txid_for(bundle.id), 6);
        f.tracker.sweep(T0 + 120).await.unwrap();
        assert_eq!(
            f.store.bundle(bundle.id).unwrap().unwrap().state,
            BundleState::Finalizing
        );
        assert_eq!(
            f.store.status(messages[0].id()).unwrap(),
            Some(MessageStatus::Confirmed)
        );

        // one second short of the window: still waiting
        f.tracker.sweep(T0 + WINDOW - 1).await.unwrap();
        assert_eq!(
            f.store.bundle(bundle.id).unwrap().unwrap().state,
            BundleState::Finalizing
        );

        // window closed: finalized and executed in emission order
        f.tracker.sweep(T0 + WINDOW).await.unwrap();
        assert_eq!(
            f.store.bundle(bundle.id).unwrap().unwrap().state,
            BundleState::Finalized
        );
        assert_eq!(
            f.hub.executed(),
            messages.iter().map(|m| m.id()).collect::<Vec<_>>()
        );
        for m in &messages {
            assert_eq!(
                f.store.get_result(m.id()).unwrap(),
                ExecutionStatus::Executed(ExecutionRecord {
                    message_id: m.id(),
                    result: MockHub::result_for(m.id()),
                    set_at: T0 + WINDOW,
                })
            );
        }
    }

    #[tokio::test]
    async fn revert_unwinds_messages_and_keeps_fees_owed() {
        let f = fixture();
        let messages = vec![message(10, 0, 1), message(10, 1, 1)];
        let bundle = submitted_bundle(&f, &messages);
        assert_eq!(f.fees.pool_total(10).unwrap(), 200);

        f.hub.set_reverted(bundle.id);
        f.tracker.sweep(T0 + 60).await.unwrap();

        assert_eq!(
            f.store.bundle(bundle.id).unwrap().unwrap().state,
            BundleState::Reverted
        );
        // members are pending again, in order; they are still deliverable,
        // so their fees stay in the pool
        let pending: Vec<u64> = f
            .store
            .peek_pending((10, 1), 10)
            .unwrap()
            .iter()
            .map(|m| m.sequence)
            .collect();
        assert_eq!(pending, vec![0, 1]);
        assert_eq!(f.fees.pool_total(10).unwrap(), 200);
        assert!(f.hub.executed().is_empty());
    }

    #[tokio::test]
    async fn reverted_bundle_retries_under_a_fresh_identity() {
        let f = fixture();
        let messages = vec![message(10, 0, 1), message(10, 1, 1)];
        let bundle = submitted_bundle(&f, &messages);
        f.hub.set_reverted(bundle.id);
        f.tracker.sweep(T0 + 60).await.unwrap();

        // same content, distinct id: the challenge signal on the old id
        // cannot reach the retry
        let retry = sealed_bundle(&f.store, &messages);
        assert_eq!(retry.commitment, bundle.commitment);
        assert_ne!(retry.id, bundle.id);
        assert_eq!(
            f.store.bundle(bundle.id).unwrap().unwrap().state,
            BundleState::Reverted
        );

        let retry = f
            .store
            .transition_bundle(retry.id, BundleState::Submitted)
            .unwrap();
        f.store
            .set_bundle_statuses(&retry, MessageStatus::Submitted)
            .unwrap();
        f.store
            .db()
            .store_submission(&SubmissionHandle {
                bundle_id: retry.id,
                txid: MockHub::txid_for(retry.id),
                submitted_at: T0 + 120,
            })
            .unwrap();
        f.hub.set_confirmations(MockHub::txid_for(retry.id), 6);

        f.tracker.sweep(T0 + 180).await.unwrap();
        assert_eq!(
            f.store.bundle(retry.id).unwrap().unwrap().state,
            BundleState::Finalizing
        );
        f.tracker.sweep(T0 + 120 + WINDOW).await.unwrap();
        assert_eq!(
            f.store.bundle(retry.id).unwrap().unwrap().state,
            BundleState::Finalized
        );
        // delivered, and the fees are still there to settle
        assert_eq!(
            f.hub.executed(),
            messages.iter().map(|m| m.id()).collect::<Vec<_>>()
        );
        assert_eq!(f.fees.pool_total(10).unwrap(), 200);
    }

    #[tokio::test]
    async fn execution_failure_preserves_order() {
        let f = fixture();
        let messages = vec![message(10, 0, 1), message(10, 1, 1), message(10, 2, 1)];
        let bundle = submitted_bundle(&f, &messages);
        f.hub.set_confirmations(MockHub::txid_for(bundle.id), 6);
        f.hub.fail_execution(messages[1].id());

        f.tracker.sweep(T0 + 60).await.unwrap();
        f.tracker.sweep(T0 + WINDOW).await.unwrap();

        // execution stopped at the failing member; nothing ran past it
        assert_eq!(f.hub.executed(), vec![messages[0].id()]);

        // the next sweep picks up where it left off
        f.hub.clear_execution_failure(messages[1].id());
        f.tracker.sweep(T0 + WINDOW + 60).await.unwrap();
        assert_eq!(
            f.hub.executed(),
            messages.iter().map(|m| m.id()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn unconfirmed_bundle_expires_at_the_window() {
        let f = fixture();
        let messages = vec![message(10, 0, 1)];
        let bundle = submitted_bundle(&f, &messages);
        assert_eq!(f.fees.pool_total(10).unwrap(), 100);

        f.tracker.sweep(T0 + WINDOW).await.unwrap();
        assert_eq!(
            f.store.status(messages[0].id()).unwrap(),
            Some(MessageStatus::Expired)
        );
        // the message will never deliver: its pooled fee comes back out
        assert_eq!(f.fees.pool_total(10).unwrap(), 0);
        // the bundle record stays for audit
        assert_eq!(
            f.store.bundle(bundle.id).unwrap().unwrap().state,
            BundleState::Submitted
        );
        assert!(f.hub.executed().is_empty());
    }

    #[tokio::test]
    async fn a_memberless_bundle_record_does_not_poison_the_sweep() {
        let f = fixture();
        let bundle = Bundle {
            id: H256::repeat_byte(9),
            origin: 10,
            destination: 1,
            message_ids: vec![],
            commitment: H256::zero(),
            created_at: T0,
            state: BundleState::Submitted,
        };
        f.store.db().store_bundle(&bundle).unwrap();
        f.store
            .db()
            .store_submission(&SubmissionHandle {
                bundle_id: bundle.id,
                txid: MockHub::txid_for(bundle.id),
                submitted_at: T0,
            })
            .unwrap();

        // past the window the corrupt record is skipped, not a panic
        f.tracker.sweep(T0 + WINDOW).await.unwrap();
        assert_eq!(
            f.store.bundle(bundle.id).unwrap().unwrap().state,
            BundleState::Submitted
        );
    }

    #[tokio::test]
    async fn purges_content_only_after_fees_settle() {
        let f = fixture();
        let messages = vec![message(10, 0, 1)];
        let bundle = submitted_bundle(&f, &messages);
        f.hub.set_confirmations(MockHub::txid_for(bundle.id), 6);

        f.tracker.sweep(T0 + 60).await.unwrap();
        f.tracker.sweep(T0 + WINDOW).await.unwrap();

        // executed, but the fee pool has not settled: content survives
        assert!(f.store.message(messages[0].id()).unwrap().is_some());

        f.fees.settle(10).unwrap();
        f.tracker.sweep(T0 + WINDOW + 60).await.unwrap();
        assert!(f.store.message(messages[0].id()).unwrap().is_none());
        // the result is audit data and is kept
        assert!(matches!(
            f.store.get_result(messages[0].id()).unwrap(),
            ExecutionStatus::Executed(_)
        ));
    }
}
