//! Spoke ingestion: polls each spoke chain's emission feed, admits new
//! messages, and records their fees.
//!
//! Ingestion is cursor-driven and strictly ordered. Re-delivered events are
//! skipped; a gap in the sequence stops the pass so the feed can be
//! re-polled rather than admitting messages out of order.

use std::sync::Arc;

use prometheus::{IntCounterVec, IntGaugeVec};
use tracing::{debug, info_span, instrument::Instrumented, warn, Instrument};

use courier_base::settings::{FeeConf, RelayConf};
use courier_core::{FeeError, Message, SpokeChain, StoreError};

use crate::fees::FeeLedger;
use crate::store::{unix_now, MessageStore};

#[derive(Debug)]
pub(crate) struct Ingestor {
    store: Arc<MessageStore>,
    fees: Arc<FeeLedger>,
    spoke: Arc<dyn SpokeChain>,
    conf: RelayConf,
    fee_conf: FeeConf,
    messages: IntCounterVec,
    latest_sequence: IntGaugeVec,
}

impl Ingestor {
    pub(crate) fn new(
        store: Arc<MessageStore>,
        fees: Arc<FeeLedger>,
        spoke: Arc<dyn SpokeChain>,
        conf: RelayConf,
        fee_conf: FeeConf,
        messages: IntCounterVec,
        latest_sequence: IntGaugeVec,
    ) -> Self {
        Self {
            store,
            fees,
            spoke,
            conf,
            fee_conf,
            messages,
            latest_sequence,
        }
    }

    /// One ingestion pass. Returns the number of messages admitted.
    pub(crate) async fn tick(&self, now: u64) -> Result<usize, StoreError> {
        let chain = self.spoke.chain();
        let origin_label = chain.to_string();
        let mut next = match self.store.db().retrieve_cursor(chain)? {
            Some(acknowledged) => acknowledged + 1,
            None => 0,
        };

        let events = match self.spoke.fetch_events(next, self.conf.ingest_batch).await {
            Ok(events) => events,
            Err(e) => {
                warn!(chain, error = %e, "event fetch failed, will re-poll");
                return Ok(0);
            }
        };

        let mut admitted = 0usize;
        for event in events {
            if event.sequence < next {
                debug!(chain, sequence = event.sequence, "skipping re-delivered event");
                continue;
            }
            if event.sequence > next {
                warn!(
                    chain,
                    expected = next,
                    got = event.sequence,
                    "gap in emission sequence, waiting for the feed to fill it"
                );
                break;
            }

            let message = Message {
                origin: chain,
                sequence: event.sequence,
                destination: event.destination,
                sender: event.sender,
                receiver: event.receiver,
                payload: event.payload,
                // an emission without a fee pays the configured default
                fee: if event.fee == 0 {
                    self.fee_conf.message_fee
                } else {
                    event.fee
                },
                enqueued_at: now,
            };

            match self.store.enqueue(message.clone()) {
                Ok(()) => {
                    match self.fees.record_fee(&message) {
                        Ok(_) | Err(FeeError::DuplicateFee(_)) => {}
                        Err(e) => warn!(message = %message.id(), error = %e, "fee recording failed"),
                    }
                    self.messages
                        .with_label_values(&[&origin_label, "admitted", "relayer"])
                        .inc();
                    admitted += 1;
                }
                // a replay of something we already hold advances the cursor
                // without touching the stored original or its fee
                Err(StoreError::DuplicateMessage(id)) => {
                    debug!(message = %id, "event replayed an already-admitted message");
                }
                Err(e) => return Err(e),
            }

            next = event.sequence + 1;
            self.store.db().store_cursor(chain, event.sequence)?;
            self.latest_sequence
                .with_label_values(&["ingested", &origin_label, "relayer"])
                .set(event.sequence as i64);
        }
        Ok(admitted)
    }

    pub(crate) fn spawn(self: Arc<Self>) -> Instrumented<tokio::task::JoinHandle<color_eyre::Result<()>>> {
        let span = info_span!("Ingestor", chain = self.spoke.name());
        let interval = self.conf.interval();
        tokio::spawn(async move {
            loop {
                self.tick(unix_now()).await?;
                tokio::time::sleep(interval).await;
            }
        })
        .instrument(span)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mocks::MockSpoke;
    use crate::store::test::test_db;
    use courier_core::{ChainCommunicationError, MessageEvent};
    use primitive_types::H256;
    use prometheus::Opts;

    fn fee_conf() -> FeeConf {
        FeeConf {
            message_fee: 100,
            min_public_goods_bps: 500,
            full_pool_size: 1_000_000,
            treasury: H256::repeat_byte(1),
            public_goods: H256::repeat_byte(2),
        }
    }

    fn conf() -> RelayConf {
        RelayConf {
            confirmations: 6,
            challenge_window_secs: 604_800,
            max_submit_attempts: 3,
            interval_secs: 1,
            stuck_window_multiple: 3,
            ingest_batch: 100,
        }
    }

    fn event(sequence: u64, fee: u128) -> MessageEvent {
        MessageEvent {
            sequence,
            sender: H256::repeat_byte(0xaa),
            receiver: H256::repeat_byte(0xbb),
            destination: 1,
            payload: vec![sequence as u8],
            fee,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MessageStore>,
        fees: Arc<FeeLedger>,
        spoke: Arc<MockSpoke>,
        ingestor: Ingestor,
    }

    fn fixture() -> Fixture {
        let (dir, db) = test_db();
        let store = Arc::new(MessageStore::new(db.clone(), 8).unwrap());
        let fees = Arc::new(FeeLedger::new(db, fee_conf()).unwrap());
        let spoke = Arc::new(MockSpoke::new(10));
        let messages =
            IntCounterVec::new(Opts::new("messages", "test"), &["origin", "status", "agent"])
                .unwrap();
        let latest =
            IntGaugeVec::new(Opts::new("latest", "test"), &["phase", "origin", "agent"]).unwrap();
        let ingestor = Ingestor::new(
            store.clone(),
            fees.clone(),
            spoke.clone(),
            conf(),
            fee_conf(),
            messages,
            latest,
        );
        Fixture {
            _dir: dir,
            store,
            fees,
            spoke,
            ingestor,
        }
    }

    #[tokio::test]
    async fn admits_events_in_order_and_records_fees() {
        let f = fixture();
        f.spoke.emit(event(0, 250));
        f.spoke.emit(event(1, 0)); // no fee paid: the default applies
        f.spoke.emit(event(2, 300));

        assert_eq!(f.ingestor.tick(1_700_000_000).await.unwrap(), 3);

        let pending: Vec<(u64, u128)> = f
            .store
            .peek_pending((10, 1), 10)
            .unwrap()
            .iter()
            .map(|m| (m.sequence, m.fee))
            .collect();
        assert_eq!(pending, vec![(0, 250), (1, 100), (2, 300)]);
        assert_eq!(f.fees.pool_total(10).unwrap(), 650);
        assert_eq!(f.store.db().retrieve_cursor(10).unwrap(), Some(2));
    }

    #[tokio::test]
    async fn redelivery_is_harmless() {
        let f = fixture();
        f.spoke.emit(event(0, 250));
        f.spoke.emit(event(1, 250));
        f.ingestor.tick(1_700_000_000).await.unwrap();

        // the feed replays everything on the next poll
        assert_eq!(f.ingestor.tick(1_700_000_100).await.unwrap(), 0);
        assert_eq!(f.store.peek_pending((10, 1), 10).unwrap().len(), 2);
        assert_eq!(f.fees.pool_total(10).unwrap(), 500);
        assert_eq!(f.store.db().retrieve_cursor(10).unwrap(), Some(1));
    }

    #[tokio::test]
    async fn stops_at_a_sequence_gap() {
        let f = fixture();
        f.spoke.emit(event(0, 250));
        f.spoke.emit(event(1, 250));
        f.spoke.emit(event(5, 250));

        assert_eq!(f.ingestor.tick(1_700_000_000).await.unwrap(), 2);
        assert_eq!(f.store.db().retrieve_cursor(10).unwrap(), Some(1));

        // the feed fills the gap; ingestion resumes in order
        f.spoke.emit(event(2, 250));
        f.spoke.emit(event(3, 250));
        f.spoke.emit(event(4, 250));
        assert_eq!(f.ingestor.tick(1_700_000_100).await.unwrap(), 4);
        let sequences: Vec<u64> = f
            .store
            .peek_pending((10, 1), 10)
            .unwrap()
            .iter()
            .map(|m| m.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn a_failed_fetch_is_retried_next_pass() {
        let f = fixture();
        f.spoke.emit(event(0, 250));
        f.spoke
            .fail_fetches(vec![ChainCommunicationError::Rpc("down".into())]);

        assert_eq!(f.ingestor.tick(1_700_000_000).await.unwrap(), 0);
        assert_eq!(f.ingestor.tick(1_700_000_100).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replay_after_crash_neither_duplicates_message_nor_fee() {
        let f = fixture();
        // the message was admitted and its fee recorded, but the relayer
        // crashed before acknowledging the cursor
        let already = Message {
            origin: 10,
            sequence: 0,
            destination: 1,
            sender: H256::repeat_byte(0xaa),
            receiver: H256::repeat_byte(0xbb),
            payload: vec![0],
            fee: 250,
            enqueued_at: 1_699_999_000,
        };
        f.store.enqueue(already.clone()).unwrap();
        f.fees.record_fee(&already).unwrap();

        f.spoke.emit(event(0, 250));
        f.spoke.emit(event(1, 250));
        assert_eq!(f.ingestor.tick(1_700_000_000).await.unwrap(), 1);

        // the replayed event 0 advanced the cursor without double-charging
        assert_eq!(f.store.db().retrieve_cursor(10).unwrap(), Some(1));
        assert_eq!(f.store.peek_pending((10, 1), 10).unwrap().len(), 2);
        assert_eq!(f.fees.pool_total(10).unwrap(), 500);
        // the stored original is untouched
        assert_eq!(
            f.store.message(already.id()).unwrap().unwrap().enqueued_at,
            1_699_999_000
        );
    }
}
