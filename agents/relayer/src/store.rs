//! The message store: every observed message's content and status, the
//! bundle registry, and execution results, all backed by rocksdb.
//!
//! Content is immutable once enqueued; only status advances. Write paths
//! fail closed: a duplicate or an out-of-order transition is refused and
//! nothing is modified.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use primitive_types::H256;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use courier_core::{
    Bundle, BundleState, ChainId, CourierDB, ExecutionRecord, ExecutionStatus, Message, MessageId,
    MessageStatus, StateError, StoreError,
};

/// An (origin, destination) chain pair.
pub(crate) type Pair = (ChainId, ChainId);

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before unix epoch")
        .as_secs()
}

/// In-memory index of pending sequences, per pair. Rebuilt from the DB on
/// boot; the DB remains the source of truth.
#[derive(Debug, Default)]
struct PendingIndex {
    pairs: HashMap<Pair, BTreeSet<u64>>,
}

impl PendingIndex {
    fn insert(&mut self, pair: Pair, sequence: u64) {
        self.pairs.entry(pair).or_default().insert(sequence);
    }

    fn count(&self, pair: Pair) -> usize {
        self.pairs.get(&pair).map(BTreeSet::len).unwrap_or(0)
    }

    fn remove(&mut self, pair: Pair, sequence: u64) {
        if let Some(set) = self.pairs.get_mut(&pair) {
            set.remove(&sequence);
            if set.is_empty() {
                self.pairs.remove(&pair);
            }
        }
    }
}

/// Store of messages, bundles, and execution results.
#[derive(Debug)]
pub struct MessageStore {
    db: CourierDB,
    pending: Mutex<PendingIndex>,
    /// Signalled whenever a pair's pending count reaches `full_bundle`
    bundle_ready: Notify,
    full_bundle: usize,
}

type Result<T> = std::result::Result<T, StoreError>;

impl MessageStore {
    /// Open the store, rebuilding the pending index from the DB.
    /// `full_bundle` is the pending count at which a pair raises the
    /// bundle-ready signal.
    pub fn new(db: CourierDB, full_bundle: usize) -> Result<Self> {
        let mut index = PendingIndex::default();
        let mut recovered = 0usize;
        for message in db.messages() {
            let id = message.id();
            match db.status_by_id(id)? {
                Some(MessageStatus::Pending) => {
                    index.insert((message.origin, message.destination), message.sequence);
                    recovered += 1;
                }
                Some(_) => {}
                None => {
                    // content without status should be impossible; repair
                    warn!(message = %id, "message missing status record, resetting to pending");
                    db.store_status(id, MessageStatus::Pending)?;
                    index.insert((message.origin, message.destination), message.sequence);
                    recovered += 1;
                }
            }
        }
        if recovered > 0 {
            info!(recovered, "rebuilt pending index from db");
        }
        Ok(Self {
            db,
            pending: Mutex::new(index),
            bundle_ready: Notify::new(),
            full_bundle,
        })
    }

    /// Signalled when a pair accumulates a full bundle of pending messages,
    /// so the bundler can form it without waiting out its interval.
    pub fn bundle_ready(&self) -> &Notify {
        &self.bundle_ready
    }

    /// Admit a message. Duplicates (same origin and sequence) are refused
    /// without modifying the stored original.
    pub fn enqueue(&self, message: Message) -> Result<()> {
        let id = message.id();
        if self.db.message_by_id(id)?.is_some() {
            return Err(StoreError::DuplicateMessage(id));
        }
        self.db.store_message(&message, MessageStatus::Pending)?;
        let pair = (message.origin, message.destination);
        let full = {
            let mut index = self.pending.lock().expect("pending index lock poisoned");
            index.insert(pair, message.sequence);
            index.count(pair) >= self.full_bundle
        };
        if full {
            self.bundle_ready.notify_one();
        }
        debug!(message = %id, destination = message.destination, "enqueued message");
        Ok(())
    }

    /// Every pair that currently has pending messages.
    pub fn pairs_with_pending(&self) -> Vec<Pair> {
        self.pending
            .lock()
            .expect("pending index lock poisoned")
            .pairs
            .keys()
            .copied()
            .collect()
    }

    /// Up to `limit` pending messages for a pair, in emission order.
    pub fn peek_pending(&self, pair: Pair, limit: usize) -> Result<Vec<Message>> {
        let sequences: Vec<u64> = {
            let index = self.pending.lock().expect("pending index lock poisoned");
            match index.pairs.get(&pair) {
                Some(set) => set.iter().take(limit).copied().collect(),
                None => return Ok(vec![]),
            }
        };
        let mut messages = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            let id = MessageId {
                origin: pair.0,
                sequence,
            };
            messages.push(
                self.db
                    .message_by_id(id)?
                    .ok_or(StoreError::UnknownMessage(id))?,
            );
        }
        Ok(messages)
    }

    /// The `enqueued_at` of the oldest pending message for a pair.
    pub fn oldest_pending_enqueued_at(&self, pair: Pair) -> Result<Option<u64>> {
        let first = {
            let index = self.pending.lock().expect("pending index lock poisoned");
            index.pairs.get(&pair).and_then(|s| s.first().copied())
        };
        match first {
            Some(sequence) => {
                let id = MessageId {
                    origin: pair.0,
                    sequence,
                };
                Ok(Some(
                    self.db
                        .message_by_id(id)?
                        .ok_or(StoreError::UnknownMessage(id))?
                        .enqueued_at,
                ))
            }
            None => Ok(None),
        }
    }

    /// Freeze a bundle: verify every member is pending, persist the bundle
    /// as sealed, and mark members bundled. All-or-nothing.
    pub fn seal_bundle(&self, mut bundle: Bundle) -> Result<Bundle> {
        for &id in &bundle.message_ids {
            let actual = self.db.status_by_id(id)?.ok_or(StoreError::UnknownMessage(id))?;
            if actual != MessageStatus::Pending {
                return Err(StoreError::UnexpectedStatus {
                    id,
                    expected: MessageStatus::Pending,
                    actual,
                });
            }
        }
        if !bundle.state.can_transition(BundleState::Sealed) {
            return Err(StateError {
                bundle: bundle.id,
                from: bundle.state,
                to: BundleState::Sealed,
            }
            .into());
        }
        // a retry over reverted content must not share identity with its
        // predecessor: the hub's challenge signal sticks to the bundle id
        if let Some(&first) = bundle.message_ids.first() {
            let mut attempt = 0u32;
            while matches!(
                self.db.bundle_by_id(bundle.id)?,
                Some(prior) if prior.state == BundleState::Reverted
            ) {
                attempt += 1;
                bundle.id = Bundle::derive_id(
                    bundle.origin,
                    bundle.destination,
                    bundle.commitment,
                    first.sequence,
                    attempt,
                );
            }
        }
        bundle.state = BundleState::Sealed;
        self.db.store_bundle(&bundle)?;

        let mut index = self.pending.lock().expect("pending index lock poisoned");
        for &id in &bundle.message_ids {
            self.db.store_status(id, MessageStatus::Bundled)?;
            index.remove((bundle.origin, bundle.destination), id.sequence);
        }
        info!(
            bundle = ?bundle.id,
            messages = bundle.message_ids.len(),
            origin = bundle.origin,
            destination = bundle.destination,
            "sealed bundle"
        );
        Ok(bundle)
    }

    /// Advance a bundle to `next`, refusing transitions the state machine
    /// does not permit.
    pub fn transition_bundle(&self, bundle_id: H256, next: BundleState) -> Result<Bundle> {
        let mut bundle = self
            .db
            .bundle_by_id(bundle_id)?
            .ok_or(StoreError::UnknownBundle(bundle_id))?;
        if !bundle.state.can_transition(next) {
            return Err(StateError {
                bundle: bundle_id,
                from: bundle.state,
                to: next,
            }
            .into());
        }
        debug!(bundle = ?bundle_id, from = %bundle.state, to = %next, "bundle transition");
        bundle.state = next;
        self.db.store_bundle(&bundle)?;
        Ok(bundle)
    }

    /// Set the status of every member of a bundle.
    pub fn set_bundle_statuses(&self, bundle: &Bundle, status: MessageStatus) -> Result<()> {
        for &id in &bundle.message_ids {
            self.db.store_status(id, status)?;
        }
        Ok(())
    }

    /// Unwind a reverted bundle's members to pending so they can be
    /// re-bundled. Content is untouched; only status changes.
    pub fn return_to_pending(&self, bundle: &Bundle) -> Result<()> {
        let pair = (bundle.origin, bundle.destination);
        let full = {
            let mut index = self.pending.lock().expect("pending index lock poisoned");
            for &id in &bundle.message_ids {
                self.db.store_status(id, MessageStatus::Pending)?;
                index.insert(pair, id.sequence);
            }
            index.count(pair) >= self.full_bundle
        };
        if full {
            self.bundle_ready.notify_one();
        }
        info!(
            bundle = ?bundle.id,
            messages = bundle.message_ids.len(),
            "returned bundle members to pending"
        );
        Ok(())
    }

    /// Record a message's execution result and mark it executed.
    pub fn record_execution(&self, record: ExecutionRecord) -> Result<()> {
        let id = record.message_id;
        if self.db.message_by_id(id)?.is_none() {
            return Err(StoreError::UnknownMessage(id));
        }
        self.db.store_result(&record)?;
        Ok(self.db.store_status(id, MessageStatus::Executed)?)
    }

    /// The execution result of a message. Total: unknown and unexecuted
    /// messages report [`ExecutionStatus::NotYetExecuted`].
    pub fn get_result(&self, id: MessageId) -> Result<ExecutionStatus> {
        Ok(match self.db.result_by_id(id)? {
            Some(record) => ExecutionStatus::Executed(record),
            None => ExecutionStatus::NotYetExecuted,
        })
    }

    /// A message's content, if known.
    pub fn message(&self, id: MessageId) -> Result<Option<Message>> {
        Ok(self.db.message_by_id(id)?)
    }

    /// A message's status, if known.
    pub fn status(&self, id: MessageId) -> Result<Option<MessageStatus>> {
        Ok(self.db.status_by_id(id)?)
    }

    /// A bundle, if known.
    pub fn bundle(&self, id: H256) -> Result<Option<Bundle>> {
        Ok(self.db.bundle_by_id(id)?)
    }

    /// All known bundles.
    pub fn bundles(&self) -> Vec<Bundle> {
        self.db.bundles()
    }

    /// Drop the content and status records of a finalized bundle's members.
    /// The bundle record and execution results are kept for audit. Callers
    /// gate this on fee settlement for the affected messages.
    pub fn purge_executed_messages(&self, bundle: &Bundle) -> Result<()> {
        for &id in &bundle.message_ids {
            self.db.delete_message(id)?;
        }
        debug!(bundle = ?bundle.id, "purged executed message records");
        Ok(())
    }

    /// The backing DB handle.
    pub fn db(&self) -> &CourierDB {
        &self.db
    }
}
