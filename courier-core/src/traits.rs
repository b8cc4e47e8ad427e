use async_trait::async_trait;
use primitive_types::H256;

use crate::error::ChainResult;
use crate::types::{ChainId, MessageEvent, MessageId, TxOutcome};

/// Interface to a spoke chain's message-emission contract, treated as an
/// append-only event source.
///
/// Implementations must return events in sequence order. The relay tolerates
/// re-delivery (it deduplicates by sequence number) and gaps (it waits and
/// re-polls rather than skipping).
#[async_trait]
pub trait SpokeChain: Send + Sync + std::fmt::Debug {
    /// Return an identifier for the chain this feed reads from.
    fn chain(&self) -> ChainId;

    /// A human-readable name for logging.
    fn name(&self) -> &str;

    /// Fetch up to `limit` emission events starting at `from_sequence`,
    /// in sequence order.
    async fn fetch_events(
        &self,
        from_sequence: u64,
        limit: usize,
    ) -> ChainResult<Vec<MessageEvent>>;

    /// The highest emission sequence number the chain has assigned, if any.
    async fn latest_sequence(&self) -> ChainResult<Option<u64>>;
}

/// Interface to the hub chain: the commitment-recording entry point, the
/// per-message execution router, and the reads the finality tracker needs.
///
/// The executor contract is idempotent; re-executing an already-executed
/// message is safe and reports the recorded result.
#[async_trait]
pub trait HubChain: Send + Sync + std::fmt::Debug {
    /// Return an identifier for the hub chain.
    fn chain(&self) -> ChainId;

    /// A human-readable name for logging.
    fn name(&self) -> &str;

    /// Submit a bundle commitment transaction.
    ///
    /// A `Rejected` error is non-retriable (e.g. malformed commitment);
    /// all other errors are transient.
    async fn submit_bundle(
        &self,
        bundle_id: H256,
        commitment: H256,
        message_count: u32,
    ) -> ChainResult<TxOutcome>;

    /// Number of block confirmations the transaction has accumulated.
    /// Safe to call repeatedly; an unknown transaction reports zero.
    async fn confirmations(&self, txid: H256) -> ChainResult<u64>;

    /// Whether a challenge or fraud signal has been observed for the bundle.
    async fn revert_signal(&self, bundle_id: H256) -> ChainResult<bool>;

    /// Execute one message against its target receiver.
    async fn execute_message(
        &self,
        message_id: MessageId,
        receiver: H256,
        payload: &[u8],
    ) -> ChainResult<TxOutcome>;

    /// The result value the receiver recorded for the message, if any.
    async fn execution_result(&self, message_id: MessageId) -> ChainResult<Option<H256>>;
}
