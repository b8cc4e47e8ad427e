//! Hand-rolled chain mocks with scriptable shared state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use primitive_types::H256;

use courier_core::{
    ChainCommunicationError, ChainId, ChainResult, HubChain, MessageEvent, MessageId, SpokeChain,
    TxOutcome,
};

#[derive(Debug, Default)]
struct HubState {
    submit_failures: VecDeque<ChainCommunicationError>,
    submitted: Vec<(H256, H256, u32)>,
    confirmations: HashMap<H256, u64>,
    reverted: HashSet<H256>,
    execution_failures: HashSet<MessageId>,
    executed: Vec<MessageId>,
    results: HashMap<MessageId, H256>,
}

/// A scriptable hub.
#[derive(Debug, Default)]
pub(crate) struct MockHub {
    state: Mutex<HubState>,
}

impl MockHub {
    fn lock(&self) -> std::sync::MutexGuard<'_, HubState> {
        self.state.lock().expect("mock hub lock poisoned")
    }

    /// Queue errors to return from `submit_bundle`, in order, before
    /// succeeding.
    pub(crate) fn fail_submissions(&self, errors: Vec<ChainCommunicationError>) {
        self.lock().submit_failures = errors.into();
    }

    pub(crate) fn submitted(&self) -> Vec<(H256, H256, u32)> {
        self.lock().submitted.clone()
    }

    pub(crate) fn set_confirmations(&self, txid: H256, confirmations: u64) {
        self.lock().confirmations.insert(txid, confirmations);
    }

    pub(crate) fn set_reverted(&self, bundle_id: H256) {
        self.lock().reverted.insert(bundle_id);
    }

    /// Make `execute_message` fail for this message until cleared.
    pub(crate) fn fail_execution(&self, id: MessageId) {
        self.lock().execution_failures.insert(id);
    }

    pub(crate) fn clear_execution_failure(&self, id: MessageId) {
        self.lock().execution_failures.remove(&id);
    }

    pub(crate) fn executed(&self) -> Vec<MessageId> {
        self.lock().executed.clone()
    }

    /// The txid the mock assigns to a bundle's submission.
    pub(crate) fn txid_for(bundle_id: H256) -> H256 {
        let mut txid = bundle_id;
        txid.0[0] ^= 0xff;
        txid
    }

    /// The result the mock records for an executed message.
    pub(crate) fn result_for(id: MessageId) -> H256 {
        let mut result = H256::zero();
        result.0[..4].copy_from_slice(&id.origin.to_be_bytes());
        result.0[4..12].copy_from_slice(&id.sequence.to_be_bytes());
        result
    }
}

#[async_trait]
impl HubChain for MockHub {
    fn chain(&self) -> ChainId {
        1
    }

    fn name(&self) -> &str {
        "mock-hub"
    }

    async fn submit_bundle(
        &self,
        bundle_id: H256,
        commitment: H256,
        message_count: u32,
    ) -> ChainResult<TxOutcome> {
        let mut state = self.lock();
        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        state.submitted.push((bundle_id, commitment, message_count));
        Ok(TxOutcome {
            txid: Self::txid_for(bundle_id),
            executed: true,
        })
    }

    async fn confirmations(&self, txid: H256) -> ChainResult<u64> {
        Ok(self.lock().confirmations.get(&txid).copied().unwrap_or(0))
    }

    async fn revert_signal(&self, bundle_id: H256) -> ChainResult<bool> {
        Ok(self.lock().reverted.contains(&bundle_id))
    }

    async fn execute_message(
        &self,
        message_id: MessageId,
        _receiver: H256,
        _payload: &[u8],
    ) -> ChainResult<TxOutcome> {
        let mut state = self.lock();
        if state.execution_failures.contains(&message_id) {
            return Err(ChainCommunicationError::Rpc("execution unavailable".into()));
        }
        state.executed.push(message_id);
        let result = Self::result_for(message_id);
        state.results.insert(message_id, result);
        Ok(TxOutcome {
            txid: result,
            executed: true,
        })
    }

    async fn execution_result(&self, message_id: MessageId) -> ChainResult<Option<H256>> {
        Ok(self.lock().results.get(&message_id).copied())
    }
}

#[derive(Debug, Default)]
struct SpokeState {
    events: Vec<MessageEvent>,
    fetch_failures: VecDeque<ChainCommunicationError>,
}

/// A scriptable spoke event feed.
#[derive(Debug)]
pub(crate) struct MockSpoke {
    chain: ChainId,
    state: Mutex<SpokeState>,
}

impl MockSpoke {
    pub(crate) fn new(chain: ChainId) -> Self {
        Self {
            chain,
            state: Mutex::new(SpokeState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SpokeState> {
        self.state.lock().expect("mock spoke lock poisoned")
    }

    /// Append an emission event to the feed.
    pub(crate) fn emit(&self, event: MessageEvent) {
        self.lock().events.push(event);
    }

    pub(crate) fn fail_fetches(&self, errors: Vec<ChainCommunicationError>) {
        self.lock().fetch_failures = errors.into();
    }
}

#[async_trait]
impl SpokeChain for MockSpoke {
    fn chain(&self) -> ChainId {
        self.chain
    }

    fn name(&self) -> &str {
        "mock-spoke"
    }

    async fn fetch_events(
        &self,
        from_sequence: u64,
        limit: usize,
    ) -> ChainResult<Vec<MessageEvent>> {
        let mut state = self.lock();
        if let Some(err) = state.fetch_failures.pop_front() {
            return Err(err);
        }
        let mut events: Vec<MessageEvent> = state
            .events
            .iter()
            .filter(|e| e.sequence >= from_sequence)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.sequence);
        events.truncate(limit);
        Ok(events)
    }

    async fn latest_sequence(&self) -> ChainResult<Option<u64>> {
        Ok(self.lock().events.iter().map(|e| e.sequence).max())
    }
}
