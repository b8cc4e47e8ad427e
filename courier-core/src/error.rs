use primitive_types::H256;

use crate::db::DbError;
use crate::types::{BundleState, ChainId, MessageId};

/// The result of interacting with a chain.
pub type ChainResult<T> = Result<T, ChainCommunicationError>;

/// Errors returned when attempting to call a chain or dispatch a
/// transaction.
///
/// Every variant except [`ChainCommunicationError::Rejected`] is transient
/// and eligible for bounded retry.
#[derive(Debug, thiserror::Error)]
pub enum ChainCommunicationError {
    /// RPC or network failure
    #[error("rpc error: {0}")]
    Rpc(String),
    /// A transaction was dropped from the mempool
    #[error("transaction dropped from mempool {0:?}")]
    TransactionDropped(H256),
    /// A transaction submission timed out
    #[error("transaction submission timed out")]
    TransactionTimeout,
    /// The chain rejected the call outright (e.g. malformed commitment).
    /// Not retriable.
    #[error("rejected by chain: {0}")]
    Rejected(String),
    /// DB error during a chain interaction
    #[error(transparent)]
    Db(#[from] DbError),
    /// Any other error
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ChainCommunicationError {
    /// Whether retrying the operation could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, ChainCommunicationError::Rejected(_))
    }
}

/// Errors raised by the message store's write paths.
///
/// Write paths fail closed: ambiguity about whether an operation already
/// happened resolves to rejecting the duplicate, never double-applying it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A message with this id is already present for its source chain
    #[error("duplicate message {0}")]
    DuplicateMessage(MessageId),
    /// A transition was requested for a message not in the required status
    #[error("message {id} is {actual}, expected {expected}")]
    UnexpectedStatus {
        /// The message
        id: MessageId,
        /// Status required by the operation
        expected: crate::types::MessageStatus,
        /// Status actually recorded
        actual: crate::types::MessageStatus,
    },
    /// The message is not known to the store
    #[error("unknown message {0}")]
    UnknownMessage(MessageId),
    /// The bundle is not known to the store
    #[error("unknown bundle {0:?}")]
    UnknownBundle(H256),
    /// Invariant-violating bundle transition
    #[error(transparent)]
    State(#[from] StateError),
    /// DB error
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Errors raised by the fee ledger.
#[derive(Debug, thiserror::Error)]
pub enum FeeError {
    /// `settle` was called with nothing in the pool
    #[error("fee pool for chain {chain} is empty")]
    InsufficientPool {
        /// Chain whose pool was empty
        chain: ChainId,
    },
    /// A fee was recorded twice for the same message
    #[error("fee already recorded for message {0}")]
    DuplicateFee(MessageId),
    /// The configured bps is outside 0..=10000
    #[error("invalid public goods bps {0}")]
    InvalidBps(u32),
    /// DB error
    #[error(transparent)]
    Db(#[from] DbError),
}

/// A bundle state transition attempted out of order.
///
/// Treated as a programming-invariant violation: logged and refused, never
/// silently corrected.
#[derive(Debug, thiserror::Error)]
#[error("invalid bundle transition {from} -> {to} for bundle {bundle:?}")]
pub struct StateError {
    /// The bundle whose transition was refused
    pub bundle: H256,
    /// State the bundle was in
    pub from: BundleState,
    /// State the caller requested
    pub to: BundleState,
}

/// Terminal outcomes of driving a bundle submission.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The hub rejected the submission; retrying cannot help
    #[error("submission rejected: {0}")]
    Rejected(String),
    /// Transient retries were exhausted
    #[error("submission timed out after {attempts} attempts")]
    TimedOut {
        /// Number of attempts made
        attempts: u32,
    },
    /// Store bookkeeping failed mid-submission
    #[error(transparent)]
    Store(#[from] StoreError),
}
