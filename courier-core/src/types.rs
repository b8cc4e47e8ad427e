use primitive_types::H256;
use serde::{Deserialize, Serialize};

use crate::commitment::hash;
use crate::Encode;

/// Identifier of a chain. Assigned out of band, unique across the deployment.
pub type ChainId = u32;

/// Unique message identifier: source chain plus the emission sequence number
/// assigned by the spoke contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId {
    /// Chain the message was emitted on
    pub origin: ChainId,
    /// Position in the origin chain's emission sequence
    pub sequence: u64,
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.origin, self.sequence)
    }
}

/// Lifecycle status of a message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum MessageStatus {
    /// Observed on the source chain, waiting to be bundled
    Pending,
    /// Included in exactly one bundle
    Bundled,
    /// Its bundle's commitment has been submitted to the hub
    Submitted,
    /// Its bundle has reached the confirmation threshold
    Confirmed,
    /// Executed against the target receiver on the hub
    Executed,
    /// The finality window elapsed without confirmation
    Expired,
}

impl MessageStatus {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            MessageStatus::Pending => 0,
            MessageStatus::Bundled => 1,
            MessageStatus::Submitted => 2,
            MessageStatus::Confirmed => 3,
            MessageStatus::Executed => 4,
            MessageStatus::Expired => 5,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => MessageStatus::Pending,
            1 => MessageStatus::Bundled,
            2 => MessageStatus::Submitted,
            3 => MessageStatus::Confirmed,
            4 => MessageStatus::Executed,
            5 => MessageStatus::Expired,
            _ => return None,
        })
    }
}

/// A full Courier message between chains.
///
/// The content fields are immutable once observed; status is tracked by the
/// message store, keyed by [`MessageId`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    /// Chain the message was emitted on
    pub origin: ChainId,
    /// Emission sequence number on the origin chain
    pub sequence: u64,
    /// Chain the message executes on
    pub destination: ChainId,
    /// Address of the emitting sender, origin-chain convention
    pub sender: H256,
    /// Address of the target receiver, destination-chain convention
    pub receiver: H256,
    /// Opaque message contents
    pub payload: Vec<u8>,
    /// Fee owed for relaying this message, in fee units
    pub fee: u128,
    /// Unix seconds at which the relay observed the message
    pub enqueued_at: u64,
}

impl Message {
    /// This message's identifier.
    pub fn id(&self) -> MessageId {
        MessageId {
            origin: self.origin,
            sequence: self.sequence,
        }
    }

    /// Convert the message to a commitment leaf.
    ///
    /// The leaf covers the content fields only, so recomputing it for the
    /// same observed message always yields the same value.
    pub fn to_leaf(&self) -> H256 {
        let mut buf = vec![];
        buf.extend_from_slice(&self.origin.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.destination.to_be_bytes());
        buf.extend_from_slice(self.sender.as_ref());
        buf.extend_from_slice(self.receiver.as_ref());
        buf.extend_from_slice(&self.fee.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        hash(&buf)
    }
}

/// State of a bundle's progress toward finality on the hub.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum BundleState {
    /// Being assembled by the bundler
    Open,
    /// Contents frozen, commitment computed
    Sealed,
    /// Commitment transaction accepted by the hub
    Submitted,
    /// Confirmation threshold reached, challenge window running
    Finalizing,
    /// Challenge window elapsed with no revert signal
    Finalized,
    /// Challenge or execution failure observed before finality
    Reverted,
}

impl BundleState {
    /// Whether the bundle state machine permits moving from `self` to `next`.
    ///
    /// Reverts are accepted any time before finality; everything else is the
    /// single forward path.
    pub fn can_transition(self, next: BundleState) -> bool {
        use BundleState::*;
        matches!(
            (self, next),
            (Open, Sealed)
                | (Sealed, Submitted)
                | (Submitted, Finalizing)
                | (Finalizing, Finalized)
                | (Submitted, Reverted)
                | (Finalizing, Reverted)
        )
    }

    /// Whether this state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, BundleState::Finalized | BundleState::Reverted)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            BundleState::Open => 0,
            BundleState::Sealed => 1,
            BundleState::Submitted => 2,
            BundleState::Finalizing => 3,
            BundleState::Finalized => 4,
            BundleState::Reverted => 5,
        }
    }

    pub(crate) fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => BundleState::Open,
            1 => BundleState::Sealed,
            2 => BundleState::Submitted,
            3 => BundleState::Finalizing,
            4 => BundleState::Finalized,
            5 => BundleState::Reverted,
            _ => return None,
        })
    }
}

/// An ordered batch of messages for one (origin, destination) pair.
///
/// `message_ids` preserves emission order; messages execute on the hub in
/// exactly this order. The commitment is a deterministic function of the
/// ordered leaf sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// Unique bundle identifier
    pub id: H256,
    /// Source chain of every member message
    pub origin: ChainId,
    /// Destination chain of every member message
    pub destination: ChainId,
    /// Member messages, in emission order
    pub message_ids: Vec<MessageId>,
    /// Merkle root over the ordered leaf sequence
    pub commitment: H256,
    /// Unix seconds at bundle formation
    pub created_at: u64,
    /// Current lifecycle state
    pub state: BundleState,
}

impl Bundle {
    /// Derive the bundle id from its identifying content.
    ///
    /// Covers the chain pair, the commitment, the first member sequence, and
    /// an attempt counter. Successive bundles on a pair get distinct ids
    /// from their content; a retry of reverted content gets a distinct id
    /// from its attempt, since hub-side challenge signals are keyed by
    /// bundle id and stick to it.
    pub fn derive_id(
        origin: ChainId,
        destination: ChainId,
        commitment: H256,
        first_sequence: u64,
        attempt: u32,
    ) -> H256 {
        let mut buf = vec![];
        buf.extend_from_slice(&origin.to_be_bytes());
        buf.extend_from_slice(&destination.to_be_bytes());
        buf.extend_from_slice(commitment.as_ref());
        buf.extend_from_slice(&first_sequence.to_be_bytes());
        buf.extend_from_slice(&attempt.to_be_bytes());
        hash(&buf)
    }
}

/// A message-emission event read from a spoke chain's event feed.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Emission sequence number
    pub sequence: u64,
    /// Emitting sender
    pub sender: H256,
    /// Target receiver on the destination chain
    pub receiver: H256,
    /// Destination chain
    pub destination: ChainId,
    /// Opaque message contents
    pub payload: Vec<u8>,
    /// Fee paid at emission; zero means the configured default applies
    pub fee: u128,
}

/// The outcome of a message execution on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// The executed message
    pub message_id: MessageId,
    /// Result value reported by the receiver
    pub result: H256,
    /// Unix seconds at which the result was recorded
    pub set_at: u64,
}

/// Result of querying a message's execution.
///
/// Reads are total: a message with no recorded result yields
/// [`ExecutionStatus::NotYetExecuted`], never an error. Callers must treat
/// that variant as "not yet executed", not as a valid outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// No result has been recorded for the message
    NotYetExecuted,
    /// The message executed and its receiver reported a result
    Executed(ExecutionRecord),
}

/// The result of a transaction submitted to a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutcome {
    /// The transaction id
    pub txid: H256,
    /// True if executed, false otherwise (reverted, dropped)
    pub executed: bool,
}

/// Handle to an in-flight or completed bundle submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionHandle {
    /// The submitted bundle
    pub bundle_id: H256,
    /// Transaction carrying the commitment
    pub txid: H256,
    /// Unix seconds at acceptance
    pub submitted_at: u64,
}

/// Per-chain fee accounting balances.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAccount {
    /// Chain the fees were collected on
    pub chain: ChainId,
    /// Cumulative amount credited to the treasury
    pub treasury_balance: u128,
    /// Cumulative amount credited to public goods
    pub public_goods_balance: u128,
    /// Total fees ever settled out of the pool
    pub total_collected: u128,
}

/// The split produced by one pool settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Pool epoch this settlement consumed
    pub epoch: u64,
    /// Amount credited to public goods
    pub public_goods: u128,
    /// Amount credited to the treasury
    pub treasury: u128,
}

impl Encode for Message {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        let mut written = 0;
        written += self.origin.write_to(writer)?;
        written += self.sequence.write_to(writer)?;
        written += self.destination.write_to(writer)?;
        written += self.sender.write_to(writer)?;
        written += self.receiver.write_to(writer)?;
        written += self.payload.write_to(writer)?;
        written += self.fee.write_to(writer)?;
        written += self.enqueued_at.write_to(writer)?;
        Ok(written)
    }
}

impl crate::Decode for Message {
    fn read_from<R>(reader: &mut R) -> Result<Self, crate::DecodeError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        Ok(Self {
            origin: ChainId::read_from(reader)?,
            sequence: u64::read_from(reader)?,
            destination: ChainId::read_from(reader)?,
            sender: H256::read_from(reader)?,
            receiver: H256::read_from(reader)?,
            payload: Vec::<u8>::read_from(reader)?,
            fee: u128::read_from(reader)?,
            enqueued_at: u64::read_from(reader)?,
        })
    }
}

impl Encode for MessageId {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        Ok(self.origin.write_to(writer)? + self.sequence.write_to(writer)?)
    }
}

impl crate::Decode for MessageId {
    fn read_from<R>(reader: &mut R) -> Result<Self, crate::DecodeError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        Ok(Self {
            origin: ChainId::read_from(reader)?,
            sequence: u64::read_from(reader)?,
        })
    }
}

impl Encode for MessageStatus {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        self.as_u8().write_to(writer)
    }
}

impl crate::Decode for MessageStatus {
    fn read_from<R>(reader: &mut R) -> Result<Self, crate::DecodeError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        let tag = u8::read_from(reader)?;
        MessageStatus::from_u8(tag)
            .ok_or_else(|| crate::DecodeError::Malformed(format!("message status tag {tag}")))
    }
}

impl Encode for BundleState {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        self.as_u8().write_to(writer)
    }
}

impl crate::Decode for BundleState {
    fn read_from<R>(reader: &mut R) -> Result<Self, crate::DecodeError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        let tag = u8::read_from(reader)?;
        BundleState::from_u8(tag)
            .ok_or_else(|| crate::DecodeError::Malformed(format!("bundle state tag {tag}")))
    }
}

impl Encode for Bundle {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        let mut written = 0;
        written += self.id.write_to(writer)?;
        written += self.origin.write_to(writer)?;
        written += self.destination.write_to(writer)?;
        written += (self.message_ids.len() as u32).write_to(writer)?;
        for id in &self.message_ids {
            written += id.write_to(writer)?;
        }
        written += self.commitment.write_to(writer)?;
        written += self.created_at.write_to(writer)?;
        written += self.state.write_to(writer)?;
        Ok(written)
    }
}

impl crate::Decode for Bundle {
    fn read_from<R>(reader: &mut R) -> Result<Self, crate::DecodeError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        let id = H256::read_from(reader)?;
        let origin = ChainId::read_from(reader)?;
        let destination = ChainId::read_from(reader)?;
        let count = u32::read_from(reader)?;
        let mut message_ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            message_ids.push(MessageId::read_from(reader)?);
        }
        Ok(Self {
            id,
            origin,
            destination,
            message_ids,
            commitment: H256::read_from(reader)?,
            created_at: u64::read_from(reader)?,
            state: BundleState::read_from(reader)?,
        })
    }
}

impl Encode for ExecutionRecord {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        Ok(self.message_id.write_to(writer)?
            + self.result.write_to(writer)?
            + self.set_at.write_to(writer)?)
    }
}

impl crate::Decode for ExecutionRecord {
    fn read_from<R>(reader: &mut R) -> Result<Self, crate::DecodeError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        Ok(Self {
            message_id: MessageId::read_from(reader)?,
            result: H256::read_from(reader)?,
            set_at: u64::read_from(reader)?,
        })
    }
}

impl Encode for SubmissionHandle {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        Ok(self.bundle_id.write_to(writer)?
            + self.txid.write_to(writer)?
            + self.submitted_at.write_to(writer)?)
    }
}

impl crate::Decode for SubmissionHandle {
    fn read_from<R>(reader: &mut R) -> Result<Self, crate::DecodeError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        Ok(Self {
            bundle_id: H256::read_from(reader)?,
            txid: H256::read_from(reader)?,
            submitted_at: u64::read_from(reader)?,
        })
    }
}

impl Encode for FeeAccount {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        Ok(self.chain.write_to(writer)?
            + self.treasury_balance.write_to(writer)?
            + self.public_goods_balance.write_to(writer)?
            + self.total_collected.write_to(writer)?)
    }
}

impl crate::Decode for FeeAccount {
    fn read_from<R>(reader: &mut R) -> Result<Self, crate::DecodeError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        Ok(Self {
            chain: ChainId::read_from(reader)?,
            treasury_balance: u128::read_from(reader)?,
            public_goods_balance: u128::read_from(reader)?,
            total_collected: u128::read_from(reader)?,
        })
    }
}

impl Encode for SettlementRecord {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        Ok(self.epoch.write_to(writer)?
            + self.public_goods.write_to(writer)?
            + self.treasury.write_to(writer)?)
    }
}

impl crate::Decode for SettlementRecord {
    fn read_from<R>(reader: &mut R) -> Result<Self, crate::DecodeError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        Ok(Self {
            epoch: u64::read_from(reader)?,
            public_goods: u128::read_from(reader)?,
            treasury: u128::read_from(reader)?,
        })
    }
}
