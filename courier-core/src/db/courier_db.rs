use primitive_types::H256;
use tracing::debug;

use crate::db::{DbError, TypedDB, DB};
use crate::encode::{Decode, Encode};
use crate::types::{
    Bundle, ChainId, ExecutionRecord, FeeAccount, Message, MessageId, MessageStatus,
    SettlementRecord, SubmissionHandle,
};

static MESSAGE: &str = "message_";
static STATUS: &str = "status_";
static CURSOR: &str = "cursor_";
static BUNDLE: &str = "bundle_";
static SUBMISSION: &str = "submission_";
static RESULT: &str = "result_";
static FEE_ACCOUNT: &str = "fee_account_";
static SETTLEMENT: &str = "settlement_";

type Result<T> = std::result::Result<T, DbError>;

/// DB handle for storing relay data.
///
/// Message keys encode `origin || sequence` big-endian, so a prefix scan over
/// one origin yields messages in emission order.
#[derive(Debug, Clone)]
pub struct CourierDB(TypedDB);

impl CourierDB {
    /// Instantiate a new `CourierDB`
    pub fn new(entity: impl Into<String>, db: DB) -> Self {
        Self(TypedDB::new(entity.into(), db))
    }

    /// Store a message and initialize its status.
    ///
    /// Keys --> Values:
    /// - `message_<id>` --> message
    /// - `status_<id>` --> status
    pub fn store_message(&self, message: &Message, status: MessageStatus) -> Result<()> {
        let id = message.id();
        debug!(message = %id, %status, "storing message in db");
        self.0.store_keyed_encodable(MESSAGE, &id, message)?;
        self.store_status(id, status)
    }

    /// Retrieve a message by id
    pub fn message_by_id(&self, id: MessageId) -> Result<Option<Message>> {
        self.0.retrieve_keyed_decodable(MESSAGE, &id)
    }

    /// Update a message's recorded status
    pub fn store_status(&self, id: MessageId, status: MessageStatus) -> Result<()> {
        self.0.store_keyed_encodable(STATUS, &id, &status)
    }

    /// Retrieve a message's recorded status
    pub fn status_by_id(&self, id: MessageId) -> Result<Option<MessageStatus>> {
        self.0.retrieve_keyed_decodable(STATUS, &id)
    }

    /// Remove a message and its status, after it reached a terminal state
    pub fn delete_message(&self, id: MessageId) -> Result<()> {
        self.0.delete_keyed(MESSAGE, &id)?;
        self.0.delete_keyed(STATUS, &id)
    }

    /// All stored messages for an origin chain, in emission order
    pub fn messages_by_origin(&self, origin: ChainId) -> Vec<Message> {
        let mut prefix = MESSAGE.as_bytes().to_vec();
        prefix.extend(origin.to_be_bytes());
        self.0.prefix_iterator(prefix)
    }

    /// All stored messages, ordered by origin then emission sequence
    pub fn messages(&self) -> Vec<Message> {
        self.0.prefix_iterator(MESSAGE)
    }

    /// Store the acknowledged ingestion cursor for an origin chain
    pub fn store_cursor(&self, origin: ChainId, sequence: u64) -> Result<()> {
        self.0.store_keyed_encodable(CURSOR, &origin, &sequence)
    }

    /// Retrieve the acknowledged ingestion cursor for an origin chain
    pub fn retrieve_cursor(&self, origin: ChainId) -> Result<Option<u64>> {
        self.0.retrieve_keyed_decodable(CURSOR, &origin)
    }

    /// Store a bundle (including its current state)
    pub fn store_bundle(&self, bundle: &Bundle) -> Result<()> {
        debug!(bundle = ?bundle.id, state = %bundle.state, "storing bundle in db");
        self.0.store_keyed_encodable(BUNDLE, &bundle.id, bundle)
    }

    /// Retrieve a bundle by id
    pub fn bundle_by_id(&self, id: H256) -> Result<Option<Bundle>> {
        self.0.retrieve_keyed_decodable(BUNDLE, &id)
    }

    /// All stored bundles
    pub fn bundles(&self) -> Vec<Bundle> {
        self.0.prefix_iterator(BUNDLE)
    }

    /// Store the submission handle for a bundle
    pub fn store_submission(&self, handle: &SubmissionHandle) -> Result<()> {
        self.0
            .store_keyed_encodable(SUBMISSION, &handle.bundle_id, handle)
    }

    /// Retrieve the submission handle for a bundle
    pub fn submission_by_bundle(&self, bundle_id: H256) -> Result<Option<SubmissionHandle>> {
        self.0.retrieve_keyed_decodable(SUBMISSION, &bundle_id)
    }

    /// Store a message's execution result
    pub fn store_result(&self, record: &ExecutionRecord) -> Result<()> {
        self.0
            .store_keyed_encodable(RESULT, &record.message_id, record)
    }

    /// Retrieve a message's execution result
    pub fn result_by_id(&self, id: MessageId) -> Result<Option<ExecutionRecord>> {
        self.0.retrieve_keyed_decodable(RESULT, &id)
    }

    /// Store a chain's fee account balances
    pub fn store_fee_account(&self, account: &FeeAccount) -> Result<()> {
        self.0
            .store_keyed_encodable(FEE_ACCOUNT, &account.chain, account)
    }

    /// Retrieve a chain's fee account balances
    pub fn fee_account_by_chain(&self, chain: ChainId) -> Result<Option<FeeAccount>> {
        self.0.retrieve_keyed_decodable(FEE_ACCOUNT, &chain)
    }

    /// Store the settlement record for a chain's pool epoch
    pub fn store_settlement(&self, chain: ChainId, record: &SettlementRecord) -> Result<()> {
        let mut key = chain.to_vec();
        key.extend(record.epoch.to_vec());
        self.0.store_keyed_encodable(SETTLEMENT, &key, record)
    }

    /// Retrieve the settlement record for a chain's pool epoch
    pub fn settlement_by_epoch(
        &self,
        chain: ChainId,
        epoch: u64,
    ) -> Result<Option<SettlementRecord>> {
        let mut key = chain.to_vec();
        key.extend(epoch.to_vec());
        self.0.retrieve_keyed_decodable(SETTLEMENT, &key)
    }

    /// Store an agent-defined encodable value
    pub fn store_custom<V: Encode>(
        &self,
        prefix: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
        value: &V,
    ) -> Result<()> {
        self.0.store_encodable(prefix, key, value)
    }

    /// Retrieve an agent-defined decodable value
    pub fn retrieve_custom<V: Decode>(
        &self,
        prefix: impl AsRef<[u8]>,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<V>> {
        self.0.retrieve_decodable(prefix, key)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::BundleState;

    fn db() -> (tempfile::TempDir, CourierDB) {
        let dir = tempfile::tempdir().expect("!tempdir");
        let db = DB::from_path(&dir.path().join("db")).expect("!open");
        (dir, CourierDB::new("relayer", db))
    }

    #[test]
    fn message_storage_roundtrip() {
        let (_dir, db) = db();
        let message = Message {
            origin: 10,
            sequence: 3,
            destination: 1,
            sender: H256::repeat_byte(1),
            receiver: H256::repeat_byte(2),
            payload: vec![1, 2, 3],
            fee: 50,
            enqueued_at: 1_700_000_000,
        };
        db.store_message(&message, MessageStatus::Pending)
            .expect("!store");

        assert_eq!(db.message_by_id(message.id()).unwrap(), Some(message.clone()));
        assert_eq!(
            db.status_by_id(message.id()).unwrap(),
            Some(MessageStatus::Pending)
        );
        assert_eq!(db.message_by_id(MessageId { origin: 10, sequence: 4 }).unwrap(), None);
    }

    #[test]
    fn origin_scan_is_in_emission_order() {
        let (_dir, db) = db();
        for sequence in [5u64, 1, 3, 2, 4] {
            let message = Message {
                origin: 7,
                sequence,
                destination: 1,
                ..Default::default()
            };
            db.store_message(&message, MessageStatus::Pending).unwrap();
        }
        // another origin must not leak into the scan
        db.store_message(
            &Message {
                origin: 8,
                sequence: 9,
                ..Default::default()
            },
            MessageStatus::Pending,
        )
        .unwrap();

        let sequences: Vec<u64> = db
            .messages_by_origin(7)
            .into_iter()
            .map(|m| m.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn bundle_and_cursor_roundtrip() {
        let (_dir, db) = db();
        let bundle = Bundle {
            id: H256::repeat_byte(9),
            origin: 10,
            destination: 1,
            message_ids: vec![MessageId { origin: 10, sequence: 0 }],
            commitment: H256::repeat_byte(3),
            created_at: 100,
            state: BundleState::Sealed,
        };
        db.store_bundle(&bundle).unwrap();
        assert_eq!(db.bundle_by_id(bundle.id).unwrap(), Some(bundle.clone()));
        assert_eq!(db.bundles(), vec![bundle]);

        assert_eq!(db.retrieve_cursor(10).unwrap(), None);
        db.store_cursor(10, 42).unwrap();
        assert_eq!(db.retrieve_cursor(10).unwrap(), Some(42));
    }
}
