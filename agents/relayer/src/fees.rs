//! The fee ledger: per-chain epoch pools of collected message fees, split
//! between the treasury and public goods at settlement.
//!
//! Fees accumulate in an unsettled pool per source chain. A pool settles
//! when an operator (or the relayer itself) asks for it, or immediately when
//! it reaches capacity. Settled amounts are final; only the fees of messages
//! that expire undelivered are reversed, and only while still in the pool.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use courier_base::settings::FeeConf;
use courier_core::{
    ChainId, CourierDB, Decode, DecodeError, Encode, FeeAccount, FeeError, Message, MessageId,
    SettlementRecord, BPS_DENOMINATOR,
};

static POOL: &str = "fee_pool_";

type Result<T> = std::result::Result<T, FeeError>;

/// Persisted unsettled-pool state for one chain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct PoolState {
    epoch: u64,
    pending: Vec<(MessageId, u128)>,
}

impl Encode for PoolState {
    fn write_to<W>(&self, writer: &mut W) -> std::io::Result<usize>
    where
        W: std::io::Write,
    {
        let mut written = self.epoch.write_to(writer)?;
        written += (self.pending.len() as u32).write_to(writer)?;
        for (id, amount) in &self.pending {
            written += id.write_to(writer)?;
            written += amount.write_to(writer)?;
        }
        Ok(written)
    }
}

impl Decode for PoolState {
    fn read_from<R>(reader: &mut R) -> std::result::Result<Self, DecodeError>
    where
        R: std::io::Read,
        Self: Sized,
    {
        let epoch = u64::read_from(reader)?;
        let count = u32::read_from(reader)?;
        let mut pending = Vec::with_capacity(count as usize);
        for _ in 0..count {
            pending.push((MessageId::read_from(reader)?, u128::read_from(reader)?));
        }
        Ok(Self { epoch, pending })
    }
}

#[derive(Debug, Default)]
struct ChainPool {
    epoch: u64,
    pending: HashMap<MessageId, u128>,
    account: FeeAccount,
}

impl ChainPool {
    fn total(&self) -> u128 {
        self.pending.values().sum()
    }
}

/// Ledger of collected fees, one pool per source chain.
#[derive(Debug)]
pub struct FeeLedger {
    db: CourierDB,
    conf: FeeConf,
    chains: Mutex<HashMap<ChainId, ChainPool>>,
}

impl FeeLedger {
    /// Open the ledger. Pool state and account balances are recovered from
    /// the DB lazily, per chain.
    pub fn new(db: CourierDB, conf: FeeConf) -> Result<Self> {
        if conf.min_public_goods_bps as u128 > BPS_DENOMINATOR {
            return Err(FeeError::InvalidBps(conf.min_public_goods_bps));
        }
        Ok(Self {
            db,
            conf,
            chains: Mutex::new(HashMap::new()),
        })
    }

    fn load_chain<'a>(
        &self,
        chains: &'a mut HashMap<ChainId, ChainPool>,
        chain: ChainId,
    ) -> Result<&'a mut ChainPool> {
        use std::collections::hash_map::Entry;
        match chains.entry(chain) {
            Entry::Occupied(o) => Ok(o.into_mut()),
            Entry::Vacant(v) => {
                let mut state: PoolState = self
                    .db
                    .retrieve_custom(POOL, chain.to_be_bytes())?
                    .unwrap_or_default();
                // a crash between recording a settlement and persisting the
                // advanced pool leaves the settled fees in the recovered
                // state; they must not be split again
                while self.db.settlement_by_epoch(chain, state.epoch)?.is_some() {
                    warn!(
                        chain,
                        epoch = state.epoch,
                        "recovered pool behind its settlement, starting the next epoch"
                    );
                    state.pending.clear();
                    state.epoch += 1;
                    self.db.store_custom(POOL, chain.to_be_bytes(), &state)?;
                }
                let account = self
                    .db
                    .fee_account_by_chain(chain)?
                    .unwrap_or(FeeAccount {
                        chain,
                        ..Default::default()
                    });
                Ok(v.insert(ChainPool {
                    epoch: state.epoch,
                    pending: state.pending.into_iter().collect(),
                    account,
                }))
            }
        }
    }

    fn persist_pool(&self, chain: ChainId, pool: &ChainPool) -> Result<()> {
        let state = PoolState {
            epoch: pool.epoch,
            pending: pool.pending.iter().map(|(k, v)| (*k, *v)).collect(),
        };
        self.db.store_custom(POOL, chain.to_be_bytes(), &state)?;
        Ok(())
    }

    /// Credit a message's fee to its origin pool. Forces a settlement when
    /// the pool reaches capacity, returning the resulting record.
    pub fn record_fee(&self, message: &Message) -> Result<Option<SettlementRecord>> {
        let id = message.id();
        let mut chains = self.chains.lock().expect("fee ledger lock poisoned");
        let pool = self.load_chain(&mut chains, message.origin)?;

        if pool.pending.contains_key(&id) {
            return Err(FeeError::DuplicateFee(id));
        }
        pool.pending.insert(id, message.fee);
        debug!(message = %id, fee = message.fee, pool = pool.total(), "recorded fee");

        if pool.total() >= self.conf.full_pool_size {
            info!(chain = message.origin, pool = pool.total(), "fee pool full, forcing settlement");
            let record = self.settle_locked(message.origin, pool)?;
            return Ok(Some(record));
        }
        self.persist_pool(message.origin, pool)?;
        Ok(None)
    }

    /// Settle a chain's pool: split the unsettled balance between public
    /// goods and the treasury, then start a new epoch.
    pub fn settle(&self, chain: ChainId) -> Result<SettlementRecord> {
        let mut chains = self.chains.lock().expect("fee ledger lock poisoned");
        let pool = self.load_chain(&mut chains, chain)?;
        self.settle_locked(chain, pool)
    }

    /// Settlement body. The split guarantees that after every settlement the
    /// cumulative public goods balance is at least `min_public_goods_bps` of
    /// everything ever collected: the pool's proportional share, raised by
    /// whatever shortfall integer division left behind in earlier epochs.
    fn settle_locked(&self, chain: ChainId, pool: &mut ChainPool) -> Result<SettlementRecord> {
        // a crash between recording a settlement and advancing the epoch
        // must not apply the split twice; the pending fees were consumed by
        // the recorded settlement
        if let Some(existing) = self.db.settlement_by_epoch(chain, pool.epoch)? {
            pool.pending.clear();
            pool.epoch += 1;
            self.persist_pool(chain, pool)?;
            return Ok(existing);
        }

        let amount = pool.total();
        if amount == 0 {
            return Err(FeeError::InsufficientPool { chain });
        }

        let bps = self.conf.min_public_goods_bps as u128;
        let new_total = pool.account.total_collected + amount;
        let min_required = new_total * bps / BPS_DENOMINATOR;
        let proportional = amount * bps / BPS_DENOMINATOR;
        let shortfall = min_required.saturating_sub(pool.account.public_goods_balance);
        let public_goods = proportional.max(shortfall).min(amount);
        let treasury = amount - public_goods;

        let record = SettlementRecord {
            epoch: pool.epoch,
            public_goods,
            treasury,
        };
        self.db.store_settlement(chain, &record)?;

        pool.account.public_goods_balance += public_goods;
        pool.account.treasury_balance += treasury;
        pool.account.total_collected = new_total;
        self.db.store_fee_account(&pool.account)?;

        info!(
            chain,
            epoch = pool.epoch,
            amount,
            public_goods,
            treasury,
            "settled fee pool"
        );
        pool.pending.clear();
        pool.epoch += 1;
        self.persist_pool(chain, pool)?;
        Ok(record)
    }

    /// Remove still-unsettled fees for the given messages, after they
    /// expired undelivered. Fees already settled out of the pool stay where
    /// they went. Returns the amount reversed.
    pub fn reverse_fees(&self, chain: ChainId, ids: &[MessageId]) -> Result<u128> {
        let mut chains = self.chains.lock().expect("fee ledger lock poisoned");
        let pool = self.load_chain(&mut chains, chain)?;
        let mut reversed = 0u128;
        for id in ids {
            if let Some(amount) = pool.pending.remove(id) {
                reversed += amount;
            }
        }
        if reversed > 0 {
            self.persist_pool(chain, pool)?;
            info!(chain, reversed, "reversed unsettled fees");
        }
        Ok(reversed)
    }

    /// Whether any of the given messages still has an unsettled fee.
    pub fn has_unsettled(&self, chain: ChainId, ids: &[MessageId]) -> Result<bool> {
        let mut chains = self.chains.lock().expect("fee ledger lock poisoned");
        let pool = self.load_chain(&mut chains, chain)?;
        Ok(ids.iter().any(|id| pool.pending.contains_key(id)))
    }

    /// A chain's cumulative account balances.
    pub fn account(&self, chain: ChainId) -> Result<FeeAccount> {
        let mut chains = self.chains.lock().expect("fee ledger lock poisoned");
        Ok(self.load_chain(&mut chains, chain)?.account)
    }

    /// A chain's current unsettled pool balance.
    pub fn pool_total(&self, chain: ChainId) -> Result<u128> {
        let mut chains = self.chains.lock().expect("fee ledger lock poisoned");
        Ok(self.load_chain(&mut chains, chain)?.total())
    }
}
