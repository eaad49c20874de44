//! Ledger store seam.
//!
//! The engine never owns durable state; it reads and writes through this
//! trait. Three concurrent actors (tick worker, event listener,
//! reconciliation auditor) share it, so every mutation of
//! `withdrawn_amount` goes through compare-and-set.

use thiserror::Error;

use crate::core::{
    Address, Amount, Balance, BlockNumber, EventKey, LedgerEntry, Stream, StreamId, TokenId,
};
use crate::error::{Effect, Transience};

pub mod memory;

pub use memory::MemoryStore;

pub trait LedgerStore: Send + Sync {
    // -- streams ------------------------------------------------------------

    fn insert_stream(&self, stream: Stream) -> Result<(), StoreError>;

    fn stream(&self, id: &StreamId) -> Result<Stream, StoreError>;

    /// Full-record write used for status/metadata transitions. Not for
    /// `withdrawn_amount` increments - those race and must CAS.
    fn update_stream(&self, stream: Stream) -> Result<(), StoreError>;

    /// Lookup by the contract's numeric id (set once escrow confirms).
    fn stream_by_onchain(&self, onchain_id: u64) -> Result<Option<Stream>, StoreError>;

    /// ACTIVE, escrow-confirmed streams - the tick worker's working set.
    fn active_streams(&self) -> Result<Vec<Stream>, StoreError>;

    /// Every stream paying this recipient, any status. Terminal streams
    /// stay in this set so balance projections never shrink.
    fn streams_for(&self, recipient: &Address) -> Result<Vec<Stream>, StoreError>;

    /// PENDING stream created by the off-chain API matching an on-chain
    /// creation event.
    fn find_pending_match(
        &self,
        payer: &Address,
        recipient: &Address,
        token: &TokenId,
        total_amount: Amount,
    ) -> Result<Option<Stream>, StoreError>;

    // -- withdrawn amount (atomic) ------------------------------------------

    /// Increment `withdrawn_amount` by `delta` iff the stored value still
    /// equals `expected_prior`. Returns the new value. A lost update
    /// between a live Withdraw event and a stale reconciliation correction
    /// is prevented here, not by caller discipline.
    fn add_withdrawn(
        &self,
        id: &StreamId,
        delta: Amount,
        expected_prior: Amount,
    ) -> Result<Amount, StoreError>;

    /// Reconciliation overwrite: set `withdrawn_amount` to the on-chain
    /// value. Returns the previous value.
    fn set_withdrawn(&self, id: &StreamId, value: Amount) -> Result<Amount, StoreError>;

    // -- ledger entries and balances ----------------------------------------

    fn append_entry(&self, entry: LedgerEntry) -> Result<(), StoreError>;

    fn entries_for(&self, address: &Address) -> Result<Vec<LedgerEntry>, StoreError>;

    fn upsert_balance(&self, recipient: &Address, balance: Balance) -> Result<(), StoreError>;

    fn balance(&self, recipient: &Address) -> Result<Option<Balance>, StoreError>;

    // -- event journal and sync cursor --------------------------------------

    /// Record an applied event key. Returns false when the key was already
    /// present (the event is a duplicate and must be a no-op upstream).
    fn record_event(&self, key: EventKey) -> Result<bool, StoreError>;

    fn event_applied(&self, key: &EventKey) -> Result<bool, StoreError>;

    fn sync_cursor(&self) -> Result<BlockNumber, StoreError>;

    /// Monotone: a value at or below the current cursor is a no-op.
    fn set_sync_cursor(&self, block: BlockNumber) -> Result<(), StoreError>;
}

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum StoreError {
    #[error("stream {id} not found")]
    NotFound { id: String },

    #[error("withdrawn CAS failed for {id}: expected {expected}, found {actual}")]
    CasConflict {
        id: String,
        expected: Amount,
        actual: Amount,
    },

    #[error("withdrawn_amount would exceed total_amount for {id}")]
    ExceedsTotal { id: String },

    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            // CAS conflicts succeed on re-read; contention, not corruption.
            StoreError::CasConflict { .. } => Transience::Retryable,
            StoreError::NotFound { .. } | StoreError::ExceedsTotal { .. } => Transience::Permanent,
            StoreError::Poisoned => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            StoreError::Poisoned => Effect::Unknown,
            _ => Effect::None,
        }
    }
}
