//! Append-only ledger entries and the per-recipient balance projection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{Address, Amount, StreamId, TxHash, UnixSeconds};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    StreamStart,
    StreamStop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Pending,
    Confirmed,
    Failed,
}

/// One row of the append-only transaction log.
///
/// Immutable once Confirmed or Failed; the store only ever appends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub stream_id: StreamId,
    pub kind: EntryKind,
    pub amount: Amount,
    pub status: EntryStatus,
    pub tx_hash: Option<TxHash>,
    pub from: Address,
    pub to: Address,
    pub created_at: UnixSeconds,
}

impl LedgerEntry {
    /// Confirmed entry backed by an on-chain transaction.
    pub fn confirmed(
        stream_id: StreamId,
        kind: EntryKind,
        amount: Amount,
        tx_hash: TxHash,
        from: Address,
        to: Address,
        created_at: UnixSeconds,
    ) -> Self {
        LedgerEntry {
            id: Uuid::new_v4(),
            stream_id,
            kind,
            amount,
            status: EntryStatus::Confirmed,
            tx_hash: Some(tx_hash),
            from,
            to,
            created_at,
        }
    }
}

/// Running projection of a recipient's position, recomputed by the tick
/// worker; never a source of truth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total_earned: Amount,
    pub total_withdrawn: Amount,
    pub available_balance: Amount,
}

impl Balance {
    pub fn new(total_earned: Amount, total_withdrawn: Amount) -> Self {
        Balance {
            total_earned,
            total_withdrawn,
            available_balance: total_earned.saturating_sub(total_withdrawn),
        }
    }
}
