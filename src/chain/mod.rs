//! Chain boundary: read-only contract views and the event log.
//!
//! Payloads are decoded once, at this boundary, into a tagged enum; nothing
//! downstream ever inspects raw provider payloads.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Address, Amount, BlockNumber, EventKey, TokenId, UnixSeconds};
use crate::error::{Effect, Transience};

pub mod script;

pub use script::ScriptedChain;

/// One decoded contract event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainEvent {
    StreamCreated {
        stream_id: u64,
        payer: Address,
        recipient: Address,
        token: TokenId,
        total_amount: Amount,
        rate_per_second: Amount,
        start_time: UnixSeconds,
        end_time: Option<UnixSeconds>,
        max_withdrawals_per_day: u32,
    },
    Withdraw {
        stream_id: u64,
        recipient: Address,
        amount: Amount,
        /// The contract's own day bucket, carried for observability; the
        /// off-chain limiter derives its key from wall-clock UTC days.
        day_index: u64,
        withdrawals_today: u32,
    },
    StreamCancelled {
        stream_id: u64,
        payer: Address,
        refund_amount: Amount,
        claimable_amount: Amount,
    },
}

impl ChainEvent {
    pub fn stream_id(&self) -> u64 {
        match self {
            ChainEvent::StreamCreated { stream_id, .. }
            | ChainEvent::Withdraw { stream_id, .. }
            | ChainEvent::StreamCancelled { stream_id, .. } => *stream_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChainEvent::StreamCreated { .. } => "stream_created",
            ChainEvent::Withdraw { .. } => "withdraw",
            ChainEvent::StreamCancelled { .. } => "stream_cancelled",
        }
    }
}

/// An event with its provenance: dedup key, block, and block timestamp.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEvent {
    pub key: EventKey,
    pub block: BlockNumber,
    /// On-chain time of the containing block; authoritative over wall-clock.
    pub block_time: UnixSeconds,
    pub event: ChainEvent,
}

/// The contract's view of a stream, read back for reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainStream {
    pub stream_id: u64,
    pub payer: Address,
    pub recipient: Address,
    pub token: TokenId,
    pub total_amount: Amount,
    pub rate_per_second: Amount,
    pub withdrawn_amount: Amount,
    pub start_time: UnixSeconds,
    pub end_time: Option<UnixSeconds>,
}

/// Read-only chain access used by the synchronizer and the auditor.
pub trait ChainReader: Send + Sync {
    fn latest_block(&self) -> Result<BlockNumber, ChainError>;

    fn get_stream(&self, stream_id: u64) -> Result<OnchainStream, ChainError>;

    /// The contract's `getClaimable` view.
    fn get_claimable(&self, stream_id: u64) -> Result<Amount, ChainError>;

    /// Historical events in `[from, to]`, ordered by block then log index.
    fn events_in(&self, from: BlockNumber, to: BlockNumber)
    -> Result<Vec<SealedEvent>, ChainError>;
}

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ChainError {
    /// RPC outage or transport failure. Retried with backoff; never
    /// answered with fabricated data.
    #[error("chain unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("stream {stream_id} not found on chain")]
    NotFound { stream_id: u64 },

    #[error("event decode failed: {reason}")]
    Decode { reason: String },
}

impl ChainError {
    pub fn transience(&self) -> Transience {
        match self {
            ChainError::Unavailable { .. } => Transience::Retryable,
            ChainError::NotFound { .. } | ChainError::Decode { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
