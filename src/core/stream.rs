//! Stream record and status machine.
//!
//! A stream is a continuous payment obligation from payer to recipient,
//! accruing at a fixed per-second rate over a bounded window. The record
//! here is an off-chain projection: once a stream is ACTIVE and
//! escrow-confirmed, on-chain state governs `withdrawn_amount`.

use serde::{Deserialize, Serialize};

use super::error::{CoreError, InvalidAmount, InvalidWindow};
use super::types::{Address, Amount, StreamId, TokenId, UnixSeconds};

/// Lifecycle states, in order. A stream never reverts to an earlier state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    /// Created off-chain, escrow not yet confirmed.
    Pending,
    /// Escrow confirmed, accruing.
    Active,
    /// Withdrawals halted; accrual continues (time-based).
    Paused,
    /// Cancelled on-chain; accrual frozen at the cancel point. Terminal.
    Stopped,
    /// Ran to its end time. Terminal.
    Completed,
}

impl StreamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamStatus::Pending => "PENDING",
            StreamStatus::Active => "ACTIVE",
            StreamStatus::Paused => "PAUSED",
            StreamStatus::Stopped => "STOPPED",
            StreamStatus::Completed => "COMPLETED",
        }
    }

    fn rank(self) -> u8 {
        match self {
            StreamStatus::Pending => 0,
            StreamStatus::Active => 1,
            StreamStatus::Paused => 2,
            StreamStatus::Stopped => 3,
            StreamStatus::Completed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StreamStatus::Stopped | StreamStatus::Completed)
    }

    /// Forward-only transitions. Paused may resume to Active; terminal
    /// states accept nothing.
    pub fn can_transition_to(self, next: StreamStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self == StreamStatus::Paused && next == StreamStatus::Active {
            return true;
        }
        next.rank() > self.rank()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    /// The contract's numeric id, known once on-chain creation confirms.
    pub onchain_id: Option<u64>,
    pub payer: Address,
    pub recipient: Address,
    pub token: TokenId,
    /// Smallest token denomination per second.
    pub rate_per_second: Amount,
    pub total_amount: Amount,
    /// Monotonic non-decreasing, <= total_amount.
    pub withdrawn_amount: Amount,
    pub start_time: UnixSeconds,
    pub end_time: Option<UnixSeconds>,
    pub status: StreamStatus,
    pub escrow_confirmed: bool,
    pub max_withdrawals_per_day: u32,
}

impl Stream {
    /// Validate and build a PENDING stream from an off-chain request.
    ///
    /// Mirrors the contract's creation constraints: positive rate and
    /// total, payer != recipient, end > start, and total == rate x duration.
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        id: StreamId,
        payer: Address,
        recipient: Address,
        token: TokenId,
        rate_per_second: Amount,
        start_time: UnixSeconds,
        end_time: UnixSeconds,
        max_withdrawals_per_day: u32,
    ) -> Result<Self, CoreError> {
        if rate_per_second.is_zero() {
            return Err(InvalidAmount {
                reason: "rate_per_second must be positive".to_string(),
            }
            .into());
        }
        if payer == recipient {
            return Err(InvalidWindow {
                reason: "payer and recipient must differ".to_string(),
            }
            .into());
        }
        if end_time <= start_time {
            return Err(InvalidWindow {
                reason: format!("end_time {end_time} must be after start_time {start_time}"),
            }
            .into());
        }
        let duration = end_time.saturating_elapsed_since(start_time);
        let total_amount = rate_per_second.checked_mul_secs(duration).ok_or_else(|| {
            CoreError::from(InvalidAmount {
                reason: "total amount overflows".to_string(),
            })
        })?;

        Ok(Stream {
            id,
            onchain_id: None,
            payer,
            recipient,
            token,
            rate_per_second,
            total_amount,
            withdrawn_amount: Amount::ZERO,
            start_time,
            end_time: Some(end_time),
            status: StreamStatus::Pending,
            escrow_confirmed: false,
            max_withdrawals_per_day,
        })
    }

    pub fn duration(&self) -> Option<u64> {
        self.end_time
            .map(|end| end.saturating_elapsed_since(self.start_time))
    }

    /// Move to a new status; rejects backwards transitions.
    pub fn transition(&mut self, next: StreamStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::from(super::error::InvalidTransition {
                from: self.status.as_str(),
                to: next.as_str(),
            }));
        }
        self.status = next;
        Ok(())
    }

    /// Promote a PENDING stream once its on-chain creation is confirmed.
    /// On-chain times are authoritative, not the off-chain request's.
    pub fn confirm_escrow(
        &mut self,
        onchain_id: u64,
        start_time: UnixSeconds,
        end_time: Option<UnixSeconds>,
    ) -> Result<(), CoreError> {
        self.transition(StreamStatus::Active)?;
        self.escrow_confirmed = true;
        self.onchain_id = Some(onchain_id);
        self.start_time = start_time;
        self.end_time = end_time;
        Ok(())
    }

    pub fn has_ended(&self, now: UnixSeconds) -> bool {
        self.end_time.is_some_and(|end| now >= end)
    }

    pub fn remaining_amount(&self) -> Amount {
        self.total_amount.saturating_sub(self.withdrawn_amount)
    }
}
