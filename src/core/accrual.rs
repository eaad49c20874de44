//! Pure accrual math.
//!
//! Must mirror the on-chain contract's integer arithmetic exactly; any
//! divergence here shows up as a settlement dispute. No I/O, no floats,
//! referentially transparent - the reconciliation auditor depends on
//! identical output for identical input.

use super::stream::{Stream, StreamStatus};
use super::types::{Amount, UnixSeconds};

/// Point-in-time view of a stream's accrual.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accrual {
    /// Total value earned by elapsed time, independent of withdrawals.
    pub accrued: Amount,
    /// Accrued minus withdrawn; what the recipient may withdraw now.
    pub claimable: Amount,
    /// Integer percent 0..=100.
    pub progress_percent: u8,
    pub elapsed_seconds: u64,
}

impl Accrual {
    const ZERO: Accrual = Accrual {
        accrued: Amount::ZERO,
        claimable: Amount::ZERO,
        progress_percent: 0,
        elapsed_seconds: 0,
    };
}

/// Compute accrued/claimable/progress for `stream` at `now`.
///
/// - before start: all zeros
/// - elapsed clamps at `end_time` when present
/// - accrued = rate x elapsed, capped at total (the contract caps accrual
///   at the deposit)
/// - claimable = min(accrued, total) - withdrawn, floored at zero
pub fn accrue(stream: &Stream, now: UnixSeconds) -> Accrual {
    if now < stream.start_time {
        return Accrual::ZERO;
    }

    let horizon = match stream.end_time {
        Some(end) if end < now => end,
        _ => now,
    };
    let elapsed = horizon.saturating_elapsed_since(stream.start_time);

    let raw = stream
        .rate_per_second
        .checked_mul_secs(elapsed)
        .unwrap_or(stream.total_amount);
    let accrued = raw.min(stream.total_amount);

    let claimable = accrued.saturating_sub(stream.withdrawn_amount);
    // Also bounded by what remains in escrow.
    let claimable = claimable.min(stream.remaining_amount());

    Accrual {
        accrued,
        claimable,
        progress_percent: progress_percent(stream, accrued, elapsed, now),
        elapsed_seconds: elapsed,
    }
}

fn progress_percent(stream: &Stream, accrued: Amount, elapsed: u64, now: UnixSeconds) -> u8 {
    if stream.has_ended(now) || stream.status == StreamStatus::Completed {
        return 100;
    }
    match stream.duration() {
        Some(duration) if duration > 0 => {
            let pct = (u128::from(elapsed) * 100) / u128::from(duration);
            pct.min(100) as u8
        }
        // Open-ended stream: progress against escrowed total instead.
        _ => {
            if stream.total_amount.is_zero() {
                return 0;
            }
            let pct = (accrued.0 * 100) / stream.total_amount.0;
            pct.min(100) as u8
        }
    }
}
