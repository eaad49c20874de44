//! Reconciliation auditor.
//!
//! Compares the off-chain projection of every active stream against the
//! contract's own view and corrects drift. On-chain state always wins: the
//! correction overwrites `withdrawn_amount` with the contract's value and
//! never pushes anything back to the chain. Runs on a slow cadence relative
//! to the tick worker.

use std::sync::Arc;

use thiserror::Error;

use crate::chain::{ChainError, ChainReader};
use crate::core::{Amount, Stream, UnixSeconds, accrue};
use crate::error::Transience;
use crate::store::{LedgerStore, StoreError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub in_sync: usize,
    pub corrected: usize,
    /// Streams that could not be checked this pass (chain lookup failed).
    /// Counted, not fatal; the next pass retries them.
    pub skipped: usize,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl ReconcileError {
    pub fn transience(&self) -> Transience {
        match self {
            ReconcileError::Store(e) => e.transience(),
            ReconcileError::Chain(e) => e.transience(),
        }
    }
}

pub struct ReconciliationAuditor<S, C> {
    store: Arc<S>,
    chain: Arc<C>,
    /// Absolute divergence below this is noise (block-time skew between the
    /// local clock and the chain's), not drift.
    tolerance: Amount,
}

impl<S: LedgerStore, C: ChainReader> ReconciliationAuditor<S, C> {
    pub fn new(store: Arc<S>, chain: Arc<C>, tolerance: Amount) -> Self {
        Self {
            store,
            chain,
            tolerance,
        }
    }

    /// Audit every active stream once. Per-stream chain failures are
    /// skipped, not propagated; only a store failure aborts the pass.
    pub fn verify(&self, now: UnixSeconds) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();
        for stream in self.store.active_streams()? {
            report.checked += 1;
            match self.verify_stream(&stream, now) {
                Ok(true) => report.in_sync += 1,
                Ok(false) => report.corrected += 1,
                Err(ReconcileError::Chain(err)) => {
                    report.skipped += 1;
                    tracing::warn!(stream = %stream.id, error = %err, "reconcile skipped");
                }
                Err(err) => return Err(err),
            }
        }
        if report.corrected > 0 || report.skipped > 0 {
            tracing::info!(
                checked = report.checked,
                corrected = report.corrected,
                skipped = report.skipped,
                "reconciliation pass finished"
            );
        } else {
            tracing::debug!(checked = report.checked, "reconciliation pass clean");
        }
        Ok(report)
    }

    /// Returns Ok(true) when the stream was already in sync.
    fn verify_stream(&self, stream: &Stream, now: UnixSeconds) -> Result<bool, ReconcileError> {
        let Some(onchain_id) = stream.onchain_id else {
            // Nothing on chain to compare against yet.
            return Ok(true);
        };

        let onchain = self.chain.get_stream(onchain_id)?;
        let onchain_claimable = self.chain.get_claimable(onchain_id)?;

        let mut in_sync = true;

        if onchain.withdrawn_amount != stream.withdrawn_amount {
            tracing::warn!(
                stream = %stream.id,
                local = %stream.withdrawn_amount,
                onchain = %onchain.withdrawn_amount,
                "withdrawn_amount drift, adopting on-chain value"
            );
            self.store
                .set_withdrawn(&stream.id, onchain.withdrawn_amount)?;
            in_sync = false;
        }

        // Re-derive claimable locally from the corrected record and compare
        // against the contract view within tolerance.
        let corrected = self.store.stream(&stream.id)?;
        let local_claimable = accrue(&corrected, now).claimable;
        let divergence = local_claimable.abs_diff(onchain_claimable);
        if divergence > self.tolerance {
            tracing::warn!(
                stream = %stream.id,
                local = %local_claimable,
                onchain = %onchain_claimable,
                divergence = %divergence,
                "claimable divergence beyond tolerance"
            );
            in_sync = false;
        }

        Ok(in_sync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{OnchainStream, ScriptedChain};
    use crate::core::{Address, StreamId, StreamStatus, TokenId};
    use crate::store::MemoryStore;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn token() -> TokenId {
        TokenId::parse(&format!("0x{:040x}", 0xcc)).unwrap()
    }

    fn local_stream(id: u64, withdrawn: u128) -> Stream {
        Stream {
            id: StreamId::from_onchain(id),
            onchain_id: Some(id),
            payer: addr(1),
            recipient: addr(2),
            token: token(),
            rate_per_second: Amount(10),
            total_amount: Amount(10_000),
            withdrawn_amount: Amount(withdrawn),
            start_time: UnixSeconds(0),
            end_time: Some(UnixSeconds(1_000)),
            status: StreamStatus::Active,
            escrow_confirmed: true,
            max_withdrawals_per_day: 3,
        }
    }

    fn onchain_view(id: u64, withdrawn: u128) -> OnchainStream {
        OnchainStream {
            stream_id: id,
            payer: addr(1),
            recipient: addr(2),
            token: token(),
            total_amount: Amount(10_000),
            rate_per_second: Amount(10),
            withdrawn_amount: Amount(withdrawn),
            start_time: UnixSeconds(0),
            end_time: Some(UnixSeconds(1_000)),
        }
    }

    fn auditor(
        tolerance: u128,
    ) -> (
        Arc<MemoryStore>,
        Arc<ScriptedChain>,
        ReconciliationAuditor<MemoryStore, ScriptedChain>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(ScriptedChain::empty());
        let auditor =
            ReconciliationAuditor::new(Arc::clone(&store), Arc::clone(&chain), Amount(tolerance));
        (store, chain, auditor)
    }

    #[test]
    fn matching_state_is_in_sync() {
        let (store, chain, auditor) = auditor(0);
        store.insert_stream(local_stream(1, 500)).unwrap();
        chain.set_stream(onchain_view(1, 500));
        // now = 200s in: accrued 2_000, claimable 1_500 on both sides.
        chain.set_claimable(1, Amount(1_500));

        let report = auditor.verify(UnixSeconds(200)).unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.in_sync, 1);
        assert_eq!(report.corrected, 0);
    }

    #[test]
    fn drifted_withdrawn_adopts_onchain_value() {
        let (store, chain, auditor) = auditor(0);
        // Local record missed a withdrawal the chain saw.
        store.insert_stream(local_stream(1, 100)).unwrap();
        chain.set_stream(onchain_view(1, 600));
        chain.set_claimable(1, Amount(1_400));

        let report = auditor.verify(UnixSeconds(200)).unwrap();
        assert_eq!(report.corrected, 1);
        assert_eq!(
            store
                .stream(&StreamId::from_onchain(1))
                .unwrap()
                .withdrawn_amount,
            Amount(600)
        );

        // Second pass converges.
        let again = auditor.verify(UnixSeconds(200)).unwrap();
        assert_eq!(again.in_sync, 1);
        assert_eq!(again.corrected, 0);
    }

    #[test]
    fn divergence_within_tolerance_passes() {
        let (store, chain, auditor) = auditor(50);
        store.insert_stream(local_stream(1, 0)).unwrap();
        chain.set_stream(onchain_view(1, 0));
        // Local claimable at t=200 is 2_000; a block or two of skew.
        chain.set_claimable(1, Amount(1_980));

        let report = auditor.verify(UnixSeconds(200)).unwrap();
        assert_eq!(report.in_sync, 1);
    }

    #[test]
    fn unreachable_stream_is_skipped_not_fatal() {
        let (store, chain, auditor) = auditor(0);
        store.insert_stream(local_stream(1, 0)).unwrap();
        store.insert_stream(local_stream(2, 0)).unwrap();
        // Only stream 2 is known to the chain reader.
        chain.set_stream(onchain_view(2, 0));
        chain.set_claimable(2, Amount(2_000));

        let report = auditor.verify(UnixSeconds(200)).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.in_sync, 1);
    }

    #[test]
    fn pending_local_stream_is_left_alone() {
        let (store, _chain, auditor) = auditor(0);
        let mut s = local_stream(1, 0);
        s.onchain_id = None;
        store.insert_stream(s).unwrap();

        let report = auditor.verify(UnixSeconds(100)).unwrap();
        assert_eq!(report.in_sync, 1);
        assert_eq!(report.skipped, 0);
    }
}
