//! Chain event synchronizer.
//!
//! Converts the ordered on-chain event log into idempotent ledger
//! mutations. Startup replays the window `[last_synced + 1, head]` in
//! batches before the live loop takes over; the cursor only advances after
//! a batch has been fully applied (at-least-once delivery, absorbed by the
//! event journal). One bad event is logged and skipped - it never blocks
//! the cursor or kills the listener.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use thiserror::Error;

use crate::chain::{ChainError, ChainEvent, ChainReader, SealedEvent};
use crate::core::{
    Address, Amount, Balance, BlockNumber, CoreError, EntryKind, LedgerEntry, Stream, StreamId,
    StreamStatus, UnixSeconds, WithdrawalLimiter, accrue,
};
use crate::store::{LedgerStore, StoreError};

use super::hub::{BroadcastHub, HubError, Topic};
use super::messages::ServerMessage;

/// Outcome of applying one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// Event key already journaled; nothing changed.
    Duplicate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub batches: usize,
    pub applied: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("no stream known for on-chain id {onchain_id}")]
    UnknownStream { onchain_id: u64 },
}

impl SyncError {
    pub fn transience(&self) -> crate::error::Transience {
        match self {
            SyncError::Store(e) => e.transience(),
            SyncError::Chain(e) => e.transience(),
            SyncError::Core(e) => e.transience(),
            SyncError::Hub(e) => e.transience(),
            SyncError::UnknownStream { .. } => crate::error::Transience::Permanent,
        }
    }
}

pub struct EventSynchronizer<S> {
    store: Arc<S>,
    hub: Arc<BroadcastHub>,
    limiter: Arc<WithdrawalLimiter>,
}

impl<S: LedgerStore> EventSynchronizer<S> {
    pub fn new(store: Arc<S>, hub: Arc<BroadcastHub>, limiter: Arc<WithdrawalLimiter>) -> Self {
        Self {
            store,
            hub,
            limiter,
        }
    }

    /// Apply one decoded event. Re-delivery of an already-journaled key is
    /// a no-op, not an error.
    pub fn apply(&self, sealed: &SealedEvent) -> Result<Applied, SyncError> {
        if self.store.event_applied(&sealed.key)? {
            return Ok(Applied::Duplicate);
        }

        match &sealed.event {
            ChainEvent::StreamCreated { .. } => self.apply_created(sealed)?,
            ChainEvent::Withdraw { .. } => self.apply_withdraw(sealed)?,
            ChainEvent::StreamCancelled { .. } => self.apply_cancelled(sealed)?,
        }

        self.store.record_event(sealed.key.clone())?;
        Ok(Applied::Applied)
    }

    fn apply_created(&self, sealed: &SealedEvent) -> Result<(), SyncError> {
        let ChainEvent::StreamCreated {
            stream_id,
            payer,
            recipient,
            token,
            total_amount,
            rate_per_second,
            start_time,
            end_time,
            max_withdrawals_per_day,
        } = &sealed.event
        else {
            unreachable!("apply_created called with non-creation event");
        };

        let stream = match self
            .store
            .find_pending_match(payer, recipient, token, *total_amount)?
        {
            Some(mut pending) => {
                // Off-chain request found its on-chain confirmation.
                // On-chain times and rate are authoritative.
                pending.confirm_escrow(*stream_id, *start_time, *end_time)?;
                pending.rate_per_second = *rate_per_second;
                pending.total_amount = *total_amount;
                pending.max_withdrawals_per_day = *max_withdrawals_per_day;
                self.store.update_stream(pending.clone())?;
                tracing::info!(
                    stream = %pending.id,
                    onchain_id = stream_id,
                    "pending stream promoted to active"
                );
                pending
            }
            None => {
                // Stream created outside the API: take it in wholesale.
                let stream = Stream {
                    id: StreamId::from_onchain(*stream_id),
                    onchain_id: Some(*stream_id),
                    payer: payer.clone(),
                    recipient: recipient.clone(),
                    token: token.clone(),
                    rate_per_second: *rate_per_second,
                    total_amount: *total_amount,
                    withdrawn_amount: Amount::ZERO,
                    start_time: *start_time,
                    end_time: *end_time,
                    status: StreamStatus::Active,
                    escrow_confirmed: true,
                    max_withdrawals_per_day: *max_withdrawals_per_day,
                };
                self.store.insert_stream(stream.clone())?;
                tracing::info!(
                    onchain_id = stream_id,
                    "stream adopted directly from chain event"
                );
                stream
            }
        };

        self.store.append_entry(LedgerEntry::confirmed(
            stream.id.clone(),
            EntryKind::StreamStart,
            stream.total_amount,
            sealed.key.tx_hash.clone(),
            stream.payer.clone(),
            stream.recipient.clone(),
            sealed.block_time,
        ))?;
        Ok(())
    }

    fn apply_withdraw(&self, sealed: &SealedEvent) -> Result<(), SyncError> {
        let ChainEvent::Withdraw {
            stream_id,
            recipient,
            amount,
            day_index,
            withdrawals_today,
        } = &sealed.event
        else {
            unreachable!("apply_withdraw called with non-withdraw event");
        };

        let stream = self
            .store
            .stream_by_onchain(*stream_id)?
            .ok_or(SyncError::UnknownStream {
                onchain_id: *stream_id,
            })?;

        // Increment by the event amount, never a recomputation. CAS with
        // re-read on conflict: a concurrent correction must not be lost,
        // and neither must this delta.
        let mut prior = stream.withdrawn_amount;
        loop {
            match self.store.add_withdrawn(&stream.id, *amount, prior) {
                Ok(_) => break,
                Err(StoreError::CasConflict { actual, .. }) => prior = actual,
                Err(other) => return Err(other.into()),
            }
        }

        self.store.append_entry(LedgerEntry::confirmed(
            stream.id.clone(),
            EntryKind::Withdrawal,
            *amount,
            sealed.key.tx_hash.clone(),
            stream.payer.clone(),
            recipient.clone(),
            sealed.block_time,
        ))?;

        // Keep the off-chain day counter in step with observed on-chain
        // withdrawals.
        self.limiter.record(recipient, sealed.block_time);
        tracing::debug!(
            stream = %stream.id,
            amount = %amount,
            contract_day = day_index,
            "withdraw applied"
        );

        refresh_balance(self.store.as_ref(), recipient, sealed.block_time)?;

        let processed = ServerMessage::WithdrawalProcessed {
            stream_id: stream.id.clone(),
            recipient_address: recipient.clone(),
            amount: *amount,
            transaction_hash: sealed.key.tx_hash.clone(),
            timestamp: sealed.block_time,
        };
        self.hub
            .publish(&Topic::Withdrawals(recipient.clone()), processed.clone())?;
        self.hub
            .publish(&Topic::Dashboard(recipient.clone()), processed)?;

        let max = stream.max_withdrawals_per_day;
        let remaining = max.saturating_sub(*withdrawals_today);
        if remaining <= 1 {
            self.hub.publish(
                &Topic::Withdrawals(recipient.clone()),
                ServerMessage::WithdrawalLimitWarning {
                    user_address: recipient.clone(),
                    withdrawals_today: *withdrawals_today,
                    max_withdrawals_per_day: max,
                    remaining_withdrawals: remaining,
                },
            )?;
        }
        Ok(())
    }

    fn apply_cancelled(&self, sealed: &SealedEvent) -> Result<(), SyncError> {
        let ChainEvent::StreamCancelled {
            stream_id,
            payer,
            refund_amount,
            claimable_amount,
        } = &sealed.event
        else {
            unreachable!("apply_cancelled called with non-cancel event");
        };

        let mut stream = self
            .store
            .stream_by_onchain(*stream_id)?
            .ok_or(SyncError::UnknownStream {
                onchain_id: *stream_id,
            })?;

        stream.transition(StreamStatus::Stopped)?;
        // Freeze accrual at the cancel point: the contract reports a frozen
        // claimable for cancelled streams, so the projection must too.
        let frozen_end = match stream.end_time {
            Some(end) if end < sealed.block_time => end,
            _ => sealed.block_time,
        };
        stream.end_time = Some(frozen_end);
        self.store.update_stream(stream.clone())?;

        self.store.append_entry(LedgerEntry::confirmed(
            stream.id.clone(),
            EntryKind::StreamStop,
            *refund_amount,
            sealed.key.tx_hash.clone(),
            stream.recipient.clone(),
            payer.clone(),
            sealed.block_time,
        ))?;
        tracing::info!(
            stream = %stream.id,
            refund = %refund_amount,
            claimable = %claimable_amount,
            "stream cancelled"
        );
        Ok(())
    }

    /// Batched historical catch-up. The cursor moves to a batch's end only
    /// after every event in it has been attempted.
    pub fn replay<C: ChainReader>(
        &self,
        chain: &C,
        batch_blocks: u64,
    ) -> Result<ReplayStats, SyncError> {
        let head = chain.latest_block()?;
        let mut stats = ReplayStats::default();
        let mut from = self.store.sync_cursor()?.next();

        while from <= head {
            let to = BlockNumber(from.0.saturating_add(batch_blocks.max(1) - 1).min(head.0));
            let events = chain.events_in(from, to)?;
            stats.batches += 1;
            self.apply_batch(&events, &mut stats);
            self.store.set_sync_cursor(to)?;
            from = to.next();
        }
        Ok(stats)
    }

    fn apply_batch(&self, events: &[SealedEvent], stats: &mut ReplayStats) {
        for sealed in events {
            match self.apply(sealed) {
                Ok(Applied::Applied) => stats.applied += 1,
                Ok(Applied::Duplicate) => stats.duplicates += 1,
                Err(err) => {
                    // Skip, don't stall: the cursor still advances and the
                    // auditor will catch any resulting drift.
                    stats.skipped += 1;
                    tracing::warn!(
                        kind = sealed.event.kind(),
                        tx = %sealed.key.tx_hash,
                        log_index = sealed.key.log_index,
                        error = %err,
                        "event skipped"
                    );
                }
            }
        }
    }
}

/// Recompute a recipient's balance projection across their streams.
///
/// Folds every escrow-confirmed stream, terminal ones included: a stream
/// that completed or was cancelled keeps its frozen accrual in the
/// projection, so `total_earned` and `total_withdrawn` never shrink.
pub(crate) fn refresh_balance<S: LedgerStore>(
    store: &S,
    recipient: &Address,
    now: UnixSeconds,
) -> Result<Balance, StoreError> {
    let mut earned = Amount::ZERO;
    let mut withdrawn = Amount::ZERO;
    for stream in store.streams_for(recipient)? {
        if !stream.escrow_confirmed {
            continue;
        }
        let view = accrue(&stream, now);
        earned = earned.checked_add(view.accrued).unwrap_or(earned);
        withdrawn = withdrawn
            .checked_add(stream.withdrawn_amount)
            .unwrap_or(withdrawn);
    }
    let balance = Balance::new(earned, withdrawn);
    store.upsert_balance(recipient, balance)?;
    Ok(balance)
}

/// Exponential backoff for chain outages.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max,
            current: base,
        }
    }

    /// The delay to sleep now; doubles for next time, capped at max.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Live listener loop: poll for new blocks past the cursor and apply their
/// events. Runs on its own thread; exits when `shutdown_rx` closes or
/// receives. Chain outages back off without touching the cursor.
pub fn run_listener_loop<S: LedgerStore, C: ChainReader>(
    sync: Arc<EventSynchronizer<S>>,
    chain: Arc<C>,
    poll_interval: Duration,
    mut backoff: Backoff,
    shutdown_rx: Receiver<()>,
) {
    tracing::info!("event listener started");
    loop {
        match shutdown_rx.recv_timeout(poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        match sync.replay(chain.as_ref(), u64::MAX) {
            Ok(stats) => {
                backoff.reset();
                if stats.applied > 0 {
                    tracing::debug!(applied = stats.applied, "live events applied");
                }
            }
            Err(err) if err.transience().is_retryable() => {
                let delay = backoff.next_delay();
                tracing::warn!(error = %err, backoff_ms = delay.as_millis() as u64, "chain unavailable, backing off");
                match shutdown_rx.recv_timeout(delay) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "listener pass failed");
            }
        }
    }
    tracing::info!("event listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ScriptedChain;
    use crate::core::{Address, Amount, EventKey, TokenId, TxHash};
    use crate::store::MemoryStore;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    fn token() -> TokenId {
        TokenId::parse(&format!("0x{:040x}", 0xbb)).unwrap()
    }

    fn key(n: u64) -> EventKey {
        EventKey::new(TxHash::parse(&format!("0x{:064x}", n)).unwrap(), 0)
    }

    fn created(stream_id: u64, block: u64) -> SealedEvent {
        SealedEvent {
            key: key(block * 10),
            block: BlockNumber(block),
            block_time: UnixSeconds(block * 12),
            event: ChainEvent::StreamCreated {
                stream_id,
                payer: addr(1),
                recipient: addr(2),
                token: token(),
                total_amount: Amount(10_000),
                rate_per_second: Amount(10),
                start_time: UnixSeconds(block * 12),
                end_time: Some(UnixSeconds(block * 12 + 1_000)),
                max_withdrawals_per_day: 2,
            },
        }
    }

    fn withdraw(stream_id: u64, block: u64, amount: u128, today: u32) -> SealedEvent {
        SealedEvent {
            key: key(block * 10 + 1),
            block: BlockNumber(block),
            block_time: UnixSeconds(block * 12),
            event: ChainEvent::Withdraw {
                stream_id,
                recipient: addr(2),
                amount: Amount(amount),
                day_index: 0,
                withdrawals_today: today,
            },
        }
    }

    fn sync_with_store() -> (Arc<MemoryStore>, EventSynchronizer<MemoryStore>, Arc<BroadcastHub>)
    {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(BroadcastHub::new(16));
        let limiter = Arc::new(WithdrawalLimiter::new());
        let sync = EventSynchronizer::new(Arc::clone(&store), Arc::clone(&hub), limiter);
        (store, sync, hub)
    }

    #[test]
    fn created_event_promotes_matching_pending_stream() {
        let (store, sync, _hub) = sync_with_store();
        let pending = Stream::new_pending(
            StreamId::new_local(),
            addr(1),
            addr(2),
            token(),
            Amount(10),
            UnixSeconds(0),
            UnixSeconds(1_000),
            2,
        )
        .unwrap();
        let local_id = pending.id.clone();
        store.insert_stream(pending).unwrap();

        sync.apply(&created(7, 3)).unwrap();

        let promoted = store.stream(&local_id).unwrap();
        assert_eq!(promoted.status, StreamStatus::Active);
        assert!(promoted.escrow_confirmed);
        assert_eq!(promoted.onchain_id, Some(7));
        // On-chain time is authoritative.
        assert_eq!(promoted.start_time, UnixSeconds(36));
    }

    #[test]
    fn created_event_without_match_adopts_stream() {
        let (store, sync, _hub) = sync_with_store();
        sync.apply(&created(9, 2)).unwrap();

        let adopted = store.stream_by_onchain(9).unwrap().unwrap();
        assert_eq!(adopted.status, StreamStatus::Active);
        assert!(adopted.escrow_confirmed);
    }

    #[test]
    fn applying_the_same_event_twice_is_a_noop() {
        let (store, sync, _hub) = sync_with_store();
        sync.apply(&created(1, 1)).unwrap();

        let w = withdraw(1, 2, 500, 1);
        assert_eq!(sync.apply(&w).unwrap(), Applied::Applied);
        assert_eq!(sync.apply(&w).unwrap(), Applied::Duplicate);

        let stream = store.stream_by_onchain(1).unwrap().unwrap();
        assert_eq!(stream.withdrawn_amount, Amount(500));
        let entries = store.entries_for(&addr(2)).unwrap();
        let withdrawals: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == EntryKind::Withdrawal)
            .collect();
        assert_eq!(withdrawals.len(), 1);
    }

    #[test]
    fn withdraw_increments_by_event_amount() {
        let (store, sync, _hub) = sync_with_store();
        sync.apply(&created(1, 1)).unwrap();
        sync.apply(&withdraw(1, 2, 300, 1)).unwrap();
        sync.apply(&withdraw(1, 3, 200, 2)).unwrap();

        let stream = store.stream_by_onchain(1).unwrap().unwrap();
        assert_eq!(stream.withdrawn_amount, Amount(500));
    }

    #[test]
    fn withdraw_at_cap_emits_limit_warning() {
        let (_store, sync, hub) = sync_with_store();
        let warnings = hub.subscribe(Topic::Withdrawals(addr(2))).unwrap();
        sync.apply(&created(1, 1)).unwrap();
        // max_withdrawals_per_day = 2; second withdrawal exhausts it.
        sync.apply(&withdraw(1, 2, 100, 2)).unwrap();

        let mut saw_warning = false;
        while let Ok(msg) = warnings.try_recv() {
            if let ServerMessage::WithdrawalLimitWarning {
                remaining_withdrawals,
                ..
            } = msg
            {
                assert_eq!(remaining_withdrawals, 0);
                saw_warning = true;
            }
        }
        assert!(saw_warning);
    }

    #[test]
    fn cancel_stops_and_freezes_the_stream() {
        let (store, sync, _hub) = sync_with_store();
        sync.apply(&created(1, 1)).unwrap();

        let cancel = SealedEvent {
            key: key(777),
            block: BlockNumber(5),
            block_time: UnixSeconds(60),
            event: ChainEvent::StreamCancelled {
                stream_id: 1,
                payer: addr(1),
                refund_amount: Amount(9_520),
                claimable_amount: Amount(480),
            },
        };
        sync.apply(&cancel).unwrap();

        let stream = store.stream_by_onchain(1).unwrap().unwrap();
        assert_eq!(stream.status, StreamStatus::Stopped);
        assert_eq!(stream.end_time, Some(UnixSeconds(60)));

        // Accrual is frozen at the cancel point.
        let later = accrue(&stream, UnixSeconds(10_000));
        assert_eq!(later.accrued, accrue(&stream, UnixSeconds(60)).accrued);
    }

    #[test]
    fn replay_advances_cursor_and_skips_bad_events() {
        let (store, sync, _hub) = sync_with_store();
        let chain = ScriptedChain::empty();
        chain.push_event(created(1, 1));
        // Withdraw for a stream nobody knows: skipped, not fatal.
        chain.push_event(withdraw(999, 2, 10, 1));
        chain.push_event(withdraw(1, 3, 250, 1));

        let stats = sync.replay(&chain, 2).unwrap();
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.sync_cursor().unwrap(), BlockNumber(3));

        // Provider re-delivers the same events in later blocks (reconnect
        // replay window); the journal absorbs them as duplicates.
        let mut redelivered_created = created(1, 1);
        redelivered_created.block = BlockNumber(4);
        chain.push_event(redelivered_created);
        let mut redelivered_withdraw = withdraw(1, 3, 250, 1);
        redelivered_withdraw.block = BlockNumber(5);
        chain.push_event(redelivered_withdraw);

        let again = sync.replay(&chain, 10).unwrap();
        assert_eq!(again.applied, 0);
        assert_eq!(again.duplicates, 2);
        assert_eq!(store.sync_cursor().unwrap(), BlockNumber(5));
        let stream = store.stream_by_onchain(1).unwrap().unwrap();
        assert_eq!(stream.withdrawn_amount, Amount(250));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(350));
        assert_eq!(b.next_delay(), Duration::from_millis(350));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }
}
