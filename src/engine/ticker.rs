//! Tick worker.
//!
//! Recomputes every active stream's accrual on a fixed cadence and pushes
//! the results to hub subscribers. Accrual is derived from absolute
//! timestamps, so a missed or delayed tick only delays visibility - the
//! next tick lands on the exact same numbers it would have.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{Receiver, tick};
use thiserror::Error;

use crate::chain::ChainReader;
use crate::core::{Address, CoreError, Stream, StreamStatus, UnixSeconds, accrue};
use crate::error::Transience;
use crate::store::{LedgerStore, StoreError};

use super::hub::{BroadcastHub, HubError, Topic};
use super::messages::ServerMessage;
use super::reconcile::ReconciliationAuditor;
use super::sync::refresh_balance;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    pub streams: usize,
    pub completed: usize,
    pub published: usize,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TickError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Hub(#[from] HubError),
}

impl TickError {
    pub fn transience(&self) -> Transience {
        match self {
            TickError::Store(e) => e.transience(),
            TickError::Core(e) => e.transience(),
            TickError::Hub(e) => e.transience(),
        }
    }
}

pub struct TickWorker<S> {
    store: Arc<S>,
    hub: Arc<BroadcastHub>,
}

impl<S: LedgerStore> TickWorker<S> {
    pub fn new(store: Arc<S>, hub: Arc<BroadcastHub>) -> Self {
        Self { store, hub }
    }

    /// One full pass over the active set at time `now`.
    pub fn tick(&self, now: UnixSeconds) -> Result<TickStats, TickError> {
        let mut stats = TickStats::default();
        let mut recipients: HashSet<Address> = HashSet::new();

        for mut stream in self.store.active_streams()? {
            stats.streams += 1;
            let view = accrue(&stream, now);
            recipients.insert(stream.recipient.clone());

            if stream.has_ended(now) {
                stream.transition(StreamStatus::Completed)?;
                self.store.update_stream(stream.clone())?;
                stats.completed += 1;
                tracing::info!(stream = %stream.id, "stream completed");

                let alert = ServerMessage::StreamCompletionAlert {
                    stream_id: stream.id.clone(),
                    payer_address: stream.payer.clone(),
                    recipient_address: stream.recipient.clone(),
                    completion_time: now,
                    time_remaining: 0,
                };
                stats.published += self.publish_stream_fanout(&stream, alert)?;
                continue;
            }

            let update = ServerMessage::StreamBalanceUpdate {
                stream_id: stream.id.clone(),
                claimable_amount: view.claimable,
                total_earned: view.accrued,
                streaming_progress: view.progress_percent,
                timestamp: now,
            };
            stats.published += self.publish_stream_fanout(&stream, update)?;
        }

        for recipient in recipients {
            refresh_balance(self.store.as_ref(), &recipient, now)?;
        }

        Ok(stats)
    }

    /// Stream topic plus both parties' dashboards.
    fn publish_stream_fanout(
        &self,
        stream: &Stream,
        message: ServerMessage,
    ) -> Result<usize, HubError> {
        let mut delivered = 0;
        delivered += self
            .hub
            .publish(&Topic::Stream(stream.id.clone()), message.clone())?;
        delivered += self
            .hub
            .publish(&Topic::Dashboard(stream.payer.clone()), message.clone())?;
        delivered += self
            .hub
            .publish(&Topic::Dashboard(stream.recipient.clone()), message)?;
        Ok(delivered)
    }
}

/// Tick loop with the reconciliation auditor folded in every
/// `reconcile_every` ticks. Exits when `shutdown_rx` closes or receives.
pub fn run_tick_loop<S: LedgerStore, C: ChainReader>(
    worker: TickWorker<S>,
    auditor: ReconciliationAuditor<S, C>,
    interval: Duration,
    reconcile_every: u32,
    shutdown_rx: Receiver<()>,
) {
    tracing::info!(interval_ms = interval.as_millis() as u64, "tick worker started");
    let ticker = tick(interval);
    let mut ticks_until_reconcile = reconcile_every.max(1);

    loop {
        crossbeam::select! {
            recv(shutdown_rx) -> _ => break,
            recv(ticker) -> _ => {
                let now = UnixSeconds::now();
                match worker.tick(now) {
                    Ok(stats) if stats.completed > 0 => {
                        tracing::info!(streams = stats.streams, completed = stats.completed, "tick pass");
                    }
                    Ok(stats) => {
                        tracing::debug!(streams = stats.streams, published = stats.published, "tick pass");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "tick pass failed");
                    }
                }

                ticks_until_reconcile -= 1;
                if ticks_until_reconcile == 0 {
                    ticks_until_reconcile = reconcile_every.max(1);
                    if let Err(err) = auditor.verify(now) {
                        tracing::error!(error = %err, "reconciliation pass failed");
                    }
                }
            }
        }
    }
    tracing::info!("tick worker stopped");
}
