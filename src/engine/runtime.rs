//! Engine lifecycle.
//!
//! `Engine::start` replays the missed event window synchronously, then
//! hands off to two named worker threads: the live event listener and the
//! tick worker (which folds in reconciliation on its slower cadence).
//! Shutdown closes the shared channel and joins both threads; the sync
//! cursor is only ever advanced after durable application, so a shutdown
//! at any point loses no events.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Sender, bounded};

use crate::chain::ChainReader;
use crate::config::EngineConfig;
use crate::core::WithdrawalLimiter;
use crate::error::Result;
use crate::store::LedgerStore;

use super::hub::BroadcastHub;
use super::reconcile::ReconciliationAuditor;
use super::sync::{Backoff, EventSynchronizer, ReplayStats, run_listener_loop};
use super::ticker::{TickWorker, run_tick_loop};

pub struct Engine;

impl Engine {
    /// Catch up on missed events, then start the live workers.
    pub fn start<S, C>(
        store: Arc<S>,
        chain: Arc<C>,
        hub: Arc<BroadcastHub>,
        limiter: Arc<WithdrawalLimiter>,
        config: &EngineConfig,
    ) -> Result<EngineHandle>
    where
        S: LedgerStore + 'static,
        C: ChainReader + 'static,
    {
        let sync = Arc::new(EventSynchronizer::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&limiter),
        ));

        let stats: ReplayStats = sync.replay(chain.as_ref(), config.replay_batch_blocks)?;
        tracing::info!(
            batches = stats.batches,
            applied = stats.applied,
            duplicates = stats.duplicates,
            skipped = stats.skipped,
            "startup replay finished"
        );

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let listener = {
            let sync = Arc::clone(&sync);
            let chain = Arc::clone(&chain);
            let poll = Duration::from_millis(config.poll_interval_ms);
            let backoff = Backoff::new(
                Duration::from_millis(config.backoff_base_ms),
                Duration::from_millis(config.backoff_max_ms),
            );
            let rx = shutdown_rx.clone();
            thread::Builder::new()
                .name("tap-listener".to_string())
                .spawn(move || run_listener_loop(sync, chain, poll, backoff, rx))
                .map_err(spawn_error)?
        };

        let ticker = {
            let worker = TickWorker::new(Arc::clone(&store), Arc::clone(&hub));
            let auditor = ReconciliationAuditor::new(
                Arc::clone(&store),
                Arc::clone(&chain),
                crate::core::Amount(u128::from(config.reconcile_tolerance)),
            );
            let interval = Duration::from_millis(config.tick_interval_ms.max(1));
            let reconcile_every = (config.reconcile_interval_ms / config.tick_interval_ms.max(1))
                .max(1) as u32;
            thread::Builder::new()
                .name("tap-ticker".to_string())
                .spawn(move || {
                    run_tick_loop(worker, auditor, interval, reconcile_every, shutdown_rx)
                })
                .map_err(spawn_error)?
        };

        Ok(EngineHandle {
            shutdown_tx: Some(shutdown_tx),
            workers: vec![listener, ticker],
        })
    }
}

fn spawn_error(err: std::io::Error) -> crate::error::Error {
    crate::error::Error::Config(format!("failed to spawn worker thread: {err}"))
}

/// Owns the worker threads. Dropping without `shutdown` also stops the
/// workers (the channel disconnects) but does not wait for them.
pub struct EngineHandle {
    shutdown_tx: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Signal both workers and wait for them to finish their current pass.
    pub fn shutdown(mut self) {
        // Dropping the only sender disconnects every cloned receiver.
        self.shutdown_tx.take();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                tracing::error!(thread = %name, "worker panicked");
            }
        }
        tracing::info!("engine stopped");
    }
}
