//! Crate-level error surface.
//!
//! Each capability (core, store, chain, engine) owns a bounded error enum;
//! this module folds them into one transparent crate error and defines the
//! retry-classification vocabulary they all share.

use thiserror::Error;

use crate::chain::ChainError;
use crate::core::CoreError;
use crate::engine::hub::HubError;
use crate::engine::reconcile::ReconcileError;
use crate::engine::sync::SyncError;
use crate::engine::ticker::TickError;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

/// Whether retrying the failed operation, unchanged, can succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transience {
    /// Retrying will not help without changing inputs or state.
    Permanent,
    /// Transient contention or outage; retry with backoff.
    Retryable,
    /// Not classified; treat as non-retryable but surface loudly.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Whether the failed operation may have had an observable effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Definitely no state change; safe to retry blindly.
    None,
    /// A state change definitely happened before the failure.
    Some,
    /// Cannot tell; retries must be idempotent.
    Unknown,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Tick(#[from] TickError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Core(e) => e.transience(),
            Error::Store(e) => e.transience(),
            Error::Chain(e) => e.transience(),
            Error::Sync(e) => e.transience(),
            Error::Reconcile(e) => e.transience(),
            Error::Tick(e) => e.transience(),
            Error::Hub(e) => e.transience(),
            Error::Config(_) => Transience::Permanent,
        }
    }
}
