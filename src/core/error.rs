//! Core capability errors (validation, state machine, limits).
//!
//! These are bounded and stable: core errors represent domain/refusal
//! states, not library implementation details. Expected conditions (limit
//! reached, stream not yet started) are values, not errors.

use thiserror::Error;

use crate::error::{Effect, Transience};

use super::types::{Address, UnixSeconds};

/// Malformed address, hash, or token identifier.
#[derive(Debug, Error, Clone)]
#[error("address `{raw}` is invalid: {reason}")]
pub struct InvalidAddress {
    pub raw: String,
    pub reason: String,
}

/// Invalid amount at stream creation.
#[derive(Debug, Error, Clone)]
#[error("invalid amount: {reason}")]
pub struct InvalidAmount {
    pub reason: String,
}

/// Invalid stream time window.
#[derive(Debug, Error, Clone)]
#[error("invalid stream window: {reason}")]
pub struct InvalidWindow {
    pub reason: String,
}

/// Stream status transition that would move backwards.
#[derive(Debug, Error, Clone)]
#[error("stream status cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

/// Canonical error enum for the core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidAddress(#[from] InvalidAddress),

    #[error(transparent)]
    InvalidAmount(#[from] InvalidAmount),

    #[error(transparent)]
    InvalidWindow(#[from] InvalidWindow),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// Daily withdrawal cap reached. Surfaced with remaining-quota detail
    /// rather than silently truncating the withdrawal.
    #[error("daily withdrawal limit reached for {recipient}: {used}/{max}, resets at {next_reset}")]
    DailyLimitExceeded {
        recipient: Address,
        used: u32,
        max: u32,
        next_reset: UnixSeconds,
    },
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Pure domain/input failures; retrying without changing inputs
        // (or waiting for the day to roll over) will not help.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
