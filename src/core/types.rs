//! Layer 0: domain primitives.
//!
//! Newtypes for addresses, amounts, times, and block positions. Everything
//! that crosses the chain boundary is integer-typed; balance math never
//! touches floating point so off-chain results agree with the contract
//! bit-for-bit.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{CoreError, InvalidAddress};

fn is_hex_str(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Wallet address: `0x` + 40 lowercase hex chars.
///
/// Parsing normalizes case so addresses compare byte-wise.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let Some(hex) = raw.strip_prefix("0x") else {
            return Err(InvalidAddress {
                raw: raw.to_string(),
                reason: "missing 0x prefix".to_string(),
            }
            .into());
        };
        if !is_hex_str(hex, 40) {
            return Err(InvalidAddress {
                raw: raw.to_string(),
                reason: "expected 40 hex chars".to_string(),
            }
            .into());
        }
        Ok(Address(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

/// Token contract identifier. Same shape as a wallet address but kept as a
/// distinct type so payer/recipient/token can never be swapped silently.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let addr = Address::parse(raw)?;
        Ok(TokenId(addr.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transaction hash: `0x` + 64 hex chars.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let Some(hex) = raw.strip_prefix("0x") else {
            return Err(InvalidAddress {
                raw: raw.to_string(),
                reason: "missing 0x prefix".to_string(),
            }
            .into());
        };
        if !is_hex_str(hex, 64) {
            return Err(InvalidAddress {
                raw: raw.to_string(),
                reason: "expected 64 hex chars".to_string(),
            }
            .into());
        }
        Ok(TxHash(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Natural dedup key for a chain event: the emitting transaction plus the
/// log position within it. The same event may be delivered more than once
/// (provider reconnect, reorg-safe replay window); this key makes the
/// second delivery a no-op.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub tx_hash: TxHash,
    pub log_index: u32,
}

impl EventKey {
    pub fn new(tx_hash: TxHash, log_index: u32) -> Self {
        Self { tx_hash, log_index }
    }
}

/// Token amount in the smallest denomination.
///
/// All arithmetic is checked or explicitly saturating; overflow in accrual
/// math is a caller bug, not a silent wrap.
///
/// On the wire an amount is a decimal string: serde's internally-tagged
/// enum buffering cannot carry `u128`, and big integers travel as strings
/// in the upstream payloads anyway. Plain unsigned JSON numbers are still
/// accepted on input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Amount(pub u128);

impl Serialize for Amount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl serde::de::Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or unsigned integer amount")
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Amount, E> {
                value.parse::<u128>().map(Amount).map_err(E::custom)
            }

            fn visit_u64<E: serde::de::Error>(self, value: u64) -> Result<Amount, E> {
                Ok(Amount(u128::from(value)))
            }

            fn visit_u128<E: serde::de::Error>(self, value: u128) -> Result<Amount, E> {
                Ok(Amount(value))
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_mul_secs(self, secs: u64) -> Option<Amount> {
        self.0.checked_mul(u128::from(secs)).map(Amount)
    }

    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    pub fn abs_diff(self, other: Amount) -> Amount {
        Amount(self.0.abs_diff(other.0))
    }

    pub fn min(self, other: Amount) -> Amount {
        Amount(self.0.min(other.0))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wall-clock seconds since the Unix epoch.
///
/// Accrual is computed from absolute timestamps, never incrementally, so a
/// missed tick has no correctness impact.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UnixSeconds(pub u64);

pub const SECONDS_PER_DAY: u64 = 86_400;

impl UnixSeconds {
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self(secs)
    }

    /// UTC calendar-day bucket. One formula for every limiter call site:
    /// the bucket is independent of any stream's start time.
    pub fn day_index(self) -> DayIndex {
        DayIndex(self.0 / SECONDS_PER_DAY)
    }

    pub fn saturating_elapsed_since(self, earlier: UnixSeconds) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    pub fn plus(self, secs: u64) -> UnixSeconds {
        UnixSeconds(self.0.saturating_add(secs))
    }
}

impl fmt::Display for UnixSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UTC calendar-day key used by the withdrawal limiter.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DayIndex(pub u64);

impl DayIndex {
    /// First second of the following day, i.e. when this bucket resets.
    pub fn next_reset(self) -> UnixSeconds {
        UnixSeconds((self.0 + 1) * SECONDS_PER_DAY)
    }
}

/// Chain block height.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    pub fn next(self) -> BlockNumber {
        BlockNumber(self.0.saturating_add(1))
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque stream identifier.
///
/// On-chain streams use the contract's numeric id rendered as decimal;
/// streams created off-chain (PENDING, awaiting escrow confirmation) get a
/// locally generated uuid until the chain event promotes them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn from_onchain(id: u64) -> Self {
        StreamId(id.to_string())
    }

    pub fn new_local() -> Self {
        StreamId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
