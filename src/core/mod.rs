//! Domain core: primitives, the stream record, pure accrual math, and the
//! withdrawal limiter. Nothing in this layer performs I/O.

pub mod accrual;
pub mod error;
pub mod ledger;
pub mod limiter;
pub mod stream;
pub mod types;

pub use accrual::{Accrual, accrue};
pub use error::CoreError;
pub use ledger::{Balance, EntryKind, EntryStatus, LedgerEntry};
pub use limiter::{LimitInfo, WithdrawalLimiter};
pub use stream::{Stream, StreamStatus};
pub use types::{
    Address, Amount, BlockNumber, DayIndex, EventKey, SECONDS_PER_DAY, StreamId, TokenId, TxHash,
    UnixSeconds,
};
