//! Engine layer: the synchronizer, auditor, tick worker, broadcast hub,
//! and the runtime that wires them onto threads.

pub mod hub;
pub mod messages;
pub mod reconcile;
pub mod runtime;
pub mod sync;
pub mod ticker;

pub use hub::{BroadcastHub, Subscription, Topic};
pub use messages::{ClientMessage, ServerMessage};
pub use reconcile::{ReconcileReport, ReconciliationAuditor};
pub use runtime::{Engine, EngineHandle};
pub use sync::{Applied, EventSynchronizer, ReplayStats};
pub use ticker::{TickStats, TickWorker};
