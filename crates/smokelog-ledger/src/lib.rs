//! The session ledger: smoke entries grouped into day-sessions, with a
//! running counter kept consistent with the durable store.

pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CounterScope, LedgerConfig};
pub use error::LedgerError;
pub use ledger::{DaySession, Direction, Event, Ledger};
