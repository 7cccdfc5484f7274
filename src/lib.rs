pub mod compactor;
pub mod config;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;

pub use engine::{BatchItem, ErrorKind, Ledger, LedgerError, ReservationLedger};
