//! In-process race harness for the ledger.
//!
//! Hammers one account with batches of simultaneous withdrawals and deposits
//! while a monitor thread watches the balance, then checks the account's
//! history against what the callers were told.

pub mod config;
pub mod harness;

pub use config::{ConfigError, SimConfig};
pub use harness::{SimReport, run};
