//! Account module (single-balance ledger account, event-sourced).
//!
//! Pure domain logic only: no locking, no IO, no clock reads.

pub mod account;
pub mod transaction;

pub use account::{Account, AccountCommand, Deposit, Withdraw};
pub use transaction::{TransactionKind, TransactionRecord, newest_first};
