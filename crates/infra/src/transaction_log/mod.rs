//! Append-only transaction log boundary.
//!
//! One ordered stream of committed `TransactionRecord`s per account. The log
//! has no locking protocol of its own beyond keeping each append atomic; the
//! owning `LedgerAccount` serializes appends to its stream.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryTransactionLog;
pub use r#trait::{LogError, TransactionLog};
