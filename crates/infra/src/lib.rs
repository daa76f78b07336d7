//! Concurrency and storage layer: transaction log, per-account serialization,
//! account registry, configuration.

pub mod commit;
pub mod config;
pub mod error;
pub mod ledger_account;
pub mod registry;
pub mod transaction_log;


pub use config::{ConcurrencyStrategy, LedgerConfig};
pub use error::LedgerError;
pub use ledger_account::{LedgerAccount, Receipt, Statement};
pub use registry::AccountRegistry;
pub use transaction_log::{InMemoryTransactionLog, LogError, TransactionLog};
