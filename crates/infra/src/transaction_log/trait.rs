use std::sync::Arc;

use thiserror::Error;

use coffer_accounts::TransactionRecord;
use coffer_core::{AccountId, ExpectedVersion};

/// Transaction log operation error.
///
/// These are storage errors, as opposed to domain errors (validation,
/// insufficient funds).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The stream was not at the version the appender expected.
    #[error("stream version mismatch: expected {expected:?}, found {actual}")]
    Concurrency {
        expected: ExpectedVersion,
        actual: u64,
    },

    /// The record cannot be placed in the stream (wrong sequence, etc.).
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// The backend could not complete the operation.
    #[error("log unavailable: {0}")]
    Unavailable(String),
}

/// Append-only, per-account transaction log.
///
/// ## Append Semantics
///
/// `append()`:
/// - checks the stream version against `expected_version`
/// - requires `record.sequence == current_version + 1`
/// - makes the record visible to every subsequent read before returning
///
/// A record is never modified or removed once appended.
///
/// ## Read Semantics
///
/// `list_by_account()` returns a fresh snapshot of the stream, newest first.
/// An unknown account yields an empty list.
pub trait TransactionLog: Send + Sync {
    fn append(
        &self,
        record: TransactionRecord,
        expected_version: ExpectedVersion,
    ) -> Result<TransactionRecord, LogError>;

    fn list_by_account(&self, account_id: AccountId) -> Result<Vec<TransactionRecord>, LogError>;

    /// Number of records in the account's stream.
    fn stream_version(&self, account_id: AccountId) -> Result<u64, LogError>;
}

impl<S> TransactionLog for Arc<S>
where
    S: TransactionLog + ?Sized,
{
    fn append(
        &self,
        record: TransactionRecord,
        expected_version: ExpectedVersion,
    ) -> Result<TransactionRecord, LogError> {
        (**self).append(record, expected_version)
    }

    fn list_by_account(&self, account_id: AccountId) -> Result<Vec<TransactionRecord>, LogError> {
        (**self).list_by_account(account_id)
    }

    fn stream_version(&self, account_id: AccountId) -> Result<u64, LogError> {
        (**self).stream_version(account_id)
    }
}
