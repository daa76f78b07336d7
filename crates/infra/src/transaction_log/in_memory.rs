use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use coffer_accounts::{TransactionRecord, newest_first};
use coffer_core::{AccountId, ExpectedVersion};

use super::r#trait::{LogError, TransactionLog};

type Stream = Arc<RwLock<Vec<TransactionRecord>>>;

/// In-memory append-only transaction log.
///
/// Each account gets its own stream behind its own lock, so appends to
/// different accounts never wait on each other. The outer map is only
/// write-locked the first time an account's stream is created.
#[derive(Debug, Default)]
pub struct InMemoryTransactionLog {
    streams: RwLock<HashMap<AccountId, Stream>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing_stream(&self, account_id: AccountId) -> Result<Option<Stream>, LogError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| LogError::Unavailable("lock poisoned".to_string()))?;
        Ok(streams.get(&account_id).cloned())
    }

    fn stream(&self, account_id: AccountId) -> Result<Stream, LogError> {
        if let Some(stream) = self.existing_stream(account_id)? {
            return Ok(stream);
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| LogError::Unavailable("lock poisoned".to_string()))?;
        Ok(streams.entry(account_id).or_default().clone())
    }

    fn current_version(stream: &[TransactionRecord]) -> u64 {
        stream.last().map(|r| r.sequence).unwrap_or(0)
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn append(
        &self,
        record: TransactionRecord,
        expected_version: ExpectedVersion,
    ) -> Result<TransactionRecord, LogError> {
        let stream = self.stream(record.account_id)?;
        let mut stream = stream
            .write()
            .map_err(|_| LogError::Unavailable("lock poisoned".to_string()))?;

        let current = Self::current_version(&stream);
        if !expected_version.matches(current) {
            return Err(LogError::Concurrency {
                expected: expected_version,
                actual: current,
            });
        }
        if record.sequence != current + 1 {
            return Err(LogError::InvalidAppend(format!(
                "record sequence {} does not follow stream version {current}",
                record.sequence
            )));
        }

        stream.push(record.clone());
        Ok(record)
    }

    fn list_by_account(&self, account_id: AccountId) -> Result<Vec<TransactionRecord>, LogError> {
        let Some(stream) = self.existing_stream(account_id)? else {
            return Ok(Vec::new());
        };
        let mut records = stream
            .read()
            .map_err(|_| LogError::Unavailable("lock poisoned".to_string()))?
            .clone();
        newest_first(&mut records);
        Ok(records)
    }

    fn stream_version(&self, account_id: AccountId) -> Result<u64, LogError> {
        let Some(stream) = self.existing_stream(account_id)? else {
            return Ok(0);
        };
        let stream = stream
            .read()
            .map_err(|_| LogError::Unavailable("lock poisoned".to_string()))?;
        Ok(Self::current_version(&stream))
    }
}
