//! Two-step commit of a balance mutation and its transaction record.
//!
//! A `Commit` is prepared against a read of the account, then either committed
//! against the live account or dropped. Committing appends the record to the
//! log first and applies it to the live account only if the append succeeded,
//! so the balance and the log move together or not at all.

use coffer_accounts::{Account, AccountCommand, TransactionRecord};
use coffer_core::{Aggregate, AggregateRoot, DomainError, ExpectedVersion};

use crate::transaction_log::{LogError, TransactionLog};

/// Why a prepared commit did not land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// The live account moved past the version the commit was prepared on.
    Stale { prepared_on: u64, live: u64 },
    /// The append failed; the live account is unchanged.
    Log(LogError),
}

/// A staged, not yet visible, mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a prepared commit does nothing until `commit` is called"]
pub struct Commit {
    record: TransactionRecord,
    prepared_on: u64,
}

impl Commit {
    /// Run the account's decision logic for `command` against `account`.
    ///
    /// Business rejections (insufficient funds, overflow) surface here, before
    /// anything is staged.
    pub fn prepare(account: &Account, command: &AccountCommand) -> Result<Self, DomainError> {
        let mut records = account.handle(command)?;
        let record = match (records.pop(), records.is_empty()) {
            (Some(record), true) => record,
            _ => {
                return Err(DomainError::invariant(
                    "a command must produce exactly one transaction record",
                ));
            }
        };

        Ok(Self {
            record,
            prepared_on: account.version(),
        })
    }

    pub fn record(&self) -> &TransactionRecord {
        &self.record
    }

    pub fn prepared_on(&self) -> u64 {
        self.prepared_on
    }

    /// Make the mutation durable and visible.
    ///
    /// `live` must be the authoritative account state, exclusively borrowed for
    /// the duration of the call.
    pub fn commit<L>(self, log: &L, live: &mut Account) -> Result<TransactionRecord, CommitError>
    where
        L: TransactionLog + ?Sized,
    {
        if live.version() != self.prepared_on {
            return Err(CommitError::Stale {
                prepared_on: self.prepared_on,
                live: live.version(),
            });
        }

        let stored = log
            .append(self.record, ExpectedVersion::Exact(self.prepared_on))
            .map_err(CommitError::Log)?;
        live.apply(&stored);
        Ok(stored)
    }

    /// Discard the staged mutation. Nothing was written, so nothing is undone.
    pub fn rollback(self) {
        tracing::debug!(
            account_id = %self.record.account_id,
            transaction_id = %self.record.id,
            "staged transaction discarded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coffer_core::{AccountId, Amount, Balance, OwnerId};

    use crate::transaction_log::InMemoryTransactionLog;

    struct RejectingLog;

    impl TransactionLog for RejectingLog {
        fn append(
            &self,
            _record: TransactionRecord,
            _expected_version: ExpectedVersion,
        ) -> Result<TransactionRecord, LogError> {
            Err(LogError::Unavailable("disk full".to_string()))
        }

        fn list_by_account(&self, _account_id: AccountId) -> Result<Vec<TransactionRecord>, LogError> {
            Ok(Vec::new())
        }

        fn stream_version(&self, _account_id: AccountId) -> Result<u64, LogError> {
            Ok(0)
        }
    }

    fn account() -> Account {
        Account::open(AccountId::new(), OwnerId::new(), Balance::from_cents(10_000))
    }

    fn deposit(cents: i64) -> AccountCommand {
        AccountCommand::deposit(Amount::from_cents(cents).unwrap(), Utc::now())
    }

    #[test]
    fn commit_appends_then_applies() {
        let log = InMemoryTransactionLog::new();
        let mut live = account();

        let commit = Commit::prepare(&live, &deposit(5_000)).unwrap();
        let stored = commit.commit(&log, &mut live).unwrap();

        assert_eq!(live.balance(), Balance::from_cents(15_000));
        assert_eq!(live.version(), 1);
        assert_eq!(log.list_by_account(live.id_typed()).unwrap(), vec![stored]);
    }

    #[test]
    fn stale_commit_changes_nothing() {
        let log = InMemoryTransactionLog::new();
        let mut live = account();

        let first = Commit::prepare(&live, &deposit(100)).unwrap();
        let second = Commit::prepare(&live, &deposit(200)).unwrap();
        first.commit(&log, &mut live).unwrap();

        let err = second.commit(&log, &mut live).unwrap_err();
        assert_eq!(err, CommitError::Stale { prepared_on: 0, live: 1 });
        assert_eq!(live.balance(), Balance::from_cents(10_100));
        assert_eq!(log.stream_version(live.id_typed()).unwrap(), 1);
    }

    #[test]
    fn failed_append_leaves_balance_untouched() {
        let mut live = account();
        let before = live.clone();

        let commit = Commit::prepare(&live, &deposit(5_000)).unwrap();
        let err = commit.commit(&RejectingLog, &mut live).unwrap_err();

        assert!(matches!(err, CommitError::Log(LogError::Unavailable(_))));
        assert_eq!(live, before);
    }

    #[test]
    fn rollback_discards_without_effect() {
        let log = InMemoryTransactionLog::new();
        let live = account();

        Commit::prepare(&live, &deposit(5_000)).unwrap().rollback();

        assert_eq!(live.balance(), Balance::from_cents(10_000));
        assert!(log.list_by_account(live.id_typed()).unwrap().is_empty());
    }
}
