//! The per-account serialization point.
//!
//! `LedgerAccount` owns one account's live state and is the only writer of
//! that account's balance and log stream. Every `deposit`/`withdraw` runs the
//! full read-decide-append-apply sequence as one indivisible step with respect
//! to every other mutation of the same account:
//!
//! ```text
//! ConcurrencyStrategy::Mutex
//!   acquire account lock (bounded by deadline)
//!     read state -> decide -> append record -> apply
//!   release
//!
//! ConcurrencyStrategy::Optimistic
//!   loop (bounded by max_retries and deadline)
//!     read snapshot + version -> decide
//!     commit iff version unchanged (append record -> apply), else retry
//! ```
//!
//! After every commit the new state is published as an immutable snapshot.
//! `balance()` and `version()` read that snapshot and never wait on a commit
//! in progress.
//!
//! Accounts share nothing but the log, whose streams are independent, so
//! operations on different accounts never wait on each other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use coffer_accounts::{Account, AccountCommand, Deposit, TransactionKind, TransactionRecord, Withdraw};
use coffer_core::{AccountId, AggregateRoot, Amount, Balance, OwnerId, TransactionId};

use crate::commit::{Commit, CommitError};
use crate::config::{ConcurrencyStrategy, LedgerConfig};
use crate::error::LedgerError;
use crate::transaction_log::TransactionLog;

/// What a successful mutation hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub account_id: AccountId,
    pub transaction_id: TransactionId,
    pub sequence: u64,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub new_balance: Balance,
}

impl From<&TransactionRecord> for Receipt {
    fn from(record: &TransactionRecord) -> Self {
        Self {
            account_id: record.account_id,
            transaction_id: record.id,
            sequence: record.sequence,
            kind: record.kind,
            amount: record.amount,
            new_balance: record.balance_after,
        }
    }
}

/// Balance and history captured at the same instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub account_id: AccountId,
    pub owner: OwnerId,
    pub balance: Balance,
    pub version: u64,
    /// Newest first.
    pub transactions: Vec<TransactionRecord>,
}

/// One account's balance plus the machinery that serializes its mutations.
#[derive(Debug)]
pub struct LedgerAccount<L> {
    id: AccountId,
    owner: OwnerId,
    config: LedgerConfig,
    /// Held for the whole operation under `ConcurrencyStrategy::Mutex`.
    serial: Mutex<()>,
    /// Live state. Write-locked only for the append+apply step.
    state: RwLock<Account>,
    /// Last committed state, replaced while `state` is still write-locked.
    published: ArcSwap<Account>,
    log: L,
}

enum Attempt {
    Committed(TransactionRecord),
    Stale,
}

impl<L> LedgerAccount<L>
where
    L: TransactionLog,
{
    /// Wrap a freshly opened account. Its log stream must be empty.
    pub fn open(account: Account, log: L, config: LedgerConfig) -> Result<Self, LedgerError> {
        let existing = log.stream_version(account.id_typed())?;
        if existing != account.version() {
            return Err(LedgerError::Invariant(format!(
                "account {} is at version {} but its log holds {existing} records",
                account.id_typed(),
                account.version()
            )));
        }

        Ok(Self::from_parts(account, log, config))
    }

    /// Rebuild an account from its opening balance and the records in `log`.
    pub fn restore(
        id: AccountId,
        owner: OwnerId,
        opening_balance: Balance,
        log: L,
        config: LedgerConfig,
    ) -> Result<Self, LedgerError> {
        let history = log.list_by_account(id)?;
        let account = Account::rehydrate(id, owner, opening_balance, &history)?;
        Ok(Self::from_parts(account, log, config))
    }

    fn from_parts(account: Account, log: L, config: LedgerConfig) -> Self {
        Self {
            id: account.id_typed(),
            owner: account.owner(),
            config,
            serial: Mutex::new(()),
            published: ArcSwap::from_pointee(account.clone()),
            state: RwLock::new(account),
            log,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn strategy(&self) -> ConcurrencyStrategy {
        self.config.strategy
    }

    /// Current committed balance.
    pub fn balance(&self) -> Balance {
        self.published.load().balance()
    }

    /// Number of committed transactions.
    pub fn version(&self) -> u64 {
        self.published.load().version()
    }

    pub fn deposit(&self, amount: Amount) -> Result<Receipt, LedgerError> {
        self.execute(TransactionKind::Deposit, amount, self.config.default_timeout)
    }

    pub fn withdraw(&self, amount: Amount) -> Result<Receipt, LedgerError> {
        self.execute(TransactionKind::Withdraw, amount, self.config.default_timeout)
    }

    /// Deposit, giving up cleanly if the commit point is not reached within `timeout`.
    pub fn deposit_within(&self, amount: Amount, timeout: Duration) -> Result<Receipt, LedgerError> {
        self.execute(TransactionKind::Deposit, amount, Some(timeout))
    }

    /// Withdraw, giving up cleanly if the commit point is not reached within `timeout`.
    pub fn withdraw_within(&self, amount: Amount, timeout: Duration) -> Result<Receipt, LedgerError> {
        self.execute(TransactionKind::Withdraw, amount, Some(timeout))
    }

    /// This account's records, newest first, consistent with `balance()`.
    pub fn transactions(&self) -> Result<Vec<TransactionRecord>, LedgerError> {
        Ok(self.statement()?.transactions)
    }

    pub fn statement(&self) -> Result<Statement, LedgerError> {
        let state = self.state.read();
        let transactions = self.log.list_by_account(self.id)?;
        if transactions.len() as u64 != state.version() {
            return Err(LedgerError::Invariant(format!(
                "account {} is at version {} but its log holds {} records",
                self.id,
                state.version(),
                transactions.len()
            )));
        }

        Ok(Statement {
            account_id: self.id,
            owner: self.owner,
            balance: state.balance(),
            version: state.version(),
            transactions,
        })
    }

    /// Replay the log from the opening balance and compare with live state.
    pub fn reconcile(&self) -> Result<Statement, LedgerError> {
        let state = self.state.read();
        let history = self.log.list_by_account(self.id)?;
        let rebuilt = Account::rehydrate(self.id, self.owner, state.opening_balance(), &history)?;

        if rebuilt.balance() != state.balance() || rebuilt.version() != state.version() {
            return Err(LedgerError::Invariant(format!(
                "live balance {} (v{}) differs from replayed {} (v{})",
                state.balance(),
                state.version(),
                rebuilt.balance(),
                rebuilt.version()
            )));
        }

        Ok(Statement {
            account_id: self.id,
            owner: self.owner,
            balance: state.balance(),
            version: state.version(),
            transactions: history,
        })
    }

    #[instrument(
        skip(self),
        fields(account_id = %self.id, strategy = %self.config.strategy)
    )]
    fn execute(
        &self,
        kind: TransactionKind,
        amount: Amount,
        timeout: Option<Duration>,
    ) -> Result<Receipt, LedgerError> {
        let started = Instant::now();
        let deadline = Deadline::new(started, timeout);
        let transaction_id = TransactionId::new();

        let outcome = match self.config.strategy {
            ConcurrencyStrategy::Mutex => self.execute_exclusive(kind, amount, transaction_id, &deadline),
            ConcurrencyStrategy::Optimistic => {
                self.execute_optimistic(kind, amount, transaction_id, &deadline)
            }
        };

        match &outcome {
            Ok(record) => info!(
                transaction_id = %record.id,
                kind = %record.kind,
                amount = %record.amount,
                balance = %record.balance_after,
                sequence = record.sequence,
                "transaction committed"
            ),
            Err(LedgerError::InsufficientFunds { available, .. }) => debug!(
                %kind,
                %amount,
                available = %available,
                "withdrawal rejected"
            ),
            Err(err) if err.is_transient() => warn!(%kind, %amount, error = %err, "operation abandoned"),
            Err(err) => warn!(%kind, %amount, error = %err, "operation failed"),
        }

        outcome.map(|record| Receipt::from(&record))
    }

    fn execute_exclusive(
        &self,
        kind: TransactionKind,
        amount: Amount,
        transaction_id: TransactionId,
        deadline: &Deadline,
    ) -> Result<TransactionRecord, LedgerError> {
        let _serial = deadline.lock(&self.serial)?;

        match self.attempt(kind, amount, transaction_id, deadline)? {
            Attempt::Committed(record) => Ok(record),
            // Nobody else can commit while the account lock is held.
            Attempt::Stale => Err(LedgerError::Invariant(format!(
                "account {} changed while exclusively locked",
                self.id
            ))),
        }
    }

    fn execute_optimistic(
        &self,
        kind: TransactionKind,
        amount: Amount,
        transaction_id: TransactionId,
        deadline: &Deadline,
    ) -> Result<TransactionRecord, LedgerError> {
        let max_attempts = self.config.max_retries.max(1);

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                deadline.check()?;
            }
            match self.attempt(kind, amount, transaction_id, deadline)? {
                Attempt::Committed(record) => return Ok(record),
                Attempt::Stale => {
                    debug!(attempt, max_attempts, "version moved under us; retrying");
                    std::thread::yield_now();
                }
            }
        }

        Err(LedgerError::Contention {
            attempts: max_attempts,
        })
    }

    /// One read-decide-commit pass.
    fn attempt(
        &self,
        kind: TransactionKind,
        amount: Amount,
        transaction_id: TransactionId,
        deadline: &Deadline,
    ) -> Result<Attempt, LedgerError> {
        let command = command(kind, transaction_id, amount);

        let prepared = {
            let snapshot = self.published.load();
            Commit::prepare(&snapshot, &command).map_err(LedgerError::from)?
        };

        let mut live = match deadline.write(&self.state) {
            Ok(live) => live,
            Err(err) => {
                prepared.rollback();
                return Err(err);
            }
        };

        match prepared.commit(&self.log, &mut live) {
            Ok(record) => {
                self.published.store(Arc::new(live.clone()));
                Ok(Attempt::Committed(record))
            }
            Err(CommitError::Stale { .. }) => Ok(Attempt::Stale),
            Err(CommitError::Log(err)) => Err(LedgerError::Storage(err)),
        }
    }
}

fn command(kind: TransactionKind, transaction_id: TransactionId, amount: Amount) -> AccountCommand {
    let occurred_at = Utc::now();
    match kind {
        TransactionKind::Deposit => AccountCommand::Deposit(Deposit {
            transaction_id,
            amount,
            occurred_at,
        }),
        TransactionKind::Withdraw => AccountCommand::Withdraw(Withdraw {
            transaction_id,
            amount,
            occurred_at,
        }),
    }
}

/// Caller-supplied time budget for reaching the commit point.
///
/// Every lock acquisition on the way to the commit is bounded by what is left
/// of the budget. Once the write lock is held, the commit runs to completion.
struct Deadline {
    started: Instant,
    at: Option<Instant>,
}

impl Deadline {
    fn new(started: Instant, timeout: Option<Duration>) -> Self {
        Self {
            started,
            at: timeout.map(|t| started + t),
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    fn expired(&self) -> LedgerError {
        LedgerError::Timeout {
            waited: self.started.elapsed(),
        }
    }

    fn check(&self) -> Result<(), LedgerError> {
        match self.remaining() {
            Some(left) if left.is_zero() => Err(self.expired()),
            _ => Ok(()),
        }
    }

    fn lock<'a>(&self, mutex: &'a Mutex<()>) -> Result<MutexGuard<'a, ()>, LedgerError> {
        match self.remaining() {
            None => Ok(mutex.lock()),
            Some(left) => mutex.try_lock_for(left).ok_or_else(|| self.expired()),
        }
    }

    fn write<'a>(
        &self,
        lock: &'a RwLock<Account>,
    ) -> Result<RwLockWriteGuard<'a, Account>, LedgerError> {
        match self.remaining() {
            None => Ok(lock.write()),
            Some(left) => lock.try_write_for(left).ok_or_else(|| self.expired()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::transaction_log::{InMemoryTransactionLog, LogError};
    use coffer_core::ExpectedVersion;

    fn amount(s: &str) -> Amount {
        Amount::parse(s).unwrap()
    }

    fn balance(s: &str) -> Balance {
        Balance::parse(s).unwrap()
    }

    fn ledger(
        opening: &str,
        strategy: ConcurrencyStrategy,
    ) -> LedgerAccount<Arc<InMemoryTransactionLog>> {
        let account = Account::open(AccountId::new(), OwnerId::new(), balance(opening));
        let config = LedgerConfig::default().with_strategy(strategy);
        LedgerAccount::open(account, Arc::new(InMemoryTransactionLog::new()), config).unwrap()
    }

    /// Log that can be switched into a failing mode.
    #[derive(Default)]
    struct FlakyLog {
        inner: InMemoryTransactionLog,
        failing: AtomicBool,
    }

    impl TransactionLog for FlakyLog {
        fn append(
            &self,
            record: TransactionRecord,
            expected_version: ExpectedVersion,
        ) -> Result<TransactionRecord, LogError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LogError::Unavailable("injected failure".to_string()));
            }
            self.inner.append(record, expected_version)
        }

        fn list_by_account(&self, account_id: AccountId) -> Result<Vec<TransactionRecord>, LogError> {
            self.inner.list_by_account(account_id)
        }

        fn stream_version(&self, account_id: AccountId) -> Result<u64, LogError> {
            self.inner.stream_version(account_id)
        }
    }

    const STRATEGIES: [ConcurrencyStrategy; 2] =
        [ConcurrencyStrategy::Mutex, ConcurrencyStrategy::Optimistic];

    #[test]
    fn deposit_returns_new_balance_and_records_it() {
        for strategy in STRATEGIES {
            let account = ledger("100.00", strategy);

            let receipt = account.deposit(amount("50.00")).unwrap();

            assert_eq!(receipt.new_balance, balance("150.00"));
            assert_eq!(receipt.kind, TransactionKind::Deposit);
            assert_eq!(account.balance(), balance("150.00"));

            let records = account.transactions().unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].id, receipt.transaction_id);
            assert_eq!(records[0].amount, amount("50.00"));
        }
    }

    #[test]
    fn withdraw_returns_new_balance_and_records_it() {
        for strategy in STRATEGIES {
            let account = ledger("100.00", strategy);

            let receipt = account.withdraw(amount("40.00")).unwrap();

            assert_eq!(receipt.new_balance, balance("60.00"));
            let records = account.transactions().unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].kind, TransactionKind::Withdraw);
            assert_eq!(records[0].amount, amount("40.00"));
        }
    }

    #[test]
    fn overdraw_leaves_state_untouched() {
        for strategy in STRATEGIES {
            let account = ledger("100.00", strategy);

            let err = account.withdraw(amount("150.00")).unwrap_err();

            assert_eq!(
                err,
                LedgerError::InsufficientFunds {
                    requested: amount("150.00"),
                    available: balance("100.00"),
                }
            );
            assert_eq!(account.balance(), balance("100.00"));
            assert!(account.transactions().unwrap().is_empty());
        }
    }

    #[test]
    fn balance_reads_are_stable_without_mutation() {
        let account = ledger("100.00", ConcurrencyStrategy::Mutex);
        account.deposit(amount("0.01")).unwrap();
        assert_eq!(account.balance(), account.balance());
        assert_eq!(account.version(), 1);
    }

    #[test]
    fn balance_is_readable_while_a_commit_holds_the_state() {
        for strategy in STRATEGIES {
            let account = ledger("100.00", strategy);
            account.deposit(amount("25.00")).unwrap();

            let held = account.state.write();
            std::thread::scope(|scope| {
                let reader = scope.spawn(|| (account.balance(), account.version()));
                assert_eq!(reader.join().unwrap(), (balance("125.00"), 1));
            });
            drop(held);

            account.withdraw(amount("5.00")).unwrap();
            assert_eq!(account.balance(), balance("120.00"));
            assert_eq!(account.version(), 2);
        }
    }

    #[test]
    fn receipt_and_statement_serialize_amounts_as_strings() {
        let account = ledger("100.00", ConcurrencyStrategy::Mutex);
        let receipt = account.withdraw(amount("12.50")).unwrap();

        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["kind"], "withdraw");
        assert_eq!(json["amount"], "12.50");
        assert_eq!(json["new_balance"], "87.50");
        assert_eq!(serde_json::from_value::<Receipt>(json).unwrap(), receipt);

        let statement = account.statement().unwrap();
        let json = serde_json::to_string(&statement).unwrap();
        assert_eq!(serde_json::from_str::<Statement>(&json).unwrap(), statement);
    }

    #[test]
    fn transactions_are_listed_newest_first() {
        let account = ledger("100.00", ConcurrencyStrategy::Mutex);
        account.deposit(amount("1.00")).unwrap();
        account.withdraw(amount("2.00")).unwrap();
        account.deposit(amount("3.00")).unwrap();

        let sequences: Vec<u64> = account
            .transactions()
            .unwrap()
            .iter()
            .map(|r| r.sequence)
            .collect();
        assert_eq!(sequences, vec![3, 2, 1]);
    }

    #[test]
    fn storage_failure_commits_neither_side() {
        for strategy in STRATEGIES {
            let log = Arc::new(FlakyLog::default());
            let account = LedgerAccount::open(
                Account::open(AccountId::new(), OwnerId::new(), balance("100.00")),
                log.clone(),
                LedgerConfig::default().with_strategy(strategy),
            )
            .unwrap();

            log.failing.store(true, Ordering::SeqCst);
            let err = account.deposit(amount("50.00")).unwrap_err();
            assert!(matches!(err, LedgerError::Storage(LogError::Unavailable(_))));
            assert_eq!(account.balance(), balance("100.00"));
            assert_eq!(account.version(), 0);

            log.failing.store(false, Ordering::SeqCst);
            account.deposit(amount("50.00")).unwrap();
            assert_eq!(account.balance(), balance("150.00"));
            account.reconcile().unwrap();
        }
    }

    #[test]
    fn mutex_strategy_times_out_while_account_is_held() {
        let account = ledger("100.00", ConcurrencyStrategy::Mutex);
        let _held = account.serial.lock();

        let err = account
            .withdraw_within(amount("10.00"), Duration::from_millis(20))
            .unwrap_err();

        assert!(matches!(err, LedgerError::Timeout { .. }));
        assert_eq!(account.balance(), balance("100.00"));
        assert_eq!(account.version(), 0);
    }

    #[test]
    fn optimistic_strategy_times_out_while_state_is_write_locked() {
        let account = ledger("100.00", ConcurrencyStrategy::Optimistic);
        let _held = account.state.write();

        let err = account
            .deposit_within(amount("10.00"), Duration::from_millis(20))
            .unwrap_err();

        assert!(err.is_transient());
        drop(_held);
        assert_eq!(account.balance(), balance("100.00"));
        assert!(account.transactions().unwrap().is_empty());
    }

    #[test]
    fn zero_timeout_never_commits_under_contention() {
        let account = ledger("100.00", ConcurrencyStrategy::Mutex);
        let held = account.serial.lock();
        assert!(matches!(
            account.deposit_within(amount("1.00"), Duration::ZERO),
            Err(LedgerError::Timeout { .. })
        ));
        drop(held);
        assert!(account.deposit_within(amount("1.00"), Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn held_account_does_not_block_another_account_on_the_same_log() {
        let log = Arc::new(InMemoryTransactionLog::new());
        let open = |opening: &str| {
            LedgerAccount::open(
                Account::open(AccountId::new(), OwnerId::new(), balance(opening)),
                log.clone(),
                LedgerConfig::default(),
            )
            .unwrap()
        };
        let busy = open("100.00");
        let idle = open("100.00");
        busy.deposit(amount("1.00")).unwrap();

        let _serial = busy.serial.lock();
        let _state = busy.state.write();

        let receipt = idle.withdraw_within(amount("10.00"), Duration::ZERO).unwrap();
        assert_eq!(receipt.new_balance, balance("90.00"));
    }

    #[test]
    fn restore_rebuilds_from_log() {
        let log = Arc::new(InMemoryTransactionLog::new());
        let id = AccountId::new();
        let owner = OwnerId::new();
        {
            let account = LedgerAccount::open(
                Account::open(id, owner, balance("100.00")),
                log.clone(),
                LedgerConfig::default(),
            )
            .unwrap();
            account.deposit(amount("50.00")).unwrap();
            account.withdraw(amount("30.00")).unwrap();
        }

        let restored =
            LedgerAccount::restore(id, owner, balance("100.00"), log, LedgerConfig::default()).unwrap();

        assert_eq!(restored.balance(), balance("120.00"));
        assert_eq!(restored.version(), 2);
        restored.withdraw(amount("120.00")).unwrap();
        assert_eq!(restored.balance(), Balance::ZERO);
    }

    #[test]
    fn open_refuses_account_with_existing_history() {
        let log = Arc::new(InMemoryTransactionLog::new());
        let id = AccountId::new();
        let owner = OwnerId::new();
        let first = LedgerAccount::open(
            Account::open(id, owner, balance("10.00")),
            log.clone(),
            LedgerConfig::default(),
        )
        .unwrap();
        first.deposit(amount("1.00")).unwrap();

        let err = LedgerAccount::open(
            Account::open(id, owner, balance("10.00")),
            log,
            LedgerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::Invariant(_)));
    }

    #[test]
    fn reconcile_matches_live_state() {
        let account = ledger("0.00", ConcurrencyStrategy::Optimistic);
        account.deposit(amount("10.00")).unwrap();
        account.withdraw(amount("4.50")).unwrap();

        let statement = account.reconcile().unwrap();
        assert_eq!(statement.balance, balance("5.50"));
        assert_eq!(statement.version, 2);
        assert_eq!(statement.transactions.len(), 2);
    }
}
