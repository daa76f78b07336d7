use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coffer_core::{
    AccountId, Aggregate, AggregateRoot, Amount, Balance, DomainError, DomainResult, OwnerId,
    TransactionId,
};

use crate::transaction::{TransactionKind, TransactionRecord};

/// Aggregate root: Account.
///
/// Holds the single authoritative balance of one owner. State only changes by
/// applying `TransactionRecord`s produced by `handle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    owner: OwnerId,
    opening_balance: Balance,
    balance: Balance,
    version: u64,
    last_committed_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Provision a fresh account with its opening balance.
    pub fn open(id: AccountId, owner: OwnerId, opening_balance: Balance) -> Self {
        Self {
            id,
            owner,
            opening_balance,
            balance: opening_balance,
            version: 0,
            last_committed_at: None,
        }
    }

    /// Rebuild an account from its opening balance and committed history.
    ///
    /// `records` may be in any order. Every record must belong to this account,
    /// sequences must be contiguous from 1, and each stored `balance_after`
    /// must equal the balance recomputed from the amounts.
    pub fn rehydrate(
        id: AccountId,
        owner: OwnerId,
        opening_balance: Balance,
        records: &[TransactionRecord],
    ) -> DomainResult<Self> {
        let mut sorted: Vec<&TransactionRecord> = records.iter().collect();
        sorted.sort_by_key(|r| r.sequence);

        let mut account = Self::open(id, owner, opening_balance);
        for record in sorted {
            if record.account_id != id {
                return Err(DomainError::invariant(format!(
                    "record {} belongs to account {}",
                    record.id, record.account_id
                )));
            }
            if record.sequence != account.version + 1 {
                return Err(DomainError::invariant(format!(
                    "sequence gap: expected {}, found {}",
                    account.version + 1,
                    record.sequence
                )));
            }
            let recomputed = record.kind.apply_to(account.balance, record.amount)?;
            if recomputed != record.balance_after {
                return Err(DomainError::invariant(format!(
                    "record {} claims balance {}, history gives {}",
                    record.id, record.balance_after, recomputed
                )));
            }
            account.apply(record);
        }

        Ok(account)
    }

    pub fn id_typed(&self) -> AccountId {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn opening_balance(&self) -> Balance {
        self.opening_balance
    }

    pub fn balance(&self) -> Balance {
        self.balance
    }

    pub fn last_committed_at(&self) -> Option<DateTime<Utc>> {
        self.last_committed_at
    }
}

impl AggregateRoot for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: Deposit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Withdraw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdraw {
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    Deposit(Deposit),
    Withdraw(Withdraw),
}

impl AccountCommand {
    pub fn deposit(amount: Amount, occurred_at: DateTime<Utc>) -> Self {
        AccountCommand::Deposit(Deposit {
            transaction_id: TransactionId::new(),
            amount,
            occurred_at,
        })
    }

    pub fn withdraw(amount: Amount, occurred_at: DateTime<Utc>) -> Self {
        AccountCommand::Withdraw(Withdraw {
            transaction_id: TransactionId::new(),
            amount,
            occurred_at,
        })
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            AccountCommand::Deposit(_) => TransactionKind::Deposit,
            AccountCommand::Withdraw(_) => TransactionKind::Withdraw,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            AccountCommand::Deposit(c) => c.amount,
            AccountCommand::Withdraw(c) => c.amount,
        }
    }
}

impl Aggregate for Account {
    type Command = AccountCommand;
    type Event = TransactionRecord;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        self.balance = event.balance_after;
        self.last_committed_at = Some(event.created_at);

        // Deterministic version tracking: +1 per applied record.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountCommand::Deposit(cmd) => self.handle_deposit(cmd),
            AccountCommand::Withdraw(cmd) => self.handle_withdraw(cmd),
        }
    }
}

impl Account {
    fn handle_deposit(&self, cmd: &Deposit) -> Result<Vec<TransactionRecord>, DomainError> {
        let balance_after = self.balance.checked_add(cmd.amount)?;
        Ok(vec![self.record(
            cmd.transaction_id,
            TransactionKind::Deposit,
            cmd.amount,
            balance_after,
            cmd.occurred_at,
        )])
    }

    fn handle_withdraw(&self, cmd: &Withdraw) -> Result<Vec<TransactionRecord>, DomainError> {
        if !self.balance.covers(cmd.amount) {
            return Err(DomainError::insufficient_funds(cmd.amount, self.balance));
        }
        let balance_after = self.balance.checked_sub(cmd.amount)?;
        Ok(vec![self.record(
            cmd.transaction_id,
            TransactionKind::Withdraw,
            cmd.amount,
            balance_after,
            cmd.occurred_at,
        )])
    }

    fn record(
        &self,
        id: TransactionId,
        kind: TransactionKind,
        amount: Amount,
        balance_after: Balance,
        occurred_at: DateTime<Utc>,
    ) -> TransactionRecord {
        // Commit time never runs backwards within one account.
        let created_at = match self.last_committed_at {
            Some(last) if last > occurred_at => last,
            _ => occurred_at,
        };
        TransactionRecord {
            id,
            account_id: self.id,
            sequence: self.version + 1,
            kind,
            amount,
            balance_after,
            created_at,
        }
    }
}
