//! Account registry: provisioning and the collaborator-facing surface.
//!
//! Outside layers (HTTP, auth) resolve the caller to an `AccountId` and call
//! `deposit`/`withdraw`/`balance` here with the raw amount text. Amounts are
//! validated before the account's serialization point is touched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use coffer_accounts::Account;
use coffer_core::{AccountId, Amount, Balance, OwnerId};

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::ledger_account::{LedgerAccount, Receipt};
use crate::transaction_log::TransactionLog;

#[derive(Debug)]
struct Accounts<L> {
    by_id: HashMap<AccountId, Arc<LedgerAccount<L>>>,
    by_owner: HashMap<OwnerId, AccountId>,
}

/// Lookup table from account identity to its `LedgerAccount`.
///
/// The registry lock is only held to find or insert an account, never while an
/// operation runs, so accounts do not contend with each other through it.
#[derive(Debug)]
pub struct AccountRegistry<L> {
    config: LedgerConfig,
    log: L,
    accounts: RwLock<Accounts<L>>,
}

impl<L> AccountRegistry<L>
where
    L: TransactionLog + Clone,
{
    pub fn new(log: L, config: LedgerConfig) -> Self {
        Self {
            config,
            log,
            accounts: RwLock::new(Accounts {
                by_id: HashMap::new(),
                by_owner: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Provision the single account of `owner`.
    pub fn open_account(
        &self,
        owner: OwnerId,
        opening_balance: Balance,
    ) -> Result<Arc<LedgerAccount<L>>, LedgerError> {
        let id = AccountId::new();
        self.insert(owner, || {
            LedgerAccount::open(
                Account::open(id, owner, opening_balance),
                self.log.clone(),
                self.config.clone(),
            )
        })
    }

    /// Re-register an account whose history already lives in the log.
    pub fn restore_account(
        &self,
        id: AccountId,
        owner: OwnerId,
        opening_balance: Balance,
    ) -> Result<Arc<LedgerAccount<L>>, LedgerError> {
        self.insert(owner, || {
            LedgerAccount::restore(
                id,
                owner,
                opening_balance,
                self.log.clone(),
                self.config.clone(),
            )
        })
    }

    fn insert(
        &self,
        owner: OwnerId,
        build: impl FnOnce() -> Result<LedgerAccount<L>, LedgerError>,
    ) -> Result<Arc<LedgerAccount<L>>, LedgerError> {
        if self.accounts.read().by_owner.contains_key(&owner) {
            return Err(LedgerError::OwnerAlreadyProvisioned(owner));
        }

        // Restoring replays the whole log; keep that outside the registry lock.
        let account = Arc::new(build()?);

        let mut accounts = self.accounts.write();
        if accounts.by_owner.contains_key(&owner) {
            return Err(LedgerError::OwnerAlreadyProvisioned(owner));
        }
        if accounts.by_id.contains_key(&account.id()) {
            return Err(LedgerError::Invariant(format!(
                "account {} is already registered",
                account.id()
            )));
        }
        accounts.by_owner.insert(owner, account.id());
        accounts.by_id.insert(account.id(), account.clone());
        drop(accounts);

        info!(
            account_id = %account.id(),
            owner = %owner,
            balance = %account.balance(),
            version = account.version(),
            "account registered"
        );
        Ok(account)
    }

    pub fn account(&self, id: AccountId) -> Result<Arc<LedgerAccount<L>>, LedgerError> {
        self.accounts
            .read()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(LedgerError::NotFound)
    }

    pub fn account_for_owner(&self, owner: OwnerId) -> Result<Arc<LedgerAccount<L>>, LedgerError> {
        let accounts = self.accounts.read();
        accounts
            .by_owner
            .get(&owner)
            .and_then(|id| accounts.by_id.get(id))
            .cloned()
            .ok_or(LedgerError::NotFound)
    }

    pub fn len(&self) -> usize {
        self.accounts.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deposit(&self, account: AccountId, amount: &str) -> Result<Receipt, LedgerError> {
        let amount = Amount::parse(amount)?;
        self.account(account)?.deposit(amount)
    }

    pub fn withdraw(&self, account: AccountId, amount: &str) -> Result<Receipt, LedgerError> {
        let amount = Amount::parse(amount)?;
        self.account(account)?.withdraw(amount)
    }

    pub fn deposit_within(
        &self,
        account: AccountId,
        amount: &str,
        timeout: Duration,
    ) -> Result<Receipt, LedgerError> {
        let amount = Amount::parse(amount)?;
        self.account(account)?.deposit_within(amount, timeout)
    }

    pub fn withdraw_within(
        &self,
        account: AccountId,
        amount: &str,
        timeout: Duration,
    ) -> Result<Receipt, LedgerError> {
        let amount = Amount::parse(amount)?;
        self.account(account)?.withdraw_within(amount, timeout)
    }

    pub fn balance(&self, account: AccountId) -> Result<Balance, LedgerError> {
        Ok(self.account(account)?.balance())
    }
}
