//! Race harness: repeatedly fires concurrent withdrawals and deposits at one
//! account and checks the ledger afterwards.

use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use serde::Serialize;
use tracing::{info, warn};

use coffer_accounts::TransactionKind;
use coffer_core::{Balance, OwnerId};
use coffer_infra::{AccountRegistry, LedgerAccount, LedgerError, Receipt, TransactionLog};

use crate::config::SimConfig;

/// Outcome of one harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimReport {
    pub strategy: String,
    pub batches: usize,
    pub deposits_committed: u64,
    pub withdrawals_committed: u64,
    pub rejected_insufficient: u64,
    pub rejected_transient: u64,
    pub other_failures: u64,
    pub opening_balance: Balance,
    pub final_balance: Balance,
    /// Opening balance replayed through every committed receipt.
    pub expected_balance: Balance,
    pub balance_checks: u64,
    pub negative_observations: u64,
    /// The log replays to the live balance.
    pub reconciled: bool,
}

impl SimReport {
    pub fn is_sound(&self) -> bool {
        self.reconciled
            && self.other_failures == 0
            && self.negative_observations == 0
            && self.final_balance == self.expected_balance
            && !self.final_balance.is_negative()
    }
}

#[derive(Debug, Default)]
struct Tally {
    receipts: Vec<Receipt>,
    rejected_insufficient: u64,
    rejected_transient: u64,
    other_failures: u64,
}

impl Tally {
    fn record(&mut self, result: Result<Receipt, LedgerError>) {
        match result {
            Ok(receipt) => self.receipts.push(receipt),
            Err(LedgerError::InsufficientFunds { .. }) => self.rejected_insufficient += 1,
            Err(err) if err.is_transient() => self.rejected_transient += 1,
            Err(err) => {
                warn!(error = %err, "unexpected failure during race");
                self.other_failures += 1;
            }
        }
    }

    fn committed(&self, kind: TransactionKind) -> u64 {
        self.receipts.iter().filter(|r| r.kind == kind).count() as u64
    }
}

/// Open a fresh account in `registry` and race `config.batches` rounds
/// against it.
pub fn run<L>(registry: &AccountRegistry<L>, config: &SimConfig) -> Result<SimReport, LedgerError>
where
    L: TransactionLog + Clone,
{
    let account = registry.open_account(OwnerId::new(), config.opening_balance)?;
    let mut tally = Tally::default();

    let stop = AtomicBool::new(false);
    let checks = AtomicU64::new(0);
    let negatives = AtomicU64::new(0);

    thread::scope(|scope| {
        scope.spawn(|| {
            while !stop.load(Ordering::Acquire) {
                checks.fetch_add(1, Ordering::Relaxed);
                if account.balance().is_negative() {
                    negatives.fetch_add(1, Ordering::Relaxed);
                }
                thread::yield_now();
            }
        });

        for batch in 0..config.batches {
            for result in race_once(&account, config) {
                tally.record(result);
            }
            if (batch + 1) % 100 == 0 {
                info!(
                    batch = batch + 1,
                    balance = %account.balance(),
                    version = account.version(),
                    "race progress"
                );
            }
        }

        stop.store(true, Ordering::Release);
    });

    let mut expected = config.opening_balance;
    for receipt in &tally.receipts {
        expected = receipt.kind.apply_to(expected, receipt.amount)?;
    }

    let reconciled = match account.reconcile() {
        Ok(_) => true,
        Err(err) => {
            warn!(error = %err, "reconciliation failed");
            false
        }
    };

    let report = SimReport {
        strategy: account.strategy().to_string(),
        batches: config.batches,
        deposits_committed: tally.committed(TransactionKind::Deposit),
        withdrawals_committed: tally.committed(TransactionKind::Withdraw),
        rejected_insufficient: tally.rejected_insufficient,
        rejected_transient: tally.rejected_transient,
        other_failures: tally.other_failures,
        opening_balance: config.opening_balance,
        final_balance: account.balance(),
        expected_balance: expected,
        balance_checks: checks.load(Ordering::Relaxed),
        negative_observations: negatives.load(Ordering::Relaxed),
        reconciled,
    };

    info!(
        account_id = %account.id(),
        strategy = %report.strategy,
        final_balance = %report.final_balance,
        sound = report.is_sound(),
        "race finished"
    );
    Ok(report)
}

/// Release every withdrawal and deposit of one batch at the same instant.
fn race_once<L>(account: &LedgerAccount<L>, config: &SimConfig) -> Vec<Result<Receipt, LedgerError>>
where
    L: TransactionLog,
{
    let workers = config.withdraws_per_batch + config.deposits_per_batch;
    let barrier = Barrier::new(workers);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|i| {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    if i < config.withdraws_per_batch {
                        account.withdraw(config.withdraw_amount)
                    } else {
                        account.deposit(config.deposit_amount)
                    }
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(LedgerError::Invariant("worker thread panicked".to_string())))
            })
            .collect()
    })
}
