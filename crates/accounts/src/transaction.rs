use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use coffer_core::{AccountId, Amount, Balance, DomainResult, TransactionId};

/// Direction of a committed balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
}

impl TransactionKind {
    /// Apply this kind of movement of `amount` to `balance`.
    pub fn apply_to(self, balance: Balance, amount: Amount) -> DomainResult<Balance> {
        match self {
            TransactionKind::Deposit => balance.checked_add(amount),
            TransactionKind::Withdraw => balance.checked_sub(amount),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdraw => "withdraw",
        }
    }
}

impl core::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed deposit or withdrawal (immutable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub account_id: AccountId,
    /// Position in the account's history, starting at 1. Equals the account
    /// version right after this record was applied.
    pub sequence: u64,
    pub kind: TransactionKind,
    pub amount: Amount,
    /// Account balance right after this record was applied.
    pub balance_after: Balance,
    pub created_at: DateTime<Utc>,
}

/// Order records the canonical read way: newest first.
///
/// `sequence` breaks ties between equal timestamps.
pub fn newest_first(records: &mut [TransactionRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.sequence.cmp(&a.sequence))
    });
}
