//! Errors surfaced by ledger operations.

use std::time::Duration;

use thiserror::Error;

use coffer_core::{Amount, Balance, DomainError, OwnerId};

use crate::transaction_log::LogError;

/// Outcome of a failed ledger operation.
///
/// Every rejection leaves the balance and the log exactly as they were.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is non-positive, non-numeric or too precise.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Withdrawal would drive the balance negative at its serialized turn.
    #[error("insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Amount, available: Balance },

    /// Optimistic retry budget exhausted; the caller may retry the operation.
    #[error("gave up after {attempts} conflicting attempts")]
    Contention { attempts: u32 },

    /// The operation did not reach its commit point before the deadline.
    #[error("timed out after {waited:?} before committing")]
    Timeout { waited: Duration },

    #[error("account not found")]
    NotFound,

    /// The owner is already bound to an account (one account per owner).
    #[error("owner {0} already has an account")]
    OwnerAlreadyProvisioned(OwnerId),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Appending the record failed; nothing was committed.
    #[error("storage failure: {0}")]
    Storage(#[from] LogError),

    /// Live state and durable history disagree.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl LedgerError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Contention { .. } | LedgerError::Timeout { .. })
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidAmount(msg) => LedgerError::InvalidAmount(msg),
            DomainError::InsufficientFunds {
                requested,
                available,
            } => LedgerError::InsufficientFunds {
                requested,
                available,
            },
            DomainError::InvariantViolation(msg) => LedgerError::Invariant(msg),
            DomainError::InvalidId(msg) => LedgerError::InvalidId(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_rejections() {
        let requested = Amount::from_cents(15_000).unwrap();
        let available = Balance::from_cents(10_000);
        assert_eq!(
            LedgerError::from(DomainError::insufficient_funds(requested, available)),
            LedgerError::InsufficientFunds {
                requested,
                available
            }
        );
        assert!(matches!(
            LedgerError::from(DomainError::invalid_amount("x")),
            LedgerError::InvalidAmount(_)
        ));
    }

    #[test]
    fn only_contention_and_timeout_are_transient() {
        assert!(LedgerError::Contention { attempts: 3 }.is_transient());
        assert!(
            LedgerError::Timeout {
                waited: Duration::from_millis(5)
            }
            .is_transient()
        );
        assert!(!LedgerError::NotFound.is_transient());
        assert!(!LedgerError::Storage(LogError::Unavailable("down".into())).is_transient());
    }
}
