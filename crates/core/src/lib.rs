//! `coffer-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no locking, no IO).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, OwnerId, TransactionId};
pub use money::{Amount, Balance};
