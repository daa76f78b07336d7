use core::str::FromStr;

use thiserror::Error;

use coffer_core::{Amount, Balance};
use coffer_observability::LogFormat;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Shape of the simulated load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Withdrawal threads launched per batch.
    pub withdraws_per_batch: usize,
    /// Deposit threads launched per batch.
    pub deposits_per_batch: usize,
    pub batches: usize,
    pub opening_balance: Balance,
    pub withdraw_amount: Amount,
    pub deposit_amount: Amount,
    pub log_format: LogFormat,
}

impl SimConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            withdraws_per_batch: read(&lookup, "SIM_WITHDRAWS", "10", usize::from_str)?,
            deposits_per_batch: read(&lookup, "SIM_DEPOSITS", "5", usize::from_str)?,
            batches: read(&lookup, "SIM_BATCHES", "200", usize::from_str)?,
            opening_balance: read(&lookup, "SIM_INITIAL_BALANCE", "100.00", Balance::parse)?,
            withdraw_amount: read(&lookup, "SIM_WITHDRAW_AMOUNT", "60.00", Amount::parse)?,
            deposit_amount: read(&lookup, "SIM_DEPOSIT_AMOUNT", "50.00", Amount::parse)?,
            log_format: read(&lookup, "SIM_LOG_FORMAT", "pretty", LogFormat::from_str)?,
        })
    }
}

fn read<T, E>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<T, ConfigError>
where
    E: ToString,
{
    let raw = lookup(var).unwrap_or_else(|| default.to_string());
    parse(raw.trim()).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_mirror_the_classic_race() {
        let config = SimConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.withdraws_per_batch, 10);
        assert_eq!(config.deposits_per_batch, 5);
        assert_eq!(config.opening_balance.to_string(), "100.00");
        assert_eq!(config.withdraw_amount.to_string(), "60.00");
        assert_eq!(config.deposit_amount.to_string(), "50.00");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SimConfig::from_lookup(lookup(&[
            ("SIM_BATCHES", "3"),
            ("SIM_WITHDRAW_AMOUNT", "12.34"),
            ("SIM_LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.batches, 3);
        assert_eq!(config.withdraw_amount.to_string(), "12.34");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = SimConfig::from_lookup(lookup(&[("SIM_DEPOSIT_AMOUNT", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SIM_DEPOSIT_AMOUNT", .. }));

        let err = SimConfig::from_lookup(lookup(&[("SIM_DEPOSITS", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SIM_DEPOSITS", .. }));
    }
}
