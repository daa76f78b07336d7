//! Ledger configuration.

use core::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// How an account serializes concurrent mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyStrategy {
    /// One exclusive lock per account, held from the balance read through the
    /// log append.
    #[default]
    Mutex,
    /// Decide against a versioned snapshot, commit only if the version is
    /// unchanged, retry otherwise.
    Optimistic,
}

impl FromStr for ConcurrencyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mutex" => Ok(ConcurrencyStrategy::Mutex),
            "optimistic" => Ok(ConcurrencyStrategy::Optimistic),
            other => Err(format!("unknown concurrency strategy '{other}'")),
        }
    }
}

impl ConcurrencyStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConcurrencyStrategy::Mutex => "mutex",
            ConcurrencyStrategy::Optimistic => "optimistic",
        }
    }
}

impl core::fmt::Display for ConcurrencyStrategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime knobs shared by every account in a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub strategy: ConcurrencyStrategy,
    /// Maximum commit attempts per operation under `Optimistic`.
    pub max_retries: u32,
    /// Applied when the caller does not pass a timeout. `None` waits forever.
    pub default_timeout: Option<Duration>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            strategy: ConcurrencyStrategy::Mutex,
            max_retries: 64,
            default_timeout: None,
        }
    }
}

impl LedgerConfig {
    pub const STRATEGY_VAR: &'static str = "COFFER_STRATEGY";
    pub const MAX_RETRIES_VAR: &'static str = "COFFER_MAX_RETRIES";
    pub const TIMEOUT_MS_VAR: &'static str = "COFFER_TIMEOUT_MS";

    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Malformed values are logged and replaced by their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let strategy = parse_or(&lookup, Self::STRATEGY_VAR, defaults.strategy);
        let max_retries = parse_or(&lookup, Self::MAX_RETRIES_VAR, defaults.max_retries).max(1);
        let default_timeout = lookup(Self::TIMEOUT_MS_VAR)
            .and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(e) => {
                    warn!(var = Self::TIMEOUT_MS_VAR, value = %raw, error = %e, "ignoring malformed setting");
                    None
                }
            })
            .or(defaults.default_timeout);

        Self {
            strategy,
            max_retries,
            default_timeout,
        }
    }

    pub fn with_strategy(mut self, strategy: ConcurrencyStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|e: T::Err| {
            warn!(var = key, value = %raw, error = %e, "ignoring malformed setting");
            default
        }),
    }
}
