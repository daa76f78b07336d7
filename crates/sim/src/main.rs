use std::sync::Arc;

use anyhow::{Context, bail};

use coffer_infra::{AccountRegistry, InMemoryTransactionLog, LedgerConfig};
use coffer_sim::SimConfig;

fn main() -> anyhow::Result<()> {
    let sim = SimConfig::from_env().context("invalid simulation settings")?;
    coffer_observability::init_with(sim.log_format);

    let ledger = LedgerConfig::from_env();
    tracing::info!(
        strategy = %ledger.strategy,
        max_retries = ledger.max_retries,
        batches = sim.batches,
        withdraws_per_batch = sim.withdraws_per_batch,
        deposits_per_batch = sim.deposits_per_batch,
        "starting race simulation"
    );

    let registry = AccountRegistry::new(Arc::new(InMemoryTransactionLog::new()), ledger);
    let report = coffer_sim::run(&registry, &sim).context("simulation aborted")?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_sound() {
        bail!("ledger invariants violated: {report:?}");
    }
    Ok(())
}
