//! Ledger reconciliation binary
//!
//! Reads the configured ledger, reconciles it, and writes the result.

use anyhow::Context;
use points_ledger::{Config, JsonFileStore, Reconciler};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        input = %config.input_path.display(),
        output = %config.output_path.display(),
        "Reconciling points ledger"
    );

    let source = JsonFileStore::new(&config.input_path);
    let mut sink = JsonFileStore::new(&config.output_path);

    let reconciler = Reconciler::new(config.allocation.clone());
    let report = reconciler
        .run(&source, &mut sink)
        .with_context(|| format!("reconciling {}", config.input_path.display()))?;

    for (category, value) in &report.remaining_after {
        tracing::info!(
            category = %category,
            remaining = value,
            badge_only = report.badge_only_points.get(category).copied().unwrap_or(0),
            redistributed = report.allocated(category),
            "Sanity check passed"
        );
    }

    for (year, total) in &report.timeline.by_year {
        tracing::info!(year, total, "Points per year");
    }

    tracing::info!("Fixed ledger saved as {}", config.output_path.display());
    Ok(())
}
