//! Snapshot tracking binary
//!
//! Folds the snapshot at `LEDGER_SNAPSHOT` into the configured input ledger.

use anyhow::Context;
use points_ledger::{
    summarize, track_snapshot, Config, JsonFileStore, LedgerSink, PointsSnapshot,
};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::load().context("loading configuration")?;
    let snapshot_path =
        std::env::var("LEDGER_SNAPSHOT").context("LEDGER_SNAPSHOT must name a snapshot file")?;

    let raw = std::fs::read_to_string(&snapshot_path)
        .with_context(|| format!("reading snapshot {}", snapshot_path))?;
    let snapshot: PointsSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("parsing snapshot {}", snapshot_path))?;

    let mut store = JsonFileStore::new(&config.input_path);
    let mut document = store.load_or_default()?;

    let today = config.tracking.today()?;
    let summary = track_snapshot(&mut document, &snapshot, today)?;
    store.store(&document)?;

    tracing::info!(
        date = %summary.date,
        total_gained = summary.total_gained,
        new_badges = summary.new_badges.len(),
        "Ledger updated with new points and badges"
    );

    let timeline = summarize(&document.history);
    if let Some(month) = timeline.by_month.keys().next_back() {
        tracing::info!(month = %month, total = timeline.by_month[month], "Latest month");
    }
    Ok(())
}
