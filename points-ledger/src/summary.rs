//! Yearly and monthly roll-ups of a ledger history

use crate::types::{CategoryPoints, HistoryEntry};
use chrono::Datelike;
use std::collections::BTreeMap;

/// Points gained grouped by period
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineSummary {
    /// Total gained per year
    pub by_year: BTreeMap<i32, i64>,

    /// Total gained per month, keyed `YYYY-MM`
    pub by_month: BTreeMap<String, i64>,

    /// Total gained per category across the whole history
    pub by_category: CategoryPoints,
}

impl TimelineSummary {
    /// Sum of every entry's `totalGained`, saturating at the `i64` bounds
    pub fn grand_total(&self) -> i64 {
        self.by_year.values().fold(0i64, |acc, v| acc.saturating_add(*v))
    }
}

// Roll-ups are diagnostic, so they saturate instead of failing
fn add_to<K: Ord>(map: &mut BTreeMap<K, i64>, key: K, points: i64) {
    let slot = map.entry(key).or_insert(0);
    *slot = slot.saturating_add(points);
}

/// Roll `history` up by year, month, and category
pub fn summarize(history: &[HistoryEntry]) -> TimelineSummary {
    let mut summary = TimelineSummary::default();

    for entry in history {
        add_to(&mut summary.by_year, entry.date.year(), entry.total_gained);
        add_to(
            &mut summary.by_month,
            entry.date.format("%Y-%m").to_string(),
            entry.total_gained,
        );

        for (category, points) in &entry.points_breakdown {
            add_to(&mut summary.by_category, category.clone(), *points);
        }
    }

    summary
}
