//! Reconciliation engine
//!
//! Rebuilds a dated history from badge events and the remaining-points
//! snapshot.
//!
//! # Algorithm
//!
//! 1. Book every badge on its earned date under the badge category
//! 2. Subtract booked points from the snapshot, clamped at zero
//! 3. Spread what is left over the years the category earned badges
//!    (even split, remainder on the latest year), or onto the fallback
//!    date when the category never earned one
//! 4. Emit the history sorted by date, one entry per date
//!
//! Verification runs before anything is handed to the sink, so a ledger
//! that breaks the non-negative invariant is never persisted.
//!
//! # Example
//!
//! ```text
//! Snapshot:      Streaks = 10, Badge Points = 100
//! Badges:        2022-05-01, 2023-07-09, 2024-02-11  (30 each)
//!
//! Subtraction:   Badge Points 100 - 90 = 10, Streaks unchanged
//! Redistribute:  Badge Points 10 over {2022, 2023, 2024} -> 3, 3, 4
//!                Streaks 10, no badge years -> 2024-12-31
//! ```

use crate::{
    config::AllocationConfig,
    storage::{LedgerSink, LedgerSource},
    summary::{summarize, TimelineSummary},
    types::{year_end, CategoryPoints, HistoryEntry, LedgerDocument},
    Error, Result,
};
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Years in which each category earned at least one badge
pub type BadgeYears = BTreeMap<String, BTreeSet<i32>>;

/// History keyed by date
pub type HistoryMap = BTreeMap<NaiveDate, HistoryEntry>;

/// Points credited to one date during redistribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Date credited
    pub date: NaiveDate,
    /// Points credited
    pub points: i64,
}

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Badges booked in step 1
    pub badges_ingested: usize,

    /// Years each category was active
    pub badge_years: BadgeYears,

    /// Snapshot as read
    pub remaining_before: CategoryPoints,

    /// Snapshot after badge-point subtraction
    pub remaining_after: CategoryPoints,

    /// Points actually subtracted per category
    pub badge_only_points: CategoryPoints,

    /// Redistributed points per category
    pub allocations: BTreeMap<String, Vec<Allocation>>,

    /// Entries in the emitted history
    pub entry_count: usize,

    /// Yearly and monthly roll-up of the emitted history
    pub timeline: TimelineSummary,
}

impl ReconcileReport {
    /// Total redistributed for `category`
    pub fn allocated(&self, category: &str) -> i64 {
        self.allocations
            .get(category)
            .map(|a| a.iter().map(|a| a.points).sum())
            .unwrap_or(0)
    }
}

/// Reconciliation engine
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: AllocationConfig,
}

impl Reconciler {
    /// Create an engine with the given allocation rules
    pub fn new(config: AllocationConfig) -> Self {
        Self { config }
    }

    /// Allocation rules in use
    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    /// Load from `source`, reconcile, verify, then write to `sink`
    pub fn run<S, K>(&self, source: &S, sink: &mut K) -> Result<ReconcileReport>
    where
        S: LedgerSource + ?Sized,
        K: LedgerSink + ?Sized,
    {
        let mut document = source.load()?;
        let report = self.reconcile(&mut document)?;
        sink.store(&document)?;

        info!(
            entries = report.entry_count,
            badges = report.badges_ingested,
            "Reconciled ledger stored"
        );
        Ok(report)
    }

    /// Reconcile `document` in place
    ///
    /// On error the document is left untouched.
    pub fn reconcile(&self, document: &mut LedgerDocument) -> Result<ReconcileReport> {
        self.config.validate()?;
        document.validate()?;

        let mut history = index_history(document.history.clone())?;

        let badge_years = self.ingest_badges(document, &mut history)?;

        let remaining_before = document.last_recorded.categories.clone();
        info!(categories = ?remaining_before, "Remaining points before subtraction");

        let (remaining_after, badge_only_points) =
            subtract_badge_points(&history, &remaining_before);
        info!(remaining = ?remaining_after, "Remaining points after badge subtraction");

        let allocations = self.redistribute(&remaining_after, &badge_years, &mut history)?;

        verify(&remaining_after, &allocations)?;

        document.history = history.into_values().collect();

        Ok(ReconcileReport {
            badges_ingested: document.badges_earned.len(),
            badge_years,
            remaining_before,
            remaining_after,
            badge_only_points,
            allocations,
            entry_count: document.history.len(),
            timeline: summarize(&document.history),
        })
    }

    /// Step 1: book every badge on its earned date
    fn ingest_badges(
        &self,
        document: &LedgerDocument,
        history: &mut HistoryMap,
    ) -> Result<BadgeYears> {
        let category = self.config.badge_category.as_str();
        let value = self.config.badge_point_value;
        let mut badge_years = BadgeYears::new();

        for badge in &document.badges_earned {
            let earned_on = badge.earned_on()?;
            debug!(badge = %badge.name, date = %earned_on, points = value, "Badge earned");

            history
                .entry(earned_on)
                .or_insert_with(|| HistoryEntry::new(earned_on))
                .credit(category, value)?;

            badge_years
                .entry(category.to_string())
                .or_default()
                .insert(earned_on.year());
        }

        info!(
            badges = document.badges_earned.len(),
            "Badge-earned points booked"
        );
        Ok(badge_years)
    }

    /// Step 3: spread leftover points over badge years or the fallback date
    fn redistribute(
        &self,
        remaining: &CategoryPoints,
        badge_years: &BadgeYears,
        history: &mut HistoryMap,
    ) -> Result<BTreeMap<String, Vec<Allocation>>> {
        let mut allocations = BTreeMap::new();

        for (category, &total) in remaining {
            if total <= 0 {
                continue;
            }

            let targets: Vec<NaiveDate> = match badge_years.get(category) {
                Some(years) if !years.is_empty() => years
                    .iter()
                    .map(|&year| year_end(year))
                    .collect::<Result<_>>()?,
                _ => {
                    warn!(
                        category = %category,
                        points = total,
                        date = %self.config.fallback_date,
                        "No badge years for category, using fallback date"
                    );
                    vec![self.config.fallback_date]
                }
            };

            let shares = split_evenly(total, targets.len());
            debug!(category = %category, total, ?targets, ?shares, "Splitting remaining points");

            let mut credited = Vec::with_capacity(targets.len());
            for (date, points) in targets.into_iter().zip(shares) {
                history
                    .entry(date)
                    .or_insert_with(|| HistoryEntry::new(date))
                    .credit(category, points)?;
                credited.push(Allocation { date, points });
            }
            allocations.insert(category.clone(), credited);
        }

        Ok(allocations)
    }
}

/// Index entries by date, folding duplicate dates together
pub fn index_history(entries: Vec<HistoryEntry>) -> Result<HistoryMap> {
    let mut history = HistoryMap::new();
    for entry in entries {
        match history.get_mut(&entry.date) {
            Some(existing) => {
                warn!(date = %entry.date, "Duplicate history date, merging entries");
                existing.absorb(entry)?;
            }
            None => {
                history.insert(entry.date, entry);
            }
        }
    }
    Ok(history)
}

/// Step 2: subtract booked points from the snapshot without going below zero
///
/// Returns the remaining points and the amount actually subtracted per
/// category. Categories missing from the snapshot are ignored.
pub fn subtract_badge_points(
    history: &HistoryMap,
    snapshot: &CategoryPoints,
) -> (CategoryPoints, CategoryPoints) {
    let mut remaining = snapshot.clone();
    let mut subtracted: CategoryPoints = snapshot.keys().map(|k| (k.clone(), 0)).collect();

    for entry in history.values() {
        for (category, &points) in &entry.points_breakdown {
            let Some(left) = remaining.get_mut(category) else {
                continue;
            };
            let take = points.max(0).min((*left).max(0));
            debug!(
                category = %category,
                date = %entry.date,
                before = *left,
                take,
                "Subtracting booked points"
            );
            *left -= take;
            *subtracted.entry(category.clone()).or_insert(0) += take;
        }
    }

    (remaining, subtracted)
}

/// Split `total` into `slots` equal shares; the last share takes the remainder
pub fn split_evenly(total: i64, slots: usize) -> Vec<i64> {
    if slots == 0 {
        return Vec::new();
    }
    let count = slots as i64;
    let per_slot = total.div_euclid(count);
    let remainder = total.rem_euclid(count);

    let mut shares = vec![per_slot; slots];
    if let Some(last) = shares.last_mut() {
        *last += remainder;
    }
    shares
}

/// Step 5: remaining points are non-negative and fully redistributed
fn verify(
    remaining: &CategoryPoints,
    allocations: &BTreeMap<String, Vec<Allocation>>,
) -> Result<()> {
    for (category, &value) in remaining {
        if value < 0 {
            return Err(Error::InvariantViolation(format!(
                "{} has negative remaining points ({})",
                category, value
            )));
        }

        let allocated: i64 = allocations
            .get(category)
            .map(|a| a.iter().map(|a| a.points).sum())
            .unwrap_or(0);
        if allocated != value {
            return Err(Error::InvariantViolation(format!(
                "{} redistributed {} points but {} were remaining",
                category, allocated, value
            )));
        }

        debug!(category = %category, remaining = value, "Sanity check passed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::Badge;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn document(badges: &[(&str, &str)], snapshot: &[(&str, i64)]) -> LedgerDocument {
        let mut doc = LedgerDocument::default();
        for (name, earned) in badges {
            doc.badges_earned.push(Badge::new(*name, *earned));
        }
        for (category, points) in snapshot {
            doc.last_recorded
                .categories
                .insert(category.to_string(), *points);
        }
        doc
    }

    fn entry<'a>(doc: &'a LedgerDocument, on: NaiveDate) -> &'a HistoryEntry {
        doc.history.iter().find(|e| e.date == on).unwrap()
    }

    #[test]
    fn test_badge_exceeding_snapshot_is_clamped() {
        let mut doc = document(&[("X", "2023-06-01T08:30:00Z")], &[("Badge Points", 20)]);
        let report = Reconciler::default().reconcile(&mut doc).unwrap();

        let badge_day = entry(&doc, date(2023, 6, 1));
        assert_eq!(badge_day.total_gained, 30);
        assert_eq!(badge_day.points_breakdown["Badge Points"], 30);

        assert_eq!(report.remaining_after["Badge Points"], 0);
        assert_eq!(report.badge_only_points["Badge Points"], 20);
        assert!(report.allocations.is_empty());
        assert_eq!(doc.history.len(), 1);
    }

    #[test]
    fn test_category_without_badges_uses_fallback_date() {
        let mut doc = document(&[], &[("Streaks", 10)]);
        let report = Reconciler::default().reconcile(&mut doc).unwrap();

        let fallback = entry(&doc, date(2024, 12, 31));
        assert_eq!(fallback.points_breakdown["Streaks"], 10);
        assert_eq!(fallback.total_gained, 10);
        assert_eq!(
            report.allocations["Streaks"],
            vec![Allocation { date: date(2024, 12, 31), points: 10 }]
        );
    }

    #[test]
    fn test_remainder_lands_on_latest_year() {
        // 100 - 3 * 30 leaves 10 to spread over three years
        let mut doc = document(
            &[
                ("A", "2022-05-01"),
                ("B", "2023-07-09"),
                ("C", "2024-02-11T23:59:59Z"),
            ],
            &[("Badge Points", 100)],
        );
        let report = Reconciler::default().reconcile(&mut doc).unwrap();

        assert_eq!(report.remaining_after["Badge Points"], 10);
        assert_eq!(entry(&doc, date(2022, 12, 31)).points_breakdown["Badge Points"], 3);
        assert_eq!(entry(&doc, date(2023, 12, 31)).points_breakdown["Badge Points"], 3);
        assert_eq!(entry(&doc, date(2024, 12, 31)).points_breakdown["Badge Points"], 4);
        assert_eq!(report.allocated("Badge Points"), 10);
    }

    #[test]
    fn test_existing_history_is_subtracted_and_merged() {
        let mut doc = document(&[("X", "2023-06-01")], &[("Badge Points", 45), ("Streaks", 8)]);
        let mut existing = HistoryEntry::new(date(2023, 6, 1));
        existing.credit("Streaks", 5).unwrap();
        doc.history.push(existing);

        let report = Reconciler::default().reconcile(&mut doc).unwrap();

        let day = entry(&doc, date(2023, 6, 1));
        assert_eq!(day.total_gained, 35);
        assert_eq!(day.points_breakdown["Streaks"], 5);
        assert_eq!(day.points_breakdown["Badge Points"], 30);

        assert_eq!(report.badge_only_points["Streaks"], 5);
        assert_eq!(report.remaining_after["Streaks"], 3);
        assert_eq!(report.remaining_after["Badge Points"], 15);

        // Streaks never earned a badge year of its own
        assert_eq!(entry(&doc, date(2024, 12, 31)).points_breakdown["Streaks"], 3);
        assert_eq!(entry(&doc, date(2023, 12, 31)).points_breakdown["Badge Points"], 15);
    }

    #[test]
    fn test_duplicate_input_dates_are_merged() {
        let mut doc = document(&[], &[]);
        for points in [4, 6] {
            let mut e = HistoryEntry::new(date(2021, 1, 1));
            e.credit("Streaks", points).unwrap();
            doc.history.push(e);
        }

        Reconciler::default().reconcile(&mut doc).unwrap();
        assert_eq!(doc.history.len(), 1);
        assert_eq!(doc.history[0].total_gained, 10);
    }

    #[test]
    fn test_history_sorted_by_date() {
        let mut doc = document(
            &[("B", "2023-01-01"), ("A", "2021-01-01")],
            &[("Streaks", 1)],
        );
        Reconciler::default().reconcile(&mut doc).unwrap();

        let dates: Vec<_> = doc.history.iter().map(|e| e.date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(dates, sorted);
    }

    #[test]
    fn test_configured_constants() {
        let config = AllocationConfig {
            badge_point_value: 50,
            badge_category: "Achievements".to_string(),
            fallback_date: date(2020, 12, 31),
        };
        let mut doc = document(&[("X", "2023-06-01")], &[("Achievements", 60), ("Other", 2)]);
        let report = Reconciler::new(config).reconcile(&mut doc).unwrap();

        assert_eq!(entry(&doc, date(2023, 6, 1)).points_breakdown["Achievements"], 50);
        assert_eq!(entry(&doc, date(2023, 12, 31)).points_breakdown["Achievements"], 10);
        assert_eq!(entry(&doc, date(2020, 12, 31)).points_breakdown["Other"], 2);
        assert_eq!(report.badge_only_points["Achievements"], 50);
    }

    #[test]
    fn test_malformed_badge_date_leaves_document_untouched() {
        let mut doc = document(&[("X", "June 1st")], &[("Badge Points", 20)]);
        let before = doc.clone();

        let err = Reconciler::default().reconcile(&mut doc).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_run_writes_once_to_sink() {
        let source = MemoryStore::new(document(&[("X", "2023-06-01")], &[("Badge Points", 40)]));
        let mut sink = MemoryStore::default();

        let report = Reconciler::default().run(&source, &mut sink).unwrap();
        assert_eq!(sink.writes(), 1);
        assert_eq!(sink.document().unwrap().history.len(), report.entry_count);
    }

    #[test]
    fn test_failed_run_writes_nothing() {
        let mut bad = document(&[], &[]);
        bad.last_recorded.categories.insert("Streaks".to_string(), -1);
        let source = MemoryStore::new(bad);
        let mut sink = MemoryStore::default();

        assert!(Reconciler::default().run(&source, &mut sink).is_err());
        assert_eq!(sink.writes(), 0);
    }

    #[test]
    fn test_verify_rejects_negative_remaining() {
        let mut remaining = CategoryPoints::new();
        remaining.insert("Streaks".to_string(), -1);
        let err = verify(&remaining, &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("Streaks"));
    }

    #[test]
    fn test_zero_shares_still_create_year_end_entries() {
        // 92 - 3 * 30 leaves 2, fewer points than years
        let mut doc = document(
            &[("A", "2022-05-01"), ("B", "2023-07-09"), ("C", "2024-02-11")],
            &[("Badge Points", 92)],
        );
        let report = Reconciler::default().reconcile(&mut doc).unwrap();

        assert_eq!(entry(&doc, date(2022, 12, 31)).points_breakdown["Badge Points"], 0);
        assert_eq!(entry(&doc, date(2022, 12, 31)).total_gained, 0);
        assert_eq!(entry(&doc, date(2023, 12, 31)).points_breakdown["Badge Points"], 0);
        assert_eq!(entry(&doc, date(2024, 12, 31)).points_breakdown["Badge Points"], 2);
        assert_eq!(report.allocations["Badge Points"].len(), 3);
        assert_eq!(report.allocated("Badge Points"), 2);
        assert_eq!(doc.history.len(), 6);
    }

    #[test]
    fn test_overflowing_badge_day_is_malformed() {
        let mut doc = document(&[("X", "2023-06-01")], &[("Badge Points", 20)]);
        let mut existing = HistoryEntry::new(date(2023, 6, 1));
        existing.total_gained = i64::MAX;
        doc.history.push(existing);
        let before = doc.clone();

        let err = Reconciler::default().reconcile(&mut doc).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        assert!(err.to_string().contains("2023-06-01"));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_overflowing_duplicate_dates_are_malformed() {
        let mut doc = document(&[], &[]);
        for points in [i64::MAX, 1] {
            let mut e = HistoryEntry::new(date(2021, 1, 1));
            e.credit("Streaks", points).unwrap();
            doc.history.push(e);
        }

        let err = Reconciler::default().reconcile(&mut doc).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn test_verify_rejects_allocation_mismatch() {
        let mut remaining = CategoryPoints::new();
        remaining.insert("Streaks".to_string(), 10);

        let mut allocations = BTreeMap::new();
        allocations.insert(
            "Streaks".to_string(),
            vec![Allocation { date: date(2024, 12, 31), points: 7 }],
        );

        let err = verify(&remaining, &allocations).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert!(err.to_string().contains("redistributed 7 points but 10 were remaining"));

        // A category with nothing left needs no allocation
        remaining.insert("Streaks".to_string(), 0);
        assert!(verify(&remaining, &BTreeMap::new()).is_ok());
    }

    #[test]
    fn test_report_carries_timeline() {
        let mut doc = document(&[("X", "2023-06-01")], &[("Badge Points", 40), ("Streaks", 5)]);
        let report = Reconciler::default().reconcile(&mut doc).unwrap();

        assert_eq!(report.timeline.by_year[&2023], 40);
        assert_eq!(report.timeline.by_year[&2024], 5);
        assert_eq!(report.timeline.by_month["2023-06"], 30);
    }

    #[test]
    fn test_split_evenly() {
        assert_eq!(split_evenly(10, 3), vec![3, 3, 4]);
        assert_eq!(split_evenly(2, 3), vec![0, 0, 2]);
        assert_eq!(split_evenly(9, 1), vec![9]);
        assert!(split_evenly(5, 0).is_empty());
    }
}
