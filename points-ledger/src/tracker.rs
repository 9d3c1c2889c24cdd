//! Snapshot tracking
//!
//! Folds a freshly fetched points snapshot into a ledger document: the
//! difference against `lastRecorded` is booked on the given day, the
//! snapshot becomes the new `lastRecorded`, and unseen badges are appended.

use crate::{
    types::{
        parse_date_portion, CategoryPoints, HistoryEntry, LastRecorded, LedgerDocument,
        PointsSnapshot,
    },
    Error, Result,
};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

/// What a tracking pass changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSummary {
    /// Day the changes were booked on
    pub date: NaiveDate,

    /// Change in the overall total
    pub total_gained: i64,

    /// Non-zero change per category
    pub points_gained: CategoryPoints,

    /// Names of badges appended to the ledger
    pub new_badges: Vec<String>,
}

/// Record `snapshot` into `document` as of `today`
///
/// The document is only changed when the whole snapshot applies cleanly.
pub fn track_snapshot(
    document: &mut LedgerDocument,
    snapshot: &PointsSnapshot,
    today: NaiveDate,
) -> Result<TrackSummary> {
    let previous = &document.last_recorded;
    let total_gained = difference("total", snapshot.points.total, previous.total.unwrap_or(0))?;

    let mut points_gained = CategoryPoints::new();
    for (category, &now) in &snapshot.points.categories {
        let before = previous.categories.get(category).copied().unwrap_or(0);
        let diff = difference(category, now, before)?;
        if diff != 0 {
            points_gained.insert(category.clone(), diff);
        }
    }

    info!(total = total_gained, date = %today, "Points change detected");

    let mut next = document.clone();
    let delta = HistoryEntry {
        date: today,
        total_gained,
        points_breakdown: points_gained.clone(),
    };
    match next.history.iter_mut().find(|e| e.date == today) {
        Some(entry) => entry.absorb(delta)?,
        None => next.history.push(delta),
    }

    next.last_recorded = LastRecorded {
        total: Some(snapshot.points.total),
        categories: snapshot.points.categories.clone(),
        extra: std::mem::take(&mut next.last_recorded.extra),
    };

    let new_badges = append_new_badges(&mut next, snapshot, today)?;

    *document = next;
    Ok(TrackSummary {
        date: today,
        total_gained,
        points_gained,
        new_badges,
    })
}

fn difference(field: &str, now: i64, before: i64) -> Result<i64> {
    now.checked_sub(before).ok_or_else(|| {
        Error::MalformedInput(format!(
            "snapshot {} change overflows ({} - {})",
            field, now, before
        ))
    })
}

fn append_new_badges(
    document: &mut LedgerDocument,
    snapshot: &PointsSnapshot,
    today: NaiveDate,
) -> Result<Vec<String>> {
    let mut seen: HashSet<String> = document
        .badges_earned
        .iter()
        .filter_map(|b| b.id.as_ref().map(id_key))
        .collect();

    let mut added = Vec::new();
    for badge in &snapshot.badges {
        if let Some(id) = badge.id.as_ref().map(id_key) {
            if !seen.insert(id) {
                debug!(badge = %badge.name, "Badge already recorded");
                continue;
            }
        }

        let earned_on = match badge.earned_date.as_deref() {
            Some(raw) => parse_date_portion(raw)?,
            None => today,
        };

        let mut recorded = badge.clone();
        recorded.earned_date = Some(earned_on.format("%Y-%m-%d").to_string());
        document.badges_earned.push(recorded);

        info!(badge = %badge.name, date = %earned_on, "New badge earned");
        added.push(badge.name.clone());
    }

    if added.is_empty() {
        debug!("No new badges in snapshot");
    }
    Ok(added)
}

// Ids arrive as numbers or strings; 7 and "7" are the same badge
fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
