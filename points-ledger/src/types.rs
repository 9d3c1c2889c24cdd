//! Core types for the points ledger
//!
//! The on-disk document is camelCase JSON. Fields this crate does not
//! interpret are kept in `extra` maps so they survive a load/store cycle.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Points per category
pub type CategoryPoints = BTreeMap<String, i64>;

/// Points gained on a single calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Calendar day (`YYYY-MM-DD`)
    pub date: NaiveDate,

    /// Total points gained on this day
    #[serde(rename = "totalGained")]
    pub total_gained: i64,

    /// Points gained per category
    #[serde(rename = "pointsBreakdown", default)]
    pub points_breakdown: CategoryPoints,
}

impl HistoryEntry {
    /// Create an empty entry for `date`
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            total_gained: 0,
            points_breakdown: CategoryPoints::new(),
        }
    }

    /// Add `points` to the total and to `category`
    ///
    /// Fails without changing the entry if either sum overflows.
    pub fn credit(&mut self, category: &str, points: i64) -> Result<()> {
        let current = self.points_breakdown.get(category).copied().unwrap_or(0);
        let total = checked_sum(self.date, "totalGained", self.total_gained, points)?;
        let category_total = checked_sum(self.date, category, current, points)?;

        self.total_gained = total;
        self.points_breakdown.insert(category.to_string(), category_total);
        Ok(())
    }

    /// Fold another entry for the same day into this one
    pub fn absorb(&mut self, other: HistoryEntry) -> Result<()> {
        let mut merged = self.clone();
        merged.total_gained =
            checked_sum(self.date, "totalGained", self.total_gained, other.total_gained)?;
        for (category, points) in other.points_breakdown {
            let current = merged.points_breakdown.get(&category).copied().unwrap_or(0);
            let sum = checked_sum(self.date, &category, current, points)?;
            merged.points_breakdown.insert(category, sum);
        }
        *self = merged;
        Ok(())
    }
}

/// Add two point values, reporting overflow as malformed input
pub fn checked_sum(date: NaiveDate, field: &str, a: i64, b: i64) -> Result<i64> {
    a.checked_add(b).ok_or_else(|| {
        Error::MalformedInput(format!("{} on {} overflows ({} + {})", field, date, a, b))
    })
}

/// A discrete achievement awarding a fixed number of points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    /// Upstream badge identifier (number or string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// Display name
    pub name: String,

    /// Timestamp the badge was earned; only the date portion is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earned_date: Option<String>,

    /// Fields carried through untouched (url, icon_url, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Badge {
    /// Create a badge earned at `earned_date`
    pub fn new(name: impl Into<String>, earned_date: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            earned_date: Some(earned_date.into()),
            extra: Map::new(),
        }
    }

    /// Calendar day the badge was earned
    pub fn earned_on(&self) -> Result<NaiveDate> {
        let raw = self.earned_date.as_deref().ok_or_else(|| {
            Error::MalformedInput(format!("badge '{}' has no earned_date", self.name))
        })?;
        parse_date_portion(raw).map_err(|e| {
            Error::MalformedInput(format!("badge '{}' earned_date: {}", self.name, e))
        })
    }
}

/// Parse the `YYYY-MM-DD` portion of an ISO date or timestamp
pub fn parse_date_portion(raw: &str) -> Result<NaiveDate> {
    let date_part = raw.split('T').next().unwrap_or(raw).trim();
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|e| Error::MalformedInput(format!("'{}' is not an ISO date: {}", raw, e)))
}

/// Last day of `year`
pub fn year_end(year: i32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 12, 31)
        .ok_or_else(|| Error::MalformedInput(format!("year {} is out of range", year)))
}

/// Most recent recorded snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastRecorded {
    /// Total points at snapshot time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,

    /// Points not yet placed at a historical date, per category
    pub categories: CategoryPoints,

    /// Fields carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The full ledger document as read from a source and written to a sink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    /// Per-day history
    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    /// Badges earned so far
    #[serde(rename = "badgesEarned", default)]
    pub badges_earned: Vec<Badge>,

    /// Snapshot of remaining points
    #[serde(rename = "lastRecorded")]
    pub last_recorded: LastRecorded,

    /// Top-level fields carried through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LedgerDocument {
    /// Reject snapshot values the engine cannot reconcile
    pub fn validate(&self) -> Result<()> {
        for (category, points) in &self.last_recorded.categories {
            if *points < 0 {
                return Err(Error::MalformedInput(format!(
                    "lastRecorded.categories.{} is negative ({})",
                    category, points
                )));
            }
        }
        Ok(())
    }
}

/// Points reported by a fresh profile fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPoints {
    /// Overall total
    pub total: i64,

    /// Every other key is a category
    #[serde(flatten)]
    pub categories: CategoryPoints,
}

/// A freshly fetched profile: current points and badges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsSnapshot {
    /// Current points
    pub points: SnapshotPoints,

    /// Badges shown on the profile
    #[serde(default)]
    pub badges: Vec<Badge>,
}
