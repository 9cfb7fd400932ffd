use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
#[cfg(feature = "sqlx")]
use sqlx::{prelude::*, sqlite::SqliteRow};
use thiserror::Error;

use crate::{ride_session::RideSummary, user::OwnerId};

pub const LIVE_RIDE_DESCRIPTION: &str = "Live tracked ride";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EntryError {
    #[error("Unknown entry kind '{0}'")]
    UnknownKind(String),

    #[error("Amount must be a positive number, got {0}")]
    InvalidAmount(f64),

    #[error("Odometer reading must be a non-negative number, got {0}")]
    InvalidOdometer(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Ride,
    Fuel,
    Expense,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Ride => "ride",
            EntryKind::Fuel => "fuel",
            EntryKind::Expense => "expense",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ride" => Ok(EntryKind::Ride),
            "fuel" => Ok(EntryKind::Fuel),
            "expense" => Ok(EntryKind::Expense),
            other => Err(EntryError::UnknownKind(other.to_string())),
        }
    }
}

/// History view filter: everything, or a single kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HistoryFilter {
    #[default]
    All,
    Only(EntryKind),
}

impl HistoryFilter {
    pub fn matches(&self, kind: EntryKind) -> bool {
        match self {
            HistoryFilter::All => true,
            HistoryFilter::Only(only) => *only == kind,
        }
    }

    pub fn kind(&self) -> Option<EntryKind> {
        match self {
            HistoryFilter::All => None,
            HistoryFilter::Only(kind) => Some(*kind),
        }
    }
}

impl FromStr for HistoryFilter {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("all") {
            Ok(HistoryFilter::All)
        } else {
            s.parse().map(HistoryFilter::Only)
        }
    }
}

impl TryFrom<String> for HistoryFilter {
    type Error = EntryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HistoryFilter> for String {
    fn from(value: HistoryFilter) -> Self {
        match value {
            HistoryFilter::All => "all".to_string(),
            HistoryFilter::Only(kind) => kind.to_string(),
        }
    }
}

/// An entry before the store has given it an id and a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub kind: EntryKind,
    /// Kilometers for rides, currency for fuel and expenses.
    pub amount: f64,
    pub duration_seconds: Option<u64>,
    pub cost: Option<f64>,
    pub odometer: Option<f64>,
    pub description: String,
}

impl NewEntry {
    /// Record for a finished live ride. Distance and cost are stored with two decimals.
    pub fn ride(summary: &RideSummary) -> Self {
        Self {
            kind: EntryKind::Ride,
            amount: round_2(summary.distance_km),
            duration_seconds: Some(summary.duration_seconds),
            cost: Some(round_2(summary.cost)),
            odometer: None,
            description: LIVE_RIDE_DESCRIPTION.to_string(),
        }
    }

    /// Entry typed in by hand.
    pub fn manual(kind: EntryKind, amount: f64, description: impl Into<String>, odometer: Option<f64>) -> Result<Self, EntryError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(EntryError::InvalidAmount(amount));
        }
        if let Some(reading) = odometer {
            if !reading.is_finite() || reading < 0.0 {
                return Err(EntryError::InvalidOdometer(reading));
            }
        }

        Ok(Self {
            kind,
            amount,
            duration_seconds: None,
            cost: None,
            // A zero reading means none was given
            odometer: odometer.filter(|reading| *reading > 0.0),
            description: description.into().trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub entry_id: i64,
    pub owner_id: OwnerId,
    pub kind: EntryKind,
    pub amount: f64,
    pub duration_seconds: Option<u64>,
    pub cost: Option<f64>,
    pub odometer: Option<f64>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(entry_id: i64, owner_id: OwnerId, entry: NewEntry, created_at: DateTime<Utc>) -> Self {
        Self {
            entry_id,
            owner_id,
            kind: entry.kind,
            amount: entry.amount,
            duration_seconds: entry.duration_seconds,
            cost: entry.cost,
            odometer: entry.odometer,
            description: entry.description,
            created_at,
        }
    }

    /// Title shown in lists, falling back to a generic label.
    pub fn title(&self) -> &str {
        if !self.description.is_empty() {
            &self.description
        } else if self.kind == EntryKind::Ride {
            "Ride entry"
        } else {
            "Unknown"
        }
    }
}

#[cfg(feature = "sqlx")]
impl FromRow<'_, SqliteRow> for LogEntry {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let owner_id: String = row.try_get("owner_id")?;
        let owner_id = OwnerId::new(owner_id).ok_or_else(|| sqlx::Error::Decode("empty owner id".into()))?;

        let kind: String = row.try_get("kind")?;
        let kind = kind.parse::<EntryKind>().map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let duration_seconds: Option<i64> = row.try_get("duration_seconds")?;
        let duration_seconds = duration_seconds
            .map(u64::try_from)
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Self {
            entry_id: row.try_get("entry_id")?,
            owner_id,
            kind,
            amount: row.try_get("amount")?,
            duration_seconds,
            cost: row.try_get("cost")?,
            odometer: row.try_get("odometer")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

fn round_2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ride_entry_rounds_to_two_decimals() {
        let entry = NewEntry::ride(&RideSummary { distance_km: 12.34567, duration_seconds: 754, cost: 28.80656 });
        assert_eq!(entry.kind, EntryKind::Ride);
        assert_eq!(entry.amount, 12.35);
        assert_eq!(entry.cost, Some(28.81));
        assert_eq!(entry.duration_seconds, Some(754));
        assert_eq!(entry.description, LIVE_RIDE_DESCRIPTION);
    }

    #[test]
    fn manual_entry_validation() {
        assert_eq!(NewEntry::manual(EntryKind::Fuel, 0.0, "", None), Err(EntryError::InvalidAmount(0.0)));
        assert!(NewEntry::manual(EntryKind::Fuel, 500.0, "Shell", Some(-2.0)).is_err());

        let entry = NewEntry::manual(EntryKind::Fuel, 500.0, "  Shell ", Some(0.0)).unwrap();
        assert_eq!(entry.description, "Shell");
        assert_eq!(entry.odometer, None);
    }

    #[test]
    fn filters() {
        assert_eq!("all".parse::<HistoryFilter>().unwrap(), HistoryFilter::All);
        assert_eq!("".parse::<HistoryFilter>().unwrap(), HistoryFilter::All);
        assert_eq!("Fuel".parse::<HistoryFilter>().unwrap(), HistoryFilter::Only(EntryKind::Fuel));
        assert!("boat".parse::<HistoryFilter>().is_err());

        let rides = HistoryFilter::Only(EntryKind::Ride);
        assert!(rides.matches(EntryKind::Ride));
        assert!(!rides.matches(EntryKind::Expense));
        assert!(HistoryFilter::All.matches(EntryKind::Expense));
    }
}
