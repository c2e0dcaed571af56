//! Urgency classification relative to "today".

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::AgendaError;

/// Source of the current calendar day.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock day.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock pinned to one day.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyBucket {
    /// Today, tomorrow, or overdue.
    Urgent,
    /// Within the next seven days.
    Upcoming,
    Future,
}

impl UrgencyBucket {
    pub fn label(&self) -> &'static str {
        match self {
            UrgencyBucket::Urgent => "urgente",
            UrgencyBucket::Upcoming => "proximo",
            UrgencyBucket::Future => "futuro",
        }
    }
}

impl fmt::Display for UrgencyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for UrgencyBucket {
    type Err = AgendaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "urgente" | "urgent" => Ok(UrgencyBucket::Urgent),
            "proximo" | "próximo" | "upcoming" => Ok(UrgencyBucket::Upcoming),
            "futuro" | "future" => Ok(UrgencyBucket::Future),
            other => Err(AgendaError::InvalidInput(format!("unknown urgency '{}'", other))),
        }
    }
}

/// Signed whole days from `today` to `target`. Both are calendar days, so this
/// equals the ceiling of the midnight-to-midnight difference.
pub fn days_until(target: NaiveDate, today: NaiveDate) -> i64 {
    (target - today).num_days()
}

pub fn classify(target: NaiveDate, today: NaiveDate) -> UrgencyBucket {
    if target <= today + Duration::days(1) {
        UrgencyBucket::Urgent
    } else if target <= today + Duration::days(7) {
        UrgencyBucket::Upcoming
    } else {
        UrgencyBucket::Future
    }
}
