//! Numbering service
//!
//! Two identifier families:
//! - Sequential numbers (receipts, invoices): a fixed prefix, a year-month
//!   period key and a zero-padded counter scoped to that period. Allocation
//!   is a single increment-and-read under exclusive access to the counters,
//!   and the counters live inside the committed ledger state so an
//!   allocation rolls back with the transaction that requested it.
//! - Auto references (payments without a caller-supplied reference): a UTC
//!   timestamp plus a random alphanumeric suffix. Practically unique, not
//!   guaranteed; a collision detected at persist time is regenerated once.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Families of sequential numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    Receipt,
    Invoice,
}

impl SequenceKind {
    /// Returns the display prefix for this family
    pub fn prefix(&self) -> &'static str {
        match self {
            SequenceKind::Receipt => "RCP",
            SequenceKind::Invoice => "INV",
        }
    }
}

/// A year-month scoping token; sequential counters reset per period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    year: i32,
    month: u32,
}

impl PeriodKey {
    /// Creates a period key for the given year and month
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// Period key of the given date
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Period key of the current UTC date
    pub fn current() -> Self {
        Self::from_date(Utc::now().date_naive())
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

/// Period-scoped sequence counters
///
/// Counters are part of the ledger state, so `next_number` is only ever
/// called with exclusive access and its effect commits atomically with the
/// records that consumed the number. Two concurrent callers can never
/// observe the same counter value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequenceCounters {
    counters: HashMap<(SequenceKind, PeriodKey), u32>,
}

impl SequenceCounters {
    /// Creates empty counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next number in `(kind, period)` as one
    /// increment-and-read step
    pub fn next_number(&mut self, kind: SequenceKind, period: PeriodKey) -> String {
        let counter = self.counters.entry((kind, period)).or_insert(0);
        *counter += 1;
        format!("{}-{}-{:04}", kind.prefix(), period, counter)
    }
}

/// Generates an auto reference number for a payment
///
/// Format: `AUTO-<YYYYMMDDHHMMSS>-<6 alphanumeric>`.
pub fn auto_reference(now: DateTime<Utc>) -> String {
    format!("AUTO-{}-{}", now.format("%Y%m%d%H%M%S"), random_suffix())
}

// Six characters drawn from the hex expansion of a random UUID; collision
// odds within one second are negligible and persist-time detection retries.
fn random_suffix() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    raw[..6].to_ascii_uppercase()
}
