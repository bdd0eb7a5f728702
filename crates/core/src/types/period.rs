//! Date ranges for rentals and billing.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::status::RentalType;
use crate::error::DomainError;

/// Half-open rental range `[start, end)`; `end = None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RentalPeriod {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl RentalPeriod {
    /// Build a period without validating it against a rental type.
    #[must_use]
    pub const fn new(start: NaiveDate, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Build and validate a period for a rental of `rental_type`.
    ///
    /// The end date must be present exactly when the rental is limited, and
    /// must fall after the start.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidPeriod` describing the first violated rule.
    pub fn for_rental(
        rental_type: RentalType,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Self, DomainError> {
        match (rental_type, end) {
            (RentalType::Limited, None) => Err(DomainError::InvalidPeriod(
                "limited rental requires an end date".to_owned(),
            )),
            (RentalType::Unlimited, Some(_)) => Err(DomainError::InvalidPeriod(
                "unlimited rental cannot have an end date".to_owned(),
            )),
            (_, Some(end)) if end <= start => Err(DomainError::InvalidPeriod(format!(
                "end date {end} must be after start date {start}"
            ))),
            _ => Ok(Self { start, end }),
        }
    }

    /// Whether two periods share at least one day.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let starts_before_other_ends = other.end.is_none_or(|end| self.start < end);
        let other_starts_before_end = self.end.is_none_or(|end| other.start < end);
        starts_before_other_ends && other_starts_before_end
    }

    /// Whether `date` falls inside the period.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && self.end.is_none_or(|end| date < end)
    }

    /// Whether any part of the period lies after `date`.
    #[must_use]
    pub fn reaches_past(&self, date: NaiveDate) -> bool {
        self.end.is_none_or(|end| end > date)
    }

    /// Number of started months in a bounded period (at least one).
    ///
    /// Returns `None` for open-ended periods.
    #[must_use]
    pub fn started_months(&self) -> Option<u32> {
        let end = self.end?;
        let whole_months = i64::from(end.year() - self.start.year()) * 12
            + i64::from(end.month())
            - i64::from(self.start.month());
        // Adding this many months lands in the end date's month, so at most
        // one more month can be needed for the remaining days.
        let months = u32::try_from(whole_months).unwrap_or(0).max(1);
        let partial = self
            .start
            .checked_add_months(Months::new(months))
            .is_some_and(|boundary| boundary < end);
        Some(if partial { months + 1 } else { months })
    }
}

impl std::fmt::Display for RentalPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}..{}", self.start, end),
            None => write!(f, "{}..", self.start),
        }
    }
}

/// Calendar month a self-billing invoice covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillingPeriod {
    year: i32,
    month: u32,
}

impl BillingPeriod {
    /// Create a billing period.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidBillingPeriod` for months outside 1..=12.
    pub fn new(year: i32, month: u32) -> Result<Self, DomainError> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(DomainError::InvalidBillingPeriod { year, month });
        }
        Ok(Self { year, month })
    }

    /// The calendar month before the one containing `now`.
    #[must_use]
    pub fn previous_month(now: DateTime<Utc>) -> Self {
        let (year, month) = if now.month() == 1 {
            (now.year() - 1, 12)
        } else {
            (now.year(), now.month() - 1)
        };
        Self { year, month }
    }

    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    #[must_use]
    pub const fn month(&self) -> u32 {
        self.month
    }

    /// `[first instant of the month, first instant of the next month)` in UTC.
    #[must_use]
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        // Constructor guarantees the first day exists.
        let first = NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN);
        let next = first.checked_add_months(Months::new(1)).unwrap_or(NaiveDate::MAX);
        (
            first.and_time(chrono::NaiveTime::MIN).and_utc(),
            next.and_time(chrono::NaiveTime::MIN).and_utc(),
        )
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}
