// crates/climate-eval-core/src/core/time.rs
// ============================================================================
// Module: Climate Eval Time Model
// Description: Timestamps and half-open time ranges for dataset files.
// Purpose: Provide deterministic interval arithmetic for coverage constraints.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Dataset files carry an optional half-open time range `[start, end)` parsed
//! from their metadata at month resolution. The resolver's coverage
//! constraints (contiguity, overlap) are defined over unions and
//! intersections of these ranges. Row timestamps are UTC unix seconds and are
//! supplied by callers; interval arithmetic itself never reads the clock.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::Date;
use time::Month;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Timestamps
// ============================================================================

/// Canonical row timestamp in UTC unix seconds.
///
/// # Invariants
/// - Values are explicitly provided by callers; interval arithmetic never
///   reads wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix seconds.
    #[must_use]
    pub const fn from_unix_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    /// Captures the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Returns the timestamp as unix seconds.
    #[must_use]
    pub const fn unix_seconds(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Time Range
// ============================================================================

/// Half-open time interval `[start, end)` at date resolution.
///
/// # Invariants
/// - `start < end`; empty and inverted ranges are rejected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive start date.
    start: Date,
    /// Exclusive end date.
    end: Date,
}

impl TimeRange {
    /// Creates a new half-open range (returns `None` unless `start < end`).
    #[must_use]
    pub fn new(start: Date, end: Date) -> Option<Self> {
        (start < end).then_some(Self {
            start,
            end,
        })
    }

    /// Creates a range spanning whole months, `[first of start month, first of
    /// the month after the end month)`.
    ///
    /// Returns `None` when the bounds are out of calendar range or inverted.
    #[must_use]
    pub fn from_months(start_year: i32, start_month: u8, end_year: i32, end_month: u8) -> Option<Self> {
        let start = first_of_month(start_year, start_month)?;
        let end = first_of_next_month(end_year, end_month)?;
        Self::new(start, end)
    }

    /// Returns the inclusive start date.
    #[must_use]
    pub const fn start(self) -> Date {
        self.start
    }

    /// Returns the exclusive end date.
    #[must_use]
    pub const fn end(self) -> Date {
        self.end
    }

    /// Returns true when the two ranges share at least one day.
    #[must_use]
    pub fn overlaps(self, other: Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns the intersection of two ranges when non-empty.
    #[must_use]
    pub fn intersect(self, other: Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        Self::new(start, end)
    }

    /// Returns the smallest range containing both inputs.
    #[must_use]
    pub fn span(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// SECTION: Coverage Predicates
// ============================================================================

/// Returns the overall span of a non-empty set of ranges.
#[must_use]
pub fn overall_span(ranges: &[TimeRange]) -> Option<TimeRange> {
    let mut iter = ranges.iter().copied();
    let first = iter.next()?;
    Some(iter.fold(first, TimeRange::span))
}

/// Returns true when the union of `ranges` covers their min-to-max span with
/// no gap.
///
/// Adjacent ranges (`a.end == b.start`) count as contiguous; an empty input
/// is trivially covered.
#[must_use]
pub fn covers_span_contiguously(ranges: &[TimeRange]) -> bool {
    if ranges.is_empty() {
        return true;
    }
    let mut sorted: Vec<TimeRange> = ranges.to_vec();
    sorted.sort_by_key(|range| (range.start, range.end));
    let mut covered_until = sorted[0].end;
    for range in &sorted[1..] {
        if range.start > covered_until {
            return false;
        }
        covered_until = covered_until.max(range.end);
    }
    true
}

/// Returns the non-empty intersection across all ranges, if any.
#[must_use]
pub fn common_overlap(ranges: &[TimeRange]) -> Option<TimeRange> {
    let mut iter = ranges.iter().copied();
    let first = iter.next()?;
    iter.try_fold(first, TimeRange::intersect)
}

// ============================================================================
// SECTION: Calendar Helpers
// ============================================================================

/// Returns the first day of the given month.
fn first_of_month(year: i32, month: u8) -> Option<Date> {
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, 1).ok()
}

/// Returns the first day of the month after the given month.
fn first_of_next_month(year: i32, month: u8) -> Option<Date> {
    if month == 12 {
        first_of_month(year.checked_add(1)?, 1)
    } else {
        first_of_month(year, month.checked_add(1)?)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::missing_docs_in_private_items,
        clippy::unwrap_used,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use super::*;

    fn range(start_year: i32, end_year: i32) -> TimeRange {
        TimeRange::from_months(start_year, 1, end_year - 1, 12).unwrap()
    }

    #[test]
    fn rejects_inverted_and_empty_ranges() {
        let day = Date::from_calendar_date(2000, Month::January, 1).unwrap();
        assert!(TimeRange::new(day, day).is_none());
        let earlier = Date::from_calendar_date(1999, Month::June, 1).unwrap();
        assert!(TimeRange::new(day, earlier).is_none());
    }

    #[test]
    fn month_ranges_are_half_open() {
        let tr = TimeRange::from_months(1850, 1, 2014, 12).unwrap();
        assert_eq!(tr.start(), Date::from_calendar_date(1850, Month::January, 1).unwrap());
        assert_eq!(tr.end(), Date::from_calendar_date(2015, Month::January, 1).unwrap());
    }

    #[test]
    fn contiguous_coverage_accepts_adjacent_ranges() {
        let ranges = vec![range(1850, 1900), range(1900, 1950), range(1950, 2000)];
        assert!(covers_span_contiguously(&ranges));
    }

    #[test]
    fn contiguous_coverage_rejects_gaps() {
        let ranges = vec![range(1850, 1900), range(1950, 2000)];
        assert!(!covers_span_contiguously(&ranges));
    }

    #[test]
    fn contiguous_coverage_accepts_overlapping_ranges() {
        let ranges = vec![range(1850, 1960), range(1950, 2000)];
        assert!(covers_span_contiguously(&ranges));
    }

    #[test]
    fn common_overlap_intersects_all_ranges() {
        let ranges = vec![range(1850, 1960), range(1900, 2000), range(1940, 1980)];
        let overlap = common_overlap(&ranges).unwrap();
        assert_eq!(overlap, range(1940, 1960));
    }

    #[test]
    fn common_overlap_is_none_for_disjoint_ranges() {
        let ranges = vec![range(1850, 1900), range(1950, 2000)];
        assert!(common_overlap(&ranges).is_none());
    }

    #[test]
    fn overall_span_covers_min_to_max() {
        let ranges = vec![range(1900, 1950), range(1850, 1910)];
        assert_eq!(overall_span(&ranges).unwrap(), range(1850, 1950));
    }
}
