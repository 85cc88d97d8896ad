//! Price history windowing.
//!
//! Turns a raw series of price observations into the bounded series a chart
//! renders plus the trend badge shown next to it. Everything here is pure:
//! the caller supplies `now`, so results are deterministic and restartable.

use core::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Price, PricePoint};

/// How far back a price window reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRange {
    /// Last 7 days.
    Week,
    /// Last 30 days.
    #[default]
    Month,
    /// Last 90 days.
    Quarter,
    /// Entire history.
    All,
}

impl HistoryRange {
    /// Number of days covered, or `None` for the full history.
    #[must_use]
    pub const fn days(self) -> Option<i64> {
        match self {
            Self::Week => Some(7),
            Self::Month => Some(30),
            Self::Quarter => Some(90),
            Self::All => None,
        }
    }

    /// Earliest timestamp included in the window ending at `now`.
    #[must_use]
    pub fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.days().map(|days| now - Duration::days(days))
    }
}

/// Error returned when parsing a [`HistoryRange`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown history range '{0}' (expected 7, 30, 90 or all)")]
pub struct ParseRangeError(String);

impl FromStr for HistoryRange {
    type Err = ParseRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "7" | "7d" | "week" => Ok(Self::Week),
            "30" | "30d" | "month" => Ok(Self::Month),
            "90" | "90d" | "quarter" => Ok(Self::Quarter),
            "all" => Ok(Self::All),
            _ => Err(ParseRangeError(s.to_owned())),
        }
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.days() {
            Some(days) => write!(f, "{days}d"),
            None => f.write_str("all"),
        }
    }
}

/// Direction of the price movement across a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    /// Price rose or stayed flat.
    Up,
    /// Price fell.
    Down,
}

/// Percentage change from a reference price to the current price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendSummary {
    /// `(current - reference) / reference * 100`.
    pub percent_change: Decimal,
    /// `Down` when the reference price exceeds the current price.
    pub direction: TrendDirection,
}

impl TrendSummary {
    /// Compare `reference` (the first point in a window) to `current`.
    ///
    /// A zero reference price yields a zero percentage. A change too large
    /// for `Decimal` saturates at `Decimal::MAX` (or `MIN` for a drop).
    #[must_use]
    pub fn between(reference: Price, current: Price) -> Self {
        let reference = reference.amount();
        let current_amount = current.amount();

        let direction = if reference > current_amount {
            TrendDirection::Down
        } else {
            TrendDirection::Up
        };

        let percent_change = if reference.is_zero() {
            Decimal::ZERO
        } else {
            current_amount
                .checked_sub(reference)
                .and_then(|delta| delta.checked_div(reference))
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                .unwrap_or(match direction {
                    TrendDirection::Up => Decimal::MAX,
                    TrendDirection::Down => Decimal::MIN,
                })
        };

        Self {
            percent_change,
            direction,
        }
    }
}

/// Result of windowing a price history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceWindow {
    /// No observation falls inside the range. Render a fallback.
    NoData,
    /// Points inside the range, oldest first, with the trend across them.
    Series {
        /// Points in ascending timestamp order.
        points: Vec<PricePoint>,
        /// Change from the first point to the current price.
        summary: TrendSummary,
    },
}

impl PriceWindow {
    /// Points in the window (empty for `NoData`).
    #[must_use]
    pub fn points(&self) -> &[PricePoint] {
        match self {
            Self::NoData => &[],
            Self::Series { points, .. } => points,
        }
    }

    /// Trend summary, if the window has data.
    #[must_use]
    pub const fn summary(&self) -> Option<&TrendSummary> {
        match self {
            Self::NoData => None,
            Self::Series { summary, .. } => Some(summary),
        }
    }

    /// Whether this is the "no data" sentinel.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::NoData)
    }
}

/// Window `history` to `range` ending at `now` and summarize the trend.
///
/// The input may be unsorted. Points at or after the cutoff are kept. The
/// percentage compares the first point inside the window to `current_price`.
#[must_use]
pub fn window(
    history: &[PricePoint],
    current_price: Price,
    range: HistoryRange,
    now: DateTime<Utc>,
) -> PriceWindow {
    let mut points = history.to_vec();
    points.sort_by_key(|p| p.timestamp);

    if let Some(cutoff) = range.cutoff(now) {
        points.retain(|p| p.timestamp >= cutoff);
    }

    let Some(first) = points.first() else {
        return PriceWindow::NoData;
    };

    let summary = TrendSummary::between(first.price, current_price);
    PriceWindow::Series { points, summary }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn point(amount: i64, days_ago: i64) -> PricePoint {
        PricePoint::new(
            Price::new(Decimal::new(amount, 0)),
            now() - Duration::days(days_ago),
        )
    }

    fn current(amount: i64) -> Price {
        Price::new(Decimal::new(amount, 0))
    }

    #[test]
    fn test_all_range_uses_first_point() {
        let history = [point(100, 40), point(80, 10), point(120, 0)];
        let result = window(&history, current(120), HistoryRange::All, now());

        let summary = result.summary().unwrap();
        assert_eq!(summary.percent_change, Decimal::new(20, 0));
        assert_eq!(summary.direction, TrendDirection::Up);
        assert_eq!(result.points().len(), 3);
    }

    #[test]
    fn test_range_excluding_oldest_point() {
        let history = [point(100, 40), point(80, 10), point(120, 0)];
        let result = window(&history, current(120), HistoryRange::Month, now());

        assert_eq!(result.points().len(), 2);
        assert_eq!(result.points()[0].price, current(80));
        let summary = result.summary().unwrap();
        assert_eq!(summary.percent_change, Decimal::new(50, 0));
        assert_eq!(summary.direction, TrendDirection::Up);
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let history = [point(120, 0), point(100, 40), point(80, 10)];
        let result = window(&history, current(120), HistoryRange::All, now());

        let stamps: Vec<_> = result.points().iter().map(|p| p.timestamp).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
        assert_eq!(
            result.summary().unwrap().percent_change,
            Decimal::new(20, 0)
        );
    }

    #[test]
    fn test_empty_window_is_no_data() {
        let history = [point(100, 40), point(80, 35)];
        let result = window(&history, current(80), HistoryRange::Week, now());
        assert_eq!(result, PriceWindow::NoData);
        assert!(result.points().is_empty());
        assert!(result.summary().is_none());
    }

    #[test]
    fn test_empty_history_is_no_data() {
        assert!(window(&[], current(10), HistoryRange::All, now()).is_empty());
    }

    #[test]
    fn test_cutoff_is_inclusive() {
        let history = [point(50, 7)];
        let result = window(&history, current(50), HistoryRange::Week, now());
        assert_eq!(result.points().len(), 1);
    }

    #[test]
    fn test_downward_trend() {
        let history = [point(200, 3)];
        let summary = *window(&history, current(150), HistoryRange::Week, now())
            .summary()
            .unwrap();
        assert_eq!(summary.direction, TrendDirection::Down);
        assert_eq!(summary.percent_change, Decimal::new(-25, 0));
    }

    #[test]
    fn test_zero_reference_price() {
        let summary = TrendSummary::between(current(0), current(10));
        assert_eq!(summary.percent_change, Decimal::ZERO);
        assert_eq!(summary.direction, TrendDirection::Up);
    }

    #[test]
    fn test_extreme_ratio_saturates() {
        let tiny = Price::new(Decimal::new(1, 20));

        let rise = TrendSummary::between(tiny, Price::new(Decimal::MAX));
        assert_eq!(rise.percent_change, Decimal::MAX);
        assert_eq!(rise.direction, TrendDirection::Up);

        let fall = TrendSummary::between(Price::new(Decimal::MAX), Price::new(Decimal::MIN));
        assert_eq!(fall.percent_change, Decimal::MIN);
        assert_eq!(fall.direction, TrendDirection::Down);
    }

    #[test]
    fn test_range_parse_and_display() {
        assert_eq!("7".parse::<HistoryRange>().unwrap(), HistoryRange::Week);
        assert_eq!("90d".parse::<HistoryRange>().unwrap(), HistoryRange::Quarter);
        assert_eq!("ALL".parse::<HistoryRange>().unwrap(), HistoryRange::All);
        assert!("14".parse::<HistoryRange>().is_err());
        assert_eq!(HistoryRange::Month.to_string(), "30d");
        assert_eq!(HistoryRange::All.to_string(), "all");
    }
}
