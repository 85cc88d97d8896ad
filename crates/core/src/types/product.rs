//! Tracked product and its price history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::{self, HistoryRange, PriceWindow, TrendSummary};
use crate::types::{Price, ProductId};

/// A single observed price at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Observed price.
    pub price: Price,
    /// When the price was observed.
    pub timestamp: DateTime<Utc>,
}

impl PricePoint {
    /// Create a new price point.
    #[must_use]
    pub const fn new(price: Price, timestamp: DateTime<Utc>) -> Self {
        Self { price, timestamp }
    }
}

/// Price observations ordered by timestamp (non-decreasing).
///
/// Construction always sorts, so the ordering invariant holds no matter what
/// order the backend (or a deserialized snapshot) supplied.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<PricePoint>", into = "Vec<PricePoint>")]
pub struct PriceHistory(Vec<PricePoint>);

impl PriceHistory {
    /// Build a history from points in any order.
    #[must_use]
    pub fn from_points(mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.timestamp);
        Self(points)
    }

    /// Points in ascending timestamp order.
    #[must_use]
    pub fn points(&self) -> &[PricePoint] {
        &self.0
    }

    /// Earliest observation.
    #[must_use]
    pub fn first(&self) -> Option<&PricePoint> {
        self.0.first()
    }

    /// Latest observation.
    #[must_use]
    pub fn latest(&self) -> Option<&PricePoint> {
        self.0.last()
    }

    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no observations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append an observation, keeping the ordering invariant.
    pub fn push(&mut self, point: PricePoint) {
        let at = self.0.partition_point(|p| p.timestamp <= point.timestamp);
        self.0.insert(at, point);
    }
}

impl From<Vec<PricePoint>> for PriceHistory {
    fn from(points: Vec<PricePoint>) -> Self {
        Self::from_points(points)
    }
}

impl From<PriceHistory> for Vec<PricePoint> {
    fn from(history: PriceHistory) -> Self {
        history.0
    }
}

/// A product the current user has registered for price monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedProduct {
    /// Backend-issued identifier, unique within the user's tracked set.
    pub id: ProductId,
    /// The URL the user submitted, unique within the user's tracked set.
    pub source_url: String,
    /// Product title as scraped by the backend.
    pub display_name: String,
    /// Product image, if the backend found one.
    pub image_url: Option<String>,
    /// Most recent price reported by the backend.
    pub current_price: Price,
    /// Observed prices, oldest first.
    pub price_history: PriceHistory,
    /// Whether the backend should keep checking this product.
    pub tracking_enabled: bool,
    /// Last time the backend updated this product.
    pub updated_at: DateTime<Utc>,
}

impl TrackedProduct {
    /// Window this product's history against its current price.
    #[must_use]
    pub fn price_window(&self, range: HistoryRange, now: DateTime<Utc>) -> PriceWindow {
        history::window(self.price_history.points(), self.current_price, range, now)
    }

    /// Change between the earliest known price and the current price.
    ///
    /// Returns `None` until there are at least two observations, matching
    /// the list badge which is hidden for freshly tracked products.
    #[must_use]
    pub fn trend(&self) -> Option<TrendSummary> {
        if self.price_history.len() < 2 {
            return None;
        }
        let first = self.price_history.first()?;
        Some(TrendSummary::between(first.price, self.current_price))
    }
}
