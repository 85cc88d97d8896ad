//! Target-price alert types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AlertId, Email, Price, ProductId};

/// A request to be notified when a product drops to a target price.
///
/// Built fresh for every submission. Identical requests are not merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRequest {
    /// Product to watch.
    pub product_id: ProductId,
    /// Notify when the price is at or below this amount. Always positive.
    pub target_price: Price,
    /// Where to send the notification.
    pub notify_email: Email,
    /// When the request was created on the client.
    pub created_at: DateTime<Utc>,
}

/// An alert stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Backend-issued identifier.
    pub id: AlertId,
    /// Product being watched.
    pub product_id: ProductId,
    /// Product title, when the backend includes the product.
    pub product_name: Option<String>,
    /// Target price.
    pub target_price: Price,
    /// Notification address.
    pub email: Email,
    /// Creation time, when reported.
    pub created_at: Option<DateTime<Utc>>,
}
