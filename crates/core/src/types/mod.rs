//! Core types for PricePulse.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod alert;
pub mod email;
pub mod id;
pub mod price;
pub mod product;
pub mod session;

pub use alert::{Alert, AlertRequest};
pub use email::{Email, EmailError};
pub use id::*;
pub use price::{Price, PriceError};
pub use product::{PriceHistory, PricePoint, TrackedProduct};
pub use session::{Identity, SessionSource};
