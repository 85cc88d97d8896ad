//! PricePulse client library.
//!
//! The data-synchronization and session layer of the PricePulse price
//! tracker: establishes and restores sessions, registers product URLs with
//! bounded retry, keeps the local product collection fresh, and submits
//! target-price alerts.
//!
//! # Modules
//!
//! - [`session`] - Session store, auth providers, persistence, one-time codes
//! - [`gateway`] - REST API client and backend traits
//! - [`products`] - Local product collection and refresh operations
//! - [`tracking`] - Deduplicated, retried tracking submission
//! - [`polling`] - List and detail refresh timers
//! - [`alerts`] - Target-price alerts
//! - [`state`] - [`PricePulse`], which wires the above together

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod alerts;
pub mod config;
pub mod error;
pub mod gateway;
pub mod polling;
pub mod products;
pub mod session;
pub mod state;
pub mod tracking;

pub use config::{ClientConfig, SyncConfig};
pub use error::ClientError;
pub use state::{Backends, PricePulse};
