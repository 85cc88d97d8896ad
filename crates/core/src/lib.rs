//! PricePulse Core - Shared types library.
//!
//! This crate provides the domain types used across all PricePulse components:
//! - `client` - Session, sync and tracking layer talking to the backend
//! - `cli` - Command-line front end
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no
//! HTTP clients, no clocks. This keeps it lightweight and easy to test.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, prices, emails, products and sessions
//! - [`history`] - Price history windowing and trend summaries

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod history;
pub mod types;

pub use history::{HistoryRange, PriceWindow, TrendDirection, TrendSummary};
pub use types::*;
