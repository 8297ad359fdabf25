//! Service layer for the monitor.
//!
//! This module contains the network-facing pieces:
//! - Request pacing (`RateLimiter`)
//! - Board index, listing and thread fetching (`ApiClient`)

mod client;
mod rate_limit;

pub use client::{
    ApiClient, ApiTransport, BACKOFF_MULTIPLIER, GoneReason, ItemFetch, MAX_RETRIES,
};
pub use rate_limit::RateLimiter;
