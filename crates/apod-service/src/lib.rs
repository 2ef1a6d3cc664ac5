//! In-memory cache for Astronomy Picture of the Day records.
//!
//! The entry point is [`ApodCache`](services::ApodCache), which resolves a calendar day into a
//! shared [`Record`](types::Record), fetching metadata, thumbnail and full image on demand and
//! coalescing concurrent requests for the same day and payload.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod logging;
pub mod services;
pub mod types;
pub mod utils;
