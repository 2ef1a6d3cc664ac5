//! The cache coordinator and the clients it fetches records with.
//!
//! [`ApodCache`] is the public entry point. It is generic over the remote side through the
//! [`FetchClient`] trait; [`HttpFetchClient`] talks to the real APOD API.

mod cache;
mod fetch;
mod http;

pub use cache::{ApodCache, LoadSummary, ResolveOptions};
pub use fetch::FetchClient;
pub use http::HttpFetchClient;
