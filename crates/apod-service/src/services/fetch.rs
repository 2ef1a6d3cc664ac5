//! The remote side of the cache.

use std::fmt;

use futures::future::BoxFuture;

use crate::caching::FetchResult;
use crate::types::{CalendarDay, Image, Record};

/// Fetches records and their payloads from a remote service.
///
/// Implementations never retry and never cache; both are the job of the
/// [`ApodCache`](super::ApodCache). Timeouts are reported as
/// [`FetchError::Network`](crate::caching::FetchError::Network).
///
/// The cache holds its client as `Arc<dyn FetchClient>`, so tests can inject their own.
pub trait FetchClient: fmt::Debug + Send + Sync + 'static {
    /// Fetches and decodes the metadata of the record for `date`.
    ///
    /// The returned record has neither thumbnail nor full image set.
    fn fetch_metadata(&self, date: CalendarDay) -> BoxFuture<'_, FetchResult<Record>>;

    /// Fetches the image behind the record's thumbnail locator.
    fn fetch_thumbnail<'a>(&'a self, record: &'a Record) -> BoxFuture<'a, FetchResult<Image>>;

    /// Fetches the image behind the record's full resolution locator.
    fn fetch_full_image<'a>(&'a self, record: &'a Record) -> BoxFuture<'a, FetchResult<Image>>;
}
