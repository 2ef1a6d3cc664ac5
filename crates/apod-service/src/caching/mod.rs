//! # Caching infrastructure
//!
//! Every record is fetched in up to three independent pieces: its metadata, its thumbnail and its
//! full resolution image. This module contains the two shared structures that make sure each piece
//! is fetched at most once, and the [`FetchError`] type that is handed out when fetching fails.
//!
//! ## Cache Layers
//!
//! - The [`CacheStore`] holds every record for which metadata was resolved, keyed by its
//!   [`CalendarDay`](crate::types::CalendarDay). Records are never evicted. Thumbnail and full image
//!   are stored on the record itself once they arrive.
//! - The [`PendingOperations`] registries, one per [`PayloadKind`], hold the fetches that are
//!   currently in flight. They are used for request coalescing: a second request for the same day
//!   and payload joins the running fetch instead of starting a new one.
//!
//! A request goes through the following steps:
//! - First, it looks for the record in the [`CacheStore`], or for the payload on the record.
//! - On miss, it joins the pending operation for that day and payload, or starts a new one.
//! - The operation fetches from the remote service and writes the result back into the store or
//!   onto the record *before* it is removed from the registry, so a request arriving later will
//!   see the cached value.
//!
//! ## [`FetchError`]
//!
//! Failures are never cached. A failed operation is removed from its registry like a successful
//! one, every caller that joined it receives the same error, and the next request starts over.
//!
//! ### Metrics
//!
//! - `pending.started`: A fresh upstream fetch was started, tagged with `kind`.
//! - `pending.joined`: A request was coalesced into a running fetch, tagged with `kind`.

mod fetch_error;
mod pending;
mod store;

pub use fetch_error::{FetchError, FetchResult};
pub use pending::{PayloadKind, PendingFuture, PendingOperations};
pub use store::CacheStore;
