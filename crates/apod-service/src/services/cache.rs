//! The cache coordinator, resolving days into records.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::caching::{CacheStore, FetchError, FetchResult, PayloadKind, PendingOperations};
use crate::config::{Config, WarmupConfig};
use crate::types::{CalendarDay, Image, Record};

use super::{FetchClient, HttpFetchClient};

/// Which payloads [`ApodCache::resolve`] should make available on the record.
///
/// The default resolves metadata only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Fetch the thumbnail unless it is already cached.
    pub thumbnail: bool,
    /// Fetch the full resolution image unless it is already cached.
    pub image: bool,
    /// Fetch the requested payloads even if they are cached, replacing the cached ones.
    ///
    /// Concurrent reloads of the same payload share one fetch. Metadata is never fetched again.
    pub force_reload: bool,
}

impl ResolveOptions {
    pub fn with_thumbnail(mut self) -> Self {
        self.thumbnail = true;
        self
    }

    pub fn with_image(mut self) -> Self {
        self.image = true;
        self
    }

    pub fn force_reload(mut self) -> Self {
        self.force_reload = true;
        self
    }

    /// The payloads a default warm-up resolves.
    pub fn from_warmup(config: &WarmupConfig) -> Self {
        Self {
            thumbnail: config.thumbnails,
            image: config.images,
            force_reload: false,
        }
    }
}

/// The outcome of [`ApodCache::load`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Days that were resolved with all requested payloads.
    pub resolved: usize,
    /// Days for which at least one stage failed.
    pub failed: usize,
}

/// A payload that is fetched separately, after the metadata of its record.
#[derive(Clone, Copy, Debug)]
enum Payload {
    Thumbnail,
    FullImage,
}

impl Payload {
    fn kind(self) -> PayloadKind {
        match self {
            Payload::Thumbnail => PayloadKind::Thumbnail,
            Payload::FullImage => PayloadKind::Image,
        }
    }

    fn cached(self, record: &Record) -> Option<Image> {
        match self {
            Payload::Thumbnail => record.thumbnail(),
            Payload::FullImage => record.full_image(),
        }
    }

    fn store(self, record: &Record, image: Image) {
        match self {
            Payload::Thumbnail => record.set_thumbnail(image),
            Payload::FullImage => record.set_full_image(image),
        }
    }

    fn fetch<'a>(
        self,
        client: &'a dyn FetchClient,
        record: &'a Record,
    ) -> BoxFuture<'a, FetchResult<Image>> {
        match self {
            Payload::Thumbnail => client.fetch_thumbnail(record),
            Payload::FullImage => client.fetch_full_image(record),
        }
    }
}

struct ApodCacheInner {
    client: Arc<dyn FetchClient>,
    store: CacheStore,
    metadata: PendingOperations<Arc<Record>>,
    /// Payload operations resolve to whether they fetched the payload, rather than finding it on
    /// the record.
    thumbnails: PendingOperations<bool>,
    images: PendingOperations<bool>,
    warmup: WarmupConfig,
}

impl ApodCacheInner {
    fn pending(&self, payload: Payload) -> &PendingOperations<bool> {
        match payload {
            Payload::Thumbnail => &self.thumbnails,
            Payload::FullImage => &self.images,
        }
    }
}

/// In-memory cache of APOD records.
///
/// Records are resolved day by day. Every day's metadata is fetched once and kept for the lifetime
/// of the cache, and thumbnails and full images are fetched on demand and stored on the record.
/// Concurrent requests for the same day and payload share a single upstream fetch, while requests
/// for different days or payloads proceed independently.
///
/// Failures are not cached: the next request for a failed payload goes back to the network.
///
/// The cache is cheap to clone; all clones share the same records.
#[derive(Clone)]
pub struct ApodCache {
    inner: Arc<ApodCacheInner>,
}

impl fmt::Debug for ApodCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApodCache")
            .field("client", &self.inner.client)
            .field("records", &self.inner.store.len())
            .field("metadata", &self.inner.metadata)
            .field("thumbnails", &self.inner.thumbnails)
            .field("images", &self.inner.images)
            .field("warmup", &self.inner.warmup)
            .finish()
    }
}

impl ApodCache {
    pub fn new(client: Arc<dyn FetchClient>, warmup: WarmupConfig) -> Self {
        Self {
            inner: Arc::new(ApodCacheInner {
                client,
                store: CacheStore::new(),
                metadata: PendingOperations::new(PayloadKind::Metadata),
                thumbnails: PendingOperations::new(PayloadKind::Thumbnail),
                images: PendingOperations::new(PayloadKind::Image),
                warmup,
            }),
        }
    }

    /// Creates a cache fetching from the HTTP API configured in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = HttpFetchClient::from_config(config)?;
        Ok(Self::new(Arc::new(client), config.warmup))
    }

    /// Resolves the record of `date`, with the payloads requested in `options`.
    ///
    /// Metadata is resolved first, then the thumbnail, then the full image. A failure in the
    /// metadata stage is returned as is and nothing is cached. A failure in a later stage is
    /// returned as well, but the record stays cached with its metadata, and the next request only
    /// retries the failed payload.
    ///
    /// Records without a full resolution image, like videos, skip the image stage.
    #[tracing::instrument(skip_all, fields(%date))]
    pub async fn resolve(
        &self,
        date: CalendarDay,
        options: ResolveOptions,
    ) -> FetchResult<Arc<Record>> {
        metric!(counter("cache.access") += 1);

        let record = self.resolve_metadata(date).await?;

        if options.thumbnail {
            self.resolve_payload(&record, Payload::Thumbnail, options.force_reload)
                .await?;
        }

        if options.image {
            if record.image_url().is_some() {
                self.resolve_payload(&record, Payload::FullImage, options.force_reload)
                    .await?;
            } else {
                tracing::debug!("Record has no full resolution image");
            }
        }

        Ok(record)
    }

    /// Looks up the record of `date` without fetching anything.
    pub fn get(&self, date: CalendarDay) -> Option<Arc<Record>> {
        self.inner.store.get(date)
    }

    /// All days with a cached record, in ascending order.
    pub fn cached_days(&self) -> Vec<CalendarDay> {
        self.inner.store.dates()
    }

    /// Warms the cache for `days` consecutive days, from `start` backwards.
    ///
    /// Days are resolved newest first, with at most
    /// [`max_concurrent_days`](WarmupConfig::max_concurrent_days) at a time. A failing day is
    /// logged and counted, and the remaining days are still loaded.
    #[tracing::instrument(skip_all, fields(%start, days))]
    pub async fn load(&self, start: CalendarDay, days: u32, options: ResolveOptions) -> LoadSummary {
        let concurrency = self.inner.warmup.concurrency();
        tracing::debug!(concurrency, "Warming up cache");

        let results = stream::iter(0..u64::from(days))
            .map(|offset| {
                let date = start.days_before(offset);
                async move { (date, self.resolve(date, options).await) }
            })
            .buffered(concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut summary = LoadSummary::default();
        for (date, result) in results {
            match result {
                Ok(_) => summary.resolved += 1,
                Err(error) => {
                    tracing::warn!(%date, %error, "Failed to load record");
                    summary.failed += 1;
                }
            }
        }

        metric!(counter("cache.warmup.days") += summary.resolved as i64, "status" => "resolved");
        metric!(counter("cache.warmup.days") += summary.failed as i64, "status" => "failed");

        summary
    }

    /// Warms the cache for the configured number of days up to today.
    pub async fn load_default(&self) -> LoadSummary {
        let warmup = &self.inner.warmup;
        let options = ResolveOptions::from_warmup(warmup);
        self.load(CalendarDay::today(), warmup.initial_days, options)
            .await
    }

    async fn resolve_metadata(&self, date: CalendarDay) -> FetchResult<Arc<Record>> {
        if let Some(record) = self.inner.store.get(date) {
            tracing::trace!("Metadata cache hit");
            metric!(counter("cache.hit") += 1, "kind" => "metadata");
            return Ok(record);
        }

        let inner = Arc::clone(&self.inner);
        let operation = self.inner.metadata.join_or_start(date, move || async move {
            // A fetch that finished right before this one was registered has already stored
            // its record.
            if let Some(record) = inner.store.get(date) {
                return Ok(record);
            }

            metric!(counter("cache.fetch") += 1, "kind" => "metadata");
            let fetch_start = Instant::now();
            let result = inner.client.fetch_metadata(date).await;
            metric!(timer("cache.fetch.duration") = fetch_start.elapsed(), "kind" => "metadata");
            let record = result.inspect_err(|error| record_error(PayloadKind::Metadata, error))?;

            let record = inner.store.insert_if_absent(Arc::new(record));
            metric!(gauge("cache.records") = inner.store.len() as u64);
            Ok(record)
        });

        operation.await
    }

    async fn resolve_payload(
        &self,
        record: &Arc<Record>,
        payload: Payload,
        force_reload: bool,
    ) -> FetchResult<()> {
        let kind = payload.kind().as_str();
        if !force_reload && payload.cached(record).is_some() {
            tracing::trace!(kind, "Payload cache hit");
            metric!(counter("cache.hit") += 1, "kind" => kind);
            return Ok(());
        }

        loop {
            let inner = Arc::clone(&self.inner);
            let record = Arc::clone(record);
            let operation = self.inner.pending(payload).join_or_start(
                record.date(),
                move || async move {
                    if !force_reload && payload.cached(&record).is_some() {
                        return Ok(false);
                    }

                    metric!(counter("cache.fetch") += 1, "kind" => kind);
                    let fetch_start = Instant::now();
                    let result = payload.fetch(inner.client.as_ref(), &record).await;
                    metric!(timer("cache.fetch.duration") = fetch_start.elapsed(), "kind" => kind);
                    let image = result.inspect_err(|error| record_error(payload.kind(), error))?;

                    payload.store(&record, image);
                    Ok(true)
                },
            );

            let fetched = operation.await?;
            if fetched || !force_reload {
                return Ok(());
            }

            // Joined an operation that found the payload cached. A reload needs a fresh fetch,
            // and the finished operation no longer blocks starting one.
            tracing::trace!(kind, "Joined a cache hit, reloading");
        }
    }
}

fn record_error(kind: PayloadKind, error: &FetchError) {
    tracing::debug!(%kind, %error, "Fetch failed");
    metric!(
        counter("cache.error") += 1,
        "kind" => kind.as_str(),
        "reason" => error.metrics_tag(),
    );
}
