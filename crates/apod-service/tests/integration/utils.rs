use std::sync::Arc;
use std::time::Duration;

use apod_service::config::WarmupConfig;
use apod_service::services::{ApodCache, HttpFetchClient};
use apod_service::types::{CalendarDay, MediaKind, Record};
use apod_service::utils::http::{FetchTimeouts, create_client};
use apod_test::{ApodServer, redact_localhost_port};

/// The key sent to the test server, it is only checked to appear in the request.
pub const API_KEY: &str = "test-key";

pub fn day(date: &str) -> CalendarDay {
    date.parse().unwrap()
}

/// A client fetching from `server` with short timeouts.
pub fn http_client(server: &ApodServer) -> HttpFetchClient {
    http_client_with(
        server.api_url(),
        FetchTimeouts {
            connect: Duration::from_secs(1),
            request: Duration::from_secs(5),
        },
    )
}

/// A client fetching metadata from `api_url`.
pub fn http_client_with(api_url: url::Url, timeouts: FetchTimeouts) -> HttpFetchClient {
    HttpFetchClient::new(create_client(&timeouts).unwrap(), api_url, API_KEY)
}

/// A cache fetching from `server`, with the default warm-up settings.
pub fn cache(server: &ApodServer) -> ApodCache {
    ApodCache::new(Arc::new(http_client(server)), WarmupConfig::default())
}

/// The URI the cache requests the metadata of `date` with.
pub fn metadata_uri(date: &str) -> String {
    format!("/apod?api_key={API_KEY}&date={date}&thumbs=true")
}

/// A port independent view of a record, for snapshots.
#[derive(Debug)]
#[allow(dead_code)]
pub struct RecordSnapshot {
    date: String,
    title: String,
    copyright: Option<String>,
    media_kind: MediaKind,
    thumbnail_url: String,
    image_url: Option<String>,
    thumbnail: Option<(u32, u32)>,
    full_image: Option<(u32, u32)>,
}

impl From<&Record> for RecordSnapshot {
    fn from(record: &Record) -> Self {
        let (thumbnail, full_image) = record.read();
        Self {
            date: record.date().to_string(),
            title: record.title().to_owned(),
            copyright: record.copyright().map(ToOwned::to_owned),
            media_kind: record.media_kind(),
            thumbnail_url: redact_localhost_port(record.thumbnail_url().as_str()),
            image_url: record
                .image_url()
                .map(|url| redact_localhost_port(url.as_str())),
            thumbnail: thumbnail.map(|image| image.dimensions()),
            full_image: full_image.map(|image| image.dimensions()),
        }
    }
}
