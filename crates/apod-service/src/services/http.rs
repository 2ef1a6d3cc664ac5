//! Support to fetch records from the APOD HTTP API.

use anyhow::Result;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use reqwest::Client;
use url::Url;

use crate::caching::{FetchError, FetchResult};
use crate::config::Config;
use crate::types::{CalendarDay, Image, Record};
use crate::utils::http::{FetchTimeouts, create_client};

use super::FetchClient;

/// [`FetchClient`] talking to the APOD API.
///
/// Metadata is requested as `GET <api_url>?api_key=<key>&date=<YYYY-MM-DD>&thumbs=true`, payloads
/// are fetched from the locators found in the metadata.
#[derive(Clone, Debug)]
pub struct HttpFetchClient {
    client: Client,
    api_url: Url,
    api_key: String,
}

impl HttpFetchClient {
    pub fn new(client: Client, api_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_url,
            api_key: api_key.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let client = create_client(&FetchTimeouts::from_config(config))?;
        Ok(Self::new(
            client,
            config.api_url.clone(),
            config.api_key.clone(),
        ))
    }

    fn metadata_url(&self, date: CalendarDay) -> Url {
        let mut url = self.api_url.clone();
        url.query_pairs_mut()
            .append_pair("api_key", &self.api_key)
            .append_pair("date", &date.to_string())
            .append_pair("thumbs", "true");
        url
    }

    /// Fetches the body of `url`, failing on any non-2xx status.
    async fn fetch_bytes(&self, url: Url, what: &str) -> FetchResult<Bytes> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%status, what, "Unexpected status code");
            return Err(FetchError::Network(format!(
                "unexpected status code {status} fetching {what}"
            )));
        }

        Ok(response.bytes().await?)
    }

    async fn fetch_image(&self, url: &Url, what: &str) -> FetchResult<Image> {
        tracing::debug!("Fetching {} from `{}`", what, url);
        let data = self.fetch_bytes(url.clone(), what).await?;
        Image::decode(data)
    }
}

impl FetchClient for HttpFetchClient {
    fn fetch_metadata(&self, date: CalendarDay) -> BoxFuture<'_, FetchResult<Record>> {
        async move {
            tracing::debug!(%date, "Fetching metadata");
            let data = self.fetch_bytes(self.metadata_url(date), "metadata").await?;
            let record = Record::from_json(&data)?;

            if record.date() != date {
                return Err(FetchError::Decode(format!(
                    "expected the record of {date}, got {}",
                    record.date()
                )));
            }

            Ok(record)
        }
        .boxed()
    }

    fn fetch_thumbnail<'a>(&'a self, record: &'a Record) -> BoxFuture<'a, FetchResult<Image>> {
        self.fetch_image(record.thumbnail_url(), "thumbnail").boxed()
    }

    fn fetch_full_image<'a>(&'a self, record: &'a Record) -> BoxFuture<'a, FetchResult<Image>> {
        async move {
            let url = record.image_url().ok_or_else(|| {
                FetchError::Decode("record has no full-resolution image".into())
            })?;
            self.fetch_image(url, "image").await
        }
        .boxed()
    }
}
