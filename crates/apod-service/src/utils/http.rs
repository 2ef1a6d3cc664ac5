use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;

/// The User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("apod-service/", env!("CARGO_PKG_VERSION"));

/// Timeouts applied by the fetch client.
#[derive(Copy, Clone, Debug)]
pub struct FetchTimeouts {
    /// The timeout for establishing a connection.
    pub connect: Duration,
    /// Global timeout for one request, including the body.
    pub request: Duration,
}

impl FetchTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.connect_timeout,
            request: config.request_timeout,
        }
    }
}

impl Default for FetchTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(2),
            request: Duration::from_secs(30),
        }
    }
}

/// Creates a [`reqwest::Client`] with the provided timeouts.
pub fn create_client(timeouts: &FetchTimeouts) -> Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .user_agent(USER_AGENT)
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.request)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .context("failed to create http client")
}
