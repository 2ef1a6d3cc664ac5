use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

/// The public APOD endpoint.
pub const DEFAULT_API_URL: &str = "https://api.nasa.gov/planetary/apod";

/// The rate limited key NASA hands out for exploring the API.
pub const DEMO_API_KEY: &str = "DEMO_KEY";

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "apod".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Controls how the cache is warmed up in bulk.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct WarmupConfig {
    /// The number of days loaded by a default warm-up, counting back from today.
    pub initial_days: u32,
    /// How many days are resolved at the same time during a warm-up.
    ///
    /// The default of `1` resolves one day after the other, which keeps the burst of requests
    /// against the remote service small. Values below `1` are treated as `1`.
    pub max_concurrent_days: usize,
    /// Whether a default warm-up also fetches thumbnails.
    pub thumbnails: bool,
    /// Whether a default warm-up also fetches full resolution images.
    pub images: bool,
}

impl WarmupConfig {
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_days.max(1)
    }
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            initial_days: 10,
            max_concurrent_days: 1,
            thumbnails: true,
            images: false,
        }
    }
}

/// See the README for more information on config values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The endpoint serving record metadata.
    pub api_url: Url,

    /// The key sent along with every metadata request.
    ///
    /// Defaults to the `APOD_API_KEY` environment variable, or the public demo key.
    pub api_key: String,

    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The timeout for a whole request, including reading the response body.
    ///
    /// A request running into this timeout fails with a network error.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Bulk warm-up settings.
    pub warmup: WarmupConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: DEFAULT_API_URL.parse().unwrap(),
            api_key: env::var("APOD_API_KEY").unwrap_or_else(|_| DEMO_API_KEY.to_owned()),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            warmup: WarmupConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
