//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use apod_service::config::Config;
use apod_service::metrics;
use apod_service::services::{ApodCache, ResolveOptions};
use apod_service::types::{CalendarDay, ParseCalendarDayError};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::logging;
use crate::output;

/// How records are printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Outputs the record summary as JSON.
    Json,
    /// Outputs the record as a table, followed by its explanation.
    Pretty,
}

/// A local cache of the Astronomy Picture of the Day.
///
/// Records are fetched from the API configured with `api_url` and `api_key`. Without a config
/// file, the public API is used with the key in the `APOD_API_KEY` environment variable, or the
/// rate limited demo key.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Overrides the configured log level.
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve the record of one day and print it.
    Show(ShowArgs),

    /// Load a range of days into the cache and print what was loaded.
    Warm(WarmArgs),
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// The day to show, as `YYYY-MM-DD` or `today`.
    #[arg(value_parser = parse_day)]
    date: CalendarDay,

    /// Also fetch the thumbnail.
    #[arg(long)]
    thumbnail: bool,

    /// Also fetch the full resolution image.
    #[arg(long)]
    image: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct WarmArgs {
    /// The newest day to load, as `YYYY-MM-DD` or `today`.
    #[arg(long, value_parser = parse_day)]
    start: Option<CalendarDay>,

    /// The number of days to load, counting back from the start day.
    ///
    /// Defaults to `warmup.initial_days` from the configuration.
    #[arg(long)]
    days: Option<u32>,

    /// Also fetch thumbnails.
    ///
    /// When neither this nor `--images` is passed, the configured warm-up payloads are fetched.
    #[arg(long)]
    thumbnails: bool,

    /// Also fetch full resolution images.
    #[arg(long)]
    images: bool,
}

impl WarmArgs {
    fn options(&self, config: &Config) -> ResolveOptions {
        if !self.thumbnails && !self.images {
            return ResolveOptions::from_warmup(&config.warmup);
        }

        ResolveOptions {
            thumbnail: self.thumbnails,
            image: self.images,
            force_reload: false,
        }
    }
}

fn parse_day(s: &str) -> Result<CalendarDay, ParseCalendarDayError> {
    if s.eq_ignore_ascii_case("today") {
        return Ok(CalendarDay::today());
    }
    s.parse()
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    // SAFETY: The runtime has not been started yet, so no other threads exist.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    let cache = ApodCache::from_config(&config).context("failed to create the cache")?;

    runtime.block_on(async {
        match cli.command {
            Command::Show(args) => show(&cache, args).await,
            Command::Warm(args) => warm(&cache, &config, args).await,
        }
    })
}

async fn show(cache: &ApodCache, args: ShowArgs) -> Result<()> {
    let mut options = ResolveOptions::default();
    if args.thumbnail {
        options = options.with_thumbnail();
    }
    if args.image {
        options = options.with_image();
    }

    let record = cache
        .resolve(args.date, options)
        .await
        .with_context(|| format!("failed to resolve the record of {}", args.date))?;

    match args.format {
        OutputFormat::Json => output::print_json(&record.summary())?,
        OutputFormat::Pretty => output::print_record(&record),
    }

    Ok(())
}

async fn warm(cache: &ApodCache, config: &Config, args: WarmArgs) -> Result<()> {
    let start = args.start.unwrap_or_else(CalendarDay::today);
    let days = args.days.unwrap_or(config.warmup.initial_days);
    let options = args.options(config);

    tracing::info!(%start, days, "Warming up the cache");
    let summary = cache.load(start, days, options).await;

    let records: Vec<_> = cache
        .cached_days()
        .into_iter()
        .rev()
        .filter_map(|date| cache.get(date))
        .collect();
    output::print_records(&records);
    output::print_load_summary(&summary);

    if summary.resolved == 0 && summary.failed > 0 {
        bail!("failed to load any of the {} days", summary.failed);
    }

    Ok(())
}
