//! Command line front end of the APOD cache.
//!
//! Resolves single days or warms the cache for a range of days, fetching from the API configured
//! in the config file, and prints what was loaded.

#![warn(
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod logging;
mod output;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
