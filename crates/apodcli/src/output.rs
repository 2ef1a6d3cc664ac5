use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use apod_service::services::LoadSummary;
use apod_service::types::{Image, Record};
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Table, row};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn describe_image(image: Option<&Image>) -> String {
    match image {
        Some(image) => {
            let (width, height) = image.dimensions();
            format!(
                "{width}x{height} {:?}, {} bytes",
                image.format(),
                image.len()
            )
        }
        None => "-".to_owned(),
    }
}

/// Prints a detailed description of one record.
pub fn print_record(record: &Record) {
    let (thumbnail, full_image) = record.read();

    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => record.date(), record.title()]);
    table.add_row(row![r->"Media:", format!("{:?}", record.media_kind()).to_lowercase()]);
    if let Some(copyright) = record.copyright() {
        table.add_row(row![r->"Copyright:", copyright]);
    }
    table.add_row(row![r->"Thumbnail URL:", record.thumbnail_url()]);
    if let Some(url) = record.image_url() {
        table.add_row(row![r->"Image URL:", url]);
    }
    table.add_row(row![r->"Thumbnail:", describe_image(thumbnail.as_ref())]);
    table.add_row(row![r->"Image:", describe_image(full_image.as_ref())]);
    table.printstd();

    println!();
    println!("{}", record.explanation());
}

/// Prints one line per record.
pub fn print_records(records: &[Arc<Record>]) {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "Date", "Title", "Thumbnail", "Image"]);

    for record in records {
        let (thumbnail, full_image) = record.read();
        table.add_row(row![
            record.date(),
            record.title(),
            describe_image(thumbnail.as_ref()),
            describe_image(full_image.as_ref()),
        ]);
    }

    table.printstd();
}

pub fn print_load_summary(summary: &LoadSummary) {
    println!();
    println!(
        "Loaded {} days, {} failed.",
        summary.resolved, summary.failed
    );
}
