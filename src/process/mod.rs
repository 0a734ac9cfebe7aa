// src/process/mod.rs
use anyhow::{Context, Result};
use arrow::{csv::WriterBuilder, record_batch::RecordBatch};
use csv::ReaderBuilder;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};
use tracing::debug;

pub mod clean;
pub mod convert;
pub mod date_parser;
pub mod raw_table;
pub mod utils;

pub use clean::{clean, PriceRange, LAST_REVIEW_COLUMN, PRICE_COLUMN};
pub use raw_table::RawTable;

/// Read a headered CSV file into memory. Field values are kept as the `csv` reader decodes
/// them; only empty fields become `None`. A row whose field count differs from the header
/// is an error.
#[tracing::instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn load_raw_csv<P: AsRef<Path>>(path: P) -> Result<RawTable> {
    let file = File::open(&path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path.as_ref()))?;
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers: Vec<String> = rdr
        .headers()
        .with_context(|| format!("Failed to read CSV header of {:?}", path.as_ref()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("CSV parse error at record {}", idx))?;
        let row = record
            .iter()
            .map(|field| (!field.is_empty()).then(|| field.to_string()))
            .collect();
        rows.push(row);
    }

    debug!(columns = headers.len(), rows = rows.len(), "loaded csv");
    Ok(RawTable { headers, rows })
}

/// Read a CSV file into a typed record batch.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<RecordBatch> {
    let raw = load_raw_csv(path)?;
    convert::raw_to_record_batch(&raw)
}

/// Write a record batch as CSV with a header row; nulls become empty fields.
#[tracing::instrument(level = "info", skip(batch, path), fields(path = %path.as_ref().display(), rows = batch.num_rows()))]
pub fn write_csv<P: AsRef<Path>>(batch: &RecordBatch, path: P) -> Result<()> {
    let file = File::create(&path)
        .with_context(|| format!("creating output CSV {:?}", path.as_ref()))?;
    let mut writer = WriterBuilder::new()
        .with_header(true)
        .with_date_format("%Y-%m-%d".to_string())
        .build(BufWriter::new(file));
    writer.write(batch).context("writing CSV rows")?;
    writer
        .into_inner()
        .flush()
        .with_context(|| format!("flushing output CSV {:?}", path.as_ref()))?;
    Ok(())
}
