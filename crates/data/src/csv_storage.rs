use anyhow::{Context, Result};
use btc_predictor_core::{Candle, OhlcvSeries};
use chrono::{DateTime, Utc};
use csv::{Reader, Writer};
use std::fs::File;
use std::path::Path;

const HEADER: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Parses RFC 3339 or integer epoch milliseconds.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        let millis: i64 = raw.parse()?;
        return DateTime::from_timestamp_millis(millis)
            .with_context(|| format!("timestamp out of range: {raw}"));
    }
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp: {raw}"))?
        .with_timezone(&Utc))
}

/// Reads OHLCV candles from a CSV file with header
/// `timestamp,open,high,low,close,volume`.
///
/// Rows may be in any order; duplicates keep the first occurrence.
///
/// # Errors
/// Returns error if the file cannot be opened or a row fails to parse
pub fn read_ohlcv_csv(path: &Path) -> Result<OhlcvSeries> {
    let file =
        File::open(path).with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let mut reader = Reader::from_reader(file);

    let mut candles = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.with_context(|| format!("{}: bad row {}", path.display(), line + 2))?;
        let timestamp = parse_timestamp(&row.timestamp)
            .with_context(|| format!("{}: bad row {}", path.display(), line + 2))?;
        candles.push(Candle::new(
            timestamp, row.open, row.high, row.low, row.close, row.volume,
        ));
    }

    tracing::debug!(path = %path.display(), rows = candles.len(), "read OHLCV CSV");
    Ok(OhlcvSeries::from_unsorted(candles))
}

/// Writes candles sorted by timestamp with RFC 3339 timestamps.
///
/// # Errors
/// Returns error if file cannot be created or writing fails
pub fn write_ohlcv_csv(path: &Path, candles: &[Candle]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    let mut writer = Writer::from_writer(file);
    writer.write_record(HEADER)?;

    let mut sorted = candles.to_vec();
    sorted.sort_by_key(|c| c.timestamp);

    for candle in sorted {
        writer.write_record(&[
            candle.timestamp.to_rfc3339(),
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.volume.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
