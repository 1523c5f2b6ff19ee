//! CSV candle loading.
//!
//! Two on-disk layouts are accepted per file:
//! - epoch layout: `time,open,high,low,close,volume` with epoch-second
//!   timestamps and lowercase headers;
//! - datetime layout: an unnamed first column of ISO-like datetimes followed
//!   by capitalized `Open,High,Low,Close,Volume` columns. Ambiguous
//!   datetimes are parsed day-first.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};

use crate::candle::Candle;

/// Result of loading one file: chronologically sorted candles with unique
/// timestamps (last write wins), plus the number of rows that were skipped
/// as unparseable.
#[derive(Debug)]
pub struct LoadOutcome {
    pub candles: Vec<Candle>,
    pub skipped_rows: usize,
}

/// Datetime formats tried in order. Day-first variants cover the ambiguous
/// dot/slash layouts observed in the source data.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Parse a human-readable datetime cell to epoch seconds (UTC).
pub fn parse_datetime(s: &str) -> Option<i64> {
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_time(chrono::NaiveTime::MIN).and_utc().timestamp());
    }
    None
}

/// Parse a time cell: epoch seconds (milliseconds are detected and scaled
/// down) or one of the supported datetime formats.
fn parse_time_cell(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(v) = s.parse::<i64>() {
        return Some(normalize_epoch(v));
    }
    if let Ok(v) = s.parse::<f64>() {
        if v.is_finite() && v > 0.0 {
            return Some(normalize_epoch(v as i64));
        }
        return None;
    }
    parse_datetime(s)
}

/// Millisecond timestamps (13+ digits) are scaled to seconds.
fn normalize_epoch(v: i64) -> i64 {
    if v > 1_000_000_000_000 {
        v / 1000
    } else {
        v
    }
}

fn parse_price(cell: Option<&str>) -> Option<f64> {
    let v: f64 = cell?.trim().parse().ok()?;
    if v.is_finite() {
        Some(v)
    } else {
        None
    }
}

/// Load one timeframe's candles from `path`.
///
/// Column positions are detected from the header row case-insensitively;
/// the time column is the one named `time`/`timestamp`/`date`, falling back
/// to the first column (the datetime layout leaves it unnamed). Rows that
/// fail to parse are counted, not fatal. A missing volume column yields 0.
pub fn load_candles(path: &Path) -> Result<LoadOutcome, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)?;

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let position = |name: &str| headers.iter().position(|h| h == name);
    let time_col = headers
        .iter()
        .position(|h| h == "time" || h == "timestamp" || h == "date" || h == "datetime")
        .unwrap_or(0);
    let open_col = position("open").unwrap_or(1);
    let high_col = position("high").unwrap_or(2);
    let low_col = position("low").unwrap_or(3);
    let close_col = position("close").unwrap_or(4);
    let volume_col = position("volume");

    let mut by_time: BTreeMap<i64, Candle> = BTreeMap::new();
    let mut skipped_rows = 0usize;

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(_) => {
                skipped_rows += 1;
                continue;
            }
        };

        let parsed = record.get(time_col).and_then(parse_time_cell).and_then(|time| {
            Some(Candle {
                time,
                open: parse_price(record.get(open_col))?,
                high: parse_price(record.get(high_col))?,
                low: parse_price(record.get(low_col))?,
                close: parse_price(record.get(close_col))?,
                volume: volume_col
                    .and_then(|col| parse_price(record.get(col)))
                    .unwrap_or(0.0),
            })
        });

        match parsed {
            // Last write wins on duplicate timestamps.
            Some(candle) => {
                by_time.insert(candle.time, candle);
            }
            None => skipped_rows += 1,
        }
    }

    Ok(LoadOutcome {
        candles: by_time.into_values().collect(),
        skipped_rows,
    })
}
