//! In-memory multi-timeframe candle tables.

pub mod aggregate;
pub mod csv;

use std::collections::HashMap;
use std::path::Path;

use crate::candle::Candle;
use crate::config::ServerConfig;
use crate::timeframe::Timeframe;

/// One timeframe's candles: strictly increasing by time, no duplicates,
/// immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// The loader guarantees sorted, timestamp-unique input.
    pub fn new(candles: Vec<Candle>) -> Self {
        debug_assert!(candles.windows(2).all(|w| w[0].time < w[1].time));
        Self { candles }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Greatest index whose candle opens at or before `target_time`; exact
    /// matches win. A target before the first candle maps to index 0, never
    /// to some fixed offset into the series.
    pub fn find_index(&self, target_time: i64) -> usize {
        let upper = self.candles.partition_point(|c| c.time <= target_time);
        upper.saturating_sub(1)
    }

    /// Exact-timestamp lookup.
    pub fn at_time(&self, time: i64) -> Option<&Candle> {
        self.candles
            .binary_search_by_key(&time, |c| c.time)
            .ok()
            .map(|i| &self.candles[i])
    }

    /// Up to `count` candles ending at `end_exclusive - 1`.
    pub fn slice(&self, end_exclusive: usize, count: usize) -> &[Candle] {
        let end = end_exclusive.min(self.candles.len());
        let start = end.saturating_sub(count);
        &self.candles[start..end]
    }

    /// All candles with `start_time <= time <= end_time` (inclusive ends).
    pub fn range(&self, start_time: i64, end_time: i64) -> &[Candle] {
        let start = self.candles.partition_point(|c| c.time < start_time);
        let end = self.candles.partition_point(|c| c.time <= end_time);
        &self.candles[start..end]
    }
}

/// All loaded timeframes. Read-only after startup; shared without locking.
#[derive(Debug, Default)]
pub struct CandleStore {
    series: HashMap<Timeframe, CandleSeries>,
}

impl CandleStore {
    /// Load every timeframe's CSV from `{data_path}/{label}.csv`. A missing
    /// or empty file leaves that timeframe unavailable without failing the
    /// rest. Timeframes other than 4h that lack a file are synthesized from
    /// the 1m dataset when it is present; 4h is served only from its own
    /// file.
    pub fn load(config: &ServerConfig) -> Self {
        let mut store = CandleStore::default();

        for tf in Timeframe::all() {
            let path = config.data_path.join(format!("{}.csv", tf.label()));
            store.load_file(*tf, &path);
        }

        let fallback: Vec<(Timeframe, Vec<Candle>)> = Timeframe::all()
            .iter()
            .copied()
            .filter(|tf| {
                !store.available(*tf) && *tf != Timeframe::Min1 && *tf != Timeframe::Hour4
            })
            .filter_map(|tf| {
                store
                    .series(Timeframe::Min1)
                    .map(|base| (tf, aggregate::aggregate(base.candles(), tf)))
            })
            .collect();
        for (tf, candles) in fallback {
            if !candles.is_empty() {
                tracing::info!("aggregated {} candles for {} from 1m", candles.len(), tf);
                store.series.insert(tf, CandleSeries::new(candles));
            }
        }

        store
    }

    fn load_file(&mut self, tf: Timeframe, path: &Path) {
        match csv::load_candles(path) {
            Ok(outcome) => {
                if outcome.skipped_rows > 0 {
                    tracing::warn!(
                        "{}: skipped {} unparseable rows",
                        tf,
                        outcome.skipped_rows
                    );
                }
                if outcome.candles.is_empty() {
                    tracing::warn!("{}: empty dataset at {}, unavailable", tf, path.display());
                } else {
                    tracing::info!(
                        "{}: loaded {} candles from {}",
                        tf,
                        outcome.candles.len(),
                        path.display()
                    );
                    self.series.insert(tf, CandleSeries::new(outcome.candles));
                }
            }
            Err(e) => {
                tracing::warn!("{}: no dataset ({e}), unavailable", tf);
            }
        }
    }

    /// Test/seed constructor from pre-built series.
    pub fn from_series(series: Vec<(Timeframe, Vec<Candle>)>) -> Self {
        Self {
            series: series
                .into_iter()
                .map(|(tf, candles)| (tf, CandleSeries::new(candles)))
                .collect(),
        }
    }

    pub fn available(&self, tf: Timeframe) -> bool {
        self.series.contains_key(&tf)
    }

    pub fn series(&self, tf: Timeframe) -> Option<&CandleSeries> {
        self.series.get(&tf)
    }

    /// Available timeframes ordered by minute length.
    pub fn available_timeframes(&self) -> Vec<Timeframe> {
        Timeframe::all()
            .iter()
            .copied()
            .filter(|tf| self.available(*tf))
            .collect()
    }
}
