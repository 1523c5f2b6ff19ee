use std::collections::BTreeMap;

use serde::Serialize;

use crate::candle::Candle;
use crate::timeframe::Timeframe;

/// How much synthetic data has bled into a timeframe's visible series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Contamination {
    Clean,
    Light,
    Moderate,
    Heavy,
}

impl Contamination {
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => Contamination::Clean,
            1..=2 => Contamination::Light,
            3..=5 => Contamination::Moderate,
            _ => Contamination::Heavy,
        }
    }
}

/// One user-generated "next candle" event. Appended in creation order,
/// never mutated, never deleted before process shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct SkipEvent {
    pub id: u64,
    pub time: i64,
    pub origin_timeframe: Timeframe,
    pub candle: Candle,
    pub created_at: i64,
}

/// Append-only log of skip events, kept strictly apart from the historical
/// baseline. Projections re-express the log in any timeframe on demand.
#[derive(Debug, Default)]
pub struct SkipStore {
    events: Vec<SkipEvent>,
    next_id: u64,
}

impl SkipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a skip-generated candle. Ids are monotonic in append order.
    pub fn append(&mut self, origin: Timeframe, candle: Candle, created_at: i64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.events.push(SkipEvent {
            id,
            time: candle.time,
            origin_timeframe: origin,
            candle,
            created_at,
        });
        id
    }

    /// Project the log into `target`: every event is re-aligned to the
    /// target's boundary and deduplicated by the aligned timestamp, the most
    /// recently appended event winning a conflict. The result is sorted with
    /// strictly unique timestamps.
    ///
    /// A skip from another timeframe is emitted as exactly one candle at its
    /// aligned boundary in both directions: a 5m skip shown at 15m collapses
    /// onto the 15m bucket, and a 15m skip shown at 5m stays one candle.
    /// No sub-candles are fabricated.
    pub fn project(&self, target: Timeframe) -> Vec<Candle> {
        let mut by_time: BTreeMap<i64, Candle> = BTreeMap::new();
        for event in &self.events {
            let mut candle = event.candle;
            candle.time = target.align(event.candle.time);
            by_time.insert(candle.time, candle);
        }
        by_time.into_values().collect()
    }

    /// Number of synthetic candles `target`'s chart would show: the size of
    /// the deduplicated projection.
    pub fn visible_count(&self, target: Timeframe) -> usize {
        self.project(target).len()
    }

    pub fn contamination_level(&self, target: Timeframe) -> Contamination {
        Contamination::from_count(self.visible_count(target))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[SkipEvent] {
        &self.events
    }

    /// Process-restart semantics only. A Go-To-Date never clears the log.
    pub fn clear(&mut self) {
        self.events.clear();
        self.next_id = 0;
    }
}
