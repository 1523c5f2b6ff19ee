//! The typed wire layer. Only these shapes cross the duplex channel; every
//! field is a scalar or an array/object of scalars, so the client-side JSON
//! parser never sees a tabular payload.

use serde::{Deserialize, Serialize};

use crate::candle::Candle;
use crate::cursor::CursorInfo;
use crate::skips::Contamination;
use crate::timeframe::Timeframe;

/// Visible-range hint for the chart's time scale: the data span plus a
/// quarter of right margin, matching the client's standard positioning.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VisibleRange {
    pub from: i64,
    pub to: i64,
}

impl VisibleRange {
    pub fn for_window(candles: &[Candle]) -> Option<Self> {
        let first = candles.first()?.time;
        let last = candles.last()?.time;
        let margin = (last - first) / 4;
        Some(Self {
            from: first,
            to: last + margin,
        })
    }
}

/// Synthetic-data summary for the target timeframe.
#[derive(Debug, Clone, Serialize)]
pub struct ContaminationInfo {
    pub level: Contamination,
    pub skip_count: usize,
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message after connect: the current visible window.
    InitialChartData {
        candles: Vec<Candle>,
        timeframe: Timeframe,
        cursor: CursorInfo,
    },
    /// A timeframe switch committed.
    BulletproofTimeframeChanged {
        candles: Vec<Candle>,
        timeframe: Timeframe,
        transaction_id: String,
        contamination: ContaminationInfo,
        needs_recreation: bool,
        visible_range: Option<VisibleRange>,
        clear_cache: bool,
        load_anchor: i64,
    },
    /// A Go-To-Date committed. Always invalidates the client cache.
    GoToDateComplete {
        candles: Vec<Candle>,
        timeframe: Timeframe,
        target_date: i64,
        visible_range: Option<VisibleRange>,
        clear_cache: bool,
        load_anchor: i64,
        play_mode: bool,
    },
    /// New skip candle(s) to append to the live series.
    SkipComplete {
        candles: Vec<Candle>,
        timeframe: Timeframe,
    },
    /// A lazy-loading chunk of older candles to prepend.
    HistoricalDataLoaded {
        candles: Vec<Candle>,
        timeframe: Timeframe,
        count: usize,
        before_timestamp: i64,
    },
    /// Destroy and re-create the chart series, then ack.
    ChartSeriesRecreation {
        transaction_id: String,
        version: u64,
        reason: String,
    },
    /// The server lost confidence in the client's chart state; reload.
    EmergencyRecoveryRequired { reason: String },
    Pong,
}

/// Client-to-server messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The chart series was destroyed and re-created as commanded.
    RecreationAck,
    Ping,
}
