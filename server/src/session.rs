use crate::config::ServerConfig;
use crate::cursor::TimeCursor;
use crate::data::CandleStore;
use crate::lifecycle::ChartLifecycle;
use crate::skips::SkipStore;
use crate::timeframe::Timeframe;

/// All mutable replay state for the single connected client, guarded by one
/// `tokio::sync::Mutex` in `AppState` (the transition mutex). The
/// coordinator is the only code that mutates cursor, skips and lifecycle,
/// and only inside an open transaction.
#[derive(Debug)]
pub struct Session {
    pub timeframe: Timeframe,
    pub cursor: TimeCursor,
    pub skips: SkipStore,
    pub lifecycle: ChartLifecycle,

    pub play_mode: bool,
    /// Auto-play rate, linear 1..=15.
    pub speed: f64,

    /// Set by a committed Go-To-Date; grants the next timeframe switch the
    /// extended transition deadline, then clears.
    pub post_goto: bool,

    /// Epoch seconds of the last committed transition, for `/api/chart/status`.
    pub last_update: i64,
}

impl Session {
    pub fn new(config: &ServerConfig, store: &CandleStore) -> Self {
        let timeframe = if store.available(config.default_timeframe) {
            config.default_timeframe
        } else {
            store
                .available_timeframes()
                .first()
                .copied()
                .unwrap_or(config.default_timeframe)
        };

        Self {
            timeframe,
            cursor: TimeCursor::at_anchor(initial_anchor(store, timeframe)),
            skips: SkipStore::new(),
            lifecycle: ChartLifecycle::new(),
            play_mode: false,
            speed: 2.0,
            post_goto: false,
            last_update: 0,
        }
    }

    /// A fresh client connected: the cursor re-anchors at the newest candle
    /// and the lifecycle is clean again. The skip log survives until process
    /// shutdown.
    pub fn reset_for_new_client(&mut self, store: &CandleStore) {
        self.cursor = TimeCursor::at_anchor(initial_anchor(store, self.timeframe));
        self.lifecycle.reset();
        self.play_mode = false;
        self.post_goto = false;
    }
}

/// Anchor for a new session: the open time of the last available candle.
fn initial_anchor(store: &CandleStore, timeframe: Timeframe) -> i64 {
    store
        .series(timeframe)
        .and_then(|s| s.last())
        .map(|c| c.time)
        .unwrap_or(0)
}
