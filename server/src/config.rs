use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::timeframe::Timeframe;

/// Server configuration derived from environment variables. Every option
/// has a working default; no variable is required for correctness.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,

    /// Root directory holding one `{label}.csv` per timeframe.
    pub data_path: PathBuf,
    pub default_timeframe: Timeframe,

    /// Candles per visible window (the rightmost candle defines its end).
    pub visible_window: usize,

    /// Transition deadlines. Advisory: an in-flight transition is never
    /// cancelled, but the DESTRUCT ack wait is bounded by them.
    pub transition_timeout: Duration,
    pub transition_timeout_after_goto: Duration,

    /// Plausibility bounds for the documented instrument.
    pub price_min: f64,
    pub price_max: f64,

    /// Floor for the auto-play tick delay at maximum speed.
    pub autoplay_min_delay_ms: u64,
}

fn env_str(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let default_timeframe = Timeframe::parse(&env_str("REPLAY_DEFAULT_TIMEFRAME", "5m"))
            .unwrap_or(Timeframe::Min5);

        Self {
            bind: env_str("REPLAY_BIND", "127.0.0.1"),
            port: env_u16("REPLAY_PORT", 8765),
            data_path: PathBuf::from(env_str("REPLAY_DATA_PATH", "data")),
            default_timeframe,
            visible_window: env_usize("REPLAY_VISIBLE_WINDOW", 200).max(1),
            transition_timeout: Duration::from_millis(env_u64(
                "REPLAY_TRANSITION_TIMEOUT_MS",
                8_000,
            )),
            transition_timeout_after_goto: Duration::from_millis(env_u64(
                "REPLAY_TRANSITION_TIMEOUT_AFTER_GOTO_MS",
                15_000,
            )),
            price_min: env_f64("REPLAY_PRICE_MIN", 1e3),
            price_max: env_f64("REPLAY_PRICE_MAX", 1e6),
            autoplay_min_delay_ms: env_u64("REPLAY_AUTOPLAY_MIN_DELAY_MS", 67).max(1),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8765,
            data_path: PathBuf::from("data"),
            default_timeframe: Timeframe::Min5,
            visible_window: 200,
            transition_timeout: Duration::from_millis(8_000),
            transition_timeout_after_goto: Duration::from_millis(15_000),
            price_min: 1e3,
            price_max: 1e6,
            autoplay_min_delay_ms: 67,
        }
    }
}
