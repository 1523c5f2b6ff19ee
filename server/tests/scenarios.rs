//! End-to-end replay scenarios driven through the transition coordinator,
//! with broadcasts observed exactly as a client would see them.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tokio::sync::broadcast::Receiver;

use replay_server::config::ServerConfig;
use replay_server::data::CandleStore;
use replay_server::lifecycle::SeriesState;
use replay_server::state::AppState;
use replay_server::timeframe::Timeframe;
use replay_server::transition;

// 2024 is a leap year: the dataset spans 2024-01-01 00:00 .. 2024-12-31 23:55.
const YEAR_START: i64 = 1_704_067_200; // 2024-01-01 00:00:00Z
const YEAR_END: i64 = 1_735_689_600; // 2025-01-01 00:00:00Z
const LAST_5M_OPEN: i64 = YEAR_END - 300; // 2024-12-31 23:55:00Z
const JUN_15: i64 = 1_718_409_600; // 2024-06-15 00:00:00Z
const DEC_17: i64 = 1_734_393_600; // 2024-12-17 00:00:00Z

fn write_year_csv(dir: &Path, label: &str, step: i64) {
    let mut out = String::from("time,open,high,low,close,volume\n");
    let mut t = YEAR_START;
    let mut i = 0i64;
    while t < YEAR_END {
        let base = 18_000.0 + (i % 50) as f64 * 2.0;
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            t,
            base,
            base + 5.0,
            base - 5.0,
            base + 1.0,
            100 + i % 10
        ));
        t += step;
        i += 1;
    }
    std::fs::write(dir.join(format!("{label}.csv")), out).unwrap();
}

/// One shared on-disk fixture for the whole suite; every test loads its own
/// store and state from it.
fn data_dir() -> PathBuf {
    static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        write_year_csv(dir.path(), "5m", 300);
        write_year_csv(dir.path(), "15m", 900);
        write_year_csv(dir.path(), "1h", 3_600);
        dir
    })
    .path()
    .to_path_buf()
}

fn test_state() -> Arc<AppState> {
    let config = ServerConfig {
        data_path: data_dir(),
        ..ServerConfig::default()
    };
    let store = CandleStore::load(&config);
    AppState::new(config, store)
}

fn date(y: i32, m: u32, d: u32) -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn drain(rx: &mut Receiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        out.push(serde_json::from_str(&text).unwrap());
    }
    out
}

fn assert_unique_increasing_times(candles: &[Value]) {
    for pair in candles.windows(2) {
        assert!(
            pair[0]["time"].as_i64().unwrap() < pair[1]["time"].as_i64().unwrap(),
            "timestamps must be strictly increasing"
        );
    }
}

// ── Scenario 1: cold start ──────────────────────────────────────────

#[tokio::test]
async fn cold_start_serves_200_candles_ending_at_the_newest() {
    let state = test_state();
    let (candles, timeframe) = transition::current_window(&state).await.unwrap();

    assert_eq!(timeframe, Timeframe::Min5);
    assert_eq!(candles.len(), 200);
    assert_eq!(candles.last().unwrap().time, LAST_5M_OPEN);
    for pair in candles.windows(2) {
        assert!(pair[0].time < pair[1].time);
    }
}

// ── Scenario 2: Go-To-Date consistency across timeframes ───────────

#[tokio::test]
async fn go_to_date_window_ends_at_the_target_in_every_timeframe() {
    let state = test_state();
    transition::go_to_date(&state, date(2024, 6, 15)).await.unwrap();

    for tf in [Timeframe::Min5, Timeframe::Min15, Timeframe::Hour1] {
        let outcome = transition::change_timeframe(&state, tf, 200).await.unwrap();
        let last = *outcome.candles.last().unwrap();
        assert!(last.time <= JUN_15, "{tf}: window overshoots the target");
        assert!(
            last.time + tf.step_secs() > JUN_15,
            "{tf}: window ends short of the target"
        );
    }
}

// ── Scenario 3: skip preserves position across a switch ─────────────

#[tokio::test]
async fn skips_keep_their_position_across_a_timeframe_switch() {
    let state = test_state();
    transition::go_to_date(&state, date(2024, 12, 17)).await.unwrap();

    let mut current = 0;
    for _ in 0..3 {
        current = transition::skip(&state).await.unwrap().current_time;
    }
    assert_eq!(current, DEC_17 + 3 * 300); // 2024-12-17 00:15

    let outcome = transition::change_timeframe(&state, Timeframe::Min15, 200)
        .await
        .unwrap();
    let last = *outcome.candles.last().unwrap();
    assert_eq!(
        last.time,
        DEC_17 + 900,
        "the 15m window must end at the drifted cursor, not at the anchor"
    );
}

// ── Scenario 4: skip dedup on a timeframe switch ────────────────────

#[tokio::test]
async fn skip_projection_dedupes_onto_the_target_boundary() {
    let state = test_state();
    transition::go_to_date(&state, date(2024, 12, 17)).await.unwrap();
    for _ in 0..3 {
        transition::skip(&state).await.unwrap();
    }

    // Skips sit at 00:05, 00:10 and 00:15. On 15m the first two collapse
    // onto 00:00 and the most recent of them (00:10) wins.
    let expected_close = {
        let session = state.session.lock().await;
        let projected = session.skips.project(Timeframe::Min15);
        let at_midnight: Vec<_> = projected.iter().filter(|c| c.time == DEC_17).collect();
        assert_eq!(at_midnight.len(), 1);
        at_midnight[0].close
    };
    let ten_past = state
        .candles
        .series(Timeframe::Min5)
        .unwrap()
        .at_time(DEC_17 + 600)
        .unwrap()
        .close;
    assert_eq!(expected_close, ten_past);

    let mut rx = state.broadcast.subscribe();
    transition::change_timeframe(&state, Timeframe::Min15, 200)
        .await
        .unwrap();
    let messages = drain(&mut rx);
    let data_msg = messages
        .iter()
        .find(|m| m["type"] == "bulletproof_timeframe_changed")
        .expect("switch must broadcast a data message");
    let candles = data_msg["candles"].as_array().unwrap();
    assert!(!candles.is_empty());
    assert_unique_increasing_times(candles);
}

// ── Scenario 5: lifecycle forces recreation after a skip ────────────

#[tokio::test]
async fn a_skip_forces_recreation_on_the_next_switch() {
    let state = test_state();
    transition::go_to_date(&state, date(2024, 12, 17)).await.unwrap();
    transition::skip(&state).await.unwrap();

    let mut rx = state.broadcast.subscribe();
    let outcome = transition::change_timeframe(&state, Timeframe::Min15, 200)
        .await
        .unwrap();
    assert!(outcome.needs_recreation);

    let messages = drain(&mut rx);
    let recreation_at = messages
        .iter()
        .position(|m| m["type"] == "chart_series_recreation")
        .expect("recreation command missing");
    let data_at = messages
        .iter()
        .position(|m| m["type"] == "bulletproof_timeframe_changed")
        .expect("data message missing");
    assert!(
        recreation_at < data_at,
        "the recreation command must precede the data message"
    );
    assert_eq!(messages[data_at]["needs_recreation"], true);
    assert_eq!(messages[data_at]["clear_cache"], true);
}

// ── Scenario 6: cache-invalidation hints ────────────────────────────

#[tokio::test]
async fn goto_invalidates_the_client_cache_and_plain_switches_do_not() {
    let state = test_state();

    let mut rx = state.broadcast.subscribe();
    transition::go_to_date(&state, date(2024, 6, 15)).await.unwrap();
    let messages = drain(&mut rx);
    let goto_msg = messages
        .iter()
        .find(|m| m["type"] == "go_to_date_complete")
        .expect("go_to_date_complete missing");
    assert_eq!(goto_msg["clear_cache"], true);
    assert_eq!(goto_msg["load_anchor"].as_i64().unwrap(), JUN_15);
    assert_eq!(goto_msg["target_date"].as_i64().unwrap(), JUN_15);

    // No contamination: a plain switch must not clear the cache.
    let mut rx = state.broadcast.subscribe();
    transition::change_timeframe(&state, Timeframe::Min15, 200)
        .await
        .unwrap();
    let messages = drain(&mut rx);
    let switch_msg = messages
        .iter()
        .find(|m| m["type"] == "bulletproof_timeframe_changed")
        .unwrap();
    assert_eq!(switch_msg["clear_cache"], false);
    assert_eq!(switch_msg["needs_recreation"], false);
    assert_eq!(switch_msg["load_anchor"].as_i64().unwrap(), JUN_15);
}

// ── Boundary behaviors ──────────────────────────────────────────────

#[tokio::test]
async fn goto_before_the_dataset_shows_the_first_candle() {
    let state = test_state();
    let outcome = transition::go_to_date(&state, date(2023, 12, 1)).await.unwrap();
    assert_eq!(outcome.candles.last().unwrap().time, YEAR_START);
}

#[tokio::test]
async fn goto_after_the_dataset_shows_the_last_candle() {
    let state = test_state();
    let outcome = transition::go_to_date(&state, date(2025, 6, 1)).await.unwrap();
    assert_eq!(outcome.candles.last().unwrap().time, LAST_5M_OPEN);
}

#[tokio::test]
async fn unavailable_timeframe_is_rejected_without_state_change() {
    let state = test_state();
    // No 4h.csv in the fixture, and 4h is never synthesized.
    let err = transition::change_timeframe(&state, Timeframe::Hour4, 200).await;
    assert!(err.is_err());

    let session = state.session.lock().await;
    assert_eq!(session.timeframe, Timeframe::Min5);
    assert_eq!(session.cursor.load_anchor(), LAST_5M_OPEN);
    assert_eq!(session.lifecycle.series_state, SeriesState::Clean);
}

// ── Cursor and lifecycle invariants ─────────────────────────────────

#[tokio::test]
async fn n_skips_advance_the_cursor_exactly_n_steps() {
    let state = test_state();
    transition::go_to_date(&state, date(2024, 12, 17)).await.unwrap();
    for _ in 0..4 {
        transition::skip(&state).await.unwrap();
    }

    let session = state.session.lock().await;
    assert_eq!(session.cursor.load_anchor(), DEC_17 + 4 * 300);
    assert!(session.cursor.is_drifting());
    assert_eq!(session.lifecycle.skip_ops_since_clean, 4);
}

#[tokio::test]
async fn unacked_recreation_keeps_forcing_recreation() {
    let state = test_state();
    transition::go_to_date(&state, date(2024, 12, 17)).await.unwrap();
    transition::skip(&state).await.unwrap();

    // No client is connected, so the recreation is never acked and the
    // contamination counter survives the switch.
    let first = transition::change_timeframe(&state, Timeframe::Min15, 200)
        .await
        .unwrap();
    assert!(first.needs_recreation);
    let second = transition::change_timeframe(&state, Timeframe::Min5, 200)
        .await
        .unwrap();
    assert!(second.needs_recreation);
}

#[tokio::test]
async fn go_to_date_does_not_erase_skips() {
    let state = test_state();
    transition::go_to_date(&state, date(2024, 12, 17)).await.unwrap();
    for _ in 0..2 {
        transition::skip(&state).await.unwrap();
    }

    let outcome = transition::go_to_date(&state, date(2024, 6, 15)).await.unwrap();
    let session = state.session.lock().await;
    assert_eq!(session.skips.len(), 2, "goto must not clear the skip log");
    assert!(!session.skips.project(Timeframe::Min5).is_empty());
    // December skips lie past the June anchor and stay invisible.
    assert!(outcome.candles.iter().all(|c| c.time <= JUN_15));
}

#[tokio::test]
async fn emitted_candles_always_satisfy_the_ohlc_invariant() {
    let state = test_state();
    transition::go_to_date(&state, date(2024, 12, 17)).await.unwrap();
    for _ in 0..3 {
        transition::skip(&state).await.unwrap();
    }
    for tf in [Timeframe::Min5, Timeframe::Min15, Timeframe::Hour1] {
        let outcome = transition::change_timeframe(&state, tf, 200).await.unwrap();
        for c in &outcome.candles {
            assert!(c.low <= c.open.min(c.close));
            assert!(c.open.max(c.close) <= c.high);
            assert!(c.low > 0.0);
        }
    }
}

// ── Round trips ─────────────────────────────────────────────────────

#[tokio::test]
async fn window_candles_survive_a_serialization_round_trip() {
    let state = test_state();
    let (candles, _) = transition::current_window(&state).await.unwrap();
    let json = serde_json::to_string(&candles).unwrap();
    let back: Vec<replay_server::candle::Candle> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, candles);
}

// ── Lazy loading ────────────────────────────────────────────────────

#[tokio::test]
async fn historical_chunks_extend_the_window_to_the_left() {
    let state = test_state();

    let chunk = transition::historical_chunk(&state, Timeframe::Min5, DEC_17, 400).unwrap();
    assert_eq!(chunk.len(), 400);
    // Strictly before the requested timestamp, contiguous up to its edge.
    assert_eq!(chunk.last().unwrap().time, DEC_17 - 300);
    for pair in chunk.windows(2) {
        assert!(pair[0].time < pair[1].time);
    }

    // Exhausted history is an empty chunk, never a fallback candle.
    let none = transition::historical_chunk(&state, Timeframe::Min5, YEAR_START, 400).unwrap();
    assert!(none.is_empty());
}

// ── Auto-play ───────────────────────────────────────────────────────

#[tokio::test]
async fn autoplay_ticks_advance_and_stop_at_the_dataset_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut out = String::from("time,open,high,low,close,volume\n");
    for i in 0..5i64 {
        let t = DEC_17 + i * 300;
        out.push_str(&format!("{t},18000,18010,17990,18005,100\n"));
    }
    std::fs::write(dir.path().join("5m.csv"), out).unwrap();

    let config = ServerConfig {
        data_path: dir.path().to_path_buf(),
        ..ServerConfig::default()
    };
    let store = CandleStore::load(&config);
    let state = AppState::new(config, store);

    // Anchor at the first candle so there is room to play forward.
    transition::go_to_date(&state, date(2024, 12, 17)).await.unwrap();
    state.session.lock().await.play_mode = true;

    // Four steps to the last candle, then the clamp stops play.
    for i in 1..=4i64 {
        let tick = transition::autoplay_tick(&state).await.unwrap();
        assert_eq!(tick.unwrap().current_time, DEC_17 + i * 300);
    }
    let clamped = transition::autoplay_tick(&state).await.unwrap();
    assert!(clamped.is_none());

    let session = state.session.lock().await;
    assert!(!session.play_mode, "auto-play must stop at the dataset end");
    assert_eq!(session.cursor.load_anchor(), DEC_17 + 4 * 300);
}

#[tokio::test]
async fn goto_pauses_autoplay_and_announces_it() {
    let state = test_state();
    state.session.lock().await.play_mode = true;

    let mut rx = state.broadcast.subscribe();
    transition::go_to_date(&state, date(2024, 6, 15)).await.unwrap();

    assert!(!state.session.lock().await.play_mode);
    let messages = drain(&mut rx);
    let goto_msg = messages
        .iter()
        .find(|m| m["type"] == "go_to_date_complete")
        .unwrap();
    assert_eq!(goto_msg["play_mode"], false);
}

#[tokio::test]
async fn manual_skip_past_the_dataset_end_is_rejected() {
    let state = test_state();
    // The fresh session is anchored at the last candle.
    let err = transition::skip(&state).await;
    assert!(err.is_err());
    let session = state.session.lock().await;
    assert_eq!(session.cursor.load_anchor(), LAST_5M_OPEN);
    assert!(session.skips.is_empty());
}
