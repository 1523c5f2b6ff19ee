//! Transition coordination.
//!
//! Every state-changing operation (Go-To-Date, timeframe switch, skip,
//! auto-play tick) runs as a transaction against the session, serialized by
//! the session mutex. Series-reloading transitions (GOTO, SWITCH_TF) walk
//! the full five-phase protocol: PRE (validate, plan), DESTRUCT (recreation
//! command + ack wait), LOAD (slice + skip merge + validation), COMMIT
//! (cursor/lifecycle update), BROADCAST (one typed state update). Skip
//! transitions append to the live series and skip the DESTRUCT phase; the
//! contamination they cause is settled by the next series reload.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;

use crate::candle::Candle;
use crate::error::ApiError;
use crate::lifecycle::ChartLifecycle;
use crate::session::Session;
use crate::state::AppState;
use crate::timeframe::Timeframe;
use crate::validate::Validator;
use crate::ws::messages::{ContaminationInfo, ServerMessage, VisibleRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Goto,
    SwitchTf,
    Skip,
    AutoplayTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    Pre,
    Destruct,
    Load,
    Commit,
    Broadcast,
    Done,
    RolledBack,
}

/// One logical user operation in flight. Opened on every state-changing
/// request and closed (DONE or ROLLED_BACK) before the request returns.
#[derive(Debug)]
pub struct TransitionTransaction {
    pub id: String,
    pub kind: TransitionKind,
    pub from_tf: Timeframe,
    pub to_tf: Timeframe,
    pub requested_time: i64,
    pub phase: TransitionPhase,
    pub deadline: Duration,
    started: tokio::time::Instant,
}

impl TransitionTransaction {
    fn open(
        kind: TransitionKind,
        from_tf: Timeframe,
        to_tf: Timeframe,
        requested_time: i64,
        deadline: Duration,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            from_tf,
            to_tf,
            requested_time,
            phase: TransitionPhase::Pre,
            deadline,
            started: tokio::time::Instant::now(),
        }
    }

    fn enter(&mut self, phase: TransitionPhase) {
        self.phase = phase;
    }

    /// Deadline budget left for suspension points (the DESTRUCT ack wait).
    fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.started.elapsed())
    }

    /// Close the transaction. An exceeded deadline is a warning, never a
    /// failure: the broadcast has already completed by the time we notice.
    fn close(&mut self, phase: TransitionPhase) {
        self.phase = phase;
        let elapsed = self.started.elapsed();
        if elapsed > self.deadline {
            tracing::warn!(
                "transition {} ({:?}) exceeded its deadline: {}ms > {}ms",
                self.id,
                self.kind,
                elapsed.as_millis(),
                self.deadline.as_millis()
            );
        }
    }
}

/// PRE-phase output: what the rest of the transition executes.
#[derive(Debug)]
struct TransitionPlan {
    needs_recreation: bool,
    reason: &'static str,
    target_tf: Timeframe,
    target_end_time: i64,
    expected_candle_count: usize,
}

impl TransitionPlan {
    fn for_reload(
        lifecycle: &ChartLifecycle,
        target_tf: Timeframe,
        target_end_time: i64,
        expected_candle_count: usize,
    ) -> Self {
        let needs_recreation = lifecycle.needs_recreation();
        let reason = if lifecycle.skip_ops_since_clean > 0 {
            "skip contamination"
        } else if needs_recreation {
            "corrupted series"
        } else {
            "clean reload"
        };
        Self {
            needs_recreation,
            reason,
            target_tf,
            target_end_time,
            expected_candle_count,
        }
    }
}

#[derive(Debug)]
pub struct GotoOutcome {
    pub transaction_id: String,
    pub target_date: i64,
    pub candles: Vec<Candle>,
}

#[derive(Debug)]
pub struct SwitchOutcome {
    pub transaction_id: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
    pub needs_recreation: bool,
}

#[derive(Debug)]
pub struct SkipOutcome {
    pub transaction_id: String,
    pub timeframe: Timeframe,
    pub candle: Candle,
    pub current_time: i64,
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

fn validator(state: &AppState) -> Validator {
    Validator::new(state.config.price_min, state.config.price_max)
}

/// Merge a historical slice with projected skip candles. A skip overrides
/// the historical candle at the same timestamp; skips beyond the slice are
/// inserted in order. Skips past `end_time` stay invisible, the cursor has
/// not reached them. The result keeps at most `window` candles ending at
/// the newest timestamp.
fn merge_window(historical: &[Candle], skips: &[Candle], end_time: i64, window: usize) -> Vec<Candle> {
    let mut by_time: BTreeMap<i64, Candle> = historical.iter().map(|c| (c.time, *c)).collect();
    for skip in skips {
        if skip.time <= end_time {
            by_time.insert(skip.time, *skip);
        }
    }
    let mut merged: Vec<Candle> = by_time.into_values().collect();
    if merged.len() > window {
        merged.drain(..merged.len() - window);
    }
    merged
}

/// LOAD phase: the visible window for `tf` ending at `end_time`, skips
/// merged in, validated for emission.
fn load_window(
    state: &AppState,
    session: &Session,
    tf: Timeframe,
    end_time: i64,
    window: usize,
) -> Result<Vec<Candle>, ApiError> {
    let series = state
        .candles
        .series(tf)
        .ok_or_else(|| ApiError::BadRequest(format!("timeframe {tf} is not available")))?;

    let end_index = series.find_index(end_time) + 1;
    let historical = series.slice(end_index, window);
    let projected = session.skips.project(tf);
    let merged = merge_window(historical, &projected, end_time, window);

    let last_known = merged
        .last()
        .map(|c| c.close)
        .or_else(|| series.last().map(|c| c.close))
        .unwrap_or(state.config.price_min);
    Ok(validator(state).sanitize(&merged, last_known, now_epoch()))
}

/// Initial snapshot for a freshly connected client. The caller holds the
/// session lock.
pub fn snapshot_locked(state: &AppState, session: &Session) -> Result<ServerMessage, ApiError> {
    let tf = session.timeframe;
    let candles = load_window(
        state,
        session,
        tf,
        session.cursor.load_anchor(),
        state.config.visible_window,
    )?;
    Ok(ServerMessage::InitialChartData {
        candles,
        timeframe: tf,
        cursor: session.cursor.info(),
    })
}

/// The current visible window, for `GET /api/chart/data`.
pub async fn current_window(state: &AppState) -> Result<(Vec<Candle>, Timeframe), ApiError> {
    let session = state.session.lock().await;
    let tf = session.timeframe;
    let candles = load_window(
        state,
        &session,
        tf,
        session.cursor.load_anchor(),
        state.config.visible_window,
    )?;
    Ok((candles, tf))
}

/// Lazy-loading support: up to `count` candles strictly before
/// `before_time`, for extending the chart to the left. Pure historical
/// data; skips live at the cursor's edge and are never merged into older
/// chunks. An exhausted history yields an empty chunk, not a fallback
/// candle: the client's main window is untouched by this path.
pub fn historical_chunk(
    state: &AppState,
    tf: Timeframe,
    before_time: i64,
    count: usize,
) -> Result<Vec<Candle>, ApiError> {
    let series = state
        .candles
        .series(tf)
        .ok_or_else(|| ApiError::BadRequest(format!("timeframe {tf} is not available")))?;

    let end_exclusive = series.candles().partition_point(|c| c.time < before_time);
    let chunk = series.slice(end_exclusive, count);
    if chunk.is_empty() {
        return Ok(Vec::new());
    }
    let last_known = chunk.last().map(|c| c.close).unwrap_or(state.config.price_min);
    Ok(validator(state).sanitize(chunk, last_known, now_epoch()))
}

/// DESTRUCT phase: command the client to destroy and re-create its series,
/// then wait for the ack within the deadline budget. Returns whether a real
/// ack arrived; on timeout or disconnect the transition continues
/// optimistically and the caller schedules emergency recovery.
async fn run_destruct(
    state: &AppState,
    tx: &mut TransitionTransaction,
    version: u64,
    reason: &str,
) -> bool {
    tx.enter(TransitionPhase::Destruct);
    state.broadcast.publish(&ServerMessage::ChartSeriesRecreation {
        transaction_id: tx.id.clone(),
        version,
        reason: reason.to_string(),
    });
    let acked = state.broadcast.wait_for_ack(tx.remaining()).await;
    if !acked {
        tracing::warn!(
            "transition {}: no recreation ack, continuing optimistically",
            tx.id
        );
    }
    acked
}

/// Roll a failed reload back: lifecycle counters return to the PRE snapshot
/// and the series is marked corrupted; the cursor was never touched. If the
/// destruction command already went out, the client is told to recover.
fn rollback(
    state: &AppState,
    session: &mut Session,
    snapshot: ChartLifecycle,
    tx: &mut TransitionTransaction,
    destruct_fired: bool,
) {
    session.lifecycle.restore_corrupted(snapshot);
    tx.close(TransitionPhase::RolledBack);
    tracing::warn!("transition {} ({:?}) rolled back", tx.id, tx.kind);
    if destruct_fired {
        state.broadcast.publish(&ServerMessage::EmergencyRecoveryRequired {
            reason: "transition failed after series destruction".to_string(),
        });
    }
}

/// Go-To-Date: reposition the visible window so its right edge sits at
/// `target` (midnight UTC). Always invalidates the client cache.
pub async fn go_to_date(state: &AppState, target: NaiveDate) -> Result<GotoOutcome, ApiError> {
    let mut session = state.session.lock().await;

    let target_epoch = target
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
        .timestamp();
    let tf = session.timeframe;
    if !state.candles.available(tf) {
        return Err(ApiError::BadRequest(format!(
            "timeframe {tf} is not available"
        )));
    }

    // PRE
    let mut tx = TransitionTransaction::open(
        TransitionKind::Goto,
        tf,
        tf,
        target_epoch,
        state.config.transition_timeout_after_goto,
    );
    if session.play_mode {
        // Auto-play pauses before any repositioning; the broadcast below
        // carries the new play_mode.
        session.play_mode = false;
        tracing::info!("auto-play paused for go-to-date");
    }
    let snapshot = session.lifecycle.clone();
    let plan = TransitionPlan::for_reload(
        &session.lifecycle,
        tf,
        target_epoch,
        state.config.visible_window,
    );
    session.lifecycle.begin_transition();

    // DESTRUCT
    let acked = if plan.needs_recreation {
        run_destruct(state, &mut tx, session.lifecycle.version, plan.reason).await
    } else {
        false
    };

    // LOAD
    tx.enter(TransitionPhase::Load);
    let candles = match load_window(
        state,
        &session,
        plan.target_tf,
        plan.target_end_time,
        plan.expected_candle_count,
    ) {
        Ok(candles) => candles,
        Err(e) => {
            rollback(state, &mut session, snapshot, &mut tx, plan.needs_recreation);
            return Err(e);
        }
    };

    // COMMIT
    tx.enter(TransitionPhase::Commit);
    session.cursor.go_to(target_epoch);
    session.post_goto = true;
    session.lifecycle.complete(true, plan.needs_recreation && acked);
    session.last_update = now_epoch();

    // BROADCAST
    tx.enter(TransitionPhase::Broadcast);
    state.broadcast.publish(&ServerMessage::GoToDateComplete {
        candles: candles.clone(),
        timeframe: tf,
        target_date: target_epoch,
        visible_range: VisibleRange::for_window(&candles),
        clear_cache: true,
        load_anchor: target_epoch,
        play_mode: session.play_mode,
    });
    if plan.needs_recreation && !acked {
        state.broadcast.publish(&ServerMessage::EmergencyRecoveryRequired {
            reason: "series recreation was not acknowledged".to_string(),
        });
    }
    tx.close(TransitionPhase::Done);

    Ok(GotoOutcome {
        transaction_id: tx.id,
        target_date: target_epoch,
        candles,
    })
}

/// Timeframe switch: reload the visible window in `target_tf`, ending at
/// the cursor's load anchor. The anchor includes accumulated skip drift,
/// which keeps the reference point in time stable across switches.
pub async fn change_timeframe(
    state: &AppState,
    target_tf: Timeframe,
    visible: usize,
) -> Result<SwitchOutcome, ApiError> {
    let mut session = state.session.lock().await;
    switch_locked(state, &mut session, target_tf, visible).await
}

pub(crate) async fn switch_locked(
    state: &AppState,
    session: &mut Session,
    target_tf: Timeframe,
    visible: usize,
) -> Result<SwitchOutcome, ApiError> {
    if !state.candles.available(target_tf) {
        return Err(ApiError::BadRequest(format!(
            "timeframe {target_tf} is not available"
        )));
    }

    // PRE
    let from = session.timeframe;
    let deadline = if session.post_goto {
        state.config.transition_timeout_after_goto
    } else {
        state.config.transition_timeout
    };
    let end_time = session.cursor.load_anchor();
    let mut tx = TransitionTransaction::open(
        TransitionKind::SwitchTf,
        from,
        target_tf,
        end_time,
        deadline,
    );
    let snapshot = session.lifecycle.clone();
    let plan = TransitionPlan::for_reload(&session.lifecycle, target_tf, end_time, visible);
    session.lifecycle.begin_transition();

    // DESTRUCT
    let acked = if plan.needs_recreation {
        run_destruct(state, &mut tx, session.lifecycle.version, plan.reason).await
    } else {
        false
    };

    // LOAD
    tx.enter(TransitionPhase::Load);
    let candles = match load_window(
        state,
        session,
        plan.target_tf,
        plan.target_end_time,
        plan.expected_candle_count,
    ) {
        Ok(candles) => candles,
        Err(e) => {
            rollback(state, session, snapshot, &mut tx, plan.needs_recreation);
            return Err(e);
        }
    };

    // COMMIT. The cursor is not mutated by a switch.
    tx.enter(TransitionPhase::Commit);
    session.timeframe = target_tf;
    session.lifecycle.complete(true, plan.needs_recreation && acked);
    session.post_goto = false;
    session.last_update = now_epoch();

    // BROADCAST
    tx.enter(TransitionPhase::Broadcast);
    let contamination = ContaminationInfo {
        level: session.skips.contamination_level(target_tf),
        skip_count: session.skips.visible_count(target_tf),
    };
    state
        .broadcast
        .publish(&ServerMessage::BulletproofTimeframeChanged {
            candles: candles.clone(),
            timeframe: target_tf,
            transaction_id: tx.id.clone(),
            contamination,
            needs_recreation: plan.needs_recreation,
            visible_range: VisibleRange::for_window(&candles),
            clear_cache: plan.needs_recreation,
            load_anchor: end_time,
        });
    if plan.needs_recreation && !acked {
        state.broadcast.publish(&ServerMessage::EmergencyRecoveryRequired {
            reason: "series recreation was not acknowledged".to_string(),
        });
    }
    tx.close(TransitionPhase::Done);

    Ok(SwitchOutcome {
        transaction_id: tx.id,
        timeframe: target_tf,
        candles,
        needs_recreation: plan.needs_recreation,
    })
}

/// Skip: advance the cursor one timeframe step and append the candle for
/// the new time: the historical one when the dataset has it, otherwise a
/// flat bridge candle across the gap.
pub async fn skip(state: &AppState) -> Result<SkipOutcome, ApiError> {
    let mut session = state.session.lock().await;
    skip_locked(state, &mut session, TransitionKind::Skip)
}

pub(crate) fn skip_locked(
    state: &AppState,
    session: &mut Session,
    kind: TransitionKind,
) -> Result<SkipOutcome, ApiError> {
    let tf = session.timeframe;
    let series = state
        .candles
        .series(tf)
        .ok_or_else(|| ApiError::BadRequest(format!("timeframe {tf} is not available")))?;
    let last = series
        .last()
        .ok_or_else(|| ApiError::BadRequest(format!("timeframe {tf} has no data")))?;

    // PRE
    let next_time = session.cursor.load_anchor() + tf.step_secs();
    if next_time > last.time {
        return Err(ApiError::BadRequest("no more data available".to_string()));
    }
    let mut tx = TransitionTransaction::open(
        kind,
        tf,
        tf,
        next_time,
        state.config.transition_timeout,
    );

    // LOAD. The candle sits at the bucket open containing the new cursor
    // time; after cross-timeframe drift the two can differ.
    tx.enter(TransitionPhase::Load);
    let candle_time = tf.align(next_time);
    let prev_close = series.candles()[series.find_index(candle_time)].close;
    let mut candle = series
        .at_time(candle_time)
        .copied()
        .unwrap_or_else(|| Candle::flat(candle_time, prev_close));
    if !validator(state).is_valid(&candle) {
        candle = Candle::flat(candle_time, prev_close);
    }
    if !candle.volume.is_finite() {
        candle.volume = 0.0;
    }

    // COMMIT
    tx.enter(TransitionPhase::Commit);
    let current_time = session.cursor.advance(tf);
    session.skips.append(tf, candle, now_epoch());
    session.lifecycle.track_skip();
    session.post_goto = false;
    session.last_update = now_epoch();

    // BROADCAST
    tx.enter(TransitionPhase::Broadcast);
    state.broadcast.publish(&ServerMessage::SkipComplete {
        candles: vec![candle],
        timeframe: tf,
    });
    tx.close(TransitionPhase::Done);

    Ok(SkipOutcome {
        transaction_id: tx.id,
        timeframe: tf,
        candle,
        current_time,
    })
}

/// One auto-play step. `Ok(None)` means no step happened: play is off, or
/// the dataset ended, in which case play stops and the cursor stays
/// clamped at the last available candle.
pub async fn autoplay_tick(state: &AppState) -> Result<Option<SkipOutcome>, ApiError> {
    let mut session = state.session.lock().await;
    if !session.play_mode {
        return Ok(None);
    }
    let tf = session.timeframe;
    let at_end = state
        .candles
        .series(tf)
        .and_then(|s| s.last())
        .map(|last| session.cursor.load_anchor() + tf.step_secs() > last.time)
        .unwrap_or(true);
    if at_end {
        session.play_mode = false;
        tracing::info!("auto-play stopped at the end of the dataset");
        return Ok(None);
    }
    skip_locked(state, &mut session, TransitionKind::AutoplayTick).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_704_067_200;

    fn candle(time: i64) -> Candle {
        Candle {
            time,
            open: 18_000.0,
            high: 18_010.0,
            low: 17_990.0,
            close: 18_005.0,
            volume: 10.0,
        }
    }

    #[test]
    fn merge_overrides_historical_at_identical_timestamps() {
        let historical = vec![candle(T0), candle(T0 + 300)];
        let mut skip = candle(T0 + 300);
        skip.close = 19_000.0;
        let merged = merge_window(&historical, &[skip], T0 + 300, 200);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].close, 19_000.0);
    }

    #[test]
    fn merge_hides_skips_past_the_window_end() {
        let historical = vec![candle(T0)];
        let future_skip = candle(T0 + 600);
        let merged = merge_window(&historical, &[future_skip], T0, 200);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].time, T0);
    }

    #[test]
    fn merge_appends_skips_beyond_the_historical_slice() {
        let historical = vec![candle(T0)];
        let skip = candle(T0 + 300);
        let merged = merge_window(&historical, &[skip], T0 + 300, 200);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].time, T0 + 300);
    }

    #[test]
    fn merge_trims_to_the_window_from_the_front() {
        let historical: Vec<Candle> = (0..5).map(|i| candle(T0 + 300 * i)).collect();
        let merged = merge_window(&historical, &[], T0 + 1_200, 3);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].time, T0 + 600);
        assert_eq!(merged[2].time, T0 + 1_200);
    }

    #[test]
    fn merged_timestamps_are_strictly_unique() {
        let historical: Vec<Candle> = (0..4).map(|i| candle(T0 + 300 * i)).collect();
        let skips: Vec<Candle> = (0..4).map(|i| candle(T0 + 300 * i)).collect();
        let merged = merge_window(&historical, &skips, T0 + 900, 200);
        for pair in merged.windows(2) {
            assert!(pair[0].time < pair[1].time);
        }
        assert_eq!(merged.len(), 4);
    }
}
