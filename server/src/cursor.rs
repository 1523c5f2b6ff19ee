use serde::Serialize;

use crate::timeframe::Timeframe;

/// The authoritative replay time for one session.
///
/// Two modes: *anchor* (the user set a Go-To-Date and has not skipped since)
/// and *drifting* (skips have advanced the time past the anchor). Only the
/// transition coordinator mutates the cursor, inside an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeCursor {
    /// Go-To-Date target, no skips since.
    Anchor(i64),
    /// Skips have moved the time to this point.
    Drifting(i64),
}

/// Wire shape of the cursor for `/api/debug/state` and the initial snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CursorInfo {
    pub mode: &'static str,
    pub anchor_date: Option<i64>,
    pub current_time: Option<i64>,
    pub load_anchor: i64,
}

impl TimeCursor {
    /// Fresh cursor anchored at `anchor` (the last available candle on
    /// connect, or a Go-To-Date target).
    pub fn at_anchor(anchor: i64) -> Self {
        TimeCursor::Anchor(anchor)
    }

    /// Go-To-Date: resets to anchor mode and clears any drift.
    pub fn go_to(&mut self, target: i64) {
        *self = TimeCursor::Anchor(target);
    }

    /// Skip: advance one timeframe step. The first skip flips anchor mode
    /// into drifting mode. Returns the new current time.
    pub fn advance(&mut self, tf: Timeframe) -> i64 {
        let next = self.load_anchor() + tf.step_secs();
        *self = TimeCursor::Drifting(next);
        next
    }

    /// The single value the data plane uses as the end of the visible
    /// window: the anchor date in anchor mode, the drifted time otherwise.
    pub fn load_anchor(&self) -> i64 {
        match self {
            TimeCursor::Anchor(d) => *d,
            TimeCursor::Drifting(t) => *t,
        }
    }

    pub fn is_drifting(&self) -> bool {
        matches!(self, TimeCursor::Drifting(_))
    }

    pub fn info(&self) -> CursorInfo {
        match self {
            TimeCursor::Anchor(d) => CursorInfo {
                mode: "anchor",
                anchor_date: Some(*d),
                current_time: None,
                load_anchor: *d,
            },
            TimeCursor::Drifting(t) => CursorInfo {
                mode: "drifting",
                anchor_date: None,
                current_time: Some(*t),
                load_anchor: *t,
            },
        }
    }
}
