use serde::Serialize;

/// Health of the client's chart series as the server tracks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesState {
    Clean,
    DataLoaded,
    SkipModified,
    Corrupted,
    Transitioning,
}

/// Per-session chart lifecycle. Decides when the client must destroy and
/// re-create its chart series before new data can be applied.
///
/// Mutated only by the transition coordinator under the session mutex.
#[derive(Debug, Clone, Serialize)]
pub struct ChartLifecycle {
    pub series_state: SeriesState,
    pub skip_ops_since_clean: u32,
    pub version: u64,
}

impl ChartLifecycle {
    pub fn new() -> Self {
        Self {
            series_state: SeriesState::Clean,
            skip_ops_since_clean: 0,
            version: 0,
        }
    }

    /// Fresh client connected: the chart it builds from the initial snapshot
    /// is clean by definition. The version counter survives.
    pub fn reset(&mut self) {
        self.series_state = SeriesState::Clean;
        self.skip_ops_since_clean = 0;
    }

    /// A skip appended synthetic data to the live series.
    pub fn track_skip(&mut self) {
        self.skip_ops_since_clean += 1;
        if matches!(
            self.series_state,
            SeriesState::Clean | SeriesState::DataLoaded
        ) {
            self.series_state = SeriesState::SkipModified;
        }
    }

    /// Whether the next series-reloading transition must destroy and
    /// re-create the client chart first.
    pub fn needs_recreation(&self) -> bool {
        self.skip_ops_since_clean > 0 || self.series_state == SeriesState::Corrupted
    }

    /// Enter the transition window. The caller keeps a snapshot (a plain
    /// clone) for rollback.
    pub fn begin_transition(&mut self) {
        self.series_state = SeriesState::Transitioning;
    }

    /// Close the transition. On success the series is freshly loaded; when a
    /// recreation round-tripped through the client ack, the contamination
    /// counter resets and the series version advances. A missed ack keeps
    /// the counter so the next transition forces recreation again.
    pub fn complete(&mut self, success: bool, recreation_acked: bool) {
        if success {
            self.series_state = SeriesState::DataLoaded;
            if recreation_acked {
                self.skip_ops_since_clean = 0;
                self.version += 1;
            }
        } else {
            self.series_state = SeriesState::Corrupted;
        }
    }

    /// Rollback support: restore the pre-transition counters, then mark the
    /// series corrupted so the next transition forces recreation.
    pub fn restore_corrupted(&mut self, snapshot: ChartLifecycle) {
        *self = snapshot;
        self.series_state = SeriesState::Corrupted;
    }
}

impl Default for ChartLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
