use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;
use crate::transition;

/// Background task driving auto-play skips. Runs for the process lifetime,
/// idling while play mode is off. A failing tick stops play, never the
/// loop, so the UI stays responsive.
pub fn spawn_autoplay_loop(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            let (playing, speed) = {
                let session = state.session.lock().await;
                (session.play_mode, session.speed)
            };
            if !playing {
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }

            match transition::autoplay_tick(&state).await {
                Ok(Some(_)) => {
                    // Speed 1 = one step per second, speed 15 = 67ms floor.
                    let delay_ms =
                        ((1_000.0 / speed) as u64).max(state.config.autoplay_min_delay_ms);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                // Paused externally or clamped at the dataset end.
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("auto-play tick failed, stopping play: {e}");
                    state.session.lock().await.play_mode = false;
                }
            }
        }
    });
}
