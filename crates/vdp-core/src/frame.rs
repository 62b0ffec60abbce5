//! Frame pacing: the fixed-interval loop that decides when a session's
//! accumulated drawing should be flushed to its viewers (spec §4.K).

use std::time::Duration;

use tokio::time::Instant;

use crate::session::Session;

/// How long the frame loop waits for the first drawing op before sending
/// an empty `sync` anyway, so idle viewers still see liveness.
pub const FRAME_START_TIMEOUT: Duration = Duration::from_millis(250);
/// Target interval between successive frames under normal load.
pub const FRAME_DURATION: Duration = Duration::from_millis(40);
/// If a flush takes longer than this past `FRAME_DURATION`, the next frame
/// is skipped rather than compounding the delay.
pub const FRAME_TIMEOUT: Duration = Duration::from_millis(12);

/// What the pacing loop should do for one tick, decided by
/// [`decide_action`] so the policy itself is testable without a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    /// Flush now and broadcast `sync`.
    Flush,
    /// Nothing has changed and no viewer is waiting; sleep again.
    Skip,
    /// A viewer is still behind on the previous frame; let it catch up
    /// before adding more queued data.
    Defer,
}

/// Pure decision function: given whether the display has pending updates,
/// the worst-case viewer lag, and how long it has been since the last
/// flush, decide what the pacing loop should do this tick.
///
/// Kept free of any `Session`/timer access so the policy itself can be
/// tested exhaustively (testable property §8.12).
pub fn decide_action(has_pending_updates: bool, worst_viewer_lag: Duration, since_last_flush: Duration) -> FrameAction {
    if worst_viewer_lag > FRAME_DURATION * 2 {
        return FrameAction::Defer;
    }
    if has_pending_updates || since_last_flush >= FRAME_START_TIMEOUT {
        return FrameAction::Flush;
    }
    FrameAction::Skip
}

/// Drive one session's frame-pacing loop until it stops running. Intended
/// to be spawned as its own task per session (spec §5, "one task per
/// session" for pacing).
pub async fn run_frame_loop(session: &Session) {
    let mut last_flush = Instant::now();

    loop {
        tokio::time::sleep(FRAME_TIMEOUT).await;

        if !session.is_running() {
            return;
        }

        // Apply any display-resize request the first viewer made since the
        // last tick (spec §4.K step 3, "apply them between iterations").
        if let Some((width, height)) = session.take_pending_resize() {
            if let Err(err) = session.display.resize_default_layer(width, height).await {
                tracing::warn!(session = %session.id, %err, "failed to apply pending resize");
            }
        }

        // Dispatch whatever upstream events are ready right now (spec
        // §4.K step 3). A fatal upstream error ends the session; the
        // frame-loop task is the only place that observes this, so it is
        // responsible for flipping the session to `Stopping`.
        match session.driver().handle_messages(session).await {
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(session = %session.id, %err, "upstream disconnected, stopping session");
                session.stop();
                return;
            }
        }

        if last_flush.elapsed() < FRAME_DURATION {
            continue;
        }

        let has_pending_updates = session.display.default_layer().await.is_dirty();
        let lag_ms = session.processing_lag().await;
        let action = decide_action(
            has_pending_updates,
            Duration::from_millis(lag_ms.max(0) as u64),
            last_flush.elapsed(),
        );

        match action {
            FrameAction::Flush => {
                let started = Instant::now();
                if session.display.flush().await.is_ok() {
                    let _ = session.end_frame().await;
                }
                last_flush = Instant::now();
                if started.elapsed() > FRAME_DURATION + FRAME_TIMEOUT {
                    tracing::warn!(session = %session.id, "frame flush exceeded budget");
                }
            }
            FrameAction::Skip => {}
            FrameAction::Defer => {
                tracing::debug!(session = %session.id, "deferring frame: viewer lagging");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_when_updates_are_pending() {
        let action = decide_action(true, Duration::ZERO, Duration::from_millis(10));
        assert_eq!(action, FrameAction::Flush);
    }

    #[test]
    fn flushes_on_start_timeout_even_without_updates() {
        let action = decide_action(false, Duration::ZERO, FRAME_START_TIMEOUT);
        assert_eq!(action, FrameAction::Flush);
    }

    #[test]
    fn skips_when_idle_and_within_start_timeout() {
        let action = decide_action(false, Duration::ZERO, Duration::from_millis(10));
        assert_eq!(action, FrameAction::Skip);
    }

    #[test]
    fn defers_when_a_viewer_is_badly_lagging() {
        let action = decide_action(true, FRAME_DURATION * 3, Duration::from_millis(10));
        assert_eq!(action, FrameAction::Defer);
    }
}
