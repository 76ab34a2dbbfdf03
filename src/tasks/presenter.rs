use anyhow::Result;
use tokio::sync::mpsc::Receiver;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{Displayed, ScreenStep};
use crate::progress::{ProgressState, ProgressStyle};

/// Headless presentation surface: reports what the player shows.
pub async fn run(
    mut displayed_rx: Receiver<Displayed>,
    mut step_rx: watch::Receiver<ScreenStep>,
    mut progress_rx: watch::Receiver<ProgressState>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut steps_open = true;
    let mut progress_open = true;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(shown) = displayed_rx.recv() => {
                info!(
                    slide = %shown.unique_id,
                    media = %shown.media_type,
                    "on screen {}/{}",
                    shown.position,
                    shown.total
                );
            }

            changed = step_rx.changed(), if steps_open => match changed {
                Ok(()) => {
                    let step = *step_rx.borrow_and_update();
                    info!(%step, "screen");
                }
                Err(_) => steps_open = false,
            },

            changed = progress_rx.changed(), if progress_open => match changed {
                Ok(()) => {
                    let state = *progress_rx.borrow_and_update();
                    match state.style {
                        ProgressStyle::Idle => debug!(
                            position = state.current_position,
                            total = state.total_scheduled,
                            "progress idle"
                        ),
                        ProgressStyle::Running { duration } => debug!(
                            position = state.current_position,
                            total = state.total_scheduled,
                            duration = %humantime::format_duration(duration),
                            "progress running"
                        ),
                    }
                }
                Err(_) => progress_open = false,
            },

            else => break,
        }
    }
    Ok(())
}
