//! The advance loop as a pure state machine.
//!
//! [`Session`] owns every per-session field (cursor, playlist slots, pending
//! flag, progress counters). It never sleeps: each call returns what should
//! happen next and the player task turns that into timers.

use std::sync::Arc;
use std::time::Duration;

use crate::playlist::{PlaylistBuffer, Slides};
use crate::progress::ProgressIndicator;
use crate::slide::Slide;

/// Wait before re-evaluating an empty or fully out-of-window playlist.
pub const RETRY_DELAY: Duration = Duration::from_millis(5000);
/// Wait between seeding the first playlist and the first advance.
pub const SETTLE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    WaitingForWindow,
    Displaying,
    CycleReset,
}

/// Outcome of one [`Session::advance`] call.
#[derive(Debug, Clone)]
pub enum Step {
    /// Show this slide now.
    Display { index: usize, slide: Arc<Slide> },
    /// Active slot is empty; retry after [`RETRY_DELAY`].
    Idle,
    /// No slide is inside its window; retry after [`RETRY_DELAY`].
    WaitingForWindow,
}

impl Step {
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Display { .. } => None,
            Self::Idle | Self::WaitingForWindow => Some(RETRY_DELAY),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Advance {
    pub step: Step,
    /// Whether the active slot wrapped during this call.
    pub wrapped: bool,
    /// Whether a staged playlist became active during this call.
    pub swapped: bool,
}

/// Where a content update landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Install {
    /// Show not started yet: the update became the active slot.
    Seeded,
    /// Show running: the update waits in the pending slot.
    Staged,
}

#[derive(Debug, Default)]
pub struct Session {
    buffer: PlaylistBuffer,
    progress: ProgressIndicator,
    /// `None` until the first advance; `Some(len)` parks past the end.
    cursor: Option<usize>,
    running: bool,
    state: Option<SchedulerState>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn is_running(&self) -> bool {
        self.running
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn state(&self) -> Option<SchedulerState> {
        self.state
    }

    pub fn buffer(&self) -> &PlaylistBuffer {
        &self.buffer
    }

    pub fn progress(&self) -> &ProgressIndicator {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut ProgressIndicator {
        &mut self.progress
    }

    /// Accept a content update.
    ///
    /// Before the show runs the slides replace the active slot and the
    /// progress counters are recomputed; the caller then waits
    /// [`SETTLE_DELAY`] and calls [`Session::begin`]. While running the
    /// slides are staged for the next wrap.
    pub fn install(&mut self, slides: Slides, now: f64) -> Install {
        if self.running {
            self.buffer.stage(slides);
            Install::Staged
        } else {
            self.buffer.install_active(slides);
            self.progress
                .reset(self.buffer.active().iter().map(|s| &**s), now);
            Install::Seeded
        }
    }

    /// Start the show from the top of the active slot.
    pub fn begin(&mut self) {
        self.cursor = None;
        self.running = true;
    }

    /// Move to the next slide that may be shown at `now`.
    ///
    /// Ineligible slides are skipped in a loop. The loop terminates because a
    /// slot is only walked while it holds at least one eligible slide, and
    /// every wrap re-checks that for the slot that is active after the wrap.
    pub fn advance(&mut self, now: f64) -> Advance {
        let mut wrapped = false;
        let mut swapped = false;
        let mut slot_has_eligible: Option<bool> = None;

        loop {
            let mut next = self.cursor.map_or(0, |c| c.saturating_add(1));
            if next >= self.buffer.active().len() {
                swapped |= self.buffer.swap_if_pending();
                self.progress
                    .reset(self.buffer.active().iter().map(|s| &**s), now);
                self.state = Some(SchedulerState::CycleReset);
                wrapped = true;
                slot_has_eligible = None;
                next = 0;
            }
            self.cursor = Some(next);

            let active = self.buffer.active();
            let Some(slide) = active.get(next) else {
                self.state = Some(SchedulerState::Idle);
                return Advance {
                    step: Step::Idle,
                    wrapped,
                    swapped,
                };
            };

            if slide.is_scheduled(now) {
                let slide = Arc::clone(slide);
                self.state = Some(SchedulerState::Displaying);
                return Advance {
                    step: Step::Display { index: next, slide },
                    wrapped,
                    swapped,
                };
            }

            let has_eligible =
                *slot_has_eligible.get_or_insert_with(|| active.iter().any(|s| s.is_scheduled(now)));
            if !has_eligible {
                self.cursor = Some(active.len());
                self.state = Some(SchedulerState::WaitingForWindow);
                return Advance {
                    step: Step::WaitingForWindow,
                    wrapped,
                    swapped,
                };
            }
        }
    }
}

/// Slides one full cycle of `slides` would show at `now`, in visit order.
///
/// Runs a throwaway [`Session`] without timers; used by `--check-playlist`.
pub fn plan_cycle(slides: Slides, now: f64) -> Vec<(usize, Arc<Slide>)> {
    let mut session = Session::new();
    session.install(slides, now);
    session.begin();

    let mut plan = Vec::new();
    loop {
        let adv = session.advance(now);
        if adv.wrapped && !plan.is_empty() {
            break;
        }
        match adv.step {
            Step::Display { index, slide } => plan.push((index, slide)),
            Step::Idle | Step::WaitingForWindow => break,
        }
    }
    plan
}
