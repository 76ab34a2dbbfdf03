//! Progress indicator state. Pure data: the scheduler and renderer drive it,
//! an outer surface renders [`ProgressState`].

use std::time::Duration;

use crate::slide::{Slide, count_scheduled};

/// Animation descriptor for the progress bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressStyle {
    /// Zero width, no transition.
    #[default]
    Idle,
    /// Full width reached through a linear transition lasting `duration`.
    Running { duration: Duration },
}

impl ProgressStyle {
    /// Target width as a fraction of the bar.
    pub fn width(&self) -> f32 {
        match self {
            Self::Idle => 0.0,
            Self::Running { .. } => 1.0,
        }
    }

    /// Length of the linear transition, `None` for an instantaneous change.
    pub fn transition(&self) -> Option<Duration> {
        match self {
            Self::Idle => None,
            Self::Running { duration } => Some(*duration),
        }
    }
}

/// Snapshot published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressState {
    pub total_scheduled: usize,
    pub current_position: usize,
    pub style: ProgressStyle,
}

#[derive(Debug, Default)]
pub struct ProgressIndicator {
    state: ProgressState,
}

impl ProgressIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recount eligible slides and rewind the position.
    pub fn reset<'a, I>(&mut self, slides: I, now: f64)
    where
        I: IntoIterator<Item = &'a Slide>,
    {
        self.state.total_scheduled = count_scheduled(slides, now);
        self.state.current_position = 0;
    }

    pub fn mark_displayed(&mut self) {
        self.state.current_position += 1;
    }

    pub fn idle(&mut self) {
        self.state.style = ProgressStyle::Idle;
    }

    pub fn start(&mut self, duration: Duration) {
        self.state.style = ProgressStyle::Running { duration };
    }

    pub fn snapshot(&self) -> ProgressState {
        self.state
    }
}
