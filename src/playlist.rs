//! Double-buffered playlist: one slot is iterated by the scheduler, the other
//! stages the next content update until the current cycle wraps.

use std::sync::Arc;

use crate::slide::Slide;

/// Shared, immutable slide list installed into a slot.
pub type Slides = Arc<[Arc<Slide>]>;

/// Two-slot arena addressed by an index flag.
#[derive(Debug, Clone)]
pub struct PlaylistBuffer {
    slots: [Slides; 2],
    active: usize,
    pending: bool,
}

impl Default for PlaylistBuffer {
    fn default() -> Self {
        Self {
            slots: [empty_slides(), empty_slides()],
            active: 0,
            pending: false,
        }
    }
}

impl PlaylistBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slides currently iterated by the scheduler.
    pub fn active(&self) -> &Slides {
        &self.slots[self.active]
    }

    /// Index (0 or 1) of the active slot.
    pub const fn active_index(&self) -> usize {
        self.active
    }

    /// Whether a staged update waits for the next cycle wrap.
    pub const fn has_pending(&self) -> bool {
        self.pending
    }

    /// Replace the active slot outright. Only valid before the show starts.
    pub fn install_active(&mut self, slides: Slides) {
        self.slots[self.active] = slides;
    }

    /// Stage `slides` for the next wrap. A later call overwrites an earlier one.
    pub fn stage(&mut self, slides: Slides) {
        self.slots[self.active ^ 1] = slides;
        self.pending = true;
    }

    /// Promote the staged slot if one is pending. Returns whether a swap happened.
    pub fn swap_if_pending(&mut self) -> bool {
        if !self.pending {
            return false;
        }
        self.active ^= 1;
        self.pending = false;
        true
    }
}

pub fn empty_slides() -> Slides {
    Arc::from(Vec::<Arc<Slide>>::new())
}

/// Wrap decoded slides into a slot value.
pub fn into_slides(slides: Vec<Slide>) -> Slides {
    slides.into_iter().map(Arc::new).collect()
}
