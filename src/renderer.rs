//! Per-slide display driver.
//!
//! `display` decides how a slide occupies the screen and returns the timers
//! the player task must arm. Video handles are cached per slide instance and
//! reused across cycles until a playlist update replaces the slide.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::playback::{PlaybackBackend, PlaybackEvent, PlaybackHandle, PlaybackOptions};
use crate::progress::ProgressIndicator;
use crate::slide::{MediaKind, Slide};

/// Pause before media starts so the outgoing slide can fade.
pub const FADE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayPlan {
    /// Nothing playable; advance immediately.
    Skip,
    /// Start the progress bar (`progress` long) after `fade`; advance after `advance_after`.
    Timed {
        fade: Duration,
        progress: Duration,
        advance_after: Duration,
    },
    /// Start playback after `fade`; playback events drive the advance.
    Video { fade: Duration },
}

struct CachedHandle {
    slide: Arc<Slide>,
    handle: Box<dyn PlaybackHandle>,
}

pub struct SlideRenderer<B> {
    backend: B,
    handles: HashMap<String, CachedHandle>,
}

impl<B: PlaybackBackend> SlideRenderer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            handles: HashMap::new(),
        }
    }

    pub fn display(&mut self, slide: &Slide, progress: &mut ProgressIndicator) -> DisplayPlan {
        progress.mark_displayed();
        progress.idle();

        match slide.media_type {
            MediaKind::Video if !slide.has_media() => {
                debug!(slide = %slide.unique_id, "video slide has no media; skipping");
                DisplayPlan::Skip
            }
            MediaKind::Video => DisplayPlan::Video { fade: FADE_DELAY },
            MediaKind::Image => {
                let dwell = slide.dwell();
                DisplayPlan::Timed {
                    fade: FADE_DELAY,
                    progress: dwell,
                    advance_after: dwell + FADE_DELAY * 2,
                }
            }
        }
    }

    /// Acquire the slide's handle, reload its source and start playback.
    ///
    /// The returned receiver is the only live subscription for this display
    /// cycle; earlier subscriptions on a reused handle are detached first.
    pub fn start_video(&mut self, slide: &Arc<Slide>) -> Result<UnboundedReceiver<PlaybackEvent>> {
        let cached = match self.handles.entry(slide.unique_id.clone()) {
            Entry::Occupied(entry) => {
                let cached = entry.into_mut();
                // Duplicates of one slide in a playlist share the handle.
                if Arc::ptr_eq(&cached.slide, slide) || cached.slide == *slide {
                    cached.handle.detach();
                } else {
                    debug!(slide = %slide.unique_id, "slide replaced; rebuilding playback handle");
                    *cached = CachedHandle {
                        slide: Arc::clone(slide),
                        handle: self
                            .backend
                            .construct(&slide.unique_id, PlaybackOptions::SIGNAGE)?,
                    };
                }
                cached
            }
            Entry::Vacant(entry) => entry.insert(CachedHandle {
                slide: Arc::clone(slide),
                handle: self
                    .backend
                    .construct(&slide.unique_id, PlaybackOptions::SIGNAGE)?,
            }),
        };

        cached.handle.load(&slide.media)?;
        let events = cached.handle.subscribe();
        cached.handle.play()?;
        Ok(events)
    }

    /// Media length reported by the slide's handle, if any.
    pub fn duration(&self, slide: &Slide) -> Option<f64> {
        self.handles
            .get(&slide.unique_id)
            .and_then(|cached| cached.handle.duration())
    }

    /// Stop listening to the slide's handle after its display cycle ends.
    pub fn release(&mut self, slide: &Slide) {
        if let Some(cached) = self.handles.get_mut(&slide.unique_id) {
            cached.handle.detach();
        }
    }

    /// Destroy handles whose slide object is no longer part of `live`.
    pub fn retain_live(&mut self, live: &[Arc<Slide>]) {
        let mut seen: HashMap<&str, &Slide> = HashMap::with_capacity(live.len());
        for slide in live {
            match seen.entry(slide.unique_id.as_str()) {
                Entry::Vacant(entry) => {
                    entry.insert(&**slide);
                }
                Entry::Occupied(entry) if *entry.get() != &**slide => {
                    warn!(
                        slide = %slide.unique_id,
                        "playlist holds different slides with the same uniqueId; their playback handle is rebuilt on every switch"
                    );
                }
                Entry::Occupied(_) => {}
            }
        }

        let before = self.handles.len();
        self.handles.retain(|_, cached| {
            live.iter()
                .any(|slide| Arc::ptr_eq(slide, &cached.slide))
        });
        let dropped = before - self.handles.len();
        if dropped > 0 {
            debug!(dropped, "released playback handles for replaced slides");
        }
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }
}
