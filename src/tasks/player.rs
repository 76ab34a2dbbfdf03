use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use tokio::select;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{Receiver, Sender, UnboundedReceiver};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, info, warn};

use crate::events::{ContentEvent, Displayed, ScreenStep};
use crate::playback::{PlaybackBackend, PlaybackEvent};
use crate::playlist::into_slides;
use crate::progress::ProgressState;
use crate::renderer::{DisplayPlan, SlideRenderer};
use crate::scheduler::{Advance, Install, RETRY_DELAY, SETTLE_DELAY, Session, Step};
use crate::slide::{Slide, epoch_now};

/// Where the player publishes what it is doing.
pub struct PlayerOutputs {
    pub displayed: Sender<Displayed>,
    pub progress: watch::Sender<ProgressState>,
    pub step: watch::Sender<ScreenStep>,
}

/// Runs the slideshow until `cancel` fires.
///
/// Rules:
/// - Every state change happens on this task; content, timers and playback
///   events are handled one at a time.
/// - Each display cycle owns the armed timers and the live playback
///   subscription. Advancing drops both, so a stale timer or a second
///   terminal playback event can never advance twice.
/// - Content updates never touch timers once the show runs; they are staged
///   until the active playlist wraps.
pub async fn run<B: PlaybackBackend>(
    content_rx: Receiver<ContentEvent>,
    outputs: PlayerOutputs,
    backend: B,
    cancel: CancellationToken,
) -> Result<()> {
    run_with_clock(content_rx, outputs, backend, epoch_now, cancel).await
}

/// [`run`] with schedule windows evaluated against `clock` (epoch seconds).
pub async fn run_with_clock<B, C>(
    mut content_rx: Receiver<ContentEvent>,
    outputs: PlayerOutputs,
    backend: B,
    clock: C,
    cancel: CancellationToken,
) -> Result<()>
where
    B: PlaybackBackend,
    C: Fn() -> f64 + Send + 'static,
{
    let mut player = Player::new(backend, outputs, Box::new(clock));
    let mut content_open = true;

    loop {
        let input = select! {
            _ = cancel.cancelled() => break,

            event = content_rx.recv(), if content_open => Input::Content(event),

            Some(expired) = player.timers.next(), if !player.timers.is_empty() => {
                Input::Timer(expired.into_inner())
            }

            event = next_playback_event(&mut player.video), if player.video.is_some() => {
                Input::Playback(event)
            }
        };

        match input {
            Input::Content(Some(event)) => player.on_content(event),
            Input::Content(None) => {
                // Content producers ended; keep cycling what we have.
                info!("content channel closed; continuing with current playlist");
                content_open = false;
            }
            Input::Timer(wake) => player.on_timer(wake),
            Input::Playback(event) => player.on_playback(event),
        }
    }

    info!("cancel received; exiting player task");
    Ok(())
}

enum Input {
    Content(Option<ContentEvent>),
    Timer(Wake),
    Playback(Option<PlaybackEvent>),
}

#[derive(Debug)]
enum Wake {
    /// Settle delay after seeding elapsed; start the show.
    Begin,
    Advance,
    StartProgress(Duration),
    StartVideo(Arc<Slide>),
}

struct VideoCycle {
    slide: Arc<Slide>,
    events: UnboundedReceiver<PlaybackEvent>,
    progress_started: bool,
}

async fn next_playback_event(video: &mut Option<VideoCycle>) -> Option<PlaybackEvent> {
    match video {
        Some(cycle) => cycle.events.recv().await,
        None => std::future::pending().await,
    }
}

struct Player<B> {
    clock: Box<dyn Fn() -> f64 + Send>,
    session: Session,
    renderer: SlideRenderer<B>,
    timers: DelayQueue<Wake>,
    video: Option<VideoCycle>,
    outputs: PlayerOutputs,
}

impl<B: PlaybackBackend> Player<B> {
    fn new(backend: B, outputs: PlayerOutputs, clock: Box<dyn Fn() -> f64 + Send>) -> Self {
        Self {
            clock,
            session: Session::new(),
            renderer: SlideRenderer::new(backend),
            timers: DelayQueue::new(),
            video: None,
            outputs,
        }
    }

    fn on_content(&mut self, event: ContentEvent) {
        match event {
            ContentEvent::AwaitingContent => self.set_step(ScreenStep::AwaitingContent),
            ContentEvent::ActivationNotComplete => self.set_step(ScreenStep::NotActivated),
            ContentEvent::ShowContent(None) => debug!("ignoring showContent without payload"),
            ContentEvent::ShowContent(Some(payload)) => self.on_update(payload.slides),
        }
    }

    fn on_update(&mut self, slides: Vec<Slide>) {
        let count = slides.len();
        match self.session.install(into_slides(slides), (self.clock)()) {
            Install::Staged => {
                info!(slides = count, "playlist update staged for next cycle");
            }
            Install::Seeded => {
                // A second seed inside the settle window restarts it.
                self.timers.clear();
                self.timers.insert(Wake::Begin, SETTLE_DELAY);
                self.renderer
                    .retain_live(self.session.buffer().active());
                self.publish_progress();
                self.set_step(ScreenStep::ShowContent);
                info!(
                    slides = count,
                    scheduled = self.session.progress().snapshot().total_scheduled,
                    "playlist seeded; show starts after settle delay"
                );
            }
        }
    }

    fn on_timer(&mut self, wake: Wake) {
        match wake {
            Wake::Begin => {
                self.session.begin();
                self.advance();
            }
            Wake::Advance => self.advance(),
            Wake::StartProgress(duration) => {
                self.session.progress_mut().start(duration);
                self.publish_progress();
            }
            Wake::StartVideo(slide) => match self.renderer.start_video(&slide) {
                Ok(events) => {
                    debug!(slide = %slide.unique_id, "video playback started");
                    self.video = Some(VideoCycle {
                        slide,
                        events,
                        progress_started: false,
                    });
                }
                Err(err) => {
                    warn!(slide = %slide.unique_id, error = %err, "video playback failed to start; skipping");
                    self.renderer.release(&slide);
                    self.advance();
                }
            },
        }
    }

    fn on_playback(&mut self, event: Option<PlaybackEvent>) {
        match event {
            Some(PlaybackEvent::Progress) => {
                let Some(cycle) = self.video.as_mut() else {
                    return;
                };
                if cycle.progress_started {
                    return;
                }
                let known = self
                    .renderer
                    .duration(&cycle.slide)
                    .filter(|secs| secs.is_finite() && *secs > 0.0);
                if let Some(secs) = known {
                    cycle.progress_started = true;
                    debug!(slide = %cycle.slide.unique_id, secs, "video duration known");
                    self.session
                        .progress_mut()
                        .start(Duration::try_from_secs_f64(secs).unwrap_or_default());
                    self.publish_progress();
                }
            }
            Some(PlaybackEvent::Ended) => {
                debug!("video playback ended");
                self.advance();
            }
            Some(PlaybackEvent::Error(reason)) => {
                warn!(%reason, "video playback failed; advancing");
                self.advance();
            }
            None => {
                warn!("playback subscription closed without a terminal event; advancing");
                self.advance();
            }
        }
    }

    /// Move to the next slide and arm its timers.
    fn advance(&mut self) {
        self.timers.clear();
        if let Some(cycle) = self.video.take() {
            self.renderer.release(&cycle.slide);
        }

        let mut skipped = 0usize;
        loop {
            let Advance {
                step,
                wrapped,
                swapped,
            } = self.session.advance((self.clock)());

            if swapped {
                self.renderer
                    .retain_live(self.session.buffer().active());
                info!(
                    slides = self.session.buffer().active().len(),
                    "staged playlist is now active"
                );
            }
            if wrapped {
                debug!(
                    scheduled = self.session.progress().snapshot().total_scheduled,
                    "playlist cycle wrapped"
                );
            }

            match step {
                Step::Idle => {
                    debug!(retry_ms = RETRY_DELAY.as_millis() as u64, "active playlist empty");
                    self.timers.insert(Wake::Advance, RETRY_DELAY);
                    break;
                }
                Step::WaitingForWindow => {
                    debug!(
                        retry_ms = RETRY_DELAY.as_millis() as u64,
                        "no slide inside its schedule window"
                    );
                    self.timers.insert(Wake::Advance, RETRY_DELAY);
                    break;
                }
                Step::Display { index, slide } => {
                    let plan = self
                        .renderer
                        .display(&slide, self.session.progress_mut());
                    self.publish_progress();
                    match plan {
                        DisplayPlan::Skip => {
                            skipped += 1;
                            if skipped > self.session.buffer().active().len() {
                                warn!("every scheduled slide was skipped; retrying later");
                                self.timers.insert(Wake::Advance, RETRY_DELAY);
                                break;
                            }
                        }
                        DisplayPlan::Timed {
                            fade,
                            progress,
                            advance_after,
                        } => {
                            self.announce(index, &slide);
                            self.timers.insert(Wake::StartProgress(progress), fade);
                            self.timers.insert(Wake::Advance, advance_after);
                            break;
                        }
                        DisplayPlan::Video { fade } => {
                            self.announce(index, &slide);
                            self.timers.insert(Wake::StartVideo(slide), fade);
                            break;
                        }
                    }
                }
            }
        }
    }

    fn announce(&self, index: usize, slide: &Slide) {
        let progress = self.session.progress().snapshot();
        info!(
            slide = %slide.unique_id,
            media = %slide.media_type,
            position = progress.current_position,
            total = progress.total_scheduled,
            "displaying slide"
        );
        let displayed = Displayed {
            unique_id: slide.unique_id.clone(),
            media_type: slide.media_type,
            index,
            position: progress.current_position,
            total: progress.total_scheduled,
        };
        match self.outputs.displayed.try_send(displayed) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("displayed queue full; dropping notification"),
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn publish_progress(&self) {
        self.outputs
            .progress
            .send_replace(self.session.progress().snapshot());
    }

    fn set_step(&self, step: ScreenStep) {
        let changed = self.outputs.step.send_if_modified(|current| {
            if *current == step {
                false
            } else {
                *current = step;
                true
            }
        });
        if changed {
            info!(%step, "screen step changed");
        }
    }
}
