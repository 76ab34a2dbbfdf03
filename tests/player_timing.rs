use std::time::Duration;

use anyhow::Result;
use signage_player::events::{ContentEvent, ContentPayload, Displayed, ScreenStep};
use signage_player::playback::{PlaybackBackend, PlaybackEvent, PlaybackHandle, PlaybackOptions};
use signage_player::progress::{ProgressState, ProgressStyle};
use signage_player::slide::{MediaAsset, Slide, epoch_now};
use signage_player::tasks::player::{self, PlayerOutputs};
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A started playback: slide id plus the sender feeding the player's subscription.
type Started = (String, UnboundedSender<PlaybackEvent>);

#[derive(Clone)]
struct FakeBackend {
    started: UnboundedSender<Started>,
    duration: Option<f64>,
}

struct FakeHandle {
    id: String,
    started: UnboundedSender<Started>,
    events: Option<UnboundedSender<PlaybackEvent>>,
    duration: Option<f64>,
}

impl PlaybackBackend for FakeBackend {
    fn construct(&mut self, id: &str, _options: PlaybackOptions) -> Result<Box<dyn PlaybackHandle>> {
        Ok(Box::new(FakeHandle {
            id: id.to_string(),
            started: self.started.clone(),
            events: None,
            duration: self.duration,
        }))
    }
}

impl PlaybackHandle for FakeHandle {
    fn detach(&mut self) {
        self.events = None;
    }
    fn load(&mut self, _media: &[MediaAsset]) -> Result<()> {
        Ok(())
    }
    fn subscribe(&mut self) -> UnboundedReceiver<PlaybackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }
    fn play(&mut self) -> Result<()> {
        if let Some(events) = &self.events {
            let _ = self.started.send((self.id.clone(), events.clone()));
        }
        Ok(())
    }
    fn duration(&self) -> Option<f64> {
        self.duration
    }
}

struct Harness {
    content: Sender<ContentEvent>,
    displayed: Receiver<Displayed>,
    progress: watch::Receiver<ProgressState>,
    step: watch::Receiver<ScreenStep>,
    started: UnboundedReceiver<Started>,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
    t0: Instant,
}

impl Harness {
    fn spawn(video_duration: Option<f64>) -> Self {
        Self::spawn_with_clock(video_duration, epoch_now)
    }

    fn spawn_with_clock<C>(video_duration: Option<f64>, clock: C) -> Self
    where
        C: Fn() -> f64 + Send + 'static,
    {
        let (content_tx, content_rx) = mpsc::channel(16);
        let (displayed_tx, displayed_rx) = mpsc::channel(64);
        let (progress_tx, progress_rx) = watch::channel(ProgressState::default());
        let (step_tx, step_rx) = watch::channel(ScreenStep::Init);
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let outputs = PlayerOutputs {
            displayed: displayed_tx,
            progress: progress_tx,
            step: step_tx,
        };
        let backend = FakeBackend {
            started: started_tx,
            duration: video_duration,
        };
        let task = tokio::spawn(player::run_with_clock(
            content_rx,
            outputs,
            backend,
            clock,
            cancel.clone(),
        ));

        Self {
            content: content_tx,
            displayed: displayed_rx,
            progress: progress_rx,
            step: step_rx,
            started: started_rx,
            cancel,
            task,
            t0: Instant::now(),
        }
    }

    async fn show(&self, slides: Vec<Slide>) {
        self.content
            .send(ContentEvent::ShowContent(Some(ContentPayload { slides })))
            .await
            .unwrap();
    }

    /// Next displayed slide and the milliseconds since the harness started.
    async fn next_displayed(&mut self) -> (Displayed, u128) {
        let shown = tokio::time::timeout(Duration::from_secs(120), self.displayed.recv())
            .await
            .expect("timeout waiting for a displayed slide")
            .expect("displayed channel closed");
        (shown, self.t0.elapsed().as_millis())
    }

    async fn next_started(&mut self) -> (Started, u128) {
        let started = tokio::time::timeout(Duration::from_secs(120), self.started.recv())
            .await
            .expect("timeout waiting for playback start")
            .expect("started channel closed");
        (started, self.t0.elapsed().as_millis())
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        self.task.await.unwrap().unwrap();
    }
}

fn assert_near(actual_ms: u128, expected_ms: u128) {
    assert!(
        (expected_ms..=expected_ms + 10).contains(&actual_ms),
        "expected ~{expected_ms}ms, got {actual_ms}ms"
    );
}

fn clip(id: &str) -> Slide {
    Slide::video(id, vec![MediaAsset::from_url(format!("/media/{id}.mp4"))])
}

#[tokio::test(start_paused = true)]
async fn images_advance_after_dwell_plus_both_fades() {
    let mut h = Harness::spawn(None);
    h.show(vec![Slide::image("a", 10.0), Slide::image("b", 10.0)])
        .await;

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "a");
    assert_near(at, 1_000);

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "b");
    assert_eq!((shown.position, shown.total), (2, 2));
    assert_near(at, 13_000);

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "a");
    assert_eq!(shown.position, 1);
    assert_near(at, 25_000);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn progress_bar_starts_after_fade() {
    let mut h = Harness::spawn(None);
    h.show(vec![Slide::image("a", 4.0)]).await;
    h.next_displayed().await;
    assert_eq!(h.progress.borrow().style, ProgressStyle::Idle);

    h.progress
        .wait_for(|p| matches!(p.style, ProgressStyle::Running { .. }))
        .await
        .unwrap();
    assert_near(h.t0.elapsed().as_millis(), 2_000);
    assert_eq!(
        h.progress.borrow().style,
        ProgressStyle::Running {
            duration: Duration::from_secs(4)
        }
    );

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_seed_idles_until_staged_update_swaps_in() {
    let mut h = Harness::spawn(None);
    h.show(Vec::new()).await;

    tokio::time::sleep(Duration::from_millis(3_000)).await;
    h.show(vec![Slide::image("late", 5.0)]).await;

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "late");
    assert_near(at, 6_000);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn update_while_running_waits_for_wrap() {
    let mut h = Harness::spawn(None);
    h.show(vec![Slide::image("a", 10.0), Slide::image("b", 10.0)])
        .await;
    h.next_displayed().await;

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    h.show(vec![Slide::image("x", 5.0)]).await;

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "b");
    assert_near(at, 13_000);

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "x");
    assert_eq!((shown.position, shown.total), (1, 1));
    assert_near(at, 25_000);

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "x");
    assert_near(at, 32_000);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reseed_before_start_restarts_settle_delay() {
    let mut h = Harness::spawn(None);
    h.show(vec![Slide::image("first", 5.0)]).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.show(vec![Slide::image("second", 5.0)]).await;

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "second");
    assert_near(at, 1_500);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn out_of_window_slide_is_skipped_without_delay() {
    let mut h = Harness::spawn(None);
    let now = epoch_now();
    h.show(vec![
        Slide::image("s0", 5.0).with_window(Some(now + 3_600.0), Some(now + 7_200.0)),
        Slide::image("s1", 5.0),
    ])
    .await;

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "s1");
    assert_eq!(shown.index, 1);
    assert_eq!((shown.position, shown.total), (1, 1));
    assert_near(at, 1_000);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn video_without_media_is_skipped_immediately() {
    let mut h = Harness::spawn(None);
    h.show(vec![Slide::video("empty", Vec::new()), Slide::image("a", 2.0)])
        .await;

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "a");
    assert_eq!(shown.position, 2);
    assert_near(at, 1_000);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn only_empty_videos_fall_back_to_retry() {
    let mut h = Harness::spawn(None);
    h.show(vec![Slide::video("e1", Vec::new()), Slide::video("e2", Vec::new())])
        .await;

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    h.show(vec![Slide::image("a", 1.0)]).await;

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "a");
    assert_near(at, 6_000);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn video_terminal_events_advance_exactly_once() {
    let mut h = Harness::spawn(None);
    h.show(vec![clip("v"), Slide::image("a", 2.0)]).await;

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "v");
    assert_near(at, 1_000);

    let ((id, events), at) = h.next_started().await;
    assert_eq!(id, "v");
    assert_near(at, 2_000);

    let _ = events.send(PlaybackEvent::Ended);
    let _ = events.send(PlaybackEvent::Ended);
    let _ = events.send(PlaybackEvent::Error("late".into()));

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "a");
    assert_near(at, 2_000);

    // A duplicate advance would have put "v" back on screen right away.
    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "v");
    assert_near(at, 6_000);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn video_error_advances() {
    let mut h = Harness::spawn(None);
    h.show(vec![clip("v"), Slide::image("a", 2.0)]).await;
    h.next_displayed().await;

    let ((_, events), _) = h.next_started().await;
    events
        .send(PlaybackEvent::Error("decoder failed".into()))
        .unwrap();

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "a");
    assert_near(at, 2_000);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn video_progress_uses_reported_duration_once() {
    let mut h = Harness::spawn(Some(30.0));
    h.show(vec![clip("v")]).await;
    h.next_displayed().await;

    let ((_, events), _) = h.next_started().await;
    assert_eq!(h.progress.borrow().style, ProgressStyle::Idle);
    events.send(PlaybackEvent::Progress).unwrap();

    h.progress
        .wait_for(|p| {
            p.style
                == ProgressStyle::Running {
                    duration: Duration::from_secs(30),
                }
        })
        .await
        .unwrap();

    events.send(PlaybackEvent::Progress).unwrap();
    tokio::task::yield_now().await;
    assert!(!h.progress.has_changed().unwrap());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn status_notifications_drive_screen_step() {
    let mut h = Harness::spawn(None);
    assert_eq!(*h.step.borrow(), ScreenStep::Init);

    h.content.send(ContentEvent::AwaitingContent).await.unwrap();
    h.step
        .wait_for(|s| *s == ScreenStep::AwaitingContent)
        .await
        .unwrap();

    h.content
        .send(ContentEvent::ActivationNotComplete)
        .await
        .unwrap();
    h.step
        .wait_for(|s| *s == ScreenStep::NotActivated)
        .await
        .unwrap();

    h.content.send(ContentEvent::ShowContent(None)).await.unwrap();
    h.show(vec![Slide::image("a", 1.0)]).await;
    h.step
        .wait_for(|s| *s == ScreenStep::ShowContent)
        .await
        .unwrap();

    let (shown, _) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "a");

    h.shutdown().await;
}

/// Epoch clock that starts at `base` and follows tokio's (paused) time.
fn paused_clock(base: f64) -> impl Fn() -> f64 + Send + 'static {
    let start = Instant::now();
    move || base + start.elapsed().as_secs_f64()
}

#[tokio::test(start_paused = true)]
async fn out_of_window_playlist_retries_until_window_opens() {
    const BASE: f64 = 1_700_000_000.0;
    let mut h = Harness::spawn_with_clock(None, paused_clock(BASE));
    h.show(vec![
        Slide::image("later", 5.0).with_window(Some(BASE + 12.0), Some(BASE + 3_600.0)),
    ])
    .await;

    // Evaluations at 1000, 6000 and 11000 ms find nothing eligible.
    let quiet = tokio::time::timeout(Duration::from_millis(15_000), h.displayed.recv()).await;
    assert!(quiet.is_err(), "nothing should be displayed before the window opens");
    assert_eq!(h.progress.borrow().total_scheduled, 0);

    // The retry at 16000 ms wraps, recounts and shows the slide.
    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "later");
    assert_eq!((shown.position, shown.total), (1, 1));
    assert_near(at, 16_000);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn zero_bounds_play_like_an_open_window() {
    let mut h = Harness::spawn(None);
    h.show(vec![
        Slide::image("zero", 5.0).with_window(Some(0.0), Some(0.0)),
        Slide::image("zero-null", 5.0).with_window(Some(0.0), None),
    ])
    .await;

    let (shown, at) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "zero");
    assert_eq!(shown.total, 2);
    assert_near(at, 1_000);

    let (shown, _) = h.next_displayed().await;
    assert_eq!(shown.unique_id, "zero-null");

    h.shutdown().await;
}
