//! Video playback capability consumed by the renderer, and a backend that
//! drives an external player process.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::process::Command;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{SOURCE_PLACEHOLDER, VideoConfig};
use crate::slide::MediaAsset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preload {
    None,
    Metadata,
    Auto,
}

/// Construction options for a playback handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOptions {
    pub controls: bool,
    pub autoplay: bool,
    pub preload: Preload,
}

impl PlaybackOptions {
    /// Unattended signage playback: no controls, nothing starts or loads on its own.
    pub const SIGNAGE: Self = Self {
        controls: false,
        autoplay: false,
        preload: Preload::None,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// More of the media is available; `duration()` may now be known.
    Progress,
    Ended,
    Error(String),
}

/// One reusable player instance bound to a slide.
pub trait PlaybackHandle: Send {
    /// Drop every subscription handed out before this call.
    fn detach(&mut self);
    /// Point the handle at `media`, discarding any previous source.
    fn load(&mut self, media: &[MediaAsset]) -> Result<()>;
    /// Receive events for the current load. Replaces earlier subscriptions.
    fn subscribe(&mut self) -> UnboundedReceiver<PlaybackEvent>;
    fn play(&mut self) -> Result<()>;
    /// Media length in seconds, once known.
    fn duration(&self) -> Option<f64>;
}

pub trait PlaybackBackend: Send {
    fn construct(&mut self, id: &str, options: PlaybackOptions) -> Result<Box<dyn PlaybackHandle>>;
}

/// Runs `video.command` per playback; exit status maps to ended/error.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    settings: Arc<VideoConfig>,
}

impl CommandBackend {
    pub fn new(settings: VideoConfig) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl PlaybackBackend for CommandBackend {
    fn construct(
        &mut self,
        id: &str,
        options: PlaybackOptions,
    ) -> Result<Box<dyn PlaybackHandle>> {
        debug!(id, ?options, "constructing command playback handle");
        Ok(Box::new(CommandHandle {
            id: id.to_string(),
            settings: Arc::clone(&self.settings),
            source: None,
            events: None,
            duration: Arc::new(Mutex::new(None)),
            stop: None,
        }))
    }
}

struct CommandHandle {
    id: String,
    settings: Arc<VideoConfig>,
    source: Option<String>,
    events: Option<UnboundedSender<PlaybackEvent>>,
    duration: Arc<Mutex<Option<f64>>>,
    stop: Option<CancellationToken>,
}

impl CommandHandle {
    fn halt(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
    }

    fn set_duration(&self, value: Option<f64>) {
        if let Ok(mut slot) = self.duration.lock() {
            *slot = value;
        }
    }
}

impl PlaybackHandle for CommandHandle {
    fn detach(&mut self) {
        self.events = None;
        self.halt();
    }

    fn load(&mut self, media: &[MediaAsset]) -> Result<()> {
        self.halt();
        self.set_duration(None);
        self.source = media.iter().find_map(|asset| asset.url.clone());
        if self.source.is_none() {
            bail!("slide {} has no playable media source", self.id);
        }
        Ok(())
    }

    fn subscribe(&mut self) -> UnboundedReceiver<PlaybackEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    fn play(&mut self) -> Result<()> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| anyhow!("play requested before load for {}", self.id))?;
        let events = self
            .events
            .clone()
            .ok_or_else(|| anyhow!("play requested without a subscriber for {}", self.id))?;

        self.halt();
        let stop = CancellationToken::new();
        self.stop = Some(stop.clone());

        let argv = render_command(&self.settings.command, &source);
        let mut command = build_command(&argv)?;
        let mut child = command
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn video player '{}'", argv[0]))?;

        let id = self.id.clone();
        let player_events = events.clone();
        let player_stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = player_stop.cancelled() => {
                    if let Err(err) = child.kill().await {
                        debug!(id = %id, error = %err, "video player already gone");
                    }
                }
                status = child.wait() => {
                    let event = match status {
                        Ok(status) if status.success() => PlaybackEvent::Ended,
                        Ok(status) => PlaybackEvent::Error(format!(
                            "video player exited with status {}",
                            status.code().unwrap_or(-1)
                        )),
                        Err(err) => PlaybackEvent::Error(format!("video player wait failed: {err}")),
                    };
                    let _ = player_events.send(event);
                }
            }
        });

        if let Some(probe) = self.settings.probe_command.as_deref() {
            let argv = render_command(probe, &source);
            let timeout = self.settings.probe_timeout;
            let duration = Arc::clone(&self.duration);
            let id = self.id.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    probed = probe_duration(argv, timeout) => match probed {
                        Ok(secs) => {
                            if let Ok(mut slot) = duration.lock() {
                                *slot = Some(secs);
                            }
                            let _ = events.send(PlaybackEvent::Progress);
                        }
                        Err(err) => warn!(id = %id, error = %err, "video duration probe failed"),
                    }
                }
            });
        }
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        self.duration.lock().ok().and_then(|slot| *slot)
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Substitute `source` into `template`; append it when no placeholder is present.
pub fn render_command(template: &[String], source: &str) -> Vec<String> {
    let mut argv: Vec<String> = template
        .iter()
        .map(|arg| arg.replace(SOURCE_PLACEHOLDER, source))
        .collect();
    if !template.iter().any(|arg| arg.contains(SOURCE_PLACEHOLDER)) {
        argv.push(source.to_string());
    }
    argv
}

fn build_command(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command line"))?;
    let mut command = Command::new(program);
    command.args(args);
    Ok(command)
}

async fn probe_duration(argv: Vec<String>, timeout: Duration) -> Result<f64> {
    let mut command = build_command(&argv)?;
    command.stdin(Stdio::null()).kill_on_drop(true);
    let output = tokio::time::timeout(timeout, command.output())
        .await
        .with_context(|| {
            format!(
                "'{}' timed out after {}",
                argv[0],
                humantime::format_duration(timeout)
            )
        })?
        .with_context(|| format!("failed to run '{}'", argv[0]))?;

    if !output.status.success() {
        bail!(
            "'{}' exited with status {}",
            argv[0],
            output.status.code().unwrap_or(-1)
        );
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let secs: f64 = stdout
        .trim()
        .parse()
        .with_context(|| format!("unexpected duration output '{}'", stdout.trim()))?;
    if !secs.is_finite() || secs <= 0.0 {
        bail!("probe reported a non-positive duration: {secs}");
    }
    Ok(secs)
}
