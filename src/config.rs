use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

pub const DEFAULT_CONTROL_SOCKET_PATH: &str = "/run/signage-player/control.sock";

/// Placeholder replaced by the media source in player and probe commands.
pub const SOURCE_PLACEHOLDER: &str = "{source}";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// JSON file holding a `showContent` payload. Rewrites are picked up live.
    pub playlist_file: Option<PathBuf>,
    /// Unix domain socket accepting newline-delimited content notifications.
    pub control_socket_path: PathBuf,
    /// Capacity of the queue feeding notifications into the player.
    pub content_queue_depth: usize,
    /// Capacity of the queue carrying displayed-slide notifications.
    pub displayed_queue_depth: usize,
    /// External video player used for video slides.
    pub video: VideoConfig,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.content_queue_depth > 0,
            "content-queue-depth must be greater than zero"
        );
        ensure!(
            self.displayed_queue_depth > 0,
            "displayed-queue-depth must be greater than zero"
        );
        ensure!(
            !self.control_socket_path.as_os_str().is_empty(),
            "control-socket-path must not be empty"
        );
        ensure!(
            self.control_socket_path.file_name().is_some(),
            "control-socket-path must include a socket file name"
        );
        if let Some(path) = &self.playlist_file {
            ensure!(
                path.file_name().is_some(),
                "playlist-file must name a file, got {}",
                path.display()
            );
        }
        self.video
            .validate()
            .context("invalid video configuration")?;
        Ok(self)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            playlist_file: None,
            control_socket_path: PathBuf::from(DEFAULT_CONTROL_SOCKET_PATH),
            content_queue_depth: 16,
            displayed_queue_depth: 64,
            video: VideoConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct VideoConfig {
    /// Player program and arguments; `{source}` is replaced by the media URL.
    pub command: Vec<String>,
    /// Optional program printing the media duration in seconds on stdout.
    pub probe_command: Option<Vec<String>>,
    /// Upper bound on how long the duration probe may run.
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl VideoConfig {
    fn default_command() -> Vec<String> {
        ["mpv", "--really-quiet", "--fs", "--no-terminal", SOURCE_PLACEHOLDER]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn default_probe_command() -> Vec<String> {
        [
            "ffprobe",
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            SOURCE_PLACEHOLDER,
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    const fn default_probe_timeout() -> Duration {
        Duration::from_secs(5)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.command.first().is_some_and(|p| !p.trim().is_empty()),
            "video.command must name a program"
        );
        if let Some(probe) = &self.probe_command {
            ensure!(
                probe.first().is_some_and(|p| !p.trim().is_empty()),
                "video.probe-command must name a program"
            );
        }
        ensure!(
            !self.probe_timeout.is_zero(),
            "video.probe-timeout must be greater than zero"
        );
        Ok(())
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            command: Self::default_command(),
            probe_command: Some(Self::default_probe_command()),
            probe_timeout: Self::default_probe_timeout(),
        }
    }
}
