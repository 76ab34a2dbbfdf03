//! Binary entrypoint for the signage player.
//!
//! Wires the content feeds, the player task and the presenter together.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser};
use humantime::parse_rfc3339;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use signage_player::config::Configuration;
use signage_player::events::{ContentEvent, Displayed, ScreenStep};
use signage_player::playback::CommandBackend;
use signage_player::playlist::into_slides;
use signage_player::progress::ProgressState;
use signage_player::scheduler::plan_cycle;
use signage_player::slide::{MediaKind, epoch_seconds};
use signage_player::tasks;

#[derive(Debug, Parser)]
#[command(name = "signage-player", version, about = "Scheduled slideshow player")]
struct Cli {
    /// Path to YAML config file
    #[arg(value_name = "CONFIG", required_unless_present = "check_playlist")]
    config: Option<PathBuf>,

    /// Print slide eligibility and one cycle's visit order for a playlist file, then exit
    #[arg(long = "check-playlist", value_name = "FILE")]
    check_playlist: Option<PathBuf>,

    /// Evaluate --check-playlist at this RFC 3339 instant instead of now
    #[arg(long = "at", value_name = "RFC3339", requires = "check_playlist")]
    at: Option<String>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(format!("signage_player={level}").parse()?);
    fmt().with_env_filter(filter).with_target(false).compact().init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    if let Some(playlist) = cli.check_playlist.as_deref() {
        let at = match cli.at.as_deref() {
            Some(ts) => DateTime::<Utc>::from(parse_rfc3339(ts).context("failed to parse --at")?),
            None => Utc::now(),
        };
        return check_playlist(playlist, at);
    }

    let Some(config) = cli.config else {
        anyhow::bail!("a configuration file is required");
    };
    let cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?
        .validated()
        .context("invalid configuration values")?;
    tracing::info!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    // Channels (small/bounded)
    let (content_tx, content_rx) = mpsc::channel::<ContentEvent>(cfg.content_queue_depth); // Feeds -> Player
    let (displayed_tx, displayed_rx) = mpsc::channel::<Displayed>(cfg.displayed_queue_depth); // Player -> Presenter
    let (progress_tx, progress_rx) = watch::channel(ProgressState::default());
    let (step_tx, step_rx) = watch::channel(ScreenStep::Init);

    let cancel = CancellationToken::new();
    spawn_shutdown_watchers(&cancel);

    let mut tasks = JoinSet::new();

    // Player
    tasks.spawn({
        let outputs = tasks::player::PlayerOutputs {
            displayed: displayed_tx,
            progress: progress_tx,
            step: step_tx,
        };
        let backend = CommandBackend::new(cfg.video.clone());
        let cancel = cancel.clone();
        async move {
            tasks::player::run(content_rx, outputs, backend, cancel)
                .await
                .context("player task failed")
        }
    });

    // Presenter
    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            tasks::presenter::run(displayed_rx, step_rx, progress_rx, cancel)
                .await
                .context("presenter task failed")
        }
    });

    // Playlist file feed
    if let Some(path) = cfg.playlist_file.clone() {
        let to_player = content_tx.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            tasks::watch::run(path, to_player, cancel)
                .await
                .context("playlist watch task failed")
        });
    }

    // Control socket feed
    #[cfg(unix)]
    {
        let path = cfg.control_socket_path.clone();
        let to_player = content_tx.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            tasks::control::run(path, to_player, cancel)
                .await
                .context("control socket task failed")
        });
    }
    drop(content_tx);

    // A failed task takes the rest down with it.
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("task error: {e:?}");
                cancel.cancel();
            }
            Err(e) => {
                tracing::error!("join error: {e}");
                cancel.cancel();
            }
        }
    }

    Ok(())
}

fn spawn_shutdown_watchers(cancel: &CancellationToken) {
    // Ctrl-D on an interactive terminal stops the player
    if io::stdin().is_terminal() {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let mut sink = Vec::new();
            match io::stdin().read_to_end(&mut sink) {
                Ok(_) => tracing::info!("stdin closed; initiating shutdown"),
                Err(err) => tracing::warn!("stdin watcher failed: {err}"),
            }
            cancel.cancel();
        });
    } else {
        tracing::debug!("stdin is not a terminal; skipping shutdown watcher");
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = sigterm.recv() => {
                            tracing::info!("SIGTERM received; initiating shutdown");
                            cancel.cancel();
                        }
                    }
                }
                Err(err) => tracing::warn!("failed to register SIGTERM handler: {err}"),
            }
        });
    }
}

fn check_playlist(path: &Path, at: DateTime<Utc>) -> Result<()> {
    let payload = tasks::watch::load_payload(path)
        .with_context(|| format!("failed to read playlist {}", path.display()))?;
    let now = epoch_seconds(at);

    println!(
        "# playlist check\n# file: {}\n# at: {}\n# slides: {}\n",
        path.display(),
        at.to_rfc3339(),
        payload.slides.len()
    );

    println!("# eligibility:");
    for (idx, slide) in payload.slides.iter().enumerate() {
        let verdict = if slide.is_scheduled(now) { "on " } else { "off" };
        let detail = match slide.media_type {
            MediaKind::Image => format!("{}s", slide.duration),
            MediaKind::Video if slide.has_media() => "video".to_string(),
            MediaKind::Video => "video (no media, skipped)".to_string(),
        };
        println!("  {:>4} {} {} [{}]", idx, verdict, slide.unique_id, detail);
    }

    let plan = plan_cycle(into_slides(payload.slides), now);
    println!("\n# cycle order:");
    if plan.is_empty() {
        println!("(nothing eligible; player would retry every 5s)");
    } else {
        for (position, (idx, slide)) in plan.iter().enumerate() {
            println!("  {:>4}: #{} {}", position + 1, idx, slide.unique_id);
        }
    }
    Ok(())
}
