use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher, recommended_watcher};
use tokio::sync::mpsc::{self, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ContentError;
use crate::events::{ContentEvent, ContentPayload};

/// Feed the player from a JSON playlist file.
///
/// The file holds a `showContent` payload (`{"slides":[...]}`). A missing or
/// unreadable file at startup reports `awaitingContent`; later rewrites are
/// delivered as `showContent`. Broken rewrites are logged and skipped so the
/// last good playlist keeps playing.
#[instrument(skip(to_player, cancel), fields(path = %path.display()))]
pub async fn run(
    path: PathBuf,
    to_player: Sender<ContentEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let initial = match load_payload(&path) {
        Ok(payload) => {
            info!(slides = payload.slides.len(), "initial playlist loaded");
            ContentEvent::ShowContent(Some(payload))
        }
        Err(err) if err.is_not_found() => {
            info!("playlist file not present yet; awaiting content");
            ContentEvent::AwaitingContent
        }
        Err(err) => {
            warn!(error = %err, "initial playlist unusable; awaiting content");
            ContentEvent::AwaitingContent
        }
    };
    if to_player.send(initial).await.is_err() {
        return Ok(());
    }

    let Some(file_name) = path.file_name().map(OsString::from) else {
        anyhow::bail!("playlist path {} has no file name", path.display());
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    // Bridge notify callback -> async channel
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Result<Event>>(64);
    let mut watcher = recommended_watcher(move |res| {
        let _ = watch_tx.blocking_send(res);
    })?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;
    info!(dir = %dir.display(), "watching playlist directory");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting playlist watch task");
                break;
            }

            res = watch_rx.recv() => match res {
                Some(Ok(event)) => {
                    let touches_playlist = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if !touches_playlist {
                        continue;
                    }
                    debug!(kind = ?event.kind, "playlist file event");
                    match event.kind {
                        EventKind::Create(_) | EventKind::Modify(_) => {
                            if !path.exists() {
                                // Renamed away; the replacement arrives as its own event.
                                continue;
                            }
                            match load_payload(&path) {
                                Ok(payload) => {
                                    info!(slides = payload.slides.len(), "playlist file changed");
                                    let event = ContentEvent::ShowContent(Some(payload));
                                    if to_player.send(event).await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => warn!(error = %err, "ignoring unreadable playlist rewrite"),
                            }
                        }
                        EventKind::Remove(_) => {
                            info!("playlist file removed; keeping current playlist");
                        }
                        _ => {}
                    }
                }
                Some(Err(err)) => error!("watch error: {err}"),
                None => break,
            }
        }
    }
    Ok(())
}

pub fn load_payload(path: &Path) -> Result<ContentPayload, ContentError> {
    let text = std::fs::read_to_string(path)?;
    ContentPayload::from_json(&text)
}
