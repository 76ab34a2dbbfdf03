use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::events::ContentEvent;

/// Accept content notifications on a unix socket, one JSON object per line.
///
/// ```text
/// {"event":"showContent","data":{"slides":[...]}}
/// {"event":"awaitingContent"}
/// ```
#[instrument(skip(to_player, cancel), fields(socket = %socket_path.display()))]
pub async fn run(
    socket_path: PathBuf,
    to_player: Sender<ContentEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = bind(&socket_path)?;
    info!("control socket listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting control socket task");
                break;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("control client connected");
                    let to_player = to_player.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        let (reader, _writer) = stream.into_split();
                        serve_connection(reader, to_player, cancel).await;
                    });
                }
                Err(err) => warn!(error = %err, "control socket accept failed"),
            }
        }
    }

    drop(listener);
    if let Err(err) = std::fs::remove_file(&socket_path) {
        debug!(error = %err, "control socket already removed");
    }
    Ok(())
}

fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match std::fs::remove_file(socket_path) {
        Ok(()) => debug!("removed stale control socket"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to remove stale socket {}", socket_path.display()));
        }
    }
    UnixListener::bind(socket_path)
        .with_context(|| format!("failed to bind control socket {}", socket_path.display()))
}

/// Forward every well-formed line of `stream` to the player.
///
/// Returns when the peer closes, the player is gone, or `cancel` fires.
pub async fn serve_connection<S>(stream: S, to_player: Sender<ContentEvent>, cancel: CancellationToken)
where
    S: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match ContentEvent::from_json(line) {
                    Ok(event) => {
                        debug!(?event, "control notification");
                        if to_player.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "ignoring malformed control message"),
                }
            }
            Ok(None) => {
                debug!("control client disconnected");
                break;
            }
            Err(err) => {
                warn!(error = %err, "control connection read failed");
                break;
            }
        }
    }
}
