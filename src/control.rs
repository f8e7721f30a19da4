//! Runtime control surface: JSON commands from a Unix socket or shorthand
//! words typed on stdin, applied to a [`Carousel`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::Snapshot;
use crate::tasks::carousel::Carousel;
use crate::visibility::{ManualVisibility, Rect, ViewportFeed};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum ControlCommand {
    Play,
    Pause,
    TogglePlay,
    Next,
    Prev,
    JumpTo { index: usize },
    SetSpeed { speed: f32 },
    SetVisible { visible: bool },
    Viewport { region: Rect, viewport: Rect },
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ControlReply {
    Ok { snapshot: Snapshot },
    Error { message: String },
}

impl ControlReply {
    fn error(message: impl Into<String>) -> Self {
        ControlReply::Error {
            message: message.into(),
        }
    }
}

/// Where visibility commands are routed, depending on the configured source.
#[derive(Debug, Clone, Default)]
pub enum VisibilityControl {
    #[default]
    Fixed,
    Manual(ManualVisibility),
    Viewport(ViewportFeed),
}

/// How long a visibility command waits for the engine to pick up the change.
const VISIBILITY_SETTLE: Duration = Duration::from_millis(250);

pub fn parse_json(line: &str) -> serde_json::Result<ControlCommand> {
    serde_json::from_str(line)
}

/// Parses the terse stdin syntax: `n`, `p`, `play`, `pause`, `toggle`,
/// `speed 0.4`, `jump 3` (one-based), `show`, `hide`, `status`.
pub fn parse_shorthand(line: &str) -> Option<ControlCommand> {
    let mut words = line.split_whitespace();
    let head = words.next()?;
    let arg = words.next();
    let command = match (head, arg) {
        ("n" | "next", None) => ControlCommand::Next,
        ("p" | "prev", None) => ControlCommand::Prev,
        ("play", None) => ControlCommand::Play,
        ("pause", None) => ControlCommand::Pause,
        ("t" | "toggle", None) => ControlCommand::TogglePlay,
        ("show", None) => ControlCommand::SetVisible { visible: true },
        ("hide", None) => ControlCommand::SetVisible { visible: false },
        ("s" | "status", None) => ControlCommand::Status,
        ("speed", Some(value)) => ControlCommand::SetSpeed {
            speed: value.trim_end_matches('x').parse().ok()?,
        },
        ("jump", Some(value)) => ControlCommand::JumpTo {
            index: value.parse::<usize>().ok()?.checked_sub(1)?,
        },
        _ => return None,
    };
    words.next().is_none().then_some(command)
}

pub async fn apply(
    carousel: &Carousel,
    visibility: &VisibilityControl,
    command: ControlCommand,
) -> ControlReply {
    let result = match command {
        ControlCommand::Play => carousel.play().await,
        ControlCommand::Pause => carousel.pause().await,
        ControlCommand::TogglePlay => carousel.toggle_play().await,
        ControlCommand::Next => carousel.next().await,
        ControlCommand::Prev => carousel.prev().await,
        ControlCommand::JumpTo { index } => carousel.jump_to(index).await,
        ControlCommand::SetSpeed { speed } => carousel.set_speed(speed).await,
        ControlCommand::Status => Ok(carousel.snapshot()),
        ControlCommand::SetVisible { visible } => match visibility {
            VisibilityControl::Manual(manual) => {
                manual.set(visible);
                Ok(settled(carousel, visible).await)
            }
            _ => return ControlReply::error("visibility source is not manual"),
        },
        ControlCommand::Viewport { region, viewport } => match visibility {
            VisibilityControl::Viewport(feed) => {
                let visible = feed.update(region, viewport);
                Ok(settled(carousel, visible).await)
            }
            _ => return ControlReply::error("visibility source is not viewport-driven"),
        },
    };
    match result {
        Ok(snapshot) => ControlReply::Ok { snapshot },
        Err(err) => ControlReply::error(err.to_string()),
    }
}

/// Snapshot once the engine reports `visible`. Falls back to the current
/// snapshot when the source is not attached (fail-open) or the engine stopped.
async fn settled(carousel: &Carousel, visible: bool) -> Snapshot {
    let mut watch = carousel.watch();
    let waited = tokio::time::timeout(
        VISIBILITY_SETTLE,
        watch.wait_for(|snapshot| snapshot.visible == visible),
    )
    .await;
    match waited {
        Ok(Ok(snapshot)) => *snapshot,
        _ => {
            debug!(visible, "visibility change not observed by the engine");
            carousel.snapshot()
        }
    }
}

#[cfg(unix)]
pub use socket::serve;

#[cfg(unix)]
mod socket {
    use std::io;
    use std::path::Path;
    use std::sync::Arc;

    use anyhow::{Context, Result};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{UnixListener, UnixStream};
    use tokio::select;
    use tokio::task::JoinSet;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    use super::{ControlReply, VisibilityControl, apply, parse_json};
    use crate::tasks::carousel::Carousel;

    /// Accepts JSON-per-line control connections on `path` until `cancel`
    /// fires. Each line gets exactly one JSON reply line.
    pub async fn serve(
        path: &Path,
        carousel: Arc<Carousel>,
        visibility: VisibilityControl,
        cancel: CancellationToken,
    ) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale control socket"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to remove stale control socket {}", path.display())
                });
            }
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to bind control socket {}", path.display()))?;
        info!(path = %path.display(), "control socket listening");

        let mut connections = JoinSet::new();
        loop {
            select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(handle_connection(
                            stream,
                            Arc::clone(&carousel),
                            visibility.clone(),
                            cancel.clone(),
                        ));
                    }
                    Err(err) => warn!("control socket accept failed: {err}"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Ok(Err(err)) = joined {
                        debug!("control connection ended: {err:#}");
                    }
                }
            }
        }

        connections.abort_all();
        if let Err(err) = std::fs::remove_file(path) {
            debug!("failed to remove control socket on shutdown: {err}");
        }
        Ok(())
    }

    async fn handle_connection(
        stream: UnixStream,
        carousel: Arc<Carousel>,
        visibility: VisibilityControl,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        loop {
            let line = select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line.context("failed to read control command")?,
            };
            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            let reply = match parse_json(&line) {
                Ok(command) => {
                    debug!(?command, "control command received");
                    apply(&carousel, &visibility, command).await
                }
                Err(err) => ControlReply::Error {
                    message: format!("invalid command: {err}"),
                },
            };
            let mut payload = serde_json::to_vec(&reply).context("failed to encode reply")?;
            payload.push(b'\n');
            write
                .write_all(&payload)
                .await
                .context("failed to write control reply")?;
        }
        Ok(())
    }
}
