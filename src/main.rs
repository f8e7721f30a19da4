//! Binary entrypoint for the visual journal carousel.
//!
//! Delegates all logic to the library crate; no local modules here.

use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use visual_journal::config::{Configuration, VisibilitySourceKind};
use visual_journal::control::{self, ControlReply, VisibilityControl};
use visual_journal::deck::PageView;
use visual_journal::tasks::carousel::{Carousel, CarouselOptions};
use visual_journal::tasks::loader::ImageFileLoader;
use visual_journal::visibility::{
    AlwaysVisible, Geometry, ManualVisibility, ViewportVisibility, VisibilitySource,
};

#[derive(Debug, Parser)]
#[command(
    name = "visual-journal",
    version,
    about = "Visibility-gated auto-advancing image carousel"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Override the configured flip speed (0.2, 0.4, 0.6 or 1)
    #[arg(long, value_name = "PAGES")]
    speed: Option<f32>,
    /// Start paused
    #[arg(long)]
    paused: bool,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("visual_journal={level},info")))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

fn visibility_source(cfg: &Configuration) -> (Option<Box<dyn VisibilitySource>>, VisibilityControl) {
    match cfg.visibility.source {
        VisibilitySourceKind::Always => (Some(Box::new(AlwaysVisible)), VisibilityControl::Fixed),
        VisibilitySourceKind::Manual => {
            let manual = ManualVisibility::new(true);
            (
                Some(Box::new(manual.clone())),
                VisibilityControl::Manual(manual),
            )
        }
        VisibilitySourceKind::Viewport => {
            let (source, feed) =
                ViewportVisibility::new(cfg.visibility.threshold, Geometry::default());
            (Some(Box::new(source)), VisibilityControl::Viewport(feed))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let mut cfg = Configuration::from_yaml_file(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?
        .validated()
        .context("invalid configuration values")?;
    if let Some(speed) = args.speed {
        cfg.speed = speed.try_into().context("invalid --speed")?;
    }
    tracing::debug!("Loaded configuration from {}:\n{:#?}", args.config.display(), cfg);

    let deck = cfg.deck().context("failed to build deck")?;
    let loader = Arc::new(ImageFileLoader::new(&cfg.asset_root));
    let (source, visibility) = visibility_source(&cfg);

    let cancel = CancellationToken::new();
    let carousel = Arc::new(Carousel::spawn(
        deck,
        CarouselOptions::from(&cfg),
        loader,
        source,
        &cancel,
    ));
    if args.paused {
        carousel.pause().await.context("failed to pause")?;
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

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    // Page log (stands in for the renderer)
    tasks.spawn({
        let carousel = Arc::clone(&carousel);
        let cancel = cancel.clone();
        async move {
            let mut changes = carousel.subscribe();
            log_page(&carousel.page_view());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = changes.recv() => match changed {
                        Ok(changed) => log_page(&carousel.deck().view(changed.index)),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "page log lagged");
                            log_page(&carousel.page_view());
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            Ok(())
        }
    });

    // Stdin commands (interactive only); EOF or `q` shuts down
    if io::stdin().is_terminal() {
        let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
        std::thread::spawn(move || {
            for line in io::stdin().lines() {
                let Ok(line) = line else { break };
                if line_tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });

        let carousel = Arc::clone(&carousel);
        let visibility = visibility.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = line_rx.recv() => line,
                };
                let Some(line) = line else {
                    tracing::info!("stdin closed; initiating shutdown");
                    break;
                };
                let line = line.trim();
                if line == "q" || line == "quit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                match control::parse_shorthand(line) {
                    Some(command) => match control::apply(&carousel, &visibility, command).await {
                        ControlReply::Ok { snapshot } => tracing::info!(
                            page = snapshot.index + 1,
                            playing = snapshot.playing,
                            speed = %snapshot.speed,
                            visible = snapshot.visible,
                            phase = ?snapshot.phase,
                            "status"
                        ),
                        ControlReply::Error { message } => tracing::warn!("{message}"),
                    },
                    None => tracing::warn!(input = line, "unrecognised command"),
                }
            }
            cancel.cancel();
            Ok(())
        });
    } else {
        tracing::debug!("stdin is not a terminal; skipping command reader");
    }

    // Control socket
    #[cfg(unix)]
    {
        if let Some(path) = cfg.control_socket_path.clone() {
            let carousel = Arc::clone(&carousel);
            let visibility = visibility.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                // Reported right away; the carousel keeps running without it.
                if let Err(err) = control::serve(&path, carousel, visibility, cancel).await {
                    tracing::error!("control socket failed: {err:#}");
                }
                Ok(())
            });
        }
    }

    cancel.cancelled().await;

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    match Arc::try_unwrap(carousel) {
        Ok(carousel) => carousel.shutdown().await,
        Err(shared) => shared.close(),
    }

    Ok(())
}

fn log_page(view: &PageView) {
    tracing::info!(
        "[{}] {}: {}",
        view.label(),
        view.current.title,
        view.current.description
    );
}
