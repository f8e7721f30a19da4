use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::deck::{Deck, Slide};
use crate::playback::Speed;
use crate::visibility::DEFAULT_THRESHOLD;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisibilitySourceKind {
    /// No gating; the carousel always counts as visible.
    Always,
    /// Toggled at runtime through the control surface; starts visible.
    #[default]
    Manual,
    /// Computed from region/viewport geometry sent to the control surface.
    Viewport,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct VisibilityOptions {
    pub source: VisibilitySourceKind,
    /// Fraction of the host region that must be on screen, in `(0, 1]`.
    pub threshold: f32,
}

impl Default for VisibilityOptions {
    fn default() -> Self {
        Self {
            source: VisibilitySourceKind::default(),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl VisibilityOptions {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.threshold.is_finite() && self.threshold > 0.0 && self.threshold <= 1.0,
            "visibility.threshold must be within (0, 1]"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Duration of one page at speed 1; the flip period is `time-unit / speed`.
    #[serde(with = "humantime_serde")]
    pub time_unit: Duration,
    /// Initial flip speed: 0.2, 0.4, 0.6 or 1.
    pub speed: Speed,
    /// Directory slide assets are resolved against.
    pub asset_root: PathBuf,
    /// How visibility gating is fed.
    pub visibility: VisibilityOptions,
    /// Optional Unix domain socket accepting JSON control commands.
    pub control_socket_path: Option<PathBuf>,
    /// Capacity of the engine's command queue.
    pub command_queue: usize,
    /// The deck, in display order.
    pub slides: Vec<Slide>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            time_unit: Self::default_time_unit(),
            speed: Speed::default(),
            asset_root: PathBuf::from("."),
            visibility: VisibilityOptions::default(),
            control_socket_path: None,
            command_queue: 16,
            slides: Vec::new(),
        }
    }
}

impl Configuration {
    const fn default_time_unit() -> Duration {
        Duration::from_secs(1)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(!self.slides.is_empty(), "slides must contain at least one entry");
        ensure!(
            self.time_unit > Duration::ZERO,
            "time-unit must be greater than zero"
        );
        ensure!(
            self.command_queue > 0,
            "command-queue must be greater than zero"
        );
        let mut ids = HashSet::new();
        for slide in &self.slides {
            ensure!(!slide.id.trim().is_empty(), "slide ids must not be empty");
            ensure!(ids.insert(slide.id.as_str()), "duplicate slide id {:?}", slide.id);
            ensure!(
                !slide.asset.as_str().trim().is_empty(),
                "slide {:?} must reference an asset",
                slide.id
            );
        }
        if let Some(path) = &self.control_socket_path {
            ensure!(
                path.file_name().is_some(),
                "control-socket-path must include a socket file name"
            );
        }
        self.visibility
            .validate()
            .context("invalid visibility options")?;
        Ok(self)
    }

    pub fn deck(&self) -> crate::Result<Deck> {
        Deck::new(self.slides.clone())
    }
}
