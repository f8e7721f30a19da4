use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Flip speed in pages per time unit. Only the four speeds offered by the
/// speed selector are representable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub enum Speed {
    #[default]
    Slow,
    Medium,
    Fast,
    Full,
}

impl Speed {
    pub const ALL: [Speed; 4] = [Speed::Slow, Speed::Medium, Speed::Fast, Speed::Full];

    pub const fn pages_per_unit(self) -> f32 {
        match self {
            Speed::Slow => 0.2,
            Speed::Medium => 0.4,
            Speed::Fast => 0.6,
            Speed::Full => 1.0,
        }
    }

    /// Delay between two automatic page flips: `time_unit / speed`.
    pub fn period(self, time_unit: Duration) -> Duration {
        time_unit.div_f32(self.pages_per_unit())
    }
}

impl TryFrom<f32> for Speed {
    type Error = Error;

    fn try_from(value: f32) -> Result<Self> {
        Speed::ALL
            .into_iter()
            .find(|speed| (speed.pages_per_unit() - value).abs() < 1e-6)
            .ok_or(Error::InvalidSpeed(value))
    }
}

impl From<Speed> for f32 {
    fn from(speed: Speed) -> Self {
        speed.pages_per_unit()
    }
}

impl fmt::Display for Speed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.pages_per_unit())
    }
}

/// Mutable playback state owned by the engine.
///
/// Fields are only written by [`NavigationController`](crate::navigation::NavigationController)
/// and [`AutoAdvanceScheduler`](crate::scheduler::AutoAdvanceScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    current_index: usize,
    playing: bool,
    speed: Speed,
    visible: bool,
}

impl PlaybackState {
    /// Index 0, playing, not yet visible.
    pub const fn new(speed: Speed) -> Self {
        Self {
            current_index: 0,
            playing: true,
            speed,
            visible: false,
        }
    }

    pub const fn current_index(&self) -> usize {
        self.current_index
    }

    pub const fn is_playing(&self) -> bool {
        self.playing
    }

    pub const fn speed(&self) -> Speed {
        self.speed
    }

    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn set_current_index(&mut self, index: usize) {
        self.current_index = index;
    }

    pub(crate) fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub(crate) fn set_speed(&mut self, speed: Speed) {
        self.speed = speed;
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }
}
