use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::playback::Speed;
use crate::prefetch::PrefetchStats;
use crate::scheduler::{Epoch, Phase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeCause {
    Next,
    Prev,
    Jump,
    AutoAdvance,
}

/// Emitted after every successful index mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexChanged {
    pub index: usize,
    pub previous: usize,
    pub cause: ChangeCause,
}

/// Read-only copy of the engine state, republished after every handled event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Snapshot {
    pub index: usize,
    pub len: usize,
    pub playing: bool,
    pub speed: Speed,
    pub visible: bool,
    pub phase: Phase,
    pub epoch: Epoch,
    pub prefetch: PrefetchStats,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CommandKind {
    Play,
    Pause,
    TogglePlay,
    Next,
    Prev,
    JumpTo(usize),
    SetSpeed(f32),
}

#[derive(Debug)]
pub(crate) struct Command {
    pub kind: CommandKind,
    pub reply: oneshot::Sender<Result<Snapshot>>,
}

/// Fired by a one-shot timer armed under `epoch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tick {
    pub epoch: Epoch,
}
