//! Auto-advance state machine.
//!
//! The scheduler never touches a clock. Every transition returns a
//! [`TimerPlan`] telling the driver which one-shot timer to cancel and which
//! to arm; each armed timer carries the [`Epoch`] it was armed under. Any
//! externally triggered transition bumps the epoch, so a tick that was
//! already in flight when its timer was cancelled is recognised as stale and
//! dropped instead of advancing the deck a second time.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, trace};

use crate::events::{ChangeCause, IndexChanged};
use crate::navigation::NavigationController;
use crate::playback::{PlaybackState, Speed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Paused.
    Stopped,
    /// Playing, but the host is not sufficiently visible.
    Armed,
    /// Playing and visible; exactly one timer is live.
    Running,
}

impl Phase {
    pub const fn of(state: &PlaybackState) -> Self {
        match (state.is_playing(), state.is_visible()) {
            (false, _) => Phase::Stopped,
            (true, false) => Phase::Armed,
            (true, true) => Phase::Running,
        }
    }
}

/// Monotonically increasing timer generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(transparent)]
pub struct Epoch(u64);

impl Epoch {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTicket {
    pub epoch: Epoch,
    pub period: Duration,
}

/// Timer side effects of one transition. `cancel` is always applied first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimerPlan {
    pub cancel: Option<TimerTicket>,
    pub arm: Option<TimerTicket>,
}

impl TimerPlan {
    pub const fn is_noop(&self) -> bool {
        self.cancel.is_none() && self.arm.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Advanced {
        changed: IndexChanged,
        plan: TimerPlan,
    },
    /// Superseded epoch, no live timer, or engine torn down.
    Stale,
}

#[derive(Debug, Clone)]
pub struct AutoAdvanceScheduler {
    epoch: Epoch,
    live: Option<TimerTicket>,
    time_unit: Duration,
    torn_down: bool,
}

impl AutoAdvanceScheduler {
    pub const fn new(time_unit: Duration) -> Self {
        Self {
            epoch: Epoch::ZERO,
            live: None,
            time_unit,
            torn_down: false,
        }
    }

    pub const fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub const fn live_timer(&self) -> Option<TimerTicket> {
        self.live
    }

    pub fn play(&mut self, state: &mut PlaybackState) -> TimerPlan {
        if state.is_playing() {
            return TimerPlan::default();
        }
        state.set_playing(true);
        self.transition(state, "play")
    }

    pub fn pause(&mut self, state: &mut PlaybackState) -> TimerPlan {
        if !state.is_playing() {
            return TimerPlan::default();
        }
        state.set_playing(false);
        self.transition(state, "pause")
    }

    pub fn set_visible(&mut self, state: &mut PlaybackState, visible: bool) -> TimerPlan {
        if state.is_visible() == visible {
            return TimerPlan::default();
        }
        state.set_visible(visible);
        self.transition(state, "visibility")
    }

    /// While running this cancels the live timer and arms one with the new
    /// period; otherwise the speed is only stored.
    pub fn set_speed(&mut self, state: &mut PlaybackState, speed: Speed) -> TimerPlan {
        if state.speed() == speed {
            return TimerPlan::default();
        }
        state.set_speed(speed);
        self.transition(state, "speed")
    }

    /// Handles a fired timer. A matching tick advances the deck and arms the
    /// next one-shot timer under the same epoch.
    pub fn on_tick(
        &mut self,
        epoch: Epoch,
        state: &mut PlaybackState,
        nav: &NavigationController,
    ) -> TickOutcome {
        let live = match self.live {
            Some(ticket) if ticket.epoch == epoch && !self.torn_down => ticket,
            _ => {
                trace!(
                    tick_epoch = epoch.get(),
                    current_epoch = self.epoch.get(),
                    "discarding stale tick"
                );
                return TickOutcome::Stale;
            }
        };
        debug_assert_eq!(Phase::of(state), Phase::Running);
        self.live = None;

        let mut changed = nav.next(state);
        changed.cause = ChangeCause::AutoAdvance;
        let arm = self.arm(state);
        trace!(epoch = live.epoch.get(), index = changed.index, "auto-advanced");
        TickOutcome::Advanced {
            changed,
            plan: TimerPlan {
                cancel: None,
                arm: Some(arm),
            },
        }
    }

    /// Invalidates every outstanding timer; later ticks are all stale.
    pub fn teardown(&mut self) -> TimerPlan {
        self.torn_down = true;
        self.epoch = self.epoch.next();
        TimerPlan {
            cancel: self.live.take(),
            arm: None,
        }
    }

    fn transition(&mut self, state: &PlaybackState, reason: &'static str) -> TimerPlan {
        self.epoch = self.epoch.next();
        let cancel = self.live.take();
        let phase = Phase::of(state);
        let arm = (phase == Phase::Running && !self.torn_down).then(|| self.arm(state));
        debug!(
            reason,
            ?phase,
            epoch = self.epoch.get(),
            cancelled = cancel.is_some(),
            armed = arm.is_some(),
            "scheduler transition"
        );
        TimerPlan { cancel, arm }
    }

    fn arm(&mut self, state: &PlaybackState) -> TimerTicket {
        let ticket = TimerTicket {
            epoch: self.epoch,
            period: state.speed().period(self.time_unit),
        };
        self.live = Some(ticket);
        ticket
    }
}
