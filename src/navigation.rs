use std::num::NonZeroUsize;

use crate::error::{Error, Result};
use crate::events::{ChangeCause, IndexChanged};
use crate::playback::PlaybackState;

/// `(index + 1) mod len`. `index` must already be in range.
pub const fn wrap_next(index: usize, len: NonZeroUsize) -> usize {
    (index + 1) % len.get()
}

/// `(index - 1 + len) mod len`. `index` must already be in range.
pub const fn wrap_prev(index: usize, len: NonZeroUsize) -> usize {
    (index + len.get() - 1) % len.get()
}

/// Wraparound index arithmetic over a deck of fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationController {
    len: NonZeroUsize,
}

impl NavigationController {
    pub const fn new(len: NonZeroUsize) -> Self {
        Self { len }
    }

    pub const fn len(&self) -> NonZeroUsize {
        self.len
    }

    /// `(previous, next)` neighbours of `index`.
    pub const fn neighbours(&self, index: usize) -> (usize, usize) {
        (wrap_prev(index, self.len), wrap_next(index, self.len))
    }

    pub fn next(&self, state: &mut PlaybackState) -> IndexChanged {
        let target = wrap_next(state.current_index(), self.len);
        Self::move_to(state, target, ChangeCause::Next)
    }

    pub fn prev(&self, state: &mut PlaybackState) -> IndexChanged {
        let target = wrap_prev(state.current_index(), self.len);
        Self::move_to(state, target, ChangeCause::Prev)
    }

    pub fn jump_to(&self, state: &mut PlaybackState, index: usize) -> Result<IndexChanged> {
        if index >= self.len.get() {
            return Err(Error::OutOfRange {
                index,
                len: self.len.get(),
            });
        }
        Ok(Self::move_to(state, index, ChangeCause::Jump))
    }

    fn move_to(state: &mut PlaybackState, index: usize, cause: ChangeCause) -> IndexChanged {
        let previous = state.current_index();
        state.set_current_index(index);
        IndexChanged {
            index,
            previous,
            cause,
        }
    }
}
