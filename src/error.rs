use thiserror::Error;

use crate::deck::AssetRef;

/// Library error type for carousel operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A deck was constructed without any slides.
    #[error("deck must contain at least one slide")]
    InvalidDeck,

    /// `jump_to` targeted an index outside the deck.
    #[error("index {index} is out of range for a deck of {len} slides")]
    OutOfRange { index: usize, len: usize },

    /// The requested speed is not one of the supported flip speeds.
    #[error("unsupported speed {0}; expected one of 0.2, 0.4, 0.6 or 1")]
    InvalidSpeed(f32),

    /// A prefetch request failed. Only ever logged.
    #[error("failed to load asset {asset}: {reason}")]
    AssetLoadFailed { asset: AssetRef, reason: String },

    /// The engine task is gone; the command was not applied.
    #[error("carousel engine has stopped")]
    EngineStopped,

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
