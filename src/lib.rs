pub mod config;
pub mod control;
pub mod deck;
pub mod error;
pub mod events;
pub mod navigation;
pub mod playback;
pub mod prefetch;
pub mod scheduler;
pub mod visibility;
pub mod tasks {
    pub mod carousel;
    pub mod loader;
}

pub use error::{Error, Result};
