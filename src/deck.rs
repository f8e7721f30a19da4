use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::navigation::{wrap_next, wrap_prev};

/// Identity of a slide asset. Prefetching is deduplicated on this value, so
/// two slides sharing an asset are only ever loaded once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AssetRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Slide {
    pub id: String,
    pub asset: AssetRef,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl Slide {
    pub fn new(
        id: impl Into<String>,
        asset: impl Into<AssetRef>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            asset: asset.into(),
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Immutable, non-empty, ordered collection of slides.
///
/// Cloning is cheap; all clones share the same slide storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deck {
    slides: Arc<[Slide]>,
    len: NonZeroUsize,
}

impl Deck {
    pub fn new(slides: impl Into<Vec<Slide>>) -> Result<Self> {
        let slides: Vec<Slide> = slides.into();
        let len = NonZeroUsize::new(slides.len()).ok_or(Error::InvalidDeck)?;
        Ok(Self {
            slides: slides.into(),
            len,
        })
    }

    pub fn len(&self) -> NonZeroUsize {
        self.len
    }

    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn get(&self, index: usize) -> Option<&Slide> {
        self.slides.get(index)
    }

    pub fn asset_at(&self, index: usize) -> Option<&AssetRef> {
        self.get(index).map(|slide| &slide.asset)
    }

    /// The slide at `index` plus its wraparound neighbours, as drawn by the
    /// page-curl renderer. Out-of-range indices wrap.
    pub fn view(&self, index: usize) -> PageView {
        let len = self.len.get();
        let index = index % len;
        PageView {
            index,
            len,
            previous: self.slides[wrap_prev(index, self.len)].clone(),
            current: self.slides[index].clone(),
            next: self.slides[wrap_next(index, self.len)].clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageView {
    pub index: usize,
    pub len: usize,
    pub previous: Slide,
    pub current: Slide,
    pub next: Slide,
}

impl PageView {
    /// One-based page counter, e.g. `3/7`.
    pub fn label(&self) -> String {
        format!("{}/{}", self.index + 1, self.len)
    }
}
