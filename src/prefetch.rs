use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::deck::{AssetRef, Deck};
use crate::error::Result;
use crate::navigation::NavigationController;

/// Something that can warm an asset ahead of display.
pub trait AssetLoader: Send + Sync + 'static {
    fn load(&self, asset: &AssetRef) -> BoxFuture<'static, Result<LoadedAsset>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedAsset {
    pub asset: AssetRef,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrefetchStats {
    pub requested: usize,
    pub loaded: usize,
    pub failed: usize,
}

/// Append-only set of asset identities that have already been requested.
#[derive(Debug, Default)]
pub struct PrefetchCache {
    requested: HashSet<AssetRef>,
    stats: PrefetchStats,
}

impl PrefetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the neighbours of `index` that were never requested before.
    ///
    /// Identities are recorded here, before any load is issued, so rapid
    /// index changes cannot request the same asset twice.
    pub fn claim_neighbours(
        &mut self,
        deck: &Deck,
        nav: &NavigationController,
        index: usize,
    ) -> Vec<AssetRef> {
        let (prev, next) = nav.neighbours(index);
        let mut claimed = Vec::with_capacity(2);
        for neighbour in [next, prev] {
            let Some(asset) = deck.asset_at(neighbour) else {
                continue;
            };
            if self.requested.insert(asset.clone()) {
                self.stats.requested += 1;
                claimed.push(asset.clone());
            }
        }
        claimed
    }

    pub fn contains(&self, asset: &AssetRef) -> bool {
        self.requested.contains(asset)
    }

    pub fn len(&self) -> usize {
        self.requested.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }

    pub fn stats(&self) -> PrefetchStats {
        self.stats
    }

    fn record(&mut self, outcome: &Result<LoadedAsset>) {
        match outcome {
            Ok(loaded) => {
                self.stats.loaded += 1;
                debug!(
                    asset = %loaded.asset,
                    width = loaded.width,
                    height = loaded.height,
                    "prefetched asset"
                );
            }
            Err(err) => {
                self.stats.failed += 1;
                warn!(error = %err, "prefetch failed; not retrying");
            }
        }
    }
}

/// Fire-and-forget driver for [`PrefetchCache`]: spawns loads and reaps
/// their outcomes without ever blocking navigation.
pub struct Prefetcher {
    cache: PrefetchCache,
    loader: Arc<dyn AssetLoader>,
    in_flight: JoinSet<Result<LoadedAsset>>,
}

impl Prefetcher {
    pub fn new(loader: Arc<dyn AssetLoader>) -> Self {
        Self {
            cache: PrefetchCache::new(),
            loader,
            in_flight: JoinSet::new(),
        }
    }

    pub fn stats(&self) -> PrefetchStats {
        self.cache.stats()
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn on_index_changed(&mut self, deck: &Deck, nav: &NavigationController, index: usize) {
        for asset in self.cache.claim_neighbours(deck, nav, index) {
            debug!(asset = %asset, index, "prefetch requested");
            self.in_flight.spawn(self.loader.load(&asset));
        }
    }

    /// Waits for the next load to finish. Resolves to `None` when nothing is
    /// in flight.
    pub async fn join_next(&mut self) -> Option<Result<Result<LoadedAsset>, JoinError>> {
        self.in_flight.join_next().await
    }

    pub fn record(&mut self, joined: Result<Result<LoadedAsset>, JoinError>) {
        match joined {
            Ok(outcome) => self.cache.record(&outcome),
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                self.cache.stats.failed += 1;
                warn!(error = %err, "prefetch task panicked");
            }
        }
    }

    /// Aborts everything still loading.
    pub fn shutdown(&mut self) {
        self.in_flight.abort_all();
    }
}
