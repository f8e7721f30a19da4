use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;

use crate::deck::AssetRef;
use crate::error::{Error, Result};
use crate::prefetch::{AssetLoader, LoadedAsset};

// Decodes an image to RGBA8. Format is sniffed from content, not extension.
fn decode_rgba8(path: &Path) -> anyhow::Result<image::RgbaImage> {
    let img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    Ok(img.to_rgba8())
}

/// Loads slide assets from disk, relative to `root`, and keeps the decoded
/// pixels around for the renderer.
#[derive(Debug, Clone)]
pub struct ImageFileLoader {
    root: PathBuf,
    decoded: Arc<Mutex<HashMap<AssetRef, Arc<image::RgbaImage>>>>,
}

impl ImageFileLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            decoded: Arc::default(),
        }
    }

    pub fn resolve(&self, asset: &AssetRef) -> PathBuf {
        self.root.join(asset.as_str())
    }

    /// Pixels of an asset that finished prefetching.
    pub fn cached(&self, asset: &AssetRef) -> Option<Arc<image::RgbaImage>> {
        self.decoded.lock().ok()?.get(asset).cloned()
    }
}

impl AssetLoader for ImageFileLoader {
    fn load(&self, asset: &AssetRef) -> BoxFuture<'static, Result<LoadedAsset>> {
        let path = self.resolve(asset);
        let asset = asset.clone();
        let decoded = Arc::clone(&self.decoded);
        async move {
            let joined = tokio::task::spawn_blocking({
                let path = path.clone();
                move || decode_rgba8(&path)
            })
            .await;
            let rgba8 = match joined {
                Ok(Ok(rgba8)) => rgba8,
                Ok(Err(err)) => {
                    return Err(Error::AssetLoadFailed {
                        asset,
                        reason: format!("{}: {err:#}", path.display()),
                    });
                }
                Err(err) => {
                    return Err(Error::AssetLoadFailed {
                        asset,
                        reason: err.to_string(),
                    });
                }
            };
            let (width, height) = rgba8.dimensions();
            debug!("decoded (rgba8): {}", path.display());
            if let Ok(mut decoded) = decoded.lock() {
                decoded.insert(asset.clone(), Arc::new(rgba8));
            }
            Ok(LoadedAsset {
                asset,
                width,
                height,
            })
        }
        .boxed()
    }
}
