//! Visibility gating.
//!
//! A [`VisibilitySource`] reports whether the carousel's host region is
//! sufficiently on screen. Sources push reports through a callback and hand
//! back a [`VisibilitySubscription`] that detaches them when dropped. When no
//! source is available, or the one given cannot run here, the monitor fails
//! open and reports the carousel as permanently visible.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fraction of the host region that must be in view.
pub const DEFAULT_THRESHOLD: f32 = 0.3;

pub type VisibilityCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Error)]
#[error("visibility detection unsupported: {0}")]
pub struct Unsupported(pub String);

pub trait VisibilitySource: Send {
    fn subscribe(&self, callback: VisibilityCallback)
    -> Result<VisibilitySubscription, Unsupported>;
}

/// Detaches its source when dropped.
#[must_use = "dropping the subscription detaches the visibility source"]
pub struct VisibilitySubscription {
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl VisibilitySubscription {
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// A subscription with nothing to release.
    pub fn detached() -> Self {
        Self { detach: None }
    }

    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for VisibilitySubscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for VisibilitySubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibilitySubscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Reports `true` once and never changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl AlwaysVisible {
    pub fn attach(callback: &VisibilityCallback) -> VisibilitySubscription {
        callback(true);
        VisibilitySubscription::detached()
    }
}

impl VisibilitySource for AlwaysVisible {
    fn subscribe(
        &self,
        callback: VisibilityCallback,
    ) -> Result<VisibilitySubscription, Unsupported> {
        Ok(Self::attach(&callback))
    }
}

/// Attached visibility source, or the always-visible fallback.
#[derive(Debug)]
pub struct VisibilityMonitor {
    subscription: VisibilitySubscription,
    fallback: bool,
}

impl VisibilityMonitor {
    pub fn attach(source: Option<&dyn VisibilitySource>, callback: VisibilityCallback) -> Self {
        let attempt = match source {
            Some(source) => source.subscribe(Arc::clone(&callback)),
            None => Err(Unsupported("no visibility source configured".into())),
        };
        match attempt {
            Ok(subscription) => Self {
                subscription,
                fallback: false,
            },
            Err(err) => {
                warn!(error = %err, "assuming carousel is always visible");
                Self {
                    subscription: AlwaysVisible::attach(&callback),
                    fallback: true,
                }
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn detach(self) {
        self.subscription.detach();
    }
}

/// Spawns a task forwarding every change of `rx` to `callback` until the
/// returned subscription is dropped.
fn forward_changes<T, F>(
    mut rx: watch::Receiver<T>,
    mut report: F,
) -> Result<VisibilitySubscription, Unsupported>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(&T) + Send + 'static,
{
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|_| Unsupported("no async runtime to drive visibility updates".into()))?;
    let initial = rx.borrow_and_update().clone();
    report(&initial);

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    runtime.spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = rx.borrow_and_update().clone();
                    report(&current);
                }
            }
        }
    });
    Ok(VisibilitySubscription::new(move || cancel.cancel()))
}

/// Visibility toggled from outside, e.g. by the control socket.
#[derive(Debug, Clone)]
pub struct ManualVisibility {
    tx: watch::Sender<bool>,
}

impl ManualVisibility {
    pub fn new(initial: bool) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, visible: bool) {
        self.tx.send_if_modified(|current| {
            let changed = *current != visible;
            *current = visible;
            changed
        });
    }

    pub fn get(&self) -> bool {
        *self.tx.borrow()
    }

    /// Number of attached subscribers still listening.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl VisibilitySource for ManualVisibility {
    fn subscribe(
        &self,
        callback: VisibilityCallback,
    ) -> Result<VisibilitySubscription, Unsupported> {
        forward_changes(self.tx.subscribe(), move |visible: &bool| callback(*visible))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        (right > left && bottom > top).then(|| Rect::new(left, top, right - left, bottom - top))
    }
}

/// Share of `region` that lies inside `viewport`, in `[0, 1]`.
pub fn visible_fraction(region: &Rect, viewport: &Rect) -> f32 {
    let area = region.area();
    if area <= 0.0 {
        return 0.0;
    }
    region
        .intersection(viewport)
        .map_or(0.0, |overlap| (overlap.area() / area).clamp(0.0, 1.0))
}

/// Turns geometry updates into threshold-crossing reports.
#[derive(Debug, Clone, Copy)]
pub struct IntersectionTracker {
    threshold: f32,
    last: Option<bool>,
}

impl IntersectionTracker {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            last: None,
        }
    }

    /// Returns the new visibility only when it differs from the last one
    /// reported. The first observation always reports.
    pub fn observe(&mut self, region: &Rect, viewport: &Rect) -> Option<bool> {
        let fraction = visible_fraction(region, viewport);
        let visible = fraction >= self.threshold;
        if self.last == Some(visible) {
            return None;
        }
        debug!(fraction, threshold = self.threshold, visible, "visibility threshold crossed");
        self.last = Some(visible);
        Some(visible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub region: Rect,
    pub viewport: Rect,
}

/// Viewport-intersection source fed with layout/scroll geometry.
#[derive(Debug, Clone)]
pub struct ViewportVisibility {
    threshold: f32,
    geometry: watch::Sender<Geometry>,
}

/// Producer half of a [`ViewportVisibility`].
#[derive(Debug, Clone)]
pub struct ViewportFeed {
    threshold: f32,
    geometry: watch::Sender<Geometry>,
}

impl ViewportFeed {
    /// Pushes new geometry and returns the visibility it implies.
    pub fn update(&self, region: Rect, viewport: Rect) -> bool {
        let visible = visible_fraction(&region, &viewport) >= self.threshold;
        self.geometry.send_replace(Geometry { region, viewport });
        visible
    }
}

impl ViewportVisibility {
    pub fn new(threshold: f32, initial: Geometry) -> (Self, ViewportFeed) {
        let (geometry, _) = watch::channel(initial);
        let feed = ViewportFeed {
            threshold,
            geometry: geometry.clone(),
        };
        (
            Self {
                threshold,
                geometry,
            },
            feed,
        )
    }
}

impl VisibilitySource for ViewportVisibility {
    fn subscribe(
        &self,
        callback: VisibilityCallback,
    ) -> Result<VisibilitySubscription, Unsupported> {
        let mut tracker = IntersectionTracker::new(self.threshold);
        forward_changes(self.geometry.subscribe(), move |geometry: &Geometry| {
            if let Some(visible) = tracker.observe(&geometry.region, &geometry.viewport) {
                callback(visible);
            }
        })
    }
}
