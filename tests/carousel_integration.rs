use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use visual_journal::Error;
use visual_journal::deck::{AssetRef, Deck, Slide};
use visual_journal::events::ChangeCause;
use visual_journal::playback::Speed;
use visual_journal::prefetch::{AssetLoader, LoadedAsset};
use visual_journal::scheduler::Phase;
use visual_journal::tasks::carousel::{Carousel, CarouselOptions};
use visual_journal::visibility::{ManualVisibility, VisibilitySource};

#[derive(Default)]
struct RecordingLoader {
    requests: Mutex<Vec<AssetRef>>,
    failing: HashSet<String>,
}

impl RecordingLoader {
    fn failing_on(asset: &str) -> Self {
        Self {
            failing: HashSet::from([asset.to_string()]),
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<AssetRef> {
        self.requests.lock().unwrap().clone()
    }
}

impl AssetLoader for RecordingLoader {
    fn load(&self, asset: &AssetRef) -> BoxFuture<'static, visual_journal::Result<LoadedAsset>> {
        self.requests.lock().unwrap().push(asset.clone());
        let fail = self.failing.contains(asset.as_str());
        let asset = asset.clone();
        async move {
            if fail {
                Err(Error::AssetLoadFailed {
                    asset,
                    reason: "simulated failure".into(),
                })
            } else {
                Ok(LoadedAsset {
                    asset,
                    width: 1,
                    height: 1,
                })
            }
        }
        .boxed()
    }
}

fn deck(len: usize) -> Deck {
    Deck::new(
        (0..len)
            .map(|i| {
                let letter = char::from(b'a' + i as u8);
                Slide::new(
                    letter.to_string(),
                    format!("{letter}.png"),
                    letter.to_ascii_uppercase().to_string(),
                    "",
                )
            })
            .collect::<Vec<_>>(),
    )
    .unwrap()
}

fn options(speed: Speed) -> CarouselOptions {
    CarouselOptions {
        speed,
        time_unit: Duration::from_secs(1),
        ..CarouselOptions::default()
    }
}

struct Harness {
    carousel: Carousel,
    loader: Arc<RecordingLoader>,
    visibility: ManualVisibility,
    cancel: CancellationToken,
}

fn spawn_with(len: usize, speed: Speed, visible: bool, loader: RecordingLoader) -> Harness {
    let loader = Arc::new(loader);
    let visibility = ManualVisibility::new(visible);
    let cancel = CancellationToken::new();
    let source: Box<dyn VisibilitySource> = Box::new(visibility.clone());
    let carousel = Carousel::spawn(
        deck(len),
        options(speed),
        loader.clone(),
        Some(source),
        &cancel,
    );
    Harness {
        carousel,
        loader,
        visibility,
        cancel,
    }
}

fn spawn(len: usize, speed: Speed, visible: bool) -> Harness {
    spawn_with(len, speed, visible, RecordingLoader::default())
}

async fn wait_visible(carousel: &Carousel, visible: bool) {
    let mut watch = carousel.watch();
    tokio::time::timeout(
        Duration::from_secs(1),
        watch.wait_for(|snapshot| snapshot.visible == visible),
    )
    .await
    .expect("timeout waiting for visibility")
    .expect("engine stopped");
}

#[tokio::test]
async fn three_slide_deck_wraps_in_both_directions() {
    let h = spawn(3, Speed::Full, false);
    let c = &h.carousel;

    assert_eq!(c.next().await.unwrap().index, 1);
    assert_eq!(c.page_view().current.title, "B");
    assert_eq!(c.next().await.unwrap().index, 2);
    assert_eq!(c.page_view().current.title, "C");
    assert_eq!(c.next().await.unwrap().index, 0);
    assert_eq!(c.page_view().current.title, "A");
    assert_eq!(c.prev().await.unwrap().index, 2);
    assert_eq!(c.current_index(), 2);
    assert_eq!(c.page_label(), "3/3");
}

#[tokio::test]
async fn jump_out_of_range_is_reported_and_ignored() {
    let h = spawn(3, Speed::Full, false);
    let c = &h.carousel;
    c.jump_to(1).await.unwrap();

    let err = c.jump_to(5).await.unwrap_err();
    assert!(matches!(err, Error::OutOfRange { index: 5, len: 3 }));
    assert_eq!(c.current_index(), 1);

    assert_eq!(c.jump_to(2).await.unwrap().index, 2);
}

#[tokio::test]
async fn unsupported_speed_is_rejected_without_side_effects() {
    let h = spawn(3, Speed::Medium, true);
    let c = &h.carousel;
    wait_visible(c, true).await;
    let before = c.snapshot();

    let err = c.set_speed(0.37).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSpeed(_)));
    let after = c.snapshot();
    assert_eq!(after.speed, Speed::Medium);
    assert_eq!(after.epoch, before.epoch);
    assert_eq!(c.current_speed(), Speed::Medium);

    assert_eq!(c.set_speed(0.6).await.unwrap().speed, Speed::Fast);
}

#[tokio::test(start_paused = true)]
async fn advances_only_while_playing_and_visible() {
    let h = spawn(5, Speed::Full, false);
    let c = &h.carousel;
    assert_eq!(c.snapshot().phase, Phase::Armed);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(c.current_index(), 0, "hidden carousel must not advance");

    h.visibility.set(true);
    wait_visible(c, true).await;
    assert_eq!(c.snapshot().phase, Phase::Running);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(c.current_index(), 2);

    c.pause().await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(c.current_index(), 2, "paused carousel must not advance");

    c.play().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(c.current_index(), 3);

    h.visibility.set(false);
    wait_visible(c, false).await;
    assert!(c.is_playing());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(c.current_index(), 3, "scrolled-away carousel must not advance");
}

#[tokio::test(start_paused = true)]
async fn speed_change_discards_the_old_period() {
    let h = spawn(4, Speed::Full, true);
    let c = &h.carousel;
    wait_visible(c, true).await;

    tokio::time::sleep(Duration::from_millis(900)).await;
    let before = c.snapshot();
    let after = c.set_speed(0.2).await.unwrap();
    assert_eq!(after.epoch.get(), before.epoch.get() + 1);
    assert_eq!(after.phase, Phase::Running);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(c.current_index(), 0, "tick from the old period leaked");

    tokio::time::sleep(Duration::from_millis(4500)).await;
    assert_eq!(c.current_index(), 1);
}

#[tokio::test(start_paused = true)]
async fn visibility_flapping_does_not_double_advance() {
    let h = spawn(6, Speed::Full, true);
    let c = &h.carousel;
    wait_visible(c, true).await;

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(300)).await;
        h.visibility.set(false);
        wait_visible(c, false).await;
        h.visibility.set(true);
        wait_visible(c, true).await;
    }
    assert_eq!(c.current_index(), 0, "each flap restarts the period");

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(c.current_index(), 1);
}

#[tokio::test]
async fn manual_navigation_does_not_reset_the_timer() {
    let h = spawn(4, Speed::Full, true);
    let c = &h.carousel;
    wait_visible(c, true).await;
    let epoch = c.snapshot().epoch;
    c.next().await.unwrap();
    c.prev().await.unwrap();
    assert_eq!(c.snapshot().epoch, epoch);
}

#[tokio::test]
async fn toggle_play_flips_between_stopped_and_running() {
    let h = spawn(3, Speed::Full, true);
    let c = &h.carousel;
    wait_visible(c, true).await;

    let paused = c.toggle_play().await.unwrap();
    assert!(!paused.playing);
    assert_eq!(paused.phase, Phase::Stopped);

    let resumed = c.toggle_play().await.unwrap();
    assert!(resumed.playing);
    assert_eq!(resumed.phase, Phase::Running);
}

#[tokio::test]
async fn prefetch_requests_each_neighbour_once() {
    let h = spawn(3, Speed::Full, false);
    let c = &h.carousel;
    c.next().await.unwrap();
    c.next().await.unwrap();

    let requests = h.loader.requests();
    assert_eq!(
        requests,
        vec![
            AssetRef::from("b.png"),
            AssetRef::from("c.png"),
            AssetRef::from("a.png"),
        ]
    );

    c.next().await.unwrap();
    c.prev().await.unwrap();
    c.jump_to(1).await.unwrap();
    assert_eq!(h.loader.requests().len(), 3);
    assert_eq!(c.snapshot().prefetch.requested, 3);
}

#[tokio::test(start_paused = true)]
async fn failed_prefetch_never_stalls_playback() {
    let h = spawn_with(3, Speed::Full, true, RecordingLoader::failing_on("b.png"));
    let c = &h.carousel;
    wait_visible(c, true).await;

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(c.current_index(), 0, "three ticks wrap a three slide deck");

    let stats = c.snapshot().prefetch;
    assert_eq!(stats.requested, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.loaded, 2);
}

#[tokio::test]
async fn index_changes_are_broadcast_in_order() {
    let h = spawn(4, Speed::Full, false);
    let c = &h.carousel;
    let mut events = c.subscribe();

    c.next().await.unwrap();
    c.prev().await.unwrap();
    c.jump_to(3).await.unwrap();
    let _ = c.jump_to(9).await;

    let first = events.recv().await.unwrap();
    assert_eq!((first.previous, first.index, first.cause), (0, 1, ChangeCause::Next));
    let second = events.recv().await.unwrap();
    assert_eq!((second.index, second.cause), (0, ChangeCause::Prev));
    let third = events.recv().await.unwrap();
    assert_eq!((third.index, third.cause), (3, ChangeCause::Jump));
    assert!(events.try_recv().is_err(), "rejected jump must not notify");
}

#[tokio::test(start_paused = true)]
async fn auto_advance_is_broadcast() {
    let h = spawn(3, Speed::Full, true);
    let mut events = h.carousel.subscribe();
    let changed = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("expected an automatic page flip")
        .unwrap();
    assert_eq!(changed.index, 1);
    assert_eq!(changed.cause, ChangeCause::AutoAdvance);
}

#[tokio::test]
async fn missing_visibility_source_fails_open() {
    let cancel = CancellationToken::new();
    let carousel = Carousel::spawn(
        deck(2),
        options(Speed::Full),
        Arc::new(RecordingLoader::default()),
        None,
        &cancel,
    );
    wait_visible(&carousel, true).await;
    assert_eq!(carousel.snapshot().phase, Phase::Running);
}

#[tokio::test]
async fn shutdown_detaches_visibility_and_rejects_commands() {
    let h = spawn(3, Speed::Full, true);
    wait_visible(&h.carousel, true).await;
    assert_eq!(h.visibility.subscriber_count(), 1);

    let watch = h.carousel.watch();
    let before = watch.borrow().epoch;
    h.carousel.shutdown().await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(h.visibility.subscriber_count(), 0);
    assert!(watch.borrow().epoch > before, "teardown must invalidate timers");

    // Late report after teardown is harmless.
    h.visibility.set(false);
}

#[tokio::test]
async fn commands_after_parent_cancel_fail() {
    let h = spawn(3, Speed::Full, false);
    h.cancel.cancel();
    let err = h.carousel.next().await.unwrap_err();
    assert!(matches!(err, Error::EngineStopped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn accessors_agree_with_command_replies() {
    let h = spawn(5, Speed::Full, false);
    let c = &h.carousel;
    for _ in 0..500 {
        let reply = c.next().await.unwrap();
        assert_eq!(c.current_index(), reply.index);
        assert_eq!(c.page_view().index, reply.index);
    }

    let paused = c.pause().await.unwrap();
    assert!(!paused.playing);
    assert!(!c.is_playing());
    let sped = c.set_speed(0.6).await.unwrap();
    assert_eq!(sped.speed, Speed::Fast);
    assert_eq!(c.current_speed(), Speed::Fast);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_is_sent_after_accessors_update() {
    let h = spawn(4, Speed::Full, false);
    let c = &h.carousel;
    let mut events = c.subscribe();
    for _ in 0..200 {
        c.next().await.unwrap();
        let changed = events.recv().await.unwrap();
        let view = c.page_view();
        assert_eq!(view.index, changed.index);
        assert_eq!(c.deck().view(changed.index), view);
    }
}
