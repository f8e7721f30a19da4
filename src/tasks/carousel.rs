use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::Configuration;
use crate::deck::{Deck, PageView};
use crate::error::{Error, Result};
use crate::events::{Command, CommandKind, IndexChanged, Snapshot, Tick};
use crate::navigation::NavigationController;
use crate::playback::{PlaybackState, Speed};
use crate::prefetch::{AssetLoader, Prefetcher};
use crate::scheduler::{AutoAdvanceScheduler, Phase, TickOutcome, TimerPlan};
use crate::visibility::{VisibilityCallback, VisibilityMonitor, VisibilitySource};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarouselOptions {
    /// Initial flip speed.
    pub speed: Speed,
    /// One page per `time_unit` at speed 1.
    pub time_unit: Duration,
    /// Capacity of the command channel.
    pub command_queue: usize,
    /// Capacity of the index-changed broadcast; slow subscribers lag.
    pub event_capacity: usize,
}

impl Default for CarouselOptions {
    fn default() -> Self {
        Self {
            speed: Speed::default(),
            time_unit: Duration::from_secs(1),
            command_queue: 16,
            event_capacity: 64,
        }
    }
}

impl From<&Configuration> for CarouselOptions {
    fn from(cfg: &Configuration) -> Self {
        Self {
            speed: cfg.speed,
            time_unit: cfg.time_unit,
            command_queue: cfg.command_queue,
            ..Self::default()
        }
    }
}

/// Handle to a running carousel engine.
///
/// All state lives in a single engine task; this handle only sends commands
/// and reads the latest published [`Snapshot`]. Dropping the handle tears the
/// engine down.
pub struct Carousel {
    deck: Deck,
    commands: Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    events: broadcast::Sender<IndexChanged>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Carousel {
    /// Spawns the engine on the current tokio runtime. `cancel` is the
    /// parent token; cancelling it tears the engine down as well.
    pub fn spawn(
        deck: Deck,
        options: CarouselOptions,
        loader: Arc<dyn AssetLoader>,
        visibility: Option<Box<dyn VisibilitySource>>,
        cancel: &CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let (commands_tx, commands_rx) = mpsc::channel(options.command_queue.max(1));
        let (ticks_tx, ticks_rx) = mpsc::channel(4);
        let (events, _) = broadcast::channel(options.event_capacity.max(1));

        let (engine, snapshot_rx) =
            Engine::new(deck.clone(), options, loader, ticks_tx, events.clone());
        let task = tokio::spawn(run(
            engine,
            commands_rx,
            ticks_rx,
            visibility,
            cancel.clone(),
        ));

        Self {
            deck,
            commands: commands_tx,
            snapshot: snapshot_rx,
            events,
            cancel,
            task: Some(task),
        }
    }

    pub async fn play(&self) -> Result<Snapshot> {
        self.request(CommandKind::Play).await
    }

    pub async fn pause(&self) -> Result<Snapshot> {
        self.request(CommandKind::Pause).await
    }

    /// Play/pause toggle as offered by the single transport button.
    pub async fn toggle_play(&self) -> Result<Snapshot> {
        self.request(CommandKind::TogglePlay).await
    }

    pub async fn next(&self) -> Result<Snapshot> {
        self.request(CommandKind::Next).await
    }

    pub async fn prev(&self) -> Result<Snapshot> {
        self.request(CommandKind::Prev).await
    }

    pub async fn jump_to(&self, index: usize) -> Result<Snapshot> {
        self.request(CommandKind::JumpTo(index)).await
    }

    pub async fn set_speed(&self, speed: f32) -> Result<Snapshot> {
        self.request(CommandKind::SetSpeed(speed)).await
    }

    async fn request(&self, kind: CommandKind) -> Result<Snapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command { kind, reply })
            .await
            .map_err(|_| Error::EngineStopped)?;
        response.await.map_err(|_| Error::EngineStopped)?
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.snapshot.borrow()
    }

    pub fn current_index(&self) -> usize {
        self.snapshot().index
    }

    pub fn is_playing(&self) -> bool {
        self.snapshot().playing
    }

    pub fn current_speed(&self) -> Speed {
        self.snapshot().speed
    }

    pub fn is_visible(&self) -> bool {
        self.snapshot().visible
    }

    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    /// Previous, current and next slide for the page-curl renderer.
    pub fn page_view(&self) -> PageView {
        self.deck.view(self.current_index())
    }

    pub fn page_label(&self) -> String {
        self.page_view().label()
    }

    /// Index-changed notifications, in mutation order.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexChanged> {
        self.events.subscribe()
    }

    /// Snapshot stream; changes after every handled event.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Requests teardown without waiting for it.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Tears the engine down and waits until it has released its timer and
    /// visibility subscription.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("carousel engine join error: {err}");
            }
        }
    }
}

impl Drop for Carousel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Owns every piece of mutable carousel state. Only touched from [`run`].
struct Engine {
    deck: Deck,
    nav: NavigationController,
    state: PlaybackState,
    scheduler: AutoAdvanceScheduler,
    prefetch: Prefetcher,
    timer: Option<AbortHandle>,
    ticks: Sender<Tick>,
    events: broadcast::Sender<IndexChanged>,
    published: watch::Sender<Snapshot>,
}

impl Engine {
    fn new(
        deck: Deck,
        options: CarouselOptions,
        loader: Arc<dyn AssetLoader>,
        ticks: Sender<Tick>,
        events: broadcast::Sender<IndexChanged>,
    ) -> (Self, watch::Receiver<Snapshot>) {
        let state = PlaybackState::new(options.speed);
        let scheduler = AutoAdvanceScheduler::new(options.time_unit);
        let prefetch = Prefetcher::new(loader);
        let (published, snapshot) =
            watch::channel(describe(&deck, &state, &scheduler, &prefetch));
        let engine = Self {
            nav: NavigationController::new(deck.len()),
            deck,
            state,
            scheduler,
            prefetch,
            timer: None,
            ticks,
            events,
            published,
        };
        (engine, snapshot)
    }

    fn snapshot(&self) -> Snapshot {
        describe(&self.deck, &self.state, &self.scheduler, &self.prefetch)
    }

    /// Accessors on the handle read this; it must be current before any
    /// reply or notification leaves the engine.
    fn publish(&self) {
        self.published.send_replace(self.snapshot());
    }

    fn handle(&mut self, Command { kind, reply }: Command) {
        let outcome = match kind {
            CommandKind::Play => {
                let plan = self.scheduler.play(&mut self.state);
                self.apply(plan);
                Ok(())
            }
            CommandKind::Pause => {
                let plan = self.scheduler.pause(&mut self.state);
                self.apply(plan);
                Ok(())
            }
            CommandKind::TogglePlay => {
                let plan = if self.state.is_playing() {
                    self.scheduler.pause(&mut self.state)
                } else {
                    self.scheduler.play(&mut self.state)
                };
                self.apply(plan);
                Ok(())
            }
            CommandKind::Next => {
                let changed = self.nav.next(&mut self.state);
                self.index_changed(changed);
                Ok(())
            }
            CommandKind::Prev => {
                let changed = self.nav.prev(&mut self.state);
                self.index_changed(changed);
                Ok(())
            }
            CommandKind::JumpTo(index) => self
                .nav
                .jump_to(&mut self.state, index)
                .map(|changed| self.index_changed(changed)),
            CommandKind::SetSpeed(raw) => Speed::try_from(raw).map(|speed| {
                let plan = self.scheduler.set_speed(&mut self.state, speed);
                self.apply(plan);
            }),
        };
        if let Err(err) = &outcome {
            debug!(command = ?kind, error = %err, "command rejected");
        }
        self.publish();
        // The caller may have given up waiting; that is not an error.
        let _ = reply.send(outcome.map(|()| self.snapshot()));
    }

    fn set_visible(&mut self, visible: bool) {
        if self.state.is_visible() == visible {
            return;
        }
        let plan = self.scheduler.set_visible(&mut self.state, visible);
        debug!(visible, phase = ?Phase::of(&self.state), "visibility changed");
        self.apply(plan);
    }

    fn on_tick(&mut self, tick: Tick) {
        match self.scheduler.on_tick(tick.epoch, &mut self.state, &self.nav) {
            TickOutcome::Advanced { changed, plan } => {
                self.apply(plan);
                self.index_changed(changed);
            }
            TickOutcome::Stale => {}
        }
    }

    /// Prefetch runs before other subscribers see the change.
    fn index_changed(&mut self, changed: IndexChanged) {
        debug!(
            index = changed.index,
            previous = changed.previous,
            cause = ?changed.cause,
            "index changed"
        );
        self.prefetch
            .on_index_changed(&self.deck, &self.nav, changed.index);
        self.publish();
        // No receivers is fine; the renderer may not have subscribed yet.
        let _ = self.events.send(changed);
    }

    fn apply(&mut self, plan: TimerPlan) {
        if let Some(cancelled) = plan.cancel {
            if let Some(timer) = self.timer.take() {
                timer.abort();
            }
            trace!(epoch = cancelled.epoch.get(), "timer cancelled");
        }
        if let Some(ticket) = plan.arm {
            if let Some(stray) = self.timer.take() {
                stray.abort();
            }
            let ticks = self.ticks.clone();
            let handle = tokio::spawn(async move {
                sleep(ticket.period).await;
                // Engine gone means teardown already happened.
                let _ = ticks.send(Tick { epoch: ticket.epoch }).await;
            });
            trace!(
                epoch = ticket.epoch.get(),
                period = %humantime::format_duration(ticket.period),
                "timer armed"
            );
            self.timer = Some(handle.abort_handle());
        }
    }

    fn teardown(&mut self) {
        let plan = self.scheduler.teardown();
        self.apply(plan);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.prefetch.shutdown();
    }
}

fn describe(
    deck: &Deck,
    state: &PlaybackState,
    scheduler: &AutoAdvanceScheduler,
    prefetch: &Prefetcher,
) -> Snapshot {
    Snapshot {
        index: state.current_index(),
        len: deck.len().get(),
        playing: state.is_playing(),
        speed: state.speed(),
        visible: state.is_visible(),
        phase: Phase::of(state),
        epoch: scheduler.epoch(),
        prefetch: prefetch.stats(),
    }
}

fn visibility_callback(tx: mpsc::UnboundedSender<bool>) -> VisibilityCallback {
    Arc::new(move |visible| {
        if tx.send(visible).is_err() {
            trace!(visible, "visibility report after teardown discarded");
        }
    })
}

async fn run(
    mut engine: Engine,
    mut commands: Receiver<Command>,
    mut ticks: Receiver<Tick>,
    visibility: Option<Box<dyn VisibilitySource>>,
    cancel: CancellationToken,
) {
    let (visibility_tx, mut visibility_rx): (_, UnboundedReceiver<bool>) =
        mpsc::unbounded_channel();
    let monitor = VisibilityMonitor::attach(visibility.as_deref(), visibility_callback(visibility_tx));
    info!(
        slides = engine.deck.len().get(),
        speed = %engine.state.speed(),
        fallback_visibility = monitor.is_fallback(),
        "carousel started"
    );

    engine
        .prefetch
        .on_index_changed(&engine.deck, &engine.nav, engine.state.current_index());
    engine.publish();

    loop {
        select! {
            biased;

            _ = cancel.cancelled() => break,

            maybe_cmd = commands.recv() => match maybe_cmd {
                Some(cmd) => engine.handle(cmd),
                // Every handle is gone.
                None => break,
            },

            Some(visible) = visibility_rx.recv() => engine.set_visible(visible),

            Some(tick) = ticks.recv() => engine.on_tick(tick),

            Some(joined) = engine.prefetch.join_next(), if engine.prefetch.has_in_flight() => {
                engine.prefetch.record(joined);
            }
        }
        engine.publish();
    }

    engine.teardown();
    monitor.detach();
    engine.publish();
    info!(index = engine.state.current_index(), "carousel stopped");
}
