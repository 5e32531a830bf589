use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::draw::{DrawEngine, SpinStep};
use crate::error::{ControlError, StoreResult};
use crate::identity;
use crate::motion;
use crate::reconcile::reconcile;
use crate::rng::Rng;
use crate::scheduler::{spawn_periodic, TaskHandle};
use crate::server_utils::{normalize_sprite, sanitize_name, sanitize_photo_url};
use crate::store::RosterStore;
use crate::types::{
    AnimatedEntity, AttendeePatch, AttendeeRecord, CommitStatus, EntityView, MotionState,
    NewAttendee, Point, SceneView, SyncMode,
};

type Reply<T> = oneshot::Sender<Result<T, ControlError>>;

#[derive(Debug)]
pub struct Registration {
    pub name: String,
    pub sprite: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug)]
enum Command {
    Refresh,
    Register {
        registration: Registration,
        reply: Reply<String>,
    },
    Rename {
        id: String,
        name: String,
        reply: Reply<()>,
    },
    Remove {
        id: String,
        reply: Reply<()>,
    },
    StartDraw {
        reply: Reply<()>,
    },
    DismissDraw {
        reply: oneshot::Sender<bool>,
    },
    ResetWinners {
        reply: Reply<()>,
    },
    Hold {
        id: String,
        reply: Reply<()>,
    },
    MoveHeld {
        id: String,
        to: Point,
        reply: Reply<()>,
    },
    Release {
        id: String,
        reply: Reply<()>,
    },
    Shutdown,
}

#[derive(Debug)]
enum Event {
    Command(Command),
    SimTick,
    PollTick,
    RemoteChanged,
    SpinTick,
    Fetched(StoreResult<Vec<AttendeeRecord>>),
    Mutated,
    WinnerCommitted {
        session_id: u64,
        winner_id: String,
        result: StoreResult<()>,
    },
}

/// Cheap cloneable front door to a running controller.
#[derive(Clone, Debug)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<Event>,
    scene: watch::Receiver<SceneView>,
}

impl ControllerHandle {
    pub fn scene(&self) -> watch::Receiver<SceneView> {
        self.scene.clone()
    }

    pub fn current_scene(&self) -> SceneView {
        self.scene.borrow().clone()
    }

    pub fn refresh(&self) {
        let _ = self.events.send(Event::Command(Command::Refresh));
    }

    pub async fn register(&self, registration: Registration) -> Result<String, ControlError> {
        self.request(|reply| Command::Register {
            registration,
            reply,
        })
        .await
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<(), ControlError> {
        let (id, name) = (id.to_string(), name.to_string());
        self.request(|reply| Command::Rename { id, name, reply })
            .await
    }

    pub async fn remove(&self, id: &str) -> Result<(), ControlError> {
        let id = id.to_string();
        self.request(|reply| Command::Remove { id, reply }).await
    }

    pub async fn start_draw(&self) -> Result<(), ControlError> {
        self.request(|reply| Command::StartDraw { reply }).await
    }

    pub async fn dismiss_draw(&self) -> Result<bool, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::DismissDraw { reply })?;
        rx.await.map_err(|_| ControlError::Stopped)
    }

    pub async fn reset_winners(&self) -> Result<(), ControlError> {
        self.request(|reply| Command::ResetWinners { reply }).await
    }

    pub async fn hold(&self, id: &str) -> Result<(), ControlError> {
        let id = id.to_string();
        self.request(|reply| Command::Hold { id, reply }).await
    }

    pub async fn move_held(&self, id: &str, x: f32, y: f32) -> Result<(), ControlError> {
        let id = id.to_string();
        self.request(|reply| Command::MoveHeld {
            id,
            to: Point::new(x, y),
            reply,
        })
        .await
    }

    pub async fn release(&self, id: &str) -> Result<(), ControlError> {
        let id = id.to_string();
        self.request(|reply| Command::Release { id, reply }).await
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(Event::Command(Command::Shutdown));
    }

    fn send(&self, command: Command) -> Result<(), ControlError> {
        self.events
            .send(Event::Command(command))
            .map_err(|_| ControlError::Stopped)
    }

    async fn request<T, F>(&self, build: F) -> Result<T, ControlError>
    where
        F: FnOnce(Reply<T>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply))?;
        rx.await.map_err(|_| ControlError::Stopped)?
    }
}

/// Owns the animated roster, the draw engine and every timer. All state
/// changes happen on this one task; timers, push signals and network calls
/// only ever post events back to it.
pub struct Controller<S: RosterStore> {
    store: S,
    config: EngineConfig,
    rng: Rng,
    entities: Vec<AnimatedEntity>,
    draw: DrawEngine,
    tick: u64,
    sync_mode: SyncMode,
    // Only handles keep the channel open, so the loop ends once the last
    // handle is gone.
    events_tx: mpsc::WeakUnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    scene_tx: watch::Sender<SceneView>,
    fetch_task: Option<TaskHandle>,
    refetch_requested: bool,
    last_synced_at: Option<DateTime<Utc>>,
    last_fetch_error: Option<String>,
    spin_task: Option<TaskHandle>,
    background: Vec<TaskHandle>,
}

impl<S: RosterStore> Controller<S> {
    pub fn new(store: S, config: EngineConfig) -> (Self, ControllerHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sync_mode = store.sync_mode();
        let (scene_tx, scene_rx) = watch::channel(SceneView::empty(sync_mode));
        let rng = config.seed.map(Rng::new).unwrap_or_else(Rng::from_entropy);
        let draw = DrawEngine::new(config.spin_cycles);
        let handle = ControllerHandle {
            events: events_tx.clone(),
            scene: scene_rx,
        };
        let events_tx = events_tx.downgrade();
        let controller = Self {
            store,
            config,
            rng,
            entities: Vec::new(),
            draw,
            tick: 0,
            sync_mode,
            events_tx,
            events_rx,
            scene_tx,
            fetch_task: None,
            refetch_requested: false,
            last_synced_at: None,
            last_fetch_error: None,
            spin_task: None,
            background: Vec::new(),
        };
        (controller, handle)
    }

    pub fn spawn(store: S, config: EngineConfig) -> (ControllerHandle, JoinHandle<()>) {
        let (controller, handle) = Self::new(store, config);
        (handle, tokio::spawn(controller.run()))
    }

    pub async fn run(mut self) {
        self.start_background();
        self.request_fetch();
        info!(sync = ?self.sync_mode, "roster controller started");

        while let Some(event) = self.events_rx.recv().await {
            if matches!(event, Event::Command(Command::Shutdown)) {
                break;
            }
            self.handle_event(event);
        }

        // Dropping the handles cancels every timer and the push subscription.
        self.spin_task = None;
        self.fetch_task = None;
        self.background.clear();
        info!("roster controller stopped");
    }

    fn start_background(&mut self) {
        let tx = self.events_tx.clone();
        self.background.push(spawn_periodic(self.config.tick, None, move || {
            post(&tx, Event::SimTick)
        }));

        match self.store.subscribe() {
            Some(mut feed) => {
                let tx = self.events_tx.clone();
                self.background.push(TaskHandle::spawn(async move {
                    while feed.changed().await {
                        if !post(&tx, Event::RemoteChanged) {
                            break;
                        }
                    }
                }));
            }
            None => {
                let tx = self.events_tx.clone();
                self.background.push(spawn_periodic(
                    self.config.poll_interval,
                    None,
                    move || post(&tx, Event::PollTick),
                ));
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::SimTick => {
                self.tick += 1;
                self.entities = motion::step(&self.entities, &self.config.scene, &mut self.rng);
            }
            Event::PollTick | Event::RemoteChanged | Event::Mutated => self.request_fetch(),
            Event::SpinTick => self.on_spin_tick(),
            Event::Fetched(result) => self.on_fetched(result),
            Event::WinnerCommitted {
                session_id,
                winner_id,
                result,
            } => self.on_winner_committed(session_id, winner_id, result),
            Event::Command(command) => self.handle_command(command),
        }
        self.publish();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Refresh => self.request_fetch(),
            Command::Register {
                registration,
                reply,
            } => {
                let attendee = self.new_attendee(registration);
                let store = self.store.clone();
                self.spawn_mutation(reply, async move { store.insert(attendee).await });
            }
            Command::Rename { id, name, reply } => {
                let store = self.store.clone();
                let patch = AttendeePatch::rename(sanitize_name(&name));
                self.spawn_mutation(reply, async move { store.update(&id, patch).await });
            }
            Command::Remove { id, reply } => {
                let store = self.store.clone();
                self.spawn_mutation(reply, async move { store.remove(&id).await });
            }
            Command::StartDraw { reply } => {
                let _ = reply.send(self.start_draw());
            }
            Command::DismissDraw { reply } => {
                let _ = reply.send(self.draw.dismiss());
            }
            Command::ResetWinners { reply } => {
                if !self.draw.can_reset_winners() {
                    debug!("winner reset rejected while spinning");
                    let _ = reply.send(Err(ControlError::DrawInProgress));
                    return;
                }
                let store = self.store.clone();
                self.spawn_mutation(reply, async move { store.reset_all().await });
            }
            Command::Hold { id, reply } => {
                let _ = reply.send(self.set_held(&id, true));
            }
            Command::Release { id, reply } => {
                let _ = reply.send(self.set_held(&id, false));
            }
            Command::MoveHeld { id, to, reply } => {
                let _ = reply.send(self.move_held(&id, to));
            }
            Command::Shutdown => {}
        }
    }

    fn new_attendee(&self, registration: Registration) -> NewAttendee {
        let sprite = normalize_sprite(
            registration.sprite.as_deref(),
            &self.config.fallback_sprite,
        );
        let photo_url = registration
            .photo_url
            .as_deref()
            .and_then(sanitize_photo_url);
        NewAttendee {
            name: sanitize_name(&registration.name),
            packed_identity: identity::encode(&sprite, photo_url.as_deref()),
            is_winner: false,
        }
    }

    /// Runs a remote mutation off the loop. Local state is only refreshed
    /// from the store once the mutation succeeded.
    fn spawn_mutation<T, F>(&self, reply: Reply<T>, mutation: F)
    where
        T: Send + 'static,
        F: std::future::Future<Output = StoreResult<T>> + Send + 'static,
    {
        let tx = self.events_tx.upgrade();
        tokio::spawn(async move {
            let result = mutation.await;
            match &result {
                Ok(_) => {
                    if let Some(tx) = tx {
                        let _ = tx.send(Event::Mutated);
                    }
                }
                Err(error) => warn!(%error, "roster mutation failed"),
            }
            let _ = reply.send(result.map_err(ControlError::from));
        });
    }

    fn request_fetch(&mut self) {
        if self.fetch_task.is_some() {
            self.refetch_requested = true;
            return;
        }
        let Some(tx) = self.events_tx.upgrade() else {
            return;
        };
        let store = self.store.clone();
        self.fetch_task = Some(TaskHandle::spawn(async move {
            let result = store.list_all().await;
            let _ = tx.send(Event::Fetched(result));
        }));
    }

    fn on_fetched(&mut self, result: StoreResult<Vec<AttendeeRecord>>) {
        self.fetch_task = None;
        match result {
            Ok(snapshot) => {
                self.entities = reconcile(
                    &self.entities,
                    &snapshot,
                    &self.config.scene,
                    &self.config.fallback_sprite,
                    &mut self.rng,
                );
                self.last_synced_at = Some(Utc::now());
                self.last_fetch_error = None;
                debug!(count = self.entities.len(), "roster reconciled");
            }
            Err(error) => {
                warn!(%error, "roster fetch failed; keeping last known roster");
                self.last_fetch_error = Some(error.to_string());
            }
        }
        if std::mem::take(&mut self.refetch_requested) {
            self.request_fetch();
        }
    }

    fn start_draw(&mut self) -> Result<(), ControlError> {
        let roster: Vec<String> = self.entities.iter().map(|entity| entity.id.clone()).collect();
        let session_id = self.draw.start(roster).map_err(|rejected| {
            debug!(%rejected, "draw start rejected");
            rejected
        })?;
        let tx = self.events_tx.clone();
        self.spin_task = Some(spawn_periodic(
            self.config.spin_interval,
            Some(self.draw.ticks_per_draw()),
            move || post(&tx, Event::SpinTick),
        ));
        info!(session_id, roster = self.entities.len(), "draw started");
        Ok(())
    }

    fn on_spin_tick(&mut self) {
        let Some(step) = self.draw.spin(&mut self.rng) else {
            return;
        };
        let SpinStep::Revealed {
            session_id,
            winner_id,
        } = step
        else {
            return;
        };

        self.spin_task = None;
        info!(session_id, %winner_id, "winner revealed");
        let Some(tx) = self.events_tx.upgrade() else {
            return;
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            let result = store.update(&winner_id, AttendeePatch::winner()).await;
            let _ = tx.send(Event::WinnerCommitted {
                session_id,
                winner_id,
                result,
            });
        });
    }

    fn on_winner_committed(&mut self, session_id: u64, winner_id: String, result: StoreResult<()>) {
        match result {
            Ok(()) => {
                self.draw.record_commit(session_id, CommitStatus::Committed);
                self.request_fetch();
            }
            Err(error) => {
                // The reveal stands; the operator sees the failure and decides.
                warn!(session_id, %winner_id, %error, "winner commit failed");
                self.draw
                    .record_commit(session_id, CommitStatus::Failed(error.to_string()));
            }
        }
    }

    fn set_held(&mut self, id: &str, held: bool) -> Result<(), ControlError> {
        self.replace_motion(id, |motion| motion.held = held)
    }

    fn move_held(&mut self, id: &str, to: Point) -> Result<(), ControlError> {
        let target = self
            .entities
            .iter()
            .find(|entity| entity.id == id)
            .ok_or_else(|| ControlError::UnknownAttendee(id.to_string()))?;
        if !target.motion.held {
            return Ok(());
        }
        let bounds = self.config.scene.bounds;
        self.replace_motion(id, |motion| motion.position = bounds.clamp(to))
    }

    fn replace_motion<F>(&mut self, id: &str, change: F) -> Result<(), ControlError>
    where
        F: Fn(&mut MotionState),
    {
        if !self.entities.iter().any(|entity| entity.id == id) {
            return Err(ControlError::UnknownAttendee(id.to_string()));
        }
        self.entities = self
            .entities
            .iter()
            .map(|entity| {
                let mut next = entity.clone();
                if next.id == id {
                    change(&mut next.motion);
                }
                next
            })
            .collect();
        Ok(())
    }

    fn publish(&self) {
        self.scene_tx.send_replace(SceneView {
            tick: self.tick,
            sync: self.sync_mode,
            last_synced_at: self.last_synced_at,
            last_fetch_error: self.last_fetch_error.clone(),
            entities: self.entities.iter().map(EntityView::from).collect(),
            draw: self.draw.view(),
        });
    }
}

/// Timer-side send: false once the controller or every handle is gone.
fn post(tx: &mpsc::WeakUnboundedSender<Event>, event: Event) -> bool {
    tx.upgrade().is_some_and(|tx| tx.send(event).is_ok())
}
