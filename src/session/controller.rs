//! Session controller: owns the conversation and the loaded model.
//!
//! All mutable state lives in a single actor task. UI requests arrive on a
//! bounded command queue; load progress and background results arrive on an
//! internal queue. The actor applies both one at a time, which gives:
//! 1. At most one loaded handle and at most one request in flight
//! 2. Load and generation tasks that never overlap in time
//! 3. Stale results (from before a model switch) detected by epoch and dropped
//!
//! Observers read a [`SessionSnapshot`] through a watch channel or follow
//! [`SessionEvent`]s on a broadcast channel.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::model::adapter::{AdapterError, ModelAdapter, ModelHandle, ProgressCallback};
use crate::model::variant::ModelVariant;
use crate::session::error::SessionError;
use crate::session::state::{SessionEvent, SessionSnapshot, SessionState, StaleKind};
use crate::session::turn::{ConversationStore, Turn, TurnId};
use crate::settings::Settings;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Requests from the presentation layer.
enum Command {
    SelectVariant { variant: ModelVariant, reply: Reply<()> },
    BeginLoad { reply: Reply<()> },
    Submit { text: String, reply: Reply<TurnId> },
}

/// Messages from background tasks, tagged with the epoch they started in.
enum Completion {
    LoadProgress {
        epoch: u64,
        fraction: f64,
    },
    Loaded {
        epoch: u64,
        variant: ModelVariant,
        result: Result<Arc<dyn ModelHandle>, AdapterError>,
    },
    Generated {
        epoch: u64,
        turn: TurnId,
        result: Result<String, AdapterError>,
    },
}

/// Cloneable handle to a running session.
///
/// The session stops once every handle has been dropped.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionController {
    /// Start the session actor on the current tokio runtime.
    ///
    /// The session starts `Unloaded`; call [`begin_load`](Self::begin_load)
    /// to load the variant selected in `settings`.
    pub fn spawn(adapter: Arc<dyn ModelAdapter>, settings: Settings, config: &SessionConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));

        let (actor, snapshots) = SessionActor::new(adapter, settings, completion_tx, event_tx.clone());
        tokio::spawn(actor.run(command_rx, completion_rx));

        Self {
            commands: command_tx,
            snapshots,
            events: event_tx,
        }
    }

    /// Switch to `variant`, clearing the conversation and loading the new model.
    ///
    /// Re-selecting the current variant while it is ready or already loading
    /// does nothing.
    pub async fn select_variant(&self, variant: ModelVariant) -> Result<(), SessionError> {
        self.request(|reply| Command::SelectVariant { variant, reply })
            .await
    }

    /// Load the selected variant. Valid from `Unloaded`, or from `Failed` to retry.
    pub async fn begin_load(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::BeginLoad { reply }).await
    }

    /// Append a user turn and start generating the reply.
    ///
    /// Returns once the user turn is in the transcript; the assistant turn
    /// shows up later in snapshots and events.
    pub async fn submit_user_text(&self, text: impl Into<String>) -> Result<TurnId, SessionError> {
        let text = text.into();
        self.request(|reply| Command::Submit { text, reply }).await
    }

    /// Current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Watch for state changes. Intermediate snapshots may be skipped.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Receive every change as an event.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

struct SessionActor {
    adapter: Arc<dyn ModelAdapter>,
    settings: Settings,

    state: SessionState,
    handle: Option<Arc<dyn ModelHandle>>,
    progress: f64,
    last_error: Option<SessionError>,

    store: ConversationStore,
    /// Shared copy of `store` handed out in snapshots; rebuilt on change.
    turns_view: Arc<[Turn]>,

    /// Bumped on every model switch; results from older epochs are dropped.
    epoch: u64,
    load_pending: bool,
    load_in_flight: bool,
    generation_in_flight: bool,

    completions: mpsc::UnboundedSender<Completion>,
    events: broadcast::Sender<SessionEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl SessionActor {
    fn new(
        adapter: Arc<dyn ModelAdapter>,
        settings: Settings,
        completions: mpsc::UnboundedSender<Completion>,
        events: broadcast::Sender<SessionEvent>,
    ) -> (Self, watch::Receiver<SessionSnapshot>) {
        let turns_view: Arc<[Turn]> = Arc::from(Vec::new());
        let (snapshots, rx) = watch::channel(SessionSnapshot {
            state: SessionState::Unloaded,
            selected: settings.selected(),
            loaded: None,
            progress: 0.0,
            turns: turns_view.clone(),
            last_error: None,
            epoch: 0,
        });

        let actor = Self {
            adapter,
            settings,
            state: SessionState::Unloaded,
            handle: None,
            progress: 0.0,
            last_error: None,
            store: ConversationStore::new(),
            turns_view,
            epoch: 0,
            load_pending: false,
            load_in_flight: false,
            generation_in_flight: false,
            completions,
            events,
            snapshots,
        };
        (actor, rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!(model = %self.settings.selected(), "Session started");

        loop {
            tokio::select! {
                biased;

                Some(done) = completions.recv() => {
                    self.on_completion(done);
                    self.publish();
                }
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => break,
                },
            }
        }

        info!("Session stopped");
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::SelectVariant { variant, reply } => {
                let result = self.select_variant(variant);
                self.publish();
                let _ = reply.send(result);
            }
            Command::BeginLoad { reply } => {
                let result = self.begin_load();
                self.publish();
                let _ = reply.send(result);
            }
            Command::Submit { text, reply } => {
                let result = self.submit(text);
                self.publish();
                let _ = reply.send(result);
            }
        }
    }

    fn select_variant(&mut self, variant: ModelVariant) -> Result<(), SessionError> {
        let unchanged = variant == self.settings.selected()
            && matches!(self.state, SessionState::Ready | SessionState::Loading { .. });
        if unchanged {
            debug!(model = %variant, status = %self.state.status(), "Variant already selected");
            return Ok(());
        }

        self.epoch += 1;
        info!(
            from = %self.settings.selected(),
            to = %variant,
            epoch = self.epoch,
            "Switching model"
        );

        // Any running generation keeps its own reference until it returns.
        self.handle = None;
        if !self.store.is_empty() {
            self.store.clear();
            self.turns_view = Arc::from(Vec::new());
            self.emit(SessionEvent::TranscriptCleared);
        }
        if let Err(e) = self.settings.set_selected(variant) {
            warn!(model = %variant, "Failed to persist model selection: {e}");
        }
        self.last_error = None;
        self.set_state(SessionState::Unloaded);
        self.request_load();
        Ok(())
    }

    fn begin_load(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Unloaded | SessionState::Failed { .. } => {
                self.request_load();
                Ok(())
            }
            _ => Err(SessionError::InvalidState {
                operation: "load",
                status: self.state.status(),
            }),
        }
    }

    fn submit(&mut self, text: String) -> Result<TurnId, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::InvalidInput);
        }
        let handle = match (&self.state, &self.handle) {
            (SessionState::Ready, Some(handle)) => handle.clone(),
            _ => {
                return Err(SessionError::InvalidState {
                    operation: "submit",
                    status: self.state.status(),
                })
            }
        };

        let history = self.turns_view.clone();
        let turn = Turn::user(text.clone());
        let turn_id = turn.id;
        self.append(turn);
        self.last_error = None;
        self.set_state(SessionState::Generating);

        self.generation_in_flight = true;
        let epoch = self.epoch;
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let result = guarded(
                async move { handle.generate(&history, &text).await },
                AdapterError::GenerationFailed,
            )
            .await;
            let _ = tx.send(Completion::Generated {
                epoch,
                turn: turn_id,
                result,
            });
        });

        Ok(turn_id)
    }

    fn request_load(&mut self) {
        self.load_pending = true;
        self.progress = 0.0;
        self.set_state(SessionState::Loading { progress: 0.0 });
        self.start_pending_load();
    }

    /// Start the pending load once no other background task is running.
    fn start_pending_load(&mut self) {
        if !self.load_pending || self.load_in_flight || self.generation_in_flight {
            return;
        }
        self.load_pending = false;
        self.load_in_flight = true;

        let variant = self.settings.selected();
        let epoch = self.epoch;
        let adapter = self.adapter.clone();
        let tx = self.completions.clone();
        let progress_tx = tx.clone();
        let progress: ProgressCallback = Arc::new(move |fraction| {
            let _ = progress_tx.send(Completion::LoadProgress { epoch, fraction });
        });

        info!(model = %variant, epoch, "Loading model");
        tokio::spawn(async move {
            let result = guarded(
                async move { adapter.load(variant, progress).await },
                AdapterError::ModelLoadFailed,
            )
            .await;
            let _ = tx.send(Completion::Loaded {
                epoch,
                variant,
                result,
            });
        });
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::LoadProgress { epoch, fraction } => self.on_progress(epoch, fraction),
            Completion::Loaded {
                epoch,
                variant,
                result,
            } => {
                self.load_in_flight = false;
                if epoch != self.epoch {
                    debug!(model = %variant, epoch, "Discarding stale load");
                    self.emit(SessionEvent::StaleResultDiscarded {
                        kind: StaleKind::Load,
                        epoch,
                    });
                } else {
                    self.on_loaded(variant, result);
                }
                self.start_pending_load();
            }
            Completion::Generated {
                epoch,
                turn,
                result,
            } => {
                self.generation_in_flight = false;
                if epoch != self.epoch {
                    debug!(%turn, epoch, "Discarding stale reply");
                    self.emit(SessionEvent::StaleResultDiscarded {
                        kind: StaleKind::Generation,
                        epoch,
                    });
                } else {
                    self.on_generated(turn, result);
                }
                self.start_pending_load();
            }
        }
    }

    fn on_progress(&mut self, epoch: u64, fraction: f64) {
        if epoch != self.epoch || !self.load_in_flight || fraction.is_nan() {
            return;
        }
        if !matches!(self.state, SessionState::Loading { .. }) {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction < self.progress {
            return;
        }
        self.progress = fraction;
        self.state = SessionState::Loading { progress: fraction };
        self.emit(SessionEvent::Progress(fraction));
    }

    fn on_loaded(&mut self, variant: ModelVariant, result: Result<Arc<dyn ModelHandle>, AdapterError>) {
        match result {
            Ok(handle) => {
                info!(model = %variant, "Model ready");
                self.handle = Some(handle);
                self.progress = 1.0;
                self.last_error = None;
                self.set_state(SessionState::Ready);
            }
            Err(e) => {
                warn!(model = %variant, "Model load failed: {e}");
                let reason = e.to_string();
                self.fail(SessionError::ModelUnavailable(reason.clone()));
                self.set_state(SessionState::Failed { reason });
            }
        }
    }

    fn on_generated(&mut self, turn: TurnId, result: Result<String, AdapterError>) {
        let result = result.and_then(|text| {
            if text.trim().is_empty() {
                Err(AdapterError::EmptyOutput)
            } else {
                Ok(text)
            }
        });

        match result {
            Ok(text) => {
                debug!(%turn, chars = text.len(), "Reply received");
                self.append(Turn::assistant(text));
            }
            Err(e) => {
                warn!(%turn, "Generation failed: {e}");
                self.fail(SessionError::GenerationFailed {
                    turn,
                    reason: e.to_string(),
                });
            }
        }
        self.set_state(SessionState::Ready);
    }

    fn append(&mut self, turn: Turn) {
        self.store.append(turn.clone());
        self.turns_view = Arc::from(self.store.all_turns());
        self.emit(SessionEvent::TurnAppended(turn));
    }

    fn fail(&mut self, error: SessionError) {
        self.last_error = Some(error.clone());
        self.emit(SessionEvent::Failed(error));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state.status(), to = %state.status(), "State changed");
        self.state = state.clone();
        self.emit(SessionEvent::StateChanged(state));
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.snapshots.send_replace(SessionSnapshot {
            state: self.state.clone(),
            selected: self.settings.selected(),
            loaded: self.handle.as_ref().map(|h| h.variant()),
            progress: self.progress,
            turns: self.turns_view.clone(),
            last_error: self.last_error.clone(),
            epoch: self.epoch,
        });
    }
}

/// Run an adapter call on its own task so a panic becomes an error result.
async fn guarded<T, F>(fut: F, on_panic: fn(String) -> AdapterError) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => Err(on_panic(format!("adapter task aborted: {e}"))),
    }
}
