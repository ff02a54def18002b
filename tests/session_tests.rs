//! Integration tests for the session controller.
//!
//! A scripted adapter hands every load and generate call to the test, which
//! decides when and how each one resolves.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;

use mobile_chat::config::SessionConfig;
use mobile_chat::model::adapter::{AdapterError, ModelAdapter, ModelHandle, ProgressCallback};
use mobile_chat::model::variant::ModelVariant;
use mobile_chat::session::{
    Author, SessionController, SessionError, SessionEvent, SessionSnapshot, SessionState,
    SessionStatus, StaleKind, Turn,
};
use mobile_chat::settings::{MemoryStore, Settings, SettingsStore, SELECTED_MODEL_KEY};

const TIMEOUT: Duration = Duration::from_secs(5);

struct PendingLoad {
    variant: ModelVariant,
    progress: ProgressCallback,
    reply: oneshot::Sender<Result<(), AdapterError>>,
}

impl PendingLoad {
    fn succeed(self) {
        let _ = self.reply.send(Ok(()));
    }

    fn fail(self, error: AdapterError) {
        let _ = self.reply.send(Err(error));
    }
}

struct PendingGenerate {
    history: Vec<Turn>,
    text: String,
    reply: oneshot::Sender<Result<String, AdapterError>>,
}

impl PendingGenerate {
    fn answer(self, text: &str) {
        let _ = self.reply.send(Ok(text.to_string()));
    }

    fn fail(self, error: AdapterError) {
        let _ = self.reply.send(Err(error));
    }
}

struct ScriptedAdapter {
    loads: mpsc::UnboundedSender<PendingLoad>,
    generations: mpsc::UnboundedSender<PendingGenerate>,
    load_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    async fn load(
        &self,
        variant: ModelVariant,
        progress: ProgressCallback,
    ) -> Result<Arc<dyn ModelHandle>, AdapterError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let _ = self.loads.send(PendingLoad {
            variant,
            progress,
            reply: tx,
        });
        rx.await
            .map_err(|_| AdapterError::ModelLoadFailed("test dropped load".into()))??;
        Ok(Arc::new(ScriptedHandle {
            variant,
            generations: self.generations.clone(),
        }))
    }
}

struct ScriptedHandle {
    variant: ModelVariant,
    generations: mpsc::UnboundedSender<PendingGenerate>,
}

#[async_trait]
impl ModelHandle for ScriptedHandle {
    fn variant(&self) -> ModelVariant {
        self.variant
    }

    async fn generate(&self, history: &[Turn], user_text: &str) -> Result<String, AdapterError> {
        let (tx, rx) = oneshot::channel();
        let _ = self.generations.send(PendingGenerate {
            history: history.to_vec(),
            text: user_text.to_string(),
            reply: tx,
        });
        rx.await
            .map_err(|_| AdapterError::GenerationFailed("test dropped generation".into()))?
    }
}

struct Harness {
    controller: SessionController,
    loads: mpsc::UnboundedReceiver<PendingLoad>,
    generations: mpsc::UnboundedReceiver<PendingGenerate>,
    load_calls: Arc<AtomicUsize>,
    store: Arc<MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    fn with_store(store: Arc<MemoryStore>) -> Self {
        let (load_tx, loads) = mpsc::unbounded_channel();
        let (gen_tx, generations) = mpsc::unbounded_channel();
        let load_calls = Arc::new(AtomicUsize::new(0));
        let adapter = Arc::new(ScriptedAdapter {
            loads: load_tx,
            generations: gen_tx,
            load_calls: load_calls.clone(),
        });
        let settings = Settings::load(store.clone());
        let controller = SessionController::spawn(adapter, settings, &SessionConfig::default());
        Self {
            controller,
            loads,
            generations,
            load_calls,
            store,
        }
    }

    /// A session with the default variant loaded and ready.
    async fn ready() -> Self {
        let mut h = Self::new();
        h.controller.begin_load().await.unwrap();
        h.next_load().await.succeed();
        h.wait_for(|s| s.is_ready()).await;
        h
    }

    async fn next_load(&mut self) -> PendingLoad {
        timeout(TIMEOUT, self.loads.recv())
            .await
            .expect("no load requested")
            .expect("adapter dropped")
    }

    async fn next_generation(&mut self) -> PendingGenerate {
        timeout(TIMEOUT, self.generations.recv())
            .await
            .expect("no generation requested")
            .expect("adapter dropped")
    }

    async fn wait_for(&self, pred: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let mut rx = self.controller.subscribe();
        let snapshot = timeout(TIMEOUT, rx.wait_for(pred))
            .await
            .expect("timed out waiting for session state")
            .expect("session closed");
        snapshot.clone()
    }

    fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }
}

async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("no event")
        .expect("event channel closed")
}

/// Collect events up to and including the first one matching `pred`.
async fn events_until(
    rx: &mut broadcast::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn texts(snapshot: &SessionSnapshot) -> Vec<(Author, &str)> {
    snapshot
        .turns
        .iter()
        .map(|t| (t.author, t.text.as_str()))
        .collect()
}

#[tokio::test]
async fn test_fresh_session_loads_and_answers() {
    let mut h = Harness::new();
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.state, SessionState::Unloaded);
    assert_eq!(snapshot.selected, ModelVariant::SmolLm);

    h.controller.begin_load().await.unwrap();
    let load = h.next_load().await;
    assert_eq!(load.variant, ModelVariant::SmolLm);
    (load.progress)(0.5);
    (load.progress)(1.0);
    load.succeed();

    let snapshot = h.wait_for(|s| s.is_ready()).await;
    assert_eq!(snapshot.loaded, Some(ModelVariant::SmolLm));
    assert_eq!(snapshot.progress, 1.0);

    h.controller.submit_user_text("Hello").await.unwrap();

    // The user turn is visible before the model answers.
    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.state, SessionState::Generating);
    assert_eq!(texts(&snapshot), vec![(Author::User, "Hello")]);

    let generation = h.next_generation().await;
    assert!(generation.history.is_empty());
    assert_eq!(generation.text, "Hello");
    generation.answer("Hi there!");

    let snapshot = h.wait_for(|s| s.is_ready() && s.turns.len() == 2).await;
    assert_eq!(
        texts(&snapshot),
        vec![(Author::User, "Hello"), (Author::Assistant, "Hi there!")]
    );
    assert!(snapshot.last_error.is_none());
}

#[tokio::test]
async fn test_history_passed_to_model_excludes_new_turn() {
    let mut h = Harness::ready().await;

    h.controller.submit_user_text("one").await.unwrap();
    h.next_generation().await.answer("uno");
    h.wait_for(|s| s.is_ready() && s.turns.len() == 2).await;

    h.controller.submit_user_text("two").await.unwrap();
    let generation = h.next_generation().await;
    let history: Vec<&str> = generation.history.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(history, vec!["one", "uno"]);
    assert_eq!(generation.text, "two");
}

#[tokio::test]
async fn test_blank_input_is_rejected() {
    let h = Harness::ready().await;

    for text in ["", "   ", "\n\t "] {
        let result = h.controller.submit_user_text(text).await;
        assert_eq!(result, Err(SessionError::InvalidInput));
    }

    let snapshot = h.controller.snapshot();
    assert!(snapshot.turns.is_empty());
    assert_eq!(snapshot.state, SessionState::Ready);
}

#[tokio::test]
async fn test_only_one_request_in_flight() {
    let mut h = Harness::ready().await;

    h.controller.submit_user_text("first").await.unwrap();
    for text in ["second", "third"] {
        let result = h.controller.submit_user_text(text).await;
        assert_eq!(
            result,
            Err(SessionError::InvalidState {
                operation: "submit",
                status: SessionStatus::Generating,
            })
        );
    }
    assert_eq!(h.controller.snapshot().turns.len(), 1);

    h.next_generation().await.answer("reply");
    let snapshot = h.wait_for(|s| s.is_ready()).await;
    assert_eq!(
        texts(&snapshot),
        vec![(Author::User, "first"), (Author::Assistant, "reply")]
    );
}

#[tokio::test]
async fn test_generation_failure_keeps_user_turn() {
    let mut h = Harness::ready().await;

    let turn = h.controller.submit_user_text("Hello").await.unwrap();
    h.next_generation()
        .await
        .fail(AdapterError::GenerationFailed("out of memory".into()));

    let snapshot = h.wait_for(|s| s.is_ready()).await;
    assert_eq!(texts(&snapshot), vec![(Author::User, "Hello")]);
    match snapshot.last_error {
        Some(SessionError::GenerationFailed { turn: failed, .. }) => assert_eq!(failed, turn),
        other => panic!("unexpected error: {other:?}"),
    }

    // Input stays usable.
    h.controller.submit_user_text("Hello again").await.unwrap();
    assert!(h.controller.snapshot().last_error.is_none());
}

#[tokio::test]
async fn test_blank_reply_counts_as_failure() {
    let mut h = Harness::ready().await;

    h.controller.submit_user_text("Hello").await.unwrap();
    h.next_generation().await.answer("  \n");

    let snapshot = h.wait_for(|s| s.is_ready()).await;
    assert_eq!(snapshot.turns.len(), 1);
    assert!(matches!(
        snapshot.last_error,
        Some(SessionError::GenerationFailed { .. })
    ));
}

#[tokio::test]
async fn test_load_failure_then_manual_retry() {
    let mut h = Harness::new();

    h.controller.begin_load().await.unwrap();
    h.next_load()
        .await
        .fail(AdapterError::ModelNotFound("smollm.gguf".into()));

    let snapshot = h.wait_for(|s| s.status() == SessionStatus::Failed).await;
    assert!(matches!(
        snapshot.last_error,
        Some(SessionError::ModelUnavailable(_))
    ));

    let result = h.controller.submit_user_text("anything").await;
    assert_eq!(
        result,
        Err(SessionError::InvalidState {
            operation: "submit",
            status: SessionStatus::Failed,
        })
    );
    assert!(h.controller.snapshot().turns.is_empty());

    // No automatic retry.
    assert_eq!(h.load_calls(), 1);

    h.controller.begin_load().await.unwrap();
    h.next_load().await.succeed();
    let snapshot = h.wait_for(|s| s.is_ready()).await;
    assert!(snapshot.last_error.is_none());
    assert_eq!(h.load_calls(), 2);
}

#[tokio::test]
async fn test_begin_load_only_from_unloaded_or_failed() {
    let mut h = Harness::new();
    h.controller.begin_load().await.unwrap();

    let result = h.controller.begin_load().await;
    assert_eq!(
        result,
        Err(SessionError::InvalidState {
            operation: "load",
            status: SessionStatus::Loading,
        })
    );

    h.next_load().await.succeed();
    h.wait_for(|s| s.is_ready()).await;
    assert!(h.controller.begin_load().await.is_err());
    assert_eq!(h.load_calls(), 1);
}

#[tokio::test]
async fn test_submit_before_load_is_rejected() {
    let h = Harness::new();
    let result = h.controller.submit_user_text("Hello").await;
    assert_eq!(
        result,
        Err(SessionError::InvalidState {
            operation: "submit",
            status: SessionStatus::Unloaded,
        })
    );
}

#[tokio::test]
async fn test_reselecting_ready_variant_is_noop() {
    let mut h = Harness::ready().await;
    h.controller.submit_user_text("keep me").await.unwrap();
    h.next_generation().await.answer("kept");
    h.wait_for(|s| s.is_ready() && s.turns.len() == 2).await;

    let mut events = h.controller.events();
    h.controller.select_variant(ModelVariant::SmolLm).await.unwrap();

    let snapshot = h.controller.snapshot();
    assert_eq!(snapshot.state, SessionState::Ready);
    assert_eq!(snapshot.turns.len(), 2);
    assert_eq!(snapshot.epoch, 0);
    assert_eq!(h.load_calls(), 1);
    assert!(events.try_recv().is_err());
    assert_eq!(h.store.get(SELECTED_MODEL_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_switch_clears_transcript_and_persists() {
    let mut h = Harness::ready().await;
    h.controller.submit_user_text("Hello").await.unwrap();
    h.next_generation().await.answer("Hi");
    h.wait_for(|s| s.turns.len() == 2).await;

    h.controller.select_variant(ModelVariant::TinyLlama).await.unwrap();

    let snapshot = h.controller.snapshot();
    assert!(snapshot.turns.is_empty());
    assert_eq!(snapshot.selected, ModelVariant::TinyLlama);
    assert_eq!(snapshot.loaded, None);
    assert_eq!(snapshot.state, SessionState::Loading { progress: 0.0 });
    assert_eq!(snapshot.epoch, 1);
    assert_eq!(
        h.store.get(SELECTED_MODEL_KEY).unwrap().as_deref(),
        Some("TinyLlama")
    );

    let load = h.next_load().await;
    assert_eq!(load.variant, ModelVariant::TinyLlama);
    load.succeed();

    let snapshot = h.wait_for(|s| s.is_ready()).await;
    assert_eq!(snapshot.loaded, Some(ModelVariant::TinyLlama));
}

#[tokio::test]
async fn test_repeated_selection_loads_once() {
    let mut h = Harness::ready().await;

    for _ in 0..3 {
        h.controller.select_variant(ModelVariant::TinyLlama).await.unwrap();
    }
    h.next_load().await.succeed();
    let snapshot = h.wait_for(|s| s.is_ready()).await;

    assert_eq!(snapshot.loaded, Some(ModelVariant::TinyLlama));
    assert_eq!(snapshot.epoch, 1);
    assert_eq!(h.load_calls(), 2);
}

#[tokio::test]
async fn test_stale_load_is_discarded() {
    let mut h = Harness::new();
    let mut events = h.controller.events();

    h.controller.begin_load().await.unwrap();
    let stale = h.next_load().await;
    assert_eq!(stale.variant, ModelVariant::SmolLm);

    h.controller.select_variant(ModelVariant::TinyLlama).await.unwrap();

    // The new load waits for the outstanding one to return.
    assert!(h.loads.try_recv().is_err());

    (stale.progress)(0.9);
    stale.succeed();

    let seen = events_until(&mut events, |e| {
        matches!(e, SessionEvent::StaleResultDiscarded { .. })
    })
    .await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::Progress(p) if *p > 0.0)));
    assert!(matches!(
        seen.last(),
        Some(SessionEvent::StaleResultDiscarded {
            kind: StaleKind::Load,
            epoch: 0
        })
    ));

    let load = h.next_load().await;
    assert_eq!(load.variant, ModelVariant::TinyLlama);
    assert_eq!(h.controller.snapshot().loaded, None);
    load.succeed();

    let snapshot = h.wait_for(|s| s.is_ready()).await;
    assert_eq!(snapshot.loaded, Some(ModelVariant::TinyLlama));
    assert_eq!(h.load_calls(), 2);
}

#[tokio::test]
async fn test_rapid_switches_apply_only_the_last() {
    let mut h = Harness::new();

    h.controller.begin_load().await.unwrap();
    let first = h.next_load().await;

    h.controller.select_variant(ModelVariant::TinyLlama).await.unwrap();
    h.controller.select_variant(ModelVariant::SmolLm).await.unwrap();
    h.controller.select_variant(ModelVariant::TinyLlama).await.unwrap();
    assert_eq!(h.controller.snapshot().epoch, 3);

    first.succeed();
    let last = h.next_load().await;
    assert_eq!(last.variant, ModelVariant::TinyLlama);
    last.succeed();

    let snapshot = h.wait_for(|s| s.is_ready()).await;
    assert_eq!(snapshot.loaded, Some(ModelVariant::TinyLlama));
    assert_eq!(snapshot.selected, ModelVariant::TinyLlama);
    assert_eq!(h.load_calls(), 2);
}

#[tokio::test]
async fn test_switch_during_generation_drops_late_reply() {
    let mut h = Harness::ready().await;
    let mut events = h.controller.events();

    h.controller.submit_user_text("Hello").await.unwrap();
    let generation = h.next_generation().await;

    h.controller.select_variant(ModelVariant::TinyLlama).await.unwrap();
    assert!(h.controller.snapshot().turns.is_empty());

    // Loading waits until the old handle is no longer generating.
    assert!(h.loads.try_recv().is_err());

    generation.answer("too late");
    events_until(&mut events, |e| {
        matches!(
            e,
            SessionEvent::StaleResultDiscarded {
                kind: StaleKind::Generation,
                ..
            }
        )
    })
    .await;

    h.next_load().await.succeed();
    let snapshot = h.wait_for(|s| s.is_ready()).await;
    assert!(snapshot.turns.is_empty());
    assert_eq!(snapshot.loaded, Some(ModelVariant::TinyLlama));
}

#[tokio::test]
async fn test_progress_is_clamped_and_monotonic() {
    let mut h = Harness::new();
    let mut events = h.controller.events();

    h.controller.begin_load().await.unwrap();
    let load = h.next_load().await;
    for p in [0.5, 0.3, f64::NAN, 2.0] {
        (load.progress)(p);
    }
    load.succeed();

    let seen = events_until(&mut events, |e| {
        matches!(e, SessionEvent::StateChanged(SessionState::Ready))
    })
    .await;
    let progress: Vec<f64> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![0.5, 1.0]);
}

#[tokio::test]
async fn test_selection_survives_restart() {
    let store = Arc::new(MemoryStore::new());

    {
        let mut h = Harness::with_store(store.clone());
        h.controller.select_variant(ModelVariant::TinyLlama).await.unwrap();
        h.next_load().await.succeed();
        h.wait_for(|s| s.is_ready()).await;
    }

    let mut h = Harness::with_store(store);
    assert_eq!(h.controller.snapshot().selected, ModelVariant::TinyLlama);
    h.controller.begin_load().await.unwrap();
    assert_eq!(h.next_load().await.variant, ModelVariant::TinyLlama);
}

struct PanickingAdapter;

#[async_trait]
impl ModelAdapter for PanickingAdapter {
    async fn load(
        &self,
        _variant: ModelVariant,
        _progress: ProgressCallback,
    ) -> Result<Arc<dyn ModelHandle>, AdapterError> {
        panic!("native library crashed");
    }
}

#[tokio::test]
async fn test_adapter_panic_becomes_load_failure() {
    let settings = Settings::load(Arc::new(MemoryStore::new()));
    let controller =
        SessionController::spawn(Arc::new(PanickingAdapter), settings, &SessionConfig::default());

    controller.begin_load().await.unwrap();
    let mut rx = controller.subscribe();
    let snapshot = timeout(TIMEOUT, rx.wait_for(|s| s.status() == SessionStatus::Failed))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert!(matches!(
        snapshot.last_error,
        Some(SessionError::ModelUnavailable(_))
    ));
}
