//! Observable session state.

use std::fmt;
use std::sync::Arc;

use crate::model::variant::ModelVariant;
use crate::session::error::SessionError;
use crate::session::turn::Turn;

/// Controller state machine.
///
/// `Unloaded → Loading → Ready ⇄ Generating`, `Loading → Failed`. A model
/// switch passes through `Unloaded` back to `Loading`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unloaded,
    Loading { progress: f64 },
    Ready,
    Generating,
    Failed { reason: String },
}

impl SessionState {
    pub fn status(&self) -> SessionStatus {
        match self {
            SessionState::Unloaded => SessionStatus::Unloaded,
            SessionState::Loading { .. } => SessionStatus::Loading,
            SessionState::Ready => SessionStatus::Ready,
            SessionState::Generating => SessionStatus::Generating,
            SessionState::Failed { .. } => SessionStatus::Failed,
        }
    }
}

/// [`SessionState`] without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Unloaded,
    Loading,
    Ready,
    Generating,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Unloaded => "unloaded",
            SessionStatus::Loading => "loading",
            SessionStatus::Ready => "ready",
            SessionStatus::Generating => "generating",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the session for rendering.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,

    /// Variant chosen in settings.
    pub selected: ModelVariant,

    /// Variant of the loaded handle, if any.
    pub loaded: Option<ModelVariant>,

    /// Progress of the current or last load, `0.0..=1.0`.
    pub progress: f64,

    /// Transcript at the time of the snapshot.
    pub turns: Arc<[Turn]>,

    /// Most recent surfaced failure.
    pub last_error: Option<SessionError>,

    /// Incremented on every model switch.
    pub epoch: u64,
}

impl SessionSnapshot {
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }
}

/// Which background operation produced a discarded result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleKind {
    Load,
    Generation,
}

/// Change notifications, in the order the controller applied them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Progress(f64),
    TurnAppended(Turn),
    TranscriptCleared,
    Failed(SessionError),
    /// A result from before the latest model switch was dropped.
    StaleResultDiscarded { kind: StaleKind, epoch: u64 },
}
