//! Errors surfaced by the session controller.

use thiserror::Error;

use crate::session::state::SessionStatus;
use crate::session::turn::TurnId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The model could not be obtained or initialized.
    #[error("could not load model: {0}")]
    ModelUnavailable(String),

    /// The reply to `turn` could not be produced.
    #[error("generation failed for turn {turn}: {reason}")]
    GenerationFailed { turn: TurnId, reason: String },

    /// Empty or whitespace-only submission.
    #[error("input is empty")]
    InvalidInput,

    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },

    /// The controller task has stopped.
    #[error("session controller has shut down")]
    Closed,
}
