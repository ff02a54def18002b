//! Chat session management.
//!
//! - [`turn`]: Turn records and the append-only transcript
//! - [`state`]: State machine values, snapshots, and events
//! - [`controller`]: The actor that sequences loads and replies
//! - [`error`]: Failures surfaced to the presentation layer

pub mod controller;
pub mod error;
pub mod state;
pub mod turn;

pub use controller::SessionController;
pub use error::SessionError;
pub use state::{SessionEvent, SessionSnapshot, SessionState, SessionStatus, StaleKind};
pub use turn::{Author, ConversationStore, Turn, TurnId};
