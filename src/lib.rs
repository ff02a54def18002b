//! mobile-chat: a single-conversation chat client for small on-device models.
//!
//! The session controller owns the transcript and the loaded model, allows
//! one request in flight at a time, and reports load progress and replies to
//! whatever presentation layer is attached. Inference itself sits behind the
//! [`model::adapter`] traits.

pub mod config;
pub mod console;
pub mod model;
pub mod session;
pub mod settings;
