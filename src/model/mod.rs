//! Model selection and the inference library boundary.
//!
//! - [`variant`]: The fixed catalogue of loadable models
//! - [`template`]: Chat prompt formats
//! - [`adapter`]: Traits the session uses to load and query a model
//! - [`local`]: File-backed stub backend used by the binary

pub mod adapter;
pub mod local;
pub mod template;
pub mod variant;
