//! Terminal presentation for the chat binary.
//!
//! Parses input lines into commands and formats session output. Holds no
//! session state of its own.

use crate::model::variant::ModelVariant;
use crate::session::{Author, SessionError, SessionStatus, Turn};

/// A line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Plain text to send to the model.
    Say(String),
    /// `/models`
    ListModels,
    /// `/model <name>`
    Switch(String),
    /// `/retry`
    Retry,
    /// `/help`
    Help,
    /// `/quit` or `/exit`
    Quit,
    /// Anything else starting with `/`.
    Unknown(String),
}

pub const HELP: &str = "\
Commands:
  /models          list available models
  /model <name>    switch model (clears the conversation)
  /retry           retry a failed model load
  /quit            exit
Anything else is sent to the model.";

pub fn parse_line(line: &str) -> ConsoleCommand {
    let trimmed = line.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return ConsoleCommand::Say(line.trim_end_matches(&['\r', '\n'][..]).to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();

    match name {
        "models" => ConsoleCommand::ListModels,
        "model" if !arg.is_empty() => ConsoleCommand::Switch(arg.to_string()),
        "retry" => ConsoleCommand::Retry,
        "help" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        _ => ConsoleCommand::Unknown(trimmed.to_string()),
    }
}

pub fn format_progress(fraction: f64) -> String {
    format!("Loading AI Model... {:.1}%", fraction.clamp(0.0, 1.0) * 100.0)
}

pub fn render_turn(turn: &Turn) -> String {
    let prefix = match turn.author {
        Author::User => "you",
        Author::Assistant => "bot",
    };
    format!("{prefix}> {}", turn.text)
}

pub fn render_models(selected: ModelVariant) -> String {
    ModelVariant::ALL
        .iter()
        .map(|v| {
            let spec = v.spec();
            let marker = if *v == selected { '*' } else { ' ' };
            format!(
                "{marker} {:<10} {} ({})",
                spec.display_name, spec.model_identifier, spec.quantization
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// User-facing text for a failed request.
pub fn describe_error(error: &SessionError) -> String {
    match error {
        SessionError::ModelUnavailable(reason) => {
            format!("Could not load model ({reason}). Type /retry to try again.")
        }
        SessionError::GenerationFailed { reason, .. } => {
            format!("The model could not answer ({reason}). You can send another message.")
        }
        SessionError::InvalidInput => "Nothing to send.".to_string(),
        SessionError::InvalidState {
            status: SessionStatus::Generating,
            ..
        } => "Still answering the previous message.".to_string(),
        SessionError::InvalidState {
            status: SessionStatus::Loading,
            ..
        } => "The model is still loading.".to_string(),
        SessionError::InvalidState { operation, status } => {
            format!("Cannot {operation} right now ({status}).")
        }
        SessionError::Closed => "Session has ended.".to_string(),
    }
}
