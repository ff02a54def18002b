//! Chat prompt templates.
//!
//! Renders a transcript into the single prompt string a chat-tuned GGUF model
//! expects. Only the two formats used by the bundled variants are supported.

use serde::{Deserialize, Serialize};

use crate::session::turn::{Author, Turn};

/// System prompt sent with every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful and friendly AI assistant. Keep your responses concise and engaging.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PromptTemplate {
    /// `<|im_start|>role\n...<|im_end|>` (SmolLM).
    ChatMl,
    /// `<|role|>\n...</s>` (TinyLlama chat).
    Zephyr,
}

impl PromptTemplate {
    /// Sequence that terminates an assistant reply.
    pub fn stop_sequence(&self) -> &'static str {
        match self {
            PromptTemplate::ChatMl => "<|im_end|>",
            PromptTemplate::Zephyr => "</s>",
        }
    }

    /// Render the system prompt, prior turns, and the new user message, ending
    /// with an open assistant header for the model to complete.
    pub fn render(&self, system_prompt: &str, history: &[Turn], user_text: &str) -> String {
        let mut out = String::new();
        self.push_message(&mut out, "system", system_prompt);
        for turn in history {
            self.push_message(&mut out, role(turn.author), &turn.text);
        }
        self.push_message(&mut out, "user", user_text);
        match self {
            PromptTemplate::ChatMl => out.push_str("<|im_start|>assistant\n"),
            PromptTemplate::Zephyr => out.push_str("<|assistant|>\n"),
        }
        out
    }

    fn push_message(&self, out: &mut String, role: &str, content: &str) {
        match self {
            PromptTemplate::ChatMl => {
                out.push_str("<|im_start|>");
                out.push_str(role);
                out.push('\n');
                out.push_str(content);
                out.push_str("<|im_end|>\n");
            }
            PromptTemplate::Zephyr => {
                out.push_str("<|");
                out.push_str(role);
                out.push_str("|>\n");
                out.push_str(content);
                out.push_str("</s>\n");
            }
        }
    }
}

fn role(author: Author) -> &'static str {
    match author {
        Author::User => "user",
        Author::Assistant => "assistant",
    }
}
