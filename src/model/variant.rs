//! Catalogue of the model variants the app can run.
//!
//! Each variant is a fixed, build-time record describing which GGUF weights to
//! load and how to talk to them. The list is ordered smallest to largest.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::template::PromptTemplate;

/// Weight quantization level of a GGUF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quantization {
    Q8_0,
    Q4KM,
}

impl Quantization {
    /// Suffix used in GGUF file names (e.g. "Q8_0").
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantization::Q8_0 => "Q8_0",
            Quantization::Q4KM => "Q4_K_M",
        }
    }
}

impl fmt::Display for Quantization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSpec {
    /// Name shown to the user and persisted in settings.
    pub display_name: &'static str,

    /// Remote repository identifier used when the weights are not cached.
    pub model_identifier: &'static str,

    /// Quantization of the weights.
    pub quantization: Quantization,

    /// File name of the cached weights.
    pub local_file_name: &'static str,

    /// Chat prompt format the model was tuned on.
    pub prompt_template: PromptTemplate,
}

/// A model the session can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelVariant {
    /// SmolLM 135M instruct: small and fast.
    #[default]
    SmolLm,
    /// TinyLlama 1.1B chat: larger and slower.
    TinyLlama,
}

impl ModelVariant {
    /// All variants, smallest first.
    pub const ALL: [ModelVariant; 2] = [ModelVariant::SmolLm, ModelVariant::TinyLlama];

    pub fn spec(&self) -> VariantSpec {
        match self {
            ModelVariant::SmolLm => VariantSpec {
                display_name: "SmolLM",
                model_identifier: "HuggingFaceTB/smollm-135M-instruct-v0.2-Q8_0-GGUF",
                quantization: Quantization::Q8_0,
                local_file_name: "smollm-135M-instruct-v0.2-Q8_0.gguf",
                prompt_template: PromptTemplate::ChatMl,
            },
            ModelVariant::TinyLlama => VariantSpec {
                display_name: "TinyLlama",
                model_identifier: "TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF",
                quantization: Quantization::Q4KM,
                local_file_name: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
                prompt_template: PromptTemplate::Zephyr,
            },
        }
    }

    pub fn display_name(&self) -> &'static str {
        self.spec().display_name
    }

    /// Short lowercase id accepted on the command line.
    pub fn short_id(&self) -> &'static str {
        match self {
            ModelVariant::SmolLm => "smollm",
            ModelVariant::TinyLlama => "tinyllama",
        }
    }

    /// Exact lookup by display name, as stored in settings.
    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.display_name() == name)
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown model variant: {0}")]
pub struct UnknownVariant(pub String);

impl FromStr for ModelVariant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|v| {
                v.display_name().eq_ignore_ascii_case(wanted)
                    || v.short_id().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| UnknownVariant(wanted.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_smallest() {
        assert_eq!(ModelVariant::default(), ModelVariant::SmolLm);
        assert_eq!(ModelVariant::ALL[0], ModelVariant::default());
    }

    #[test]
    fn test_display_name_lookup_is_exact() {
        assert_eq!(
            ModelVariant::from_display_name("TinyLlama"),
            Some(ModelVariant::TinyLlama)
        );
        assert_eq!(ModelVariant::from_display_name("tinyllama"), None);
        assert_eq!(ModelVariant::from_display_name("Mistral"), None);
    }

    #[test]
    fn test_parse_accepts_short_ids() {
        assert_eq!("smollm".parse::<ModelVariant>(), Ok(ModelVariant::SmolLm));
        assert_eq!(" TINYLLAMA ".parse::<ModelVariant>(), Ok(ModelVariant::TinyLlama));
        assert!("gpt".parse::<ModelVariant>().is_err());
    }

    #[test]
    fn test_local_file_matches_quantization() {
        for variant in ModelVariant::ALL {
            let spec = variant.spec();
            assert!(spec.local_file_name.ends_with(".gguf"));
            assert!(spec.local_file_name.contains(spec.quantization.as_str()));
        }
    }
}
