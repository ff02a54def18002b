//! Persisted user settings.
//!
//! - [`store`]: Key-value storage backends (JSON file, in-memory)
//!
//! The only setting is the selected model variant, stored under
//! [`SELECTED_MODEL_KEY`] as the variant's display name.

pub mod store;

use std::sync::Arc;

use tracing::{info, warn};

use crate::model::variant::ModelVariant;
pub use store::{JsonFileStore, MemoryStore, SettingsError, SettingsStore};

/// Storage key for the selected model.
pub const SELECTED_MODEL_KEY: &str = "selectedModel";

/// User settings, owned by the session controller.
pub struct Settings {
    selected: ModelVariant,
    store: Arc<dyn SettingsStore>,
}

impl Settings {
    /// Read settings from `store`.
    ///
    /// A missing, unreadable, or unrecognized value falls back to the default
    /// variant; nothing is written until the user switches models.
    pub fn load(store: Arc<dyn SettingsStore>) -> Self {
        let selected = match store.get(SELECTED_MODEL_KEY) {
            Ok(Some(name)) => ModelVariant::from_display_name(&name).unwrap_or_else(|| {
                warn!(value = name, "Unrecognized stored model, using default");
                ModelVariant::default()
            }),
            Ok(None) => ModelVariant::default(),
            Err(e) => {
                warn!("Could not read settings, using defaults: {e}");
                ModelVariant::default()
            }
        };

        info!(model = %selected, "Settings loaded");
        Self { selected, store }
    }

    pub fn selected(&self) -> ModelVariant {
        self.selected
    }

    /// Select `variant` and persist it.
    ///
    /// The in-memory selection changes even when persisting fails.
    pub fn set_selected(&mut self, variant: ModelVariant) -> Result<(), SettingsError> {
        self.selected = variant;
        self.store.set(SELECTED_MODEL_KEY, variant.display_name())
    }
}
