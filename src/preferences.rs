//! User preferences for reply generation.
//!
//! Stored as a single JSON value under [`PREFERENCES_KEY`] in whichever
//! [`PreferenceStore`] backs the host. Nothing in the caching core reads
//! these; they only shape prompts.

use anyhow::{bail, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use reply_companion_core::store::PreferenceStore;

pub const PREFERENCES_KEY: &str = "preferences";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub tone: String,
    pub length: String,
    pub stance: String,
    /// Overrides `[generation] model` when set.
    pub model: Option<String>,
    /// Writing samples the reply should imitate.
    pub persona_samples: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            tone: "friendly".to_string(),
            length: "short".to_string(),
            stance: "neutral".to_string(),
            model: None,
            persona_samples: Vec::new(),
        }
    }
}

impl Preferences {
    /// Sets one field from its string form, as given on the command line.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "tone" => self.tone = value.to_string(),
            "length" => self.length = value.to_string(),
            "stance" => self.stance = value.to_string(),
            "model" => {
                self.model = if value.trim().is_empty() {
                    None
                } else {
                    Some(value.to_string())
                }
            }
            "persona_sample" => {
                if value.trim().is_empty() {
                    bail!("persona sample must not be empty");
                }
                self.persona_samples.push(value.to_string());
            }
            other => bail!(
                "Unknown preference '{}'. Expected tone, length, stance, model, or persona_sample.",
                other
            ),
        }
        Ok(())
    }
}

/// Reads preferences, falling back to defaults when absent or unreadable.
pub async fn load(store: &dyn PreferenceStore) -> Preferences {
    match store.get_preference(PREFERENCES_KEY).await {
        Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("Stored preferences are malformed, using defaults: {}", e);
            Preferences::default()
        }),
        Ok(None) => Preferences::default(),
        Err(e) => {
            warn!("Could not read preferences, using defaults: {:#}", e);
            Preferences::default()
        }
    }
}

pub async fn save(store: &dyn PreferenceStore, prefs: &Preferences) -> Result<()> {
    let value = serde_json::to_value(prefs)?;
    store.set_preference(PREFERENCES_KEY, &value).await
}
