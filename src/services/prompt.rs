use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Text substituted into `{name}` placeholders of sound keys
pub type Replacements = HashMap<String, String>;

/// Composes sound keys into a playable prompt on a channel
pub trait PromptPlayer: Send + Sync {
    fn create(&self, keys: Vec<String>, channel_id: &str, replacements: Replacements)
        -> Arc<dyn Prompt>;
}

/// A single prompt bound to a channel
#[async_trait::async_trait]
pub trait Prompt: Send + Sync {
    /// Play the prompt
    ///
    /// Resolves `Ok(true)` when played to completion and `Ok(false)` when
    /// interrupted by [`Prompt::stop`]. Errors are playback failures.
    async fn play(&self) -> Result<bool>;

    /// Interrupt playback. Idempotent, safe before or after `play`.
    fn stop(&self);
}

/// Expand `{name}` placeholders in each key
pub fn apply_replacements(keys: &[String], replacements: &Replacements) -> Vec<String> {
    keys.iter()
        .map(|key| {
            replacements
                .iter()
                .fold(key.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{}}}", name), value)
                })
        })
        .collect()
}
