//! Model and provider descriptions supplied by configuration.

use serde::{Deserialize, Serialize};

/// Which wire dialect a provider speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Any OpenAI-compatible chat completions endpoint.
    #[default]
    Generic,
    /// The first-party endpoint; same wire format, reasoning enabled.
    Hacxgent,
}

/// One model provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    pub api_base: String,

    /// Environment variable holding the API key. Empty means no key.
    #[serde(default)]
    pub api_key_env_var: String,

    #[serde(default = "default_api_style")]
    pub api_style: String,

    #[serde(default)]
    pub backend: BackendKind,

    /// Field name carrying reasoning text in responses.
    #[serde(default = "default_reasoning_field")]
    pub reasoning_field_name: String,
}

fn default_api_style() -> String {
    "openai".into()
}

fn default_reasoning_field() -> String {
    "reasoning_content".into()
}

/// One selectable model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier sent to the provider.
    pub name: String,

    /// Name of the [`ProviderConfig`] serving this model.
    pub provider: String,

    /// Short name used to select the model; defaults to `name`.
    #[serde(default)]
    pub alias: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// USD per million prompt tokens.
    #[serde(default)]
    pub input_price: f64,

    /// USD per million completion tokens.
    #[serde(default)]
    pub output_price: f64,

    /// Requests per minute; 0 disables pacing.
    #[serde(default)]
    pub rate_limit_rpm: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<usize>,
}

fn default_temperature() -> f32 {
    0.2
}

impl ModelConfig {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            alias: name.clone(),
            name,
            provider: provider.into(),
            temperature: default_temperature(),
            input_price: 0.0,
            output_price: 0.0,
            rate_limit_rpm: 0,
            max_context_tokens: None,
        }
    }

    /// The selection key: `alias`, or `name` when no alias is set.
    pub fn alias(&self) -> &str {
        if self.alias.is_empty() {
            &self.name
        } else {
            &self.alias
        }
    }

    /// Cost in USD of a call with the given token counts.
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 * self.input_price + completion_tokens as f64 * self.output_price)
            / 1_000_000.0
    }
}
