//! Provider selection from configuration.

use duckling_config::AppConfig;
use duckling_core::provider::Provider;
use std::sync::Arc;

use crate::openai_compat::OpenAiCompatProvider;

/// Build the configured generation provider.
///
/// Every supported backend speaks the chat-completions protocol; the
/// `[providers.<name>]` section may override the key and the base URL.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn Provider> {
    let section = config.providers.get(&config.provider);

    let api_key = config.provider_api_key().unwrap_or_default();
    let base_url = section
        .and_then(|p| p.api_url.clone())
        .unwrap_or_else(|| default_base_url(&config.provider));

    if api_key.is_empty() {
        tracing::warn!(provider = %config.provider, "No API key configured; requests will fail");
    }

    Arc::new(OpenAiCompatProvider::new(&config.provider, base_url, api_key))
}

/// The model to request: the provider section's override, else the global one.
pub fn resolve_model(config: &AppConfig) -> String {
    config
        .providers
        .get(&config.provider)
        .and_then(|p| p.model.clone())
        .unwrap_or_else(|| config.model.clone())
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "gemini" | "google" => "https://generativelanguage.googleapis.com/v1beta/openai".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
