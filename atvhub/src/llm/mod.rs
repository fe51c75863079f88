use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use common::LlmConfig;

/// Core trait for remote model providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for the given request
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Short provider name for logs and status output
    fn name(&self) -> &str;
}

/// Request structure for LLM generation
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// Instructions sent ahead of the prompt
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
    /// Ask the provider to constrain its output to a JSON object
    pub json_mode: bool,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub mod analyzer;
pub mod gemini;
pub mod remote;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_DEEPSEEK_URL: &str = "https://api.deepseek.com/chat/completions";
pub const DEFAULT_DEEPSEEK_MODEL: &str = "deepseek-chat";

/// Build the provider selected in `[llm]`. `Ok(None)` when no provider or no key is configured.
pub fn from_config(cfg: Option<&LlmConfig>, client: reqwest::Client) -> Result<Option<Arc<dyn LlmProvider>>> {
    let Some(cfg) = cfg else {
        return Ok(None);
    };
    let Some(provider) = cfg.provider.as_deref() else {
        return Ok(None);
    };

    let (section, default_env) = match provider {
        "gemini" => (cfg.gemini.clone().unwrap_or_default(), "GEMINI_API_KEY"),
        "deepseek" => (cfg.deepseek.clone().unwrap_or_default(), "DEEPSEEK_API_KEY"),
        other => anyhow::bail!("unknown LLM provider: {} (expected gemini or deepseek)", other),
    };

    let key_env = section.api_key_env.as_deref().unwrap_or(default_env);
    let api_key = match std::env::var(key_env) {
        Ok(k) if !k.trim().is_empty() => k,
        _ => {
            tracing::warn!(%provider, %key_env, "llm: API key not set, lead analysis disabled");
            return Ok(None);
        }
    };
    let timeout = section.timeout_seconds.unwrap_or(60);
    let max_tokens = section.max_tokens.unwrap_or(1024);

    let built: Arc<dyn LlmProvider> = match provider {
        "gemini" => Arc::new(
            gemini::GeminiProvider::new(
                section.api_url.unwrap_or_else(|| DEFAULT_GEMINI_URL.to_string()),
                api_key,
                section.model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            )
            .with_client(client)
            .with_defaults(timeout, max_tokens, 0.3),
        ),
        _ => Arc::new(
            remote::RemoteLlmProvider::new(
                section.api_url.unwrap_or_else(|| DEFAULT_DEEPSEEK_URL.to_string()),
                api_key,
                section.model.unwrap_or_else(|| DEFAULT_DEEPSEEK_MODEL.to_string()),
            )
            .with_client(client)
            .with_defaults(timeout, max_tokens, 0.3),
        ),
    };
    tracing::info!(provider = built.name(), "llm: provider ready");
    Ok(Some(built))
}

/// Helper to extract JSON from text that might contain markdown backticks or preamble
pub fn extract_json_from_text(text: &str) -> Option<String> {
    // 1. Try to find content between ```json and ```
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 2. Try to find content between ``` and ```
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 3. Try to find the first '{' and last '}'
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            return Some(text[start..=end].to_string());
        }
    }

    None
}
