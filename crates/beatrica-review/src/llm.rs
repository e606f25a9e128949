use std::time::Duration;

use beatrica_core::{BeatricaError, LlmConfig, LlmProvider};
use serde::{Deserialize, Serialize};

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use beatrica_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage::user("Review this change");
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Role in the chat conversation.
///
/// # Examples
///
/// ```
/// use beatrica_review::llm::Role;
///
/// let role = Role::System;
/// assert_eq!(serde_json::to_string(&role).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// OpenAI-compatible chat completions client.
///
/// OpenAI and Mistral AI both expose `<base>/chat/completions` with the same
/// shape, so the provider only selects defaults (base URL, model, key
/// variable).
///
/// # Examples
///
/// ```
/// use beatrica_core::LlmConfig;
/// use beatrica_review::llm::LlmClient;
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// assert_eq!(client.model(), "gpt-4-0125-preview");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.config.provider)
            .field("model", &self.config.model_name())
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a new LLM client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Config`] if no API key can be resolved, or
    /// [`BeatricaError::Llm`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, BeatricaError> {
        let api_key = config.resolve_api_key().ok_or_else(|| {
            BeatricaError::Config(format!(
                "no API key for {}: pass --api-key, set llm.api_key, LLM_API_KEY or {}",
                config.provider,
                config.provider.api_key_env()
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| BeatricaError::Llm(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    /// Return the effective model name.
    pub fn model(&self) -> &str {
        self.config.model_name()
    }

    /// Return the configured provider.
    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model(),
            "messages": messages,
            "temperature": 0.0,
            "max_tokens": self.config.max_tokens,
        })
    }

    /// Send a chat completion request and return the text response.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Llm`] on HTTP errors or response parsing failures.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, BeatricaError> {
        let url = format!("{}/chat/completions", self.config.base_url());
        tracing::debug!(%url, model = self.model(), "chat completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(&messages))
            .send()
            .await
            .map_err(|e| BeatricaError::Llm(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(BeatricaError::Llm(format!(
                "LLM API error {status}: {body_text}"
            )));
        }

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BeatricaError::Llm(format!("failed to parse response: {e}")))?;

        extract_content(&response_body)
    }
}

fn extract_content(body: &serde_json::Value) -> Result<String, BeatricaError> {
    body.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| BeatricaError::Llm(format!("unexpected response structure: {body}")))
}
