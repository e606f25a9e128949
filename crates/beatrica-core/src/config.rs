use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BeatricaError;
use crate::types::LlmProvider;

/// Branch compared against when none is given.
pub const DEFAULT_BASE_BRANCH: &str = "main";
/// Response token limit for LLM calls when none is given.
pub const DEFAULT_MAX_TOKENS: u32 = 500;
/// Output target that selects the interactive table.
pub const CONSOLE_OUTPUT: &str = "console";
/// File name used when the output target is empty.
pub const DEFAULT_OUTPUT_FILE: &str = "beatrica_review.txt";
/// Environment variable holding the API key for either provider.
const LLM_API_KEY_ENV: &str = "LLM_API_KEY";

/// Top-level configuration loaded from `.beatrica.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
///
/// # Examples
///
/// ```
/// use beatrica_core::BeatricaConfig;
///
/// let config = BeatricaConfig::default();
/// assert_eq!(config.review.base_branch, "main");
/// assert_eq!(config.llm.max_tokens, 500);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeatricaConfig {
    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Embedding settings for the change index.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Review run settings.
    #[serde(default)]
    pub review: ReviewConfig,
    /// Per-stage prompt overrides, keyed by stage name (e.g. `make_review`).
    #[serde(default)]
    pub prompts: HashMap<String, PromptOverride>,
}

impl BeatricaConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Io`] if the file cannot be read, or
    /// [`BeatricaError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use beatrica_core::BeatricaConfig;
    /// use std::path::Path;
    ///
    /// let config = BeatricaConfig::from_file(Path::new(".beatrica.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, BeatricaError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Toml`] if parsing fails, or
    /// [`BeatricaError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use beatrica_core::{BeatricaConfig, LlmProvider};
    ///
    /// let toml = r#"
    /// [llm]
    /// provider = "mistralai"
    /// max_tokens = 800
    /// "#;
    /// let config = BeatricaConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.llm.provider, LlmProvider::MistralAi);
    /// assert_eq!(config.llm.model_name(), "mistral-large-latest");
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, BeatricaError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that TOML typing alone cannot enforce.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<(), BeatricaError> {
        if self.llm.max_tokens == 0 {
            return Err(BeatricaError::Config(
                "llm.max_tokens must be greater than 0".into(),
            ));
        }
        if self.review.top_k == 0 {
            return Err(BeatricaError::Config(
                "review.top_k must be greater than 0".into(),
            ));
        }
        if self.embedding.chunk_lines == 0 {
            return Err(BeatricaError::Config(
                "embedding.chunk_lines must be greater than 0".into(),
            ));
        }
        if self.embedding.chunk_overlap >= self.embedding.chunk_lines {
            return Err(BeatricaError::Config(format!(
                "embedding.chunk_overlap ({}) must be smaller than embedding.chunk_lines ({})",
                self.embedding.chunk_overlap, self.embedding.chunk_lines
            )));
        }
        Ok(())
    }
}

/// LLM provider configuration.
///
/// # Examples
///
/// ```
/// use beatrica_core::{LlmConfig, LlmProvider};
///
/// let config = LlmConfig::default();
/// assert_eq!(config.provider, LlmProvider::OpenAi);
/// assert_eq!(config.model_name(), "gpt-4-0125-preview");
/// assert_eq!(config.base_url(), "https://api.openai.com/v1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider (`"openai"` or `"mistralai"`).
    #[serde(default)]
    pub provider: LlmProvider,
    /// Model identifier; the provider default when unset.
    pub model: Option<String>,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests (e.g. a proxy).
    pub base_url: Option<String>,
    /// Maximum tokens in each LLM response (default: 500).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: None,
            api_key: None,
            base_url: None,
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmConfig {
    /// Model name, falling back to the provider default when unset or empty.
    pub fn model_name(&self) -> &str {
        match self.model.as_deref() {
            Some(m) if !m.is_empty() => m,
            _ => self.provider.default_model(),
        }
    }

    /// API root without trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    /// Resolve the API key: config value, then `LLM_API_KEY`, then the
    /// provider-specific variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    /// [`resolve_api_key`](Self::resolve_api_key) with an explicit
    /// environment lookup.
    ///
    /// # Examples
    ///
    /// ```
    /// use beatrica_core::LlmConfig;
    ///
    /// let config = LlmConfig::default();
    /// let key = config.resolve_api_key_with(|name| {
    ///     (name == "OPENAI_API_KEY").then(|| "sk-test".to_string())
    /// });
    /// assert_eq!(key.as_deref(), Some("sk-test"));
    /// ```
    pub fn resolve_api_key_with(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| env(LLM_API_KEY_ENV).filter(|k| !k.is_empty()))
            .or_else(|| env(self.provider.api_key_env()).filter(|k| !k.is_empty()))
    }
}

/// Embedding configuration for the change index.
///
/// # Examples
///
/// ```
/// use beatrica_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.chunk_lines, 40);
/// assert_eq!(config.chunk_overlap, 5);
/// assert!(config.model.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model; the provider default when unset.
    pub model: Option<String>,
    /// API key; falls back to the LLM key when unset.
    pub api_key: Option<String>,
    /// Custom base URL; falls back to the LLM base URL when unset.
    pub base_url: Option<String>,
    /// Maximum lines per indexed chunk (default: 40).
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,
    /// Lines shared between consecutive chunks (default: 5).
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_chunk_lines() -> usize {
    40
}

fn default_chunk_overlap() -> usize {
    5
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: None,
            api_key: None,
            base_url: None,
            chunk_lines: default_chunk_lines(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Review run configuration.
///
/// # Examples
///
/// ```
/// use beatrica_core::ReviewConfig;
///
/// let config = ReviewConfig::default();
/// assert_eq!(config.base_branch, "main");
/// assert_eq!(config.output, "console");
/// assert_eq!(config.top_k, 6);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Branch the current HEAD is compared against (default: `"main"`).
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// `"console"` for the interactive table, otherwise a file path.
    #[serde(default = "default_output")]
    pub output: String,
    /// Number of retrieved chunks per question (default: 6).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Directory holding the change index, relative to the repository root.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_base_branch() -> String {
    DEFAULT_BASE_BRANCH.into()
}

fn default_output() -> String {
    CONSOLE_OUTPUT.into()
}

fn default_top_k() -> usize {
    6
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".beatrica")
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            output: default_output(),
            top_k: default_top_k(),
            cache_dir: default_cache_dir(),
        }
    }
}

/// Replacement texts for one prompt stage. Unset fields keep the built-in text.
///
/// # Examples
///
/// ```
/// use beatrica_core::PromptOverride;
///
/// let o = PromptOverride {
///     question: Some("Review this: ".into()),
///     ..PromptOverride::default()
/// };
/// assert!(o.expected_pattern.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOverride {
    /// Question prefix placed before the payload.
    pub question: Option<String>,
    /// Instruction describing the answer format.
    pub expected_answer: Option<String>,
    /// Regular expression extracting fields from the answer.
    pub expected_pattern: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = BeatricaConfig::default();
        assert_eq!(config.llm.provider, LlmProvider::OpenAi);
        assert_eq!(config.llm.model_name(), "gpt-4-0125-preview");
        assert_eq!(config.llm.max_tokens, 500);
        assert_eq!(config.review.base_branch, "main");
        assert_eq!(config.review.output, "console");
        assert_eq!(config.review.top_k, 6);
        assert_eq!(config.review.cache_dir, PathBuf::from(".beatrica"));
        assert_eq!(config.embedding.chunk_lines, 40);
        assert!(config.prompts.is_empty());
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = BeatricaConfig::from_toml("").unwrap();
        assert_eq!(config.review.base_branch, "main");
        assert_eq!(config.llm.max_tokens, 500);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[llm]
provider = "mistralai"
model = "mistral-small-latest"
base_url = "https://proxy.internal/v1/"
max_tokens = 1000

[embedding]
model = "mistral-embed"
chunk_lines = 60
chunk_overlap = 10

[review]
base_branch = "develop"
output = "review.txt"
top_k = 4

[prompts.make_review]
question = "Review this change: "
"#;
        let config = BeatricaConfig::from_toml(toml).unwrap();
        assert_eq!(config.llm.provider, LlmProvider::MistralAi);
        assert_eq!(config.llm.model_name(), "mistral-small-latest");
        assert_eq!(config.llm.base_url(), "https://proxy.internal/v1");
        assert_eq!(config.llm.max_tokens, 1000);
        assert_eq!(config.embedding.chunk_lines, 60);
        assert_eq!(config.review.base_branch, "develop");
        assert_eq!(config.review.output, "review.txt");
        assert_eq!(config.review.top_k, 4);

        let over = &config.prompts["make_review"];
        assert_eq!(over.question.as_deref(), Some("Review this change: "));
        assert!(over.expected_answer.is_none());
    }

    #[test]
    fn invalid_toml_returns_error() {
        assert!(BeatricaConfig::from_toml("{{invalid}}").is_err());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = BeatricaConfig::from_toml("[llm]\nprovider = \"anthropic\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let toml = "[embedding]\nchunk_lines = 10\nchunk_overlap = 10\n";
        let err = BeatricaConfig::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("chunk_overlap"), "{err}");
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let err = BeatricaConfig::from_toml("[review]\ntop_k = 0\n")
            .unwrap_err()
            .to_string();
        assert!(err.contains("top_k"));
    }

    #[test]
    fn empty_model_falls_back_to_provider_default() {
        let config = LlmConfig {
            model: Some(String::new()),
            provider: LlmProvider::MistralAi,
            ..LlmConfig::default()
        };
        assert_eq!(config.model_name(), "mistral-large-latest");
    }

    #[test]
    fn api_key_resolution_order() {
        let env = |name: &str| match name {
            "LLM_API_KEY" => Some("generic".to_string()),
            "OPENAI_API_KEY" => Some("openai".to_string()),
            _ => None,
        };

        let explicit = LlmConfig {
            api_key: Some("explicit".into()),
            ..LlmConfig::default()
        };
        assert_eq!(explicit.resolve_api_key_with(env).as_deref(), Some("explicit"));

        let from_env = LlmConfig::default();
        assert_eq!(from_env.resolve_api_key_with(env).as_deref(), Some("generic"));

        let provider_only = |name: &str| {
            (name == "MISTRAL_API_KEY").then(|| "mistral".to_string())
        };
        let mistral = LlmConfig {
            provider: LlmProvider::MistralAi,
            ..LlmConfig::default()
        };
        assert_eq!(
            mistral.resolve_api_key_with(provider_only).as_deref(),
            Some("mistral")
        );
        assert!(mistral.resolve_api_key_with(|_| None).is_none());
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let config = LlmConfig {
            api_key: Some(String::new()),
            ..LlmConfig::default()
        };
        assert!(config.resolve_api_key_with(|_| None).is_none());
    }
}
