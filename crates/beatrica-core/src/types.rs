use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A single commit and the natural-language/diff description of its change.
///
/// Produced by the diff tracker and fed to the embedding index.
///
/// # Examples
///
/// ```
/// use beatrica_core::CommitChange;
///
/// let change = CommitChange::new("abc123", "renamed function foo to bar");
/// assert_eq!(change.commit_id, "abc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitChange {
    /// Commit identifier (hex SHA).
    pub commit_id: String,
    /// Commit summary followed by the unified patch.
    pub description: String,
}

impl CommitChange {
    /// Build a change from any string-like pair.
    pub fn new(commit_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            commit_id: commit_id.into(),
            description: description.into(),
        }
    }
}

/// A `(commit_id, change_description)` pair the LLM enumerated as a change.
///
/// Candidates are also the grouping key of the aggregated review.
///
/// # Examples
///
/// ```
/// use beatrica_core::ReviewCandidate;
///
/// let candidate = ReviewCandidate::new("abc123", "renamed foo");
/// assert_eq!(candidate.payload(), "abc123: renamed foo");
/// assert!(!candidate.is_placeholder());
///
/// let echo = ReviewCandidate::new("commit_hash1", "change 1 for commit_hash1");
/// assert!(echo.is_placeholder());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCandidate {
    /// Commit identifier as written by the LLM.
    pub commit_id: String,
    /// Change description as written by the LLM.
    pub change_description: String,
}

const PLACEHOLDER_ID: &str = "commit_hash";
const PLACEHOLDER_DESCRIPTION: &str = "commit\\_hash";

impl ReviewCandidate {
    /// Build a candidate from any string-like pair.
    pub fn new(commit_id: impl Into<String>, change_description: impl Into<String>) -> Self {
        Self {
            commit_id: commit_id.into(),
            change_description: change_description.into(),
        }
    }

    /// Returns `true` when the pair echoes the answer-format example
    /// instead of describing a real commit.
    ///
    /// Matches a commit id starting with `commit_hash` or a description
    /// starting with the markdown-escaped `commit\_hash`.
    pub fn is_placeholder(&self) -> bool {
        self.commit_id.starts_with(PLACEHOLDER_ID)
            || self.change_description.starts_with(PLACEHOLDER_DESCRIPTION)
    }

    /// The `"{commit_id}: {change_description}"` payload used by the
    /// per-change prompts.
    pub fn payload(&self) -> String {
        format!("{}: {}", self.commit_id, self.change_description)
    }
}

/// One review point produced for a reviewable candidate.
///
/// # Examples
///
/// ```
/// use beatrica_core::{ReviewCandidate, ReviewItem};
///
/// let item = ReviewItem {
///     change: ReviewCandidate::new("abc123", "renamed foo"),
///     review: "add docstring".into(),
/// };
/// assert_eq!(item.change.commit_id, "abc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    /// The change this point is about.
    pub change: ReviewCandidate,
    /// The review point text.
    pub review: String,
}

/// A display-ready row of the final report.
///
/// # Examples
///
/// ```
/// use beatrica_core::ReportRow;
///
/// let row = ReportRow {
///     commit_id: "abc123".into(),
///     change_description: "renamed foo".into(),
///     review: "looks good".into(),
/// };
/// assert_eq!(row.commit_id, "abc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    /// Commit identifier, or `"N/A"` when the LLM left it empty.
    pub commit_id: String,
    /// Change description with markup stripped.
    pub change_description: String,
    /// Aggregated review text, or the raw points joined with spaces.
    pub review: String,
}

/// Supported language model providers.
///
/// Both expose an OpenAI-compatible chat completions and embeddings API,
/// so they are interchangeable from the pipeline's point of view.
///
/// # Examples
///
/// ```
/// use beatrica_core::LlmProvider;
///
/// let provider: LlmProvider = "mistralai".parse().unwrap();
/// assert_eq!(provider, LlmProvider::MistralAi);
/// assert_eq!(provider.default_model(), "mistral-large-latest");
/// assert_eq!(format!("{}", LlmProvider::OpenAi), "openai");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmProvider {
    /// OpenAI.
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    /// Mistral AI.
    #[serde(rename = "mistralai")]
    MistralAi,
}

impl LlmProvider {
    /// Every provider, in CLI listing order.
    pub const ALL: [LlmProvider; 2] = [LlmProvider::OpenAi, LlmProvider::MistralAi];

    /// Chat model used when none is configured.
    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-4-0125-preview",
            LlmProvider::MistralAi => "mistral-large-latest",
        }
    }

    /// Embedding model used when none is configured.
    pub fn default_embedding_model(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "text-embedding-3-small",
            LlmProvider::MistralAi => "mistral-embed",
        }
    }

    /// API root (without trailing slash) used when no base URL is configured.
    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "https://api.openai.com/v1",
            LlmProvider::MistralAi => "https://api.mistral.ai/v1",
        }
    }

    /// Provider-specific API key environment variable.
    pub fn api_key_env(self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI_API_KEY",
            LlmProvider::MistralAi => "MISTRAL_API_KEY",
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmProvider::OpenAi => write!(f, "openai"),
            LlmProvider::MistralAi => write!(f, "mistralai"),
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "mistralai" | "mistral" => Ok(LlmProvider::MistralAi),
            other => Err(format!(
                "unsupported LLM type: {other} (expected openai or mistralai)"
            )),
        }
    }
}

/// Output format for console rendering.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use beatrica_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable table.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown table.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_detection_checks_id_prefix() {
        assert!(ReviewCandidate::new("commit_hash2", "real text").is_placeholder());
        assert!(ReviewCandidate::new("commit_hash", "").is_placeholder());
        assert!(!ReviewCandidate::new("abc123", "mentions commit_hash").is_placeholder());
    }

    #[test]
    fn placeholder_detection_checks_escaped_description() {
        let c = ReviewCandidate::new("abc123", "commit\\_hash1 change");
        assert!(c.is_placeholder());
        // Unescaped description alone is a real change text.
        let c = ReviewCandidate::new("abc123", "commit_hash1 change");
        assert!(!c.is_placeholder());
    }

    #[test]
    fn provider_from_str() {
        assert_eq!("openai".parse::<LlmProvider>().unwrap(), LlmProvider::OpenAi);
        assert_eq!(
            "MistralAI".parse::<LlmProvider>().unwrap(),
            LlmProvider::MistralAi
        );
        let err = "anthropic".parse::<LlmProvider>().unwrap_err();
        assert!(err.contains("unsupported"));
    }

    #[test]
    fn provider_serde_names() {
        let json = serde_json::to_string(&LlmProvider::MistralAi).unwrap();
        assert_eq!(json, "\"mistralai\"");
        let p: LlmProvider = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(p, LlmProvider::OpenAi);
    }

    #[test]
    fn provider_defaults() {
        assert_eq!(LlmProvider::OpenAi.default_model(), "gpt-4-0125-preview");
        assert_eq!(
            LlmProvider::MistralAi.default_base_url(),
            "https://api.mistral.ai/v1"
        );
        assert_eq!(LlmProvider::OpenAi.api_key_env(), "OPENAI_API_KEY");
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "markdown".parse::<OutputFormat>().unwrap(),
            OutputFormat::Markdown
        );
        assert!("sarif".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn report_row_serializes_camel_case() {
        let row = ReportRow {
            commit_id: "a".into(),
            change_description: "b".into(),
            review: "c".into(),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["commitId"], "a");
        assert_eq!(json["changeDescription"], "b");
    }
}
