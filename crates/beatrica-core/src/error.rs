use std::path::PathBuf;

/// Errors that can occur across Beatrica.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary renders it through `miette` at the boundary.
///
/// # Examples
///
/// ```
/// use beatrica_core::BeatricaError;
///
/// let err = BeatricaError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum BeatricaError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(
        code(beatrica::config),
        help("check .beatrica.toml and the LLM_API_KEY environment variable")
    )]
    Config(String),

    /// Git operation failure.
    #[error("git error: {0}")]
    #[diagnostic(code(beatrica::git))]
    Git(String),

    /// LLM API or response error.
    #[error("LLM error: {0}")]
    #[diagnostic(code(beatrica::llm))]
    Llm(String),

    /// Embedding API failure.
    #[error("embedding error: {0}")]
    #[diagnostic(code(beatrica::embedding))]
    Embedding(String),

    /// Change index (SQLite) failure.
    #[error("database error: {0}")]
    #[diagnostic(code(beatrica::database))]
    Database(String),

    /// A prompt template or extraction pattern is invalid.
    #[error("prompt error: {0}")]
    #[diagnostic(code(beatrica::prompt))]
    Prompt(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BeatricaError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = BeatricaError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn file_not_found_shows_path() {
        let err = BeatricaError::FileNotFound(PathBuf::from("/tmp/missing.txt"));
        assert!(err.to_string().contains("/tmp/missing.txt"));
    }

    #[test]
    fn config_error_carries_help() {
        use miette::Diagnostic;

        let err = BeatricaError::Config("no key".into());
        let help = err.help().map(|h| h.to_string()).unwrap_or_default();
        assert!(help.contains("LLM_API_KEY"));
    }
}
