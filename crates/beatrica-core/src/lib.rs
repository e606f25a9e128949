//! Core types, configuration, and error handling for Beatrica.
//!
//! This crate provides the shared foundation used by all other Beatrica crates:
//! - [`BeatricaError`]: unified error type using `thiserror`
//! - [`BeatricaConfig`]: configuration loaded from `.beatrica.toml`
//! - Shared types: [`CommitChange`], [`ReviewCandidate`], [`ReviewItem`],
//!   [`ReportRow`], [`LlmProvider`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{
    BeatricaConfig, EmbeddingConfig, LlmConfig, PromptOverride, ReviewConfig, CONSOLE_OUTPUT,
    DEFAULT_BASE_BRANCH, DEFAULT_MAX_TOKENS, DEFAULT_OUTPUT_FILE,
};
pub use error::BeatricaError;
pub use types::{
    CommitChange, LlmProvider, OutputFormat, ReportRow, ReviewCandidate, ReviewItem,
};

/// A convenience `Result` type for Beatrica operations.
pub type Result<T> = std::result::Result<T, BeatricaError>;
