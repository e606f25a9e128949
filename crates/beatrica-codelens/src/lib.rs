//! Change indexing and retrieval for commit diffs.
//!
//! Splits commit changes into overlapping line windows, embeds them through
//! an OpenAI-compatible embeddings API, stores them in SQLite (FTS5 for
//! keyword search, BLOB vectors for similarity search), and retrieves the
//! most relevant windows with Reciprocal Rank Fusion.

pub mod chunker;
pub mod embedding;
pub mod search;
pub mod store;
