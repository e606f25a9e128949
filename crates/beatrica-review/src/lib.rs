//! LLM review loop over indexed commit changes.
//!
//! Provides the chat client, the stage prompts and their answer
//! extraction, the retrieval chain that grounds each question in the
//! change index, the four-stage review orchestrator, and report rendering.

pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod rag;
pub mod report;
