//! Retrieval-augmented question answering over the indexed commit changes.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use beatrica_codelens::chunker::ChunkOptions;
use beatrica_codelens::embedding::EmbeddingClient;
use beatrica_codelens::search::HybridSearch;
use beatrica_codelens::store::{self, ChangeIndex, IndexStats};
use beatrica_core::{BeatricaError, CommitChange};

use crate::llm::{ChatMessage, LlmClient};

const SYSTEM_PROMPT: &str = "\
Answer the user's question based only on the provided context. \
The context holds fragments of git commits: each fragment starts with the \
commit hash it belongs to, followed by the commit summary and the unified diff.

<context>
{context}
</context>";

/// An LLM answer together with the context it was given.
///
/// # Examples
///
/// ```
/// use beatrica_review::rag::Answer;
///
/// let answer = Answer::new("<review>1</review>");
/// assert!(answer.context.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answer {
    /// Raw answer text.
    pub answer: String,
    /// Retrieved fragments placed in the prompt.
    pub context: Vec<String>,
}

impl Answer {
    /// An answer without recorded context.
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            context: Vec::new(),
        }
    }
}

/// Answers questions about the changes under review.
///
/// The review pipeline only depends on this trait, so tests can script
/// answers without an index or network access.
#[async_trait]
pub trait RetrievalEngine: Send + Sync {
    /// Answer `question` using the indexed changes as context.
    async fn answer(&self, question: &str) -> Result<Answer, BeatricaError>;
}

/// Hybrid search over a SQLite change index feeding an LLM.
///
/// The query is embedded before the index lock is taken; the lock is only
/// held for the synchronous SQLite lookups.
pub struct RetrievalChain {
    search: Mutex<HybridSearch>,
    embedder: EmbeddingClient,
    llm: LlmClient,
    top_k: usize,
    cache_path: Option<PathBuf>,
}

impl RetrievalChain {
    /// Wrap an already populated search engine.
    pub fn new(search: HybridSearch, llm: LlmClient, top_k: usize) -> Self {
        Self {
            embedder: search.embedding_client().clone(),
            search: Mutex::new(search),
            llm,
            top_k: top_k.max(1),
            cache_path: None,
        }
    }

    /// Index `changes` into the database at `cache_path` and return a
    /// chain ready to answer questions, plus the index statistics.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] if the index cannot be opened and
    /// [`BeatricaError::Embedding`] if embedding the changes fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use beatrica_core::{CommitChange, LlmConfig};
    /// use beatrica_codelens::chunker::ChunkOptions;
    /// use beatrica_codelens::embedding::EmbeddingClient;
    /// use beatrica_review::llm::LlmClient;
    /// use beatrica_review::rag::RetrievalChain;
    ///
    /// # async fn example() {
    /// let llm = LlmClient::new(&LlmConfig::default()).unwrap();
    /// let embedding = EmbeddingClient::new("https://api.openai.com/v1", "key", "text-embedding-3-small");
    /// let changes = vec![CommitChange::new("abc123", "renamed function foo to bar")];
    /// let (chain, stats) = RetrievalChain::build(
    ///     &changes,
    ///     llm,
    ///     embedding,
    ///     Path::new(".beatrica/index.db"),
    ///     6,
    ///     ChunkOptions::default(),
    /// )
    /// .await
    /// .unwrap();
    /// println!("{} chunks indexed", stats.total_chunks);
    /// # }
    /// ```
    pub async fn build(
        changes: &[CommitChange],
        llm: LlmClient,
        embedding: EmbeddingClient,
        cache_path: &Path,
        top_k: usize,
        chunk_options: ChunkOptions,
    ) -> Result<(Self, IndexStats), BeatricaError> {
        let index = ChangeIndex::open(cache_path)?;
        let mut search = HybridSearch::new(index, embedding).with_chunk_options(chunk_options);
        let stats = search.index_changes(changes).await?;
        tracing::debug!(
            chunks = stats.total_chunks,
            commits = stats.total_commits,
            path = %cache_path.display(),
            "change index ready"
        );

        let mut chain = Self::new(search, llm, top_k);
        chain.cache_path = Some(cache_path.to_path_buf());
        Ok((chain, stats))
    }

    /// Close the index and remove its database file.
    ///
    /// A chain built with [`new`](Self::new) has no cache file and this is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Io`] if the file cannot be removed.
    pub fn delete_cache(self) -> Result<(), BeatricaError> {
        let Self {
            search, cache_path, ..
        } = self;
        drop(search);

        match cache_path {
            Some(path) => store::delete_cache(&path),
            None => Ok(()),
        }
    }
}

/// System prompt with the retrieved fragments stuffed in.
fn stuff_context(fragments: &[String]) -> String {
    SYSTEM_PROMPT.replace("{context}", &fragments.join("\n\n"))
}

#[async_trait]
impl RetrievalEngine for RetrievalChain {
    async fn answer(&self, question: &str) -> Result<Answer, BeatricaError> {
        let query_embedding = self.embedder.embed_query(question).await?;
        let context: Vec<String> = {
            let search = self
                .search
                .lock()
                .map_err(|_| BeatricaError::Database("change index lock poisoned".into()))?;
            search
                .search_by_vector(&query_embedding, question, self.top_k)?
                .iter()
                .map(|chunk| chunk.as_context())
                .collect()
        };
        tracing::debug!(fragments = context.len(), "retrieved context");

        let messages = vec![
            ChatMessage::system(stuff_context(&context)),
            ChatMessage::user(question),
        ];
        let answer = self.llm.chat(messages).await?;

        Ok(Answer { answer, context })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatrica_core::LlmConfig;

    #[test]
    fn context_is_stuffed_into_system_prompt() {
        let prompt = stuff_context(&[
            "# Commit: abc\n+fn bar() {}".to_string(),
            "# Commit: def\n-fn foo() {}".to_string(),
        ]);
        assert!(prompt.contains("<context>\n# Commit: abc\n+fn bar() {}\n\n# Commit: def"));
        assert!(!prompt.contains("{context}"));
    }

    #[test]
    fn empty_context_still_renders() {
        let prompt = stuff_context(&[]);
        assert!(prompt.contains("<context>\n\n</context>"));
    }

    #[test]
    fn delete_cache_removes_index_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".beatrica").join("index.db");
        let search = HybridSearch::new(
            ChangeIndex::open(&path).unwrap(),
            EmbeddingClient::new("http://127.0.0.1:9", "key", "model"),
        );
        let llm = LlmClient::new(&LlmConfig {
            api_key: Some("key".into()),
            ..LlmConfig::default()
        })
        .unwrap();

        let mut chain = RetrievalChain::new(search, llm, 4);
        chain.cache_path = Some(path.clone());
        assert!(path.exists());

        chain.delete_cache().unwrap();
        assert!(!path.exists());
        assert!(!tmp.path().join(".beatrica").exists());
    }
}
