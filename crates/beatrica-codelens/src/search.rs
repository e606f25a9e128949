//! Hybrid search with Reciprocal Rank Fusion (RRF).
//!
//! Combines vector similarity and keyword search results using RRF scoring
//! for better retrieval quality than either method alone.

use std::collections::HashSet;

use beatrica_core::{BeatricaError, CommitChange};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::chunker::{change_hash, chunk_changes, ChangeChunk, ChunkOptions};
use crate::embedding::EmbeddingClient;
use crate::store::{ChangeIndex, IndexStats, SearchHit};

/// RRF constant.
const RRF_K: usize = 60;

/// A chunk returned to the retrieval chain.
///
/// # Examples
///
/// ```
/// use beatrica_codelens::search::RetrievedChunk;
///
/// let chunk = RetrievedChunk {
///     commit_id: "abc123".into(),
///     start_line: 1,
///     end_line: 4,
///     context_header: "# Commit: abc123".into(),
///     content: "+fn bar() {}".into(),
///     score: 0.03,
/// };
/// assert!(chunk.as_context().starts_with("# Commit: abc123"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedChunk {
    /// Commit the chunk belongs to.
    pub commit_id: String,
    /// First line of the window within the change description.
    pub start_line: u32,
    /// Last line of the window.
    pub end_line: u32,
    /// Commit / file context header.
    pub context_header: String,
    /// Window text.
    pub content: String,
    /// Fused RRF score.
    pub score: f64,
}

impl RetrievedChunk {
    /// Header and content, as placed in an LLM prompt.
    pub fn as_context(&self) -> String {
        format!("{}\n{}", self.context_header, self.content)
    }
}

impl From<RrfResult> for RetrievedChunk {
    fn from(item: RrfResult) -> Self {
        Self {
            commit_id: item.chunk.commit_id,
            start_line: item.chunk.start_line,
            end_line: item.chunk.end_line,
            context_header: item.chunk.context_header,
            content: item.chunk.content,
            score: item.score,
        }
    }
}

/// What an indexing pass has to do to bring the index up to date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPlan {
    /// Commits whose description is new or changed.
    pub to_index: Vec<CommitChange>,
    /// Commits already indexed with an identical description.
    pub unchanged: Vec<String>,
    /// Indexed commits absent from the current change set.
    pub stale: Vec<String>,
    /// The index was built with another embedding model or chunk sizing
    /// and must be cleared before `to_index` is stored.
    pub rebuild: bool,
}

/// Hybrid search engine combining vector and keyword search with RRF fusion.
///
/// # Examples
///
/// ```no_run
/// use beatrica_codelens::search::HybridSearch;
/// use beatrica_codelens::store::ChangeIndex;
/// use beatrica_codelens::embedding::EmbeddingClient;
///
/// let index = ChangeIndex::in_memory().unwrap();
/// let client = EmbeddingClient::new("https://api.openai.com/v1", "key", "text-embedding-3-small");
/// let search = HybridSearch::new(index, client);
/// ```
pub struct HybridSearch {
    index: ChangeIndex,
    embedding_client: EmbeddingClient,
    chunk_options: ChunkOptions,
}

impl HybridSearch {
    /// Create a new hybrid search engine with default chunk sizing.
    pub fn new(index: ChangeIndex, embedding_client: EmbeddingClient) -> Self {
        Self {
            index,
            embedding_client,
            chunk_options: ChunkOptions::default(),
        }
    }

    /// Use custom chunk sizing for subsequent indexing.
    pub fn with_chunk_options(mut self, options: ChunkOptions) -> Self {
        self.chunk_options = options;
        self
    }

    /// Access the underlying index.
    pub fn index(&self) -> &ChangeIndex {
        &self.index
    }

    /// Access the embedding client used for indexing and queries.
    pub fn embedding_client(&self) -> &EmbeddingClient {
        &self.embedding_client
    }

    /// Embedding endpoint, model and chunk sizing the stored vectors
    /// depend on.
    ///
    /// # Examples
    ///
    /// ```
    /// use beatrica_codelens::search::HybridSearch;
    /// use beatrica_codelens::store::ChangeIndex;
    /// use beatrica_codelens::embedding::EmbeddingClient;
    ///
    /// let index = ChangeIndex::in_memory().unwrap();
    /// let client = EmbeddingClient::new("http://localhost:8080", "key", "nomic-embed-text");
    /// let search = HybridSearch::new(index, client);
    /// assert_eq!(search.fingerprint(), "http://localhost:8080|nomic-embed-text|40|5");
    /// ```
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.embedding_client.base_url(),
            self.embedding_client.model(),
            self.chunk_options.max_lines,
            self.chunk_options.overlap
        )
    }

    /// Compare `changes` with what is already indexed.
    ///
    /// An index built under a different [`fingerprint`](Self::fingerprint)
    /// is planned for a full rebuild.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on query failure.
    pub fn plan(&self, changes: &[CommitChange]) -> Result<IndexPlan, BeatricaError> {
        let mut plan = IndexPlan::default();
        let current: HashSet<&str> = changes.iter().map(|c| c.commit_id.as_str()).collect();
        let indexed = self.index.indexed_commits()?;

        let fingerprint = self.fingerprint();
        plan.rebuild = !indexed.is_empty()
            && self.index.fingerprint()?.as_deref() != Some(fingerprint.as_str());

        for change in changes {
            let hash = change_hash(change);
            if !plan.rebuild
                && self.index.commit_hash(&change.commit_id)?.as_deref() == Some(hash.as_str())
            {
                plan.unchanged.push(change.commit_id.clone());
            } else {
                plan.to_index.push(change.clone());
            }
        }

        plan.stale = indexed
            .into_iter()
            .filter(|id| !current.contains(id.as_str()))
            .collect();

        Ok(plan)
    }

    /// Chunk, embed and store `changes`, skipping commits already indexed
    /// with the same description and dropping commits no longer present.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError`] if embedding or storage fails.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use beatrica_core::CommitChange;
    /// use beatrica_codelens::search::HybridSearch;
    /// use beatrica_codelens::store::ChangeIndex;
    /// use beatrica_codelens::embedding::EmbeddingClient;
    ///
    /// # async fn example() {
    /// let index = ChangeIndex::open(Path::new(".beatrica/index.db")).unwrap();
    /// let client = EmbeddingClient::new("https://api.openai.com/v1", "key", "text-embedding-3-small");
    /// let mut search = HybridSearch::new(index, client);
    /// let changes = vec![CommitChange::new("abc123", "rename foo\n\n-foo\n+bar")];
    /// let stats = search.index_changes(&changes).await.unwrap();
    /// println!("Indexed {} chunks from {} commits", stats.total_chunks, stats.total_commits);
    /// # }
    /// ```
    pub async fn index_changes(
        &mut self,
        changes: &[CommitChange],
    ) -> Result<IndexStats, BeatricaError> {
        let plan = self.plan(changes)?;
        tracing::debug!(
            new = plan.to_index.len(),
            unchanged = plan.unchanged.len(),
            stale = plan.stale.len(),
            rebuild = plan.rebuild,
            "index plan"
        );

        if plan.rebuild {
            tracing::info!(
                fingerprint = %self.fingerprint(),
                "embedding setup changed, rebuilding change index"
            );
            self.index.clear()?;
        } else {
            for commit_id in &plan.stale {
                self.index.remove_commit(commit_id)?;
            }
        }

        if plan.to_index.is_empty() {
            self.index.set_fingerprint(&self.fingerprint())?;
            return self.index.stats();
        }

        let chunks = chunk_changes(&plan.to_index, self.chunk_options);
        let texts: Vec<String> = chunks.iter().map(ChangeChunk::embedding_text).collect();
        let embeddings = self.embedding_client.embed_batch(&texts).await?;

        if let Some(first) = embeddings.first() {
            self.index.set_dimensions(first.len())?;
        }

        for change in &plan.to_index {
            self.index.remove_commit(&change.commit_id)?;
            self.index
                .record_commit(&change.commit_id, &change_hash(change))?;
        }

        let pairs: Vec<(ChangeChunk, Vec<f32>)> = chunks.into_iter().zip(embeddings).collect();
        self.index.insert_chunks(&pairs)?;
        self.index.set_fingerprint(&self.fingerprint())?;

        self.index.stats()
    }

    /// Search using hybrid retrieval (vector + keyword + RRF fusion).
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError`] if embedding or database queries fail.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, BeatricaError> {
        let query_embedding = self.embedding_client.embed_query(query).await?;
        self.search_by_vector(&query_embedding, query, limit)
    }

    /// Hybrid search with a precomputed query embedding.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] if a query fails or the query
    /// embedding does not match the dimensions the index was built with.
    pub fn search_by_vector(
        &self,
        query_embedding: &[f32],
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>, BeatricaError> {
        if let Some(dimensions) = self.index.get_dimensions()? {
            if dimensions != query_embedding.len() {
                return Err(BeatricaError::Database(format!(
                    "query embedding has {} dimensions but the index was built with {dimensions}; \
                     delete the cache directory to rebuild",
                    query_embedding.len()
                )));
            }
        }

        let fetch_count = limit.saturating_mul(2);

        let vector_results = self.index.vector_search(query_embedding, fetch_count)?;
        let keyword_results = self.index.keyword_search(query, fetch_count)?;

        Ok(
            reciprocal_rank_fusion(&vector_results, &keyword_results, RRF_K)
                .into_iter()
                .take(limit)
                .map(RetrievedChunk::from)
                .collect(),
        )
    }
}

/// RRF result with combined score and chunk data.
#[derive(Debug, Clone)]
pub struct RrfResult {
    /// The change chunk.
    pub chunk: ChangeChunk,
    /// RRF combined score.
    pub score: f64,
}

/// Combine vector and keyword search results using Reciprocal Rank Fusion.
///
/// Ties keep first-seen order (vector hits before keyword hits).
///
/// # Examples
///
/// ```
/// use beatrica_codelens::search::reciprocal_rank_fusion;
///
/// let results = reciprocal_rank_fusion(&[], &[], 60);
/// assert!(results.is_empty());
/// ```
pub fn reciprocal_rank_fusion(
    vector_results: &[SearchHit],
    keyword_results: &[SearchHit],
    k: usize,
) -> Vec<RrfResult> {
    let mut fused: IndexMap<&str, RrfResult> = IndexMap::new();

    for list in [vector_results, keyword_results] {
        for (rank, hit) in list.iter().enumerate() {
            let contribution = 1.0 / (k as f64 + rank as f64 + 1.0);
            fused
                .entry(hit.chunk.content_hash.as_str())
                .or_insert_with(|| RrfResult {
                    chunk: hit.chunk.clone(),
                    score: 0.0,
                })
                .score += contribution;
        }
    }

    let mut results: Vec<RrfResult> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    results
}
