//! SQLite + FTS5 storage for change chunks and embeddings.
//!
//! Chunks live in SQLite with an FTS5 mirror for keyword search and BLOBs
//! for vector embeddings. Cosine similarity is computed in Rust.

use std::path::Path;

use beatrica_core::BeatricaError;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::chunker::ChangeChunk;

/// A hit from a search operation.
///
/// # Examples
///
/// ```
/// use beatrica_codelens::store::{SearchHit, SearchSource};
/// use beatrica_codelens::chunker::ChangeChunk;
///
/// let hit = SearchHit {
///     chunk: ChangeChunk {
///         commit_id: "abc123".into(),
///         chunk_index: 0,
///         start_line: 1,
///         end_line: 5,
///         content: "+fn main() {}".into(),
///         context_header: "# Commit: abc123".into(),
///         content_hash: "h".into(),
///     },
///     score: 0.95,
///     source: SearchSource::Vector,
/// };
/// assert!(hit.score > 0.9);
/// ```
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched chunk (without embedding).
    pub chunk: ChangeChunk,
    /// Relevance score.
    pub score: f64,
    /// Whether this hit came from vector or keyword search.
    pub source: SearchSource,
}

/// Source of a search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSource {
    /// Result from vector similarity search.
    Vector,
    /// Result from FTS5 keyword search.
    Keyword,
}

/// Index statistics.
///
/// # Examples
///
/// ```
/// use beatrica_codelens::store::IndexStats;
///
/// let stats = IndexStats {
///     total_chunks: 12,
///     total_commits: 3,
///     index_size_bytes: 50000,
/// };
/// assert_eq!(stats.total_commits, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Total number of chunks in the index.
    pub total_chunks: usize,
    /// Total number of commits indexed.
    pub total_commits: usize,
    /// Size of the index database in bytes.
    pub index_size_bytes: u64,
}

/// SQLite-based change index with FTS5 keyword search and BLOB-stored embeddings.
///
/// # Examples
///
/// ```
/// use beatrica_codelens::store::ChangeIndex;
///
/// let index = ChangeIndex::in_memory().unwrap();
/// let stats = index.stats().unwrap();
/// assert_eq!(stats.total_chunks, 0);
/// ```
pub struct ChangeIndex {
    conn: Connection,
}

const CHUNK_COLUMNS: &str =
    "c.commit_id, c.chunk_index, c.start_line, c.end_line, c.content, c.context_header, c.content_hash";

impl ChangeIndex {
    /// Open or create an index database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, BeatricaError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BeatricaError::Database(format!("failed to create index directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| BeatricaError::Database(format!("failed to open database: {e}")))?;

        let index = Self { conn };
        index.init_schema()?;
        Ok(index)
    }

    /// Create an in-memory index.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, BeatricaError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            BeatricaError::Database(format!("failed to create in-memory database: {e}"))
        })?;

        let index = Self { conn };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<(), BeatricaError> {
        self.conn
            .execute_batch(
                "
                PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS commits (
                    commit_id TEXT PRIMARY KEY,
                    change_hash TEXT NOT NULL,
                    indexed_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS chunks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    commit_id TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    start_line INTEGER NOT NULL,
                    end_line INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    context_header TEXT NOT NULL,
                    content_hash TEXT NOT NULL UNIQUE,
                    embedding BLOB,
                    FOREIGN KEY (commit_id) REFERENCES commits(commit_id) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS chunks_commit ON chunks(commit_id);

                CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                    content, context_header,
                    content='chunks', content_rowid='id'
                );

                CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                    INSERT INTO chunks_fts(rowid, content, context_header)
                    VALUES (new.id, new.content, new.context_header);
                END;

                CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
                    INSERT INTO chunks_fts(chunks_fts, rowid, content, context_header)
                    VALUES ('delete', old.id, old.content, old.context_header);
                END;

                CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
                    INSERT INTO chunks_fts(chunks_fts, rowid, content, context_header)
                    VALUES ('delete', old.id, old.content, old.context_header);
                    INSERT INTO chunks_fts(rowid, content, context_header)
                    VALUES (new.id, new.content, new.context_header);
                END;
                ",
            )
            .map_err(|e| BeatricaError::Database(format!("failed to create schema: {e}")))?;

        Ok(())
    }

    /// Store embedding dimensions in the metadata table.
    ///
    /// A no-op when the stored value matches.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] if dimensions conflict with an
    /// existing index.
    pub fn set_dimensions(&self, dimensions: usize) -> Result<(), BeatricaError> {
        if let Some(stored) = self.get_dimensions()? {
            if stored != dimensions {
                return Err(BeatricaError::Database(format!(
                    "index was created with {stored} dimensions but the embedding model returned {dimensions}; \
                     delete the cache directory to rebuild"
                )));
            }
            return Ok(());
        }

        self.set_metadata("embedding_dimensions", &dimensions.to_string())
    }

    /// Get embedding dimensions stored in metadata, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on query failure or corrupt metadata.
    pub fn get_dimensions(&self) -> Result<Option<usize>, BeatricaError> {
        match self.get_metadata("embedding_dimensions")? {
            Some(v) => v.parse().map(Some).map_err(|_| {
                BeatricaError::Database(format!("corrupted dimension metadata in index: '{v}'"))
            }),
            None => Ok(None),
        }
    }

    /// Identity of the embedding setup the stored vectors were built with.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on query failure.
    pub fn fingerprint(&self) -> Result<Option<String>, BeatricaError> {
        self.get_metadata("index_fingerprint")
    }

    /// Store the embedding setup identity, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on write failure.
    pub fn set_fingerprint(&self, fingerprint: &str) -> Result<(), BeatricaError> {
        self.set_metadata("index_fingerprint", fingerprint)
    }

    /// Drop every commit and chunk along with the pinned dimensions and
    /// fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on delete failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use beatrica_codelens::store::ChangeIndex;
    ///
    /// let index = ChangeIndex::in_memory().unwrap();
    /// index.set_dimensions(3).unwrap();
    /// index.clear().unwrap();
    /// assert_eq!(index.get_dimensions().unwrap(), None);
    /// ```
    pub fn clear(&self) -> Result<(), BeatricaError> {
        self.conn
            .execute_batch(
                "DELETE FROM chunks;
                 DELETE FROM commits;
                 DELETE FROM metadata WHERE key IN ('embedding_dimensions', 'index_fingerprint');",
            )
            .map_err(|e| BeatricaError::Database(format!("failed to clear index: {e}")))
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>, BeatricaError> {
        let result = self.conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BeatricaError::Database(format!(
                "failed to get metadata '{key}': {e}"
            ))),
        }
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<(), BeatricaError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| BeatricaError::Database(format!("failed to set metadata '{key}': {e}")))?;
        Ok(())
    }

    /// Record a commit as indexed with the hash of its description.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on insert failure.
    pub fn record_commit(&self, commit_id: &str, change_hash: &str) -> Result<(), BeatricaError> {
        let now = chrono::Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO commits (commit_id, change_hash, indexed_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(commit_id) DO UPDATE SET change_hash = ?2, indexed_at = ?3",
                params![commit_id, change_hash, now],
            )
            .map_err(|e| BeatricaError::Database(format!("failed to record commit: {e}")))?;

        Ok(())
    }

    /// Get the stored description hash for a commit, if it has been indexed.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on query failure.
    pub fn commit_hash(&self, commit_id: &str) -> Result<Option<String>, BeatricaError> {
        let result = self.conn.query_row(
            "SELECT change_hash FROM commits WHERE commit_id = ?1",
            params![commit_id],
            |row| row.get(0),
        );

        match result {
            Ok(hash) => Ok(Some(hash)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BeatricaError::Database(format!(
                "failed to get commit hash: {e}"
            ))),
        }
    }

    /// Remove a commit and all its chunks.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on delete failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use beatrica_codelens::store::ChangeIndex;
    ///
    /// let index = ChangeIndex::in_memory().unwrap();
    /// index.remove_commit("abc123").unwrap();
    /// ```
    pub fn remove_commit(&self, commit_id: &str) -> Result<(), BeatricaError> {
        self.conn
            .execute("DELETE FROM chunks WHERE commit_id = ?1", params![commit_id])
            .map_err(|e| BeatricaError::Database(format!("failed to delete chunks: {e}")))?;

        self.conn
            .execute("DELETE FROM commits WHERE commit_id = ?1", params![commit_id])
            .map_err(|e| BeatricaError::Database(format!("failed to delete commit record: {e}")))?;

        Ok(())
    }

    /// Get all indexed commit ids.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on query failure.
    pub fn indexed_commits(&self) -> Result<Vec<String>, BeatricaError> {
        let mut stmt = self
            .conn
            .prepare("SELECT commit_id FROM commits ORDER BY commit_id")
            .map_err(|e| BeatricaError::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| BeatricaError::Database(format!("failed to query commits: {e}")))?;

        rows.collect::<Result<Vec<String>, _>>()
            .map_err(|e| BeatricaError::Database(format!("failed to read row: {e}")))
    }

    /// Store a chunk with its embedding. The commit must be recorded first.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on insert failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use beatrica_codelens::store::ChangeIndex;
    /// use beatrica_codelens::chunker::ChangeChunk;
    ///
    /// let index = ChangeIndex::in_memory().unwrap();
    /// index.record_commit("abc123", "change_hash").unwrap();
    /// let chunk = ChangeChunk {
    ///     commit_id: "abc123".into(),
    ///     chunk_index: 0,
    ///     start_line: 1, end_line: 3,
    ///     content: "+fn main() {}".into(),
    ///     context_header: "# Commit: abc123".into(),
    ///     content_hash: "h1".into(),
    /// };
    /// index.insert_chunk(&chunk, &[0.1, 0.2, 0.3]).unwrap();
    /// assert!(index.has_chunk("h1").unwrap());
    /// ```
    pub fn insert_chunk(&self, chunk: &ChangeChunk, embedding: &[f32]) -> Result<(), BeatricaError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO chunks
                 (commit_id, chunk_index, start_line, end_line, content, context_header,
                  content_hash, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    chunk.commit_id,
                    chunk.chunk_index,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.content,
                    chunk.context_header,
                    chunk.content_hash,
                    floats_to_bytes(embedding),
                ],
            )
            .map_err(|e| BeatricaError::Database(format!("failed to insert chunk: {e}")))?;

        Ok(())
    }

    /// Insert chunks with embeddings inside one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on insert failure; nothing is
    /// written in that case.
    pub fn insert_chunks(&mut self, chunks: &[(ChangeChunk, Vec<f32>)]) -> Result<(), BeatricaError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| BeatricaError::Database(format!("failed to begin transaction: {e}")))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO chunks
                     (commit_id, chunk_index, start_line, end_line, content, context_header,
                      content_hash, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(|e| BeatricaError::Database(format!("failed to prepare insert: {e}")))?;
            for (chunk, embedding) in chunks {
                stmt.execute(params![
                    chunk.commit_id,
                    chunk.chunk_index,
                    chunk.start_line,
                    chunk.end_line,
                    chunk.content,
                    chunk.context_header,
                    chunk.content_hash,
                    floats_to_bytes(embedding),
                ])
                .map_err(|e| BeatricaError::Database(format!("failed to insert chunk: {e}")))?;
            }
        }
        tx.commit()
            .map_err(|e| BeatricaError::Database(format!("failed to commit chunks: {e}")))
    }

    /// Vector similarity search (cosine similarity computed in Rust).
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on query failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use beatrica_codelens::store::ChangeIndex;
    ///
    /// let index = ChangeIndex::in_memory().unwrap();
    /// let results = index.vector_search(&[0.1, 0.2], 5).unwrap();
    /// assert!(results.is_empty());
    /// ```
    pub fn vector_search(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, BeatricaError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS}, c.embedding FROM chunks c WHERE c.embedding IS NOT NULL"
            ))
            .map_err(|e| BeatricaError::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let embedding_bytes: Vec<u8> = row.get(7)?;
                let score = cosine_similarity(query_embedding, &bytes_to_floats(&embedding_bytes));
                Ok((score, chunk_from_row(row)?))
            })
            .map_err(|e| BeatricaError::Database(format!("failed to query chunks: {e}")))?;

        let mut scored = rows
            .collect::<Result<Vec<(f64, ChangeChunk)>, _>>()
            .map_err(|e| BeatricaError::Database(format!("failed to read row: {e}")))?;

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(score, chunk)| SearchHit {
                chunk,
                score,
                source: SearchSource::Vector,
            })
            .collect())
    }

    /// Full-text keyword search via FTS5.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on query failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use beatrica_codelens::store::ChangeIndex;
    ///
    /// let index = ChangeIndex::in_memory().unwrap();
    /// let results = index.keyword_search("rename", 5).unwrap();
    /// assert!(results.is_empty());
    /// ```
    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, BeatricaError> {
        let safe_query = sanitize_fts_query(query);
        if safe_query.is_empty() {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS}, rank
                 FROM chunks_fts f
                 JOIN chunks c ON c.id = f.rowid
                 WHERE chunks_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2"
            ))
            .map_err(|e| BeatricaError::Database(format!("failed to prepare FTS query: {e}")))?;

        let rows = stmt
            .query_map(params![safe_query, limit as i64], |row| {
                let rank: f64 = row.get(7)?;
                // FTS5 rank is negative, more negative is more relevant
                Ok(((-rank).max(0.0), chunk_from_row(row)?))
            })
            .map_err(|e| BeatricaError::Database(format!("FTS query failed: {e}")))?;

        let hits = rows
            .collect::<Result<Vec<(f64, ChangeChunk)>, _>>()
            .map_err(|e| BeatricaError::Database(format!("failed to read FTS row: {e}")))?;

        Ok(hits
            .into_iter()
            .map(|(score, chunk)| SearchHit {
                chunk,
                score,
                source: SearchSource::Keyword,
            })
            .collect())
    }

    /// Check if a chunk with this `content_hash` already exists.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on query failure.
    pub fn has_chunk(&self, content_hash: &str) -> Result<bool, BeatricaError> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .map_err(|e| BeatricaError::Database(format!("failed to check chunk: {e}")))?;

        Ok(count > 0)
    }

    /// Get index statistics.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Database`] on query failure.
    pub fn stats(&self) -> Result<IndexStats, BeatricaError> {
        let total_chunks: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| BeatricaError::Database(format!("failed to count chunks: {e}")))?;

        let total_commits: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM commits", [], |row| row.get(0))
            .map_err(|e| BeatricaError::Database(format!("failed to count commits: {e}")))?;

        let page_count: i64 = self
            .conn
            .query_row("PRAGMA page_count", [], |row| row.get(0))
            .unwrap_or(0);
        let page_size: i64 = self
            .conn
            .query_row("PRAGMA page_size", [], |row| row.get(0))
            .unwrap_or(4096);

        Ok(IndexStats {
            total_chunks: total_chunks as usize,
            total_commits: total_commits as usize,
            index_size_bytes: (page_count * page_size) as u64,
        })
    }
}

/// Remove the index database and its SQLite side files, then the
/// containing directory if it is left empty.
///
/// A missing database is not an error.
///
/// # Errors
///
/// Returns [`BeatricaError::Io`] if a file exists but cannot be removed.
///
/// # Examples
///
/// ```
/// use beatrica_codelens::store::delete_cache;
///
/// let dir = std::env::temp_dir().join("beatrica-doc-missing-cache");
/// delete_cache(&dir.join("index.db")).unwrap();
/// ```
pub fn delete_cache(db_path: &Path) -> Result<(), BeatricaError> {
    let mut candidates = vec![db_path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = db_path.as_os_str().to_owned();
        name.push(suffix);
        candidates.push(name.into());
    }

    for path in candidates {
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed cache file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(dir) = db_path.parent() {
        let is_empty = std::fs::read_dir(dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            std::fs::remove_dir(dir)?;
        }
    }

    Ok(())
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<ChangeChunk> {
    Ok(ChangeChunk {
        commit_id: row.get(0)?,
        chunk_index: row.get(1)?,
        start_line: row.get(2)?,
        end_line: row.get(3)?,
        content: row.get(4)?,
        context_header: row.get(5)?,
        content_hash: row.get(6)?,
    })
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    floats.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    dot / denom
}

/// Quote each word so FTS5 operators in diff text are matched literally.
fn sanitize_fts_query(query: &str) -> String {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{w}\""))
        .collect();
    words.join(" OR ")
}
