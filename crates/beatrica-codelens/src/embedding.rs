//! OpenAI-compatible embeddings client.
//!
//! Both supported providers expose `POST <base>/embeddings` with the same
//! request and response shape, so a single client covers them.

use beatrica_core::{BeatricaError, EmbeddingConfig, LlmConfig};
use serde::{Deserialize, Serialize};

/// Client for an OpenAI-compatible embeddings endpoint.
///
/// # Examples
///
/// ```
/// use beatrica_codelens::embedding::EmbeddingClient;
///
/// let client = EmbeddingClient::new("https://api.openai.com/v1/", "test-key", "text-embedding-3-small");
/// assert_eq!(client.model(), "text-embedding-3-small");
/// assert_eq!(client.base_url(), "https://api.openai.com/v1");
/// ```
#[derive(Clone)]
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

const BATCH_SIZE: usize = 64;
const BATCH_DELAY_MS: u64 = 200;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    /// Create a client for an explicit endpoint, key and model.
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create a client from the embedding section, falling back to the
    /// LLM section for the key, base URL and provider default model.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Config`] if no API key is available.
    ///
    /// # Examples
    ///
    /// ```
    /// use beatrica_core::{EmbeddingConfig, LlmConfig, LlmProvider};
    /// use beatrica_codelens::embedding::EmbeddingClient;
    ///
    /// let llm = LlmConfig {
    ///     provider: LlmProvider::MistralAi,
    ///     api_key: Some("key".into()),
    ///     ..LlmConfig::default()
    /// };
    /// let client = EmbeddingClient::with_config(&EmbeddingConfig::default(), &llm).unwrap();
    /// assert_eq!(client.model(), "mistral-embed");
    /// assert_eq!(client.base_url(), "https://api.mistral.ai/v1");
    /// ```
    pub fn with_config(config: &EmbeddingConfig, llm: &LlmConfig) -> Result<Self, BeatricaError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| llm.resolve_api_key())
            .ok_or_else(|| {
                BeatricaError::Config(format!(
                    "embedding API key not found: set embedding.api_key in .beatrica.toml, LLM_API_KEY or {}",
                    llm.provider.api_key_env()
                ))
            })?;

        let base_url = config.base_url.as_deref().unwrap_or_else(|| llm.base_url());
        let model = config
            .model
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| llm.provider.default_embedding_model());

        Ok(Self::new(base_url, &api_key, model))
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the API root.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Embed a batch of texts. Returns vectors in the same order.
    ///
    /// Splits into sub-batches of 64 with 200ms delays for rate limiting.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Embedding`] if an API call fails or returns
    /// a different number of vectors than requested.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use beatrica_codelens::embedding::EmbeddingClient;
    ///
    /// # async fn example() {
    /// let client = EmbeddingClient::new("https://api.openai.com/v1", "key", "text-embedding-3-small");
    /// let texts = vec!["+fn main() {}".to_string()];
    /// let embeddings = client.embed_batch(&texts).await.unwrap();
    /// assert_eq!(embeddings.len(), 1);
    /// # }
    /// ```
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BeatricaError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            if i > 0 {
                tokio::time::sleep(tokio::time::Duration::from_millis(BATCH_DELAY_MS)).await;
            }
            tracing::debug!(batch = i, size = batch.len(), "embedding batch");

            let vectors = self.request(batch).await?;
            if vectors.len() != batch.len() {
                return Err(BeatricaError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            all_embeddings.extend(vectors);
        }

        Ok(all_embeddings)
    }

    /// Embed a single query.
    ///
    /// # Errors
    ///
    /// Returns [`BeatricaError::Embedding`] if the API call fails.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, BeatricaError> {
        self.request(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BeatricaError::Embedding("empty response from embeddings API".into()))
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, BeatricaError> {
        let request = EmbedRequest {
            model: &self.model,
            input,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| BeatricaError::Embedding(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(BeatricaError::Embedding(format!(
                "embeddings API returned {status}: {body}"
            )));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| BeatricaError::Embedding(format!("failed to parse response: {e}")))?;

        Ok(into_ordered(embed_response))
    }
}

/// Vectors in input order; the API may return items out of order.
fn into_ordered(response: EmbedResponse) -> Vec<Vec<f32>> {
    let mut items = response.data;
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }
    items.into_iter().map(|item| item.embedding).collect()
}
