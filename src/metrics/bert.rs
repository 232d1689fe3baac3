//! Embedding-based similarity in the style of BERTScore.
//!
//! Each text is split into tokens, every distinct token is embedded once,
//! and a pair of texts is scored by greedy matching: each candidate token
//! takes its best cosine similarity against the reference tokens
//! (precision) and vice versa (recall).
//!
//! Embeddings come from an [`Embedder`]. [`ProviderEmbedder`] adapts the
//! edgequake-llm embedding provider; tests use a deterministic stub.

use crate::error::ExternalServiceError;
use crate::metrics::rouge::tokenize;
use crate::metrics::Score;
use crate::pipeline::llm::GenerationError;
use edgequake_llm::EmbeddingProvider;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tokens sent per embedding call.
const EMBED_BATCH: usize = 128;

/// Anything that turns texts into vectors.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn embed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, ExternalServiceError>>;
}

/// [`Embedder`] backed by an edgequake-llm embedding provider.
pub struct ProviderEmbedder {
    name: String,
    provider: Arc<dyn EmbeddingProvider>,
}

impl ProviderEmbedder {
    pub fn new(name: impl Into<String>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
        }
    }
}

impl std::fmt::Debug for ProviderEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEmbedder")
            .field("name", &self.name)
            .field("provider", &"<dyn EmbeddingProvider>")
            .finish()
    }
}

impl Embedder for ProviderEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn embed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, ExternalServiceError>> {
        Box::pin(async move {
            self.provider.embed(texts).await.map_err(|e| {
                match GenerationError::from(e) {
                    GenerationError::Unauthorized(detail) => ExternalServiceError::AuthFailed {
                        provider: self.name.clone(),
                        detail,
                    },
                    GenerationError::Transient(last_error) => {
                        ExternalServiceError::RetriesExhausted {
                            attempts: 1,
                            last_error,
                        }
                    }
                    GenerationError::Permanent(detail) => ExternalServiceError::Rejected { detail },
                }
            })
        })
    }
}

/// Unit-length token vectors, shared by every pair scored in one run.
#[derive(Debug, Default)]
pub struct TokenVectors {
    vectors: HashMap<String, Vec<f32>>,
}

impl TokenVectors {
    /// Embed every distinct token of `texts`.
    pub async fn build(
        embedder: &dyn Embedder,
        texts: &[&str],
    ) -> Result<Self, ExternalServiceError> {
        let mut tokens: Vec<String> = texts.iter().flat_map(|t| tokenize(t)).collect();
        tokens.sort();
        tokens.dedup();

        let mut vectors = HashMap::with_capacity(tokens.len());
        for chunk in tokens.chunks(EMBED_BATCH) {
            let embedded = embedder.embed(chunk).await?;
            if embedded.len() != chunk.len() {
                return Err(ExternalServiceError::MalformedResponse {
                    detail: format!(
                        "{} returned {} embeddings for {} inputs",
                        embedder.name(),
                        embedded.len(),
                        chunk.len()
                    ),
                });
            }
            for (token, v) in chunk.iter().zip(embedded) {
                vectors.insert(token.clone(), normalize(v));
            }
        }
        debug!("embedded {} distinct tokens via {}", vectors.len(), embedder.name());
        Ok(Self { vectors })
    }

    fn lookup<'s>(&'s self, text: &str) -> Vec<&'s [f32]> {
        tokenize(text)
            .iter()
            .filter_map(|t| self.vectors.get(t).map(Vec::as_slice))
            .collect()
    }

    /// Greedy-matching precision, recall and F1 of `candidate` against
    /// `reference`.
    pub fn score(&self, candidate: &str, reference: &str) -> Score {
        let cand = self.lookup(candidate);
        let refs = self.lookup(reference);
        if cand.is_empty() || refs.is_empty() {
            return Score::default();
        }
        let precision = mean_best(&cand, &refs);
        let recall = mean_best(&refs, &cand);
        Score::from_precision_recall(precision, recall)
    }
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| f64::from(x * y)).sum()
}

fn mean_best(from: &[&[f32]], to: &[&[f32]]) -> f64 {
    let total: f64 = from
        .iter()
        .map(|a| to.iter().map(|b| dot(a, b)).fold(f64::MIN, f64::max))
        .sum();
    total / from.len() as f64
}

/// Score two single texts.
pub async fn bert_score(
    embedder: &dyn Embedder,
    candidate: &str,
    reference: &str,
) -> Result<Score, ExternalServiceError> {
    let vectors = TokenVectors::build(embedder, &[candidate, reference]).await?;
    Ok(vectors.score(candidate, reference))
}
