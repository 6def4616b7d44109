//! Cache-aware embedding client.
//!
//! [`EmbeddingClient::get_embeddings`] resolves a list of texts to
//! vectors in input order:
//!
//! 1. every text is keyed with `content_key(model, text)` and looked up in
//!    the [`EmbeddingCache`];
//! 2. the misses are de-duplicated and split into sub-batches no larger
//!    than `min(batch_size, provider.max_batch_size())`;
//! 3. sub-batches go to the provider through the [`RetryPolicy`], up to
//!    `concurrency` at a time, and each completed sub-batch is stored in
//!    the cache before the next result is consumed;
//! 4. the cache is persisted every `persist_every` completed sub-batches
//!    and once more when the call ends;
//! 5. the output is reassembled from cached and fresh vectors.
//!
//! A sub-batch that fails after retries fails the whole call. Vectors
//! from sub-batches that completed before the failure are persisted
//! before the error is returned.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info};

use citation_drift_core::embedding::content_key;

use super::{EmbeddingCache, EmbeddingProvider, ProviderError, RetryPolicy};
use crate::progress::{NoProgress, Phase, ProgressEvent, ProgressReporter};

/// Counters accumulated over the client's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    /// Inputs answered from the cache.
    pub cache_hits: u64,
    /// Distinct texts that had to be sent to the provider.
    pub cache_misses: u64,
    pub provider_calls: u64,
    pub retries: u64,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    provider_calls: AtomicU64,
    retries: AtomicU64,
}

pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    retry: RetryPolicy,
    batch_size: usize,
    concurrency: usize,
    persist_every: usize,
    counters: Counters,
}

impl EmbeddingClient {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            cache,
            retry,
            batch_size: 64,
            concurrency: 4,
            persist_every: 16,
            counters: Counters::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_persist_every(mut self, sub_batches: usize) -> Self {
        self.persist_every = sub_batches.max(1);
        self
    }

    pub fn model(&self) -> &str {
        self.provider.model_name()
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            provider_calls: self.counters.provider_calls.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }

    /// Embed one text.
    pub async fn get_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.get_embeddings(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }

    /// Embed many texts; output order matches input order.
    pub async fn get_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.get_embeddings_with_progress(texts, &NoProgress).await
    }

    pub async fn get_embeddings_with_progress(
        &self,
        texts: &[String],
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.provider.model_name();
        let keys: Vec<String> = texts.iter().map(|t| content_key(model, t)).collect();
        let cached = self.cache.get_many(keys.iter().map(String::as_str))?;

        // Distinct misses in first-occurrence order.
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut hits = 0u64;
        for ((key, text), hit) in keys.iter().zip(texts).zip(&cached) {
            if hit.is_some() {
                hits += 1;
            } else if seen.insert(key.as_str()) {
                pending.push((key.clone(), text.clone()));
            }
        }
        self.counters.cache_hits.fetch_add(hits, Ordering::Relaxed);
        self.counters
            .cache_misses
            .fetch_add(pending.len() as u64, Ordering::Relaxed);
        debug!(
            total = texts.len(),
            hits,
            misses = pending.len(),
            "embedding cache lookup"
        );

        let total = pending.len() as u64;
        let mut fresh: HashMap<String, Vec<f32>> = HashMap::with_capacity(pending.len());
        if !pending.is_empty() {
            let limit = self.batch_size.min(self.provider.max_batch_size()).max(1);
            let batches: Vec<Vec<(String, String)>> =
                pending.chunks(limit).map(|c| c.to_vec()).collect();
            info!(
                texts = pending.len(),
                batches = batches.len(),
                model,
                "requesting embeddings"
            );
            progress.report(ProgressEvent::Advanced {
                phase: Phase::Embedding,
                n: 0,
                total,
            });

            let consumed: Result<()> = async {
                let mut done = 0u64;
                let mut completed = 0usize;
                let mut results = std::pin::pin!(stream::iter(batches)
                    .map(|batch| self.embed_sub_batch(batch))
                    .buffered(self.concurrency));
                while let Some(batch) = results.try_next().await? {
                    done += batch.len() as u64;
                    completed += 1;
                    progress.report(ProgressEvent::Advanced {
                        phase: Phase::Embedding,
                        n: done,
                        total,
                    });
                    fresh.extend(batch);
                    if completed % self.persist_every == 0 {
                        self.persist_cache().await?;
                    }
                }
                Ok(())
            }
            .await;

            let persisted = self.persist_cache().await;
            consumed?;
            persisted?;
        }

        keys.iter()
            .zip(cached)
            .map(|(key, hit)| match hit {
                Some(v) => Ok(v),
                None => fresh
                    .get(key)
                    .cloned()
                    .ok_or_else(|| anyhow!("no embedding produced for key {}", key)),
            })
            .collect()
    }

    async fn persist_cache(&self) -> Result<()> {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || cache.persist())
            .await
            .context("cache persist task failed")??;
        Ok(())
    }

    /// Send one sub-batch through the retry policy and store it in the cache.
    async fn embed_sub_batch(
        &self,
        batch: Vec<(String, String)>,
    ) -> Result<Vec<(String, Vec<f32>)>> {
        let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();

        let vectors = self
            .retry
            .run(
                || {
                    self.counters.provider_calls.fetch_add(1, Ordering::Relaxed);
                    self.provider.embed_batch(&texts)
                },
                |_, _| {
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                },
            )
            .await
            .with_context(|| format!("embedding {} texts", texts.len()))?;

        if vectors.len() != batch.len() {
            return Err(ProviderError::Fatal(format!(
                "provider returned {} embeddings for {} inputs",
                vectors.len(),
                batch.len()
            ))
            .into());
        }
        if let Some(expected) = self.provider.dims() {
            if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
                return Err(anyhow!(
                    "provider returned a {}-dim vector but embedding.dims is {}",
                    bad.len(),
                    expected
                ));
            }
        }

        let entries: Vec<(String, Vec<f32>)> = batch
            .into_iter()
            .map(|(key, _)| key)
            .zip(vectors)
            .collect();
        self.cache.insert_many(entries.clone())?;
        Ok(entries)
    }
}
