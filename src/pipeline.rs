//! End-to-end runs: `ingest` (corpus → chunk index, optionally followed
//! by a check) and `check` (persisted index + draft → flags).
//!
//! Remote clients are constructed up front by [`Services::from_config`],
//! so configuration and credential problems surface before any document
//! is read or any network call is made.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use citation_drift_core::decision::DecisionPolicy;
use citation_drift_core::draft::Draft;
use citation_drift_core::index::ChunkIndex;

use crate::config::Config;
use crate::corpus::{discover, load_corpus};
use crate::drift::DriftDetector;
use crate::embedding::{create_provider, EmbeddingCache, EmbeddingClient, EmbeddingProvider, RetryPolicy};
use crate::extract::{extract_plain_text, DocFormat};
use crate::flags::{remove_flags, write_flags, FlagsFile};
use crate::index_store::{build_index, load_index, save_index};
use crate::judge::{create_judge, Judge};
use crate::progress::{Phase, ProgressEvent, ProgressReporter};
use crate::report::{sha256_hex, CheckSummary, IndexSummary, RunSummary};

/// Remote backends for a run.
pub struct Services {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub judge: Option<Arc<dyn Judge>>,
}

impl Services {
    /// Construct the configured embedding provider and, if enabled, the judge.
    pub fn from_config(config: &Config) -> Result<Self> {
        if !config.embedding.is_enabled() {
            bail!(
                "embedding.provider is 'disabled'; ingest and check need embeddings \
                 (use `cdrift ingest --dry-run` to chunk without them)"
            );
        }
        let provider: Arc<dyn EmbeddingProvider> = create_provider(&config.embedding)?.into();
        let judge: Option<Arc<dyn Judge>> = if config.judge.enabled {
            Some(Arc::from(create_judge(&config.judge)?))
        } else {
            None
        };
        Ok(Self { provider, judge })
    }
}

/// Open the on-disk cache for the provider's model and wrap both in a client.
pub fn build_client(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> Result<EmbeddingClient> {
    let cache_path = config.cache_path();
    let cache = EmbeddingCache::open(&cache_path, provider.model_name())
        .with_context(|| format!("Failed to open embedding cache {}", cache_path.display()))?;
    let retry = RetryPolicy::new(config.embedding.max_retries, config.embedding.base_delay_ms);
    Ok(EmbeddingClient::new(provider, Arc::new(cache), retry)
        .with_batch_size(config.embedding.batch_size)
        .with_concurrency(config.embedding.concurrency)
        .with_persist_every(config.cache.persist_every))
}

/// Chunk the corpus and report counts without embedding or writing anything.
pub fn ingest_dry_run(
    inputs: &[PathBuf],
    config: &Config,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    progress.report(ProgressEvent::Started {
        phase: Phase::Discovering,
    });
    let files = discover(inputs, config)?;
    let corpus = load_corpus(&files, config, progress);

    let mut summary = RunSummary::new();
    summary.index = Some(IndexSummary {
        chunks: corpus.chunks.len(),
        dims: 0,
        model: "(dry run)".to_string(),
    });
    summary.corpus = Some(corpus.report);
    Ok(summary)
}

/// Build and persist the chunk index; check `draft` against it if given.
pub async fn run_ingest(
    inputs: &[PathBuf],
    draft: Option<&Path>,
    config: &Config,
    services: &Services,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let out_dir = &config.output.dir;

    progress.report(ProgressEvent::Started {
        phase: Phase::Discovering,
    });
    let files = discover(inputs, config)?;
    let corpus = load_corpus(&files, config, progress);
    if corpus.chunks.is_empty() {
        warn!("corpus produced no chunks; the index will be empty");
    }

    let client = build_client(config, services.provider.clone())?;
    let index = build_index(corpus.chunks, &client, progress).await?;
    save_index(&index, out_dir, client.model(), config.chunking.max_tokens)?;

    let mut summary = RunSummary::new();
    summary.corpus = Some(corpus.report);
    summary.index = Some(IndexSummary {
        chunks: index.len(),
        dims: index.dims(),
        model: client.model().to_string(),
    });

    if let Some(draft) = draft {
        let flags = check_against(&index, draft, config, &client, services, progress, &mut summary).await?;
        write_flags(out_dir, &flags)?;
    } else if remove_flags(out_dir)? {
        info!(dir = %out_dir.display(), "removed flags from the previous index");
    }

    summary.embeddings = Some(client.stats());
    summary.write(out_dir)?;
    Ok(summary)
}

/// Check `draft` against the index persisted in the output directory.
pub async fn run_check(
    draft: &Path,
    config: &Config,
    services: &Services,
    progress: &dyn ProgressReporter,
) -> Result<(RunSummary, FlagsFile)> {
    let out_dir = &config.output.dir;
    let (index, manifest) = load_index(out_dir)?;

    let client = build_client(config, services.provider.clone())?;
    if manifest.model != client.model() {
        bail!(
            "index in {} was built with model '{}' but the configured model is '{}'; re-run `cdrift ingest`",
            out_dir.display(),
            manifest.model,
            client.model()
        );
    }

    let mut summary = RunSummary::new();
    summary.index = Some(IndexSummary {
        chunks: index.len(),
        dims: index.dims(),
        model: manifest.model.clone(),
    });

    let flags = check_against(&index, draft, config, &client, services, progress, &mut summary).await?;
    write_flags(out_dir, &flags)?;

    summary.embeddings = Some(client.stats());
    summary.write(out_dir)?;
    Ok((summary, flags))
}

/// Read a draft file. JSON is a structured draft; PDF, DOCX and PPTX are
/// extracted to text; anything else is read as markdown.
pub fn load_draft(path: &Path) -> Result<(Draft, Vec<u8>)> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read draft {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let draft = if is_json {
        let text = std::str::from_utf8(&bytes)
            .with_context(|| format!("Draft {} is not valid UTF-8", path.display()))?;
        Draft::from_json(text).with_context(|| format!("Failed to parse structured draft {}", path.display()))?
    } else {
        match DocFormat::from_path(path) {
            Some(DocFormat::Pdf | DocFormat::Docx | DocFormat::Pptx) => {
                Draft::Markdown(extract_plain_text(path)?)
            }
            _ => Draft::Markdown(String::from_utf8_lossy(&bytes).into_owned()),
        }
    };
    Ok((draft, bytes))
}

async fn check_against(
    index: &ChunkIndex,
    draft_path: &Path,
    config: &Config,
    client: &EmbeddingClient,
    services: &Services,
    progress: &dyn ProgressReporter,
    summary: &mut RunSummary,
) -> Result<FlagsFile> {
    let (draft, bytes) = load_draft(draft_path)?;
    let parsed = draft.parse();
    for m in &parsed.malformed {
        warn!(%m, "malformed citation marker");
    }
    info!(
        draft = %draft_path.display(),
        sentences = parsed.sentences.len(),
        cited = parsed.cited().count(),
        "parsed draft"
    );

    if let (Some(expected), false) = (client.cache().dims(), index.is_empty()) {
        if expected != index.dims() {
            bail!(
                "embedding cache holds {}-dim vectors but the index has {} dims",
                expected,
                index.dims()
            );
        }
    }

    let judge = services.judge.as_deref().filter(|_| config.judge.enabled);
    let policy = DecisionPolicy {
        threshold: config.drift.threshold,
        judge_margin: judge.map(|_| config.judge.margin),
    };
    let mut detector = DriftDetector::new(index, client, policy);
    if let Some(judge) = judge {
        detector = detector.with_judge(
            judge,
            RetryPolicy::new(config.judge.max_retries, config.embedding.base_delay_ms),
        );
    }
    let report = detector.detect(&parsed, progress).await?;

    summary.check = Some(CheckSummary {
        draft: draft_path.display().to_string(),
        draft_sha256: sha256_hex(&bytes),
        malformed_citations: parsed.malformed.iter().map(|m| m.to_string()).collect(),
        stats: report.stats,
    });

    Ok(FlagsFile::new(
        client.model(),
        config.drift.threshold,
        judge.is_some(),
        report.flags,
    ))
}
