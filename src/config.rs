//! Configuration parsing and validation.
//!
//! Citation Drift is configured via a TOML file passed with `--config`.
//! Every section is optional; a run with no config file uses the defaults
//! below and still goes through [`Config::validate`].
//!
//! # Example Configuration
//!
//! ```toml
//! [corpus]
//! include_globs = ["**/*.pdf", "**/*.docx", "**/*.md"]
//! exclude_globs = ["**/drafts/**"]
//!
//! [chunking]
//! max_tokens = 400
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! batch_size = 64
//! concurrency = 4
//!
//! [cache]
//! path = "./out/embedding_cache.json"
//! persist_every = 16
//!
//! [drift]
//! threshold = 0.85
//!
//! [judge]
//! enabled = false
//! model = "o4-mini"
//! margin = 0.05
//!
//! [output]
//! dir = "./out"
//! ```
//!
//! # Validation
//!
//! [`load_config`] and [`Config::validate`] reject:
//! - `chunking.max_tokens == 0`
//! - `drift.threshold` or `judge.margin` outside `[0.0, 1.0]`
//! - `embedding.batch_size` of zero or above the provider's request limit
//! - `embedding.concurrency == 0`
//! - `cache.persist_every == 0`
//! - unknown embedding or judge providers
//! - an enabled provider without `embedding.model`
//!
//! Missing API keys are checked when providers are constructed, which
//! happens before the first network call.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use citation_drift_core::decision::{DEFAULT_JUDGE_MARGIN, DEFAULT_THRESHOLD};

/// Largest `input` array the OpenAI embeddings endpoint accepts.
pub const OPENAI_MAX_BATCH: usize = 2048;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub judge: JudgeConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Files larger than this are skipped and reported.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.pdf", "**/*.docx", "**/*.pptx", "**/*.md", "**/*.txt"]
        .iter()
        .map(|g| g.to_string())
        .collect()
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateway or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("text-embedding-3-small".to_string())
}
fn default_batch_size() -> usize {
    64
}
fn default_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Provider-side cap on texts per request.
    pub fn provider_batch_limit(&self) -> usize {
        match self.provider.as_str() {
            "openai" => OPENAI_MAX_BATCH,
            _ => usize::MAX,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Defaults to `<output.dir>/embedding_cache.json`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Completed sub-batches between cache writes. The cache is also
    /// written when an embedding call finishes or fails.
    #[serde(default = "default_persist_every")]
    pub persist_every: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            persist_every: default_persist_every(),
        }
    }
}

fn default_persist_every() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriftConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

#[derive(Debug, Deserialize, Clone)]
pub struct JudgeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_judge_provider")]
    pub provider: String,
    #[serde(default = "default_judge_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Scores below `threshold + margin` are escalated.
    #[serde(default = "default_margin")]
    pub margin: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_judge_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_judge_provider(),
            model: default_judge_model(),
            url: None,
            margin: default_margin(),
            max_retries: default_max_retries(),
            timeout_secs: default_judge_timeout_secs(),
        }
    }
}

fn default_judge_provider() -> String {
    "openai".to_string()
}
fn default_judge_model() -> String {
    "o4-mini".to_string()
}
fn default_margin() -> f32 {
    DEFAULT_JUDGE_MARGIN
}
fn default_judge_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./out")
}

impl Config {
    /// Resolved path of the embedding cache file.
    pub fn cache_path(&self) -> PathBuf {
        self.cache
            .path
            .clone()
            .unwrap_or_else(|| self.output.dir.join("embedding_cache.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }

        if !(0.0..=1.0).contains(&self.drift.threshold) {
            bail!(
                "drift.threshold must be in [0.0, 1.0], got {}",
                self.drift.threshold
            );
        }

        if !(0.0..=1.0).contains(&self.judge.margin) {
            bail!("judge.margin must be in [0.0, 1.0], got {}", self.judge.margin);
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }

        if self.embedding.is_enabled() && self.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                self.embedding.provider
            );
        }

        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when set");
        }

        let limit = self.embedding.provider_batch_limit();
        if self.embedding.batch_size == 0 || self.embedding.batch_size > limit {
            bail!(
                "embedding.batch_size must be in 1..={} for provider '{}', got {}",
                limit,
                self.embedding.provider,
                self.embedding.batch_size
            );
        }

        if self.embedding.concurrency == 0 {
            bail!("embedding.concurrency must be > 0");
        }

        if self.cache.persist_every == 0 {
            bail!("cache.persist_every must be > 0");
        }

        if self.judge.enabled {
            match self.judge.provider.as_str() {
                "openai" => {}
                other => bail!("Unknown judge provider: '{}'. Must be openai.", other),
            }
            if self.judge.model.trim().is_empty() {
                bail!("judge.model must be specified when the judge is enabled");
            }
        }

        Ok(())
    }
}

/// Read, parse, and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = read_config(path)?;
    config.validate()?;
    Ok(config)
}

/// Read and parse a configuration file without validating it, so
/// command-line overrides can be applied first.
pub fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

/// Load the config at `path`, or validated defaults when no file is given.
pub fn load_or_default(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => load_config(p),
        None => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.max_tokens, 400);
        assert_eq!(config.drift.threshold, 0.85);
        assert_eq!(config.judge.margin, 0.05);
        assert_eq!(config.embedding.concurrency, 4);
        assert!(!config.judge.enabled);
        assert_eq!(
            config.cache_path(),
            PathBuf::from("./out").join("embedding_cache.json")
        );
    }

    #[test]
    fn test_threshold_out_of_range() {
        let err = parse("[drift]\nthreshold = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("drift.threshold"));
        assert!(parse("[drift]\nthreshold = -0.1\n").is_err());
        assert!(parse("[drift]\nthreshold = 1.0\n").is_ok());
    }

    #[test]
    fn test_zero_max_tokens_rejected() {
        assert!(parse("[chunking]\nmax_tokens = 0\n").is_err());
    }

    #[test]
    fn test_batch_size_over_provider_limit() {
        let err = parse("[embedding]\nbatch_size = 4096\n").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
        assert!(parse("[embedding]\nprovider = \"ollama\"\nbatch_size = 4096\n").is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse("[embedding]\nprovider = \"cohere\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_zero_persist_every_rejected() {
        let err = parse("[cache]\npersist_every = 0\n").unwrap_err();
        assert!(err.to_string().contains("persist_every"));
        assert_eq!(parse("").unwrap().cache.persist_every, 16);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        assert!(parse("[embedding]\nconcurrency = 0\n").is_err());
    }

    #[test]
    fn test_explicit_cache_path() {
        let config = parse("[cache]\npath = \"/tmp/c.json\"\n").unwrap();
        assert_eq!(config.cache_path(), PathBuf::from("/tmp/c.json"));
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse(include_str!("../config/cdrift.example.toml")).unwrap();
        assert_eq!(config.corpus.include_globs.len(), 5);
        assert_eq!(config.embedding.model.as_deref(), Some("text-embedding-3-small"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdrift.toml");
        std::fs::write(&path, "[judge]\nenabled = true\nmargin = 0.1\n").unwrap();
        let config = load_config(&path).unwrap();
        assert!(config.judge.enabled);
        assert_eq!(config.judge.model, "o4-mini");

        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
