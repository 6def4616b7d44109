//! Run summary: counts for an ingest and/or check, written as
//! `summary.json` next to the flags and printed to stdout.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::atomic::write_json;
use crate::corpus::CorpusReport;
use crate::drift::DetectStats;
use crate::embedding::ClientStats;

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub chunks: usize,
    pub dims: usize,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub draft: String,
    /// SHA-256 of the draft bytes, so a summary can be matched to its input.
    pub draft_sha256: String,
    pub malformed_citations: Vec<String>,
    #[serde(flatten)]
    pub stats: DetectStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus: Option<CorpusReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<CheckSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeddings: Option<ClientStats>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            corpus: None,
            index: None,
            check: None,
            embeddings: None,
        }
    }

    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(SUMMARY_FILE);
        write_json(&path, self)?;
        Ok(path)
    }

    /// Print a plain-text summary to stdout.
    pub fn print(&self) {
        if let Some(corpus) = &self.corpus {
            println!("corpus");
            println!("  files scanned:  {}", corpus.files_scanned);
            println!("  files ingested: {}", corpus.files_ingested);
            if !corpus.skipped.is_empty() {
                println!("  files skipped:  {}", corpus.skipped.len());
                for s in &corpus.skipped {
                    println!("    {}: {}", s.path, s.reason);
                }
            }
            if !corpus.empty.is_empty() {
                println!("  no text:        {}", corpus.empty.join(", "));
            }
        }
        if let Some(index) = &self.index {
            println!("index");
            println!("  chunks: {}", index.chunks);
            println!("  dims:   {}", index.dims);
            println!("  model:  {}", index.model);
        }
        if let Some(check) = &self.check {
            let s = &check.stats;
            println!("check {}", check.draft);
            println!("  sentences:      {}", s.sentences);
            println!("  accepted:       {}", s.accepted);
            println!("  flagged:        {}", s.flagged);
            println!("    missing source: {}", s.missing_source);
            println!("  uncited:        {}", s.uncited);
            if s.escalations > 0 {
                println!(
                    "  judge:          {} escalated, {} overridden",
                    s.escalations, s.judge_overrides
                );
            }
            if s.judge_retries > 0 {
                println!("  judge retries:  {}", s.judge_retries);
            }
            if !s.dangling.is_empty() {
                println!("  dangling ids:   {}", s.dangling.join(", "));
            }
            if !check.malformed_citations.is_empty() {
                println!("  malformed:      {}", check.malformed_citations.len());
            }
        }
        if let Some(e) = &self.embeddings {
            println!("embeddings");
            println!("  cache hits:     {}", e.cache_hits);
            println!("  cache misses:   {}", e.cache_misses);
            println!("  provider calls: {}", e.provider_calls);
            if e.retries > 0 {
                println!("  retries:        {}", e.retries);
            }
        }
        println!("ok");
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
