//! The flags artifact.
//!
//! One `flags.json` per check run, holding a record for every draft
//! sentence in draft order. Each run replaces the previous file as a
//! whole (write to a temp file, then rename); nothing is appended or
//! merged.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use citation_drift_core::models::Flag;

use crate::atomic::write_json;

pub const FLAGS_FILE: &str = "flags.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagsFile {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// Embedding model the scores were computed with.
    pub model: String,
    pub threshold: f32,
    pub judge_enabled: bool,
    pub flags: Vec<Flag>,
}

impl FlagsFile {
    pub fn new(model: &str, threshold: f32, judge_enabled: bool, flags: Vec<Flag>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            model: model.to_string(),
            threshold,
            judge_enabled,
            flags,
        }
    }

    pub fn flagged(&self) -> impl Iterator<Item = &Flag> {
        self.flags.iter().filter(|f| f.is_flagged())
    }
}

pub fn flags_path(dir: &Path) -> PathBuf {
    dir.join(FLAGS_FILE)
}

/// Replace `<dir>/flags.json` with `file`. Returns the path written.
pub fn write_flags(dir: &Path, file: &FlagsFile) -> Result<PathBuf> {
    let path = flags_path(dir);
    write_json(&path, file)?;
    Ok(path)
}

/// Remove a previous run's flags. Returns whether a file was removed.
pub fn remove_flags(dir: &Path) -> Result<bool> {
    let path = flags_path(dir);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

pub fn load_flags(path: &Path) -> Result<FlagsFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
