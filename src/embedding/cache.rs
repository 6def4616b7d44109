//! Content-addressed embedding cache.
//!
//! Maps [`content_key`](citation_drift_core::embedding::content_key)
//! (SHA-256 over model id and text) to a vector. The cache is
//! monotonically additive: an entry, once present, is never replaced.
//!
//! # On-disk format
//!
//! A single JSON document:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "model": "text-embedding-3-small",
//!   "dims": 1536,
//!   "entries": { "<sha256 hex>": [0.01, -0.2, ...] }
//! }
//! ```
//!
//! `model` and `dims` form a consistency header. Opening a cache written
//! under another model fails with [`CacheError::ModelMismatch`]; storing
//! a vector of a different width fails with [`CacheError::DimsMismatch`].
//!
//! # Writers
//!
//! [`EmbeddingCache::persist`] serializes writers inside the process with
//! a mutex and across processes with an exclusive advisory lock on
//! `<cache>.lock`. Under the lock it merges entries another process added
//! since this one loaded, writes a temp file next to the cache, and
//! renames it into place, so a crash never leaves a torn cache behind.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("cache file {path} has unsupported format_version {version}")]
    UnsupportedVersion { path: String, version: u32 },
    #[error(
        "cache was built with model '{cached}' but the configured model is '{configured}'; \
         use a different cache path or run `cdrift cache clear`"
    )]
    ModelMismatch { cached: String, configured: String },
    #[error("vector has {actual} dims but the cache holds {expected}-dim vectors")]
    DimsMismatch { expected: usize, actual: usize },
    #[error("cache state lock poisoned")]
    Poisoned,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    format_version: u32,
    model: String,
    #[serde(default)]
    dims: Option<usize>,
    #[serde(default)]
    entries: BTreeMap<String, Vec<f32>>,
}

#[derive(Debug, Default)]
struct CacheState {
    dims: Option<usize>,
    entries: BTreeMap<String, Vec<f32>>,
    /// Entries added since the last successful persist.
    unsaved: usize,
}

/// Summary of a cache file, for `cdrift cache stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub path: String,
    pub model: String,
    pub dims: Option<usize>,
    pub entries: usize,
    pub bytes: u64,
}

pub struct EmbeddingCache {
    /// `None` keeps the cache in memory only.
    path: Option<PathBuf>,
    model: String,
    state: Mutex<CacheState>,
    writer: Mutex<()>,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("path", &self.path)
            .field("model", &self.model)
            .field("len", &self.len())
            .finish()
    }
}

impl EmbeddingCache {
    /// Open (or start) the cache at `path` for `model`.
    pub fn open(path: impl Into<PathBuf>, model: &str) -> Result<Self, CacheError> {
        let path = path.into();
        let mut state = CacheState::default();

        if let Some(file) = read_cache_file(&path)? {
            check_model(&file.model, model)?;
            info!(
                path = %path.display(),
                entries = file.entries.len(),
                "loaded embedding cache"
            );
            state.dims = file.dims;
            state.entries = file.entries;
        }

        Ok(Self {
            path: Some(path),
            model: model.to_string(),
            state: Mutex::new(state),
            writer: Mutex::new(()),
        })
    }

    /// A cache that is never written to disk.
    pub fn in_memory(model: &str) -> Self {
        Self {
            path: None,
            model: model.to_string(),
            state: Mutex::new(CacheState::default()),
            writer: Mutex::new(()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, CacheState>, CacheError> {
        self.state.lock().map_err(|_| CacheError::Poisoned)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn dims(&self) -> Option<usize> {
        self.state().ok().and_then(|s| s.dims)
    }

    pub fn len(&self) -> usize {
        self.state().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<f32>>, CacheError> {
        Ok(self.state()?.entries.get(key).cloned())
    }

    /// Look up several keys under one lock.
    pub fn get_many<'a, I>(&self, keys: I) -> Result<Vec<Option<Vec<f32>>>, CacheError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let state = self.state()?;
        Ok(keys
            .into_iter()
            .map(|k| state.entries.get(k).cloned())
            .collect())
    }

    /// Add entries. Existing keys are left untouched.
    ///
    /// Fails without inserting anything if any vector's width disagrees
    /// with the cache (or with the rest of the batch).
    pub fn insert_many(&self, entries: Vec<(String, Vec<f32>)>) -> Result<usize, CacheError> {
        let mut state = self.state()?;

        let mut dims = state.dims;
        for (_, vector) in &entries {
            match dims {
                Some(expected) if expected != vector.len() => {
                    return Err(CacheError::DimsMismatch {
                        expected,
                        actual: vector.len(),
                    })
                }
                Some(_) => {}
                None => dims = Some(vector.len()),
            }
        }
        state.dims = dims;

        let mut added = 0;
        for (key, vector) in entries {
            if !state.entries.contains_key(&key) {
                state.entries.insert(key, vector);
                added += 1;
            }
        }
        state.unsaved += added;
        Ok(added)
    }

    /// Write the cache to disk if anything changed since the last persist.
    ///
    /// Blocking; async callers should run it on a blocking thread.
    pub fn persist(&self) -> Result<(), CacheError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let _writer = self.writer.lock().map_err(|_| CacheError::Poisoned)?;
        if self.state()?.unsaved == 0 {
            return Ok(());
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let lock_path = lock_path_for(path);
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(io_err(&lock_path))?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = lock.write().map_err(io_err(&lock_path))?;

        // Merge what other processes wrote since we loaded.
        let on_disk = read_cache_file(path)?;
        let (snapshot, written) = {
            let mut state = self.state()?;
            if let Some(file) = on_disk {
                check_model(&file.model, &self.model)?;
                if let (Some(theirs), Some(ours)) = (file.dims, state.dims) {
                    if theirs != ours {
                        return Err(CacheError::DimsMismatch {
                            expected: theirs,
                            actual: ours,
                        });
                    }
                }
                let mut merged = 0;
                for (key, vector) in file.entries {
                    if let std::collections::btree_map::Entry::Vacant(slot) =
                        state.entries.entry(key)
                    {
                        slot.insert(vector);
                        merged += 1;
                    }
                }
                if state.dims.is_none() {
                    state.dims = file.dims;
                }
                if merged > 0 {
                    debug!(merged, "merged entries written by another process");
                }
            }
            let file = CacheFile {
                format_version: CACHE_FORMAT_VERSION,
                model: self.model.clone(),
                dims: state.dims,
                entries: state.entries.clone(),
            };
            (file, state.unsaved)
        };

        write_atomically(path, &snapshot)?;
        {
            let mut state = self.state()?;
            state.unsaved = state.unsaved.saturating_sub(written);
        }
        debug!(
            path = %path.display(),
            entries = snapshot.entries.len(),
            "persisted embedding cache"
        );
        Ok(())
    }
}

fn check_model(cached: &str, configured: &str) -> Result<(), CacheError> {
    if cached != configured {
        return Err(CacheError::ModelMismatch {
            cached: cached.to_string(),
            configured: configured.to_string(),
        });
    }
    Ok(())
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn read_cache_file(path: &Path) -> Result<Option<CacheFile>, CacheError> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    let parsed: CacheFile =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| CacheError::Corrupt {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    if parsed.format_version != CACHE_FORMAT_VERSION {
        return Err(CacheError::UnsupportedVersion {
            path: path.display().to_string(),
            version: parsed.format_version,
        });
    }
    if let Some(dims) = parsed.dims {
        if let Some((key, v)) = parsed.entries.iter().find(|(_, v)| v.len() != dims) {
            return Err(CacheError::Corrupt {
                path: path.display().to_string(),
                reason: format!("entry {} has {} dims, header says {}", key, v.len(), dims),
            });
        }
    }
    Ok(Some(parsed))
}

fn write_atomically(path: &Path, file: &CacheFile) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(file).map_err(|e| CacheError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    crate::atomic::write_bytes(path, &bytes).map_err(io_err(path))
}

/// Describe the cache file at `path`, or `None` if there is none.
pub fn inspect(path: &Path) -> Result<Option<CacheInfo>, CacheError> {
    let Some(file) = read_cache_file(path)? else {
        return Ok(None);
    };
    let bytes = std::fs::metadata(path).map_err(io_err(path))?.len();
    Ok(Some(CacheInfo {
        path: path.display().to_string(),
        model: file.model,
        dims: file.dims,
        entries: file.entries.len(),
        bytes,
    }))
}

/// Delete the cache file and its lock file. Returns whether a cache existed.
pub fn clear(path: &Path) -> Result<bool, CacheError> {
    let existed = match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(io_err(path)(e)),
    };
    let lock_path = lock_path_for(path);
    match std::fs::remove_file(&lock_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(&lock_path)(e)),
    }
    Ok(existed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, v: &[f32]) -> (String, Vec<f32>) {
        (key.to_string(), v.to_vec())
    }

    #[test]
    fn entries_are_immutable() {
        let cache = EmbeddingCache::in_memory("m");
        assert_eq!(cache.insert_many(vec![entry("k", &[1.0, 0.0])]).unwrap(), 1);
        assert_eq!(cache.insert_many(vec![entry("k", &[0.0, 1.0])]).unwrap(), 0);
        assert_eq!(cache.get("k").unwrap(), Some(vec![1.0, 0.0]));
        assert_eq!(cache.dims(), Some(2));
    }

    #[test]
    fn dims_mismatch_rejects_whole_batch() {
        let cache = EmbeddingCache::in_memory("m");
        cache.insert_many(vec![entry("a", &[1.0, 0.0])]).unwrap();
        let err = cache
            .insert_many(vec![entry("b", &[1.0, 0.0]), entry("c", &[1.0])])
            .unwrap_err();
        assert!(matches!(err, CacheError::DimsMismatch { expected: 2, actual: 1 }));
        assert_eq!(cache.get("b").unwrap(), None);
    }

    #[test]
    fn persist_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.json");

        let cache = EmbeddingCache::open(&path, "m").unwrap();
        assert!(cache.is_empty());
        cache
            .insert_many(vec![entry("a", &[0.5, 0.25]), entry("b", &[1.0, -1.0])])
            .unwrap();
        cache.persist().unwrap();
        assert!(path.exists());
        assert!(lock_path_for(&path).exists());

        let reopened = EmbeddingCache::open(&path, "m").unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("a").unwrap(), Some(vec![0.5, 0.25]));
        assert_eq!(reopened.dims(), Some(2));
    }

    #[test]
    fn model_drift_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = EmbeddingCache::open(&path, "model-a").unwrap();
        cache.insert_many(vec![entry("a", &[1.0])]).unwrap();
        cache.persist().unwrap();

        let err = EmbeddingCache::open(&path, "model-b").unwrap_err();
        assert!(matches!(err, CacheError::ModelMismatch { .. }));
    }

    #[test]
    fn persist_merges_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let first = EmbeddingCache::open(&path, "m").unwrap();
        let second = EmbeddingCache::open(&path, "m").unwrap();
        first.insert_many(vec![entry("a", &[1.0])]).unwrap();
        second.insert_many(vec![entry("b", &[2.0])]).unwrap();
        first.persist().unwrap();
        second.persist().unwrap();

        let merged = EmbeddingCache::open(&path, "m").unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            EmbeddingCache::open(&path, "m").unwrap_err(),
            CacheError::Corrupt { .. }
        ));
    }

    #[test]
    fn inspect_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        assert_eq!(inspect(&path).unwrap(), None);

        let cache = EmbeddingCache::open(&path, "m").unwrap();
        cache.insert_many(vec![entry("a", &[1.0, 2.0])]).unwrap();
        cache.persist().unwrap();

        let info = inspect(&path).unwrap().unwrap();
        assert_eq!(info.model, "m");
        assert_eq!(info.entries, 1);
        assert_eq!(info.dims, Some(2));

        assert!(clear(&path).unwrap());
        assert!(!path.exists());
        assert!(!clear(&path).unwrap());
    }
}
