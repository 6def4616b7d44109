//! Building and persisting the chunk index.
//!
//! An ingest writes four artifacts to the output directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `chunks.json` | ordered chunk records |
//! | `chunk_vecs.bin` | `CDVM` magic, `u32` version, `u64` rows, `u32` dims, then rows of LE `f32` |
//! | `id_to_idx.json` | chunk id → row |
//! | `index_manifest.json` | model, dims, row count, chunking parameters, creation time |
//!
//! Each file is written atomically. [`load_index`] re-validates the
//! alignment of all of them and refuses to return an index that does not
//! line up.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use citation_drift_core::embedding::{blob_to_vec, vec_to_blob};
use citation_drift_core::index::ChunkIndex;
use citation_drift_core::models::Chunk;

use crate::atomic::{write_bytes, write_json};
use crate::embedding::EmbeddingClient;
use crate::progress::{Phase, ProgressEvent, ProgressReporter};

pub const CHUNKS_FILE: &str = "chunks.json";
pub const VECTORS_FILE: &str = "chunk_vecs.bin";
pub const ID_MAP_FILE: &str = "id_to_idx.json";
pub const MANIFEST_FILE: &str = "index_manifest.json";

const VECTORS_MAGIC: &[u8; 4] = b"CDVM";
const VECTORS_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8 + 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub model: String,
    pub dims: usize,
    pub rows: usize,
    pub max_tokens: usize,
    pub created_at: DateTime<Utc>,
}

/// Embed every chunk (through the cache) and assemble the index in chunk order.
pub async fn build_index(
    chunks: Vec<Chunk>,
    client: &EmbeddingClient,
    progress: &dyn ProgressReporter,
) -> Result<ChunkIndex> {
    progress.report(ProgressEvent::Started {
        phase: Phase::Embedding,
    });
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = client
        .get_embeddings_with_progress(&texts, progress)
        .await
        .context("Failed to embed corpus chunks")?;
    Ok(ChunkIndex::from_parts(chunks, vectors)?)
}

pub fn save_index(index: &ChunkIndex, dir: &Path, model: &str, max_tokens: usize) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    write_json(&dir.join(CHUNKS_FILE), index.chunks())?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + index.matrix().len() * 4);
    bytes.extend_from_slice(VECTORS_MAGIC);
    bytes.extend_from_slice(&VECTORS_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(index.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&(index.dims() as u32).to_le_bytes());
    bytes.extend_from_slice(&vec_to_blob(index.matrix()));
    let vectors_path = dir.join(VECTORS_FILE);
    write_bytes(&vectors_path, &bytes)
        .with_context(|| format!("Failed to write {}", vectors_path.display()))?;

    write_json(&dir.join(ID_MAP_FILE), index.id_to_idx())?;

    let manifest = IndexManifest {
        format_version: VECTORS_VERSION,
        model: model.to_string(),
        dims: index.dims(),
        rows: index.len(),
        max_tokens,
        created_at: Utc::now(),
    };
    // Written last: a manifest means the other artifacts are complete.
    write_json(&dir.join(MANIFEST_FILE), &manifest)?;

    info!(dir = %dir.display(), rows = index.len(), dims = index.dims(), "saved chunk index");
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Decode `chunk_vecs.bin` into `(rows, dims, matrix)`.
fn decode_vectors(bytes: &[u8]) -> Result<(usize, usize, Vec<f32>)> {
    if bytes.len() < HEADER_LEN || &bytes[0..4] != VECTORS_MAGIC {
        bail!("{} is not a vector matrix file", VECTORS_FILE);
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VECTORS_VERSION {
        bail!("{} has unsupported version {}", VECTORS_FILE, version);
    }
    let mut rows_raw = [0u8; 8];
    rows_raw.copy_from_slice(&bytes[8..16]);
    let rows = u64::from_le_bytes(rows_raw) as usize;
    let dims = u32::from_le_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = rows
        .checked_mul(dims)
        .and_then(|n| n.checked_mul(4))
        .context("vector matrix header overflows")?;
    if body.len() != expected {
        bail!(
            "{} holds {} bytes of vectors, header promises {} rows × {} dims",
            VECTORS_FILE,
            body.len(),
            rows,
            dims
        );
    }
    Ok((rows, dims, blob_to_vec(body)))
}

/// Load and validate a persisted index.
pub fn load_index(dir: &Path) -> Result<(ChunkIndex, IndexManifest)> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        bail!(
            "No chunk index in {} (run `cdrift ingest` first)",
            dir.display()
        );
    }
    let manifest: IndexManifest = read_json(&manifest_path)?;
    let chunks: Vec<Chunk> = read_json(&dir.join(CHUNKS_FILE))?;
    let id_to_idx: HashMap<String, usize> = read_json(&dir.join(ID_MAP_FILE))?;

    let vectors_path = dir.join(VECTORS_FILE);
    let bytes = std::fs::read(&vectors_path)
        .with_context(|| format!("Failed to read {}", vectors_path.display()))?;
    let (rows, dims, matrix) = decode_vectors(&bytes)?;

    if rows != chunks.len() || rows != manifest.rows {
        bail!(
            "index misaligned: {} chunks, {} vector rows, manifest says {}",
            chunks.len(),
            rows,
            manifest.rows
        );
    }
    if dims != manifest.dims {
        bail!(
            "index misaligned: vectors have {} dims, manifest says {}",
            dims,
            manifest.dims
        );
    }

    let index = ChunkIndex::from_matrix(chunks, dims, matrix, id_to_idx)?;
    info!(dir = %dir.display(), rows, dims, model = %manifest.model, "loaded chunk index");
    Ok((index, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            source_file: "doc1.pdf".to_string(),
            page_no: 1,
        }
    }

    fn sample() -> ChunkIndex {
        ChunkIndex::from_parts(
            vec![chunk("doc1_1_0", "Pets are allowed."), chunk("doc1_1_1", "No smoking.")],
            vec![vec![1.0, 0.0, 0.5], vec![0.0, 1.0, -0.5]],
        )
        .unwrap()
    }

    #[test]
    fn save_then_load_preserves_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample();
        save_index(&index, dir.path(), "m", 400).unwrap();

        let (loaded, manifest) = load_index(dir.path()).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(manifest.model, "m");
        assert_eq!(manifest.rows, 2);
        assert_eq!(manifest.dims, 3);
        for (id, &row) in loaded.id_to_idx() {
            assert_eq!(&loaded.chunks()[row].chunk_id, id);
        }
    }

    #[test]
    fn tampered_id_map_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        save_index(&sample(), dir.path(), "m", 400).unwrap();
        std::fs::write(
            dir.path().join(ID_MAP_FILE),
            r#"{"doc1_1_0": 1, "doc1_1_1": 0}"#,
        )
        .unwrap();
        let err = load_index(dir.path()).unwrap_err();
        assert!(err.to_string().contains("misaligned"));
    }

    #[test]
    fn truncated_vectors_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        save_index(&sample(), dir.path(), "m", 400).unwrap();
        let path = dir.path().join(VECTORS_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        std::fs::write(&path, bytes).unwrap();
        assert!(load_index(dir.path()).is_err());
    }

    #[test]
    fn missing_index_mentions_ingest() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_index(dir.path()).unwrap_err();
        assert!(err.to_string().contains("cdrift ingest"));
    }

    #[test]
    fn header_layout() {
        let dir = tempfile::tempdir().unwrap();
        save_index(&sample(), dir.path(), "m", 400).unwrap();
        let bytes = std::fs::read(dir.path().join(VECTORS_FILE)).unwrap();
        assert_eq!(&bytes[0..4], b"CDVM");
        assert_eq!(bytes.len(), HEADER_LEN + 2 * 3 * 4);
        let (rows, dims, matrix) = decode_vectors(&bytes).unwrap();
        assert_eq!((rows, dims), (2, 3));
        assert_eq!(matrix[2], 0.5);
    }
}
