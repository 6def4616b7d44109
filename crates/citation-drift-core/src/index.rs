//! In-memory chunk index.
//!
//! Holds the ordered chunk sequence for a corpus, a row-major vector
//! matrix whose row `i` belongs to chunk `i`, and a map from chunk id to
//! row. Every constructor validates that the three stay aligned; nothing
//! can reorder one of them without the others, so the index is
//! read-only once built.

use std::collections::HashMap;

use crate::error::IndexError;
use crate::ident::normalize;
use crate::models::Chunk;

/// A chunk resolved through the index.
#[derive(Debug, Clone, Copy)]
pub struct IndexedChunk<'a> {
    pub row: usize,
    pub chunk: &'a Chunk,
    pub vector: &'a [f32],
}

impl IndexedChunk<'_> {
    pub fn text(&self) -> &str {
        &self.chunk.text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkIndex {
    chunks: Vec<Chunk>,
    dims: usize,
    matrix: Vec<f32>,
    id_to_idx: HashMap<String, usize>,
}

impl ChunkIndex {
    /// Build an index from chunks and one vector per chunk, in the same order.
    pub fn from_parts(chunks: Vec<Chunk>, vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::Misaligned(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        let mut matrix = Vec::with_capacity(chunks.len() * dims);
        let mut id_to_idx = HashMap::with_capacity(chunks.len());

        for (row, (chunk, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
            if vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    chunk_id: chunk.chunk_id.clone(),
                    expected: dims,
                    actual: vector.len(),
                });
            }
            if id_to_idx.insert(chunk.chunk_id.clone(), row).is_some() {
                return Err(IndexError::DuplicateChunkId(chunk.chunk_id.clone()));
            }
            matrix.extend_from_slice(vector);
        }

        Ok(Self {
            chunks,
            dims,
            matrix,
            id_to_idx,
        })
    }

    /// Rebuild an index from persisted parts, validating alignment.
    ///
    /// Fails with [`IndexError::Misaligned`] if the matrix size, the map
    /// size, or any `id_to_idx` entry disagrees with the chunk sequence.
    pub fn from_matrix(
        chunks: Vec<Chunk>,
        dims: usize,
        matrix: Vec<f32>,
        id_to_idx: HashMap<String, usize>,
    ) -> Result<Self, IndexError> {
        if matrix.len() != chunks.len() * dims {
            return Err(IndexError::Misaligned(format!(
                "matrix holds {} values, expected {} rows × {} dims",
                matrix.len(),
                chunks.len(),
                dims
            )));
        }
        if id_to_idx.len() != chunks.len() {
            return Err(IndexError::Misaligned(format!(
                "id_to_idx has {} entries for {} chunks",
                id_to_idx.len(),
                chunks.len()
            )));
        }
        for (row, chunk) in chunks.iter().enumerate() {
            match id_to_idx.get(&chunk.chunk_id) {
                Some(&r) if r == row => {}
                Some(&r) => {
                    return Err(IndexError::Misaligned(format!(
                        "{} is at row {} but id_to_idx points to {}",
                        chunk.chunk_id, row, r
                    )))
                }
                None => {
                    return Err(IndexError::Misaligned(format!(
                        "{} missing from id_to_idx",
                        chunk.chunk_id
                    )))
                }
            }
        }

        Ok(Self {
            chunks,
            dims,
            matrix,
            id_to_idx,
        })
    }

    /// Resolve a chunk id to its text and vector.
    ///
    /// The id is normalized first, so `DOC1-01-000` finds `doc1_1_0`.
    pub fn lookup(&self, chunk_id: &str) -> Result<IndexedChunk<'_>, IndexError> {
        let row = self
            .id_to_idx
            .get(chunk_id)
            .or_else(|| self.id_to_idx.get(&normalize(chunk_id)))
            .copied()
            .ok_or_else(|| IndexError::ChunkNotFound(chunk_id.to_string()))?;
        Ok(self.entry(row))
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.lookup(chunk_id).is_ok()
    }

    fn entry(&self, row: usize) -> IndexedChunk<'_> {
        IndexedChunk {
            row,
            chunk: &self.chunks[row],
            vector: self.row(row),
        }
    }

    /// The vector stored at `row`.
    ///
    /// # Panics
    ///
    /// Panics if `row >= self.len()`.
    pub fn row(&self, row: usize) -> &[f32] {
        &self.matrix[row * self.dims..(row + 1) * self.dims]
    }

    pub fn iter(&self) -> impl Iterator<Item = IndexedChunk<'_>> {
        (0..self.chunks.len()).map(|row| self.entry(row))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Row-major matrix, `len() × dims()` values.
    pub fn matrix(&self) -> &[f32] {
        &self.matrix
    }

    pub fn id_to_idx(&self) -> &HashMap<String, usize> {
        &self.id_to_idx
    }
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
            vec![chunk("doc1_1_0", "alpha"), chunk("doc1_1_1", "beta")],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_alignment_invariant() {
        let index = sample();
        assert_eq!(index.len(), 2);
        assert_eq!(index.matrix().len(), index.len() * index.dims());
        assert_eq!(index.id_to_idx().len(), index.len());
        for (id, &row) in index.id_to_idx() {
            assert_eq!(&index.chunks()[row].chunk_id, id);
        }
        assert_eq!(index.row(1), &[0.0, 1.0]);
    }

    #[test]
    fn test_lookup_returns_text_and_vector() {
        let index = sample();
        let hit = index.lookup("doc1_1_1").unwrap();
        assert_eq!(hit.text(), "beta");
        assert_eq!(hit.vector, &[0.0, 1.0]);
        assert_eq!(hit.row, 1);
    }

    #[test]
    fn test_lookup_normalizes() {
        let index = sample();
        assert_eq!(index.lookup("DOC1-01-000").unwrap().row, 0);
    }

    #[test]
    fn test_lookup_missing() {
        let err = sample().lookup("doc1_1_2").unwrap_err();
        assert_eq!(err, IndexError::ChunkNotFound("doc1_1_2".to_string()));
    }

    #[test]
    fn test_from_parts_rejects_length_mismatch() {
        let err = ChunkIndex::from_parts(vec![chunk("a_0_0", "x")], vec![]).unwrap_err();
        assert!(matches!(err, IndexError::Misaligned(_)));
    }

    #[test]
    fn test_from_parts_rejects_duplicates() {
        let err = ChunkIndex::from_parts(
            vec![chunk("a_0_0", "x"), chunk("a_0_0", "y")],
            vec![vec![1.0], vec![2.0]],
        )
        .unwrap_err();
        assert_eq!(err, IndexError::DuplicateChunkId("a_0_0".to_string()));
    }

    #[test]
    fn test_from_parts_rejects_ragged_vectors() {
        let err = ChunkIndex::from_parts(
            vec![chunk("a_0_0", "x"), chunk("a_0_1", "y")],
            vec![vec![1.0, 2.0], vec![2.0]],
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { actual: 1, .. }));
    }

    #[test]
    fn test_from_matrix_detects_swapped_rows() {
        let index = sample();
        let mut map = index.id_to_idx().clone();
        map.insert("doc1_1_0".to_string(), 1);
        map.insert("doc1_1_1".to_string(), 0);
        let err = ChunkIndex::from_matrix(
            index.chunks().to_vec(),
            index.dims(),
            index.matrix().to_vec(),
            map,
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::Misaligned(_)));
    }

    #[test]
    fn test_from_matrix_roundtrip() {
        let index = sample();
        let rebuilt = ChunkIndex::from_matrix(
            index.chunks().to_vec(),
            index.dims(),
            index.matrix().to_vec(),
            index.id_to_idx().clone(),
        )
        .unwrap();
        assert_eq!(rebuilt, index);
    }

    #[test]
    fn test_empty_index() {
        let index = ChunkIndex::from_parts(vec![], vec![]).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dims(), 0);
        assert!(index.lookup("x_0_0").is_err());
    }
}
