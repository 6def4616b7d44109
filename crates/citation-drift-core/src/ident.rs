//! Stable chunk identity.
//!
//! Chunk ids have the form `<file_id>_<page_no>_<chunk_idx>`. Draft
//! citations rarely match the source filename exactly (case, dashes,
//! zero-padded page numbers), so the chunker and the citation resolver
//! share one canonical normalization, [`normalize`]:
//!
//! 1. lowercase,
//! 2. every run of non-alphanumeric characters becomes a single `_`,
//! 3. leading and trailing `_` are trimmed,
//! 4. all-digit segments lose their leading zeros (`007` → `7`, `00` → `0`).
//!
//! The rule is idempotent, and a chunk id built from a normalized
//! `file_id` is already in canonical form.
//!
//! ```rust
//! use citation_drift_core::ident::{chunk_id, file_id_for, normalize};
//!
//! let fid = file_id_for("Bylaws (Amended) 2019.pdf");
//! assert_eq!(fid, "bylaws_amended_2019");
//! assert_eq!(chunk_id(&fid, 3, 0), "bylaws_amended_2019_3_0");
//! assert_eq!(normalize("Bylaws-Amended-2019_03_00"), "bylaws_amended_2019_3_0");
//! ```

use std::path::Path;

/// Canonical normalization shared by chunk ids and citation ids.
pub fn normalize(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !folded.is_empty() {
                folded.push('_');
            }
            pending_sep = false;
            folded.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    folded
        .split('_')
        .map(strip_leading_zeros)
        .collect::<Vec<_>>()
        .join("_")
}

fn strip_leading_zeros(segment: &str) -> &str {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return segment;
    }
    let trimmed = segment.trim_start_matches('0');
    if trimmed.is_empty() {
        &segment[segment.len() - 1..]
    } else {
        trimmed
    }
}

/// Derive the `file_id` for a source document from its path.
///
/// Only the file stem participates, so `Rules.PDF` and `rules.docx`
/// collide; the corpus loader reports such collisions.
pub fn file_id_for(path: impl AsRef<Path>) -> String {
    let stem = path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    normalize(&stem)
}

/// Build a chunk id from its parts.
pub fn chunk_id(file_id: &str, page_no: u32, chunk_idx: usize) -> String {
    format!("{}_{}_{}", file_id, page_no, chunk_idx)
}

/// The parts of a canonical chunk id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRef {
    pub file_id: String,
    pub page_no: u32,
    pub chunk_idx: usize,
}

/// Normalize a citation id and split it into its parts.
///
/// Returns `None` when the id does not end in two numeric segments or the
/// file part is empty.
pub fn parse_chunk_ref(raw: &str) -> Option<ChunkRef> {
    let canonical = normalize(raw);
    let mut parts = canonical.rsplitn(3, '_');
    let chunk_idx = parts.next()?.parse::<usize>().ok()?;
    let page_no = parts.next()?.parse::<u32>().ok()?;
    let file_id = parts.next()?;
    if file_id.is_empty() {
        return None;
    }
    Some(ChunkRef {
        file_id: file_id.to_string(),
        page_no,
        chunk_idx,
    })
}

impl ChunkRef {
    pub fn to_id(&self) -> String {
        chunk_id(&self.file_id, self.page_no, self.chunk_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_case_and_punctuation() {
        assert_eq!(normalize("HOA Rules & Regs"), "hoa_rules_regs");
        assert_eq!(normalize("--Leading__trailing--"), "leading_trailing");
        assert_eq!(normalize("Doc1"), "doc1");
    }

    #[test]
    fn test_normalize_strips_zero_padding() {
        assert_eq!(normalize("report_007_02"), "report_7_2");
        assert_eq!(normalize("report_000_00"), "report_0_0");
        assert_eq!(normalize("v2019"), "v2019");
    }

    #[test]
    fn test_normalize_idempotent() {
        for raw in ["Doc-1_01_003", "A  B  C", "ßpecial—chars 12", "x_0_0"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn test_file_id_ignores_extension() {
        assert_eq!(file_id_for("docs/Doc1.PDF"), "doc1");
        assert_eq!(file_id_for("Covenants, Conditions.docx"), "covenants_conditions");
    }

    #[test]
    fn test_chunk_id_is_canonical() {
        let id = chunk_id(&file_id_for("Report 007.pdf"), 12, 3);
        assert_eq!(id, "report_7_12_3");
        assert_eq!(normalize(&id), id);
    }

    #[test]
    fn test_parse_chunk_ref() {
        let r = parse_chunk_ref("DOC1-01-002").unwrap();
        assert_eq!(r.file_id, "doc1");
        assert_eq!(r.page_no, 1);
        assert_eq!(r.chunk_idx, 2);
        assert_eq!(r.to_id(), "doc1_1_2");
    }

    #[test]
    fn test_parse_chunk_ref_rejects_malformed() {
        assert!(parse_chunk_ref("").is_none());
        assert!(parse_chunk_ref("doc1").is_none());
        assert!(parse_chunk_ref("doc1_a_0").is_none());
        assert!(parse_chunk_ref("1_2").is_none());
    }
}
