//! Core data models used throughout Citation Drift.
//!
//! These types represent the chunks, draft sentences, and flags that flow
//! through the ingestion and drift-detection pipeline. All of them are
//! serializable because each one ends up in a persisted artifact.

use serde::{Deserialize, Serialize};

/// A contiguous span of source text with a stable identifier.
///
/// `chunk_id` has the form `<file_id>_<page_no>_<chunk_idx>`; see
/// [`crate::ident`] for how each segment is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    /// Corpus-relative path of the document the chunk came from.
    pub source_file: String,
    /// 1-based page (or slide) number; `0` for un-paginated formats.
    pub page_no: u32,
}

/// One unit of generated summary text with the chunk ids it cites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSentence {
    /// Zero-based ordinal of the sentence within the draft.
    pub position: usize,
    /// Sentence text with citation markers removed.
    pub text: String,
    /// Canonical chunk ids in first-citation order, without duplicates.
    pub citations: Vec<String>,
    /// Source span quoted verbatim by a structured draft, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_source: Option<String>,
}

impl DraftSentence {
    /// Whether the sentence has anything to be compared against.
    pub fn is_cited(&self) -> bool {
        !self.citations.is_empty() || self.quoted_source.is_some()
    }
}

/// Final verdict for one draft sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    Flagged,
    /// The sentence cites nothing and was passed through for information.
    Uncited,
}

/// Why a sentence was flagged.
///
/// `MissingSource` is an integrity problem (stale draft or corpus) and
/// must never be conflated with the content judgments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    LowSimilarity,
    MissingSource,
    JudgeDrift,
}

/// Result of escalating a sentence to the semantic judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeOutcome {
    pub is_drift: bool,
    pub confidence: f32,
    pub rationale: String,
}

/// The detector's record for one draft sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub position: usize,
    pub sentence: String,
    pub cited_ids: Vec<String>,
    /// Source text of every resolved citation, in citation order.
    pub cited_text: Vec<String>,
    /// Effective similarity. `None` for missing sources and uncited sentences.
    #[serde(default)]
    pub score: Option<f32>,
    /// Chunk id (or `"quoted_source"`) that produced `score`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_match: Option<String>,
    pub threshold: f32,
    pub verdict: Verdict,
    #[serde(default)]
    pub reason: Option<FlagReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge: Option<JudgeOutcome>,
}

impl Flag {
    pub fn is_flagged(&self) -> bool {
        self.verdict == Verdict::Flagged
    }
}
