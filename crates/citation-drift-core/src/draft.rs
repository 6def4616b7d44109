//! Draft parsing.
//!
//! A draft is either markdown with inline citation markers or a
//! structured JSON document. Both variants are lowered into the same raw
//! sentence units and then go through one normalization step, so the
//! drift detector never needs to know which format it was given.
//!
//! # Citation markers
//!
//! `[C-<chunk_id>]` (or the fullwidth `【C-<chunk_id>】`, `C` in either
//! case). Ids are normalized with [`crate::ident::normalize`] and must
//! have the shape `<file_id>_<page>_<idx>`. Anything else is recorded as
//! a [`MalformedCitation`] and parsing carries on.
//!
//! Markers written right after a sentence's full stop (`law. [C-x]` or
//! `law.[C-x]`) belong to that sentence.
//!
//! # Structured drafts
//!
//! ```json
//! {
//!   "executive_summary": "optional, uncited",
//!   "sections": [
//!     {
//!       "summary_text": "Pets are permitted.",
//!       "source_chunks": ["doc1_1_0"],
//!       "source_text": "Domestic animals are permitted subject to local law."
//!     }
//!   ]
//! }
//! ```
//!
//! Each section's `summary_text` is sentence-split like a markdown
//! paragraph and every resulting sentence cites the section's
//! `source_chunks`. `source_lines` (joined by newlines) or `source_text`
//! is kept as the sentence's quoted source.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chunk::{collapse_whitespace, split_sentences};
use crate::ident::parse_chunk_ref;
use crate::models::DraftSentence;

const MARKER_PATTERN: &str = r"(?:\[|【)\s*[Cc]-([^\]】]*)(?:\]|】)";

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(MARKER_PATTERN).expect("valid marker regex"))
}

/// Sentence punctuation immediately followed by one or more markers.
fn trailing_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"([.!?])((?:\s*{})+)", MARKER_PATTERN)).expect("valid marker regex")
    })
}

fn space_before_punct_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+([.,;:!?])").expect("valid punctuation regex"))
}

fn md_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:#{1,6}\s+|>\s?|[-*+]\s+|\d+[.)]\s+)").expect("valid prefix regex")
    })
}

/// A draft in one of the supported input formats.
#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    Markdown(String),
    Structured(StructuredDraft),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredDraft {
    #[serde(default)]
    pub executive_summary: Option<String>,
    #[serde(default)]
    pub sections: Vec<DraftSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftSection {
    pub summary_text: String,
    #[serde(default)]
    pub source_chunks: Vec<String>,
    #[serde(default)]
    pub source_text: Option<String>,
    #[serde(default)]
    pub source_lines: Vec<String>,
    #[serde(default)]
    pub source_document: Option<String>,
    /// Free-form: research tools emit numbers or strings like `"Unknown"`.
    #[serde(default)]
    pub source_page: Option<serde_json::Value>,
}

/// A citation marker whose id could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MalformedCitation {
    /// Position of the sentence the marker appeared in.
    pub position: usize,
    pub marker: String,
}

impl std::fmt::Display for MalformedCitation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "malformed citation {:?} in sentence {}",
            self.marker, self.position
        )
    }
}

/// Output of [`Draft::parse`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDraft {
    pub sentences: Vec<DraftSentence>,
    pub malformed: Vec<MalformedCitation>,
    /// Well-formed citations found in a draft with no sentence to attach
    /// them to. Still checked against the index so a dangling id is reported.
    pub unattached: Vec<String>,
}

impl ParsedDraft {
    pub fn cited(&self) -> impl Iterator<Item = &DraftSentence> {
        self.sentences.iter().filter(|s| s.is_cited())
    }
}

/// One sentence before normalization.
struct RawSentence {
    text: String,
    extra_citations: Vec<String>,
    quoted_source: Option<String>,
}

impl Draft {
    /// Parse a structured JSON draft.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Draft::Structured(serde_json::from_str(json)?))
    }

    pub fn parse(&self) -> ParsedDraft {
        let raw = match self {
            Draft::Markdown(text) => markdown_units(text),
            Draft::Structured(doc) => structured_units(doc),
        };
        normalize_units(raw)
    }
}

fn block_units(block: &str, extra: &[String], quoted: Option<&String>) -> Vec<RawSentence> {
    let attached = trailing_marker_re().replace_all(block, " $2$1");
    split_sentences(&attached)
        .into_iter()
        .map(|s| RawSentence {
            text: s.to_string(),
            extra_citations: extra.to_vec(),
            quoted_source: quoted.cloned(),
        })
        .collect()
}

fn markdown_units(text: &str) -> Vec<RawSentence> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_fence = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            flush(&mut current, &mut blocks);
            continue;
        }
        if in_fence {
            continue;
        }
        if trimmed.is_empty() || is_rule(trimmed) {
            flush(&mut current, &mut blocks);
            continue;
        }

        let structural = md_prefix_re().is_match(line);
        let content = md_prefix_re().replace(line, "");
        if structural {
            // Headings and list items stand alone.
            flush(&mut current, &mut blocks);
            current.push_str(content.trim());
            flush(&mut current, &mut blocks);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(content.trim());
        }
    }
    flush(&mut current, &mut blocks);

    blocks
        .iter()
        .flat_map(|b| block_units(b, &[], None))
        .collect()
}

fn flush(current: &mut String, blocks: &mut Vec<String>) {
    if !current.trim().is_empty() {
        blocks.push(std::mem::take(current));
    }
    current.clear();
}

fn is_rule(line: &str) -> bool {
    line.len() >= 3
        && (line.chars().all(|c| c == '-')
            || line.chars().all(|c| c == '*')
            || line.chars().all(|c| c == '_'))
}

fn structured_units(doc: &StructuredDraft) -> Vec<RawSentence> {
    let mut units = Vec::new();

    if let Some(summary) = doc.executive_summary.as_deref() {
        units.extend(block_units(summary.trim(), &[], None));
    }

    for section in &doc.sections {
        let quoted = if !section.source_lines.is_empty() {
            Some(section.source_lines.join("\n"))
        } else {
            section
                .source_text
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        units.extend(block_units(
            section.summary_text.trim(),
            &section.source_chunks,
            quoted.as_ref(),
        ));
    }

    units
}

/// The one normalization step both formats share.
fn normalize_units(raw: Vec<RawSentence>) -> ParsedDraft {
    let mut parsed = ParsedDraft::default();
    // Citations from marker-only fragments that precede every sentence.
    let mut pending: Vec<String> = Vec::new();
    let mut pending_malformed: Vec<String> = Vec::new();

    for unit in raw {
        let mut citations: Vec<String> = Vec::new();
        let mut malformed: Vec<String> = Vec::new();

        let inline = marker_re()
            .captures_iter(&unit.text)
            .map(|cap| cap[1].to_string())
            .collect::<Vec<_>>();

        for raw_id in inline.iter().chain(unit.extra_citations.iter()) {
            match parse_chunk_ref(raw_id) {
                Some(r) => push_unique(&mut citations, r.to_id()),
                None => malformed.push(raw_id.clone()),
            }
        }

        let stripped = marker_re().replace_all(&unit.text, "");
        let text = space_before_punct_re()
            .replace_all(&collapse_whitespace(&stripped), "$1")
            .trim()
            .to_string();

        if text.is_empty() {
            // A marker-only fragment belongs to the sentence before it, or
            // to the next one when it opens the draft.
            match parsed.sentences.last_mut() {
                Some(prev) => {
                    for id in citations {
                        push_unique(&mut prev.citations, id);
                    }
                    let position = prev.position;
                    parsed
                        .malformed
                        .extend(malformed.into_iter().map(|marker| MalformedCitation { position, marker }));
                }
                None => {
                    for id in citations {
                        push_unique(&mut pending, id);
                    }
                    pending_malformed.extend(malformed);
                }
            }
            continue;
        }

        let position = parsed.sentences.len();
        let citations = if pending.is_empty() {
            citations
        } else {
            let mut merged = std::mem::take(&mut pending);
            for id in citations {
                push_unique(&mut merged, id);
            }
            merged
        };
        parsed.malformed.extend(
            pending_malformed
                .drain(..)
                .chain(malformed)
                .map(|marker| MalformedCitation { position, marker }),
        );

        parsed.sentences.push(DraftSentence {
            position,
            text,
            citations,
            quoted_source: unit.quoted_source,
        });
    }

    // No sentence at all to carry them.
    parsed.unattached = pending;
    parsed.malformed.extend(
        pending_malformed
            .into_iter()
            .map(|marker| MalformedCitation { position: 0, marker }),
    );

    parsed
}

fn push_unique(ids: &mut Vec<String>, id: String) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(text: &str) -> ParsedDraft {
        Draft::Markdown(text.to_string()).parse()
    }

    #[test]
    fn test_inline_markers_extracted_and_stripped() {
        let parsed = md("Pets are permitted [C-doc1_1_0]. Fees apply.");
        assert_eq!(parsed.sentences.len(), 2);
        assert_eq!(parsed.sentences[0].text, "Pets are permitted.");
        assert_eq!(parsed.sentences[0].citations, vec!["doc1_1_0"]);
        assert!(parsed.sentences[1].citations.is_empty());
        assert!(!parsed.sentences[1].is_cited());
    }

    #[test]
    fn test_marker_after_full_stop_belongs_to_sentence() {
        for text in [
            "Pets are permitted. [C-doc1_1_0] Fees apply.",
            "Pets are permitted.[C-doc1_1_0] Fees apply.",
        ] {
            let parsed = md(text);
            assert_eq!(parsed.sentences.len(), 2, "{}", text);
            assert_eq!(parsed.sentences[0].text, "Pets are permitted.");
            assert_eq!(parsed.sentences[0].citations, vec!["doc1_1_0"]);
            assert_eq!(parsed.sentences[1].text, "Fees apply.");
            assert!(parsed.sentences[1].citations.is_empty());
        }
    }

    #[test]
    fn test_multiple_and_fullwidth_markers() {
        let parsed = md("Quiet hours start at ten 【C-Rules-02-001】[c-rules_2_3][C-rules_2_3].");
        assert_eq!(parsed.sentences[0].citations, vec!["rules_2_1", "rules_2_3"]);
        assert_eq!(parsed.sentences[0].text, "Quiet hours start at ten.");
    }

    #[test]
    fn test_malformed_marker_is_reported_and_parsing_continues() {
        let parsed = md("Bad cite [C-]. Also bad [C-nonsense]. Good [C-doc1_1_0].");
        assert_eq!(parsed.sentences.len(), 3);
        assert_eq!(parsed.malformed.len(), 2);
        assert_eq!(parsed.malformed[0].position, 0);
        assert_eq!(parsed.malformed[1].marker, "nonsense");
        assert_eq!(parsed.sentences[2].citations, vec!["doc1_1_0"]);
    }

    #[test]
    fn test_markdown_structure_stripped() {
        let text = "# Pet Policy\n\n- Dogs are allowed [C-doc1_1_0].\n- Cats too.\n\n\
                    ```\nignored code.\n```\n\n> Quoted line here.\n\n---\n";
        let parsed = md(text);
        let texts: Vec<_> = parsed.sentences.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["Pet Policy", "Dogs are allowed.", "Cats too.", "Quoted line here."]
        );
        let positions: Vec<_> = parsed.sentences.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_wrapped_paragraph_joins_lines() {
        let parsed = md("Owners must keep\nlawns trimmed [C-doc1_2_0].");
        assert_eq!(parsed.sentences.len(), 1);
        assert_eq!(parsed.sentences[0].text, "Owners must keep lawns trimmed.");
    }

    #[test]
    fn test_marker_only_line_attaches_to_previous() {
        let parsed = md("Owners must keep lawns trimmed.\n\n[C-doc1_2_0]");
        assert_eq!(parsed.sentences.len(), 1);
        assert_eq!(parsed.sentences[0].citations, vec!["doc1_2_0"]);
    }

    #[test]
    fn test_leading_marker_block_carries_to_next_sentence() {
        let parsed = md("[C-doc1_1_9]\n\nPets are permitted [C-doc1_1_0].");
        assert_eq!(parsed.sentences.len(), 1);
        assert_eq!(parsed.sentences[0].citations, vec!["doc1_1_9", "doc1_1_0"]);
        assert!(parsed.unattached.is_empty());
    }

    #[test]
    fn test_marker_only_draft_keeps_citations() {
        let parsed = md("[C-doc1_1_9] [C-bad]");
        assert!(parsed.sentences.is_empty());
        assert_eq!(parsed.unattached, vec!["doc1_1_9"]);
        assert_eq!(parsed.malformed.len(), 1);
        assert_eq!(parsed.malformed[0].marker, "bad");
    }

    #[test]
    fn test_malformed_marker_in_trailing_fragment_uses_previous_position() {
        let parsed = md("Fees apply. Pets are permitted.\n\n[C-bad]");
        assert_eq!(parsed.sentences.len(), 2);
        assert_eq!(parsed.malformed.len(), 1);
        assert_eq!(parsed.malformed[0].position, 1);
    }

    #[test]
    fn test_markers_only_section_carries_to_next_section() {
        let json = r#"{
            "sections": [
                {"summary_text": "[C-doc1_1_9]"},
                {"summary_text": "Pets are permitted.", "source_chunks": ["doc1_1_0"]}
            ]
        }"#;
        let parsed = Draft::from_json(json).unwrap().parse();
        assert_eq!(parsed.sentences.len(), 1);
        assert_eq!(parsed.sentences[0].citations, vec!["doc1_1_9", "doc1_1_0"]);
    }

    #[test]
    fn test_markdown_and_json_roundtrip_identically() {
        let markdown = "Pets are permitted [C-doc1_1_0]. Residents must register pets [C-doc1_1_1].\n\nFees apply.";
        let json = r#"{
            "sections": [
                {"summary_text": "Pets are permitted.", "source_chunks": ["doc1_1_0"]},
                {"summary_text": "Residents must register pets.", "source_chunks": ["DOC1-1-1"]},
                {"summary_text": "Fees apply."}
            ]
        }"#;
        let from_md = md(markdown);
        let from_json = Draft::from_json(json).unwrap().parse();
        assert_eq!(from_md.sentences, from_json.sentences);
    }

    #[test]
    fn test_structured_quoted_source_and_summary() {
        let json = r#"{
            "executive_summary": "Overview of the rules. Nothing cited here.",
            "sections": [
                {
                    "summary_text": "The annual assessment is $500.",
                    "source_text": "ignored when lines exist",
                    "source_lines": ["The annual assessment", "is $500 per lot."],
                    "source_page": "Unknown"
                },
                {"summary_text": "Two sentences. Same citation.", "source_chunks": ["fees_3_0"], "source_text": "Fee text."}
            ]
        }"#;
        let parsed = Draft::from_json(json).unwrap().parse();
        assert_eq!(parsed.sentences.len(), 5);
        assert!(!parsed.sentences[0].is_cited());
        assert_eq!(
            parsed.sentences[2].quoted_source.as_deref(),
            Some("The annual assessment\nis $500 per lot.")
        );
        assert!(parsed.sentences[2].citations.is_empty());
        assert!(parsed.sentences[2].is_cited());
        assert_eq!(parsed.sentences[3].citations, vec!["fees_3_0"]);
        assert_eq!(parsed.sentences[4].citations, vec!["fees_3_0"]);
        assert_eq!(parsed.sentences[4].quoted_source.as_deref(), Some("Fee text."));
        assert_eq!(parsed.cited().count(), 3);
    }

    #[test]
    fn test_structured_malformed_source_chunk() {
        let json = r#"{"sections": [{"summary_text": "A claim.", "source_chunks": ["oops"]}]}"#;
        let parsed = Draft::from_json(json).unwrap().parse();
        assert_eq!(parsed.malformed.len(), 1);
        assert!(parsed.sentences[0].citations.is_empty());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(Draft::from_json("{not json").is_err());
    }
}
