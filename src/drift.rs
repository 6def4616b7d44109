//! Drift detection over a parsed draft.
//!
//! For every draft sentence the detector produces exactly one [`Flag`]
//! record, in draft order:
//!
//! - **uncited** sentences are recorded with [`Verdict::Uncited`] and no score;
//! - a sentence citing any id absent from the index is flagged with
//!   [`FlagReason::MissingSource`], no score, and the missing ids; it is
//!   never scored or sent to the judge;
//! - otherwise the sentence is embedded and compared with each cited
//!   chunk by cosine similarity; the maximum is the effective score and
//!   [`DecisionPolicy`] decides. A structured-draft sentence with only a
//!   quoted source span is compared with the embedding of that span.
//!
//! With a judge configured, scores below `threshold + margin` are
//! escalated and the judge's verdict is final.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use citation_drift_core::decision::{best_match, DecisionPolicy};
use citation_drift_core::draft::ParsedDraft;
use citation_drift_core::embedding::cosine_similarity;
use citation_drift_core::index::{ChunkIndex, IndexedChunk};
use citation_drift_core::models::{DraftSentence, Flag, FlagReason, Verdict};

use crate::embedding::{EmbeddingClient, RetryPolicy};
use crate::judge::Judge;
use crate::progress::{Phase, ProgressEvent, ProgressReporter};

/// Marker stored in [`Flag::best_match`] when the score came from a quoted span.
pub const QUOTED_SOURCE: &str = "quoted_source";

/// Counters for one detection run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectStats {
    pub sentences: usize,
    pub accepted: usize,
    pub flagged: usize,
    pub uncited: usize,
    pub missing_source: usize,
    pub escalations: usize,
    /// Escalations where the judge reversed the similarity verdict.
    pub judge_overrides: usize,
    pub judge_retries: usize,
    /// Every cited id that did not resolve, in first-seen order.
    pub dangling: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DriftReport {
    pub flags: Vec<Flag>,
    pub stats: DetectStats,
}

/// What a scorable sentence is compared against.
enum Target<'a> {
    Chunks(Vec<IndexedChunk<'a>>),
    Quoted(&'a str),
}

pub struct DriftDetector<'a> {
    index: &'a ChunkIndex,
    client: &'a EmbeddingClient,
    policy: DecisionPolicy,
    judge: Option<&'a dyn Judge>,
    retry: RetryPolicy,
}

impl<'a> DriftDetector<'a> {
    pub fn new(index: &'a ChunkIndex, client: &'a EmbeddingClient, policy: DecisionPolicy) -> Self {
        Self {
            index,
            client,
            policy,
            judge: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Enable escalation. Only takes effect if `policy.judge_margin` is set.
    pub fn with_judge(mut self, judge: &'a dyn Judge, retry: RetryPolicy) -> Self {
        self.judge = Some(judge);
        self.retry = retry;
        self
    }

    pub async fn detect(
        &self,
        draft: &'a ParsedDraft,
        progress: &dyn ProgressReporter,
    ) -> Result<DriftReport> {
        let mut report = DriftReport::default();
        report.stats.sentences = draft.sentences.len();

        for id in &draft.unattached {
            if self.index.lookup(id).is_err() && !report.stats.dangling.contains(id) {
                warn!(id = %id, "citation with no sentence is absent from the index");
                report.stats.dangling.push(id.clone());
            }
        }

        // Resolve citations first so only scorable sentences are embedded.
        let mut slots: Vec<Option<Target<'a>>> = Vec::with_capacity(draft.sentences.len());
        let mut to_embed: Vec<String> = Vec::new();
        for sentence in &draft.sentences {
            let target = self.resolve(sentence, &mut report);
            if let Some(t) = &target {
                to_embed.push(sentence.text.clone());
                if let Target::Quoted(q) = t {
                    to_embed.push(q.to_string());
                }
            }
            slots.push(target);
        }

        progress.report(ProgressEvent::Started {
            phase: Phase::Embedding,
        });
        let vectors = self
            .client
            .get_embeddings_with_progress(&to_embed, progress)
            .await
            .context("Failed to embed draft sentences")?;
        let mut vectors = vectors.into_iter();

        progress.report(ProgressEvent::Started {
            phase: Phase::Checking,
        });
        let total = draft.sentences.len() as u64;

        for (i, (sentence, slot)) in draft.sentences.iter().zip(slots).enumerate() {
            if let Some(target) = slot {
                let sentence_vec = vectors.next().context("embedding count mismatch")?;
                let flag = match target {
                    Target::Chunks(chunks) => {
                        let scores = chunks
                            .iter()
                            .map(|c| (c.chunk.chunk_id.as_str(), cosine_similarity(&sentence_vec, c.vector)));
                        let (best, score) = best_match(scores).context("cited sentence without chunks")?;
                        let cited_text = chunks.iter().map(|c| c.text().to_string()).collect();
                        self.decide(sentence, cited_text, best, score, &mut report.stats)
                            .await?
                    }
                    Target::Quoted(quoted) => {
                        let quoted_vec = vectors.next().context("embedding count mismatch")?;
                        let score = cosine_similarity(&sentence_vec, &quoted_vec);
                        self.decide(
                            sentence,
                            vec![quoted.to_string()],
                            QUOTED_SOURCE,
                            score,
                            &mut report.stats,
                        )
                        .await?
                    }
                };
                if let Some(judge) = &flag.judge {
                    report.stats.escalations += 1;
                    let similarity_verdict = self.policy.verdict(flag.score.unwrap_or(f32::NAN)).0;
                    if similarity_verdict != flag.verdict {
                        report.stats.judge_overrides += 1;
                    }
                    debug!(position = sentence.position, is_drift = judge.is_drift, "judge ruled");
                }
                report.flags.push(flag);
            }
            progress.report(ProgressEvent::Advanced {
                phase: Phase::Checking,
                n: i as u64 + 1,
                total,
            });
        }

        report.flags.sort_by_key(|f| f.position);
        for flag in &report.flags {
            match flag.verdict {
                Verdict::Accepted => report.stats.accepted += 1,
                Verdict::Flagged => report.stats.flagged += 1,
                Verdict::Uncited => report.stats.uncited += 1,
            }
        }
        info!(
            sentences = report.stats.sentences,
            flagged = report.stats.flagged,
            accepted = report.stats.accepted,
            missing = report.stats.missing_source,
            "drift check complete"
        );
        Ok(report)
    }

    /// Resolve a sentence's citations. Returns `None` when the record is
    /// final without scoring (uncited or missing source); that record is
    /// pushed to `report` directly.
    fn resolve(&self, sentence: &'a DraftSentence, report: &mut DriftReport) -> Option<Target<'a>> {
        if !sentence.citations.is_empty() {
            let mut found = Vec::with_capacity(sentence.citations.len());
            let mut missing = Vec::new();
            for id in &sentence.citations {
                match self.index.lookup(id) {
                    Ok(hit) => found.push(hit),
                    Err(_) => missing.push(id.clone()),
                }
            }

            if missing.is_empty() {
                return Some(Target::Chunks(found));
            }

            warn!(
                position = sentence.position,
                missing = ?missing,
                "sentence cites chunks absent from the index"
            );
            for id in &missing {
                if !report.stats.dangling.contains(id) {
                    report.stats.dangling.push(id.clone());
                }
            }
            report.stats.missing_source += 1;
            report.flags.push(Flag {
                position: sentence.position,
                sentence: sentence.text.clone(),
                cited_ids: sentence.citations.clone(),
                cited_text: found.iter().map(|c| c.text().to_string()).collect(),
                score: None,
                best_match: None,
                threshold: self.policy.threshold,
                verdict: Verdict::Flagged,
                reason: Some(FlagReason::MissingSource),
                missing_ids: missing,
                judge: None,
            });
            return None;
        }

        if let Some(quoted) = sentence.quoted_source.as_deref() {
            return Some(Target::Quoted(quoted));
        }

        report.flags.push(Flag {
            position: sentence.position,
            sentence: sentence.text.clone(),
            cited_ids: Vec::new(),
            cited_text: Vec::new(),
            score: None,
            best_match: None,
            threshold: self.policy.threshold,
            verdict: Verdict::Uncited,
            reason: None,
            missing_ids: Vec::new(),
            judge: None,
        });
        None
    }

    async fn decide(
        &self,
        sentence: &DraftSentence,
        cited_text: Vec<String>,
        best: &str,
        score: f32,
        stats: &mut DetectStats,
    ) -> Result<Flag> {
        let (mut verdict, mut reason) = self.policy.verdict(score);
        let mut judged = None;

        if let Some(judge) = self.judge.filter(|_| self.policy.should_escalate(score)) {
            let source = cited_text.join("\n\n");
            let outcome = self
                .retry
                .run(|| judge.judge(&sentence.text, &source), |_, _| stats.judge_retries += 1)
                .await
                .with_context(|| format!("judge failed on sentence {}", sentence.position))?;
            (verdict, reason) = self.policy.with_judge(&outcome);
            judged = Some(outcome);
        }

        Ok(Flag {
            position: sentence.position,
            sentence: sentence.text.clone(),
            cited_ids: sentence.citations.clone(),
            cited_text,
            score: Some(score),
            best_match: Some(best.to_string()),
            threshold: self.policy.threshold,
            verdict,
            reason,
            missing_ids: Vec::new(),
            judge: judged,
        })
    }
}
