//! The accept/flag decision rule.
//!
//! A cited sentence's effective score is the maximum cosine similarity
//! across its cited chunks: a sentence citing several sources is
//! supported if any one of them substantiates it. Scores at or above the
//! threshold are accepted. When judge mode is on, scores below
//! `threshold + margin` are escalated and the judge's verdict replaces
//! the similarity verdict.

use crate::models::{FlagReason, JudgeOutcome, Verdict};

/// Default similarity threshold.
pub const DEFAULT_THRESHOLD: f32 = 0.85;

/// Default escalation band above the threshold.
pub const DEFAULT_JUDGE_MARGIN: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    pub threshold: f32,
    /// `Some(margin)` enables judge escalation.
    pub judge_margin: Option<f32>,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            judge_margin: None,
        }
    }
}

impl DecisionPolicy {
    /// Similarity-only verdict. Exactly `threshold` is accepted; NaN is flagged.
    pub fn verdict(&self, score: f32) -> (Verdict, Option<FlagReason>) {
        if score >= self.threshold {
            (Verdict::Accepted, None)
        } else {
            (Verdict::Flagged, Some(FlagReason::LowSimilarity))
        }
    }

    /// Whether a score is near or below the threshold and judge mode is on.
    pub fn should_escalate(&self, score: f32) -> bool {
        match self.judge_margin {
            Some(margin) => !(score >= self.threshold + margin),
            None => false,
        }
    }

    /// Final verdict once the judge has ruled.
    pub fn with_judge(&self, outcome: &JudgeOutcome) -> (Verdict, Option<FlagReason>) {
        if outcome.is_drift {
            (Verdict::Flagged, Some(FlagReason::JudgeDrift))
        } else {
            (Verdict::Accepted, None)
        }
    }
}

/// Pick the highest-scoring candidate. Ties keep the earliest citation.
pub fn best_match<'a, I>(scores: I) -> Option<(&'a str, f32)>
where
    I: IntoIterator<Item = (&'a str, f32)>,
{
    let mut best: Option<(&'a str, f32)> = None;
    for (id, score) in scores {
        match best {
            Some((_, s)) if !(score > s) => {}
            _ => best = Some((id, score)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary_is_accepted() {
        let policy = DecisionPolicy::default();
        assert_eq!(policy.verdict(0.85).0, Verdict::Accepted);
        let (verdict, reason) = policy.verdict(0.85 - 1e-6);
        assert_eq!(verdict, Verdict::Flagged);
        assert_eq!(reason, Some(FlagReason::LowSimilarity));
    }

    #[test]
    fn test_custom_threshold() {
        let policy = DecisionPolicy {
            threshold: 0.5,
            judge_margin: None,
        };
        assert_eq!(policy.verdict(0.5).0, Verdict::Accepted);
        assert_eq!(policy.verdict(0.4999).0, Verdict::Flagged);
    }

    #[test]
    fn test_nan_is_flagged() {
        assert_eq!(DecisionPolicy::default().verdict(f32::NAN).0, Verdict::Flagged);
    }

    #[test]
    fn test_escalation_band() {
        let policy = DecisionPolicy {
            threshold: 0.85,
            judge_margin: Some(0.05),
        };
        assert!(policy.should_escalate(0.2));
        assert!(policy.should_escalate(0.87));
        assert!(!policy.should_escalate(0.95));
        assert!(!DecisionPolicy::default().should_escalate(0.1));
    }

    #[test]
    fn test_judge_overrides_both_ways() {
        let policy = DecisionPolicy::default();
        let clean = JudgeOutcome {
            is_drift: false,
            confidence: 0.9,
            rationale: "faithful paraphrase".into(),
        };
        let drift = JudgeOutcome {
            is_drift: true,
            confidence: 0.8,
            rationale: "must vs may".into(),
        };
        assert_eq!(policy.with_judge(&clean), (Verdict::Accepted, None));
        assert_eq!(
            policy.with_judge(&drift),
            (Verdict::Flagged, Some(FlagReason::JudgeDrift))
        );
    }

    #[test]
    fn test_best_match_takes_max() {
        let scores = vec![("a_1_0", 0.2), ("a_1_1", 0.9), ("a_1_2", 0.5)];
        assert_eq!(best_match(scores), Some(("a_1_1", 0.9)));
    }

    #[test]
    fn test_best_match_tie_keeps_first() {
        let scores = vec![("a_1_0", 0.7), ("a_1_1", 0.7)];
        assert_eq!(best_match(scores).unwrap().0, "a_1_0");
        assert_eq!(best_match(Vec::new()), None);
    }
}
