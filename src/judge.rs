//! Semantic-equivalence judge for borderline sentences.
//!
//! When judge mode is on, sentences whose similarity falls near or below
//! the threshold are sent, together with the cited source text, to a
//! chat model that answers with a structured verdict:
//!
//! ```json
//! { "is_drift": true, "confidence": 0.8, "reasoning": "source says may, summary says must" }
//! ```
//!
//! The verdict replaces the similarity verdict. Retrying is applied by the
//! drift detector with the same [`RetryPolicy`](crate::embedding::RetryPolicy)
//! the embedding client uses.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use citation_drift_core::models::JudgeOutcome;

use crate::config::JudgeConfig;
use crate::embedding::{ProviderError, OPENAI_DEFAULT_BASE_URL};

const SYSTEM_PROMPT: &str = "You are an expert document reviewer. Analyze the summary sentence \
against the source text and return a structured judgment about semantic drift as a JSON object \
with the keys is_drift (boolean), confidence (number between 0 and 1) and reasoning (string).";

/// Decides whether a summary sentence faithfully represents its source.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, sentence: &str, source: &str) -> Result<JudgeOutcome, ProviderError>;

    fn model_name(&self) -> &str;
}

/// Build the user prompt for one sentence.
pub fn build_prompt(sentence: &str, source: &str) -> String {
    format!(
        "Determine whether the summary sentence accurately represents the source text \
without introducing factual errors, omissions, or misleading interpretations.

SOURCE TEXT:
{source}

SUMMARY SENTENCE:
{sentence}

Evaluate whether the summary sentence:
1. Accurately represents the key facts and requirements from the source
2. Does not add information not present in the source
3. Does not omit critical information that would mislead readers
4. Maintains the same meaning and intent

Examples of drift:
- Adding requirements not in the source (\"must\" vs \"may\")
- Omitting critical exceptions or conditions
- Changing numerical values or timeframes
- Misrepresenting who has authority or responsibility
- Adding or removing penalties or consequences

Examples of acceptable paraphrasing:
- Restating in clearer language
- Reorganizing information for better flow
- Using synonyms for technical terms
- Condensing while preserving all key points"
    )
}

#[derive(Deserialize)]
struct Judgment {
    is_drift: bool,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
}

fn default_confidence() -> f32 {
    0.5
}

/// Parse the model's reply into an outcome. Tolerates a fenced code block.
pub fn parse_judgment(content: &str) -> Result<JudgeOutcome, ProviderError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let judgment: Judgment = serde_json::from_str(body)
        .map_err(|e| ProviderError::Fatal(format!("judge returned invalid JSON ({}): {}", e, body)))?;

    Ok(JudgeOutcome {
        is_drift: judgment.is_drift,
        confidence: if judgment.confidence.is_finite() {
            judgment.confidence.clamp(0.0, 1.0)
        } else {
            0.5
        },
        rationale: judgment.reasoning,
    })
}

/// Judge backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiJudge {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiJudge {
    pub fn new(config: &JudgeConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set (required by the judge)"),
        };
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key,
            base_url,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Judge for OpenAiJudge {
    async fn judge(&self, sentence: &str, source: &str) -> Result<JudgeOutcome, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(sentence, source) },
            ],
            "response_format": { "type": "json_object" },
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest("OpenAI judge", e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("OpenAI judge", status, &text));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Fatal(format!("Invalid judge response: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Fatal("judge response had no content".to_string()))?;

        parse_judgment(&content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Create the judge named by `config.provider`.
pub fn create_judge(config: &JudgeConfig) -> Result<Box<dyn Judge>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiJudge::new(config)?)),
        other => bail!("Unknown judge provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let out = parse_judgment(r#"{"is_drift": true, "confidence": 0.8, "reasoning": "must vs may"}"#)
            .unwrap();
        assert!(out.is_drift);
        assert_eq!(out.confidence, 0.8);
        assert_eq!(out.rationale, "must vs may");
    }

    #[test]
    fn parses_fenced_json_and_clamps() {
        let out = parse_judgment("```json\n{\"is_drift\": false, \"confidence\": 3}\n```").unwrap();
        assert!(!out.is_drift);
        assert_eq!(out.confidence, 1.0);
        assert_eq!(out.rationale, "");
    }

    #[test]
    fn invalid_reply_is_fatal() {
        assert!(matches!(
            parse_judgment("I think it drifts."),
            Err(ProviderError::Fatal(_))
        ));
    }

    #[test]
    fn prompt_contains_both_texts() {
        let prompt = build_prompt("Pets are permitted.", "Residents may keep pets.");
        assert!(prompt.contains("SOURCE TEXT:\nResidents may keep pets."));
        assert!(prompt.contains("SUMMARY SENTENCE:\nPets are permitted."));
    }
}
