//! Synthesizes all per-case verdicts into one narrative validation report.

use crate::domain::error::{AppError, Result};
use crate::domain::evren::EvrenOutput;
use crate::domain::llm_config::LLMConfig;
use crate::domain::test_case::TestCase;
use crate::domain::verdict::EvaluationResult;
use crate::infrastructure::llm_clients::LLMClient;
use crate::shared::token_cost::PriceTable;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

static CODE_BLOCK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n?(.*?)\n?```$").unwrap());

static TITLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""title"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

static SUMMARY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""summary"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

const TITLE_MAX_CHARS: usize = 80;

/// One rich test-case report: the case's specification, Evren's output, and
/// the evaluator verdict. The ordered list of these is the summarizer input.
#[derive(Debug, Serialize, Clone)]
pub struct RichReport {
    pub specs: RichReportSpecs,
    pub results: RichReportResults,
    pub evaluator_verdict: RichReportVerdict,
}

#[derive(Debug, Serialize, Clone)]
pub struct RichReportSpecs {
    pub input: String,
    pub expected_behavior: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forbidden: Option<String>,
    pub expected_state: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct RichReportResults {
    pub evren_response: String,
    pub detected_states: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct RichReportVerdict {
    pub success: bool,
    pub score: f64,
    pub reason: String,
}

pub fn build_rich_report(
    test_case: &TestCase,
    output: &EvrenOutput,
    verdict: &EvaluationResult,
) -> RichReport {
    RichReport {
        specs: RichReportSpecs {
            input: test_case.input_message.clone(),
            expected_behavior: test_case.expected_behavior.clone(),
            forbidden: test_case
                .forbidden
                .clone()
                .filter(|v| !v.trim().is_empty()),
            expected_state: test_case.expected_state.clone(),
        },
        results: RichReportResults {
            evren_response: output.evren_response.clone(),
            detected_states: output.detected_states.clone(),
        },
        evaluator_verdict: RichReportVerdict {
            success: verdict.success,
            score: verdict.score,
            reason: verdict.reason.clone(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub title: String,
    pub summary: String,
    pub cost_usd: f64,
}

#[derive(Deserialize)]
struct SummaryPayload {
    title: Option<String>,
    summary: Option<String>,
}

fn truncate_title(title: &str) -> String {
    title.trim().chars().take(TITLE_MAX_CHARS).collect()
}

fn unescape(value: &str) -> String {
    value.replace("\\\"", "\"").replace("\\n", "\n")
}

/// Extract title and summary from the summarizer's raw text. Prefers a JSON
/// object; falls back to per-field regex extraction; degrades to the raw
/// text itself with an empty title.
pub(crate) fn parse_summary_output(raw: &str) -> (String, String) {
    let mut payload = raw.trim().to_string();
    if let Some(captures) = CODE_BLOCK_PATTERN.captures(&payload) {
        payload = captures[1].trim().to_string();
    }

    let mut title = String::new();
    let mut summary = payload.clone();

    match serde_json::from_str::<SummaryPayload>(&payload) {
        Ok(parsed) => {
            if let Some(parsed_title) = parsed.title {
                title = truncate_title(&parsed_title);
            }
            if let Some(parsed_summary) = parsed.summary {
                summary = parsed_summary.trim().to_string();
            }
        }
        Err(_) => {
            if let Some(captures) = TITLE_PATTERN.captures(&payload) {
                title = truncate_title(unescape(&captures[1]).trim());
            }
            if let Some(captures) = SUMMARY_PATTERN.captures(&payload) {
                summary = unescape(&captures[1]).trim().to_string();
            }
        }
    }

    // Literal \n sequences show up when the model double-escapes.
    summary = summary.replace("\\n", "\n");

    (title, summary)
}

pub struct SummarizeUseCase {
    llm_client: Arc<dyn LLMClient + Send + Sync>,
    price_table: PriceTable,
}

impl SummarizeUseCase {
    pub fn new(llm_client: Arc<dyn LLMClient + Send + Sync>, price_table: PriceTable) -> Self {
        Self {
            llm_client,
            price_table,
        }
    }

    pub async fn run(
        &self,
        reports: &[RichReport],
        config: &LLMConfig,
        system_prompt: &str,
    ) -> Result<SummaryOutcome> {
        let user_message = serde_json::to_string_pretty(reports)
            .map_err(|e| AppError::Internal(format!("Failed to serialize rich reports: {}", e)))?;

        let reply = self
            .llm_client
            .generate(config, system_prompt, &user_message)
            .await?;

        let (title, summary) = parse_summary_output(&reply.text);

        let cost_usd = match (reply.prompt_tokens, reply.completion_tokens) {
            (None, None) => 0.0,
            (prompt, completion) => {
                self.price_table
                    .compute_token_cost(
                        prompt.unwrap_or(0),
                        completion.unwrap_or(0),
                        &config.model,
                    )
                    .cost_usd
            }
        };

        Ok(SummaryOutcome {
            title,
            summary,
            cost_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_summary_is_parsed() {
        let raw = r#"{"title": "Validation run", "summary": "All cases passed."}"#;
        let (title, summary) = parse_summary_output(raw);
        assert_eq!(title, "Validation run");
        assert_eq!(summary, "All cases passed.");
    }

    #[test]
    fn test_fenced_summary_is_unwrapped() {
        let raw = "```json\n{\"title\": \"T\", \"summary\": \"S\"}\n```";
        let (title, summary) = parse_summary_output(raw);
        assert_eq!(title, "T");
        assert_eq!(summary, "S");
    }

    #[test]
    fn test_invalid_json_falls_back_to_regex() {
        // Raw newline inside the summary value breaks strict JSON.
        let raw = "{\"title\": \"Partial run\", \"summary\": \"line one\nline two\"}";
        let (title, summary) = parse_summary_output(raw);
        assert_eq!(title, "Partial run");
        assert_eq!(summary, "line one\nline two");
    }

    #[test]
    fn test_plain_text_becomes_summary_with_empty_title() {
        let raw = "The model behaved well across all ten cases.";
        let (title, summary) = parse_summary_output(raw);
        assert!(title.is_empty());
        assert_eq!(summary, raw);
    }

    #[test]
    fn test_literal_newlines_are_unescaped() {
        let raw = r#"{"title": "T", "summary": "first\nsecond"}"#;
        let (_, summary) = parse_summary_output(raw);
        assert_eq!(summary, "first\nsecond");
    }

    #[test]
    fn test_title_is_truncated() {
        let long_title = "x".repeat(120);
        let raw = format!(r#"{{"title": "{}", "summary": "S"}}"#, long_title);
        let (title, _) = parse_summary_output(&raw);
        assert_eq!(title.chars().count(), 80);
    }
}
