//! Turns the evaluator model's near-JSON free text into a complete verdict.
//!
//! The evaluator is prompted to return a single JSON object but in practice
//! forgets to escape quotes and newlines inside the `reason` field. This
//! module never fails: it tries a strict parse of a sanitized copy first and
//! otherwise recovers each field independently from the raw text.

use crate::domain::verdict::{EvaluationResult, VerdictOrigin};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static CODE_BLOCK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").unwrap());

static TEST_CASE_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""test_case_id"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

static SUCCESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)"success"\s*:\s*(?:"(true|false)"|(true|false))"#).unwrap());

static SCORE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#""score"\s*:\s*(\d+)"#).unwrap());

static FLAGS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""flags_detected"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

static REASON_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""reason"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

/// Extract the JSON payload from model text, unwrapping a fenced code block
/// when one is present.
pub(crate) fn extract_json_payload(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(captures) = CODE_BLOCK_PATTERN.captures(trimmed) {
        return captures[1].trim().to_string();
    }
    trimmed.to_string()
}

/// Escape raw control characters inside string literals and escape interior
/// quotes the model forgot to escape. An unescaped quote only terminates the
/// literal when the next non-space character is `,`, `}`, or end of text.
pub(crate) fn sanitize_string_literals(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut result = String::with_capacity(input.len());
    let mut i = 0;

    while i < len {
        let c = chars[i];
        if c != '"' {
            result.push(c);
            i += 1;
            continue;
        }

        result.push(c);
        i += 1;
        while i < len {
            let d = chars[i];
            if d == '\\' {
                result.push(d);
                if i + 1 < len {
                    result.push(chars[i + 1]);
                }
                i += 2;
                continue;
            }
            if d == '"' {
                if closes_literal(&chars[i + 1..]) {
                    result.push(d);
                    i += 1;
                    break;
                }
                result.push_str("\\\"");
                i += 1;
                continue;
            }
            if d <= '\u{001f}' {
                match d {
                    '\n' => result.push_str("\\n"),
                    '\r' => result.push_str("\\r"),
                    '\t' => result.push_str("\\t"),
                    other => result.push_str(&format!("\\u{:04x}", other as u32)),
                }
                i += 1;
                continue;
            }
            result.push(d);
            i += 1;
        }
    }

    result
}

fn closes_literal(rest: &[char]) -> bool {
    match rest.iter().find(|c| !c.is_whitespace()) {
        Some(',') | Some('}') => true,
        Some(_) => false,
        None => true,
    }
}

fn unescape(value: &str) -> String {
    value.replace("\\\"", "\"").replace("\\n", "\n")
}

fn normalize_success(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn normalize_score(value: Option<&Value>) -> f64 {
    let score = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        Some(Value::Bool(true)) => 1.0,
        _ => 0.0,
    };
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Recover each evaluator field independently from raw text when the strict
/// parse fails.
fn extract_fields_fallback(
    raw: &str,
    fallback_test_case_id: &str,
    parse_error: &str,
) -> EvaluationResult {
    let test_case_id = TEST_CASE_ID_PATTERN
        .captures(raw)
        .map(|c| unescape(&c[1]))
        .unwrap_or_else(|| fallback_test_case_id.to_string());

    let success = SUCCESS_PATTERN
        .captures(raw)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let score = SCORE_PATTERN
        .captures(raw)
        .and_then(|c| c[1].parse::<f64>().ok())
        .unwrap_or(0.0);

    let flags_detected = FLAGS_PATTERN
        .captures(raw)
        .map(|c| unescape(&c[1]))
        .unwrap_or_default();

    let reason = REASON_PATTERN
        .captures(raw)
        .map(|c| unescape(&c[1]).trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| {
            format!(
                "Evaluator returned invalid JSON (recovered partial): {}",
                parse_error
            )
        });

    EvaluationResult {
        test_case_id,
        success,
        score,
        flags_detected,
        reason,
        token_usage: None,
        origin: VerdictOrigin::Recovered {
            diagnostic: parse_error.to_string(),
        },
    }
}

/// Parse the evaluator's raw output into a complete verdict. Never fails;
/// unparseable output degrades to per-field recovery with a synthetic
/// rationale.
pub fn parse_verdict(raw: &str, fallback_test_case_id: &str) -> EvaluationResult {
    let payload = extract_json_payload(raw);
    let sanitized = sanitize_string_literals(&payload);

    let parsed = match serde_json::from_str::<Value>(&sanitized) {
        Ok(value) if value.is_object() => value,
        Ok(_) => {
            return extract_fields_fallback(
                &payload,
                fallback_test_case_id,
                "expected a JSON object",
            )
        }
        Err(err) => {
            return extract_fields_fallback(&payload, fallback_test_case_id, &err.to_string())
        }
    };

    EvaluationResult {
        test_case_id: string_field(parsed.get("test_case_id"))
            .unwrap_or_else(|| fallback_test_case_id.to_string()),
        success: normalize_success(parsed.get("success")),
        score: normalize_score(parsed.get("score")),
        flags_detected: string_field(parsed.get("flags_detected")).unwrap_or_default(),
        reason: string_field(parsed.get("reason")).unwrap_or_default(),
        token_usage: None,
        origin: VerdictOrigin::Parsed,
    }
}
