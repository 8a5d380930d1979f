use serde::{Deserialize, Serialize};

/// Token counts and derived cost for one model call.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: f64,
}

/// How the evaluator verdict was obtained.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum VerdictOrigin {
    /// Strict JSON parse of the evaluator output succeeded.
    Parsed,
    /// Strict parse failed; fields were recovered per-field from raw text.
    Recovered { diagnostic: String },
}

impl Default for VerdictOrigin {
    fn default() -> Self {
        VerdictOrigin::Parsed
    }
}

/// The evaluator's verdict for one test case. Always complete: when the
/// evaluator returns malformed output the fields are best-effort recovered
/// and `origin` records the parse failure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvaluationResult {
    pub test_case_id: String,
    pub success: bool,
    pub score: f64,
    pub flags_detected: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip)]
    pub origin: VerdictOrigin,
}

impl EvaluationResult {
    pub fn cost_usd(&self) -> f64 {
        self.token_usage
            .as_ref()
            .map(|usage| usage.cost_usd)
            .unwrap_or(0.0)
    }
}
