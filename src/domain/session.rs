use serde::{Deserialize, Serialize};

/// One persisted evaluation run. Created with zero cost and no summary;
/// title/summary/total cost are filled in after summarization.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TestSession {
    pub test_session_id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub total_cost_usd: f64,
    pub summary: Option<String>,
    pub manually_edited: bool,
    pub created_at: i64,
}

/// Per-case result row, written immediately after each case's evaluator
/// step completes.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalResult {
    pub eval_result_id: String,
    pub test_session_id: String,
    pub test_case_id: String,
    pub evren_response_id: String,
    pub success: bool,
    pub score: f64,
    pub reason: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub cost_usd: Option<f64>,
    pub manually_edited: bool,
}
