use serde::{Deserialize, Serialize};

/// One curated test case for the Evren model. Immutable for the duration of
/// a run; owned by the test-case store.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TestCase {
    pub test_case_id: String,
    pub title: Option<String>,
    pub input_message: String,
    pub img_url: Option<String>,
    pub context: Option<String>,
    pub expected_state: String,
    pub expected_behavior: String,
    pub forbidden: Option<String>,
    #[serde(default)]
    pub is_enabled: bool,
}
