use crate::domain::evren::EvrenOutput;
use crate::domain::test_case::TestCase;

/// Render the evaluator's user message from one test case and Evren's
/// output. Deterministic: identical inputs always produce identical text.
pub fn build_evaluator_user_message(test_case: &TestCase, output: &EvrenOutput) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push("=== TEST CASE ===".to_string());
    sections.push(format!("test_case_id: {}", test_case.test_case_id));
    sections.push(format!("Input message: {}", test_case.input_message));
    if let Some(img_url) = test_case.img_url.as_ref().filter(|v| !v.trim().is_empty()) {
        sections.push(format!("Img url: {}", img_url));
    }
    if let Some(context) = test_case.context.as_ref().filter(|v| !v.trim().is_empty()) {
        sections.push(format!("Context: {}", context));
    }
    sections.push(format!("Expected states: {}", test_case.expected_state));
    sections.push(format!(
        "Expected behavior: {}",
        test_case.expected_behavior
    ));
    if let Some(forbidden) = test_case.forbidden.as_ref().filter(|v| !v.trim().is_empty()) {
        sections.push(format!("Forbidden: {}", forbidden));
    }

    sections.push(String::new());
    sections.push("=== EVREN OUTPUT ===".to_string());
    sections.push(format!("Evren response: {}", output.evren_response));
    sections.push(format!("Detected states: {}", output.detected_states));

    sections.join("\n")
}
