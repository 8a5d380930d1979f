use crate::domain::error::{AppError, Result};
use crate::domain::evren::EvrenOutput;
use crate::domain::test_case::TestCase;
use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

const DEFAULT_EVALUATE_PATH: &str = "/evaluate";

/// Client for the Evren model endpoint under evaluation.
#[async_trait]
pub trait EvrenApi {
    async fn call(&self, endpoint: &str, test_case: &TestCase) -> Result<EvrenOutput>;
}

pub struct EvrenClient {
    client: reqwest::Client,
}

impl EvrenClient {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(timeout_secs))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Build the request body: input message, plus img_url and context when
    /// present. Context that is valid JSON is embedded as-is; free text is
    /// wrapped as `{"description": <text>}`.
    fn build_body(test_case: &TestCase) -> Value {
        let mut body = json!({ "input_message": test_case.input_message });
        if let Some(img_url) = test_case.img_url.as_ref().filter(|v| !v.trim().is_empty()) {
            body["img_url"] = json!(img_url);
        }
        if let Some(context) = test_case.context.as_ref().filter(|v| !v.trim().is_empty()) {
            body["context"] = match serde_json::from_str::<Value>(context) {
                Ok(parsed) => parsed,
                Err(_) => json!({ "description": context }),
            };
        }
        body
    }
}

/// Normalize a user-supplied Evren endpoint: rewrite `localhost` to the
/// loopback address and append the conventional evaluate path when the URL
/// has no path of its own.
pub fn normalize_endpoint(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| AppError::ValidationError(format!("Invalid Evren API URL '{}': {}", raw, e)))?;

    if url.host_str() == Some("localhost") {
        url.set_host(Some("127.0.0.1"))
            .map_err(|e| AppError::ValidationError(format!("Invalid Evren API host: {}", e)))?;
    }

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DEFAULT_EVALUATE_PATH);
    }

    Ok(url)
}

#[async_trait]
impl EvrenApi for EvrenClient {
    async fn call(&self, endpoint: &str, test_case: &TestCase) -> Result<EvrenOutput> {
        let url = normalize_endpoint(endpoint)?;
        let body = Self::build_body(test_case);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::EvrenError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::EvrenError(format!("{} {}", status, text)));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| AppError::EvrenError(format!("Failed to parse JSON: {}", e)))?;

        let evren_response = data
            .get("evren_response")
            .or_else(|| data.get("response"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let detected_states = data
            .get("detected_flags")
            .or_else(|| data.get("flags"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(EvrenOutput {
            evren_response,
            detected_states,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(context: Option<&str>, img_url: Option<&str>) -> TestCase {
        TestCase {
            test_case_id: "TC-01".to_string(),
            title: None,
            input_message: "hello".to_string(),
            img_url: img_url.map(str::to_string),
            context: context.map(str::to_string),
            expected_state: "calm".to_string(),
            expected_behavior: "greets back".to_string(),
            forbidden: None,
            is_enabled: true,
        }
    }

    #[test]
    fn test_normalize_appends_evaluate_path() {
        let url = normalize_endpoint("http://localhost:8000").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8000/evaluate");
    }

    #[test]
    fn test_normalize_keeps_explicit_path() {
        let url = normalize_endpoint("http://10.0.0.5:8000/custom/eval").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5:8000/custom/eval");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_endpoint("not a url").is_err());
    }

    #[test]
    fn test_body_wraps_free_text_context() {
        let body = EvrenClient::build_body(&case(Some("user is tired"), None));
        assert_eq!(body["context"]["description"], "user is tired");
        assert!(body.get("img_url").is_none());
    }

    #[test]
    fn test_body_embeds_json_context() {
        let body = EvrenClient::build_body(&case(Some(r#"{"mood":"sad"}"#), None));
        assert_eq!(body["context"]["mood"], "sad");
    }

    #[test]
    fn test_body_includes_img_url() {
        let body = EvrenClient::build_body(&case(None, Some("https://img.example/a.png")));
        assert_eq!(body["img_url"], "https://img.example/a.png");
        assert!(body.get("context").is_none());
    }
}
