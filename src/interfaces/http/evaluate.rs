//! Evaluation endpoints: the streaming full-run endpoint and the single-case
//! debugging endpoint.

use super::{add_log, error_response, HttpState};
use crate::application::use_cases::run_orchestrator::{RunEvent, RunParams};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::test_case::TestCase;
use crate::domain::verdict::EvaluationResult;
use crate::infrastructure::evren::normalize_endpoint;
use actix_web::{post, web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct RunStreamRequest {
    #[validate(length(min = 1, message = "evren_model_api_url is required"))]
    pub evren_model_api_url: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub summarizer_model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EvaluateOneRequest {
    pub test_case: TestCase,
    #[validate(length(min = 1, message = "evren_model_api_url is required"))]
    pub evren_model_api_url: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Serialize)]
struct EvaluateOneResponse {
    #[serde(flatten)]
    result: EvaluationResult,
    evren_response: String,
    detected_flags: String,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Endpoint, models, and prompts for a run, merged from the request, the
/// database overrides, and the server settings. For models the request wins,
/// the summarizer following the evaluator's model when not named. For
/// prompts a non-empty database override beats the request, which beats the
/// template files.
struct ResolvedPipeline {
    evren_api_url: String,
    evaluator_config: LLMConfig,
    summarizer_config: LLMConfig,
    evaluator_prompt: String,
    summarizer_prompt: String,
}

async fn resolve_pipeline(
    state: &HttpState,
    evren_model_api_url: &str,
    model_name: &Option<String>,
    summarizer_model: &Option<String>,
    system_prompt: &Option<String>,
) -> Result<ResolvedPipeline> {
    let app = &state.app;
    let api_key = app
        .settings
        .resolved_api_key()
        .ok_or_else(|| AppError::ConfigError("GEMINI_API_KEY is not configured".to_string()))?;

    let evren_api_url = normalize_endpoint(evren_model_api_url)?.to_string();

    let overrides = app.default_settings.get().await?;

    let evaluator_model = non_blank(model_name)
        .or(overrides.evaluator_model)
        .unwrap_or_else(|| app.settings.default_model.clone());
    let summarizer_model = non_blank(summarizer_model)
        .or(overrides.summarizer_model)
        .unwrap_or_else(|| evaluator_model.clone());

    let evaluator_prompt = match overrides
        .evaluator_prompt
        .or_else(|| non_blank(system_prompt))
    {
        Some(prompt) => prompt,
        None => app.prompt_store.load_evaluator_system_prompt()?,
    };
    let summarizer_prompt = match overrides.summarizer_prompt {
        Some(prompt) => prompt,
        None => app.prompt_store.load_summarizer_system_prompt()?,
    };

    let base_config = LLMConfig {
        base_url: app.settings.gemini_base_url.clone(),
        api_key: Some(api_key),
        ..LLMConfig::default()
    };

    Ok(ResolvedPipeline {
        evren_api_url,
        evaluator_config: base_config.with_model(&evaluator_model),
        summarizer_config: base_config.with_model(&summarizer_model),
        evaluator_prompt,
        summarizer_prompt,
    })
}

/// Run every enabled test case, streaming progress as server-sent events.
/// Validation failures are reported as plain HTTP errors before the stream
/// starts; once streaming, failures arrive as `error` events.
#[post("/evaluate/run/stream")]
async fn run_stream(
    data: web::Data<HttpState>,
    req: web::Json<RunStreamRequest>,
) -> impl Responder {
    if let Err(e) = req.validate() {
        return HttpResponse::BadRequest().body(e.to_string());
    }

    add_log(
        &data.logs,
        "INFO",
        "Evaluate",
        &format!("Starting evaluation run against {}", req.evren_model_api_url),
    );

    let params = match resolve_run_params(&data, &req).await {
        Ok(params) => params,
        Err(e) => {
            add_log(
                &data.logs,
                "ERROR",
                "Evaluate",
                &format!("Run rejected: {}", e),
            );
            return error_response(&e);
        }
    };

    let prepared = match data.app.orchestrator.prepare(params).await {
        Ok(prepared) => prepared,
        Err(e) => {
            add_log(
                &data.logs,
                "ERROR",
                "Evaluate",
                &format!("Run rejected: {}", e),
            );
            return error_response(&e);
        }
    };

    let (tx, rx) = mpsc::channel::<RunEvent>(32);
    let orchestrator = data.app.orchestrator.clone();
    actix_web::rt::spawn(async move {
        orchestrator.execute(prepared, tx).await;
    });

    // Dropping the response body (client disconnect) closes the channel; the
    // orchestrator stops at its next suspension point.
    let stream = ReceiverStream::new(rx)
        .map(|event| Ok::<web::Bytes, actix_web::Error>(web::Bytes::from(event.to_sse_frame())));

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .insert_header(("Connection", "keep-alive"))
        .streaming(stream)
}

async fn resolve_run_params(state: &HttpState, req: &RunStreamRequest) -> Result<RunParams> {
    let user_id = non_blank(&req.user_id)
        .or_else(|| non_blank(&state.app.settings.default_user_id))
        .ok_or_else(|| {
            AppError::ValidationError(
                "No user_id in request and no default_user_id configured".to_string(),
            )
        })?;

    let pipeline = resolve_pipeline(
        state,
        &req.evren_model_api_url,
        &req.model_name,
        &req.summarizer_model,
        &req.system_prompt,
    )
    .await?;

    Ok(RunParams {
        user_id,
        evren_api_url: pipeline.evren_api_url,
        evaluator_config: pipeline.evaluator_config,
        summarizer_config: pipeline.summarizer_config,
        evaluator_prompt: pipeline.evaluator_prompt,
        summarizer_prompt: pipeline.summarizer_prompt,
    })
}

/// Run the Evren call and evaluator verdict for a single inline test case
/// without touching sessions or result rows.
#[post("/evaluate-one")]
async fn evaluate_one(
    data: web::Data<HttpState>,
    req: web::Json<EvaluateOneRequest>,
) -> impl Responder {
    if let Err(e) = req.validate() {
        return HttpResponse::BadRequest().body(e.to_string());
    }
    if req.test_case.input_message.trim().is_empty() {
        return HttpResponse::BadRequest().body("test_case.input_message is required");
    }

    let result: Result<EvaluateOneResponse> = async {
        let pipeline = resolve_pipeline(
            &data,
            &req.evren_model_api_url,
            &req.model_name,
            &None,
            &req.system_prompt,
        )
        .await?;

        let evren_output = data
            .app
            .evren
            .call(&pipeline.evren_api_url, &req.test_case)
            .await?;
        let result = data
            .app
            .evaluate_use_case
            .evaluate_one(
                &req.test_case,
                &evren_output,
                &pipeline.evaluator_config,
                &pipeline.evaluator_prompt,
            )
            .await?;
        Ok(EvaluateOneResponse {
            result,
            evren_response: evren_output.evren_response,
            detected_flags: evren_output.detected_states,
        })
    }
    .await;

    match result {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => {
            add_log(
                &data.logs,
                "ERROR",
                "Evaluate",
                &format!("Single-case evaluation failed: {}", e),
            );
            error_response(&e)
        }
    }
}
