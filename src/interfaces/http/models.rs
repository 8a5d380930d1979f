use super::{add_log, HttpState};
use crate::domain::llm_config::LLMConfig;
use actix_web::{get, web, HttpResponse, Responder};

/// Available Gemini model ids, for populating the model picker.
#[get("/models")]
async fn list_models(data: web::Data<HttpState>) -> impl Responder {
    let api_key = match data.app.settings.resolved_api_key() {
        Some(key) => key,
        None => {
            return HttpResponse::InternalServerError().body("GEMINI_API_KEY is not configured")
        }
    };

    let config = LLMConfig {
        base_url: data.app.settings.gemini_base_url.clone(),
        api_key: Some(api_key),
        ..LLMConfig::default()
    };

    match data.app.llm_client.list_models(&config).await {
        Ok(models) => HttpResponse::Ok().json(models),
        Err(e) => {
            add_log(
                &data.logs,
                "ERROR",
                "Models",
                &format!("Failed to list models: {}", e),
            );
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}
