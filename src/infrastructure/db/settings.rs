use crate::domain::error::{AppError, Result};
use sqlx::SqlitePool;

/// Optional per-deployment overrides for evaluator/summarizer prompts and
/// models, edited out of band. Empty strings count as unset.
#[derive(Debug, Clone, Default)]
pub struct DefaultSettings {
    pub evren_api_url: Option<String>,
    pub evaluator_model: Option<String>,
    pub evaluator_prompt: Option<String>,
    pub summarizer_model: Option<String>,
    pub summarizer_prompt: Option<String>,
}

pub struct DefaultSettingsRepository {
    pool: SqlitePool,
}

impl DefaultSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> Result<DefaultSettings> {
        let row = sqlx::query_as::<_, DefaultSettingsEntity>(
            "SELECT evren_api_url, evaluator_model, evaluator_prompt,
                    summarizer_model, summarizer_prompt
             FROM default_settings LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch default settings: {}", e)))?;

        Ok(row.map(|row| row.into()).unwrap_or_default())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(sqlx::FromRow)]
struct DefaultSettingsEntity {
    evren_api_url: Option<String>,
    evaluator_model: Option<String>,
    evaluator_prompt: Option<String>,
    summarizer_model: Option<String>,
    summarizer_prompt: Option<String>,
}

impl From<DefaultSettingsEntity> for DefaultSettings {
    fn from(entity: DefaultSettingsEntity) -> Self {
        Self {
            evren_api_url: non_empty(entity.evren_api_url),
            evaluator_model: non_empty(entity.evaluator_model),
            evaluator_prompt: non_empty(entity.evaluator_prompt),
            summarizer_model: non_empty(entity.summarizer_model),
            summarizer_prompt: non_empty(entity.summarizer_prompt),
        }
    }
}
