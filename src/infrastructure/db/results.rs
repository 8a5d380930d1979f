use crate::domain::error::{AppError, Result};
use crate::domain::evren::EvrenOutput;
use crate::domain::session::EvalResult;
use sqlx::SqlitePool;
use uuid::Uuid;

pub struct EvalResultRepository {
    pool: SqlitePool,
}

impl EvalResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store one Evren reply; returns the new row id.
    pub async fn insert_evren_response(
        &self,
        test_case_id: &str,
        output: &EvrenOutput,
    ) -> Result<String> {
        let evren_response_id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO evren_responses
                 (evren_response_id, test_case_id, evren_response, detected_states, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&evren_response_id)
        .bind(test_case_id)
        .bind(&output.evren_response)
        .bind(&output.detected_states)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert Evren response: {}", e)))?;

        Ok(evren_response_id)
    }

    pub async fn insert_result(&self, result: &EvalResult) -> Result<()> {
        sqlx::query(
            "INSERT INTO eval_results
                 (eval_result_id, test_session_id, test_case_id, evren_response_id,
                  success, score, reason, prompt_tokens, completion_tokens, total_tokens,
                  cost_usd, manually_edited)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&result.eval_result_id)
        .bind(&result.test_session_id)
        .bind(&result.test_case_id)
        .bind(&result.evren_response_id)
        .bind(if result.success { 1 } else { 0 })
        .bind(result.score)
        .bind(&result.reason)
        .bind(result.prompt_tokens)
        .bind(result.completion_tokens)
        .bind(result.total_tokens)
        .bind(result.cost_usd)
        .bind(if result.manually_edited { 1 } else { 0 })
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert eval result: {}", e)))?;
        Ok(())
    }

    pub async fn list_for_session(&self, test_session_id: &str) -> Result<Vec<EvalResult>> {
        let rows = sqlx::query_as::<_, EvalResultEntity>(
            "SELECT eval_result_id, test_session_id, test_case_id, evren_response_id,
                    success, score, reason, prompt_tokens, completion_tokens, total_tokens,
                    cost_usd, manually_edited
             FROM eval_results WHERE test_session_id = ? ORDER BY test_case_id ASC",
        )
        .bind(test_session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list eval results: {}", e)))?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }
}

#[derive(sqlx::FromRow)]
struct EvalResultEntity {
    eval_result_id: String,
    test_session_id: String,
    test_case_id: String,
    evren_response_id: String,
    success: i64,
    score: f64,
    reason: Option<String>,
    prompt_tokens: Option<i64>,
    completion_tokens: Option<i64>,
    total_tokens: Option<i64>,
    cost_usd: Option<f64>,
    manually_edited: i64,
}

impl From<EvalResultEntity> for EvalResult {
    fn from(entity: EvalResultEntity) -> Self {
        Self {
            eval_result_id: entity.eval_result_id,
            test_session_id: entity.test_session_id,
            test_case_id: entity.test_case_id,
            evren_response_id: entity.evren_response_id,
            success: entity.success != 0,
            score: entity.score,
            reason: entity.reason,
            prompt_tokens: entity.prompt_tokens,
            completion_tokens: entity.completion_tokens,
            total_tokens: entity.total_tokens,
            cost_usd: entity.cost_usd,
            manually_edited: entity.manually_edited != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::connect_in_memory;

    #[tokio::test]
    async fn test_insert_and_list_results() {
        let pool = connect_in_memory().await;
        let repo = EvalResultRepository::new(pool);

        let output = EvrenOutput {
            evren_response: "hello".to_string(),
            detected_states: "calm".to_string(),
        };
        let evren_response_id = repo.insert_evren_response("TC-01", &output).await.unwrap();

        let result = EvalResult {
            eval_result_id: Uuid::new_v4().to_string(),
            test_session_id: "session-1".to_string(),
            test_case_id: "TC-01".to_string(),
            evren_response_id,
            success: true,
            score: 8.0,
            reason: Some("matches expectations".to_string()),
            prompt_tokens: Some(100),
            completion_tokens: Some(40),
            total_tokens: Some(140),
            cost_usd: Some(0.00013),
            manually_edited: false,
        };
        repo.insert_result(&result).await.unwrap();

        let listed = repo.list_for_session("session-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].success);
        assert_eq!(listed[0].score, 8.0);
        assert_eq!(listed[0].cost_usd, Some(0.00013));
    }
}
