use crate::domain::error::{AppError, Result};
use crate::domain::session::TestSession;
use sqlx::SqlitePool;
use uuid::Uuid;

pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn user_exists(&self, user_id: &str) -> Result<bool> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT user_id FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to fetch user: {}", e)))?;
        Ok(row.is_some())
    }

    /// New session with zero cost and no summary.
    pub async fn create_session(&self, user_id: &str) -> Result<TestSession> {
        let session = TestSession {
            test_session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: None,
            total_cost_usd: 0.0,
            summary: None,
            manually_edited: false,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        sqlx::query(
            "INSERT INTO test_sessions
                 (test_session_id, user_id, title, total_cost_usd, summary, manually_edited, created_at)
             VALUES (?, ?, NULL, 0, NULL, 0, ?)",
        )
        .bind(&session.test_session_id)
        .bind(&session.user_id)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to create session: {}", e)))?;

        Ok(session)
    }

    pub async fn finalize_session(
        &self,
        test_session_id: &str,
        total_cost_usd: f64,
        title: Option<&str>,
        summary: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE test_sessions SET total_cost_usd = ?, title = ?, summary = ?
             WHERE test_session_id = ?",
        )
        .bind(total_cost_usd)
        .bind(title)
        .bind(summary)
        .bind(test_session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to finalize session: {}", e)))?;
        Ok(())
    }

    pub async fn get_session(&self, test_session_id: &str) -> Result<TestSession> {
        let session = sqlx::query_as::<_, TestSessionEntity>(
            "SELECT test_session_id, user_id, title, total_cost_usd, summary, manually_edited, created_at
             FROM test_sessions WHERE test_session_id = ?",
        )
        .bind(test_session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch session: {}", e)))?;

        match session {
            Some(session) => Ok(session.into()),
            None => Err(AppError::NotFound(format!(
                "Session not found: {}",
                test_session_id
            ))),
        }
    }

    #[cfg(test)]
    pub async fn insert_user(&self, user_id: &str, email: &str) -> Result<()> {
        sqlx::query("INSERT INTO users (user_id, email) VALUES (?, ?)")
            .bind(user_id)
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to insert user: {}", e)))?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TestSessionEntity {
    test_session_id: String,
    user_id: String,
    title: Option<String>,
    total_cost_usd: f64,
    summary: Option<String>,
    manually_edited: i64,
    created_at: i64,
}

impl From<TestSessionEntity> for TestSession {
    fn from(entity: TestSessionEntity) -> Self {
        Self {
            test_session_id: entity.test_session_id,
            user_id: entity.user_id,
            title: entity.title,
            total_cost_usd: entity.total_cost_usd,
            summary: entity.summary,
            manually_edited: entity.manually_edited != 0,
            created_at: entity.created_at,
        }
    }
}
