pub mod results;
pub mod sessions;
pub mod settings;
pub mod test_cases;

use crate::domain::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::str::FromStr;

/// Connect to the eval database, creating the file and schema when missing.
pub async fn init_db(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::DatabaseError(format!("Failed to parse connection string: {}", e)))?
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {}", e)))?;

    create_schema(&pool).await?;
    Ok(pool)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            full_name TEXT,
            is_owner INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS test_cases (
            test_case_id TEXT PRIMARY KEY,
            title TEXT,
            category_id TEXT,
            input_message TEXT NOT NULL,
            img_url TEXT,
            context TEXT,
            expected_state TEXT NOT NULL DEFAULT '',
            expected_behavior TEXT NOT NULL DEFAULT '',
            forbidden TEXT,
            notes TEXT,
            is_enabled INTEGER NOT NULL DEFAULT 1
        )",
        "CREATE TABLE IF NOT EXISTS evren_responses (
            evren_response_id TEXT PRIMARY KEY,
            test_case_id TEXT NOT NULL,
            evren_response TEXT NOT NULL,
            detected_states TEXT,
            created_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS test_sessions (
            test_session_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            title TEXT,
            total_cost_usd REAL NOT NULL DEFAULT 0,
            summary TEXT,
            manually_edited INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS eval_results (
            eval_result_id TEXT PRIMARY KEY,
            test_session_id TEXT NOT NULL,
            test_case_id TEXT NOT NULL,
            evren_response_id TEXT NOT NULL,
            success INTEGER NOT NULL,
            score REAL NOT NULL,
            reason TEXT,
            prompt_tokens INTEGER,
            completion_tokens INTEGER,
            total_tokens INTEGER,
            cost_usd REAL,
            manually_edited INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS default_settings (
            default_setting_id TEXT PRIMARY KEY,
            evren_api_url TEXT,
            evaluator_model TEXT,
            evaluator_prompt TEXT,
            summarizer_model TEXT,
            summarizer_prompt TEXT
        )",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to create schema: {}", e)))?;
    }
    Ok(())
}

#[cfg(test)]
pub async fn connect_in_memory() -> SqlitePool {
    use sqlx::sqlite::SqlitePoolOptions;

    // A single connection so every query sees the same in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    create_schema(&pool).await.expect("schema");
    pool
}
