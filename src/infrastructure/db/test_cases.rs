use crate::domain::error::{AppError, Result};
use crate::domain::test_case::TestCase;
use sqlx::SqlitePool;

pub struct TestCaseRepository {
    pool: SqlitePool,
}

impl TestCaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Enabled test cases in stable run order (ascending by id).
    pub async fn list_enabled(&self) -> Result<Vec<TestCase>> {
        let rows = sqlx::query_as::<_, TestCaseEntity>(
            "SELECT test_case_id, title, input_message, img_url, context,
                    expected_state, expected_behavior, forbidden, is_enabled
             FROM test_cases WHERE is_enabled = 1 ORDER BY test_case_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list test cases: {}", e)))?;

        Ok(rows.into_iter().map(|row| row.into()).collect())
    }

    pub async fn get(&self, test_case_id: &str) -> Result<TestCase> {
        let row = sqlx::query_as::<_, TestCaseEntity>(
            "SELECT test_case_id, title, input_message, img_url, context,
                    expected_state, expected_behavior, forbidden, is_enabled
             FROM test_cases WHERE test_case_id = ?",
        )
        .bind(test_case_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to fetch test case: {}", e)))?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(AppError::NotFound(format!(
                "Test case not found: {}",
                test_case_id
            ))),
        }
    }

    #[cfg(test)]
    pub async fn insert(&self, test_case: &TestCase) -> Result<()> {
        sqlx::query(
            "INSERT INTO test_cases (test_case_id, title, input_message, img_url, context,
                                     expected_state, expected_behavior, forbidden, is_enabled)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&test_case.test_case_id)
        .bind(&test_case.title)
        .bind(&test_case.input_message)
        .bind(&test_case.img_url)
        .bind(&test_case.context)
        .bind(&test_case.expected_state)
        .bind(&test_case.expected_behavior)
        .bind(&test_case.forbidden)
        .bind(if test_case.is_enabled { 1 } else { 0 })
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to insert test case: {}", e)))?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TestCaseEntity {
    test_case_id: String,
    title: Option<String>,
    input_message: String,
    img_url: Option<String>,
    context: Option<String>,
    expected_state: String,
    expected_behavior: String,
    forbidden: Option<String>,
    is_enabled: i64,
}

impl From<TestCaseEntity> for TestCase {
    fn from(entity: TestCaseEntity) -> Self {
        Self {
            test_case_id: entity.test_case_id,
            title: entity.title,
            input_message: entity.input_message,
            img_url: entity.img_url,
            context: entity.context,
            expected_state: entity.expected_state,
            expected_behavior: entity.expected_behavior,
            forbidden: entity.forbidden,
            is_enabled: entity.is_enabled != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::connect_in_memory;

    fn case(id: &str, enabled: bool) -> TestCase {
        TestCase {
            test_case_id: id.to_string(),
            title: Some(format!("case {}", id)),
            input_message: "hi".to_string(),
            img_url: None,
            context: None,
            expected_state: "calm".to_string(),
            expected_behavior: "responds".to_string(),
            forbidden: None,
            is_enabled: enabled,
        }
    }

    #[tokio::test]
    async fn test_list_enabled_is_ordered_and_filtered() {
        let pool = connect_in_memory().await;
        let repo = TestCaseRepository::new(pool);
        repo.insert(&case("TC-03", true)).await.unwrap();
        repo.insert(&case("TC-01", true)).await.unwrap();
        repo.insert(&case("TC-02", false)).await.unwrap();

        let enabled = repo.list_enabled().await.unwrap();
        let ids: Vec<_> = enabled.iter().map(|c| c.test_case_id.as_str()).collect();
        assert_eq!(ids, vec!["TC-01", "TC-03"]);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let pool = connect_in_memory().await;
        let repo = TestCaseRepository::new(pool);
        assert!(matches!(
            repo.get("TC-99").await,
            Err(AppError::NotFound(_))
        ));
    }
}
