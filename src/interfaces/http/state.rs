use crate::application::use_cases::evaluate::EvaluateUseCase;
use crate::application::use_cases::run_orchestrator::RunOrchestrator;
use crate::application::use_cases::summarize::SummarizeUseCase;
use crate::infrastructure::config::Settings;
use crate::infrastructure::db::results::EvalResultRepository;
use crate::infrastructure::db::sessions::SessionRepository;
use crate::infrastructure::db::settings::DefaultSettingsRepository;
use crate::infrastructure::db::test_cases::TestCaseRepository;
use crate::infrastructure::evren::{EvrenApi, EvrenClient};
use crate::infrastructure::llm_clients::gemini::GeminiClient;
use crate::infrastructure::llm_clients::LLMClient;
use crate::infrastructure::prompts::PromptStore;
use crate::shared::token_cost::PriceTable;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Everything the HTTP handlers need, wired once at startup.
pub struct AppState {
    pub settings: Settings,
    pub test_cases: Arc<TestCaseRepository>,
    pub sessions: Arc<SessionRepository>,
    pub default_settings: Arc<DefaultSettingsRepository>,
    pub llm_client: Arc<dyn LLMClient + Send + Sync>,
    pub evren: Arc<dyn EvrenApi + Send + Sync>,
    pub prompt_store: PromptStore,
    pub evaluate_use_case: Arc<EvaluateUseCase>,
    pub orchestrator: Arc<RunOrchestrator>,
}

impl AppState {
    pub fn new(settings: Settings, pool: SqlitePool) -> Self {
        let test_cases = Arc::new(TestCaseRepository::new(pool.clone()));
        let sessions = Arc::new(SessionRepository::new(pool.clone()));
        let results = Arc::new(EvalResultRepository::new(pool.clone()));
        let default_settings = Arc::new(DefaultSettingsRepository::new(pool));

        let llm_client: Arc<dyn LLMClient + Send + Sync> = Arc::new(GeminiClient::new());
        let evren: Arc<dyn EvrenApi + Send + Sync> =
            Arc::new(EvrenClient::new(settings.evren_timeout_secs));

        let price_table = PriceTable::default();
        let evaluate_use_case = Arc::new(EvaluateUseCase::new(
            llm_client.clone(),
            price_table.clone(),
        ));
        let summarize_use_case = Arc::new(SummarizeUseCase::new(llm_client.clone(), price_table));

        let orchestrator = Arc::new(RunOrchestrator::new(
            test_cases.clone(),
            sessions.clone(),
            results,
            evren.clone(),
            evaluate_use_case.clone(),
            summarize_use_case,
        ));

        let prompt_store = PromptStore::new(&settings.prompts_dir);

        Self {
            settings,
            test_cases,
            sessions,
            default_settings,
            llm_client,
            evren,
            prompt_store,
            evaluate_use_case,
            orchestrator,
        }
    }
}
