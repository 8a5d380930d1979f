mod prompts;
mod verdict_parser;

pub use prompts::build_evaluator_user_message;
pub use verdict_parser::parse_verdict;

use crate::domain::error::Result;
use crate::domain::evren::EvrenOutput;
use crate::domain::llm_config::LLMConfig;
use crate::domain::test_case::TestCase;
use crate::domain::verdict::EvaluationResult;
use crate::infrastructure::llm_clients::LLMClient;
use crate::shared::token_cost::PriceTable;
use std::sync::Arc;
use tracing::warn;

/// Judges one test case: renders the evaluator prompts, calls the evaluator
/// model, parses its verdict tolerantly, and attaches token usage and cost.
pub struct EvaluateUseCase {
    llm_client: Arc<dyn LLMClient + Send + Sync>,
    price_table: PriceTable,
}

impl EvaluateUseCase {
    pub fn new(llm_client: Arc<dyn LLMClient + Send + Sync>, price_table: PriceTable) -> Self {
        Self {
            llm_client,
            price_table,
        }
    }

    pub async fn evaluate_one(
        &self,
        test_case: &TestCase,
        output: &EvrenOutput,
        config: &LLMConfig,
        system_prompt: &str,
    ) -> Result<EvaluationResult> {
        let user_message = build_evaluator_user_message(test_case, output);
        let reply = self
            .llm_client
            .generate(config, system_prompt, &user_message)
            .await?;

        let token_usage = match (reply.prompt_tokens, reply.completion_tokens) {
            (None, None) => None,
            (prompt, completion) => Some(self.price_table.compute_token_cost(
                prompt.unwrap_or(0),
                completion.unwrap_or(0),
                &config.model,
            )),
        };

        let mut verdict = parse_verdict(&reply.text, &test_case.test_case_id);
        if let crate::domain::verdict::VerdictOrigin::Recovered { diagnostic } = &verdict.origin {
            warn!(
                test_case_id = %test_case.test_case_id,
                diagnostic = %diagnostic,
                raw_len = reply.text.len(),
                "Evaluator output did not parse strictly; fields recovered"
            );
        }
        verdict.token_usage = token_usage;
        Ok(verdict)
    }
}
