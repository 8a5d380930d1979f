//! Drives one evaluation run: Evren call, evaluator verdict, persistence,
//! and summarization for every enabled test case, pushing ordered progress
//! events onto a channel owned by the caller.
//!
//! One run is one task. Test cases execute strictly sequentially; the Evren
//! and evaluator endpoints are rate- and cost-sensitive and sequential
//! execution keeps the event order deterministic without synchronization.

use crate::application::use_cases::evaluate::EvaluateUseCase;
use crate::application::use_cases::summarize::{build_rich_report, RichReport, SummarizeUseCase};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::session::{EvalResult, TestSession};
use crate::domain::test_case::TestCase;
use crate::infrastructure::db::results::EvalResultRepository;
use crate::infrastructure::db::sessions::SessionRepository;
use crate::infrastructure::db::test_cases::TestCaseRepository;
use crate::infrastructure::evren::EvrenApi;
use crate::shared::token_cost::round_usd;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Start,
    Evren,
    Evaluating,
    Done,
    Summarizing,
    Error,
}

/// One progress frame. Serialized as `{"type": ..., ...}` on the SSE wire.
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunEvent {
    Progress {
        stage: RunStage,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        test_case_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        test_session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Complete {
        test_session_id: String,
        total_cost_usd: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Error {
        error: String,
    },
}

impl RunEvent {
    pub fn to_sse_frame(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("data: {}\n\n", json)
    }
}

/// Per-run parameters resolved by the HTTP layer before the stream starts.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub user_id: String,
    pub evren_api_url: String,
    pub evaluator_config: LLMConfig,
    pub summarizer_config: LLMConfig,
    pub evaluator_prompt: String,
    pub summarizer_prompt: String,
}

/// A validated run: session row created, enabled cases loaded in run order.
pub struct PreparedRun {
    pub session: TestSession,
    pub test_cases: Vec<TestCase>,
    pub params: RunParams,
}

pub struct RunOrchestrator {
    test_cases: Arc<TestCaseRepository>,
    sessions: Arc<SessionRepository>,
    results: Arc<EvalResultRepository>,
    evren: Arc<dyn EvrenApi + Send + Sync>,
    evaluate: Arc<EvaluateUseCase>,
    summarize: Arc<SummarizeUseCase>,
}

impl RunOrchestrator {
    pub fn new(
        test_cases: Arc<TestCaseRepository>,
        sessions: Arc<SessionRepository>,
        results: Arc<EvalResultRepository>,
        evren: Arc<dyn EvrenApi + Send + Sync>,
        evaluate: Arc<EvaluateUseCase>,
        summarize: Arc<SummarizeUseCase>,
    ) -> Self {
        Self {
            test_cases,
            sessions,
            results,
            evren,
            evaluate,
            summarize,
        }
    }

    /// Validate preconditions and create the session row. Returns an error
    /// (and creates nothing further) when the user is unknown or there are
    /// no enabled test cases.
    pub async fn prepare(&self, params: RunParams) -> Result<PreparedRun> {
        if !self.sessions.user_exists(&params.user_id).await? {
            return Err(AppError::ValidationError(format!(
                "User not found: {}. Runs require a valid user row.",
                params.user_id
            )));
        }

        let test_cases = self.test_cases.list_enabled().await?;
        if test_cases.is_empty() {
            return Err(AppError::ValidationError(
                "No enabled test cases in database".to_string(),
            ));
        }

        let session = self.sessions.create_session(&params.user_id).await?;
        Ok(PreparedRun {
            session,
            test_cases,
            params,
        })
    }

    /// Run to completion, pushing events onto `sink`. Every run ends with
    /// exactly one `complete` or `error` event unless the receiver goes away
    /// (client disconnect), in which case the run stops at the next
    /// suspension point without emitting anything further.
    pub async fn execute(&self, prepared: PreparedRun, sink: Sender<RunEvent>) {
        if let Err(err) = self.run_inner(&prepared, &sink).await {
            if sink.is_closed() {
                return;
            }
            error!(
                test_session_id = %prepared.session.test_session_id,
                error = %err,
                "Evaluation run failed"
            );
            emit(&sink, RunEvent::Error {
                error: err.to_string(),
            })
            .await;
        }
    }

    async fn run_inner(&self, prepared: &PreparedRun, sink: &Sender<RunEvent>) -> Result<()> {
        let session_id = prepared.session.test_session_id.clone();
        let params = &prepared.params;
        let total = prepared.test_cases.len();

        emit(sink, RunEvent::Progress {
            stage: RunStage::Start,
            index: None,
            total: Some(total),
            test_case_id: None,
            test_session_id: Some(session_id.clone()),
            message: Some(format!(
                "Starting run ({} test case{})…",
                total,
                if total == 1 { "" } else { "s" }
            )),
        })
        .await;

        let mut total_cost_usd = 0.0;
        let mut reports: Vec<RichReport> = Vec::new();

        for (index, test_case) in prepared.test_cases.iter().enumerate() {
            if sink.is_closed() {
                return Ok(());
            }

            emit(sink, RunEvent::Progress {
                stage: RunStage::Evren,
                index: Some(index),
                total: Some(total),
                test_case_id: Some(test_case.test_case_id.clone()),
                test_session_id: None,
                message: Some("Waiting for Evren response…".to_string()),
            })
            .await;

            // Unguarded: an Evren failure aborts the whole run.
            let evren_output = self.evren.call(&params.evren_api_url, test_case).await?;

            let evren_response_id = match self
                .results
                .insert_evren_response(&test_case.test_case_id, &evren_output)
                .await
            {
                Ok(id) => id,
                Err(err) => {
                    error!(
                        test_case_id = %test_case.test_case_id,
                        error = %err,
                        "Failed to save Evren response; skipping case"
                    );
                    emit(sink, RunEvent::Progress {
                        stage: RunStage::Error,
                        index: Some(index),
                        total: Some(total),
                        test_case_id: Some(test_case.test_case_id.clone()),
                        test_session_id: None,
                        message: Some("Failed to save Evren response".to_string()),
                    })
                    .await;
                    continue;
                }
            };

            if sink.is_closed() {
                return Ok(());
            }

            emit(sink, RunEvent::Progress {
                stage: RunStage::Evaluating,
                index: Some(index),
                total: Some(total),
                test_case_id: Some(test_case.test_case_id.clone()),
                test_session_id: None,
                message: Some("Evaluating…".to_string()),
            })
            .await;

            let verdict = self
                .evaluate
                .evaluate_one(
                    test_case,
                    &evren_output,
                    &params.evaluator_config,
                    &params.evaluator_prompt,
                )
                .await?;

            let cost_usd = verdict.cost_usd();
            total_cost_usd = round_usd(total_cost_usd + cost_usd);
            reports.push(build_rich_report(test_case, &evren_output, &verdict));

            let row = EvalResult {
                eval_result_id: Uuid::new_v4().to_string(),
                test_session_id: session_id.clone(),
                test_case_id: test_case.test_case_id.clone(),
                evren_response_id,
                success: verdict.success,
                score: verdict.score,
                reason: Some(verdict.reason.clone()),
                prompt_tokens: verdict.token_usage.as_ref().map(|u| u.prompt_tokens),
                completion_tokens: verdict.token_usage.as_ref().map(|u| u.completion_tokens),
                total_tokens: verdict.token_usage.as_ref().map(|u| u.total_tokens),
                cost_usd: (cost_usd > 0.0).then_some(cost_usd),
                manually_edited: false,
            };
            if let Err(err) = self.results.insert_result(&row).await {
                warn!(
                    test_case_id = %test_case.test_case_id,
                    error = %err,
                    "Failed to persist eval result"
                );
            }

            emit(sink, RunEvent::Progress {
                stage: RunStage::Done,
                index: Some(index + 1),
                total: Some(total),
                test_case_id: Some(test_case.test_case_id.clone()),
                test_session_id: None,
                message: Some(format!("Completed {} of {}", index + 1, total)),
            })
            .await;
        }

        let mut title: Option<String> = None;
        let mut summary: Option<String> = None;
        if !reports.is_empty() {
            if sink.is_closed() {
                return Ok(());
            }

            emit(sink, RunEvent::Progress {
                stage: RunStage::Summarizing,
                index: None,
                total: Some(total),
                test_case_id: None,
                test_session_id: None,
                message: Some("Generating validation report…".to_string()),
            })
            .await;

            let outcome = self
                .summarize
                .run(
                    &reports,
                    &params.summarizer_config,
                    &params.summarizer_prompt,
                )
                .await?;
            total_cost_usd = round_usd(total_cost_usd + outcome.cost_usd);
            if !outcome.title.is_empty() {
                title = Some(outcome.title);
            }
            summary = Some(outcome.summary);
        }

        self.sessions
            .finalize_session(
                &session_id,
                total_cost_usd,
                title.as_deref(),
                summary.as_deref(),
            )
            .await?;

        emit(sink, RunEvent::Complete {
            test_session_id: session_id,
            total_cost_usd,
            title,
            summary,
        })
        .await;

        Ok(())
    }
}

async fn emit(sink: &Sender<RunEvent>, event: RunEvent) {
    // A dropped receiver means the client went away; the run itself carries on.
    let _ = sink.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::evren::EvrenOutput;
    use crate::infrastructure::db::connect_in_memory;
    use crate::infrastructure::llm_clients::{LLMClient, LLMReply};
    use crate::shared::token_cost::PriceTable;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct ScriptedEvren {
        fail_on: Option<String>,
    }

    #[async_trait]
    impl EvrenApi for ScriptedEvren {
        async fn call(&self, _endpoint: &str, test_case: &TestCase) -> Result<EvrenOutput> {
            if self.fail_on.as_deref() == Some(test_case.test_case_id.as_str()) {
                return Err(AppError::EvrenError("500 upstream exploded".to_string()));
            }
            Ok(EvrenOutput {
                evren_response: format!("reply to {}", test_case.test_case_id),
                detected_states: "calm".to_string(),
            })
        }
    }

    /// Returns a verdict for evaluator calls and a title/summary payload for
    /// summarizer calls; optionally garbles the verdict for one case.
    struct ScriptedLLM {
        malformed_for: Option<String>,
    }

    #[async_trait]
    impl LLMClient for ScriptedLLM {
        async fn generate(
            &self,
            _config: &LLMConfig,
            _system: &str,
            user: &str,
        ) -> Result<LLMReply> {
            let text = if user.contains("=== TEST CASE ===") {
                let garble = self
                    .malformed_for
                    .as_deref()
                    .map(|id| user.contains(&format!("test_case_id: {}", id)))
                    .unwrap_or(false);
                if garble {
                    "totally not json".to_string()
                } else {
                    r#"{"test_case_id": "x", "success": true, "score": 8, "flags_detected": "calm", "reason": "fine"}"#.to_string()
                }
            } else {
                r#"{"title": "Run report", "summary": "Everything held up."}"#.to_string()
            };
            Ok(LLMReply {
                text,
                prompt_tokens: Some(1000),
                completion_tokens: Some(500),
            })
        }

        async fn list_models(&self, _config: &LLMConfig) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    struct Harness {
        orchestrator: RunOrchestrator,
        sessions: Arc<SessionRepository>,
        results: Arc<EvalResultRepository>,
        pool: sqlx::SqlitePool,
    }

    async fn harness(
        case_ids: &[&str],
        evren_fail_on: Option<&str>,
        malformed_for: Option<&str>,
    ) -> Harness {
        let pool = connect_in_memory().await;
        let test_cases = Arc::new(TestCaseRepository::new(pool.clone()));
        let sessions = Arc::new(SessionRepository::new(pool.clone()));
        let results = Arc::new(EvalResultRepository::new(pool.clone()));

        sessions.insert_user("user-1", "qa@example.com").await.unwrap();
        for id in case_ids {
            test_cases
                .insert(&TestCase {
                    test_case_id: id.to_string(),
                    title: None,
                    input_message: "hi".to_string(),
                    img_url: None,
                    context: None,
                    expected_state: "calm".to_string(),
                    expected_behavior: "greets".to_string(),
                    forbidden: None,
                    is_enabled: true,
                })
                .await
                .unwrap();
        }

        let llm: Arc<dyn LLMClient + Send + Sync> = Arc::new(ScriptedLLM {
            malformed_for: malformed_for.map(str::to_string),
        });
        let orchestrator = RunOrchestrator::new(
            test_cases,
            sessions.clone(),
            results.clone(),
            Arc::new(ScriptedEvren {
                fail_on: evren_fail_on.map(str::to_string),
            }),
            Arc::new(EvaluateUseCase::new(llm.clone(), PriceTable::default())),
            Arc::new(SummarizeUseCase::new(llm, PriceTable::default())),
        );

        Harness {
            orchestrator,
            sessions,
            results,
            pool,
        }
    }

    fn params() -> RunParams {
        RunParams {
            user_id: "user-1".to_string(),
            evren_api_url: "http://127.0.0.1:8000/evaluate".to_string(),
            evaluator_config: LLMConfig::default(),
            summarizer_config: LLMConfig::default(),
            evaluator_prompt: "judge".to_string(),
            summarizer_prompt: "summarize".to_string(),
        }
    }

    async fn run_and_collect(harness: &Harness) -> (String, Vec<RunEvent>) {
        let prepared = harness.orchestrator.prepare(params()).await.unwrap();
        let session_id = prepared.session.test_session_id.clone();
        let (tx, mut rx) = mpsc::channel(64);
        harness.orchestrator.execute(prepared, tx).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (session_id, events)
    }

    fn stages(events: &[RunEvent]) -> Vec<String> {
        events
            .iter()
            .map(|event| match event {
                RunEvent::Progress { stage, .. } => format!("{:?}", stage).to_lowercase(),
                RunEvent::Complete { .. } => "complete".to_string(),
                RunEvent::Error { .. } => "error!".to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_happy_path_event_order_and_persistence() {
        let harness = harness(&["TC-01", "TC-02"], None, None).await;
        let (session_id, events) = run_and_collect(&harness).await;

        assert_eq!(
            stages(&events),
            vec![
                "start",
                "evren",
                "evaluating",
                "done",
                "evren",
                "evaluating",
                "done",
                "summarizing",
                "complete"
            ]
        );

        let results = harness.results.list_for_session(&session_id).await.unwrap();
        assert_eq!(results.len(), 2);

        let session = harness.sessions.get_session(&session_id).await.unwrap();
        assert_eq!(session.title.as_deref(), Some("Run report"));
        assert_eq!(session.summary.as_deref(), Some("Everything held up."));
        assert!(session.total_cost_usd > 0.0);

        match events.last().unwrap() {
            RunEvent::Complete {
                test_session_id,
                total_cost_usd,
                ..
            } => {
                assert_eq!(test_session_id, &session_id);
                assert_eq!(*total_cost_usd, session.total_cost_usd);
            }
            other => panic!("expected complete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_done_indices_are_strictly_increasing() {
        let harness = harness(&["TC-01", "TC-02", "TC-03"], None, None).await;
        let (_, events) = run_and_collect(&harness).await;

        let done_indices: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                RunEvent::Progress {
                    stage: RunStage::Done,
                    index,
                    ..
                } => *index,
                _ => None,
            })
            .collect();
        assert_eq!(done_indices, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_evren_failure_aborts_run_after_prior_cases() {
        let harness = harness(&["TC-01", "TC-02", "TC-03"], Some("TC-02"), None).await;
        let (session_id, events) = run_and_collect(&harness).await;

        assert_eq!(
            stages(&events),
            vec!["start", "evren", "evaluating", "done", "evren", "error!"]
        );
        match events.last().unwrap() {
            RunEvent::Error { error } => assert!(error.contains("upstream exploded")),
            other => panic!("expected error, got {:?}", other),
        }

        // Case 1's result is retained; the session is never finalized.
        let results = harness.results.list_for_session(&session_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].test_case_id, "TC-01");

        let session = harness.sessions.get_session(&session_id).await.unwrap();
        assert!(session.summary.is_none());
        assert_eq!(session.total_cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_malformed_verdict_does_not_skip_case() {
        let harness = harness(&["TC-01", "TC-02", "TC-03"], None, Some("TC-02")).await;
        let (session_id, events) = run_and_collect(&harness).await;

        assert!(matches!(events.last().unwrap(), RunEvent::Complete { .. }));

        let results = harness.results.list_for_session(&session_id).await.unwrap();
        assert_eq!(results.len(), 3);
        let degraded = results
            .iter()
            .find(|r| r.test_case_id == "TC-02")
            .unwrap();
        assert!(!degraded.success);
        assert!(degraded
            .reason
            .as_deref()
            .unwrap_or_default()
            .contains("invalid JSON"));
    }

    #[tokio::test]
    async fn test_all_cases_skipped_skips_summarizer() {
        let harness = harness(&["TC-01", "TC-02"], None, None).await;
        // Force every subject-output insert to fail.
        sqlx::query("DROP TABLE evren_responses")
            .execute(&harness.pool)
            .await
            .unwrap();

        let (session_id, events) = run_and_collect(&harness).await;
        assert_eq!(
            stages(&events),
            vec!["start", "evren", "error", "evren", "error", "complete"]
        );
        // Per-case error stages, not terminal errors.
        let per_case_errors = events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    RunEvent::Progress {
                        stage: RunStage::Error,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(per_case_errors, 2);

        let session = harness.sessions.get_session(&session_id).await.unwrap();
        assert!(session.summary.is_none());
        assert!(session.title.is_none());
        assert_eq!(session.total_cost_usd, 0.0);
    }

    #[tokio::test]
    async fn test_disconnected_receiver_stops_the_run() {
        let harness = harness(&["TC-01", "TC-02"], None, None).await;
        let prepared = harness.orchestrator.prepare(params()).await.unwrap();
        let session_id = prepared.session.test_session_id.clone();

        let (tx, rx) = mpsc::channel(64);
        drop(rx);
        harness.orchestrator.execute(prepared, tx).await;

        // Stopped before the first case: nothing persisted, nothing finalized.
        let results = harness.results.list_for_session(&session_id).await.unwrap();
        assert!(results.is_empty());
        let session = harness.sessions.get_session(&session_id).await.unwrap();
        assert!(session.summary.is_none());
        assert_eq!(session.total_cost_usd, 0.0);
    }

    #[test]
    fn test_sse_frame_wire_format() {
        let event = RunEvent::Progress {
            stage: RunStage::Done,
            index: Some(2),
            total: Some(5),
            test_case_id: Some("TC-02".to_string()),
            test_session_id: None,
            message: Some("Completed 2 of 5".to_string()),
        };
        let frame = event.to_sse_frame();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n\n"));

        let json: serde_json::Value =
            serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["stage"], "done");
        assert_eq!(json["index"], 2);
        assert!(json.get("test_session_id").is_none());

        let complete = RunEvent::Complete {
            test_session_id: "s1".to_string(),
            total_cost_usd: 0.00465,
            title: None,
            summary: Some("report".to_string()),
        };
        let json: serde_json::Value = serde_json::from_str(
            complete.to_sse_frame().trim_start_matches("data: ").trim(),
        )
        .unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["total_cost_usd"], 0.00465);
        assert!(json.get("title").is_none());
    }

    #[tokio::test]
    async fn test_prepare_rejects_unknown_user() {
        let harness = harness(&["TC-01"], None, None).await;
        let mut bad = params();
        bad.user_id = "nobody".to_string();
        assert!(matches!(
            harness.orchestrator.prepare(bad).await,
            Err(AppError::ValidationError(_))
        ));
    }
}
