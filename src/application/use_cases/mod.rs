pub mod evaluate;
pub mod run_orchestrator;
pub mod summarize;
