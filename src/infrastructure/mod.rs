pub mod config;
pub mod db;
pub mod evren;
pub mod llm_clients;
pub mod prompts;
