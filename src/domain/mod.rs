pub mod error;
pub mod evren;
pub mod llm_config;
pub mod session;
pub mod test_case;
pub mod verdict;
