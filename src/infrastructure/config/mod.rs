use crate::domain::error::{AppError, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Server settings, merged from defaults, `maibel-eval.toml`, and
/// `MAIBEL_EVAL_`-prefixed environment variables (a `.env` file is loaded
/// by main before this runs).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub default_model: String,
    pub default_user_id: Option<String>,
    pub prompts_dir: String,
    pub evren_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3002,
            database_url: "sqlite://maibel-eval.db".to_string(),
            gemini_api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            default_model: "gemini-2.5-flash".to_string(),
            default_user_id: None,
            prompts_dir: "content/prompts".to_string(),
            evren_timeout_secs: 120,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file("maibel-eval.toml"))
            .merge(Env::prefixed("MAIBEL_EVAL_"))
            .extract()
            .map_err(|e| AppError::ConfigError(format!("Failed to load settings: {}", e)))
    }

    /// GEMINI_API_KEY is also honored without the prefix, matching the
    /// original deployment convention.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.gemini_api_key
            .clone()
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.port, 3002);
        assert_eq!(settings.default_model, "gemini-2.5-flash");
        assert!(settings.gemini_api_key.is_none());
    }
}
