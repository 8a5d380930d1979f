use crate::domain::error::{AppError, Result};
use std::path::{Path, PathBuf};

const BASE_PROMPT_TOKEN: &str = "{base_system_prompt}";

/// Loads the evaluator and summarizer system prompts from plain-text
/// template files, substituting the shared Evren persona text for the
/// `{base_system_prompt}` token.
pub struct PromptStore {
    dir: PathBuf,
}

impl PromptStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn read_prompt(&self, filename: &str) -> Result<String> {
        let path = self.dir.join(filename);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            AppError::IoError(format!("Failed to read prompt {}: {}", path.display(), e))
        })?;
        Ok(content.trim().to_string())
    }

    pub fn load_base_system_prompt(&self) -> Result<String> {
        self.read_prompt("base_system_prompt.txt")
    }

    pub fn load_evaluator_system_prompt(&self) -> Result<String> {
        let content = self.read_prompt("evaluator_system_prompt.txt")?;
        let base = self.load_base_system_prompt()?;
        Ok(content.replace(BASE_PROMPT_TOKEN, &base))
    }

    pub fn load_summarizer_system_prompt(&self) -> Result<String> {
        let content = self.read_prompt("summarizer_system_prompt.txt")?;
        let base = self.load_base_system_prompt()?;
        Ok(content.replace(BASE_PROMPT_TOKEN, &base))
    }
}
