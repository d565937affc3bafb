use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use anyhow::{Context, Result, anyhow};

use crate::gemini::{DEFAULT_BASE_URL, MODELS};

/// User preferences read from `config.json`.
///
/// The API key is deliberately not part of this: it is typed in at runtime,
/// held in memory, and never written anywhere.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub default_model: Option<String>,
    /// Models appended to the built-in list.
    pub extra_models: Vec<String>,
    /// Command that speaks text read from stdin, e.g. `say` or `espeak --stdin`.
    pub tts_command: Option<String>,
    /// Command that records one utterance and prints the transcript.
    pub stt_command: Option<String>,
    pub log_level: String,
    /// Where the preview host document is written. Defaults to the cache dir.
    pub preview_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: None,
            extra_models: Vec::new(),
            tts_command: None,
            stt_command: None,
            log_level: "info".to_string(),
            preview_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let config_content = fs::read_to_string(&config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        Self::from_json(&config_content)
            .with_context(|| format!("parsing {}", config_path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Built-in models followed by configured extras, without duplicates.
    pub fn models(&self) -> Vec<String> {
        let mut models: Vec<String> = MODELS.iter().map(|m| m.to_string()).collect();
        for extra in &self.extra_models {
            if !models.contains(extra) {
                models.push(extra.clone());
            }
        }
        models
    }

    /// The configured default when it is offered, otherwise the first model.
    pub fn initial_model(&self) -> String {
        let models = self.models();
        self.default_model
            .as_ref()
            .filter(|m| models.contains(m))
            .cloned()
            .unwrap_or_else(|| models[0].clone())
    }

    pub fn preview_dir(&self) -> Option<PathBuf> {
        self.preview_dir
            .clone()
            .or_else(|| cache_dir().ok().map(|dir| dir.join("preview")))
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("gemchat").join("config.json"))
    }
}

/// Per-user cache directory for logs, the preview document and saved images.
pub fn cache_dir() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| anyhow!("Could not determine cache directory"))?;

    Ok(cache_dir.join("gemchat"))
}
