use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use qgpt_infer::http_openai::{DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_EMBED_MODEL};
use qgpt_infer::{ModelClient, OfflineClient, OpenAiClient};
use serde::Deserialize;
use thiserror::Error;

use crate::PipelineConfig;

pub const DEFAULT_FIXTURES_DIR: &str = "fixtures";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse settings {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Contents of a settings file. Every key is optional.
///
/// ```yaml
/// model:
///   base_url: https://api.openai.com/v1
///   chat_model: gpt-4.1-mini
///   api_key_env: OPENAI_API_KEY
/// pipeline:
///   table_top_k: 3
///   model_timeout_secs: 30
/// fixtures_path: fixtures
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelSettings,
    pub pipeline: PipelineSettings,
    pub fixtures_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub base_url: String,
    pub chat_model: String,
    pub embed_model: String,
    pub temperature: f32,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            chat_model: DEFAULT_CHAT_MODEL.into(),
            embed_model: DEFAULT_EMBED_MODEL.into(),
            temperature: 0.1,
            api_key_env: "OPENAI_API_KEY".into(),
        }
    }
}

impl ModelSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub dry_run: bool,
    pub table_top_k: usize,
    pub column_cap: usize,
    pub example_top_k: usize,
    pub max_workspaces: usize,
    pub model_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let d = PipelineConfig::default();
        Self {
            dry_run: d.dry_run,
            table_top_k: d.table_top_k,
            column_cap: d.column_cap,
            example_top_k: d.example_top_k,
            max_workspaces: d.max_workspaces,
            model_timeout_secs: d.model_timeout.as_secs(),
        }
    }
}

impl Settings {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text).map_err(|source| SettingsError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like `from_path`, but a missing file means defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(p) if p.exists() => Self::from_path(p),
            Some(p) => {
                tracing::debug!(path = %p.display(), "settings file not found, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Catalog directory: explicit override, then the file's `fixtures_path`,
    /// then `./fixtures`.
    pub fn fixtures_dir(&self, explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| self.fixtures_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FIXTURES_DIR))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let p = &self.pipeline;
        PipelineConfig {
            dry_run: p.dry_run,
            table_top_k: p.table_top_k,
            column_cap: p.column_cap,
            example_top_k: p.example_top_k,
            max_workspaces: p.max_workspaces,
            model_timeout: Duration::from_secs(p.model_timeout_secs),
        }
    }

    /// Offline client for dry runs, otherwise the HTTP client. A missing key
    /// surfaces on the first call, not here.
    pub fn model_client(&self, dry_run: bool) -> Arc<dyn ModelClient> {
        if dry_run {
            return Arc::new(OfflineClient::new());
        }
        let m = &self.model;
        Arc::new(
            OpenAiClient::new(&m.base_url, m.api_key())
                .with_models(&m.chat_model, &m.embed_model)
                .with_temperature(m.temperature),
        )
    }
}
