//! Configuration for an [`Agent`](crate::agent::Agent).
//!
//! Everything the core needs is carried in one explicit [`AgentConfig`]
//! value; there is no process-wide state. Defaults reproduce the documented
//! constants (1000-token response reserve, 500-token summary reserve,
//! 200-token chunk overlap, depth cap of 5 and so on).
//!
//! # Examples
//!
//! ```
//! use autollama_rs::config::AgentConfig;
//!
//! let config = AgentConfig::new("meta-llama/llama-3-8b-instruct")
//!     .with_temperature(0.2)
//!     .with_context_window(4096)
//!     .with_retries(5);
//! assert_eq!(config.retry.max_retries, 5);
//! ```
//!
//! A JSON file may override any field; see [`FileConfig`].

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::DEFAULT_MODEL;
use crate::api::retry::RetryConfig;
use crate::context::assembler::AssemblerConfig;
use crate::context::history::INITIAL_SUMMARY;
use crate::context::splitter::SplitterConfig;
use crate::context::summarizer::SummarizerConfig;
use crate::error::{Error, Result};

/// Environment variable holding the OpenRouter API key.
pub const API_KEY_ENV: &str = "OPENROUTER_KEY";

/// Retries applied to completion calls unless configured otherwise.
pub const DEFAULT_RETRIES: u32 = 3;

/// Context window assumed for models the catalog does not know.
pub const DEFAULT_CONTEXT_WINDOW: usize = 8000;

/// Configuration for an agent session.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier (e.g. `"meta-llama/llama-3-8b-instruct"`).
    pub model: String,
    /// Sampling temperature for agent replies and history folds.
    pub temperature: f32,
    /// Context window override. When `None` the model catalog decides.
    pub context_window: Option<usize>,
    /// Retry policy for every completion call.
    pub retry: RetryConfig,
    pub splitter: SplitterConfig,
    pub summarizer: SummarizerConfig,
    pub assembler: AssemblerConfig,
    /// Running summary of a fresh history.
    pub initial_summary: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            context_window: None,
            retry: RetryConfig::with_retries(DEFAULT_RETRIES),
            splitter: SplitterConfig::default(),
            summarizer: SummarizerConfig::default(),
            assembler: AssemblerConfig::default(),
            initial_summary: INITIAL_SUMMARY.to_string(),
        }
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    // ── Builder methods ───────────────────────────────────────────

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Pin the context window instead of looking it up.
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// Set the number of retries for transient completion failures.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry.max_retries = retries;
        self
    }

    pub fn with_response_reserve(mut self, tokens: usize) -> Self {
        self.assembler.response_reserve = tokens;
        self
    }

    pub fn with_initial_summary(mut self, summary: impl Into<String>) -> Self {
        self.initial_summary = summary.into();
        self
    }

    /// Summarize chunks concurrently.
    pub fn with_parallel_chunks(mut self, enabled: bool) -> Self {
        self.summarizer.parallel_chunks = enabled;
        self
    }

    /// Apply every field set in `file`.
    pub fn apply_file(mut self, file: FileConfig) -> Self {
        if let Some(model) = file.model {
            self.model = model;
        }
        if let Some(temperature) = file.temperature {
            self.temperature = temperature;
        }
        if let Some(window) = file.context_window {
            self.context_window = Some(window);
        }
        if let Some(retries) = file.max_retries {
            self.retry.max_retries = retries;
        }
        if let Some(ms) = file.retry_initial_delay_ms {
            self.retry.initial_delay = std::time::Duration::from_millis(ms);
        }
        if let Some(tokens) = file.response_reserve {
            self.assembler.response_reserve = tokens;
        }
        if let Some(tokens) = file.summary_reserve {
            self.assembler.summary_reserve = tokens;
        }
        if let Some(tokens) = file.max_overlap_tokens {
            self.splitter.max_overlap_tokens = tokens;
        }
        if let Some(bias) = file.target_bias {
            self.splitter.target_bias = bias;
        }
        if let Some(depth) = file.max_summary_depth {
            self.summarizer.max_depth = depth;
        }
        if let Some(parallel) = file.parallel_chunks {
            self.summarizer.parallel_chunks = parallel;
        }
        if let Some(summary) = file.initial_summary {
            self.initial_summary = summary;
        }
        self
    }

    /// Reject settings no turn could ever satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::config("model must not be empty"));
        }
        if let Some(window) = self.context_window
            && window <= self.assembler.response_reserve
        {
            return Err(Error::config(format!(
                "context window ({window}) must exceed the response reserve ({})",
                self.assembler.response_reserve
            )));
        }
        if !(0.0..1.0).contains(&self.splitter.target_bias) {
            return Err(Error::config("target_bias must be in [0, 1)"));
        }
        if self.summarizer.max_depth == 0 {
            return Err(Error::config("max_summary_depth must be at least 1"));
        }
        Ok(())
    }
}

/// On-disk overrides for [`AgentConfig`]. Every field is optional.
///
/// ```json
/// { "model": "meta-llama/llama-3.1-70b-instruct", "max_retries": 5, "parallel_chunks": true }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub context_window: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_initial_delay_ms: Option<u64>,
    pub response_reserve: Option<usize>,
    pub summary_reserve: Option<usize>,
    pub max_overlap_tokens: Option<usize>,
    pub target_bias: Option<f64>,
    pub max_summary_depth: Option<usize>,
    pub parallel_chunks: Option<bool>,
    pub initial_summary: Option<String>,
}

impl FileConfig {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config: FileConfig = serde_json::from_str(&raw).map_err(|e| {
            Error::config(format!("invalid config file {}: {e}", path.display()))
        })?;
        debug!("Loaded config overrides from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_constants() {
        let config = AgentConfig::default();
        assert_eq!(config.model, "meta-llama/llama-3-8b-instruct");
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.assembler.response_reserve, 1000);
        assert_eq!(config.assembler.summary_reserve, 500);
        assert_eq!(config.splitter.max_overlap_tokens, 200);
        assert_eq!(config.summarizer.max_depth, 5);
        assert_eq!(config.initial_summary, "I was created");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_methods_chain() {
        let config = AgentConfig::new("meta-llama/llama-3.1-70b-instruct")
            .with_temperature(0.5)
            .with_context_window(16_000)
            .with_response_reserve(2000)
            .with_parallel_chunks(true)
            .with_initial_summary("I woke up");
        assert_eq!(config.model, "meta-llama/llama-3.1-70b-instruct");
        assert_eq!(config.context_window, Some(16_000));
        assert_eq!(config.assembler.response_reserve, 2000);
        assert!(config.summarizer.parallel_chunks);
        assert_eq!(config.initial_summary, "I woke up");
    }

    #[test]
    fn file_overrides_apply() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"model": "custom/model", "max_retries": 7, "target_bias": 0.25, "context_window": 32000}}"#
        )
        .unwrap();

        let overrides = FileConfig::load(file.path()).unwrap();
        let config = AgentConfig::default().apply_file(overrides);
        assert_eq!(config.model, "custom/model");
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.splitter.target_bias, 0.25);
        assert_eq!(config.context_window, Some(32_000));
        // Untouched fields keep their defaults.
        assert_eq!(config.assembler.summary_reserve, 500);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"modle": "typo"}}"#).unwrap();
        assert!(matches!(
            FileConfig::load(file.path()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileConfig::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read config file"));
    }

    #[test]
    fn validate_rejects_impossible_windows() {
        let config = AgentConfig::default().with_context_window(800);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = AgentConfig {
            model: "  ".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
