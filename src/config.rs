//! Configuration for the explain command.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved configuration the
//! binary runs with.

use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::backend::Backend;
use crate::explainer::DEFAULT_IDLE_TIMEOUT;
use crate::error::Result;

/// Command-line arguments for the codeassist-explain tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ExplainArgs {
    /// Backend to use.
    #[arrrg(optional, "Backend to use: gpt or llama (default: llama)", "BACKEND")]
    pub backend: Option<String>,

    /// Model override.
    #[arrrg(optional, "Model to use instead of the backend's default", "MODEL")]
    pub model: Option<String>,

    /// Endpoint override.
    #[arrrg(optional, "Base URL to use instead of the backend's default", "URL")]
    pub base_url: Option<String>,

    /// Idle timeout in seconds.
    #[arrrg(optional, "Give up after this many seconds without output (default: 300)", "SECONDS")]
    pub timeout: Option<u64>,

    /// Disable ANSI colors and in-place rewriting.
    #[arrrg(flag, "Disable ANSI colors and in-place rewriting")]
    pub no_color: bool,

    /// Log debug output on stderr.
    #[arrrg(flag, "Log debug output on stderr")]
    pub verbose: bool,
}

/// Resolved configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainConfig {
    /// The backend to explain with.
    pub backend: Backend,

    /// Model to use instead of the backend's default.
    pub model: Option<String>,

    /// Endpoint to use instead of the backend's default.
    pub base_url: Option<String>,

    /// How long the backend may go without sending anything.
    pub timeout: Duration,

    /// Whether to use ANSI colors and rewrite the display in place.
    pub use_color: bool,

    /// Whether to log debug output.
    pub verbose: bool,
}

impl ExplainConfig {
    /// Creates a configuration with default values.
    ///
    /// Defaults:
    /// - Backend: llama
    /// - Timeout: 300 seconds
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            backend: Backend::default(),
            model: None,
            base_url: None,
            timeout: DEFAULT_IDLE_TIMEOUT,
            use_color: true,
            verbose: false,
        }
    }

    /// Sets the backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the model override.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Sets the endpoint override.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<ExplainArgs> for ExplainConfig {
    type Error = crate::Error;

    /// Resolve arguments, rejecting an unknown backend name.
    fn try_from(args: ExplainArgs) -> Result<Self> {
        let backend = match args.backend.as_deref() {
            Some(name) => name.parse()?,
            None => Backend::default(),
        };
        Ok(ExplainConfig {
            backend,
            model: args.model,
            base_url: args.base_url,
            timeout: args
                .timeout
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_IDLE_TIMEOUT),
            use_color: !args.no_color,
            verbose: args.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ExplainConfig::new();
        assert_eq!(config.backend, Backend::Local);
        assert!(config.model.is_none());
        assert!(config.base_url.is_none());
        assert_eq!(config.timeout, DEFAULT_IDLE_TIMEOUT);
        assert!(config.use_color);
        assert!(!config.verbose);
    }

    #[test]
    fn config_from_args_defaults() {
        let config = ExplainConfig::try_from(ExplainArgs::default()).unwrap();
        assert_eq!(config, ExplainConfig::new());
    }

    #[test]
    fn config_from_args_custom() {
        let args = ExplainArgs {
            backend: Some("gpt".to_string()),
            model: Some("gpt-4o".to_string()),
            base_url: Some("https://proxy.example.com/v1/".to_string()),
            timeout: Some(30),
            no_color: true,
            verbose: true,
        };
        let config = ExplainConfig::try_from(args).unwrap();
        assert_eq!(config.backend, Backend::Primary);
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(
            config.base_url.as_deref(),
            Some("https://proxy.example.com/v1/")
        );
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(!config.use_color);
        assert!(config.verbose);
    }

    #[test]
    fn config_from_args_unknown_backend() {
        let args = ExplainArgs {
            backend: Some("claude".to_string()),
            ..ExplainArgs::default()
        };
        let err = ExplainConfig::try_from(args).unwrap_err();
        assert!(err.is_unsupported_backend());
    }

    #[test]
    fn config_builder_pattern() {
        let config = ExplainConfig::new()
            .with_backend(Backend::Primary)
            .with_model(Some("gpt-4o".to_string()))
            .with_base_url(Some("http://localhost:8080/v1/".to_string()))
            .with_timeout(Duration::from_secs(5))
            .without_color();
        assert_eq!(config.backend, Backend::Primary);
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!config.use_color);
    }
}
