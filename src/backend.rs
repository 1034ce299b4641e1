//! Backend selection.
//!
//! A [`Backend`] names one of the two supported chat-completion providers.  It is resolved
//! once per explanation into a [`BackendConfig`] holding the endpoint, model and credential
//! the request is sent with.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default endpoint of the hosted provider.
pub const PRIMARY_BASE_URL: &str = "https://api.openai.com/v1/";

/// Model used with the hosted provider.
pub const PRIMARY_MODEL: &str = "gpt-4o-mini";

/// Endpoint of the local Ollama server's OpenAI-compatible API.
pub const LOCAL_BASE_URL: &str = "http://localhost:11434/v1/";

/// Model used with the local server.
pub const LOCAL_MODEL: &str = "llama3.2";

/// Placeholder credential; the local server does not check it.
pub const LOCAL_API_KEY: &str = "ollama";

/// A chat-completion provider.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Backend {
    /// The hosted provider, authenticated with a secret key.
    Primary,

    /// A local Ollama server.
    #[default]
    Local,
}

impl Backend {
    /// The short name used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Primary => "gpt",
            Backend::Local => "llama",
        }
    }

    /// The fixed model identifier for this backend.
    pub fn model(&self) -> &'static str {
        match self {
            Backend::Primary => PRIMARY_MODEL,
            Backend::Local => LOCAL_MODEL,
        }
    }

    /// The fixed endpoint for this backend.
    pub fn base_url(&self) -> &'static str {
        match self {
            Backend::Primary => PRIMARY_BASE_URL,
            Backend::Local => LOCAL_BASE_URL,
        }
    }

    /// Whether this backend needs an externally supplied credential.
    pub fn requires_credential(&self) -> bool {
        matches!(self, Backend::Primary)
    }

    /// Resolve this backend into the configuration a request is sent with.
    ///
    /// `api_key` is only used by [`Backend::Primary`]; the local backend always uses its
    /// placeholder credential.  A missing key for the primary backend is not an error here:
    /// the provider rejects the request and that error is surfaced to the caller.
    pub fn config(&self, api_key: Option<&str>) -> BackendConfig {
        let api_key = match self {
            Backend::Primary => api_key.unwrap_or_default().to_string(),
            Backend::Local => LOCAL_API_KEY.to_string(),
        };
        BackendConfig {
            backend: *self,
            base_url: self.base_url().to_string(),
            model: self.model().to_string(),
            api_key,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Backend {
    type Err = Error;

    /// Parse a backend name.
    ///
    /// Accepts "gpt", "openai" or "primary" for the hosted provider and "llama", "ollama"
    /// or "local" for the local server, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gpt" | "openai" | "primary" => Ok(Backend::Primary),
            "llama" | "ollama" | "local" => Ok(Backend::Local),
            _ => Err(Error::unsupported_backend(s)),
        }
    }
}

/// Endpoint, model and credential for one request.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// The backend this configuration was resolved from.
    pub backend: Backend,
    /// Base URL; `chat/completions` is appended to it.
    pub base_url: String,
    /// Model identifier sent in the request body.
    pub model: String,
    /// Bearer credential.
    pub api_key: String,
}

impl BackendConfig {
    /// Replace the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Replace the endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        self.base_url = base_url;
        self
    }

    /// The full chat-completion endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}chat/completions", self.base_url)
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}
