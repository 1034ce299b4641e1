//! Credential loading and shape checking for the hosted backend.
//!
//! The check looks only at the shape of the key.  It never contacts the provider, and a
//! failed check is advisory: the caller reports it and carries on.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable the hosted backend's key is read from.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Prefix every well-formed project key starts with.
pub const API_KEY_PREFIX: &str = "sk-proj-";

/// Keys must be longer than this many bytes.
pub const API_KEY_MIN_LEN: usize = 10;

/// Result of checking a credential's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialCheck {
    /// The key has the expected prefix and length.
    LooksGood,
    /// No key was supplied.
    Missing,
    /// A key was supplied but has the wrong prefix or is too short.
    Malformed,
}

impl CredentialCheck {
    /// Returns true if the key looks usable.
    pub fn is_ok(&self) -> bool {
        matches!(self, CredentialCheck::LooksGood)
    }

    /// A human-readable warning, or `None` when the key looks good.
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            CredentialCheck::LooksGood => None,
            CredentialCheck::Missing => Some(
                "No API key was found; set OPENAI_API_KEY before using the gpt backend.",
            ),
            CredentialCheck::Malformed => Some(
                "There might be a problem with your API key: expected it to start with \
                 \"sk-proj-\" and be longer than 10 characters.",
            ),
        }
    }
}

impl fmt::Display for CredentialCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.warning() {
            Some(warning) => write!(f, "{warning}"),
            None => write!(f, "API key looks good so far"),
        }
    }
}

/// Read the hosted backend's key from the environment.
///
/// Empty values are treated as unset.
pub fn load_api_key() -> Option<String> {
    env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty())
}

/// Load variables from a `.env` file into the environment, overriding what is set.
///
/// Without `path` the file is looked for in the current directory and its parents.  A
/// missing file is silently skipped and an unreadable one is logged and skipped.  Returns
/// the file that was loaded.
pub fn load_env_file(path: Option<&Path>) -> Option<PathBuf> {
    let loaded = match path {
        Some(path) => dotenvy::from_path_override(path).map(|()| path.to_path_buf()),
        None => dotenvy::dotenv_override(),
    };
    match loaded {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "loaded environment file");
            Some(path)
        }
        Err(e) if e.not_found() => None,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable environment file");
            None
        }
    }
}

/// Check the shape of a key.
pub fn check_api_key(api_key: Option<&str>) -> CredentialCheck {
    let check = match api_key {
        None | Some("") => CredentialCheck::Missing,
        Some(key) if key.starts_with(API_KEY_PREFIX) && key.len() > API_KEY_MIN_LEN => {
            CredentialCheck::LooksGood
        }
        Some(_) => CredentialCheck::Malformed,
    };
    // Reporting the warning is left to the caller.
    if let Some(warning) = check.warning() {
        tracing::debug!(env = API_KEY_ENV, "{warning}");
    } else {
        tracing::debug!("API key looks good so far");
    }
    check
}
