//! Stream markdown explanations of code from chat-completion backends.
//!
//! ```rust,no_run
//! use codeassist::{Backend, StreamingExplainer, TerminalDisplay};
//!
//! # async fn run() -> codeassist::Result<()> {
//! let explainer = StreamingExplainer::http();
//! let mut display = TerminalDisplay::new();
//! explainer
//!     .explain("print(sum(range(10)))", Backend::Local, &mut display)
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod backend;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod explainer;
pub mod logging;
pub mod prompt;
pub mod render;
pub mod sse;
pub mod transform;
pub mod transport;
pub mod types;

mod observability;

// Re-exports
pub use backend::{Backend, BackendConfig};
pub use client::{ChatClient, ChunkStream};
pub use config::{ExplainArgs, ExplainConfig};
pub use credential::{CredentialCheck, check_api_key, load_api_key, load_env_file};
pub use error::{Error, Result};
pub use explainer::{Accumulator, StreamingExplainer};
pub use observability::register_biometrics;
pub use prompt::{ExplanationRequest, system_prompt, user_prompt};
pub use render::{CapturedDisplay, DisplayHandle, DisplaySink, TerminalDisplay};
pub use transform::strip_cosmetics;
pub use transport::{HttpTransport, Transport};
pub use types::*;
