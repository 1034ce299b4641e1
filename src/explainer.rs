//! The streaming explanation loop.
//!
//! [`StreamingExplainer::explain`] sends one request, then for every fragment that arrives
//! appends its text to an [`Accumulator`], cleans the whole accumulated text, and shows the
//! result in a single display that is updated in place.

use std::time::{Duration, Instant};

use futures::StreamExt;

use crate::backend::{Backend, BackendConfig};
use crate::error::{Error, Result};
use crate::observability::{
    EXPLAIN_DURATION, EXPLAIN_FAILURES, EXPLAIN_FRAGMENTS, EXPLAIN_INVOCATIONS, EXPLAIN_TTFB,
};
use crate::prompt::ExplanationRequest;
use crate::render::DisplaySink;
use crate::transform::{COSMETIC_MARKERS, strip_cosmetics};
use crate::transport::{HttpTransport, Transport};

/// How often the sink is asked whether to stop while waiting for a fragment.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Default limit on how long the backend may go without sending anything.
///
/// A local model can take minutes to load before its first fragment, so this is generous.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// The running text of one explanation.
///
/// Text only grows by appending fragments.  After every append the cosmetic cleanup runs
/// over the entire buffer, because a marker split across two fragments is only complete
/// once the second one arrives.
#[derive(Debug, Default, Clone)]
pub struct Accumulator {
    buffer: String,
}

impl Accumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `delta` (absent deltas add nothing), clean up, and return the current text.
    pub fn push(&mut self, delta: Option<&str>) -> &str {
        if let Some(delta) = delta {
            self.buffer.push_str(delta);
        }
        if COSMETIC_MARKERS
            .iter()
            .any(|marker| self.buffer.contains(marker))
        {
            self.buffer = strip_cosmetics(&self.buffer);
        }
        &self.buffer
    }

    /// The current text.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Consumes the accumulator, returning its text.
    pub fn into_text(self) -> String {
        self.buffer
    }
}

/// Explains code by streaming a chat completion into a display.
pub struct StreamingExplainer<T: Transport = HttpTransport> {
    transport: T,
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    idle_timeout: Duration,
}

impl StreamingExplainer<HttpTransport> {
    /// Creates an explainer that talks HTTP to the backends.
    pub fn http() -> Self {
        Self::new(HttpTransport::new())
    }
}

impl<T: Transport> StreamingExplainer<T> {
    /// Creates an explainer that opens its requests through `transport`.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            api_key: None,
            model: None,
            base_url: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Sets the credential used with the primary backend.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Overrides the backend's model identifier.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Overrides the backend's endpoint.
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    /// Limits how long the backend may stay silent, while opening or between fragments.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// The transport requests are opened through.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Resolve `backend` into the configuration its request is sent with.
    pub fn resolve(&self, backend: Backend) -> BackendConfig {
        let mut config = backend.config(self.api_key.as_deref());
        if let Some(model) = &self.model {
            config = config.with_model(model.clone());
        }
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url.clone());
        }
        config
    }

    /// Explain `code` with the backend called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedBackend`] without opening a connection if `name` is not
    /// a recognized backend, and otherwise whatever [`Self::explain`] returns.
    pub async fn explain_named(
        &self,
        code: &str,
        name: &str,
        sink: &mut dyn DisplaySink,
    ) -> Result<()> {
        let backend = name.parse::<Backend>()?;
        self.explain(code, backend, sink).await
    }

    /// Explain `code` with `backend`, showing the explanation in `sink`.
    ///
    /// One display is created once the request is accepted, and it is updated once per
    /// fragment.  When the stream ends the display is finished.
    ///
    /// # Errors
    ///
    /// Transport, API and malformed-fragment errors are returned as they happen and are not
    /// retried; the display keeps whatever it showed last.  [`Error::Timeout`] is returned
    /// when the backend sends nothing for the idle timeout, and [`Error::Abort`] when the
    /// sink asks to stop, whether the request is still opening or already streaming.  Both
    /// drop the connection.
    pub async fn explain(
        &self,
        code: &str,
        backend: Backend,
        sink: &mut dyn DisplaySink,
    ) -> Result<()> {
        EXPLAIN_INVOCATIONS.click();
        let start = Instant::now();
        let config = self.resolve(backend);
        let request = ExplanationRequest::new(code, config.model.clone());
        tracing::debug!(
            backend = %backend,
            model = %config.model,
            endpoint = %config.endpoint(),
            code_bytes = code.len(),
            "explaining code"
        );

        let result = self.stream_into(&config, &request, sink, start).await;
        EXPLAIN_DURATION.add(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            EXPLAIN_FAILURES.click();
            tracing::debug!(error = %e, "explanation failed");
        }
        result
    }

    async fn stream_into(
        &self,
        config: &BackendConfig,
        request: &ExplanationRequest,
        sink: &mut dyn DisplaySink,
        start: Instant,
    ) -> Result<()> {
        if sink.should_interrupt() {
            return Err(interrupted(0));
        }
        let chat_request = request.to_chat_request();
        let mut deadline = tokio::time::Instant::now() + self.idle_timeout;
        let mut open = self.transport.open(config, &chat_request);
        let mut stream = loop {
            tokio::select! {
                opened = &mut open => break opened?,
                _ = tokio::time::sleep(INTERRUPT_POLL) => {
                    if sink.should_interrupt() {
                        return Err(interrupted(0));
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(idle(self.idle_timeout, 0));
                    }
                }
            }
        };
        drop(open);

        let mut text = Accumulator::new();
        let handle = sink.create_display("");
        let mut fragments = 0u64;

        loop {
            if sink.should_interrupt() {
                return Err(interrupted(fragments));
            }
            deadline = tokio::time::Instant::now() + self.idle_timeout;
            let next = loop {
                tokio::select! {
                    next = stream.next() => break next,
                    _ = tokio::time::sleep(INTERRUPT_POLL) => {
                        if sink.should_interrupt() {
                            return Err(interrupted(fragments));
                        }
                        if tokio::time::Instant::now() >= deadline {
                            return Err(idle(self.idle_timeout, fragments));
                        }
                    }
                }
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            if fragments == 0 {
                EXPLAIN_TTFB.add(start.elapsed().as_secs_f64());
            }
            fragments += 1;
            EXPLAIN_FRAGMENTS.click();
            sink.update_display(handle, text.push(chunk.delta_text()));
        }

        sink.finish_display(handle);
        tracing::debug!(
            fragments,
            chars = text.text().chars().count(),
            "explanation complete"
        );
        Ok(())
    }
}

fn interrupted(fragments: u64) -> Error {
    tracing::debug!(fragments, "explanation interrupted");
    Error::abort(format!("interrupted after {fragments} fragments"))
}

fn idle(timeout: Duration, fragments: u64) -> Error {
    tracing::debug!(fragments, timeout_secs = timeout.as_secs(), "backend went quiet");
    Error::timeout(
        format!(
            "no response from the backend for {}s after {fragments} fragments",
            timeout.as_secs()
        ),
        Some(timeout.as_secs_f64()),
    )
}
