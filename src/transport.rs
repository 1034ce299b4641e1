//! The seam between the explainer and the network.

use std::time::Duration;

use crate::backend::BackendConfig;
use crate::client::{ChatClient, ChunkStream};
use crate::error::Result;
use crate::types::ChatCompletionRequest;

/// Opens streaming chat-completion requests.
///
/// `open` is called once per explanation.  The stream it returns is consumed in order and is
/// dropped as soon as the explanation stops, whether it finished, failed, or was
/// interrupted.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` to the backend described by `backend` and return its fragments.
    async fn open(
        &self,
        backend: &BackendConfig,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream>;
}

/// Transport that talks HTTP to the backend's chat-completion endpoint.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    connect_timeout: Option<Duration>,
}

impl HttpTransport {
    /// Creates a transport with the default connect timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long establishing a connection may take.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout);
        self
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open(
        &self,
        backend: &BackendConfig,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream> {
        let client = ChatClient::with_options(backend, self.connect_timeout)?;
        client.stream(request).await
    }
}
