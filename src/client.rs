use std::pin::Pin;
use std::time::{Duration, Instant};

use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde::Deserialize;

use crate::backend::BackendConfig;
use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUESTS, CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS};
use crate::sse::process_sse;
use crate::types::{ChatCompletionChunk, ChatCompletionRequest};

/// Default limit on establishing the connection.
///
/// Only the connection is bounded here.  A streamed explanation may legitimately take
/// minutes, so silence during the body is left to the explainer's idle timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A boxed stream of completion chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send>>;

/// Client for an OpenAI-compatible chat-completion endpoint.
#[derive(Clone)]
pub struct ChatClient {
    api_key: String,
    client: ReqwestClient,
    base_url: String,
    connect_timeout: Duration,
}

impl ChatClient {
    /// Create a client for the endpoint and credential in `config`.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Self::with_options(config, None)
    }

    /// Create a client with a custom connect timeout.
    pub fn with_options(
        config: &BackendConfig,
        connect_timeout: Option<Duration>,
    ) -> Result<Self> {
        url::Url::parse(&config.base_url).map_err(|e| {
            Error::url(format!("Invalid base URL {:?}: {e}", config.base_url), Some(e))
        })?;
        let connect_timeout = connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let client = ReqwestClient::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            api_key: config.api_key.clone(),
            client,
            base_url: config.base_url.clone(),
            connect_timeout,
        })
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::authentication("API key contains characters not valid in a header"))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        // OpenAI nests an object under "error"; Ollama sends a bare string.
        #[derive(Deserialize)]
        struct ErrorResponse {
            error: Option<ErrorField>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ErrorField {
            Detail {
                #[serde(rename = "type")]
                error_type: Option<String>,
                message: Option<String>,
                param: Option<String>,
            },
            Message(String),
        }

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };

        let (error_type, error_message, error_param) =
            match serde_json::from_str::<ErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
            {
                Some(ErrorField::Detail {
                    error_type,
                    message,
                    param,
                }) => (
                    error_type,
                    message.unwrap_or_else(|| error_body.clone()),
                    param,
                ),
                Some(ErrorField::Message(message)) => (None, message, None),
                None => (None, error_body.clone(), None),
            };

        // Map HTTP status code to appropriate error type
        match status_code {
            400 => Error::bad_request(error_message, error_param),
            401 => Error::authentication(error_message),
            403 => Error::permission(error_message),
            404 => Error::not_found(error_message),
            408 => Error::timeout(error_message, None),
            429 => Error::rate_limit(error_message, retry_after),
            500 => Error::internal_server(error_message),
            502..=504 => Error::service_unavailable(error_message, retry_after),
            _ => Error::api(status_code, error_type, error_message),
        }
    }

    /// Send a chat-completion request and get a streaming response.
    ///
    /// The returned stream yields chunks as the server sends them.  Dropping it closes the
    /// connection.
    pub async fn stream(&self, request: &ChatCompletionRequest) -> Result<ChunkStream> {
        let url = format!("{}chat/completions", self.base_url);
        let headers = self.default_headers()?;
        tracing::debug!(url = %url, model = %request.model, "opening chat-completion stream");

        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                CLIENT_REQUEST_ERRORS.click();
                if e.is_timeout() {
                    Error::timeout(
                        format!("Timed out connecting: {e}"),
                        Some(self.connect_timeout.as_secs_f64()),
                    )
                } else if e.is_connect() {
                    Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
                } else {
                    Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
                }
            })?;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            let err = Self::process_error_response(response).await;
            tracing::debug!(error = %err, "chat-completion request rejected");
            return Err(err);
        }

        let byte_stream = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });

        Ok(Box::pin(process_sse(byte_stream)))
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
