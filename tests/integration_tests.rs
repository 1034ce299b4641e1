//! Integration tests for codeassist.
//!
//! Most tests drive the explainer through a scripted transport.  The HTTP tests run
//! against a one-shot server on loopback, and the live test needs OPENAI_API_KEY.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use codeassist::{
    Backend, BackendConfig, CapturedDisplay, ChatCompletionChunk, ChatCompletionRequest,
    ChunkStream, CredentialCheck, DisplayHandle, DisplaySink, Error, HttpTransport, MessageRole,
    Result, StreamingExplainer, Transport, check_api_key, system_prompt, user_prompt,
};

/// One fragment the scripted transport will yield.
#[derive(Clone)]
enum Step {
    Text(&'static str),
    Empty,
    Fail,
}

/// Transport that records every request and replays a fixed script.
struct ScriptedTransport {
    script: Vec<Step>,
    opened: Mutex<Vec<(BackendConfig, ChatCompletionRequest)>>,
    polled: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            opened: Mutex::default(),
            polled: Arc::default(),
        }
    }

    fn texts(texts: &[&'static str]) -> Self {
        Self::new(texts.iter().map(|t| Step::Text(*t)).collect())
    }

    fn opened(&self) -> Vec<(BackendConfig, ChatCompletionRequest)> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn open(
        &self,
        backend: &BackendConfig,
        request: &ChatCompletionRequest,
    ) -> Result<ChunkStream> {
        self.opened
            .lock()
            .unwrap()
            .push((backend.clone(), request.clone()));
        let polled = self.polled.clone();
        let fragments = stream::iter(self.script.clone()).map(move |step| {
            polled.fetch_add(1, Ordering::SeqCst);
            match step {
                Step::Text(text) => Ok(ChatCompletionChunk::text(text)),
                Step::Empty => Ok(ChatCompletionChunk::empty()),
                Step::Fail => Err(Error::streaming("connection reset by peer", None)),
            }
        });
        Ok(Box::pin(fragments))
    }
}

#[tokio::test]
async fn selects_backend_model_and_endpoint() {
    let transport = ScriptedTransport::texts(&["ok"]);
    let explainer = StreamingExplainer::new(transport)
        .with_api_key(Some("sk-proj-0123456789".to_string()));

    let mut sink = CapturedDisplay::new();
    explainer
        .explain("x = 1", Backend::Primary, &mut sink)
        .await
        .unwrap();
    explainer
        .explain_named("x = 1", "llama", &mut sink)
        .await
        .unwrap();

    let opened = explainer.transport().opened();
    assert_eq!(opened.len(), 2);

    let (primary, request) = &opened[0];
    assert_eq!(primary.endpoint(), "https://api.openai.com/v1/chat/completions");
    assert_eq!(primary.api_key, "sk-proj-0123456789");
    assert_eq!(request.model, "gpt-4o-mini");

    let (local, request) = &opened[1];
    assert_eq!(local.endpoint(), "http://localhost:11434/v1/chat/completions");
    assert_eq!(local.api_key, "ollama");
    assert_eq!(request.model, "llama3.2");
}

#[tokio::test]
async fn unsupported_backend_opens_nothing() {
    let explainer = StreamingExplainer::new(ScriptedTransport::texts(&["never"]));
    let mut sink = CapturedDisplay::new();
    let err = explainer
        .explain_named("x = 1", "mistral", &mut sink)
        .await
        .unwrap_err();
    match err {
        Error::UnsupportedBackend { name } => assert_eq!(name, "mistral"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(explainer.transport().opened().is_empty());
    assert!(sink.created().is_empty());
}

#[tokio::test]
async fn request_carries_both_prompts() {
    let explainer = StreamingExplainer::new(ScriptedTransport::texts(&[]));
    let mut sink = CapturedDisplay::new();
    let code = "def f(x):\n    return x * 2";
    explainer
        .explain(code, Backend::Local, &mut sink)
        .await
        .unwrap();

    let (_, request) = &explainer.transport().opened()[0];
    assert!(request.stream);
    assert_eq!(request.messages.len(), 2);
    assert_eq!(request.messages[0].role, MessageRole::System);
    assert_eq!(request.messages[0].content, system_prompt());
    assert_eq!(request.messages[1].role, MessageRole::User);
    assert_eq!(request.messages[1].content, user_prompt(code));
    assert!(request.messages[1].content.contains(code));
}

#[tokio::test]
async fn accumulates_in_order() {
    let explainer =
        StreamingExplainer::new(ScriptedTransport::texts(&["He", "llo", " wor", "ld"]));
    let mut sink = CapturedDisplay::new();
    explainer
        .explain("x = 1", Backend::Local, &mut sink)
        .await
        .unwrap();

    assert_eq!(sink.created(), &["".to_string()]);
    assert_eq!(sink.contents(), vec!["He", "Hello", "Hello wor", "Hello world"]);
    let handle = sink.updates()[0].0;
    assert!(sink.updates().iter().all(|(h, _)| *h == handle));
    assert_eq!(sink.finished(), &[handle]);
}

#[tokio::test]
async fn missing_delta_is_tolerated() {
    let explainer = StreamingExplainer::new(ScriptedTransport::new(vec![
        Step::Text("A"),
        Step::Empty,
        Step::Text("B"),
    ]));
    let mut sink = CapturedDisplay::new();
    explainer
        .explain("x = 1", Backend::Local, &mut sink)
        .await
        .unwrap();
    assert_eq!(sink.contents(), vec!["A", "A", "AB"]);
}

#[tokio::test]
async fn fence_split_across_fragments_is_removed() {
    let explainer =
        StreamingExplainer::new(ScriptedTransport::texts(&["```py", "thon\ncode\n```"]));
    let mut sink = CapturedDisplay::new();
    explainer
        .explain("x = 1", Backend::Local, &mut sink)
        .await
        .unwrap();
    assert_eq!(sink.contents(), vec!["py", "python\ncode\n"]);
    assert!(!sink.current().unwrap().contains("```"));
}

#[tokio::test]
async fn word_split_across_fragments_is_removed() {
    let explainer = StreamingExplainer::new(ScriptedTransport::texts(&["mark", "down text"]));
    let mut sink = CapturedDisplay::new();
    explainer
        .explain("x = 1", Backend::Local, &mut sink)
        .await
        .unwrap();
    assert_eq!(sink.contents(), vec!["mark", " text"]);
    assert!(!sink.current().unwrap().contains("markdown"));
}

#[tokio::test]
async fn mid_stream_failure_is_fatal() {
    let explainer = StreamingExplainer::new(ScriptedTransport::new(vec![
        Step::Text("one "),
        Step::Text("two "),
        Step::Fail,
        Step::Text("four "),
        Step::Text("five"),
    ]));
    let mut sink = CapturedDisplay::new();
    let err = explainer
        .explain("x = 1", Backend::Local, &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Streaming { .. }));
    assert_eq!(sink.contents(), vec!["one ", "one two "]);
    assert!(sink.finished().is_empty());
    assert_eq!(explainer.transport().polled.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn malformed_credential_still_attempts_primary() {
    let api_key = "not-a-project-key";
    assert_eq!(check_api_key(Some(api_key)), CredentialCheck::Malformed);

    let explainer = StreamingExplainer::new(ScriptedTransport::texts(&["ok"]))
        .with_api_key(Some(api_key.to_string()));
    let mut sink = CapturedDisplay::new();
    explainer
        .explain("x = 1", Backend::Primary, &mut sink)
        .await
        .unwrap();

    let opened = explainer.transport().opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].0.api_key, api_key);
}

/// Read one HTTP request, headers and body, from `socket`.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut request = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        request.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&request).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if request.len() >= end + 4 + content_length {
                break;
            }
        }
        if n == 0 {
            break;
        }
    }
    String::from_utf8_lossy(&request).to_string()
}

/// Serve one HTTP response on loopback and hand back the raw request.
async fn serve_once(response: String) -> (String, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        request
    });
    (format!("http://{addr}/v1/"), handle)
}

fn sse_response(events: &[&str]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str("data: ");
        body.push_str(event);
        body.push_str("\n\n");
    }
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n{body}"
    )
}

#[tokio::test]
async fn streams_over_http() {
    let (base_url, server) = serve_once(sse_response(&[
        r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"content":"This "}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"content":"prints ```"}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"content":"python\n0"}}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        "[DONE]",
    ]))
    .await;

    let explainer =
        StreamingExplainer::new(HttpTransport::new()).with_base_url(Some(base_url));
    let mut sink = CapturedDisplay::new();
    explainer
        .explain("print(0)", Backend::Local, &mut sink)
        .await
        .unwrap();

    assert_eq!(
        sink.contents(),
        vec!["", "This ", "This prints ", "This prints python\n0", "This prints python\n0"]
    );

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /v1/chat/completions"));
    let lower = request.to_lowercase();
    assert!(lower.contains("authorization: bearer ollama"));
    assert!(lower.contains("accept: text/event-stream"));
    let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
    let body: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(body["model"], "llama3.2");
    assert_eq!(body["stream"], true);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], user_prompt("print(0)"));
}

/// Captures updates and reports the first one as soon as it is shown.
struct FirstUpdate {
    inner: CapturedDisplay,
    first: Option<oneshot::Sender<String>>,
}

impl DisplaySink for FirstUpdate {
    fn create_display(&mut self, initial: &str) -> DisplayHandle {
        self.inner.create_display(initial)
    }

    fn update_display(&mut self, handle: DisplayHandle, content: &str) {
        self.inner.update_display(handle, content);
        if !content.is_empty() {
            if let Some(first) = self.first.take() {
                let _ = first.send(content.to_string());
            }
        }
    }

    fn finish_display(&mut self, handle: DisplayHandle) {
        self.inner.finish_display(handle);
    }
}

#[tokio::test]
async fn renders_while_the_response_is_still_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (first_tx, first_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket
            .write_all(
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n\
                 data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"}}]}\n\n"
                    .as_bytes(),
            )
            .await
            .unwrap();
        // Hold the rest of the body back until the first fragment is on screen.
        let first = tokio::time::timeout(std::time::Duration::from_secs(5), first_rx)
            .await
            .expect("first fragment should be shown before the body ends")
            .unwrap();
        socket
            .write_all(
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" world\"}}]}\n\n\
                 data: [DONE]\n\n"
                    .as_bytes(),
            )
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
        first
    });

    let explainer = StreamingExplainer::new(HttpTransport::new())
        .with_base_url(Some(format!("http://{addr}/v1/")));
    let mut sink = FirstUpdate {
        inner: CapturedDisplay::new(),
        first: Some(first_tx),
    };
    explainer
        .explain("x = 1", Backend::Local, &mut sink)
        .await
        .unwrap();

    assert_eq!(server.await.unwrap(), "Hello");
    assert_eq!(sink.inner.contents(), vec!["Hello", "Hello world"]);
    assert_eq!(sink.inner.finished().len(), 1);
}

#[tokio::test]
async fn http_error_status_is_mapped() {
    let body = r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error","param":null,"code":"invalid_api_key"}}"#;
    let response = format!(
        "HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let (base_url, server) = serve_once(response).await;

    let explainer = StreamingExplainer::new(HttpTransport::new())
        .with_api_key(Some("sk-proj-wrong-key".to_string()))
        .with_base_url(Some(base_url));
    let mut sink = CapturedDisplay::new();
    let err = explainer
        .explain("x = 1", Backend::Primary, &mut sink)
        .await
        .unwrap_err();

    assert!(err.is_authentication(), "{err:?}");
    assert!(err.to_string().contains("Incorrect API key provided"));
    assert!(sink.created().is_empty());
    server.await.unwrap();
}

#[tokio::test]
async fn ollama_missing_model_is_not_found() {
    let body = r#"{"error":"model \"llama3.2\" not found, try pulling it first"}"#;
    let response = format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let (base_url, server) = serve_once(response).await;

    let explainer =
        StreamingExplainer::new(HttpTransport::new()).with_base_url(Some(base_url));
    let mut sink = CapturedDisplay::new();
    let err = explainer
        .explain("x = 1", Backend::Local, &mut sink)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }), "{err:?}");
    assert!(err.to_string().contains("try pulling it first"));
    server.await.unwrap();
}

#[tokio::test]
async fn malformed_fragment_over_http_is_fatal() {
    let (base_url, server) = serve_once(sse_response(&[
        r#"{"choices":[{"index":0,"delta":{"content":"ok"}}]}"#,
        r#"{"unexpected":true}"#,
        r#"{"choices":[{"index":0,"delta":{"content":"never"}}]}"#,
    ]))
    .await;

    let explainer =
        StreamingExplainer::new(HttpTransport::new()).with_base_url(Some(base_url));
    let mut sink = CapturedDisplay::new();
    let err = explainer
        .explain("x = 1", Backend::Local, &mut sink)
        .await
        .unwrap_err();

    assert!(err.is_serialization(), "{err:?}");
    assert_eq!(sink.contents(), vec!["ok"]);
    server.await.unwrap();
}

#[tokio::test]
async fn test_live_primary_backend() {
    // This test requires OPENAI_API_KEY to be set
    let api_key = codeassist::load_api_key();
    if api_key.is_none() {
        eprintln!("Skipping test: OPENAI_API_KEY not set");
        return;
    }

    let explainer = StreamingExplainer::http().with_api_key(api_key);
    let mut sink = CapturedDisplay::new();
    let result = explainer
        .explain("print('hello')", Backend::Primary, &mut sink)
        .await;
    assert!(result.is_ok(), "Request should succeed with valid API key");
    assert!(!sink.current().unwrap_or_default().is_empty());
}
