//! Server-Sent Events (SSE) processing for streaming chat completions.
//!
//! This module converts the raw byte stream of a chat-completion response into a stream of
//! [`ChatCompletionChunk`]s.  Each event carries one JSON chunk on its `data:` line, and the
//! stream is terminated by `data: [DONE]`.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;

use crate::observability::{STREAM_BYTES, STREAM_ERRORS, STREAM_EVENTS};
use crate::{ChatCompletionChunk, Error, Result};

/// Data payload that marks the end of the stream.
const DONE_MARKER: &str = "[DONE]";

/// Process a stream of bytes into a stream of completion chunks.
///
/// Events may be split across byte chunks at any point, including inside a multi-byte
/// character.  The returned stream ends at `[DONE]`, at the end of the body, or right after
/// the first error it yields.
///
/// ```
/// # tokio_test::block_on(async {
/// use bytes::Bytes;
/// use futures::{StreamExt, stream};
/// use codeassist::sse::process_sse;
///
/// let body = stream::iter(vec![
///     Ok(Bytes::from_static(b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n")),
///     Ok(Bytes::from_static(b"data: [DONE]\n\n")),
/// ]);
/// let chunks: Vec<_> = process_sse(body).collect().await;
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].as_ref().unwrap().delta_text(), Some("hi"));
/// # });
/// ```
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<ChatCompletionChunk>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let buffer: Vec<u8> = Vec::new();

    stream::unfold(
        (byte_stream, buffer, false),
        move |(mut stream, mut buffer, mut done)| async move {
            loop {
                if done {
                    return None;
                }

                // First check if we have a complete event in the buffer
                if let Some(event) = take_event(&mut buffer) {
                    match parse_event(&event) {
                        Parsed::Chunk(chunk) => {
                            STREAM_EVENTS.click();
                            return Some((Ok(chunk), (stream, buffer, done)));
                        }
                        Parsed::Skip => continue,
                        Parsed::Done => return None,
                        Parsed::Err(e) => {
                            STREAM_ERRORS.click();
                            done = true;
                            return Some((Err(e), (stream, buffer, done)));
                        }
                    }
                }

                // Read more data
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend_from_slice(&bytes);
                    }
                    Some(Err(e)) => {
                        STREAM_ERRORS.click();
                        done = true;
                        return Some((Err(e), (stream, buffer, done)));
                    }
                    None => {
                        // End of stream; a final event may lack its blank line
                        done = true;
                        if buffer.iter().all(u8::is_ascii_whitespace) {
                            return None;
                        }
                        let event = std::mem::take(&mut buffer);
                        match parse_event(&event) {
                            Parsed::Chunk(chunk) => {
                                STREAM_EVENTS.click();
                                return Some((Ok(chunk), (stream, buffer, done)));
                            }
                            Parsed::Skip | Parsed::Done => return None,
                            Parsed::Err(e) => {
                                STREAM_ERRORS.click();
                                return Some((Err(e), (stream, buffer, done)));
                            }
                        }
                    }
                }
            }
        },
    )
}

/// Outcome of parsing one event.
enum Parsed {
    Chunk(ChatCompletionChunk),
    Skip,
    Done,
    Err(Error),
}

/// Remove the first complete event from `buffer`, without its terminating blank line.
fn take_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let lf = find(buffer, b"\n\n").map(|pos| (pos, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|pos| (pos, 4));
    let (pos, len) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let rest = buffer.split_off(pos + len);
    let mut event = std::mem::replace(buffer, rest);
    event.truncate(pos);
    Some(event)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Parse one event's lines.
///
/// Comment lines and fields other than `event` and `data` are ignored.  Multiple `data`
/// lines are joined with newlines, as the SSE format prescribes.
fn parse_event(event: &[u8]) -> Parsed {
    let text = match std::str::from_utf8(event) {
        Ok(text) => text,
        Err(e) => {
            return Parsed::Err(Error::encoding(
                format!("Invalid UTF-8 in stream: {e}"),
                Some(Box::new(e)),
            ));
        }
    };

    let mut event_type = None;
    let mut data: Option<String> = None;
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event_type = Some(value),
            "data" => match data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    let Some(data) = data else {
        return Parsed::Skip;
    };
    if data.trim() == DONE_MARKER {
        return Parsed::Done;
    }
    if event_type == Some("error") {
        return Parsed::Err(stream_error(&data));
    }

    match serde_json::from_str::<ChatCompletionChunk>(&data) {
        Ok(chunk) => Parsed::Chunk(chunk),
        Err(e) => {
            if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&data) {
                return Parsed::Err(envelope.into_error());
            }
            Parsed::Err(Error::serialization(
                format!("Malformed stream fragment: {e}: {data}"),
                Some(Box::new(e)),
            ))
        }
    }
}

/// An error reported in-band, after the response headers were sent.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: Option<String>,
}

impl ErrorEnvelope {
    fn into_error(self) -> Error {
        Error::api(
            500,
            self.error.error_type.or_else(|| Some("stream_error".to_string())),
            self.error
                .message
                .unwrap_or_else(|| "unknown stream error".to_string()),
        )
    }
}

fn stream_error(data: &str) -> Error {
    match serde_json::from_str::<ErrorEnvelope>(data) {
        Ok(envelope) => envelope.into_error(),
        Err(_) => Error::api(500, Some("stream_error".to_string()), data),
    }
}
