//! Streaming bridge between OpenAI's chat-completion SSE and the UI message
//! stream the web client consumes.
//!
//! Upstream frames look like `data: {"choices":[{"delta":{"content":"Hi"}}]}`
//! and end with `data: [DONE]`. Downstream frames are `data: {json}` UI events
//! (`start-step`, `text-start`, `text-delta`...) ending with `data: [DONE]`.

use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;

use axum::http::HeaderName;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

pub const UI_STREAM_HEADER: HeaderName = HeaderName::from_static("x-vercel-ai-ui-message-stream");
const DONE: &str = "[DONE]";

/// Incremental decoder for an upstream chat-completion event stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    delta: CompletionDelta,
}

#[derive(Default, Deserialize)]
struct CompletionDelta {
    content: Option<String>,
}

impl SseDecoder {
    /// Feeds raw bytes and returns the text deltas completed by them.
    ///
    /// Partial lines are held until their newline arrives. Nothing is
    /// returned once `[DONE]` has been seen.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut deltas = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.done {
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(delta) = self.decode_line(line.trim_end_matches(['\r', '\n'])) {
                deltas.push(delta);
            }
        }
        deltas
    }

    /// Decodes a final line the upstream closed without a newline.
    pub fn finish(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.buffer);
        if self.done {
            return Vec::new();
        }
        let line = String::from_utf8_lossy(&line);
        self.decode_line(line.trim_end_matches('\r'))
            .into_iter()
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn decode_line(&mut self, line: &str) -> Option<String> {
        let data = line.strip_prefix("data:")?.trim_start();
        if data == DONE {
            self.done = true;
            return None;
        }

        match serde_json::from_str::<CompletionChunk>(data) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|c| !c.is_empty()),
            Err(e) => {
                warn!("Skipping malformed upstream frame: {e}");
                None
            }
        }
    }
}

/// One frame of the UI message stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiEvent {
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
    FinishStep,
    Finish,
}

impl UiEvent {
    fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Translates `upstream` into UI event payloads, ending with `[DONE]`.
///
/// `on_complete` receives the full assistant text after the upstream stream
/// finishes cleanly and before `finish-step` is emitted. It is not called if
/// the upstream fails mid-stream.
pub fn ui_payloads<S, E, F, Fut>(upstream: S, on_complete: F) -> impl Stream<Item = String>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
    F: FnOnce(String) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async_stream::stream! {
        let id = Uuid::new_v4().to_string();
        let mut decoder = SseDecoder::default();
        let mut full_text = String::new();
        let mut failed = false;

        yield UiEvent::StartStep.payload();
        yield UiEvent::TextStart { id: id.clone() }.payload();

        futures::pin_mut!(upstream);
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    for delta in decoder.push(&bytes) {
                        full_text.push_str(&delta);
                        yield UiEvent::TextDelta { id: id.clone(), delta }.payload();
                    }
                }
                Err(e) => {
                    warn!("Upstream stream failed: {e}");
                    failed = true;
                    yield UiEvent::Error { error_text: "The response was interrupted.".to_string() }.payload();
                    break;
                }
            }
            if decoder.is_done() {
                break;
            }
        }

        if !failed {
            for delta in decoder.finish() {
                full_text.push_str(&delta);
                yield UiEvent::TextDelta { id: id.clone(), delta }.payload();
            }
        }

        yield UiEvent::TextEnd { id }.payload();

        if !failed {
            debug!("Stream complete ({} characters)", full_text.len());
            on_complete(full_text).await;
        }

        yield UiEvent::FinishStep.payload();
        yield UiEvent::Finish.payload();
        yield DONE.to_string();
    }
}

/// Wraps [`ui_payloads`] into an SSE response.
pub fn relay<S, E, F, Fut>(upstream: S, on_complete: F) -> Response
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
    F: FnOnce(String) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let events = ui_payloads(upstream, on_complete)
        .map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));

    (
        [(UI_STREAM_HEADER, "v1")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures::stream;
    use http_body_util::BodyExt;

    use super::*;

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "delta": { "content": content } }] })
        )
    }

    #[test]
    fn test_decoder_yields_deltas_and_stops_at_done() {
        let mut decoder = SseDecoder::default();
        let input = format!("{}{}: keep-alive\n\ndata: [DONE]\n\n{}", frame("Cap "), frame("rate"), frame("late"));
        let deltas = decoder.push(input.as_bytes());
        assert_eq!(deltas, vec!["Cap ", "rate"]);
        assert!(decoder.is_done());
    }

    #[test]
    fn test_decoder_handles_split_frames() {
        let mut decoder = SseDecoder::default();
        let input = frame("Harbor Plaza");
        let (a, b) = input.as_bytes().split_at(17);
        assert!(decoder.push(a).is_empty());
        assert_eq!(decoder.push(b), vec!["Harbor Plaza"]);
    }

    #[test]
    fn test_decoder_ignores_role_only_and_malformed_frames() {
        let mut decoder = SseDecoder::default();
        let input = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\ndata: {not json\n\n";
        assert!(decoder.push(input.as_bytes()).is_empty());
        assert!(!decoder.is_done());
    }

    #[test]
    fn test_decoder_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::default();
        let input = format!("{}{}", frame("NOI is "), frame("$1.2M").trim_end());
        assert_eq!(decoder.push(input.as_bytes()), vec!["NOI is "]);
        assert_eq!(decoder.finish(), vec!["$1.2M"]);
        assert!(decoder.finish().is_empty());

        let mut done = SseDecoder::default();
        done.push(b"data: [DONE]\n");
        done.push(frame("late").trim_end().as_bytes());
        assert!(done.finish().is_empty());
    }

    #[tokio::test]
    async fn test_unterminated_final_frame_reaches_client_and_history() {
        let upstream = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from(frame("Occupancy "))),
            Ok(Bytes::from(frame("is 96%").trim_end().to_string())),
        ]);
        let saved = Arc::new(Mutex::new(None));
        let sink = saved.clone();

        let payloads: Vec<String> = ui_payloads(upstream, move |text| async move {
            *sink.lock().unwrap() = Some(text);
        })
        .collect()
        .await;

        let deltas = event_types(&payloads)
            .iter()
            .filter(|t| *t == "text-delta")
            .count();
        assert_eq!(deltas, 2);
        assert_eq!(saved.lock().unwrap().as_deref(), Some("Occupancy is 96%"));
    }

    #[test]
    fn test_ui_event_wire_format() {
        let event = UiEvent::TextDelta {
            id: "t1".to_string(),
            delta: "Hi".to_string(),
        };
        assert_eq!(event.payload(), r#"{"type":"text-delta","id":"t1","delta":"Hi"}"#);
        assert_eq!(UiEvent::StartStep.payload(), r#"{"type":"start-step"}"#);
        assert_eq!(UiEvent::FinishStep.payload(), r#"{"type":"finish-step"}"#);
    }

    fn event_types(payloads: &[String]) -> Vec<String> {
        payloads
            .iter()
            .map(|p| match serde_json::from_str::<serde_json::Value>(p) {
                Ok(v) => v["type"].as_str().unwrap_or_default().to_string(),
                Err(_) => p.clone(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_payload_sequence_and_completion_callback() {
        let upstream = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from(frame("6.5% "))),
            Ok(Bytes::from(frame("cap rate"))),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ]);
        let saved = Arc::new(Mutex::new(None));
        let sink = saved.clone();

        let payloads: Vec<String> = ui_payloads(upstream, move |text| async move {
            *sink.lock().unwrap() = Some(text);
        })
        .collect()
        .await;

        assert_eq!(
            event_types(&payloads),
            vec![
                "start-step",
                "text-start",
                "text-delta",
                "text-delta",
                "text-end",
                "finish-step",
                "finish",
                "[DONE]"
            ]
        );
        assert_eq!(saved.lock().unwrap().as_deref(), Some("6.5% cap rate"));
    }

    #[tokio::test]
    async fn test_upstream_error_skips_completion() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from(frame("partial"))),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "reset")),
        ]);
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();

        let payloads: Vec<String> = ui_payloads(upstream, move |_| async move {
            *flag.lock().unwrap() = true;
        })
        .collect()
        .await;

        let types = event_types(&payloads);
        assert!(types.contains(&"error".to_string()));
        assert_eq!(types.last().map(String::as_str), Some("[DONE]"));
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_relay_response_headers_and_body() {
        let upstream = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from(frame("Hello"))),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ]);
        let response = relay(upstream, |_| async {});

        assert_eq!(response.headers()["x-vercel-ai-ui-message-stream"], "v1");
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains(r#"data: {"type":"text-delta","#));
        assert!(body.trim_end().ends_with("data: [DONE]"));
    }
}
