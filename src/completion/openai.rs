//! OpenAI chat-completions client over reqwest.

use std::collections::VecDeque;

use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use super::{CompletionClient, CompletionError, Delta, DeltaStream};
use crate::config::CompletionSection;

/// Sentinel payload that ends a streamed completion.
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Client for `POST {api_base}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(settings: &CompletionSection) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
            endpoint: format!("{}/chat/completions", settings.api_base.trim_end_matches('/')),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        }
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response, CompletionError> {
        let api_key = self.api_key.as_deref().ok_or(CompletionError::MissingApiKey)?;
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
            stream,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(CompletionError::Http)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let resp: ChatResponse = self
            .send(prompt, false)
            .await?
            .json()
            .await
            .map_err(|e| CompletionError::Decode(e.to_string()))?;

        resp.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CompletionError::EmptyResponse)
    }

    async fn stream(&self, prompt: &str) -> Result<DeltaStream, CompletionError> {
        let resp = self.send(prompt, true).await?;
        Ok(delta_stream(resp.bytes_stream().boxed()))
    }
}

/// Splits a provider event stream into `data:` payloads.
#[derive(Debug, Default)]
struct DataLineDecoder {
    buf: Vec<u8>,
}

impl DataLineDecoder {
    /// Feed a chunk; returns the payloads of every completed `data:` line.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            payloads.extend(data_payload(&line));
        }
        payloads
    }

    /// Flush a final line the body ended without terminating.
    fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buf);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(['\n', '\r']);
    line.strip_prefix("data:")
        .map(|payload| payload.trim_start().to_string())
}

enum Payload {
    Delta(Delta),
    Skip,
    Done,
}

fn parse_payload(payload: &str) -> Result<Payload, CompletionError> {
    if payload == DONE_SENTINEL {
        return Ok(Payload::Done);
    }
    let chunk: StreamChunk =
        serde_json::from_str(payload).map_err(|e| CompletionError::Decode(e.to_string()))?;
    match chunk.choices.into_iter().next() {
        Some(choice) => Ok(Payload::Delta(Delta {
            content: choice.delta.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.filter(|r| !r.is_empty()),
        })),
        None => Ok(Payload::Skip),
    }
}

struct DecodeState {
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    decoder: DataLineDecoder,
    pending: VecDeque<Result<Delta, CompletionError>>,
    finished: bool,
}

impl DecodeState {
    /// Queue the deltas in `payloads`, stopping at `[DONE]` or the first
    /// error.
    fn absorb(&mut self, payloads: impl IntoIterator<Item = String>) {
        for payload in payloads {
            if self.finished {
                return;
            }
            match parse_payload(&payload) {
                Ok(Payload::Delta(delta)) => self.pending.push_back(Ok(delta)),
                Ok(Payload::Skip) => {}
                Ok(Payload::Done) => self.finished = true,
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.finished = true;
                }
            }
        }
    }
}

/// Turn a streamed response body into deltas. Ends at `[DONE]`, at the end
/// of the body, or right after the first error.
fn delta_stream(body: BoxStream<'static, reqwest::Result<Bytes>>) -> DeltaStream {
    let state = DecodeState {
        body,
        decoder: DataLineDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let payloads = state.decoder.push(&chunk);
                    state.absorb(payloads);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .pending
                        .push_back(Err(CompletionError::Stream(e.to_string())));
                }
                None => {
                    let tail = state.decoder.finish();
                    state.absorb(tail);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    fn body_of(chunks: &[&'static str]) -> BoxStream<'static, reqwest::Result<Bytes>> {
        let items: Vec<reqwest::Result<Bytes>> = chunks
            .iter()
            .copied()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        futures::stream::iter(items).boxed()
    }

    async fn collect(stream: DeltaStream) -> Vec<Result<Delta, String>> {
        stream
            .map(|item| item.map_err(|e| e.to_string()))
            .collect()
            .await
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = DataLineDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\r\n\r\n"), vec!["{\"a\":1}".to_string()]);
        assert_eq!(decoder.push(b": comment\ndata: [DONE]\n"), vec!["[DONE]".to_string()]);
    }

    #[test]
    fn test_parse_payload_with_finish_reason() {
        let payload = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        match parse_payload(payload).unwrap() {
            Payload::Delta(delta) => assert_eq!(delta, Delta::finished("stop")),
            _ => panic!("Expected Delta"),
        }
    }

    #[test]
    fn test_parse_payload_without_choices_is_skipped() {
        assert!(matches!(parse_payload(r#"{"choices":[]}"#).unwrap(), Payload::Skip));
        assert!(matches!(parse_payload("[DONE]").unwrap(), Payload::Done));
        assert!(parse_payload("not json").is_err());
    }

    #[tokio::test]
    async fn test_delta_stream_stops_at_done() {
        let body = body_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ]);
        let deltas = collect(delta_stream(body)).await;
        assert_eq!(deltas, vec![Ok(Delta::text("Hel")), Ok(Delta::text("lo"))]);
    }

    #[tokio::test]
    async fn test_delta_stream_ends_after_decode_error() {
        let body = body_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
            "data: {broken\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n",
        ]);
        let deltas = collect(delta_stream(body)).await;
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0], Ok(Delta::text("a")));
        assert!(deltas[1].is_err());
    }

    #[tokio::test]
    async fn test_delta_stream_flushes_unterminated_last_line() {
        let body = body_of(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}",
        ]);
        let deltas = collect(delta_stream(body)).await;
        assert_eq!(deltas, vec![Ok(Delta::text("Hel")), Ok(Delta::text("lo"))]);
    }

    #[tokio::test]
    async fn test_delta_stream_ignores_unterminated_noise() {
        let body = body_of(&["data: [DONE]\n\n", "data: {broken"]);
        assert!(collect(delta_stream(body)).await.is_empty());

        let body = body_of(&["data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n: trailing"]);
        assert_eq!(collect(delta_stream(body)).await, vec![Ok(Delta::text("a"))]);
    }

    /// Serve `router` on an ephemeral port and point a keyed client at it.
    async fn client_for(router: Router) -> OpenAiClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        OpenAiClient::new(&CompletionSection {
            api_base: format!("http://{}/v1", addr),
            api_key: Some("sk-test".to_string()),
            ..CompletionSection::default()
        })
    }

    #[tokio::test]
    async fn test_complete_sends_keyed_request() {
        async fn echo(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
            let auth = headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let content = format!(
                "{}|{}|{}|{}",
                auth, body["model"], body["stream"], body["messages"][0]["content"]
            );
            Json(json!({ "choices": [{ "message": { "content": content } }] }))
        }
        let client = client_for(Router::new().route("/v1/chat/completions", post(echo))).await;

        let reply = client.complete("hello").await.unwrap();
        assert_eq!(reply, r#"Bearer sk-test|"gpt-3.5-turbo"|false|"hello""#);
    }

    #[tokio::test]
    async fn test_non_success_status_maps_to_status_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limited") }),
        );
        let client = client_for(router).await;

        match client.complete("hello").await {
            Err(CompletionError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("Expected Status, got {:?}", other),
        }
        assert!(matches!(
            client.stream("hello").await.err(),
            Some(CompletionError::Status { status: 429, .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_over_http_without_done_or_trailing_newline() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
                    "data: {\"choices\":[{\"delta\":{\"content\":\" there\"},\"finish_reason\":\"stop\"}]}"
                )
            }),
        );
        let client = client_for(router).await;

        let deltas = collect(client.stream("hello").await.unwrap()).await;
        assert_eq!(
            deltas,
            vec![
                Ok(Delta::text("Hi")),
                Ok(Delta {
                    content: " there".to_string(),
                    finish_reason: Some("stop".to_string()),
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_without_request() {
        let client = OpenAiClient::new(&CompletionSection::default());
        let err = client.complete("hello").await.unwrap_err();
        assert!(matches!(err, CompletionError::MissingApiKey));
        assert!(matches!(
            client.stream("hello").await.err(),
            Some(CompletionError::MissingApiKey)
        ));
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let settings = CompletionSection {
            api_base: "http://localhost:9999/v1/".to_string(),
            ..CompletionSection::default()
        };
        let client = OpenAiClient::new(&settings);
        assert_eq!(client.endpoint, "http://localhost:9999/v1/chat/completions");
    }
}
