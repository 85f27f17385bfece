//! HTTP client for OpenAI-compatible `/chat/completions` endpoints.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response};
use serde_json::Value;
use specter_shared::{GenerationOptions, Result, SpecterError};
use tracing::{debug, info, instrument};

use crate::sse::{SseDecoder, SseEvent, parse_delta};
use crate::{ChatRequest, GenerationClient, TokenStream};

/// User-Agent string for generation requests.
const USER_AGENT: &str = concat!("Specter/", env!("CARGO_PKG_VERSION"));

/// [`GenerationClient`] for any server speaking the OpenAI chat API.
pub struct OpenAiCompatClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(opts: &GenerationOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(opts.timeout)
            .build()
            .map_err(|e| SpecterError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", opts.base_url.trim_end_matches('/')),
            api_key: opts.api_key.clone(),
        })
    }

    async fn send(&self, request: &ChatRequest) -> Result<Response> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| SpecterError::generation(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.pointer("/error/message")
                    .or_else(|| v.get("error"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or(body);
        Err(SpecterError::generation(format!(
            "HTTP {}: {detail}",
            status.as_u16()
        )))
    }
}

#[async_trait]
impl GenerationClient for OpenAiCompatClient {
    #[instrument(skip_all, fields(model = %request.model, messages = request.messages.len()))]
    async fn stream(&self, mut request: ChatRequest) -> Result<TokenStream> {
        request.stream = true;
        let response = self.send(&request).await?;
        info!("generation stream opened");

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(|e| e.to_string()))
            .boxed();

        Ok(delta_stream(bytes))
    }

    #[instrument(skip_all, fields(model = %request.model, messages = request.messages.len()))]
    async fn complete(&self, mut request: ChatRequest) -> Result<String> {
        request.stream = false;
        let response = self.send(&request).await?;

        let value: Value = response
            .json()
            .await
            .map_err(|e| SpecterError::generation(format!("invalid completion response: {e}")))?;

        let text = value
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Byte stream -> delta stream
// ---------------------------------------------------------------------------

struct DeltaState {
    bytes: BoxStream<'static, std::result::Result<Vec<u8>, String>>,
    decoder: SseDecoder,
    ready: VecDeque<Result<String>>,
    finished: bool,
}

impl DeltaState {
    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            if self.finished {
                return;
            }
            match event {
                SseEvent::Done => self.finished = true,
                SseEvent::Data(data) => match parse_delta(&data) {
                    Ok(Some(delta)) if !delta.is_empty() => self.ready.push_back(Ok(delta)),
                    Ok(_) => {}
                    Err(e) => {
                        self.ready.push_back(Err(e));
                        self.finished = true;
                    }
                },
            }
        }
    }
}

/// Turn an SSE byte stream into text deltas, in arrival order.
fn delta_stream(
    bytes: BoxStream<'static, std::result::Result<Vec<u8>, String>>,
) -> TokenStream {
    let state = DeltaState {
        bytes,
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.absorb(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .ready
                        .push_back(Err(SpecterError::generation(format!("stream interrupted: {e}"))));
                }
                None => {
                    let events = state.decoder.finish();
                    state.absorb(events);
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
    use std::time::Duration;

    fn opts(base_url: String) -> GenerationOptions {
        GenerationOptions {
            base_url,
            model: "webai-llm".into(),
            api_key: None,
            temperature: None,
            timeout: Duration::from_secs(5),
        }
    }

    fn sse_chunk(content: &str) -> String {
        let chunk = serde_json::json!({"choices": [{"delta": {"content": content}}]});
        format!("data: {chunk}\n\n")
    }

    #[tokio::test]
    async fn stream_yields_deltas_in_order() {
        let server = wiremock::MockServer::start().await;

        let body = format!(
            "data: {{\"choices\":[{{\"delta\":{{\"role\":\"assistant\"}}}}]}}\n\n{}{}{}data: [DONE]\n\n",
            sse_chunk("INTRODUCTION\n"),
            sse_chunk("Hello"),
            sse_chunk(" world"),
        );

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/v1/chat/completions"))
            .and(wiremock::matchers::body_partial_json(
                serde_json::json!({"stream": true, "model": "webai-llm"}),
            ))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_raw(body, "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(&opts(format!("{}/v1", server.uri()))).unwrap();
        let request = ChatRequest::new("webai-llm", vec![crate::ChatMessage::user("draft")]);
        let fragments: Vec<String> = client
            .stream(request)
            .await
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(fragments, vec!["INTRODUCTION\n", "Hello", " world"]);
    }

    #[tokio::test]
    async fn error_chunk_ends_stream_with_err() {
        let server = wiremock::MockServer::start().await;

        let body = format!(
            "{}data: {{\"error\":{{\"message\":\"context length exceeded\"}}}}\n\n{}",
            sse_chunk("partial"),
            sse_chunk("never seen"),
        );

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(&opts(format!("{}/v1", server.uri()))).unwrap();
        let request = ChatRequest::new("webai-llm", vec![crate::ChatMessage::user("draft")]);
        let items: Vec<Result<String>> = client.stream(request).await.unwrap().collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().ok(), Some("partial"));
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn non_success_status_is_generation_error() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(503).set_body_json(
                serde_json::json!({"error": {"message": "model loading"}}),
            ))
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(&opts(format!("{}/v1", server.uri()))).unwrap();
        let request = ChatRequest::new("webai-llm", vec![crate::ChatMessage::user("draft")]);
        let err = match client.stream(request).await {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(matches!(err, SpecterError::Generation { .. }));
        assert!(err.to_string().contains("model loading"));
    }

    #[tokio::test]
    async fn complete_returns_message_content() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::body_partial_json(serde_json::json!({"stream": false})))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Full text"}}]
            })))
            .mount(&server)
            .await;

        let client = OpenAiCompatClient::new(&opts(format!("{}/v1", server.uri()))).unwrap();
        let mut request = ChatRequest::new("webai-llm", vec![crate::ChatMessage::user("x")]);
        request.stream = true;
        assert_eq!(client.complete(request).await.unwrap(), "Full text");
    }
}
