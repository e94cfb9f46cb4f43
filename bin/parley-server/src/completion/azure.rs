//! Azure OpenAI chat-completions adapter.
//!
//! Talks to `{endpoint}/openai/deployments/{deployment}/chat/completions`
//! with an `api-key` header. Streaming responses are parsed as Server-Sent
//! Events with `eventsource-stream`; the stream ends at `data: [DONE]`.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatTurn, ChunkStream, CompletionClient, CompletionError};
use crate::config::CompletionConfig;
use crate::entities::Role;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const DONE_SENTINEL: &str = "[DONE]";

/// Azure OpenAI client with sampling parameters fixed at construction.
///
/// Does not derive `Debug` so the API key held in the default headers never
/// ends up in logs.
pub struct AzureOpenAiClient {
    http: reqwest::Client,
    url: String,
    settings: CompletionConfig,
}

impl AzureOpenAiClient {
    /// Build a client, failing when endpoint, key or deployment are missing.
    pub fn new(settings: CompletionConfig) -> Result<Self, CompletionError> {
        let missing: Vec<&str> = [
            ("AZURE_OPENAI_ENDPOINT", &settings.endpoint),
            ("AZURE_OPENAI_API_KEY", &settings.api_key),
            ("AZURE_OPENAI_DEPLOYMENT_NAME", &settings.deployment),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();
        if !missing.is_empty() {
            return Err(CompletionError::Config(format!(
                "{} must be set",
                missing.join(", ")
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut key = HeaderValue::from_str(&settings.api_key)
            .map_err(|_| CompletionError::Config("API key is not a valid header value".into()))?;
        key.set_sensitive(true);
        headers.insert("api-key", key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            settings.endpoint.trim_end_matches('/'),
            settings.deployment,
            settings.api_version,
        );

        Ok(Self { http, url, settings })
    }

    fn request_body<'a>(&'a self, turns: &'a [ChatTurn], stream: bool) -> CompletionRequest<'a> {
        CompletionRequest {
            messages: turns
                .iter()
                .map(|t| WireMessage { role: t.role, content: &t.content })
                .collect(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            top_p: self.settings.top_p,
            frequency_penalty: self.settings.frequency_penalty,
            presence_penalty: self.settings.presence_penalty,
            stop: &self.settings.stop,
            stream,
        }
    }

    async fn send(&self, body: &CompletionRequest<'_>) -> Result<reqwest::Response, CompletionError> {
        debug!(messages = body.messages.len(), stream = body.stream, "sending completion request");
        let response = self.http.post(&self.url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Service { status: status.as_u16(), body });
        }
        Ok(response)
    }
}

#[async_trait]
impl CompletionClient for AzureOpenAiClient {
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, CompletionError> {
        let body = self.request_body(turns, false);
        let response = self.send(&body).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Decode(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }

    async fn complete_streaming(&self, turns: &[ChatTurn]) -> Result<ChunkStream, CompletionError> {
        let body = self.request_body(turns, true);
        let response = self.send(&body).await?;
        let mut events = Box::pin(response.bytes_stream().eventsource());

        let chunks = async_stream::stream! {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(CompletionError::Stream(e.to_string()));
                        break;
                    }
                };
                if event.data.trim() == DONE_SENTINEL {
                    break;
                }
                match serde_json::from_str::<StreamChunk>(&event.data) {
                    Ok(chunk) => {
                        if let Some(error) = chunk.error {
                            yield Err(CompletionError::Service { status: 200, body: error.to_string() });
                            break;
                        }
                        // Azure sends content-filter frames with no choices; skip them.
                        let text = chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta)
                            .and_then(|d| d.content);
                        if let Some(text) = text.filter(|t| !t.is_empty()) {
                            yield Ok(text);
                        }
                    }
                    Err(e) => {
                        yield Err(CompletionError::Decode(e.to_string()));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(chunks))
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "no_stop_sequences")]
    stop: &'a [String],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

fn no_stop_sequences(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(endpoint: &str) -> CompletionConfig {
        CompletionConfig {
            endpoint: endpoint.to_owned(),
            api_key: "test-key".into(),
            deployment: "gpt-test".into(),
            ..CompletionConfig::default()
        }
    }

    async fn mount(server: &MockServer, template: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-test/chat/completions"))
            .and(query_param("api-version", "2024-06-01"))
            .and(header("api-key", "test-key"))
            .respond_with(template)
            .mount(server)
            .await;
    }

    fn sse(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body.to_owned())
    }

    #[test]
    fn missing_settings_are_reported_together() {
        let err = AzureOpenAiClient::new(CompletionConfig::default()).err().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("AZURE_OPENAI_ENDPOINT"));
        assert!(msg.contains("AZURE_OPENAI_API_KEY"));
        assert!(msg.contains("AZURE_OPENAI_DEPLOYMENT_NAME"));
    }

    #[test]
    fn request_body_carries_fixed_sampling_settings() {
        let client = AzureOpenAiClient::new(settings("https://example.invalid/")).unwrap();
        let turns = [ChatTurn::user("hi")];
        let json = serde_json::to_value(client.request_body(&turns, false)).unwrap();
        assert_eq!(json["max_tokens"], 800);
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("stop").is_none());
        assert!(json.get("stream").is_none());
        assert!(client.url.starts_with("https://example.invalid/openai/deployments/"));
    }

    #[tokio::test]
    async fn complete_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "messages": [{ "role": "system", "content": "be brief" }, { "role": "user", "content": "hello" }],
                "max_tokens": 800,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "index": 0, "message": { "role": "assistant", "content": "hi!" } }]
            })))
            .mount(&server)
            .await;

        let client = AzureOpenAiClient::new(settings(&server.uri())).unwrap();
        let turns = [
            ChatTurn { role: Role::System, content: "be brief".into() },
            ChatTurn::user("hello"),
        ];
        assert_eq!(client.complete(&turns).await.unwrap(), "hi!");
    }

    #[tokio::test]
    async fn empty_choice_list_is_a_failure() {
        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] }))).await;

        let client = AzureOpenAiClient::new(settings(&server.uri())).unwrap();
        let err = client.complete(&[ChatTurn::user("hello")]).await.unwrap_err();
        assert!(matches!(err, CompletionError::EmptyResponse));
    }

    #[tokio::test]
    async fn service_error_status_is_propagated() {
        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(429).set_body_string("slow down")).await;

        let client = AzureOpenAiClient::new(settings(&server.uri())).unwrap();
        let err = client.complete(&[ChatTurn::user("hello")]).await.unwrap_err();
        assert!(matches!(err, CompletionError::Service { status: 429, ref body } if body == "slow down"));
    }

    #[tokio::test]
    async fn streaming_yields_deltas_until_done() {
        let server = MockServer::start().await;
        mount(
            &server,
            sse(concat!(
                "data: {\"choices\":[]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
                "data: [DONE]\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
            )),
        )
        .await;

        let client = AzureOpenAiClient::new(settings(&server.uri())).unwrap();
        let chunks: Vec<_> = client
            .complete_streaming(&[ChatTurn::user("hello")])
            .await
            .unwrap()
            .collect()
            .await;
        let chunks: Vec<String> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks, ["Hel", "lo"]);
    }

    #[tokio::test]
    async fn streaming_failure_follows_delivered_chunks() {
        let server = MockServer::start().await;
        mount(
            &server,
            sse(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"ab\"}}]}\n\n",
                "data: not-json\n\n",
            )),
        )
        .await;

        let client = AzureOpenAiClient::new(settings(&server.uri())).unwrap();
        let items: Vec<_> = client
            .complete_streaming(&[ChatTurn::user("hello")])
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().ok(), Some("ab"));
        assert!(matches!(items[1], Err(CompletionError::Decode(_))));
    }
}
