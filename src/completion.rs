//! Client for the upstream multimodal chat-completion API.
//!
//! One user turn, two content parts (prompt text, then the image as a data URI),
//! one answer string back. Every failure is reported as a [`CompletionError`]
//! whose `Display` is the text callers put in `api_response`.

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;

/// The upload's real media type is not inspected; every image is labelled JPEG.
const IMAGE_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Error getting API key")]
    MissingApiKey,

    #[error("Error preparing request: {0}")]
    Prepare(#[source] serde_json::Error),

    #[error("Error creating request: {0}")]
    Build(#[source] reqwest::Error),

    #[error("Error making request: {0}")]
    Send(#[source] reqwest::Error),

    #[error("Error reading response: {0}")]
    Read(#[source] reqwest::Error),

    #[error("Error reading response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Error processing response")]
    UnexpectedShape,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model:      &'a str,
    messages:   [ChatMessage<'a>; 1],
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role:    &'static str,
    content: [ContentPart<'a>; 2],
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: String,
}

impl ChatResponse {
    fn into_answer(self) -> Option<String> {
        self.choices.into_iter().next().map(|c| c.message.content)
    }
}

#[derive(Debug, Clone)]
pub struct CompletionClient {
    http:       reqwest::Client,
    url:        String,
    model:      String,
    max_tokens: u32,
    api_key:    Option<String>,
}

impl CompletionClient {
    /// Captures the upstream settings and the API key resolved from `config`.
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            url:        config.upstream_url.clone(),
            model:      config.model.clone(),
            max_tokens: config.max_tokens,
            api_key:    config.resolve_api_key(),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Never fails: errors come back rendered as their message.
    pub async fn complete(&self, image_base64: &str, prompt: &str) -> String {
        match self.try_complete(image_base64, prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!(error = %e, "Completion failed");
                e.to_string()
            }
        }
    }

    pub async fn try_complete(
        &self,
        image_base64: &str,
        prompt: &str,
    ) -> Result<String, CompletionError> {
        let api_key = self.api_key.as_deref().ok_or(CompletionError::MissingApiKey)?;

        let payload = ChatRequest {
            model:    &self.model,
            messages: [ChatMessage {
                role:    "user",
                content: [
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("{IMAGE_DATA_URI_PREFIX}{image_base64}"),
                        },
                    },
                ],
            }],
            max_tokens: self.max_tokens,
        };
        let body = serde_json::to_vec(&payload).map_err(CompletionError::Prepare)?;

        let request = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .body(body)
            .build()
            .map_err(CompletionError::Build)?;

        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "Sending completion request");

        let response = self
            .http
            .execute(request)
            .await
            .map_err(CompletionError::Send)?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "Upstream returned a non-success status");
        }

        let raw = response.bytes().await.map_err(CompletionError::Read)?;
        let json: Value = serde_json::from_slice(&raw).map_err(CompletionError::Decode)?;
        tracing::debug!(response = %json, "Upstream response");

        serde_json::from_value::<ChatResponse>(json)
            .ok()
            .and_then(ChatResponse::into_answer)
            .ok_or(CompletionError::UnexpectedShape)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const COMPLETIONS_PATH: &str = "/v1/chat/completions";

    fn client_for(server: &MockServer, api_key: Option<&str>) -> CompletionClient {
        let url = format!("{}{COMPLETIONS_PATH}", server.uri());
        CompletionClient::new(reqwest::Client::new(), &Config::for_tests(&url, api_key))
    }

    async fn mount_json(server: &MockServer, body: Value) {
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .and(header("Authorization", "Bearer test-key"))
            .and(header("Content-Type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": "hello" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("test-key"));
        assert_eq!(client.complete("aGk=", "what is this?").await, "hello");
    }

    #[tokio::test]
    async fn sends_text_then_jpeg_data_uri() {
        let server = MockServer::start().await;
        mount_json(&server, json!({ "choices": [{ "message": { "content": "ok" } }] })).await;

        let client = client_for(&server, Some("test-key"));
        client.complete("aGk=", "describe").await;

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(
            sent,
            json!({
                "model": "gpt-4o",
                "messages": [{
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "describe" },
                        { "type": "image_url", "image_url": { "url": "data:image/jpeg;base64,aGk=" } }
                    ]
                }],
                "max_tokens": 500
            })
        );
    }

    #[tokio::test]
    async fn empty_choices_is_a_shape_error() {
        let server = MockServer::start().await;
        mount_json(&server, json!({ "choices": [] })).await;

        let client = client_for(&server, Some("test-key"));
        assert_eq!(client.complete("", "").await, "Error processing response");
        assert!(matches!(
            client.try_complete("", "").await,
            Err(CompletionError::UnexpectedShape)
        ));
    }

    #[tokio::test]
    async fn upstream_error_body_is_a_shape_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "message": "Incorrect API key provided", "type": "invalid_request_error" }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("bad-key"));
        assert_eq!(client.complete("", "").await, "Error processing response");
    }

    #[tokio::test]
    async fn null_content_is_a_shape_error() {
        let server = MockServer::start().await;
        mount_json(&server, json!({ "choices": [{ "message": { "content": null } }] })).await;

        let client = client_for(&server, Some("test-key"));
        assert!(matches!(
            client.try_complete("", "").await,
            Err(CompletionError::UnexpectedShape)
        ));
    }

    #[tokio::test]
    async fn invalid_json_is_a_read_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("test-key"));
        let err = client.try_complete("", "").await.unwrap_err();
        assert!(matches!(err, CompletionError::Decode(_)));
        assert!(err.to_string().starts_with("Error reading response: "));
    }

    #[tokio::test]
    async fn missing_key_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        assert!(!client.has_api_key());
        assert_eq!(client.complete("aGk=", "hi").await, "Error getting API key");

        server.verify().await;
    }

    #[tokio::test]
    async fn repeated_calls_give_the_same_answer() {
        let server = MockServer::start().await;
        mount_json(&server, json!({ "choices": [{ "message": { "content": "same" } }] })).await;

        let client = client_for(&server, Some("test-key"));
        let first = client.complete("", "").await;
        let second = client.complete("", "").await;
        assert_eq!(first, "same");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unparsable_url_is_a_build_error() {
        let config = Config::for_tests("not a url", Some("test-key"));
        let client = CompletionClient::new(reqwest::Client::new(), &config);

        let err = client.try_complete("", "").await.unwrap_err();
        assert!(matches!(err, CompletionError::Build(_)));
        assert!(err.to_string().starts_with("Error creating request: "));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_send_error() {
        // Bind then drop so the port is known to be closed.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = Config::for_tests(&format!("http://{addr}/v1/chat/completions"), Some("k"));
        let client = CompletionClient::new(reqwest::Client::new(), &config);

        let answer = client.complete("", "").await;
        assert!(answer.starts_with("Error making request: "), "{answer}");
    }
}
