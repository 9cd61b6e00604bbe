//! Gemini API client for multi-turn chat.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Finish/block reasons that mean the content filter refused to answer.
const SAFETY_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "IMAGE_SAFETY",
];

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("blocked by content filter: {reason}")]
    Blocked { reason: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("empty response")]
    Empty,
    #[error("no response after {0:?}")]
    Timeout(Duration),
}

impl GeminiError {
    /// Whether the failure is a safety/content-filter rejection.
    ///
    /// Structured block reasons win; API error text is only searched when the
    /// service gave nothing better.
    pub fn is_safety(&self) -> bool {
        match self {
            GeminiError::Blocked { .. } => true,
            GeminiError::Api { message, .. } => {
                message.contains("SAFETY") || message.contains("content_filter")
            }
            _ => false,
        }
    }
}

/// One turn of a conversation as the API sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    fn user(text: &str) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::text(text)],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

/// Base64 blob as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// Accumulated context of one conversation.
///
/// The API is stateless, so the dialogue is the history that gets replayed
/// with every request.
#[derive(Debug, Clone, Default)]
pub struct Dialogue {
    turns: Vec<Content>,
}

impl Dialogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Content] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a completed exchange.
    pub fn record(&mut self, question: &str, answer: Content) {
        self.turns.push(Content::user(question));
        self.turns.push(Content {
            role: "model".to_string(),
            ..answer
        });
    }
}

/// Decoded image returned by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPart {
    Text(String),
    Blob(InlineImage),
}

/// A model answer: text and blobs in the order the model produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    pub parts: Vec<ReplyPart>,
}

impl Reply {
    /// All text parts joined together.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ReplyPart::Text(t) => Some(t.as_str()),
                ReplyPart::Blob(_) => None,
            })
            .collect()
    }

    /// Blobs whose mime type is an image.
    pub fn images(&self) -> Vec<InlineImage> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ReplyPart::Blob(b) if b.mime_type.starts_with("image/") => Some(b.clone()),
                _ => None,
            })
            .collect()
    }
}

/// A conversational model.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Open a fresh dialogue with no prior context.
    fn start_dialogue(&self) -> Dialogue;

    /// Send `question` on `dialogue`. The dialogue only grows on success.
    async fn send(&self, dialogue: &mut Dialogue, question: &str) -> Result<Reply, GeminiError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: &'a [Content],
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}

#[derive(Deserialize, Debug)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self, GeminiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeminiError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    async fn generate(&self, contents: &[Content]) -> Result<Content, GeminiError> {
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", &self.api_key)])
            .json(&GenerateRequest { contents })
            .send()
            .await
            .map_err(|e| GeminiError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GeminiError::Http(format!("failed to read response: {e}")))?;

        debug!("Gemini response status: {status}");

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|env| env.error.message)
                .unwrap_or(body);
            return Err(GeminiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).map_err(|e| GeminiError::Parse(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(GeminiError::Api {
                status: status.as_u16(),
                message: error.message,
            });
        }

        if let Some(reason) = parsed.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(GeminiError::Blocked { reason });
        }

        let candidate = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or(GeminiError::Empty)?;

        if let Some(reason) = candidate.finish_reason.as_deref()
            && SAFETY_REASONS.contains(&reason)
        {
            return Err(GeminiError::Blocked {
                reason: reason.to_string(),
            });
        }

        match candidate.content {
            Some(content) if !content.parts.is_empty() => Ok(content),
            _ => Err(GeminiError::Empty),
        }
    }
}

fn decode_parts(content: &Content) -> Result<Reply, GeminiError> {
    let mut parts = Vec::with_capacity(content.parts.len());
    for part in &content.parts {
        if let Some(ref text) = part.text {
            parts.push(ReplyPart::Text(text.clone()));
        }
        if let Some(ref inline) = part.inline_data {
            let data = base64::engine::general_purpose::STANDARD
                .decode(&inline.data)
                .map_err(|e| GeminiError::Parse(format!("failed to decode base64: {e}")))?;
            parts.push(ReplyPart::Blob(InlineImage {
                mime_type: inline.mime_type.clone(),
                data,
            }));
        }
    }
    Ok(Reply { parts })
}

#[async_trait]
impl Assistant for GeminiClient {
    fn start_dialogue(&self) -> Dialogue {
        Dialogue::new()
    }

    async fn send(&self, dialogue: &mut Dialogue, question: &str) -> Result<Reply, GeminiError> {
        let mut contents = dialogue.turns().to_vec();
        contents.push(Content::user(question));

        info!(
            "🤖 Asking {} ({} prior turns): {}",
            self.model,
            dialogue.len(),
            question.chars().take(100).collect::<String>()
        );

        let answer = self.generate(&contents).await?;
        let reply = decode_parts(&answer)?;
        dialogue.record(question, answer);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/v1beta/models/gemini-test:generateContent";

    fn client_for(server: &mockito::ServerGuard) -> GeminiClient {
        GeminiClient::new(
            "test-key".to_string(),
            "gemini-test".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_base_url(server.url())
    }

    #[test]
    fn test_new_applies_default_base_url() {
        let client = GeminiClient::new(
            "test-key".to_string(),
            DEFAULT_MODEL.to_string(),
            Duration::from_secs(1),
        )
        .expect("client should build");
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
        assert_eq!(client.model, DEFAULT_MODEL);
    }

    fn mock_ok(server: &mut mockito::ServerGuard, body: &str) -> mockito::Mock {
        server
            .mock("POST", PATH)
            .match_query(mockito::Matcher::UrlEncoded("key".into(), "test-key".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create()
    }

    #[tokio::test]
    async fn test_text_reply_extends_dialogue() {
        let mut server = mockito::Server::new_async().await;
        let mock = mock_ok(
            &mut server,
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hi "},{"text":"there"}]},"finishReason":"STOP"}]}"#,
        );
        let client = client_for(&server);

        let mut dialogue = client.start_dialogue();
        let reply = client.send(&mut dialogue, "hello").await.unwrap();

        mock.assert();
        assert_eq!(reply.text(), "Hi there");
        assert!(reply.images().is_empty());
        assert_eq!(dialogue.len(), 2);
        assert_eq!(dialogue.turns()[0].role, "user");
        assert_eq!(dialogue.turns()[1].role, "model");
    }

    #[tokio::test]
    async fn test_history_is_replayed() {
        let mut server = mockito::Server::new_async().await;
        let client = client_for(&server);

        let mut dialogue = Dialogue::new();
        dialogue.record(
            "first",
            Content {
                role: "model".into(),
                parts: vec![Part::text("one")],
            },
        );

        let mock = server
            .mock("POST", PATH)
            .match_query(mockito::Matcher::Any)
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "first"}]},
                    {"role": "model", "parts": [{"text": "one"}]},
                    {"role": "user", "parts": [{"text": "second"}]}
                ]
            })))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"two"}]}}]}"#)
            .create();

        let reply = client.send(&mut dialogue, "second").await.unwrap();
        mock.assert();
        assert_eq!(reply.text(), "two");
        assert_eq!(dialogue.len(), 4);
    }

    #[tokio::test]
    async fn test_inline_images_are_decoded() {
        let mut server = mockito::Server::new_async().await;
        let png = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        let body = format!(
            r#"{{"candidates":[{{"content":{{"parts":[
                {{"inlineData":{{"mimeType":"image/png","data":"{png}"}}}},
                {{"inlineData":{{"mimeType":"audio/wav","data":"{png}"}}}}
            ]}}}}]}}"#
        );
        let _mock = mock_ok(&mut server, &body);
        let client = client_for(&server);

        let mut dialogue = Dialogue::new();
        let reply = client.send(&mut dialogue, "draw").await.unwrap();

        assert_eq!(reply.text(), "");
        let images = reply.images();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].mime_type, "image/png");
        assert_eq!(images[0].data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_safety_finish_reason_is_blocked() {
        let mut server = mockito::Server::new_async().await;
        let _mock = mock_ok(&mut server, r#"{"candidates":[{"finishReason":"SAFETY"}]}"#);
        let client = client_for(&server);

        let mut dialogue = Dialogue::new();
        let err = client.send(&mut dialogue, "bad").await.unwrap_err();

        assert!(matches!(err, GeminiError::Blocked { ref reason } if reason == "SAFETY"));
        assert!(err.is_safety());
        assert!(dialogue.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_prompt() {
        let mut server = mockito::Server::new_async().await;
        let _mock = mock_ok(&mut server, r#"{"promptFeedback":{"blockReason":"PROHIBITED_CONTENT"}}"#);
        let client = client_for(&server);

        let err = client.send(&mut Dialogue::new(), "bad").await.unwrap_err();
        assert!(err.is_safety());
    }

    #[tokio::test]
    async fn test_api_error_message_is_extracted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", PATH)
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#)
            .create();
        let client = client_for(&server);

        let err = client.send(&mut Dialogue::new(), "hi").await.unwrap_err();
        match &err {
            GeminiError::Api { status, message } => {
                assert_eq!(*status, 400);
                assert_eq!(message, "API key not valid");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_safety());
    }

    #[tokio::test]
    async fn test_no_candidates_is_empty() {
        let mut server = mockito::Server::new_async().await;
        let _mock = mock_ok(&mut server, r#"{"candidates":[]}"#);
        let client = client_for(&server);

        let err = client.send(&mut Dialogue::new(), "hi").await.unwrap_err();
        assert!(matches!(err, GeminiError::Empty));
    }

    #[test]
    fn test_safety_substring_fallback() {
        let err = GeminiError::Api {
            status: 500,
            message: "finish_reason: SAFETY".into(),
        };
        assert!(err.is_safety());
        let err = GeminiError::Api {
            status: 400,
            message: "content_filter triggered".into(),
        };
        assert!(err.is_safety());
        assert!(!GeminiError::Http("connection reset".into()).is_safety());
        assert!(!GeminiError::Timeout(Duration::from_secs(60)).is_safety());
    }
}
