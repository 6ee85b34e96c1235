//! Reply generation through an OpenAI-compatible chat completions API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::CompanionConfig;
use crate::memory::MemoryDocument;

/// Returned in place of a reply whenever the completion call fails.
pub const FALLBACK_REPLY: &str = "I apologize, but I'm experiencing technical difficulties.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("no API key configured (set GROQ_API_KEY)")]
    MissingApiKey,
    #[error("HTTP client could not be built: {0}")]
    Client(String),
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion API returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("malformed completion response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("completion response contained no choices")]
    NoChoices,
}

/// Sends a chat request and yields the first choice's text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, CompletionError>;
}

/// Bearer-authenticated client for `POST {api_base}/chat/completions`.
pub struct OpenAiCompatClient {
    /// Holds the builder error so every request reports it.
    client: Result<reqwest::Client, String>,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(api_base: &str, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| {
                warn!("error building completion client: {e}");
                e.to_string()
            });
        Self::with_client(client, api_base, api_key)
    }

    fn with_client(
        client: Result<reqwest::Client, String>,
        api_base: &str,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, CompletionError> {
        let client = self
            .client
            .as_ref()
            .map_err(|e| CompletionError::Client(e.clone()))?;
        let api_key = self.api_key.as_deref().ok_or(CompletionError::MissingApiKey)?;
        debug!(
            endpoint = %self.endpoint,
            model = %request.model,
            messages = request.messages.len(),
            "requesting completion"
        );

        let resp = client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(CompletionError::Status { status, body });
        }
        first_choice(&body)
    }
}

/// Extract the first choice's content from a raw response body.
pub fn first_choice(body: &str) -> Result<String, CompletionError> {
    let parsed: ChatCompletionResponse = serde_json::from_str(body)?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or(CompletionError::NoChoices)
}

/// Build the message list: persona, the remembered exchange (if any), then
/// the new message.
pub fn build_messages(persona: &str, user_message: &str, memory: &MemoryDocument) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::new("system", persona)];
    if let Some(turn) = memory.turn() {
        messages.push(ChatMessage::new("user", &turn.user));
        messages.push(ChatMessage::new("assistant", &turn.assistant));
    }
    messages.push(ChatMessage::new("user", user_message));
    messages
}

/// Generates assistant replies with fixed generation parameters.
pub struct Responder {
    backend: Box<dyn CompletionBackend>,
    persona: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl Responder {
    pub fn new(backend: Box<dyn CompletionBackend>, config: &CompanionConfig) -> Self {
        Self {
            backend,
            persona: config.persona.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Responder backed by the configured HTTP API.
    pub fn from_config(config: &CompanionConfig) -> Self {
        let backend = OpenAiCompatClient::new(&config.api_base, config.resolved_api_key());
        Self::new(Box::new(backend), config)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Produce a reply, or [`FALLBACK_REPLY`] if anything goes wrong.
    pub async fn respond(&self, user_message: &str, memory: &MemoryDocument) -> String {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: build_messages(&self.persona, user_message, memory),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        match self.backend.complete(&request).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                error!("{e}");
                FALLBACK_REPLY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory;
    use std::sync::{Arc, Mutex};

    /// Records each request and answers with a canned reply.
    struct Recording {
        reply: String,
        seen: Arc<Mutex<Vec<ChatRequest>>>,
    }

    #[async_trait]
    impl CompletionBackend for Recording {
        async fn complete(&self, request: &ChatRequest) -> Result<String, CompletionError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl CompletionBackend for Failing {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, CompletionError> {
            Err(CompletionError::NoChoices)
        }
    }

    #[test]
    fn messages_without_memory() {
        let msgs = build_messages("be nice", "hi", &MemoryDocument::default());
        assert_eq!(
            msgs,
            vec![ChatMessage::new("system", "be nice"), ChatMessage::new("user", "hi")]
        );
    }

    #[test]
    fn messages_include_remembered_exchange() {
        let doc = memory::consolidate(MemoryDocument::default(), "earlier", "reply", "P ");
        let msgs = build_messages("be nice", "now", &doc);
        let roles: Vec<_> = msgs.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(msgs[1].content, "earlier");
        assert_eq!(msgs[2].content, "reply");
        assert_eq!(msgs[3].content, "now");
    }

    #[tokio::test]
    async fn respond_trims_and_sends_parameters() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let config = CompanionConfig {
            model: "test-model".into(),
            temperature: 0.3,
            max_tokens: 42,
            ..CompanionConfig::default()
        };
        let responder = Responder::new(
            Box::new(Recording {
                reply: "  hey there \n".into(),
                seen: seen.clone(),
            }),
            &config,
        );

        let reply = responder.respond("hello", &MemoryDocument::default()).await;
        assert_eq!(reply, "hey there");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model, "test-model");
        assert_eq!(seen[0].max_tokens, 42);
        assert!((seen[0].temperature - 0.3).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn respond_falls_back_on_error() {
        let responder = Responder::new(Box::new(Failing), &CompanionConfig::default());
        let reply = responder.respond("hello", &MemoryDocument::default()).await;
        assert_eq!(reply, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn missing_api_key_falls_back() {
        let responder = Responder::new(
            Box::new(OpenAiCompatClient::new("http://127.0.0.1:9", None)),
            &CompanionConfig::default(),
        );
        let reply = responder.respond("hello", &MemoryDocument::default()).await;
        assert_eq!(reply, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn client_build_failure_is_reported_per_request() {
        let backend = OpenAiCompatClient::with_client(
            Err("no TLS backend".into()),
            "http://127.0.0.1:9",
            Some("key".into()),
        );
        let request = ChatRequest {
            model: "m".into(),
            messages: Vec::new(),
            temperature: 0.7,
            max_tokens: 8,
        };
        match backend.complete(&request).await {
            Err(CompletionError::Client(msg)) => assert_eq!(msg, "no TLS backend"),
            other => panic!("expected client error, got {other:?}"),
        }

        let responder = Responder::new(Box::new(backend), &CompanionConfig::default());
        let reply = responder.respond("hello", &MemoryDocument::default()).await;
        assert_eq!(reply, FALLBACK_REPLY);
    }

    #[test]
    fn parses_first_choice() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"one"}},{"index":1,"message":{"role":"assistant","content":"two"}}]}"#;
        assert_eq!(first_choice(body).unwrap(), "one");
    }

    #[test]
    fn empty_choices_is_an_error() {
        assert!(matches!(
            first_choice(r#"{"choices":[]}"#),
            Err(CompletionError::NoChoices)
        ));
        assert!(matches!(first_choice("oops"), Err(CompletionError::Decode(_))));
    }
}
