//! Item transformation through an OpenAI-compatible chat completions API.
//!
//! The group instruction becomes the system message and the item text the
//! user message; the assistant reply is the processed content.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use sundew_shared::{Item, ProcessedItem, Result, SundewError, TransformerConfig};

/// Turns one item into its processed form under an instruction.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, item: &Item, instruction: &str) -> Result<ProcessedItem>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, serde::Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// ChatTransformer
// ---------------------------------------------------------------------------

/// [`Transformer`] backed by `POST {base_url}/v1/chat/completions`.
pub struct ChatTransformer {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl ChatTransformer {
    pub fn new(config: &TransformerConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("Sundew/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SundewError::Network(format!("failed to build HTTP client: {e}")))?;

        info!(model = %config.model, "transformer initialized");

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a transformer reading the API key from the configured env var.
    pub fn from_env(config: &TransformerConfig) -> Result<Self> {
        let key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                SundewError::Authentication(format!(
                    "transformer API key not found in {}",
                    config.api_key_env
                ))
            })?;
        Self::new(config, key)
    }
}

#[async_trait]
impl Transformer for ChatTransformer {
    async fn transform(&self, item: &Item, instruction: &str) -> Result<ProcessedItem> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &item.text,
                },
            ],
        };

        debug!(item_id = %item.id, %url, "transform request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SundewError::transform(&item.id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            return Err(SundewError::transform(
                &item.id,
                format!("HTTP {status}: {excerpt}"),
            ));
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| SundewError::transform(&item.id, format!("invalid response: {e}")))?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SundewError::transform(&item.id, "response contained no choices"))?
            .message
            .content;

        Ok(ProcessedItem::from_item(item, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sundew_shared::ItemId;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transformer(server: &MockServer) -> ChatTransformer {
        let config = TransformerConfig {
            base_url: server.uri(),
            model: "gpt-test".into(),
            ..TransformerConfig::default()
        };
        ChatTransformer::new(&config, "sk-test").unwrap()
    }

    fn item() -> Item {
        Item {
            id: ItemId::from(1801u64),
            created_at: Utc::now(),
            text: "Rust 1.85 is out".into(),
        }
    }

    #[tokio::test]
    async fn sends_instruction_as_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-test",
                "messages": [
                    {"role": "system", "content": "Summarize."},
                    {"role": "user", "content": "Rust 1.85 is out"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "New Rust release."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let processed = transformer(&server)
            .transform(&item(), "Summarize.")
            .await
            .expect("transform");
        assert_eq!(processed.id, ItemId::from(1801u64));
        assert_eq!(processed.original_text, "Rust 1.85 is out");
        assert_eq!(processed.processed_content.as_deref(), Some("New Rust release."));
    }

    #[tokio::test]
    async fn null_content_is_kept_as_none() {
        let server = MockServer::start().await;
        Mock::given(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": null}}]
            })))
            .mount(&server)
            .await;

        let processed = transformer(&server).transform(&item(), "x").await.unwrap();
        assert_eq!(processed.processed_content, None);
    }

    #[tokio::test]
    async fn api_error_is_a_transform_error() {
        let server = MockServer::start().await;
        Mock::given(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let err = transformer(&server).transform(&item(), "x").await.unwrap_err();
        assert!(matches!(err, SundewError::Transform { .. }));
        assert!(err.to_string().contains("1801"));
        assert!(err.to_string().contains("upstream exploded"));
    }

    #[tokio::test]
    async fn empty_choices_is_a_transform_error() {
        let server = MockServer::start().await;
        Mock::given(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = transformer(&server).transform(&item(), "x").await.unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }
}
