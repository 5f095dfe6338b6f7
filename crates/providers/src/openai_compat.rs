//! Chat-completions client for OpenAI-compatible endpoints.
//!
//! Covers OpenRouter, OpenAI, Ollama, vLLM and anything else serving
//! `/chat/completions`. A message with screenshots attached goes out as
//! multi-part content, one `image_url` data URL per image.

use async_trait::async_trait;
use focuslens_core::error::ProviderError;
use focuslens_core::message::{Message, Role};
use focuslens_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub(crate) const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_URL: &str = "http://localhost:11434/v1";

/// A generative provider speaking the chat-completions protocol.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        // Generous ceiling; enrichment wraps every call in its own timeout.
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        }
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new("openrouter", OPENROUTER_URL, api_key)
    }

    /// Local Ollama. It ignores the bearer token, so any non-empty value works.
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new("ollama", base_url.unwrap_or(OLLAMA_URL), "ollama")
    }

    pub(crate) fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn wire_messages(messages: &[Message]) -> Vec<WireMessage> {
        messages.iter().map(WireMessage::from).collect()
    }
}

/// Map a non-success status to the matching provider error.
fn status_error(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(5),
        },
        401 | 403 => ProviderError::AuthenticationFailed(format!(
            "credentials rejected (status {status})"
        )),
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

#[async_trait]
impl focuslens_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{}'",
                self.name
            )));
        }

        let body = ChatRequest {
            model: &request.model,
            messages: Self::wire_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };
        let images: usize = request.messages.iter().map(|m| m.images.len()).sum();
        debug!(provider = %self.name, model = %request.model, images, "Chat completion request");

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let text = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status = status.as_u16(), "Chat completion rejected");
            return Err(status_error(status.as_u16(), retry_after, text));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("unreadable completion: {e}")))?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("completion had no content".into()))?;

        Ok(ProviderResponse {
            message: Message::assistant(text),
            model: completion.model.unwrap_or(request.model),
        })
    }
}

// Wire format

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: WireContent,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content = if message.images.is_empty() {
            WireContent::Text(message.content.clone())
        } else {
            let text = std::iter::once(WirePart::Text {
                text: message.content.clone(),
            });
            let images = message.images.iter().map(|image| WirePart::ImageUrl {
                image_url: WireImage {
                    url: image.to_data_url(),
                },
            });
            WireContent::Parts(text.chain(images).collect())
        };
        Self { role, content }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImage },
}

#[derive(Debug, Serialize)]
struct WireImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
