//! Bounded calls into the generative capability.
//!
//! Every call is wrapped in `tokio::time::timeout`; an elapsed deadline is a
//! `ProviderError::Timeout` and an empty completion is a `Parse` error, so
//! callers only ever see typed failures.

use focuslens_config::ProviderConfig;
use focuslens_core::error::ProviderError;
use focuslens_core::message::Message;
use focuslens_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A provider plus the model and deadline to use with it.
#[derive(Clone)]
pub struct Generator {
    provider: Option<Arc<dyn Provider>>,
    model: String,
    timeout: Duration,
}

impl Generator {
    pub fn new(provider: Option<Arc<dyn Provider>>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout,
        }
    }

    /// Text generator from provider settings.
    pub fn text(provider: Option<Arc<dyn Provider>>, config: &ProviderConfig) -> Self {
        Self::new(provider, config.model.clone(), Duration::from_secs(config.timeout_secs))
    }

    /// Vision generator from provider settings.
    pub fn vision(provider: Option<Arc<dyn Provider>>, config: &ProviderConfig) -> Self {
        Self::new(
            provider,
            config.vision_model().to_string(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    /// Run one completion and return its trimmed text.
    pub async fn complete(&self, messages: Vec<Message>, max_tokens: u32) -> Result<String, ProviderError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| ProviderError::NotConfigured("no generative provider".into()))?;
        let request = ProviderRequest::new(self.model.clone(), messages).with_max_tokens(max_tokens);

        debug!(provider = provider.name(), model = %self.model, "Generation request");
        let response = tokio::time::timeout(self.timeout, provider.complete(request))
            .await
            .map_err(|_| {
                ProviderError::Timeout(format!(
                    "'{}' gave no response within {}s",
                    provider.name(),
                    self.timeout.as_secs()
                ))
            })??;

        let text = response.message.content.trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::Parse("empty completion".into()));
        }
        Ok(text)
    }
}

/// Parse a one-item-per-line completion.
///
/// Strips list markers (`-`, `*`, `•`, `1.`, `2)`) and surrounding quotes,
/// skips blanks, drops case-insensitive duplicates and keeps at most `max`.
pub fn parse_list(text: &str, max: usize) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for line in text.lines() {
        let mut item = line.trim();
        item = item.trim_start_matches(['-', '*', '•']).trim_start();
        let digits = item.chars().take_while(char::is_ascii_digit).count();
        if digits > 0 {
            let rest = &item[digits..];
            if let Some(stripped) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
                item = stripped.trim_start();
            }
        }
        let item = item.trim_matches(['"', '\'', '`']).trim();
        if item.is_empty() {
            continue;
        }
        if items.iter().any(|seen| seen.eq_ignore_ascii_case(item)) {
            continue;
        }
        items.push(item.to_string());
        if items.len() >= max {
            break;
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use focuslens_core::provider::ProviderResponse;

    struct Fixed(&'static str);

    #[async_trait]
    impl Provider for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(self.0),
                model: request.model,
            })
        }
    }

    struct Hanging;

    #[async_trait]
    impl Provider for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::Network("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn returns_trimmed_text() {
        let g = Generator::new(Some(Arc::new(Fixed("  hello \n"))), "m", Duration::from_secs(5));
        assert_eq!(g.complete(vec![Message::user("hi")], 16).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn empty_completion_is_parse_error() {
        let g = Generator::new(Some(Arc::new(Fixed("   "))), "m", Duration::from_secs(5));
        assert!(matches!(
            g.complete(vec![Message::user("hi")], 16).await,
            Err(ProviderError::Parse(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_becomes_timeout() {
        let g = Generator::new(Some(Arc::new(Hanging)), "m", Duration::from_secs(20));
        assert!(matches!(
            g.complete(vec![Message::user("hi")], 16).await,
            Err(ProviderError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn missing_provider_is_not_configured() {
        let g = Generator::new(None, "m", Duration::from_secs(5));
        assert!(!g.is_available());
        let err = g.complete(vec![Message::user("hi")], 16).await.unwrap_err();
        assert!(err.is_not_configured());
    }

    #[test]
    fn list_parsing() {
        let text = "1. Rust async\n2) Tokio runtime\n- \"rust async\"\n\n* Serde\n• Clap";
        assert_eq!(
            parse_list(text, 3),
            vec!["Rust async", "Tokio runtime", "Serde"]
        );
    }
}
