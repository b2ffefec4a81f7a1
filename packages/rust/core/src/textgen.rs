//! Text-generation collaborator for narrative artifact sections.
//!
//! [`OpenRouterClient`] speaks the OpenAI-style chat-completions protocol.
//! [`RateLimitedGenerator`] wraps any generator with the batch-wide
//! concurrency bound and a per-call timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use repoctx_shared::{RepoCtxError, Result, TextGenSection, textgen_api_key};

const USER_AGENT: &str = concat!("repoctx/", env!("CARGO_PKG_VERSION"));

const SYSTEM_PROMPT: &str = "You write concise, factual documentation for software repositories. \
Only state what the provided facts support.";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce prose for one prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn model(&self) -> &str;
}

/// Build the configured generator, or `None` when text generation is off.
pub fn from_settings(settings: &TextGenSection) -> Result<Option<Arc<dyn TextGenerator>>> {
    if !settings.enabled {
        return Ok(None);
    }
    let api_key = textgen_api_key(settings)?;
    let client = OpenRouterClient::new(settings, api_key)?;
    let limited = RateLimitedGenerator::new(
        Arc::new(client),
        settings.max_concurrent,
        Duration::from_secs(settings.timeout_secs),
    );
    Ok(Some(Arc::new(limited)))
}

// ---------------------------------------------------------------------------
// OpenRouter
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenRouterClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    pub fn new(settings: &TextGenSection, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RepoCtxError::TextGen(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenRouterClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RepoCtxError::TextGen(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(RepoCtxError::TextGen(format!("HTTP {status}: {snippet}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RepoCtxError::TextGen(format!("invalid response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RepoCtxError::TextGen("response contained no text".into()))?;

        debug!(chars = text.len(), "generation complete");
        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Concurrency bound
// ---------------------------------------------------------------------------

/// Shares one semaphore across every repository and artifact worker.
pub struct RateLimitedGenerator {
    inner: Arc<dyn TextGenerator>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl RateLimitedGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }
}

#[async_trait]
impl TextGenerator for RateLimitedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| RepoCtxError::TextGen("generator shut down".into()))?;

        tokio::time::timeout(self.timeout, self.inner.generate(prompt))
            .await
            .map_err(|_| {
                RepoCtxError::TextGen(format!("timed out after {} ms", self.timeout.as_millis()))
            })?
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn settings(base_url: &str) -> TextGenSection {
        TextGenSection {
            enabled: true,
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn chat_completion_success() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/api/v1/chat/completions"))
            .and(wiremock::matchers::header("authorization", "Bearer test-key"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "  A small service.  " } }]
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(&settings(&format!("{}/api/v1/", server.uri())), "test-key".into())
            .unwrap();
        let text = client.generate("describe").await.unwrap();
        assert_eq!(text, "A small service.");
    }

    #[tokio::test]
    async fn http_error_is_reported() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(&settings(&server.uri()), "k".into()).unwrap();
        let err = client.generate("x").await.unwrap_err();
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn empty_choices_rejected() {
        let server = wiremock::MockServer::start().await;

        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(&settings(&server.uri()), "k".into()).unwrap();
        let err = client.generate("x").await.unwrap_err();
        assert!(err.to_string().contains("no text"));
    }

    struct Slow {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl TextGenerator for Slow {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".into())
        }

        fn model(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn semaphore_bounds_concurrency() {
        let slow = Arc::new(Slow {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::from_millis(20),
        });
        let limited = Arc::new(RateLimitedGenerator::new(slow.clone(), 2, Duration::from_secs(5)));

        let mut set = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let g = limited.clone();
            set.spawn(async move { g.generate("p").await });
        }
        while let Some(res) = set.join_next().await {
            assert_eq!(res.unwrap().unwrap(), "ok");
        }
        assert!(slow.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limited.model(), "slow");
    }

    #[tokio::test]
    async fn timeout_becomes_error() {
        let slow = Arc::new(Slow {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay: Duration::from_secs(5),
        });
        let limited = RateLimitedGenerator::new(slow, 1, Duration::from_millis(20));
        let err = limited.generate("p").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn disabled_settings_yield_none() {
        let settings = TextGenSection::default();
        assert!(from_settings(&settings).unwrap().is_none());
    }
}
