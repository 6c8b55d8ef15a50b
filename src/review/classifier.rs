//! External classification client (OpenAI-compatible chat completions).

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ClassifierConfig;
use crate::platform::retry::{parse_retry_after, RateLimitHint, RateLimitSignal};

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },
    #[error("classifier API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("classifier transport error: {0}")]
    Transport(String),
    #[error("classifier returned no content")]
    Empty,
}

impl RateLimitSignal for ClassifierError {
    fn rate_limit(&self) -> Option<RateLimitHint> {
        match self {
            Self::RateLimited { retry_after } => Some(RateLimitHint {
                retry_after: *retry_after,
                global: true,
            }),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClassifierError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Prompt in, free-form text out.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, prompt: &str) -> Result<String, ClassifierError>;
}

pub struct OpenAiClassifier {
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
    system_prompt: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
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

impl OpenAiClassifier {
    pub fn new(cfg: &ClassifierConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            api_key: cfg.api_key.clone(),
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            system_prompt: cfg.system_prompt.clone(),
            client,
        })
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, prompt: &str) -> Result<String, ClassifierError> {
        let payload = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": prompt },
            ],
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<f64>().ok())
                .and_then(parse_retry_after);
            return Err(ClassifierError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = resp.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(ClassifierError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn classifier(server: &MockServer) -> OpenAiClassifier {
        OpenAiClassifier::new(&ClassifierConfig {
            api_key: "sk-test".into(),
            endpoint: server.uri(),
            ..ClassifierConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "content": " ✅ Role: Student\nLooks fine. " } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = classifier(&server).classify("sheet").await.unwrap();
        assert_eq!(text, "✅ Role: Student\nLooks fine.");
    }

    #[tokio::test]
    async fn maps_429_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "5"))
            .mount(&server)
            .await;

        let err = classifier(&server).classify("sheet").await.unwrap_err();
        let hint = err.rate_limit().unwrap();
        assert_eq!(hint.retry_after, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn oversized_retry_after_header_is_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1e20"))
            .mount(&server)
            .await;

        let err = classifier(&server).classify("sheet").await.unwrap_err();
        assert!(matches!(err, ClassifierError::RateLimited { retry_after: None }));
    }

    #[tokio::test]
    async fn server_errors_are_not_rate_limits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
            .mount(&server)
            .await;

        let err = classifier(&server).classify("sheet").await.unwrap_err();
        assert!(matches!(err, ClassifierError::Api { status: 500, .. }));
        assert!(err.rate_limit().is_none());
    }

    #[tokio::test]
    async fn empty_choices_are_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = classifier(&server).classify("sheet").await.unwrap_err();
        assert!(matches!(err, ClassifierError::Empty));
    }
}
