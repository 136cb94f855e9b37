use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use lp_core::{AiModel, CompletionModel, ModelConfig, ProviderError};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::Config;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

/// Client for any `/chat/completions` endpoint speaking the OpenAI wire format
/// (DeepSeek, OpenAI, Ollama).
pub struct OpenAiCompatibleModel {
    client: Client,
    name: String,
    api_key: Option<String>,
    endpoint: Url,
    default_model: String,
    timeout: Duration,
}

impl fmt::Debug for OpenAiCompatibleModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiCompatibleModel")
            .field("client", &"<reqwest::Client>")
            .field("name", &self.name)
            .field("api_key", &self.api_key.as_deref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint.as_str())
            .field("default_model", &self.default_model)
            .finish()
    }
}

fn provider_defaults(model: AiModel) -> (&'static str, &'static str, &'static str) {
    match model {
        AiModel::OpenAi => ("OpenAI", "https://api.openai.com/v1", "gpt-4o-mini"),
        AiModel::Ollama => ("Ollama", "http://localhost:11434/v1", "qwen2.5:7b"),
        _ => ("DeepSeek", "https://api.deepseek.com/v1", "deepseek-chat"),
    }
}

impl OpenAiCompatibleModel {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        default_model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| ProviderError::Unavailable(format!("invalid base url {base_url}: {e}")))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let endpoint = base
            .join("chat/completions")
            .map_err(|e| ProviderError::Unavailable(format!("invalid base url {base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            name: name.into(),
            api_key,
            endpoint,
            default_model: default_model.into(),
            timeout,
        })
    }

    pub fn for_provider(model: AiModel, config: &Config) -> Result<Self, ProviderError> {
        let (name, base_url, default_model) = provider_defaults(model);
        Self::new(
            name,
            config.base_url.as_deref().unwrap_or(base_url),
            config.model_name.as_deref().unwrap_or(default_model),
            config.api_key.clone(),
            config.request_timeout.unwrap_or(DEFAULT_TIMEOUT),
        )
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn map_send_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout.as_secs())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

fn map_status(status: StatusCode, body: &str) -> ProviderError {
    let detail = format!("{status}: {}", body.chars().take(200).collect::<String>());
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::PAYMENT_REQUIRED => ProviderError::QuotaExceeded(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Unavailable(detail),
        s if s.is_server_error() => ProviderError::Unavailable(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => ProviderError::Unavailable(detail),
        _ => ProviderError::Malformed(detail),
    }
}

fn first_choice(response: ChatResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ProviderError::Malformed("response has no completion".to_string()))
}

#[async_trait]
impl CompletionModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str, config: &ModelConfig) -> Result<String, ProviderError> {
        let model = if config.model.is_empty() { self.default_model.as_str() } else { config.model.as_str() };
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            stream: false,
        };

        let mut builder = self.client.post(self.endpoint.clone()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;
        if !status.is_success() {
            tracing::debug!("{} returned {}", self.name, status);
            return Err(map_status(status, &body));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(format!("invalid response: {e}")))?;
        first_choice(parsed)
    }
}
