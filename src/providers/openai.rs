use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::retry::{is_rate_limited, is_transient, retry_after};
use super::{CompletionRequest, Provider, ProviderError, ProviderFuture, ProviderResponse, ProviderUsage};

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions client for OpenAI and any endpoint speaking the same protocol.
#[derive(Debug, Clone)]
pub struct OpenAI {
    key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAI {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            base_url: base_url(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        if !base_url.trim().is_empty() {
            self.base_url = base_url.trim_end_matches('/').to_string();
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> anyhow::Result<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }
}

impl Provider for OpenAI {
    fn complete(&self, request: CompletionRequest) -> ProviderFuture {
        let provider = self.clone();
        Box::pin(async move { call_chat_completions(provider, request).await })
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }

    fn credential(&self) -> &str {
        &self.key
    }
}

fn base_url() -> String {
    super::get_env("OPENAI_BASE_URL")
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

async fn call_chat_completions(
    provider: OpenAI,
    request: CompletionRequest,
) -> Result<ProviderResponse, ProviderError> {
    let url = format!("{}/chat/completions", provider.base_url);
    let body = json!({
        "model": request.model,
        "messages": [
            {"role": "system", "content": request.system},
            {"role": "user", "content": request.user}
        ],
        "temperature": request.temperature,
        "max_tokens": request.max_tokens
    });

    let response = provider
        .client
        .post(&url)
        .bearer_auth(&provider.key)
        .json(&body)
        .send()
        .await
        .map_err(|err| ProviderError::Transient(err.to_string()))?;

    let status = response.status();
    let retry_after = retry_after(response.headers());
    let text = response.text().await.unwrap_or_default();
    if status.is_success() {
        let parsed = extract_completion(&text, &request.model)?;
        debug!(
            "completion from {} ({} tokens)",
            parsed.model.as_deref().unwrap_or(&request.model),
            parsed
                .usage
                .as_ref()
                .and_then(|usage| usage.total_tokens)
                .unwrap_or_default()
        );
        return Ok(parsed);
    }
    Err(classify_failure(status, retry_after, &text))
}

fn classify_failure(
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> ProviderError {
    let message = extract_openai_error(body).unwrap_or_else(|| body.to_string());
    if is_rate_limited(status, body) {
        return ProviderError::RateLimited { retry_after };
    }
    match status.as_u16() {
        401 => ProviderError::Auth(message),
        403 => ProviderError::PermissionDenied(message),
        _ if is_transient(status) => ProviderError::Transient(format!("{}: {}", status, message)),
        code => ProviderError::Api {
            status: code,
            message,
        },
    }
}

fn extract_completion(text: &str, fallback_model: &str) -> Result<ProviderResponse, ProviderError> {
    let payload: ChatResponse = serde_json::from_str(text)
        .map_err(|err| ProviderError::InvalidResponse(format!("failed to parse response JSON: {}", err)))?;
    let content = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ProviderError::InvalidResponse("no message content returned".to_string()))?;
    let model = payload
        .model
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(fallback_model.to_string()));
    let usage = payload.usage.map(|usage| ProviderUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    });
    Ok(ProviderResponse {
        content,
        model,
        usage,
    })
}

fn extract_openai_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<OpenAIError>,
    }

    #[derive(Deserialize)]
    struct OpenAIError {
        message: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
        code: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let parts: Vec<String> = [
        error.message,
        error.kind.map(|kind| format!("type: {}", kind)),
        error.code.map(|code| format!("code: {}", code)),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.trim().is_empty())
    .collect();
    if parts.is_empty() {
        Some("unknown error".to_string())
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}
