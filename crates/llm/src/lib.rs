use std::env;
use std::future::Future;

use citerag_core::{
    classify_status, status_error, FailureKind, Generator, LlmConfig, RagError, Result,
    RetryPolicy,
};
use reqwest::{header::HeaderValue, Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

const SERVICE: &str = "generator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmRequest {
    /// A blank system prompt is left out of the request entirely.
    pub fn new(system: &str, user: &str) -> Self {
        Self {
            system: (!system.trim().is_empty()).then(|| system.to_string()),
            user: user.to_string(),
        }
    }
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    retry: RetryPolicy,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Local,
}

#[derive(Clone)]
struct OpenAiConfig {
    api_key: String,
    base_url: String,
}

#[derive(Clone)]
struct AnthropicConfig {
    api_key: String,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(provider: LlmProvider, model: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        let model = model.into();
        let config = match provider {
            LlmProvider::OpenAi => ProviderConfig::OpenAi(OpenAiConfig {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            }),
            LlmProvider::Anthropic => ProviderConfig::Anthropic(AnthropicConfig {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
                max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1024),
            }),
            LlmProvider::Local => ProviderConfig::Local,
        };
        Ok(Self {
            http: Client::new(),
            provider,
            model,
            retry,
            config,
        })
    }

    pub fn from_config(config: &LlmConfig, retry: RetryPolicy) -> Result<Self> {
        let provider = LlmProvider::from_name(&config.provider).ok_or_else(|| {
            RagError::Config(format!("unknown llm provider {}", config.provider))
        })?;
        Self::new(provider, config.model.clone(), retry)
    }

    pub fn local() -> Self {
        Self {
            http: Client::new(),
            provider: LlmProvider::Local,
            model: "local".to_string(),
            retry: RetryPolicy::default(),
            config: ProviderConfig::Local,
        }
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::OpenAi(cfg) => self.chat_openai(cfg, req).await,
            ProviderConfig::Anthropic(cfg) => self.chat_anthropic(cfg, req).await,
            ProviderConfig::Local => Ok(self.chat_local(req)),
        }
    }

    pub fn chat_blocking(&self, req: &LlmRequest) -> Result<LlmResponse> {
        let rt = Runtime::new()
            .map_err(|e| RagError::Other(format!("failed to create tokio runtime: {e}")))?;
        rt.block_on(self.chat(req))
    }

    async fn chat_openai(&self, cfg: &OpenAiConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", cfg.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "messages": openai_messages(req),
            "temperature": 0,
        });
        let value = self
            .send_with_retry(|| self.http.post(&url).bearer_auth(&cfg.api_key).json(&payload))
            .await?;
        let content = extract_openai_text(&value)
            .ok_or_else(|| RagError::Other("missing text in OpenAI response".into()))?;
        let usage: OpenAiUsage = value
            .get("usage")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        Ok(LlmResponse {
            content,
            prompt_tokens: usage.prompt_tokens.unwrap_or(0),
            completion_tokens: usage.completion_tokens.unwrap_or(0),
        })
    }

    async fn chat_anthropic(&self, cfg: &AnthropicConfig, req: &LlmRequest) -> Result<LlmResponse> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": cfg.max_tokens,
            "temperature": 0,
            "messages": [ { "role": "user", "content": req.user } ],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        let value = self
            .send_with_retry(|| {
                self.http
                    .post("https://api.anthropic.com/v1/messages")
                    .header("x-api-key", &cfg.api_key)
                    .header("anthropic-version", "2023-06-01")
                    .json(&payload)
            })
            .await?;
        let response: AnthropicResponse = serde_json::from_value(value)?;
        let text = response
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| RagError::Other("missing text in Anthropic response".into()))?;
        let usage = response.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }

    fn chat_local(&self, req: &LlmRequest) -> LlmResponse {
        LlmResponse {
            content: synthesize_local_response(req),
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    /// Sends the request built by `build`, retrying rate limits, connection
    /// errors and 5xx responses. Other 4xx responses fail on the first attempt.
    async fn send_with_retry<F>(&self, build: F) -> Result<Value>
    where
        F: Fn() -> RequestBuilder,
    {
        let build = &build;
        let body = send_until_settled(&self.retry, self.provider, || async move {
            match build().send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(parse_retry_after);
                    let body = response.text().await.unwrap_or_default();
                    Attempt::Responded {
                        status,
                        retry_after,
                        body,
                    }
                }
                Err(err) => Attempt::Unreachable(err.to_string()),
            }
        })
        .await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// What one HTTP attempt produced.
#[derive(Debug, Clone)]
enum Attempt {
    Responded {
        status: u16,
        retry_after: Option<Duration>,
        body: String,
    },
    Unreachable(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Accept,
    Reject,
    Retry(Duration),
    GiveUp,
}

/// Decides what follows attempt number `attempt` (1-based).
fn next_step(policy: &RetryPolicy, attempt: usize, outcome: &Attempt) -> Step {
    let retry_after = match outcome {
        Attempt::Responded {
            status,
            retry_after,
            ..
        } => match classify_status(*status) {
            None => return Step::Accept,
            Some(FailureKind::Client) => return Step::Reject,
            Some(FailureKind::Transient) => *retry_after,
        },
        Attempt::Unreachable(_) => None,
    };
    if attempt >= policy.attempts() {
        Step::GiveUp
    } else {
        Step::Retry(retry_after.unwrap_or_else(|| policy.delay_for(attempt)))
    }
}

/// Runs `send` until it succeeds, hits a client error or exhausts the policy.
async fn send_until_settled<F, Fut>(
    policy: &RetryPolicy,
    provider: LlmProvider,
    mut send: F,
) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Attempt>,
{
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let outcome = send().await;
        match (next_step(policy, attempt, &outcome), outcome) {
            (Step::Accept, Attempt::Responded { body, .. }) => {
                debug!(provider = provider.as_str(), attempt, "generation succeeded");
                return Ok(body);
            }
            (Step::Reject, Attempt::Responded { status, body, .. }) => {
                return Err(status_error(SERVICE, status, body));
            }
            (Step::Retry(wait), outcome) => {
                warn!(
                    provider = provider.as_str(),
                    attempt,
                    ?wait,
                    reason = %describe(&outcome),
                    "transient failure, retrying"
                );
                sleep(wait).await;
            }
            (_, outcome) => {
                return Err(RagError::TransientService {
                    service: SERVICE,
                    attempts: attempt,
                    message: describe(&outcome),
                });
            }
        }
    }
}

fn describe(outcome: &Attempt) -> String {
    match outcome {
        Attempt::Responded { status, body, .. } => format!("status {status}: {body}"),
        Attempt::Unreachable(message) => message.clone(),
    }
}

/// Numeric `retry-after` seconds, at least one.
fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    let secs = value.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs.max(1)))
}

impl Generator for LlmClient {
    fn generate(&self, system: &str, user: &str) -> Result<String> {
        let response = self.chat_blocking(&LlmRequest::new(system, user))?;
        debug!(
            provider = self.provider.as_str(),
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            total_tokens = response.total_tokens(),
            "generation finished"
        );
        Ok(response.content)
    }
}

/// Offline answer: echoes the opening of the supplied context so the rest
/// of the pipeline can run without a provider.
fn synthesize_local_response(req: &LlmRequest) -> String {
    let context = extract_context_block(&req.user, "Context:");
    summarize_text(&context, 60)
}

fn extract_context_block(text: &str, start_marker: &str) -> String {
    match text.find(start_marker) {
        Some(start_idx) => text[start_idx + start_marker.len()..].trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn summarize_text(text: &str, max_words: usize) -> String {
    if max_words == 0 {
        return String::new();
    }
    text.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with("[page"))
        .collect::<Vec<&str>>()
        .join(" ")
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<&str>>()
        .join(" ")
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| RagError::Config(format!("{var} is not set")))?;
    if value.trim().is_empty() {
        return Err(RagError::Config(format!("{var} is empty")));
    }
    Ok(value)
}

fn extract_openai_text(value: &Value) -> Option<String> {
    let choice = value.get("choices")?.as_array()?.first()?;
    if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
        return Some(text.to_string());
    }
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = content.as_str() {
        return Some(text.to_string());
    }
    content
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
}

#[derive(Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

fn openai_messages(req: &LlmRequest) -> Vec<Value> {
    let mut messages = Vec::new();
    if let Some(system) = &req.system {
        messages.push(json!({"role": "system", "content": system }));
    }
    messages.push(json!({"role": "user", "content": req.user }));
    messages
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}
