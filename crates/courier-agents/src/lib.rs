//! Agent profiles and provider integration.
//!
//! `LlmClient` is the pluggable seam to the model backend; `AgentRegistry`
//! resolves an agent id to its profile, builds the full prompt, and invokes
//! the client with the agent's preferred model. Remote failures are
//! classified into the transient/permanent taxonomy here so the runtime's
//! retry policy can act on them without knowing about HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use courier_types::{AgentProfile, CourierConfig, CourierError, CourierResult};

/// Pluggable LLM backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> CourierResult<String>;
}

/// Pluggable outbound mail collaborator for result delivery.
#[async_trait]
pub trait MailClient: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> CourierResult<()>;
}

/// Mail client that only logs. Used in tests and headless deployments.
#[derive(Default)]
pub struct LogMailClient;

#[async_trait]
impl MailClient for LogMailClient {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> CourierResult<()> {
        tracing::info!(to, subject, "delivery suppressed (log mail client)");
        Ok(())
    }
}

const LLM_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// OpenAI-compatible chat-completions client.
pub struct HttpLlmClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl HttpLlmClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> CourierResult<Self> {
        let http = Client::builder()
            .timeout(LLM_CALL_TIMEOUT)
            .build()
            .map_err(|err| CourierError::Internal(format!("http client: {err}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> CourierResult<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self.http.post(&url).json(&json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() {
                CourierError::TransientRemote(format!("llm request failed: {err}"))
            } else {
                CourierError::Internal(format!("llm request failed: {err}"))
            }
        })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CourierError::TransientRemote(format!(
                "llm backend returned {status}"
            )));
        }
        if status.is_client_error() {
            return Err(CourierError::PermanentRemote(format!(
                "llm backend returned {status}"
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| CourierError::TransientRemote(format!("llm response decode: {err}")))?;
        extract_completion(body)
    }
}

/// Pull the completion text out of a decoded chat response.
///
/// Some backends report failures inside a 2xx body instead of the status
/// line. Those are logged and surfaced as permanent failures, which the
/// retry predicate never retries.
fn extract_completion(body: serde_json::Value) -> CourierResult<String> {
    if let Some(error) = body.get("error") {
        tracing::warn!(error = %error, "llm backend returned an error body with 2xx status");
        return Err(CourierError::PermanentRemote(format!(
            "llm error body: {error}"
        )));
    }

    let parsed: ChatResponse = serde_json::from_value(body)
        .map_err(|err| CourierError::PermanentRemote(format!("llm response shape: {err}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| CourierError::PermanentRemote("llm response had no choices".into()))
}

/// Deterministic client that echoes the prompt. Stands in for a real
/// provider in tests and unconfigured deployments.
#[derive(Default)]
pub struct EchoLlmClient;

#[async_trait]
impl LlmClient for EchoLlmClient {
    async fn complete(
        &self,
        model: &str,
        _system_prompt: &str,
        user_prompt: &str,
    ) -> CourierResult<String> {
        let head: String = user_prompt.chars().take(120).collect();
        Ok(format!("[{model}] {head}"))
    }
}

/// Resolves agents and invokes the model backend on their behalf.
#[derive(Clone)]
pub struct AgentRegistry {
    config: Arc<CourierConfig>,
    client: Arc<dyn LlmClient>,
}

impl AgentRegistry {
    pub fn new(config: Arc<CourierConfig>, client: Arc<dyn LlmClient>) -> Self {
        Self { config, client }
    }

    pub fn profile(&self, agent_id: &str) -> CourierResult<&AgentProfile> {
        self.config
            .agent(agent_id)
            .ok_or_else(|| CourierError::NotFound(format!("agent `{agent_id}`")))
    }

    pub fn agent_ids(&self) -> Vec<String> {
        self.config.agents.iter().map(|a| a.id.clone()).collect()
    }

    /// Invoke an agent with a task prompt. The system prompt and model come
    /// from the agent's profile.
    pub async fn invoke(&self, agent_id: &str, prompt: &str) -> CourierResult<String> {
        let profile = self.profile(agent_id)?;
        tracing::debug!(agent_id, model = %profile.preferred_model, "invoking agent");
        self.client
            .complete(&profile.preferred_model, &profile.system_prompt, prompt)
            .await
    }
}
