use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::AiConfig;
use crate::errors::RelayError;

const MAX_ERROR_CHARS: usize = 300;

/// One prompt for the AI provider.
#[derive(Debug, Clone, PartialEq)]
pub struct AiRequest {
    pub prompt: String,
    /// `None` selects the baseline model
    pub model: Option<String>,
}

impl AiRequest {
    pub fn new(prompt: impl Into<String>, model: Option<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.filter(|m| !m.trim().is_empty()),
        }
    }

    pub fn model_or<'a>(&'a self, baseline: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(baseline)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiResponse {
    pub text: String,
    pub model: String,
}

/// Anything that can turn a prompt into text.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, request: &AiRequest) -> Result<AiResponse, RelayError>;
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    proceed: bool,
    token: Option<String>,
}

/// Relay to the Puter AI driver API.
///
/// Every call logs in, issues one non-streaming completion and logs out.
pub struct PuterRelay {
    client: reqwest::Client,
    config: AiConfig,
}

/// An authenticated session. Must be closed with [`PuterSession::close`].
struct PuterSession<'a> {
    relay: &'a PuterRelay,
    token: String,
}

impl PuterRelay {
    pub fn new(config: AiConfig) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    async fn open_session(&self) -> Result<PuterSession<'_>, RelayError> {
        debug!("Logging in to AI provider: {}", self.config.login_url);

        let response = self
            .client
            .post(&self.config.login_url)
            .json(&LoginRequest {
                username: &self.config.username,
                password: &self.config.password,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Auth(format!(
                "login rejected ({}): {}",
                status,
                error_excerpt(&body)
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| RelayError::MalformedResponse(format!("login response: {}", e)))?;

        match login.token {
            Some(token) if login.proceed => Ok(PuterSession { relay: self, token }),
            _ => Err(RelayError::Auth(
                "login did not return a session token".to_string(),
            )),
        }
    }

    fn logout_url(&self) -> String {
        let base = self.config.login_url.trim_end_matches('/');
        let base = base.strip_suffix("/login").unwrap_or(base);
        format!("{}/logout", base)
    }
}

impl PuterSession<'_> {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, RelayError> {
        let url = format!(
            "{}/drivers/call",
            self.relay.config.api_base_url.trim_end_matches('/')
        );

        debug!("Sending completion request ({}) to {}", model, url);

        let response = self
            .relay
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&completion_body(model, prompt))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Auth(error_excerpt(&body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Api {
                status: status.as_u16(),
                body: error_excerpt(&body),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RelayError::MalformedResponse(e.to_string()))?;

        extract_text(&body)
    }

    /// Tear the session down. Failures are logged, never returned.
    async fn close(self) {
        let url = self.relay.logout_url();
        match self
            .relay
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => debug!("AI provider session closed"),
            Ok(resp) => debug!("Logout returned {}", resp.status()),
            Err(e) => warn!("Failed to close AI provider session: {}", e),
        }
    }
}

#[async_trait]
impl Completer for PuterRelay {
    async fn complete(&self, request: &AiRequest) -> Result<AiResponse, RelayError> {
        let model = request.model_or(&self.config.default_model).to_string();

        let session = self.open_session().await?;
        let result = session.complete(&model, &request.prompt).await;
        session.close().await;

        let text = result?;
        debug!("AI response from {}: {} chars", model, text.chars().count());
        Ok(AiResponse { text, model })
    }
}

/// Start of an error body, which may be a whole HTML page.
fn error_excerpt(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= MAX_ERROR_CHARS {
        return body.to_string();
    }
    let head: String = body.chars().take(MAX_ERROR_CHARS).collect();
    format!("{}…", head)
}

fn completion_body(model: &str, prompt: &str) -> Value {
    json!({
        "interface": "puter-chat-completion",
        "driver": "ai-chat",
        "method": "complete",
        "args": {
            "messages": [{ "role": "user", "content": prompt }],
            "model": model,
            "stream": false,
        }
    })
}

/// Pull the answer text out of a driver response.
///
/// Accepts the content either as a string or as a list of text blocks, and
/// tolerates the `response` wrapper some gateways add.
fn extract_text(body: &Value) -> Result<String, RelayError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(RelayError::Api {
            status: 200,
            body: error_excerpt(reason),
        });
    }

    let content = body
        .pointer("/result/message/content")
        .or_else(|| body.pointer("/response/result/message/content"))
        .ok_or_else(|| RelayError::MalformedResponse("missing message content".to_string()))?;

    match content {
        Value::String(text) => Ok(text.clone()),
        Value::Array(blocks) => Ok(blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("")),
        other => Err(RelayError::MalformedResponse(format!(
            "unexpected content type: {}",
            other
        ))),
    }
}
