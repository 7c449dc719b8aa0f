//! HTTP-RPC client for the agent gateway.
//!
//! One `POST /rpc` endpoint carries every method. Requests are
//! `{type:"req", id, method, params}`, responses `{type:"res", id, ok,
//! payload?, error?}`. Transport failures (connect errors, timeouts,
//! non-2xx statuses) arm the [`backoff::BackoffGate`]; semantic failures
//! (`ok:false`) do not.

pub mod backoff;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use uuid::Uuid;

use crate::config::GatewayConfig;
use backoff::BackoffGate;

/// Errors surfaced by gateway calls.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The circuit is open: the call was rejected locally without
    /// touching the network. Callers treat this as "skip this cycle".
    #[error("gateway unavailable, backoff window armed")]
    Unavailable,

    /// The gateway answered `ok:false`. Does not arm backoff.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Network-level failure (connect error, timeout, non-2xx status).
    #[error("gateway transport error: {0}")]
    Transport(String),

    /// The gateway answered 2xx with a body we could not interpret.
    #[error("malformed gateway response: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    id: Uuid,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    kind: String,
    #[allow(dead_code)]
    id: Uuid,
    ok: bool,
    payload: Option<Value>,
    error: Option<String>,
}

/// Parameters for `chat.send`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendRequest {
    pub session_key: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    pub idempotency_key: String,
}

/// Result of `chat.send`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendResponse {
    pub run_id: String,
    pub status: ChatSendStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatSendStatus {
    Started,
    Queued,
    Error,
}

/// One row of `sessions.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub key: String,
    pub model: Option<String>,
    /// Milliseconds since epoch.
    pub updated_at: i64,
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
    pub kind: Option<String>,
}

/// One entry of `sessions.preview`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPreview {
    pub key: String,
    /// "ok" | "empty" | "missing" | "error"
    pub status: String,
    #[serde(default)]
    pub items: Vec<PreviewItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewItem {
    pub role: String,
    pub text: String,
    pub model: Option<String>,
}

/// A scheduled job registered with the gateway by `setup-crons`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub schedule: String,
    /// Shell command the gateway runs on each firing.
    pub command: String,
    /// Extra environment for the command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<serde_json::Map<String, Value>>,
}

// ---------------------------------------------------------------------------
// The trait
// ---------------------------------------------------------------------------

/// The gateway surface the supervisor invokes.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn chat_send(&self, request: &ChatSendRequest) -> Result<ChatSendResponse, RpcError>;
    async fn chat_abort(&self, session_key: &str) -> Result<(), RpcError>;
    async fn sessions_list(&self, limit: Option<u32>) -> Result<Vec<SessionInfo>, RpcError>;
    async fn sessions_preview(
        &self,
        keys: &[String],
        limit: u32,
    ) -> Result<Vec<SessionPreview>, RpcError>;
    async fn sessions_reset(&self, session_key: &str) -> Result<(), RpcError>;
    async fn sessions_compact(&self, session_key: &str) -> Result<(), RpcError>;
    async fn sessions_cancel(&self, session_key: &str) -> Result<(), RpcError>;
    async fn config_get(&self) -> Result<Value, RpcError>;
    async fn cron_add(&self, job: &CronJob) -> Result<(), RpcError>;
}

// ---------------------------------------------------------------------------
// The reqwest-backed client
// ---------------------------------------------------------------------------

/// The production gateway client.
pub struct OpenclawRpc {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    backoff: BackoffGate,
}

impl OpenclawRpc {
    pub fn new(config: &GatewayConfig, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
            backoff: BackoffGate::new(),
        })
    }

    /// Inspect the breaker (tests, status reporting).
    pub fn backoff(&self) -> &BackoffGate {
        &self.backoff
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.backoff.check()?;

        let body = RpcRequest {
            kind: "req",
            id: Uuid::new_v4(),
            method,
            params,
        };

        let mut request = self
            .client
            .post(format!("{}/rpc", self.base_url))
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                self.backoff.record_failure(None);
                return Err(RpcError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            // Retry-After: N pins the window to N + 1 seconds.
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|n| Duration::from_secs(n + 1));
            self.backoff.record_failure(retry_after);
            return Err(RpcError::Transport(format!("gateway returned {status}")));
        }
        if !status.is_success() {
            self.backoff.record_failure(None);
            return Err(RpcError::Transport(format!("gateway returned {status}")));
        }

        // The gateway answered; anything from here on is not a transport
        // fault.
        self.backoff.record_success();

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Protocol(e.to_string()))?;

        if parsed.ok {
            Ok(parsed.payload.unwrap_or(Value::Null))
        } else {
            Err(RpcError::Gateway(
                parsed.error.unwrap_or_else(|| "unspecified error".to_owned()),
            ))
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, RpcError> {
        serde_json::from_value(payload).map_err(|e| RpcError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl Gateway for OpenclawRpc {
    async fn chat_send(&self, request: &ChatSendRequest) -> Result<ChatSendResponse, RpcError> {
        let payload = self
            .call(
                "chat.send",
                serde_json::to_value(request).map_err(|e| RpcError::Protocol(e.to_string()))?,
            )
            .await?;
        Self::decode(payload)
    }

    async fn chat_abort(&self, session_key: &str) -> Result<(), RpcError> {
        self.call("chat.abort", json!({ "sessionKey": session_key }))
            .await?;
        Ok(())
    }

    async fn sessions_list(&self, limit: Option<u32>) -> Result<Vec<SessionInfo>, RpcError> {
        let payload = self.call("sessions.list", json!({ "limit": limit })).await?;
        #[derive(Deserialize)]
        struct Payload {
            sessions: Vec<SessionInfo>,
        }
        Ok(Self::decode::<Payload>(payload)?.sessions)
    }

    async fn sessions_preview(
        &self,
        keys: &[String],
        limit: u32,
    ) -> Result<Vec<SessionPreview>, RpcError> {
        let payload = self
            .call("sessions.preview", json!({ "keys": keys, "limit": limit }))
            .await?;
        #[derive(Deserialize)]
        struct Payload {
            previews: Vec<SessionPreview>,
        }
        Ok(Self::decode::<Payload>(payload)?.previews)
    }

    async fn sessions_reset(&self, session_key: &str) -> Result<(), RpcError> {
        self.call("sessions.reset", json!({ "sessionKey": session_key }))
            .await?;
        Ok(())
    }

    async fn sessions_compact(&self, session_key: &str) -> Result<(), RpcError> {
        self.call("sessions.compact", json!({ "sessionKey": session_key }))
            .await?;
        Ok(())
    }

    async fn sessions_cancel(&self, session_key: &str) -> Result<(), RpcError> {
        self.call("sessions.cancel", json!({ "sessionKey": session_key }))
            .await?;
        Ok(())
    }

    async fn config_get(&self) -> Result<Value, RpcError> {
        self.call("config.get", json!({})).await
    }

    async fn cron_add(&self, job: &CronJob) -> Result<(), RpcError> {
        self.call(
            "cron.add",
            serde_json::to_value(job).map_err(|e| RpcError::Protocol(e.to_string()))?,
        )
        .await?;
        Ok(())
    }
}
