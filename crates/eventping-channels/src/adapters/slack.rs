//! Slack direct messages through the Web API.

use async_trait::async_trait;
use eventping_core::{config::SlackConfig, ChannelKind, ReminderMessage};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    channel::Channel,
    error::ChannelError,
    http::{classify_transport, client, error_from_response},
    render::render,
    types::{ChannelStatus, StatusCell},
};

#[derive(Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct SlackChannel {
    client: reqwest::Client,
    token: String,
    base_url: String,
    status: StatusCell,
}

impl SlackChannel {
    pub fn new(cfg: &SlackConfig) -> Result<Self, ChannelError> {
        if cfg.bot_token.trim().is_empty() {
            return Err(ChannelError::ConfigError("slack bot_token is empty".into()));
        }
        Ok(Self {
            client: client()?,
            token: cfg.bot_token.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            status: StatusCell::new(),
        })
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let parsed: SlackResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::Transient(format!("slack response: {e}")))?;
        if parsed.ok {
            Ok(())
        } else {
            Err(classify_slack_error(
                parsed.error.as_deref().unwrap_or("unknown_error"),
                retry_after,
            ))
        }
    }
}

/// Slack reports failures as `{"ok": false, "error": "<code>"}` with HTTP 200.
fn classify_slack_error(code: &str, retry_after_secs: Option<u64>) -> ChannelError {
    match code {
        "ratelimited" | "rate_limited" => ChannelError::RateLimited { retry_after_secs },
        "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
            ChannelError::Transient(code.to_string())
        }
        "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked" | "token_expired" => {
            ChannelError::AuthFailed(code.to_string())
        }
        "channel_not_found" | "user_not_found" | "is_archived" | "not_in_channel"
        | "cannot_dm_bot" | "user_disabled" => ChannelError::InvalidRecipient(code.to_string()),
        other => ChannelError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.status.set(ChannelStatus::Connecting);
        match self.call("auth.test", json!({})).await {
            Ok(()) => {
                self.status.set(ChannelStatus::Connected);
                Ok(())
            }
            Err(e) => {
                self.status.set(ChannelStatus::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.status.set(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send(&self, recipient: &str, message: &ReminderMessage) -> Result<(), ChannelError> {
        let user = recipient.trim();
        if user.is_empty() {
            return Err(ChannelError::InvalidRecipient("empty slack user id".into()));
        }
        let text = render(ChannelKind::Slack, message).body;
        self.call(
            "chat.postMessage",
            json!({ "channel": user, "text": text, "mrkdwn": true }),
        )
        .await?;
        debug!("slack reminder posted");
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.get()
    }
}
