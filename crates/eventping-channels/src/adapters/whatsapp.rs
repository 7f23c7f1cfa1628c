//! WhatsApp via the companion web bridge.
//!
//! The bridge owns the WhatsApp Web session; we only talk to its two HTTP
//! endpoints. `GET /health` reports whether the session is linked and
//! `POST /send-reminder` delivers one message.

use async_trait::async_trait;
use eventping_core::{config::WhatsAppConfig, ChannelKind, ReminderMessage};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    channel::Channel,
    error::ChannelError,
    http::{classify_status, classify_transport, client, normalize_phone},
    render::{format_start, render},
    types::{ChannelStatus, StatusCell},
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendReminderRequest<'a> {
    phone_number: &'a str,
    event_title: &'a str,
    event_date_time: String,
    description: &'a str,
    message: String,
}

#[derive(Deserialize, Default)]
struct SendReminderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    #[serde(default)]
    whatsapp_connected: bool,
}

pub struct WhatsAppChannel {
    client: reqwest::Client,
    base_url: String,
    status: StatusCell,
}

impl WhatsAppChannel {
    pub fn new(cfg: &WhatsAppConfig) -> Result<Self, ChannelError> {
        let base_url = cfg.bridge_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ChannelError::ConfigError(format!(
                "bridge_url must be http(s): {}",
                cfg.bridge_url
            )));
        }
        Ok(Self {
            client: client()?,
            base_url,
            status: StatusCell::new(),
        })
    }

    async fn probe(&self) -> Result<bool, ChannelError> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(classify_transport)?;
        if !resp.status().is_success() {
            return Err(ChannelError::ConnectionFailed(format!(
                "bridge health returned {}",
                resp.status()
            )));
        }
        let health: HealthResponse = resp
            .json()
            .await
            .map_err(|e| ChannelError::Transient(format!("bridge health body: {e}")))?;
        Ok(health.whatsapp_connected)
    }
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.status.set(ChannelStatus::Connecting);
        match self.probe().await {
            Ok(true) => {
                self.status.set(ChannelStatus::Connected);
                Ok(())
            }
            Ok(false) => {
                let reason = "bridge is up but WhatsApp session is not linked".to_string();
                self.status.set(ChannelStatus::Error(reason.clone()));
                Err(ChannelError::ConnectionFailed(reason))
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
        let phone = normalize_phone(recipient)
            .ok_or_else(|| ChannelError::InvalidRecipient(format!("not a phone number: {recipient}")))?;

        if !self.status.is_connected() {
            if !self.probe().await? {
                return Err(ChannelError::ConnectionFailed(
                    "WhatsApp session is not linked".into(),
                ));
            }
            self.status.set(ChannelStatus::Connected);
        }

        let body = SendReminderRequest {
            phone_number: &phone,
            event_title: &message.event_title,
            event_date_time: format_start(message.starts_at),
            description: message.description.as_deref().unwrap_or(""),
            message: render(ChannelKind::WhatsApp, message).body,
        };
        let resp = self
            .client
            .post(format!("{}/send-reminder", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let parsed: SendReminderResponse = serde_json::from_str(&text).unwrap_or_default();

        if status.is_success() && parsed.success {
            debug!("whatsapp bridge accepted reminder");
            return Ok(());
        }

        let detail = parsed.message.unwrap_or_else(|| text.clone());
        match status {
            StatusCode::BAD_REQUEST => Err(ChannelError::InvalidRecipient(detail)),
            s if s.is_server_error() => {
                warn!(status = %s, "whatsapp bridge failed, marking session as reconnecting");
                self.status.set(ChannelStatus::Connecting);
                Err(ChannelError::Transient(detail))
            }
            s if s.is_success() => Err(ChannelError::Rejected(detail)),
            s => Err(classify_status(s, &detail, None)),
        }
    }

    fn status(&self) -> ChannelStatus {
        self.status.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_bridge_field_names() {
        let req = SendReminderRequest {
            phone_number: "+15551234567",
            event_title: "Launch",
            event_date_time: "June 01, 2026 at 09:00 AM UTC".into(),
            description: "",
            message: "hi".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["phoneNumber"], "+15551234567");
        assert_eq!(v["eventTitle"], "Launch");
        assert!(v.get("eventDateTime").is_some());
    }

    #[test]
    fn rejects_non_http_bridge_url() {
        let cfg = WhatsAppConfig {
            bridge_url: "localhost:3000".into(),
        };
        assert!(matches!(
            WhatsAppChannel::new(&cfg),
            Err(ChannelError::ConfigError(_))
        ));
    }

    #[test]
    fn health_body_parses() {
        let h: HealthResponse = serde_json::from_str(r#"{"whatsappConnected":true}"#).unwrap();
        assert!(h.whatsapp_connected);
    }
}
