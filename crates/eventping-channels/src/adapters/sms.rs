//! SMS through a Twilio-compatible REST gateway.

use async_trait::async_trait;
use eventping_core::{config::SmsConfig, ChannelKind, ReminderMessage};
use tracing::debug;

use crate::{
    channel::Channel,
    error::ChannelError,
    http::{classify_transport, client, error_from_response, normalize_phone},
    render::render,
    types::{ChannelStatus, StatusCell},
};

pub struct SmsChannel {
    client: reqwest::Client,
    cfg: SmsConfig,
    status: StatusCell,
}

impl SmsChannel {
    pub fn new(cfg: &SmsConfig) -> Result<Self, ChannelError> {
        if normalize_phone(&cfg.from_number).is_none() {
            return Err(ChannelError::ConfigError(format!(
                "invalid sender number {}",
                cfg.from_number
            )));
        }
        Ok(Self {
            client: client()?,
            cfg: cfg.clone(),
            status: StatusCell::new(),
        })
    }

    fn account_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.account_sid
        )
    }
}

#[async_trait]
impl Channel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    /// Verify credentials by fetching the account resource.
    async fn connect(&self) -> Result<(), ChannelError> {
        self.status.set(ChannelStatus::Connecting);
        let resp = self
            .client
            .get(format!("{}.json", self.account_url()))
            .basic_auth(&self.cfg.account_sid, Some(&self.cfg.auth_token))
            .send()
            .await
            .map_err(classify_transport);
        let result = match resp {
            Ok(r) if r.status().is_success() => Ok(()),
            Ok(r) => Err(error_from_response(r).await),
            Err(e) => Err(e),
        };
        match &result {
            Ok(()) => self.status.set(ChannelStatus::Connected),
            Err(e) => self.status.set(ChannelStatus::Error(e.to_string())),
        }
        result
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.status.set(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send(&self, recipient: &str, message: &ReminderMessage) -> Result<(), ChannelError> {
        let to = normalize_phone(recipient)
            .ok_or_else(|| ChannelError::InvalidRecipient(format!("not a phone number: {recipient}")))?;
        let body = render(ChannelKind::Sms, message).body;

        let resp = self
            .client
            .post(format!("{}/Messages.json", self.account_url()))
            .basic_auth(&self.cfg.account_sid, Some(&self.cfg.auth_token))
            .form(&[
                ("To", to.as_str()),
                ("From", self.cfg.from_number.as_str()),
                ("Body", body.as_str()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        debug!("sms accepted by gateway");
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cfg(from: &str) -> SmsConfig {
        SmsConfig {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            from_number: from.into(),
            base_url: "https://sms.example.com/".into(),
        }
    }

    #[test]
    fn account_url_trims_base_slash() {
        let ch = SmsChannel::new(&cfg("+15550001111")).unwrap();
        assert_eq!(
            ch.account_url(),
            "https://sms.example.com/2010-04-01/Accounts/AC123"
        );
    }

    #[test]
    fn bad_sender_number_is_config_error() {
        assert!(matches!(
            SmsChannel::new(&cfg("front-desk")),
            Err(ChannelError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn non_phone_recipient_is_terminal_without_network() {
        let ch = SmsChannel::new(&cfg("+15550001111")).unwrap();
        let msg = ReminderMessage {
            event_title: "Standup".into(),
            description: None,
            starts_at: Utc::now(),
            offset_minutes: 15,
            custom_fields: Vec::new(),
        };
        let err = ch.send("call me maybe", &msg).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidRecipient(_)));
        assert!(!err.is_retryable());
    }
}
