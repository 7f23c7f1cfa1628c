//! Discord direct messages over the REST API.
//!
//! A DM needs a channel first: `POST /users/@me/channels` opens (or returns
//! the existing) DM channel, then messages go to `/channels/{id}/messages`.

use async_trait::async_trait;
use eventping_core::{config::DiscordConfig, ChannelKind, ReminderMessage};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    channel::Channel,
    error::ChannelError,
    http::{classify_transport, client, error_from_response},
    render::render,
    split::split_chunks,
    types::{ChannelStatus, StatusCell},
};

/// Discord caps messages at 2000 chars; leave headroom.
const MAX_CHUNK: usize = 1950;

#[derive(Deserialize)]
struct DmChannel {
    id: String,
}

pub struct DiscordChannel {
    client: reqwest::Client,
    auth: String,
    base_url: String,
    status: StatusCell,
}

impl DiscordChannel {
    pub fn new(cfg: &DiscordConfig) -> Result<Self, ChannelError> {
        if cfg.bot_token.trim().is_empty() {
            return Err(ChannelError::ConfigError("discord bot_token is empty".into()));
        }
        Ok(Self {
            client: client()?,
            auth: format!("Bot {}", cfg.bot_token.trim()),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            status: StatusCell::new(),
        })
    }

    async fn open_dm(&self, user_id: &str) -> Result<String, ChannelError> {
        let resp = self
            .client
            .post(format!("{}/users/@me/channels", self.base_url))
            .header("Authorization", &self.auth)
            .json(&json!({ "recipient_id": user_id }))
            .send()
            .await
            .map_err(classify_transport)?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let dm: DmChannel = resp
            .json()
            .await
            .map_err(|e| ChannelError::Transient(format!("discord dm channel body: {e}")))?;
        Ok(dm.id)
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Discord
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.status.set(ChannelStatus::Connecting);
        let result = match self
            .client
            .get(format!("{}/users/@me", self.base_url))
            .header("Authorization", &self.auth)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => Ok(()),
            Ok(r) => Err(error_from_response(r).await),
            Err(e) => Err(classify_transport(e)),
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
        let user_id = recipient.trim();
        if user_id.is_empty() || !user_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ChannelError::InvalidRecipient(format!(
                "not a discord user id: {recipient}"
            )));
        }
        let channel_id = self.open_dm(user_id).await?;
        let text = render(ChannelKind::Discord, message).body;

        for chunk in split_chunks(&text, MAX_CHUNK) {
            let resp = self
                .client
                .post(format!("{}/channels/{channel_id}/messages", self.base_url))
                .header("Authorization", &self.auth)
                .json(&json!({ "content": chunk }))
                .send()
                .await
                .map_err(classify_transport)?;
            if !resp.status().is_success() {
                return Err(error_from_response(resp).await);
            }
        }
        debug!(%channel_id, "discord reminder sent");
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.get()
    }
}
