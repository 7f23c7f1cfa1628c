//! Telegram via the Bot API.

use std::time::Duration;

use async_trait::async_trait;
use eventping_core::{config::TelegramConfig, ChannelKind, ReminderMessage};
use teloxide::{
    prelude::*,
    types::{ParseMode, Recipient},
    ApiError, RequestError,
};
use tracing::{debug, info};

use crate::{
    channel::Channel,
    error::ChannelError,
    render::render,
    split::{escape_markdown_v2, split_for_markdown_v2},
    types::{ChannelStatus, StatusCell},
};

/// Telegram caps messages at 4096 characters; bytes are an upper bound.
const MESSAGE_MAX: usize = 4096;

pub struct TelegramChannel {
    bot: Bot,
    status: StatusCell,
}

impl TelegramChannel {
    pub fn new(cfg: &TelegramConfig) -> Result<Self, ChannelError> {
        if cfg.bot_token.trim().is_empty() {
            return Err(ChannelError::ConfigError("telegram bot_token is empty".into()));
        }
        Ok(Self {
            bot: Bot::new(cfg.bot_token.trim()),
            status: StatusCell::new(),
        })
    }

    async fn send_chunk(&self, to: &Recipient, chunk: &str) -> Result<(), ChannelError> {
        let formatted = self
            .bot
            .send_message(to.clone(), escape_markdown_v2(chunk))
            .parse_mode(ParseMode::MarkdownV2)
            .await;
        match formatted {
            Ok(_) => Ok(()),
            Err(RequestError::Api(
                ApiError::CantParseEntities(_) | ApiError::MessageIsTooLong,
            )) => {
                debug!("telegram rejected the MarkdownV2 text, resending as plain text");
                self.bot
                    .send_message(to.clone(), chunk)
                    .await
                    .map(|_| ())
                    .map_err(classify_request)
            }
            Err(e) => Err(classify_request(e)),
        }
    }
}

/// Numeric ids are chats; `@name` targets a public channel.
fn parse_recipient(raw: &str) -> Result<Recipient, ChannelError> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Ok(Recipient::Id(ChatId(id)));
    }
    if raw.len() > 1 && raw.starts_with('@') {
        return Ok(Recipient::ChannelUsername(raw.to_string()));
    }
    Err(ChannelError::InvalidRecipient(format!(
        "not a telegram chat id: {raw}"
    )))
}

fn classify_request(err: RequestError) -> ChannelError {
    match err {
        RequestError::RetryAfter(secs) => ChannelError::RateLimited {
            retry_after_secs: Some(u64::from(secs.seconds())),
        },
        RequestError::MigrateToChatId(new_id) => {
            ChannelError::InvalidRecipient(format!("chat migrated to {new_id}"))
        }
        RequestError::Api(ApiError::InvalidToken) => {
            ChannelError::AuthFailed("telegram rejected the bot token".into())
        }
        RequestError::Api(
            e @ (ApiError::BotBlocked
            | ApiError::ChatNotFound
            | ApiError::UserDeactivated
            | ApiError::BotKicked),
        ) => ChannelError::InvalidRecipient(e.to_string()),
        RequestError::Api(e) => ChannelError::Rejected(e.to_string()),
        RequestError::Network(e) if e.is_connect() => ChannelError::ConnectionFailed(e.to_string()),
        other => ChannelError::Transient(other.to_string()),
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        self.status.set(ChannelStatus::Connecting);
        match self.bot.get_me().await {
            Ok(me) => {
                info!(username = %me.username(), "telegram bot authenticated");
                self.status.set(ChannelStatus::Connected);
                Ok(())
            }
            Err(e) => {
                let err = classify_request(e);
                self.status.set(ChannelStatus::Error(err.to_string()));
                Err(err)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ChannelError> {
        self.status.set(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send(&self, recipient: &str, message: &ReminderMessage) -> Result<(), ChannelError> {
        let to = parse_recipient(recipient)?;
        let text = render(ChannelKind::Telegram, message).body;
        let chunks = split_for_markdown_v2(&text, MESSAGE_MAX);
        for (i, chunk) in chunks.iter().enumerate() {
            self.send_chunk(&to, chunk).await?;
            if i + 1 < chunks.len() {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.get()
    }
}
