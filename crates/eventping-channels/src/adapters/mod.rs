//! Concrete channel adapters and the factory that builds them from config.

pub mod discord;
pub mod email;
pub mod slack;
pub mod sms;
pub mod telegram;
pub mod whatsapp;

use std::sync::Arc;

use eventping_core::config::ChannelsConfig;
use tracing::error;

use crate::{channel::Channel, error::ChannelError, manager::ChannelManager};

pub use discord::DiscordChannel;
pub use email::EmailChannel;
pub use slack::SlackChannel;
pub use sms::SmsChannel;
pub use telegram::TelegramChannel;
pub use whatsapp::WhatsAppChannel;

/// Build a [`ChannelManager`] holding one adapter per configured section.
///
/// An adapter whose construction fails (bad SMTP host, unparsable sender
/// address, …) is logged and left out; reminders for that channel then fail
/// terminally as not configured instead of taking the whole daemon down.
pub fn build_channels(cfg: &ChannelsConfig) -> ChannelManager {
    let mut manager = ChannelManager::new();

    let mut add = |name: &str, built: Result<Arc<dyn Channel>, ChannelError>| match built {
        Ok(channel) => manager.register(channel),
        Err(e) => error!(channel = name, error = %e, "channel adapter not registered"),
    };

    if let Some(c) = &cfg.email {
        add("email", EmailChannel::new(c).map(|ch| Arc::new(ch) as Arc<dyn Channel>));
    }
    if let Some(c) = &cfg.sms {
        add("sms", SmsChannel::new(c).map(|ch| Arc::new(ch) as Arc<dyn Channel>));
    }
    if let Some(c) = &cfg.whatsapp {
        add("whatsapp", WhatsAppChannel::new(c).map(|ch| Arc::new(ch) as Arc<dyn Channel>));
    }
    if let Some(c) = &cfg.telegram {
        add("telegram", TelegramChannel::new(c).map(|ch| Arc::new(ch) as Arc<dyn Channel>));
    }
    if let Some(c) = &cfg.slack {
        add("slack", SlackChannel::new(c).map(|ch| Arc::new(ch) as Arc<dyn Channel>));
    }
    if let Some(c) = &cfg.discord {
        add("discord", DiscordChannel::new(c).map(|ch| Arc::new(ch) as Arc<dyn Channel>));
    }

    manager
}
