use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One messaging provider category a reminder can be delivered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[serde(alias = "EMAIL")]
    Email,
    #[serde(alias = "SMS")]
    Sms,
    #[serde(alias = "WHATSAPP")]
    WhatsApp,
    #[serde(alias = "TELEGRAM")]
    Telegram,
    #[serde(alias = "SLACK")]
    Slack,
    #[serde(alias = "DISCORD")]
    Discord,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 6] = [
        ChannelKind::Email,
        ChannelKind::Sms,
        ChannelKind::WhatsApp,
        ChannelKind::Telegram,
        ChannelKind::Slack,
        ChannelKind::Discord,
    ];

    /// Stable lowercase name, used as the storage key and in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Sms => "sms",
            ChannelKind::WhatsApp => "whatsapp",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Slack => "slack",
            ChannelKind::Discord => "discord",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(ChannelKind::Email),
            "sms" => Ok(ChannelKind::Sms),
            "whatsapp" => Ok(ChannelKind::WhatsApp),
            "telegram" => Ok(ChannelKind::Telegram),
            "slack" => Ok(ChannelKind::Slack),
            "discord" => Ok(ChannelKind::Discord),
            other => Err(format!("unknown channel kind: {other}")),
        }
    }
}

/// Lifecycle of an event as seen by the reminder engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    #[default]
    Draft,
    Published,
    Cancelled,
    Completed,
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventState::Draft => "draft",
            EventState::Published => "published",
            EventState::Cancelled => "cancelled",
            EventState::Completed => "completed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for EventState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EventState::Draft),
            "published" => Ok(EventState::Published),
            "cancelled" => Ok(EventState::Cancelled),
            "completed" => Ok(EventState::Completed),
            other => Err(format!("unknown event state: {other}")),
        }
    }
}

/// An event as mirrored from the EventPing application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Event start (UTC).
    pub starts_at: DateTime<Utc>,
    /// Minutes before `starts_at` at which reminders fire. A set, so
    /// duplicate offsets collapse on deserialisation.
    #[serde(default, rename = "reminderOffsetMinutes")]
    pub reminder_offsets: BTreeSet<u32>,
    /// Channel kinds enabled for this event.
    #[serde(default, rename = "integrations")]
    pub channels: BTreeSet<ChannelKind>,
    #[serde(default)]
    pub state: EventState,
}

impl Event {
    /// Wall-clock instant at which the reminder for `offset_minutes` is due.
    pub fn due_at(&self, offset_minutes: u32) -> DateTime<Utc> {
        self.starts_at - Duration::minutes(i64::from(offset_minutes))
    }

    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now >= self.starts_at
    }
}

/// Contact identities of a participant, one per addressable provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contacts {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "phoneNumber")]
    pub phone: Option<String>,
    /// WhatsApp number when it differs from `phone`.
    #[serde(default)]
    pub whatsapp: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub slack_user_id: Option<String>,
    #[serde(default)]
    pub discord_user_id: Option<String>,
}

impl Contacts {
    /// The recipient identity a channel needs, if present and non-blank.
    pub fn for_channel(&self, kind: ChannelKind) -> Option<&str> {
        let value = match kind {
            ChannelKind::Email => self.email.as_deref(),
            ChannelKind::Sms => self.phone.as_deref(),
            ChannelKind::WhatsApp => non_blank(self.whatsapp.as_deref()).or(self.phone.as_deref()),
            ChannelKind::Telegram => self.telegram_chat_id.as_deref(),
            ChannelKind::Slack => self.slack_user_id.as_deref(),
            ChannelKind::Discord => self.discord_user_id.as_deref(),
        };
        non_blank(value)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A single answer to an event-defined custom registration field.
///
/// Carried verbatim into message rendering; the engine never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomFieldResponse {
    pub field: String,
    pub value: String,
}

/// A registrant of an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub event_id: String,
    #[serde(flatten)]
    pub contacts: Contacts,
    #[serde(default)]
    pub unsubscribed: bool,
    /// Ordered key/value answers; order is preserved for rendering.
    #[serde(default)]
    pub custom_field_responses: Vec<CustomFieldResponse>,
}
