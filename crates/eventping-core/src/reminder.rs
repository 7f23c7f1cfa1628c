//! Reminder types shared between the scheduler engine and all channel adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChannelKind, CustomFieldResponse, Event, Participant};

/// Deduplication key of a reminder: at most one send per identity, ever.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderIdentity {
    pub event_id: String,
    pub participant_id: String,
    pub offset_minutes: u32,
    pub channel: ChannelKind,
}

impl ReminderIdentity {
    pub fn new(
        event_id: impl Into<String>,
        participant_id: impl Into<String>,
        offset_minutes: u32,
        channel: ChannelKind,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            participant_id: participant_id.into(),
            offset_minutes,
            channel,
        }
    }
}

impl std::fmt::Display for ReminderIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}m/{}",
            self.event_id, self.participant_id, self.offset_minutes, self.channel
        )
    }
}

/// Channel-neutral reminder content, rendered per channel by the adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderMessage {
    pub event_title: String,
    pub description: Option<String>,
    pub starts_at: DateTime<Utc>,
    /// Offset that triggered this reminder (minutes before start).
    pub offset_minutes: u32,
    /// Participant's custom-field responses, in registration order.
    pub custom_fields: Vec<CustomFieldResponse>,
}

impl ReminderMessage {
    pub fn new(event: &Event, participant: &Participant, offset_minutes: u32) -> Self {
        Self {
            event_title: event.title.clone(),
            description: event
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from),
            starts_at: event.starts_at,
            offset_minutes,
            custom_fields: participant.custom_field_responses.clone(),
        }
    }
}
