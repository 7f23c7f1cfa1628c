//! Per-channel rendering of a [`ReminderMessage`].

use chrono::{DateTime, Utc};
use eventping_core::{ChannelKind, ReminderMessage};

use crate::types::MessageFormat;

const SIGNATURE: &str = "EventPing Reminder Service";

/// Provider-ready content produced from a reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Only set for channels with a subject line (email).
    pub subject: Option<String>,
    pub body: String,
    pub format: MessageFormat,
}

/// Render `msg` the way `kind` expects it.
pub fn render(kind: ChannelKind, msg: &ReminderMessage) -> RenderedMessage {
    match kind {
        ChannelKind::Email => RenderedMessage {
            subject: Some(format!("Reminder: {}", msg.event_title)),
            body: email_body(msg),
            format: MessageFormat::PlainText,
        },
        ChannelKind::Sms => RenderedMessage {
            subject: None,
            body: format!(
                "Reminder: {} starts {} ({}). - EventPing",
                msg.event_title,
                format_start(msg.starts_at),
                describe_lead_time(msg.offset_minutes),
            ),
            format: MessageFormat::PlainText,
        },
        ChannelKind::WhatsApp => RenderedMessage {
            subject: None,
            body: whatsapp_body(msg),
            format: MessageFormat::Markdown,
        },
        ChannelKind::Telegram => RenderedMessage {
            subject: None,
            body: chat_body(msg, ""),
            format: MessageFormat::PlainText,
        },
        ChannelKind::Slack => RenderedMessage {
            subject: None,
            body: chat_body(msg, "*"),
            format: MessageFormat::Markdown,
        },
        ChannelKind::Discord => RenderedMessage {
            subject: None,
            body: chat_body(msg, "**"),
            format: MessageFormat::Markdown,
        },
    }
}

/// `January 05, 2030 at 06:30 PM UTC`
pub fn format_start(at: DateTime<Utc>) -> String {
    at.format("%B %d, %Y at %I:%M %p UTC").to_string()
}

/// Human phrase for how far ahead of the event a reminder fires.
pub fn describe_lead_time(offset_minutes: u32) -> String {
    fn plural(n: u32, unit: &str) -> String {
        if n == 1 {
            format!("in 1 {unit}")
        } else {
            format!("in {n} {unit}s")
        }
    }

    match offset_minutes {
        0 => "starting now".to_string(),
        m if m % 1440 == 0 => plural(m / 1440, "day"),
        m if m % 60 == 0 => plural(m / 60, "hour"),
        m => plural(m, "minute"),
    }
}

fn email_body(msg: &ReminderMessage) -> String {
    let mut body = String::from("Hello,\n\nThis is a reminder for the upcoming event:\n\n");
    body.push_str(&format!("Event: {}\n", msg.event_title));
    body.push_str(&format!("Date & Time: {}\n", format_start(msg.starts_at)));
    body.push_str(&format!(
        "Description: {}\n",
        msg.description.as_deref().unwrap_or("No description")
    ));
    if !msg.custom_fields.is_empty() {
        body.push_str("\nYour registration details:\n");
        for f in &msg.custom_fields {
            body.push_str(&format!("- {}: {}\n", f.field, f.value));
        }
    }
    body.push_str("\nWe look forward to seeing you there!\n\n---\n");
    body.push_str(SIGNATURE);
    body
}

fn whatsapp_body(msg: &ReminderMessage) -> String {
    let mut body = format!(
        "📅 *Event Reminder*\n\nEvent: *{}*\nDate: {}\n",
        msg.event_title,
        format_start(msg.starts_at)
    );
    if let Some(d) = &msg.description {
        body.push_str(d);
        body.push('\n');
    }
    for f in &msg.custom_fields {
        body.push_str(&format!("{}: {}\n", f.field, f.value));
    }
    body.push_str("\nSee you there!");
    body
}

/// Shared layout for chat platforms; `bold` is the platform's strong marker.
fn chat_body(msg: &ReminderMessage, bold: &str) -> String {
    let mut body = format!(
        "📅 {bold}{}{bold} starts {}\n{}\n",
        msg.event_title,
        describe_lead_time(msg.offset_minutes),
        format_start(msg.starts_at)
    );
    if let Some(d) = &msg.description {
        body.push('\n');
        body.push_str(d);
        body.push('\n');
    }
    if !msg.custom_fields.is_empty() {
        body.push('\n');
        for f in &msg.custom_fields {
            body.push_str(&format!("• {}: {}\n", f.field, f.value));
        }
    }
    body.truncate(body.trim_end().len());
    body
}
