use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Formatting hint for rendered message content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    /// Raw text with no special markup.
    #[default]
    PlainText,

    /// Markdown as understood by the target platform.
    Markdown,
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Fully connected and ready to send.
    Connected,

    /// Attempting to establish or re-establish the connection.
    Connecting,

    /// Cleanly disconnected (not an error condition).
    Disconnected,

    /// The last connect or send attempt failed.
    Error(String),
}

/// Interior-mutable [`ChannelStatus`] shared by an adapter's `&self` methods.
#[derive(Debug)]
pub struct StatusCell(Mutex<ChannelStatus>);

impl StatusCell {
    pub fn new() -> Self {
        Self(Mutex::new(ChannelStatus::Disconnected))
    }

    pub fn get(&self) -> ChannelStatus {
        self.0.lock().expect("channel status poisoned").clone()
    }

    pub fn set(&self, status: ChannelStatus) {
        *self.0.lock().expect("channel status poisoned") = status;
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.get(), ChannelStatus::Connected)
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
