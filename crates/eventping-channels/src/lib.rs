//! `eventping-channels`: reminder delivery adapters.
//!
//! Every provider (Email, SMS, WhatsApp, Telegram, Slack, Discord) sits
//! behind the [`Channel`] trait. The dispatcher only ever calls
//! [`Channel::send`] and inspects [`ChannelError::is_retryable`]; transport
//! sessions, reconnects and provider wire formats stay inside the adapter.

pub mod adapters;
pub mod channel;
pub mod error;
mod http;
pub mod manager;
pub mod render;
pub mod split;
pub mod types;

pub use adapters::build_channels;
pub use channel::Channel;
pub use error::ChannelError;
pub use manager::{jitter, ChannelManager};
pub use render::{render, RenderedMessage};
pub use types::{ChannelStatus, MessageFormat, StatusCell};
