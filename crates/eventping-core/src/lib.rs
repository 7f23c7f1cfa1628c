//! `eventping-core`: types shared by the reminder engine, the channel
//! adapters and the daemon.

pub mod config;
pub mod error;
pub mod reminder;
pub mod types;

pub use error::{EventPingError, Result, StoreError};
pub use reminder::{ReminderIdentity, ReminderMessage};
pub use types::{ChannelKind, Contacts, CustomFieldResponse, Event, EventState, Participant};
