use async_trait::async_trait;
use eventping_core::{ChannelKind, ReminderMessage};

use crate::{error::ChannelError, types::ChannelStatus};

/// Common interface implemented by every channel adapter.
///
/// Implementations must be `Send + Sync` so they can be shared between the
/// dispatcher's worker tasks. All methods take `&self`; adapters keep their
/// session state behind interior mutability.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The provider category this adapter delivers to. Used as the key inside
    /// [`ChannelManager`](crate::manager::ChannelManager).
    fn kind(&self) -> ChannelKind;

    /// Establish or verify the connection to the external service.
    ///
    /// Implementations should transition their internal state to
    /// [`ChannelStatus::Connected`] on success.
    async fn connect(&self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&self) -> Result<(), ChannelError>;

    /// Deliver one reminder to one recipient identity.
    ///
    /// `recipient` is the participant's contact for this channel (address,
    /// phone number, chat/user id). Rendering to the provider's format is the
    /// adapter's job.
    async fn send(&self, recipient: &str, message: &ReminderMessage) -> Result<(), ChannelError>;

    /// Return the current runtime status without blocking.
    fn status(&self) -> ChannelStatus;
}
