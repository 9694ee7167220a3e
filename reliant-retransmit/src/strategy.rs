use async_trait::async_trait;

use crate::{error::TransportError, message::OutboundMessage};

/// Performs the transport send of a previously sent message.
///
/// `request_ack` asks the receiver to acknowledge promptly; it is set on the
/// first resend after a message is registered and after each resume.
///
/// Implementations must be safe to call concurrently for different
/// messages.
#[async_trait]
pub trait ResendStrategy: Send + Sync {
    /// # Errors
    ///
    /// Any transport failure. The engine logs it and keeps the message
    /// scheduled.
    async fn resend(&self, message: &OutboundMessage, request_ack: bool)
    -> Result<(), TransportError>;
}
