use std::time::Duration;

use async_trait::async_trait;
use shared::{
    domain::{ChannelId, MessageId},
    protocol::PanelContent,
};
use thiserror::Error;

mod bounded;
mod memory;
mod rest;

pub use bounded::BoundedGateway;
pub use memory::{InMemoryGateway, PostedPanel};
pub use rest::RestChatGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("message {message_id} not found in channel {channel_id}")]
    MessageNotFound {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    #[error("channel {0} not found")]
    ChannelNotFound(ChannelId),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("gateway rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
    #[error("gateway transport failure: {0}")]
    Transport(#[source] anyhow::Error),
}

/// Outbound capabilities the tracker needs from the chat platform.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn create_category(&self, name: &str) -> Result<ChannelId, GatewayError>;
    async fn create_text_channel(
        &self,
        name: &str,
        parent: ChannelId,
    ) -> Result<ChannelId, GatewayError>;
    async fn move_channel(&self, channel: ChannelId, parent: ChannelId)
        -> Result<(), GatewayError>;
    async fn delete_channel(&self, channel: ChannelId) -> Result<(), GatewayError>;
    async fn post_panel(
        &self,
        channel: ChannelId,
        panel: &PanelContent,
    ) -> Result<MessageId, GatewayError>;
    /// Fails with [`GatewayError::MessageNotFound`] when the message was deleted externally.
    async fn edit_panel(
        &self,
        channel: ChannelId,
        message: MessageId,
        panel: &PanelContent,
    ) -> Result<(), GatewayError>;
}
