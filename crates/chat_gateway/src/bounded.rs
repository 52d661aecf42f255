use std::{future::Future, time::Duration};

use async_trait::async_trait;
use shared::{
    domain::{ChannelId, MessageId},
    protocol::PanelContent,
};
use tracing::warn;

use crate::{ChatGateway, GatewayError};

/// Wraps a gateway so that no call can block longer than `timeout`.
pub struct BoundedGateway<G> {
    inner: G,
    timeout: Duration,
}

impl<G> BoundedGateway<G> {
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>> + Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "gateway call timed out"
                );
                Err(GatewayError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl<G: ChatGateway> ChatGateway for BoundedGateway<G> {
    async fn create_category(&self, name: &str) -> Result<ChannelId, GatewayError> {
        self.bounded("create_category", self.inner.create_category(name))
            .await
    }

    async fn create_text_channel(
        &self,
        name: &str,
        parent: ChannelId,
    ) -> Result<ChannelId, GatewayError> {
        self.bounded(
            "create_text_channel",
            self.inner.create_text_channel(name, parent),
        )
        .await
    }

    async fn move_channel(
        &self,
        channel: ChannelId,
        parent: ChannelId,
    ) -> Result<(), GatewayError> {
        self.bounded("move_channel", self.inner.move_channel(channel, parent))
            .await
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), GatewayError> {
        self.bounded("delete_channel", self.inner.delete_channel(channel))
            .await
    }

    async fn post_panel(
        &self,
        channel: ChannelId,
        panel: &PanelContent,
    ) -> Result<MessageId, GatewayError> {
        self.bounded("post_panel", self.inner.post_panel(channel, panel))
            .await
    }

    async fn edit_panel(
        &self,
        channel: ChannelId,
        message: MessageId,
        panel: &PanelContent,
    ) -> Result<(), GatewayError> {
        self.bounded("edit_panel", self.inner.edit_panel(channel, message, panel))
            .await
    }
}
