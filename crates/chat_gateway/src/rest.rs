use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ChannelId, MessageId},
    protocol::PanelContent,
};
use tracing::debug;
use url::Url;

use crate::{ChatGateway, GatewayError};

#[derive(Debug, Serialize)]
struct CreateChannelRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct MoveChannelRequest {
    parent_id: i64,
}

#[derive(Debug, Deserialize)]
struct CreatedChannel {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PostedMessage {
    message_id: i64,
}

/// JSON client for the presentation adapter that owns the platform connection.
#[derive(Clone)]
pub struct RestChatGateway {
    client: Client,
    base: Url,
}

impl RestChatGateway {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url)
            .with_context(|| format!("invalid gateway url '{base_url}'"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: Client::new(),
            base,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base
            .join(path)
            .map_err(|e| GatewayError::Transport(anyhow::Error::new(e)))
    }

    async fn check(
        operation: &'static str,
        response: Result<Response, reqwest::Error>,
    ) -> Result<Response, GatewayError> {
        let response = response.map_err(|e| GatewayError::Transport(e.into()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Rejected {
            operation,
            reason: format!("{status}: {body}"),
        })
    }

    async fn create(
        &self,
        name: &str,
        parent: Option<ChannelId>,
    ) -> Result<ChannelId, GatewayError> {
        let (operation, path) = match parent {
            Some(_) => ("create_text_channel", "channels"),
            None => ("create_category", "categories"),
        };
        let response = self
            .client
            .post(self.endpoint(path)?)
            .json(&CreateChannelRequest {
                name,
                parent_id: parent.map(|p| p.0),
            })
            .send()
            .await;
        let created: CreatedChannel = Self::check(operation, response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.into()))?;
        debug!(channel_id = created.id, name, "gateway created channel");
        Ok(ChannelId(created.id))
    }
}

#[async_trait]
impl ChatGateway for RestChatGateway {
    async fn create_category(&self, name: &str) -> Result<ChannelId, GatewayError> {
        self.create(name, None).await
    }

    async fn create_text_channel(
        &self,
        name: &str,
        parent: ChannelId,
    ) -> Result<ChannelId, GatewayError> {
        self.create(name, Some(parent)).await
    }

    async fn move_channel(
        &self,
        channel: ChannelId,
        parent: ChannelId,
    ) -> Result<(), GatewayError> {
        let response = self
            .client
            .patch(self.endpoint(&format!("channels/{}", channel.0))?)
            .json(&MoveChannelRequest { parent_id: parent.0 })
            .send()
            .await;
        if matches!(&response, Ok(r) if r.status() == StatusCode::NOT_FOUND) {
            return Err(GatewayError::ChannelNotFound(channel));
        }
        Self::check("move_channel", response).await?;
        Ok(())
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(self.endpoint(&format!("channels/{}", channel.0))?)
            .send()
            .await;
        if matches!(&response, Ok(r) if r.status() == StatusCode::NOT_FOUND) {
            return Err(GatewayError::ChannelNotFound(channel));
        }
        Self::check("delete_channel", response).await?;
        Ok(())
    }

    async fn post_panel(
        &self,
        channel: ChannelId,
        panel: &PanelContent,
    ) -> Result<MessageId, GatewayError> {
        let response = self
            .client
            .post(self.endpoint(&format!("channels/{}/panels", channel.0))?)
            .json(panel)
            .send()
            .await;
        let posted: PostedMessage = Self::check("post_panel", response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.into()))?;
        Ok(MessageId(posted.message_id))
    }

    async fn edit_panel(
        &self,
        channel: ChannelId,
        message: MessageId,
        panel: &PanelContent,
    ) -> Result<(), GatewayError> {
        let response = self
            .client
            .patch(self.endpoint(&format!("channels/{}/panels/{}", channel.0, message.0))?)
            .json(panel)
            .send()
            .await;
        if matches!(&response, Ok(r) if r.status() == StatusCode::NOT_FOUND) {
            return Err(GatewayError::MessageNotFound {
                channel_id: channel,
                message_id: message,
            });
        }
        Self::check("edit_panel", response).await?;
        Ok(())
    }
}
