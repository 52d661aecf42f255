use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use shared::{
    domain::{ChannelId, MessageId},
    protocol::PanelContent,
};
use tracing::debug;

use crate::{ChatGateway, GatewayError};

#[derive(Debug, Clone)]
struct ChannelRecord {
    name: String,
    parent: Option<ChannelId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedPanel {
    pub channel: ChannelId,
    pub content: PanelContent,
    pub edits: usize,
}

#[derive(Default)]
struct State {
    next_id: i64,
    channels: HashMap<ChannelId, ChannelRecord>,
    deleted_channels: Vec<ChannelId>,
    messages: HashMap<MessageId, PostedPanel>,
    channels_created: usize,
    fail_channel_creation_after: Option<usize>,
    fail_panel_delivery: bool,
    failing_panel_posts: usize,
    latency: Duration,
}

impl State {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Gateway that keeps channels and panels in process memory. Used for local runs without a
/// bridge and as the test double for the tracker.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<Mutex<State>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        let gateway = Self::default();
        gateway.lock().next_id = 1_000;
        gateway
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn simulate_latency(&self) {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    /// Registers a channel that exists before the tracker touches the server.
    pub fn insert_channel(&self, name: &str) -> ChannelId {
        let mut state = self.lock();
        let id = ChannelId(state.allocate());
        state.channels.insert(
            id,
            ChannelRecord {
                name: name.to_string(),
                parent: None,
            },
        );
        id
    }

    /// Channel creation succeeds `count` more times, then fails.
    pub fn fail_channel_creation_after(&self, count: usize) {
        let mut state = self.lock();
        state.fail_channel_creation_after = Some(state.channels_created + count);
    }

    pub fn set_panel_delivery_failing(&self, failing: bool) {
        self.lock().fail_panel_delivery = failing;
    }

    /// The next `count` panel posts fail, later ones succeed.
    pub fn fail_next_panel_posts(&self, count: usize) {
        self.lock().failing_panel_posts = count;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Simulates a panel message removed by a moderator.
    pub fn delete_message(&self, message: MessageId) -> bool {
        self.lock().messages.remove(&message).is_some()
    }

    pub fn parent_of(&self, channel: ChannelId) -> Option<ChannelId> {
        self.lock().channels.get(&channel).and_then(|c| c.parent)
    }

    pub fn channel_name(&self, channel: ChannelId) -> Option<String> {
        self.lock().channels.get(&channel).map(|c| c.name.clone())
    }

    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }

    pub fn deleted_channels(&self) -> Vec<ChannelId> {
        self.lock().deleted_channels.clone()
    }

    pub fn panel(&self, message: MessageId) -> Option<PostedPanel> {
        self.lock().messages.get(&message).cloned()
    }

    pub fn panels_in(&self, channel: ChannelId) -> Vec<PostedPanel> {
        self.lock()
            .messages
            .values()
            .filter(|p| p.channel == channel)
            .cloned()
            .collect()
    }

    fn create_channel(
        &self,
        name: &str,
        parent: Option<ChannelId>,
    ) -> Result<ChannelId, GatewayError> {
        let mut state = self.lock();
        if let Some(limit) = state.fail_channel_creation_after {
            if state.channels_created >= limit {
                return Err(GatewayError::Rejected {
                    operation: "create_channel",
                    reason: "simulated provisioning failure".into(),
                });
            }
        }
        if let Some(parent) = parent {
            if !state.channels.contains_key(&parent) {
                return Err(GatewayError::ChannelNotFound(parent));
            }
        }

        let id = ChannelId(state.allocate());
        state.channels_created += 1;
        state.channels.insert(
            id,
            ChannelRecord {
                name: name.to_string(),
                parent,
            },
        );
        debug!(channel_id = id.0, name, "memory gateway created channel");
        Ok(id)
    }
}

#[async_trait]
impl ChatGateway for InMemoryGateway {
    async fn create_category(&self, name: &str) -> Result<ChannelId, GatewayError> {
        self.simulate_latency().await;
        self.create_channel(name, None)
    }

    async fn create_text_channel(
        &self,
        name: &str,
        parent: ChannelId,
    ) -> Result<ChannelId, GatewayError> {
        self.simulate_latency().await;
        self.create_channel(name, Some(parent))
    }

    async fn move_channel(
        &self,
        channel: ChannelId,
        parent: ChannelId,
    ) -> Result<(), GatewayError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        if !state.channels.contains_key(&parent) {
            return Err(GatewayError::ChannelNotFound(parent));
        }
        let record = state
            .channels
            .get_mut(&channel)
            .ok_or(GatewayError::ChannelNotFound(channel))?;
        record.parent = Some(parent);
        Ok(())
    }

    async fn delete_channel(&self, channel: ChannelId) -> Result<(), GatewayError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state
            .channels
            .remove(&channel)
            .ok_or(GatewayError::ChannelNotFound(channel))?;
        state.deleted_channels.push(channel);
        state.messages.retain(|_, panel| panel.channel != channel);
        Ok(())
    }

    async fn post_panel(
        &self,
        channel: ChannelId,
        panel: &PanelContent,
    ) -> Result<MessageId, GatewayError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        let transient = state.failing_panel_posts > 0;
        if transient {
            state.failing_panel_posts -= 1;
        }
        if state.fail_panel_delivery || transient {
            return Err(GatewayError::Rejected {
                operation: "post_panel",
                reason: "simulated delivery failure".into(),
            });
        }
        if !state.channels.contains_key(&channel) {
            return Err(GatewayError::ChannelNotFound(channel));
        }
        let id = MessageId(state.allocate());
        state.messages.insert(
            id,
            PostedPanel {
                channel,
                content: panel.clone(),
                edits: 0,
            },
        );
        Ok(id)
    }

    async fn edit_panel(
        &self,
        channel: ChannelId,
        message: MessageId,
        panel: &PanelContent,
    ) -> Result<(), GatewayError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        if state.fail_panel_delivery {
            return Err(GatewayError::Rejected {
                operation: "edit_panel",
                reason: "simulated delivery failure".into(),
            });
        }
        let posted = state
            .messages
            .get_mut(&message)
            .filter(|p| p.channel == channel)
            .ok_or(GatewayError::MessageNotFound {
                channel_id: channel,
                message_id: message,
            })?;
        posted.content = panel.clone();
        posted.edits += 1;
        Ok(())
    }
}
