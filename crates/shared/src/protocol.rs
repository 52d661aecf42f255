use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChannelId, MessageId, RunId, UserId},
    error::ApiError,
};

pub const FIELD_POKEMON_NAME: &str = "pokemon_name";
pub const FIELD_DEATH_LOCATION: &str = "death_location";

/// An inbound interaction delivered by the chat platform gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub user_id: UserId,
    pub interaction: InteractionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InteractionKind {
    Command {
        name: String,
    },
    ButtonPress {
        correlation: String,
    },
    SelectionMade {
        correlation: String,
        values: Vec<String>,
    },
    FormSubmitted {
        correlation: String,
        #[serde(default)]
        fields: BTreeMap<String, String>,
    },
}

impl InteractionKind {
    pub fn label(&self) -> &'static str {
        match self {
            InteractionKind::Command { .. } => "command",
            InteractionKind::ButtonPress { .. } => "button_press",
            InteractionKind::SelectionMade { .. } => "selection_made",
            InteractionKind::FormSubmitted { .. } => "form_submitted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub key: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub id: String,
    pub label: String,
    pub required: bool,
    pub max_length: Option<u16>,
    pub placeholder: Option<String>,
}

/// Reply to the acting player. Every variant is shown to that player only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InteractionReply {
    Notice {
        content: String,
    },
    SelectPrompt {
        correlation: String,
        placeholder: String,
        options: Vec<SelectOption>,
    },
    FormPrompt {
        correlation: String,
        title: String,
        fields: Vec<FormField>,
    },
    Error(ApiError),
}

impl InteractionReply {
    pub fn notice(content: impl Into<String>) -> Self {
        Self::Notice {
            content: content.into(),
        }
    }

    pub fn correlation(&self) -> Option<&str> {
        match self {
            InteractionReply::SelectPrompt { correlation, .. }
            | InteractionReply::FormPrompt { correlation, .. } => Some(correlation),
            InteractionReply::Notice { .. } | InteractionReply::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelKind {
    Catches,
    Deaths,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelLine {
    pub position: usize,
    pub name: String,
    pub location: String,
    pub location_name: String,
}

/// A button on a panel; `correlation` starts the matching flow when pressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelAction {
    pub label: String,
    pub correlation: String,
}

/// Full state of one standing panel, recomputed from the ledger on every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelContent {
    pub kind: PanelKind,
    pub run_number: i64,
    pub lines: Vec<PanelLine>,
    pub actions: Vec<PanelAction>,
}

impl PanelContent {
    pub fn total(&self) -> usize {
        self.lines.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_number: i64,
    pub caught: i64,
    pub dead: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPayload {
    pub run_id: RunId,
    pub run_number: i64,
    pub active: bool,
    pub category_id: ChannelId,
    pub general_channel_id: ChannelId,
    pub catches_channel_id: ChannelId,
    pub deaths_channel_id: ChannelId,
    pub catches_panel_message_id: Option<MessageId>,
    pub deaths_panel_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
}
