//! Routes inbound interactions through the multi-step catch and death flows.
//!
//! Flow state lives entirely in the correlation token handed to the platform with each prompt,
//! so any server instance can continue any flow. Tokens are not secret: the owning user and the
//! expected step are checked on every hop, and completing a flow twice is refused by the ledger.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use shared::{
    domain::UserId,
    protocol::{
        FormField, InteractionEvent, InteractionKind, InteractionReply, PanelKind, SelectOption,
        FIELD_DEATH_LOCATION, FIELD_POKEMON_NAME,
    },
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::TrackerError,
    ledger::{self, MAX_NAME_LEN},
    panels, runs, TrackerContext,
};

pub const TOKEN_PREFIX: &str = "soul_link:flow:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowKind {
    #[serde(rename = "c")]
    NewCatch,
    #[serde(rename = "m")]
    MoveToDeaths,
    #[serde(rename = "u")]
    UncaughtDeath,
}

impl FlowKind {
    pub fn start_payload(self) -> &'static str {
        match self {
            FlowKind::NewCatch => "soul_link:add_catch",
            FlowKind::MoveToDeaths => "soul_link:move_to_deaths",
            FlowKind::UncaughtDeath => "soul_link:add_uncaught_death",
        }
    }

    pub fn from_start_payload(payload: &str) -> Option<Self> {
        [FlowKind::NewCatch, FlowKind::MoveToDeaths, FlowKind::UncaughtDeath]
            .into_iter()
            .find(|kind| kind.start_payload() == payload)
    }

    pub fn button_label(self) -> &'static str {
        match self {
            FlowKind::NewCatch => "Add Catch",
            FlowKind::MoveToDeaths => "Move Caught to Deaths",
            FlowKind::UncaughtDeath => "Add Uncaught Death",
        }
    }

    fn form_title(self) -> &'static str {
        match self {
            FlowKind::NewCatch => "Add New Catch",
            FlowKind::MoveToDeaths => "Move Pokemon to Deaths",
            FlowKind::UncaughtDeath => "Add Uncaught Death",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStep {
    #[serde(rename = "l")]
    ChooseLocation,
    #[serde(rename = "f")]
    SubmitForm,
}

/// Correlation token: `soul_link:flow:` followed by base64url(JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowToken {
    #[serde(rename = "k")]
    pub kind: FlowKind,
    #[serde(rename = "u")]
    pub user: UserId,
    #[serde(rename = "i")]
    pub flow_id: String,
    #[serde(rename = "s")]
    pub step: FlowStep,
    #[serde(rename = "l", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl FlowToken {
    fn start(kind: FlowKind, user: UserId, step: FlowStep) -> Self {
        Self {
            kind,
            user,
            flow_id: Uuid::new_v4().simple().to_string(),
            step,
            location: None,
        }
    }

    pub fn encode(&self) -> Result<String, TrackerError> {
        let json = serde_json::to_vec(self).map_err(anyhow::Error::from)?;
        Ok(format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
    }

    pub fn decode(raw: &str) -> Result<Self, TrackerError> {
        let unexpected = || TrackerError::UnexpectedStep(format!("undecodable token '{raw}'"));
        let body = raw.strip_prefix(TOKEN_PREFIX).ok_or_else(unexpected)?;
        let json = URL_SAFE_NO_PAD.decode(body).map_err(|_| unexpected())?;
        serde_json::from_slice(&json).map_err(|_| unexpected())
    }

    /// Decodes a token and checks it belongs to `user` and is waiting for `step`.
    fn for_step(raw: &str, user: UserId, step: FlowStep) -> Result<Self, TrackerError> {
        let token = Self::decode(raw)?;
        if token.user != user {
            return Err(TrackerError::UnexpectedStep(format!(
                "token issued to user {} used by {user}",
                token.user
            )));
        }
        if token.step != step {
            return Err(TrackerError::UnexpectedStep(format!(
                "expected {:?}, token is at {:?}",
                step, token.step
            )));
        }
        Ok(token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchForm {
    pub flow_id: String,
    pub location: String,
    pub pokemon_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathLocationForm {
    pub flow_id: String,
    pub pokemon_name: String,
    pub death_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncaughtDeathForm {
    pub flow_id: String,
    pub location: String,
    pub pokemon_name: String,
}

/// A completed flow, decoded once from the final form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowForm {
    Catch(CatchForm),
    DeathLocation(DeathLocationForm),
    UncaughtDeath(UncaughtDeathForm),
}

impl FlowForm {
    pub fn decode(
        token: FlowToken,
        fields: &BTreeMap<String, String>,
    ) -> Result<Self, TrackerError> {
        let pokemon_name = fields.get(FIELD_POKEMON_NAME).cloned().ok_or_else(|| {
            TrackerError::UnexpectedStep("form is missing the pokemon name".into())
        })?;
        let location = || {
            token
                .location
                .clone()
                .ok_or_else(|| TrackerError::UnexpectedStep("token carries no location".into()))
        };

        Ok(match token.kind {
            FlowKind::NewCatch => FlowForm::Catch(CatchForm {
                location: location()?,
                flow_id: token.flow_id,
                pokemon_name,
            }),
            FlowKind::UncaughtDeath => FlowForm::UncaughtDeath(UncaughtDeathForm {
                location: location()?,
                flow_id: token.flow_id,
                pokemon_name,
            }),
            FlowKind::MoveToDeaths => FlowForm::DeathLocation(DeathLocationForm {
                flow_id: token.flow_id,
                pokemon_name,
                death_location: fields
                    .get(FIELD_DEATH_LOCATION)
                    .map(|value| value.trim())
                    .filter(|value| !value.is_empty())
                    .map(str::to_string),
            }),
        })
    }
}

/// Handles one inbound interaction. Never fails: errors become a private reply to the actor.
pub async fn handle_interaction(ctx: &TrackerContext, event: InteractionEvent) -> InteractionReply {
    let kind = event.interaction.label();
    let user = event.user_id;
    match dispatch(ctx, event).await {
        Ok(reply) => reply,
        Err(err) => {
            if err.is_user_error() {
                warn!(user_id = user.0, kind, error = %err, "interaction rejected");
            } else {
                error!(user_id = user.0, kind, error = %err, "interaction failed");
            }
            InteractionReply::Error(err.into())
        }
    }
}

async fn dispatch(
    ctx: &TrackerContext,
    event: InteractionEvent,
) -> Result<InteractionReply, TrackerError> {
    let user = event.user_id;
    match event.interaction {
        InteractionKind::Command { name } => run_command(ctx, &name).await,
        InteractionKind::ButtonPress { correlation } => {
            let kind = FlowKind::from_start_payload(&correlation).ok_or_else(|| {
                TrackerError::UnexpectedStep(format!("button '{correlation}' starts no flow"))
            })?;
            start_flow(ctx, kind, user).await
        }
        InteractionKind::SelectionMade { correlation, values } => {
            let token = FlowToken::for_step(&correlation, user, FlowStep::ChooseLocation)?;
            location_chosen(ctx, token, &values).await
        }
        InteractionKind::FormSubmitted { correlation, fields } => {
            let token = FlowToken::for_step(&correlation, user, FlowStep::SubmitForm)?;
            let form = FlowForm::decode(token, &fields)?;
            complete(ctx, user, form).await
        }
    }
}

async fn run_command(ctx: &TrackerContext, name: &str) -> Result<InteractionReply, TrackerError> {
    match name {
        "start_new_run" => {
            let run = runs::start_run(ctx).await?;
            Ok(InteractionReply::notice(format!(
                "Started Run #{}! Created category and channels. Good luck!",
                run.run_number
            )))
        }
        "end_run" => {
            let summary = runs::end_run(&ctx.storage).await?;
            Ok(InteractionReply::notice(format!(
                "Ended Run #{}: {} caught, {} dead.",
                summary.run_number, summary.caught, summary.dead
            )))
        }
        "current_run" => match runs::current_run(&ctx.storage).await? {
            Some(run) => {
                let (caught, dead) = ctx.storage.status_counts(run.run_id).await?;
                Ok(InteractionReply::notice(format!(
                    "Run #{} is active: {caught} caught, {dead} dead.",
                    run.run_number
                )))
            }
            None => Ok(InteractionReply::notice("No active run.")),
        },
        other => Err(TrackerError::Validation(format!("Unknown command '{other}'."))),
    }
}

async fn start_flow(
    ctx: &TrackerContext,
    kind: FlowKind,
    user: UserId,
) -> Result<InteractionReply, TrackerError> {
    runs::require_current_run(&ctx.storage).await?;
    match kind {
        FlowKind::NewCatch | FlowKind::UncaughtDeath => {
            let token = FlowToken::start(kind, user, FlowStep::ChooseLocation);
            let options = ctx
                .locations
                .choices()
                .into_iter()
                .map(|(key, label)| SelectOption { key, label })
                .collect();
            Ok(InteractionReply::SelectPrompt {
                correlation: token.encode()?,
                placeholder: "Choose a location".to_string(),
                options,
            })
        }
        FlowKind::MoveToDeaths => {
            let token = FlowToken::start(kind, user, FlowStep::SubmitForm);
            form_prompt(&token)
        }
    }
}

async fn location_chosen(
    ctx: &TrackerContext,
    mut token: FlowToken,
    values: &[String],
) -> Result<InteractionReply, TrackerError> {
    let key = values
        .first()
        .ok_or_else(|| TrackerError::Validation("Please choose a location.".to_string()))?;
    ensure_known_location(ctx, key)?;
    runs::require_current_run(&ctx.storage).await?;

    token.step = FlowStep::SubmitForm;
    token.location = Some(key.clone());
    form_prompt(&token)
}

fn form_prompt(token: &FlowToken) -> Result<InteractionReply, TrackerError> {
    let mut fields = vec![FormField {
        id: FIELD_POKEMON_NAME.to_string(),
        label: match token.kind {
            FlowKind::MoveToDeaths => "Pokemon Name (from catches)".to_string(),
            _ => "Pokemon Name".to_string(),
        },
        required: true,
        max_length: Some(MAX_NAME_LEN as u16),
        placeholder: Some("e.g., Pikachu".to_string()),
    }];
    if token.kind == FlowKind::MoveToDeaths {
        fields.push(FormField {
            id: FIELD_DEATH_LOCATION.to_string(),
            label: "Death Location (route key)".to_string(),
            required: false,
            max_length: Some(MAX_NAME_LEN as u16),
            placeholder: Some("Leave blank to use catch location".to_string()),
        });
    }
    Ok(InteractionReply::FormPrompt {
        correlation: token.encode()?,
        title: token.kind.form_title().to_string(),
        fields,
    })
}

fn ensure_known_location(ctx: &TrackerContext, key: &str) -> Result<(), TrackerError> {
    if ctx.locations.contains(key) {
        Ok(())
    } else {
        Err(TrackerError::Validation(format!("Unknown location '{key}'.")))
    }
}

async fn complete(
    ctx: &TrackerContext,
    user: UserId,
    form: FlowForm,
) -> Result<InteractionReply, TrackerError> {
    let run = runs::require_current_run(&ctx.storage).await?;
    match form {
        FlowForm::Catch(form) => {
            ensure_known_location(ctx, &form.location)?;
            let entry = ledger::record_catch(
                &ctx.storage,
                &run,
                &form.pokemon_name,
                &form.location,
                user,
                Some(&form.flow_id),
            )
            .await?;
            panels::sync_after_commit(ctx, run.run_id, &[PanelKind::Catches]).await;
            Ok(InteractionReply::notice(format!("Added **{}** to catches!", entry.name)))
        }
        FlowForm::UncaughtDeath(form) => {
            ensure_known_location(ctx, &form.location)?;
            let entry = ledger::record_uncaught_death(
                &ctx.storage,
                &run,
                &form.pokemon_name,
                &form.location,
                user,
                Some(&form.flow_id),
            )
            .await?;
            panels::sync_after_commit(ctx, run.run_id, &[PanelKind::Deaths]).await;
            Ok(InteractionReply::notice(format!("Added **{}** to deaths!", entry.name)))
        }
        FlowForm::DeathLocation(form) => {
            if let Some(location) = &form.death_location {
                ensure_known_location(ctx, location)?;
            }
            let entry = ledger::move_to_deaths(
                &ctx.storage,
                &run,
                &form.pokemon_name,
                form.death_location.as_deref(),
                Some(&form.flow_id),
            )
            .await?;
            info!(user_id = user.0, entry_id = entry.entry_id.0, "flow completed");
            panels::sync_after_commit(ctx, run.run_id, &[PanelKind::Catches, PanelKind::Deaths])
                .await;
            Ok(InteractionReply::notice(format!(
                "Moved **{}** to deaths. RIP.",
                entry.name
            )))
        }
    }
}

#[cfg(test)]
#[path = "tests/flows_tests.rs"]
mod tests;
