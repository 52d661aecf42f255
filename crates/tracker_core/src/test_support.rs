use std::{collections::BTreeMap, sync::Arc};

use chat_gateway::InMemoryGateway;
use shared::{
    domain::UserId,
    protocol::{InteractionEvent, InteractionKind, InteractionReply, FIELD_POKEMON_NAME},
};
use storage::{Storage, StoredRun};

use crate::{flows::handle_interaction, runs, StaticLocations, TrackerContext, TrackerSettings};

pub(crate) const ASH: UserId = UserId(101);
pub(crate) const MISTY: UserId = UserId(202);

pub(crate) struct Harness {
    pub ctx: TrackerContext,
    pub gateway: InMemoryGateway,
}

pub(crate) fn locations() -> StaticLocations {
    StaticLocations::from_pairs([
        ("route_201", "Route 201"),
        ("route_202", "Route 202"),
        ("route_203", "Route 203"),
        ("lake_verity", "Lake Verity"),
    ])
}

pub(crate) async fn harness() -> Harness {
    harness_with_settings(TrackerSettings::default()).await
}

pub(crate) async fn harness_with_settings(settings: TrackerSettings) -> Harness {
    let storage = Storage::new("sqlite::memory:").await.expect("storage");
    let gateway = InMemoryGateway::new();
    Harness {
        ctx: TrackerContext {
            storage,
            gateway: Arc::new(gateway.clone()),
            locations: Arc::new(locations()),
            settings,
        },
        gateway,
    }
}

pub(crate) async fn harness_with_run() -> (Harness, StoredRun) {
    let harness = harness().await;
    let run = runs::start_run(&harness.ctx).await.expect("start run");
    (harness, run)
}

pub(crate) fn event(user: UserId, interaction: InteractionKind) -> InteractionEvent {
    InteractionEvent {
        user_id: user,
        interaction,
    }
}

pub(crate) fn press(user: UserId, correlation: &str) -> InteractionEvent {
    event(
        user,
        InteractionKind::ButtonPress {
            correlation: correlation.to_string(),
        },
    )
}

pub(crate) fn select(user: UserId, correlation: &str, value: &str) -> InteractionEvent {
    event(
        user,
        InteractionKind::SelectionMade {
            correlation: correlation.to_string(),
            values: vec![value.to_string()],
        },
    )
}

pub(crate) fn submit(user: UserId, correlation: &str, fields: &[(&str, &str)]) -> InteractionEvent {
    event(
        user,
        InteractionKind::FormSubmitted {
            correlation: correlation.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        },
    )
}

pub(crate) fn correlation_of(reply: &InteractionReply) -> String {
    reply
        .correlation()
        .unwrap_or_else(|| panic!("expected a prompt, got {reply:?}"))
        .to_string()
}

/// Drives the catch flow (button, location, form) and returns the final reply.
pub(crate) async fn catch(
    h: &Harness,
    user: UserId,
    name: &str,
    location: &str,
) -> InteractionReply {
    catch_via(h, user, "soul_link:add_catch", name, location).await
}

pub(crate) async fn uncaught_death(
    h: &Harness,
    user: UserId,
    name: &str,
    location: &str,
) -> InteractionReply {
    catch_via(h, user, "soul_link:add_uncaught_death", name, location).await
}

async fn catch_via(
    h: &Harness,
    user: UserId,
    start: &str,
    name: &str,
    location: &str,
) -> InteractionReply {
    let prompt = handle_interaction(&h.ctx, press(user, start)).await;
    let form = handle_interaction(&h.ctx, select(user, &correlation_of(&prompt), location)).await;
    handle_interaction(
        &h.ctx,
        submit(user, &correlation_of(&form), &[(FIELD_POKEMON_NAME, name)]),
    )
    .await
}

pub(crate) fn assert_notice(reply: &InteractionReply) {
    assert!(
        matches!(reply, InteractionReply::Notice { .. }),
        "expected a notice, got {reply:?}"
    );
}
