use shared::{error::ErrorCode, protocol::FIELD_DEATH_LOCATION};

use super::*;
use crate::test_support::*;

fn error_code(reply: &InteractionReply) -> ErrorCode {
    match reply {
        InteractionReply::Error(api) => api.code,
        other => panic!("expected an error reply, got {other:?}"),
    }
}

async fn command(h: &Harness, user: UserId, name: &str) -> InteractionReply {
    let name = name.to_string();
    handle_interaction(&h.ctx, event(user, InteractionKind::Command { name })).await
}

async fn move_to_deaths(h: &Harness, user: UserId, fields: &[(&str, &str)]) -> InteractionReply {
    let prompt = handle_interaction(&h.ctx, press(user, "soul_link:move_to_deaths")).await;
    handle_interaction(&h.ctx, submit(user, &correlation_of(&prompt), fields)).await
}

async fn panel_lines(h: &Harness, kind: PanelKind) -> Vec<(String, String)> {
    let run = h.ctx.storage.current_run().await.expect("query").expect("run");
    let message = run.panel_message(kind).expect("panel message");
    h.gateway
        .panel(message)
        .expect("posted panel")
        .content
        .lines
        .into_iter()
        .map(|line| (line.name, line.location_name))
        .collect()
}

#[tokio::test]
async fn catch_flow_prompts_for_location_then_name() {
    let (h, _run) = harness_with_run().await;

    let prompt = handle_interaction(&h.ctx, press(ASH, "soul_link:add_catch")).await;
    let InteractionReply::SelectPrompt { correlation, options, .. } = &prompt else {
        panic!("expected location selector, got {prompt:?}");
    };
    assert!(correlation.starts_with(TOKEN_PREFIX));
    assert_eq!(options.len(), 4);
    assert_eq!(options[0].key, "route_201");

    let form = handle_interaction(&h.ctx, select(ASH, correlation, "route_201")).await;
    let InteractionReply::FormPrompt { fields, .. } = &form else {
        panic!("expected form, got {form:?}");
    };
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].id, FIELD_POKEMON_NAME);

    let done = handle_interaction(
        &h.ctx,
        submit(ASH, &correlation_of(&form), &[(FIELD_POKEMON_NAME, " Starly ")]),
    )
    .await;
    assert_eq!(done, InteractionReply::notice("Added **Starly** to catches!"));
}

#[tokio::test]
async fn catches_panel_lists_entries_in_order_with_display_names() {
    let (h, _run) = harness_with_run().await;
    assert_notice(&catch(&h, ASH, "Totodile", "route_201").await);
    assert_notice(&catch(&h, MISTY, "Chikorita", "route_202").await);

    assert_eq!(
        panel_lines(&h, PanelKind::Catches).await,
        vec![
            ("Totodile".to_string(), "Route 201".to_string()),
            ("Chikorita".to_string(), "Route 202".to_string()),
        ]
    );
    assert!(panel_lines(&h, PanelKind::Deaths).await.is_empty());
}

#[tokio::test]
async fn uncaught_death_goes_straight_to_the_deaths_panel() {
    let (h, run) = harness_with_run().await;
    assert_eq!(
        uncaught_death(&h, ASH, "Bidoof", "lake_verity").await,
        InteractionReply::notice("Added **Bidoof** to deaths!")
    );

    let deaths = h.ctx.storage.list_deaths(run.run_id).await.expect("deaths");
    assert_eq!(deaths.len(), 1);
    assert!(deaths[0].caught_at.is_none());
    assert!(deaths[0].died_at.is_some());
    assert_eq!(
        panel_lines(&h, PanelKind::Deaths).await,
        vec![("Bidoof".to_string(), "Lake Verity".to_string())]
    );
}

#[tokio::test]
async fn move_to_deaths_matches_names_case_insensitively_and_picks_the_first_catch() {
    let (h, run) = harness_with_run().await;
    assert_notice(&catch(&h, ASH, "Pikachu", "route_201").await);
    assert_notice(&catch(&h, MISTY, "PIKACHU", "route_202").await);

    let reply = move_to_deaths(&h, MISTY, &[(FIELD_POKEMON_NAME, "pikachu")]).await;
    assert_eq!(reply, InteractionReply::notice("Moved **Pikachu** to deaths. RIP."));

    let deaths = h.ctx.storage.list_deaths(run.run_id).await.expect("deaths");
    assert_eq!(deaths.len(), 1);
    assert_eq!(deaths[0].owner_user_id, ASH);
    assert_eq!(deaths[0].location, "route_201");

    assert_eq!(
        panel_lines(&h, PanelKind::Catches).await,
        vec![("PIKACHU".to_string(), "Route 202".to_string())]
    );
    assert_eq!(
        panel_lines(&h, PanelKind::Deaths).await,
        vec![("Pikachu".to_string(), "Route 201".to_string())]
    );
}

#[tokio::test]
async fn death_location_overrides_the_catch_location() {
    let (h, run) = harness_with_run().await;
    assert_notice(&catch(&h, ASH, "Shinx", "route_202").await);

    let reply = move_to_deaths(
        &h,
        ASH,
        &[(FIELD_POKEMON_NAME, "Shinx"), (FIELD_DEATH_LOCATION, "route_203")],
    )
    .await;
    assert_notice(&reply);
    let deaths = h.ctx.storage.list_deaths(run.run_id).await.expect("deaths");
    assert_eq!(deaths[0].location, "route_203");
}

#[tokio::test]
async fn unknown_death_location_is_rejected_without_killing() {
    let (h, run) = harness_with_run().await;
    assert_notice(&catch(&h, ASH, "Shinx", "route_202").await);

    let reply = move_to_deaths(
        &h,
        ASH,
        &[(FIELD_POKEMON_NAME, "Shinx"), (FIELD_DEATH_LOCATION, "mt_coronet")],
    )
    .await;
    assert_eq!(error_code(&reply), ErrorCode::Validation);
    assert_eq!(h.ctx.storage.status_counts(run.run_id).await.expect("counts"), (1, 0));
}

#[tokio::test]
async fn moving_an_unknown_name_is_an_invalid_transition() {
    let (h, _run) = harness_with_run().await;
    let reply = move_to_deaths(&h, ASH, &[(FIELD_POKEMON_NAME, "Mew")]).await;
    assert_eq!(error_code(&reply), ErrorCode::InvalidTransition);
}

#[tokio::test]
async fn replayed_catch_submission_records_once() {
    let (h, run) = harness_with_run().await;
    let prompt = handle_interaction(&h.ctx, press(ASH, "soul_link:add_catch")).await;
    let form = handle_interaction(&h.ctx, select(ASH, &correlation_of(&prompt), "route_201")).await;
    let submission = submit(ASH, &correlation_of(&form), &[(FIELD_POKEMON_NAME, "Starly")]);

    assert_notice(&handle_interaction(&h.ctx, submission.clone()).await);
    let replay = handle_interaction(&h.ctx, submission).await;
    assert_eq!(error_code(&replay), ErrorCode::InvalidTransition);
    assert_eq!(h.ctx.storage.list_catches(run.run_id).await.expect("catches").len(), 1);
}

#[tokio::test]
async fn replayed_move_to_deaths_never_kills_a_second_entry() {
    let (h, run) = harness_with_run().await;
    assert_notice(&catch(&h, ASH, "Geodude", "route_201").await);
    assert_notice(&catch(&h, MISTY, "Geodude", "route_202").await);

    let prompt = handle_interaction(&h.ctx, press(ASH, "soul_link:move_to_deaths")).await;
    let submission = submit(ASH, &correlation_of(&prompt), &[(FIELD_POKEMON_NAME, "Geodude")]);
    assert_notice(&handle_interaction(&h.ctx, submission.clone()).await);

    let replay = handle_interaction(&h.ctx, submission).await;
    assert_eq!(error_code(&replay), ErrorCode::InvalidTransition);
    assert_eq!(h.ctx.storage.status_counts(run.run_id).await.expect("counts"), (1, 1));
}

#[tokio::test]
async fn tokens_are_bound_to_the_user_they_were_issued_to() {
    let (h, _run) = harness_with_run().await;
    let prompt = handle_interaction(&h.ctx, press(ASH, "soul_link:add_catch")).await;
    let hijack =
        handle_interaction(&h.ctx, select(MISTY, &correlation_of(&prompt), "route_201")).await;
    assert_eq!(error_code(&hijack), ErrorCode::UnexpectedStep);
}

#[tokio::test]
async fn events_out_of_step_are_rejected() {
    let (h, run) = harness_with_run().await;
    let prompt = handle_interaction(&h.ctx, press(ASH, "soul_link:add_catch")).await;

    // Form submitted while the flow still waits for a location.
    let early = handle_interaction(
        &h.ctx,
        submit(ASH, &correlation_of(&prompt), &[(FIELD_POKEMON_NAME, "Starly")]),
    )
    .await;
    assert_eq!(error_code(&early), ErrorCode::UnexpectedStep);

    let garbage = handle_interaction(&h.ctx, select(ASH, "soul_link:flow:%%%", "route_201")).await;
    assert_eq!(error_code(&garbage), ErrorCode::UnexpectedStep);

    let stray_button = handle_interaction(&h.ctx, press(ASH, &correlation_of(&prompt))).await;
    assert_eq!(error_code(&stray_button), ErrorCode::UnexpectedStep);

    assert_eq!(h.ctx.storage.status_counts(run.run_id).await.expect("counts"), (0, 0));
}

#[tokio::test]
async fn unknown_locations_and_bad_names_are_validation_errors() {
    let (h, _run) = harness_with_run().await;
    let prompt = handle_interaction(&h.ctx, press(ASH, "soul_link:add_catch")).await;
    let bad_location =
        handle_interaction(&h.ctx, select(ASH, &correlation_of(&prompt), "mt_coronet")).await;
    assert_eq!(error_code(&bad_location), ErrorCode::Validation);

    let blank = catch(&h, ASH, "   ", "route_201").await;
    assert_eq!(error_code(&blank), ErrorCode::Validation);

    let long_name = "x".repeat(51);
    let too_long = catch(&h, ASH, &long_name, "route_201").await;
    assert_eq!(error_code(&too_long), ErrorCode::Validation);
}

#[tokio::test]
async fn flows_need_an_active_run() {
    let h = harness().await;
    let reply = handle_interaction(&h.ctx, press(ASH, "soul_link:add_catch")).await;
    assert_eq!(error_code(&reply), ErrorCode::NoActiveRun);
}

#[tokio::test]
async fn completing_a_flow_after_the_run_ended_is_refused() {
    let (h, _run) = harness_with_run().await;
    let prompt = handle_interaction(&h.ctx, press(ASH, "soul_link:add_catch")).await;
    let form = handle_interaction(&h.ctx, select(ASH, &correlation_of(&prompt), "route_201")).await;
    runs::end_run(&h.ctx.storage).await.expect("end run");

    let reply = handle_interaction(
        &h.ctx,
        submit(ASH, &correlation_of(&form), &[(FIELD_POKEMON_NAME, "Starly")]),
    )
    .await;
    assert_eq!(error_code(&reply), ErrorCode::NoActiveRun);
}

#[tokio::test]
async fn panel_delivery_failures_do_not_reach_the_player() {
    let (h, run) = harness_with_run().await;
    h.gateway.set_panel_delivery_failing(true);

    assert_eq!(
        catch(&h, ASH, "Buneary", "route_203").await,
        InteractionReply::notice("Added **Buneary** to catches!")
    );
    assert_eq!(h.ctx.storage.status_counts(run.run_id).await.expect("counts"), (1, 0));
}

#[tokio::test]
async fn commands_manage_the_run() {
    let h = harness().await;
    let started = command(&h, ASH, "start_new_run").await;
    assert_eq!(
        started,
        InteractionReply::notice("Started Run #1! Created category and channels. Good luck!")
    );
    assert_notice(&catch(&h, ASH, "Starly", "route_201").await);

    let current = command(&h, MISTY, "current_run").await;
    assert_eq!(current, InteractionReply::notice("Run #1 is active: 1 caught, 0 dead."));

    let ended = command(&h, MISTY, "end_run").await;
    assert_eq!(ended, InteractionReply::notice("Ended Run #1: 1 caught, 0 dead."));

    let again = command(&h, MISTY, "end_run").await;
    assert_eq!(error_code(&again), ErrorCode::NoActiveRun);

    let unknown = command(&h, MISTY, "next_gym").await;
    assert_eq!(error_code(&unknown), ErrorCode::Validation);
}

#[test]
fn tokens_survive_the_platform_round_trip() {
    let token = FlowToken {
        kind: FlowKind::NewCatch,
        user: ASH,
        flow_id: Uuid::new_v4().simple().to_string(),
        step: FlowStep::SubmitForm,
        location: Some("route_201".into()),
    };
    let encoded = token.encode().expect("encode");
    assert!(encoded.starts_with(TOKEN_PREFIX));
    assert_eq!(FlowToken::decode(&encoded).expect("decode"), token);
}

#[test]
fn form_decoding_requires_a_location_for_catches() {
    let token = FlowToken {
        kind: FlowKind::NewCatch,
        user: ASH,
        flow_id: "f".into(),
        step: FlowStep::SubmitForm,
        location: None,
    };
    let fields = BTreeMap::from([(FIELD_POKEMON_NAME.to_string(), "Starly".to_string())]);
    assert!(matches!(
        FlowForm::decode(token, &fields),
        Err(TrackerError::UnexpectedStep(_))
    ));
}

#[test]
fn blank_death_location_falls_back_to_none() {
    let token = FlowToken {
        kind: FlowKind::MoveToDeaths,
        user: ASH,
        flow_id: "f".into(),
        step: FlowStep::SubmitForm,
        location: None,
    };
    let fields = BTreeMap::from([
        (FIELD_POKEMON_NAME.to_string(), "Starly".to_string()),
        (FIELD_DEATH_LOCATION.to_string(), "  ".to_string()),
    ]);
    assert_eq!(
        FlowForm::decode(token, &fields).expect("form"),
        FlowForm::DeathLocation(DeathLocationForm {
            flow_id: "f".into(),
            pokemon_name: "Starly".into(),
            death_location: None,
        })
    );
}
