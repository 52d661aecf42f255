use chat_gateway::GatewayError;
use shared::{
    domain::{MessageId, RunId},
    protocol::{PanelAction, PanelContent, PanelKind, PanelLine},
};
use storage::{StoredEntry, StoredRun};
use tracing::{error, info, warn};

use crate::{error::TrackerError, flows::FlowKind, reference::ReferenceData, TrackerContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelRefresh {
    Edited,
    /// The stored message was gone, or never posted; a fresh panel was posted and recorded.
    Reposted,
}

fn actions_for(kind: PanelKind) -> Vec<PanelAction> {
    let flows: &[FlowKind] = match kind {
        PanelKind::Catches => &[FlowKind::NewCatch],
        PanelKind::Deaths => &[FlowKind::MoveToDeaths, FlowKind::UncaughtDeath],
    };
    flows
        .iter()
        .map(|flow| PanelAction {
            label: flow.button_label().to_string(),
            correlation: flow.start_payload().to_string(),
        })
        .collect()
}

/// Builds panel content from entries already in display order.
pub fn render_panel(
    kind: PanelKind,
    run: &StoredRun,
    entries: &[StoredEntry],
    locations: &dyn ReferenceData,
) -> PanelContent {
    let lines = entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| PanelLine {
            position: idx + 1,
            name: entry.name.clone(),
            location: entry.location.clone(),
            location_name: locations.name_of(&entry.location),
        })
        .collect();

    PanelContent {
        kind,
        run_number: run.run_number,
        lines,
        actions: actions_for(kind),
    }
}

async fn load_panel(
    ctx: &TrackerContext,
    run: &StoredRun,
    kind: PanelKind,
) -> Result<PanelContent, TrackerError> {
    let entries = match kind {
        PanelKind::Catches => ctx.storage.list_catches(run.run_id).await?,
        PanelKind::Deaths => ctx.storage.list_deaths(run.run_id).await?,
    };
    Ok(render_panel(kind, run, &entries, ctx.locations.as_ref()))
}

/// Posts both empty panels for a freshly created run and records their message ids. Each kind
/// is attempted even if the other fails; the first failure is returned.
pub async fn post_initial_panels(
    ctx: &TrackerContext,
    run: &StoredRun,
) -> Result<(), TrackerError> {
    let mut first_failure = None;
    for kind in [PanelKind::Catches, PanelKind::Deaths] {
        if let Err(err) = post_panel(ctx, run, kind, run.panel_message(kind)).await {
            error!(run_number = run.run_number, ?kind, error = %err, "panel could not be posted");
            first_failure.get_or_insert(err);
        }
    }
    first_failure.map_or(Ok(()), Err)
}

/// Posts a fresh panel and swaps it in for `replacing`.
async fn post_panel(
    ctx: &TrackerContext,
    run: &StoredRun,
    kind: PanelKind,
    replacing: Option<MessageId>,
) -> Result<MessageId, TrackerError> {
    let content = load_panel(ctx, run, kind).await?;
    let message = ctx
        .gateway
        .post_panel(run.panel_channel(kind), &content)
        .await
        .map_err(TrackerError::GatewayDelivery)?;
    if ctx
        .storage
        .swap_panel_message(run.run_id, kind, replacing, message)
        .await?
    {
        info!(run_number = run.run_number, ?kind, message_id = message.0, "panel posted");
    } else {
        warn!(run_number = run.run_number, ?kind, "panel message id changed concurrently");
    }
    Ok(message)
}

/// Recomputes the panel from the ledger and edits the standing message. Reads the run again so
/// a panel re-posted by a concurrent refresh is edited rather than duplicated. A run whose panel
/// was never posted gets one now.
pub async fn refresh_panel(
    ctx: &TrackerContext,
    run_id: RunId,
    kind: PanelKind,
) -> Result<PanelRefresh, TrackerError> {
    let Some(run) = ctx.storage.run(run_id).await? else {
        return Err(TrackerError::Ledger(anyhow::anyhow!("run {run_id} vanished")));
    };
    let Some(message) = run.panel_message(kind) else {
        error!(run_number = run.run_number, ?kind, "run has no panel message recorded");
        post_panel(ctx, &run, kind, None).await?;
        return Ok(PanelRefresh::Reposted);
    };

    let content = load_panel(ctx, &run, kind).await?;
    match ctx
        .gateway
        .edit_panel(run.panel_channel(kind), message, &content)
        .await
    {
        Ok(()) => Ok(PanelRefresh::Edited),
        Err(GatewayError::MessageNotFound { .. }) => {
            warn!(
                run_number = run.run_number,
                ?kind,
                message_id = message.0,
                "panel message missing, posting a new one"
            );
            post_panel(ctx, &run, kind, Some(message)).await?;
            Ok(PanelRefresh::Reposted)
        }
        Err(err) => Err(TrackerError::GatewayDelivery(err)),
    }
}

pub async fn refresh_catches_panel(
    ctx: &TrackerContext,
    run_id: RunId,
) -> Result<PanelRefresh, TrackerError> {
    refresh_panel(ctx, run_id, PanelKind::Catches).await
}

pub async fn refresh_deaths_panel(
    ctx: &TrackerContext,
    run_id: RunId,
) -> Result<PanelRefresh, TrackerError> {
    refresh_panel(ctx, run_id, PanelKind::Deaths).await
}

/// Refreshes panels after a committed ledger mutation. Failures are logged and swallowed: the
/// mutation stands and the acting player is not told.
pub async fn sync_after_commit(ctx: &TrackerContext, run_id: RunId, kinds: &[PanelKind]) {
    for &kind in kinds {
        if let Err(err) = refresh_panel(ctx, run_id, kind).await {
            error!(run_id = run_id.0, ?kind, error = %err, "panel refresh failed");
        }
    }
}

#[cfg(test)]
#[path = "tests/panels_tests.rs"]
mod tests;
