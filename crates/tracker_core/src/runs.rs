use chat_gateway::{ChatGateway, GatewayError};
use shared::{domain::ChannelId, protocol::RunSummary};
use storage::{InsertRunOutcome, NewRun, Storage, StoredRun};
use tracing::{error, info, warn};

use crate::{error::TrackerError, panels, TrackerContext};

/// Gateway side effects of a half-finished provisioning, undone in reverse on failure.
#[derive(Default)]
struct Provisioned {
    created: Vec<ChannelId>,
    /// The adopted general channel and the category it goes back to on rollback.
    moved_general: Option<(ChannelId, Option<ChannelId>)>,
}

impl Provisioned {
    /// A concurrent start that won the run number owns the general channel now; hand it to that
    /// run's category instead of the one it was taken from.
    fn yield_general_to(&mut self, winner: &StoredRun) {
        if let Some((general, parent)) = self.moved_general.as_mut() {
            if *general == winner.general_channel_id {
                *parent = Some(winner.category_id);
            }
        }
    }

    async fn rollback(self, gateway: &dyn ChatGateway) {
        if let Some((general, Some(previous_parent))) = self.moved_general {
            if let Err(err) = gateway.move_channel(general, previous_parent).await {
                warn!(channel_id = general.0, error = %err, "could not move general channel back");
            }
        }
        for channel in self.created.into_iter().rev() {
            if let Err(err) = gateway.delete_channel(channel).await {
                warn!(
                    channel_id = channel.0,
                    error = %err,
                    "could not delete channel during rollback"
                );
            }
        }
    }
}

/// Provisions the category and channels of the next run, persists it as the only active run
/// and posts its panels. Losing a race for the run number undoes this start's provisioning and
/// reports `InvalidTransition`.
pub async fn start_run(ctx: &TrackerContext) -> Result<StoredRun, TrackerError> {
    let run_number = ctx.storage.next_run_number().await?;
    let previous = ctx.storage.latest_run().await?;
    let gateway = ctx.gateway.as_ref();
    let mut provisioned = Provisioned::default();

    let channels = match provision(ctx, run_number, previous.as_ref(), &mut provisioned).await {
        Ok(channels) => channels,
        Err(err) => {
            error!(run_number, error = %err, "run provisioning failed");
            provisioned.rollback(gateway).await;
            return Err(TrackerError::ResourceProvisioning(err));
        }
    };

    let inserted = match ctx.storage.insert_active_run(&channels).await {
        Ok(inserted) => inserted,
        Err(err) => {
            error!(run_number, error = %err, "persisting run failed");
            provisioned.rollback(gateway).await;
            return Err(TrackerError::Ledger(err));
        }
    };
    let (run, replaced) = match inserted {
        InsertRunOutcome::Inserted { run, replaced } => (run, replaced),
        InsertRunOutcome::NumberTaken => {
            warn!(run_number, "run number claimed by a concurrent start");
            match ctx.storage.latest_run().await {
                Ok(Some(winner)) => provisioned.yield_general_to(&winner),
                Ok(None) => {}
                Err(err) => warn!(error = %err, "could not read the winning run"),
            }
            provisioned.rollback(gateway).await;
            return Err(TrackerError::InvalidTransition(format!(
                "Run #{run_number} was just started by someone else."
            )));
        }
    };
    info!(
        run_number = run.run_number,
        replaced = replaced.map(|r| r.0),
        category_id = run.category_id.0,
        "run started"
    );

    if panels::post_initial_panels(ctx, &run).await.is_err() {
        warn!(run_number = run.run_number, "run started without all of its panels");
    }

    Ok(ctx
        .storage
        .run(run.run_id)
        .await?
        .unwrap_or(run))
}

async fn provision(
    ctx: &TrackerContext,
    run_number: i64,
    previous: Option<&StoredRun>,
    provisioned: &mut Provisioned,
) -> Result<NewRun, GatewayError> {
    let gateway = ctx.gateway.as_ref();
    let category = gateway.create_category(&format!("Run #{run_number}")).await?;
    provisioned.created.push(category);

    let existing_general = previous
        .map(|run| run.general_channel_id)
        .or(ctx.settings.initial_general_channel);
    let general = match existing_general {
        Some(general) => match gateway.move_channel(general, category).await {
            Ok(()) => {
                provisioned.moved_general = Some((general, previous.map(|run| run.category_id)));
                general
            }
            Err(GatewayError::ChannelNotFound(missing)) if missing == general => {
                warn!(channel_id = general.0, "general channel is gone, creating a new one");
                create_child(gateway, "general", category, provisioned).await?
            }
            Err(err) => return Err(err),
        },
        None => create_child(gateway, "general", category, provisioned).await?,
    };

    let catches = create_child(gateway, "catches", category, provisioned).await?;
    let deaths = create_child(gateway, "deaths", category, provisioned).await?;

    Ok(NewRun {
        run_number,
        category_id: category,
        general_channel_id: general,
        catches_channel_id: catches,
        deaths_channel_id: deaths,
    })
}

async fn create_child(
    gateway: &dyn ChatGateway,
    name: &str,
    parent: ChannelId,
    provisioned: &mut Provisioned,
) -> Result<ChannelId, GatewayError> {
    let channel = gateway.create_text_channel(name, parent).await?;
    provisioned.created.push(channel);
    Ok(channel)
}

pub async fn end_run(storage: &Storage) -> Result<RunSummary, TrackerError> {
    let run = storage
        .deactivate_active_run()
        .await?
        .ok_or(TrackerError::NoActiveRun)?;
    let (caught, dead) = storage.status_counts(run.run_id).await?;
    info!(run_number = run.run_number, caught, dead, "run ended");
    Ok(RunSummary {
        run_number: run.run_number,
        caught,
        dead,
    })
}

pub async fn current_run(storage: &Storage) -> Result<Option<StoredRun>, TrackerError> {
    Ok(storage.current_run().await?)
}

pub async fn require_current_run(storage: &Storage) -> Result<StoredRun, TrackerError> {
    current_run(storage).await?.ok_or(TrackerError::NoActiveRun)
}

#[cfg(test)]
#[path = "tests/runs_tests.rs"]
mod tests;
