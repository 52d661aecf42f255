//! Catch/death state machine over the ledger store.
//!
//! Entries move Caught → Dead exactly once, or are born Dead. Every guard that matters under
//! concurrency (run still active, entry still caught, flow not replayed) is evaluated by the
//! store inside the writing statement; this module only translates the outcomes.

use shared::domain::{EntryStatus, UserId};
use storage::{InsertEntryOutcome, MarkDeadOutcome, NewEntry, Storage, StoredEntry, StoredRun};
use tracing::info;

use crate::error::TrackerError;

pub const MAX_NAME_LEN: usize = 50;

/// Trims `raw` and checks it fits a panel line.
pub fn normalize_name(raw: &str) -> Result<String, TrackerError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(TrackerError::Validation(
            "Pokemon name cannot be empty.".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(TrackerError::Validation(format!(
            "Pokemon name must be at most {MAX_NAME_LEN} characters."
        )));
    }
    Ok(name.to_string())
}

pub async fn record_catch(
    storage: &Storage,
    run: &StoredRun,
    name: &str,
    location: &str,
    user: UserId,
    flow_id: Option<&str>,
) -> Result<StoredEntry, TrackerError> {
    insert(storage, run, name, location, EntryStatus::Caught, user, flow_id).await
}

pub async fn record_uncaught_death(
    storage: &Storage,
    run: &StoredRun,
    name: &str,
    location: &str,
    user: UserId,
    flow_id: Option<&str>,
) -> Result<StoredEntry, TrackerError> {
    insert(storage, run, name, location, EntryStatus::Dead, user, flow_id).await
}

async fn insert(
    storage: &Storage,
    run: &StoredRun,
    name: &str,
    location: &str,
    status: EntryStatus,
    user: UserId,
    flow_id: Option<&str>,
) -> Result<StoredEntry, TrackerError> {
    let name = normalize_name(name)?;
    let outcome = storage
        .insert_entry(NewEntry {
            run_id: run.run_id,
            name: &name,
            location,
            status,
            owner_user_id: user,
            flow_id,
        })
        .await?;

    match outcome {
        InsertEntryOutcome::Inserted(entry) => {
            info!(
                run_number = run.run_number,
                entry_id = entry.entry_id.0,
                status = %entry.status,
                location = %entry.location,
                "ledger entry recorded"
            );
            Ok(entry)
        }
        InsertEntryOutcome::RunInactive => Err(TrackerError::NoActiveRun),
        InsertEntryOutcome::DuplicateFlow => Err(TrackerError::InvalidTransition(
            "This submission was already recorded.".to_string(),
        )),
    }
}

/// Caught → Dead. Fails with `InvalidTransition` when the entry is already dead or the
/// flow already completed.
pub async fn mark_dead(
    storage: &Storage,
    entry: &StoredEntry,
    location_override: Option<&str>,
    death_flow_id: Option<&str>,
) -> Result<StoredEntry, TrackerError> {
    let not_caught = || {
        TrackerError::InvalidTransition(format!(
            "{} is not in the catches list anymore.",
            entry.name
        ))
    };
    if entry.status.is_terminal() {
        return Err(not_caught());
    }

    match storage
        .mark_dead(entry.entry_id, location_override, death_flow_id)
        .await?
    {
        MarkDeadOutcome::Marked(dead) => {
            info!(
                entry_id = dead.entry_id.0,
                location = %dead.location,
                "entry moved to deaths"
            );
            Ok(dead)
        }
        MarkDeadOutcome::NotCaught => Err(not_caught()),
        MarkDeadOutcome::DuplicateFlow => Err(TrackerError::InvalidTransition(
            "This submission was already recorded.".to_string(),
        )),
    }
}

/// Case-insensitive exact match against the run's caught entries; the earliest catch wins.
pub async fn find_caught_by_name(
    storage: &Storage,
    run: &StoredRun,
    name: &str,
) -> Result<Option<StoredEntry>, TrackerError> {
    let wanted = name.trim().to_lowercase();
    let catches = storage.list_catches(run.run_id).await?;
    Ok(catches
        .into_iter()
        .find(|entry| entry.name.to_lowercase() == wanted))
}

/// Looks up a caught entry by name and marks it dead.
pub async fn move_to_deaths(
    storage: &Storage,
    run: &StoredRun,
    name: &str,
    location_override: Option<&str>,
    death_flow_id: Option<&str>,
) -> Result<StoredEntry, TrackerError> {
    let name = normalize_name(name)?;
    let entry = find_caught_by_name(storage, run, &name)
        .await?
        .ok_or_else(|| {
            TrackerError::InvalidTransition(format!("Could not find {name} in catches!"))
        })?;
    mark_dead(storage, &entry, location_override, death_flow_id).await
}

#[cfg(test)]
#[path = "tests/ledger_tests.rs"]
mod tests;
