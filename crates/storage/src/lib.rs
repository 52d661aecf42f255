use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{ChannelId, EntryId, EntryStatus, MessageId, RunId, UserId},
    protocol::{PanelKind, RunPayload},
};

const RUN_COLUMNS: &str = "id, run_number, active, category_id, general_channel_id, \
     catches_channel_id, deaths_channel_id, catches_panel_message_id, deaths_panel_message_id, \
     created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, run_id, name, location, status, owner_user_id, \
     caught_at, died_at, created_at";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRun {
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
    pub updated_at: DateTime<Utc>,
}

impl StoredRun {
    pub fn panel_channel(&self, kind: PanelKind) -> ChannelId {
        match kind {
            PanelKind::Catches => self.catches_channel_id,
            PanelKind::Deaths => self.deaths_channel_id,
        }
    }

    pub fn panel_message(&self, kind: PanelKind) -> Option<MessageId> {
        match kind {
            PanelKind::Catches => self.catches_panel_message_id,
            PanelKind::Deaths => self.deaths_panel_message_id,
        }
    }

    pub fn to_payload(&self) -> RunPayload {
        RunPayload {
            run_id: self.run_id,
            run_number: self.run_number,
            active: self.active,
            category_id: self.category_id,
            general_channel_id: self.general_channel_id,
            catches_channel_id: self.catches_channel_id,
            deaths_channel_id: self.deaths_channel_id,
            catches_panel_message_id: self.catches_panel_message_id,
            deaths_panel_message_id: self.deaths_panel_message_id,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub entry_id: EntryId,
    pub run_id: RunId,
    pub name: String,
    pub location: String,
    pub status: EntryStatus,
    pub owner_user_id: UserId,
    pub caught_at: Option<DateTime<Utc>>,
    pub died_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub run_number: i64,
    pub category_id: ChannelId,
    pub general_channel_id: ChannelId,
    pub catches_channel_id: ChannelId,
    pub deaths_channel_id: ChannelId,
}

#[derive(Debug, Clone, Copy)]
pub struct NewEntry<'a> {
    pub run_id: RunId,
    pub name: &'a str,
    pub location: &'a str,
    pub status: EntryStatus,
    pub owner_user_id: UserId,
    /// Correlation id of the flow creating the entry; a second insert with the same id is refused.
    pub flow_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertRunOutcome {
    Inserted {
        run: StoredRun,
        replaced: Option<RunId>,
    },
    /// Another start claimed the run number first; nothing was written.
    NumberTaken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertEntryOutcome {
    Inserted(StoredEntry),
    RunInactive,
    DuplicateFlow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkDeadOutcome {
    Marked(StoredEntry),
    NotCaught,
    DuplicateFlow,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    // -- Runs --

    pub async fn next_run_number(&self) -> Result<i64> {
        let next: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(run_number), 0) + 1 FROM runs")
            .fetch_one(&self.pool)
            .await?;
        Ok(next)
    }

    /// Deactivates the current run (if any) and inserts `new_run` as the active run in one
    /// transaction. A run number already taken rolls the transaction back.
    pub async fn insert_active_run(&self, new_run: &NewRun) -> Result<InsertRunOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let replaced = sqlx::query(
            "UPDATE runs SET active = 0, updated_at = ? WHERE active = 1 RETURNING id",
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .map(|r| RunId(r.get::<i64, _>(0)));

        let inserted = sqlx::query(&format!(
            "INSERT INTO runs (run_number, active, category_id, general_channel_id, \
             catches_channel_id, deaths_channel_id, created_at, updated_at)
             VALUES (?, 1, ?, ?, ?, ?, ?, ?)
             RETURNING {RUN_COLUMNS}"
        ))
        .bind(new_run.run_number)
        .bind(new_run.category_id.0)
        .bind(new_run.general_channel_id.0)
        .bind(new_run.catches_channel_id.0)
        .bind(new_run.deaths_channel_id.0)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                return Ok(InsertRunOutcome::NumberTaken);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to insert run #{}", new_run.run_number))
            }
        };
        let run = run_from_row(&row)?;

        tx.commit().await?;
        Ok(InsertRunOutcome::Inserted { run, replaced })
    }

    pub async fn current_run(&self) -> Result<Option<StoredRun>> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE active = 1 ORDER BY run_number DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    pub async fn latest_run(&self) -> Result<Option<StoredRun>> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY run_number DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    pub async fn run(&self, run_id: RunId) -> Result<Option<StoredRun>> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?"))
            .bind(run_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    pub async fn run_by_number(&self, run_number: i64) -> Result<Option<StoredRun>> {
        let row = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE run_number = ?"
        ))
        .bind(run_number)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    pub async fn list_runs(&self) -> Result<Vec<StoredRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM runs ORDER BY run_number ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    /// Flips the active run to inactive. `None` when no run was active.
    pub async fn deactivate_active_run(&self) -> Result<Option<StoredRun>> {
        let row = sqlx::query(&format!(
            "UPDATE runs SET active = 0, updated_at = ? WHERE active = 1 RETURNING {RUN_COLUMNS}"
        ))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    /// Compare-and-set of a panel message id. Only writes when the stored id still equals
    /// `expected`, so a stale writer cannot clobber a newer panel.
    pub async fn swap_panel_message(
        &self,
        run_id: RunId,
        kind: PanelKind,
        expected: Option<MessageId>,
        message_id: MessageId,
    ) -> Result<bool> {
        let column = match kind {
            PanelKind::Catches => "catches_panel_message_id",
            PanelKind::Deaths => "deaths_panel_message_id",
        };
        let result = sqlx::query(&format!(
            "UPDATE runs SET {column} = ?, updated_at = ? WHERE id = ? AND {column} IS ?"
        ))
        .bind(message_id.0)
        .bind(Utc::now())
        .bind(run_id.0)
        .bind(expected.map(|m| m.0))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // -- Entries --

    /// Inserts an entry only while its run is active; the check and the write are one statement.
    pub async fn insert_entry(&self, entry: NewEntry<'_>) -> Result<InsertEntryOutcome> {
        let now = Utc::now();
        let (caught_at, died_at) = match entry.status {
            EntryStatus::Caught => (Some(now), None),
            EntryStatus::Dead => (None, Some(now)),
        };

        let inserted = sqlx::query(&format!(
            "INSERT INTO pokemon_entries (run_id, name, location, status, owner_user_id, flow_id,
                 caught_at, died_at, created_at, updated_at)
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
             WHERE EXISTS (SELECT 1 FROM runs WHERE id = ? AND active = 1)
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(entry.run_id.0)
        .bind(entry.name)
        .bind(entry.location)
        .bind(entry.status.as_str())
        .bind(entry.owner_user_id.0)
        .bind(entry.flow_id)
        .bind(caught_at)
        .bind(died_at)
        .bind(now)
        .bind(now)
        .bind(entry.run_id.0)
        .fetch_optional(&self.pool)
        .await;

        match inserted {
            Ok(Some(row)) => Ok(InsertEntryOutcome::Inserted(entry_from_row(&row)?)),
            Ok(None) => Ok(InsertEntryOutcome::RunInactive),
            Err(err) if is_unique_violation(&err) => Ok(InsertEntryOutcome::DuplicateFlow),
            Err(err) => Err(err.into()),
        }
    }

    /// Caught → Dead as a single conditional update. Entries that are missing or already
    /// dead yield `NotCaught`.
    pub async fn mark_dead(
        &self,
        entry_id: EntryId,
        location_override: Option<&str>,
        death_flow_id: Option<&str>,
    ) -> Result<MarkDeadOutcome> {
        let now = Utc::now();
        let updated = sqlx::query(&format!(
            "UPDATE pokemon_entries
             SET status = 'dead', died_at = ?, location = COALESCE(?, location),
                 death_flow_id = ?, updated_at = ?
             WHERE id = ? AND status = 'caught'
             RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(now)
        .bind(location_override)
        .bind(death_flow_id)
        .bind(now)
        .bind(entry_id.0)
        .fetch_optional(&self.pool)
        .await;

        match updated {
            Ok(Some(row)) => Ok(MarkDeadOutcome::Marked(entry_from_row(&row)?)),
            Ok(None) => Ok(MarkDeadOutcome::NotCaught),
            Err(err) if is_unique_violation(&err) => Ok(MarkDeadOutcome::DuplicateFlow),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn entry(&self, entry_id: EntryId) -> Result<Option<StoredEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM pokemon_entries WHERE id = ?"
        ))
        .bind(entry_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    /// Caught entries of a run in creation order.
    pub async fn list_catches(&self, run_id: RunId) -> Result<Vec<StoredEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM pokemon_entries
             WHERE run_id = ? AND status = 'caught'
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(run_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Dead entries of a run in order of death.
    pub async fn list_deaths(&self, run_id: RunId) -> Result<Vec<StoredEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM pokemon_entries
             WHERE run_id = ? AND status = 'dead'
             ORDER BY died_at ASC, id ASC"
        ))
        .bind(run_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Returns `(caught, dead)` for a run.
    pub async fn status_counts(&self, run_id: RunId) -> Result<(i64, i64)> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) FROM pokemon_entries WHERE run_id = ? GROUP BY status",
        )
        .bind(run_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut caught = 0;
        let mut dead = 0;
        for row in rows {
            let status: EntryStatus = row.get::<String, _>(0).parse()?;
            match status {
                EntryStatus::Caught => caught = row.get::<i64, _>(1),
                EntryStatus::Dead => dead = row.get::<i64, _>(1),
            }
        }
        Ok((caught, dead))
    }
}

fn run_from_row(r: &SqliteRow) -> Result<StoredRun> {
    Ok(StoredRun {
        run_id: RunId(r.try_get::<i64, _>(0)?),
        run_number: r.try_get::<i64, _>(1)?,
        active: r.try_get::<bool, _>(2)?,
        category_id: ChannelId(r.try_get::<i64, _>(3)?),
        general_channel_id: ChannelId(r.try_get::<i64, _>(4)?),
        catches_channel_id: ChannelId(r.try_get::<i64, _>(5)?),
        deaths_channel_id: ChannelId(r.try_get::<i64, _>(6)?),
        catches_panel_message_id: r.try_get::<Option<i64>, _>(7)?.map(MessageId),
        deaths_panel_message_id: r.try_get::<Option<i64>, _>(8)?.map(MessageId),
        created_at: r.try_get::<DateTime<Utc>, _>(9)?,
        updated_at: r.try_get::<DateTime<Utc>, _>(10)?,
    })
}

fn entry_from_row(r: &SqliteRow) -> Result<StoredEntry> {
    let raw_status = r.try_get::<String, _>(4)?;
    let status = raw_status
        .parse::<EntryStatus>()
        .map_err(|e| anyhow!("corrupt pokemon entry row: {e}"))?;
    Ok(StoredEntry {
        entry_id: EntryId(r.try_get::<i64, _>(0)?),
        run_id: RunId(r.try_get::<i64, _>(1)?),
        name: r.try_get::<String, _>(2)?,
        location: r.try_get::<String, _>(3)?,
        status,
        owner_user_id: UserId(r.try_get::<i64, _>(5)?),
        caught_at: r.try_get::<Option<DateTime<Utc>>, _>(6)?,
        died_at: r.try_get::<Option<DateTime<Utc>>, _>(7)?,
        created_at: r.try_get::<DateTime<Utc>, _>(8)?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
