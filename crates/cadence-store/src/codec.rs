//! Row encoding and decoding.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::Row;
use uuid::Uuid;

use cadence_core::{Cursor, Job, RecurringJobRule, ScheduledJobRule};

use crate::protocol::Table;

pub(crate) fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn opt_millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(millis)
}

fn conversion_error<E>(row: &Row<'_>, col: &str, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let idx = row.as_ref().column_index(col).unwrap_or_default();
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

#[derive(Debug)]
struct BadTimestamp(i64);

impl std::fmt::Display for BadTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timestamp {} out of range", self.0)
    }
}

impl std::error::Error for BadTimestamp {}

pub(crate) fn ts(row: &Row<'_>, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: i64 = row.get(col)?;
    DateTime::from_timestamp_millis(raw).ok_or_else(|| conversion_error(row, col, BadTimestamp(raw)))
}

pub(crate) fn opt_ts(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(col)? {
        Some(raw) => DateTime::from_timestamp_millis(raw)
            .map(Some)
            .ok_or_else(|| conversion_error(row, col, BadTimestamp(raw))),
        None => Ok(None),
    }
}

fn parsed<T>(row: &Row<'_>, col: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(col)?;
    raw.parse().map_err(|e| conversion_error(row, col, e))
}

fn json<T: serde::de::DeserializeOwned>(row: &Row<'_>, col: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(row, col, e))
}

fn opt_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, col: &str) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(col)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| conversion_error(row, col, e)),
        None => Ok(None),
    }
}

/// Serialize a value for a TEXT column inside a connection closure.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

const JOB_COLUMNS: &str = "id, project_id, reason, input, output, status, worker_id, version, \
     created_at, updated_at, locked_at, lease_expires_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: parsed::<Uuid>(row, "id")?,
        project_id: row.get("project_id")?,
        reason: json(row, "reason")?,
        input: json(row, "input")?,
        output: opt_json(row, "output")?,
        status: parsed(row, "status")?,
        worker_id: row.get("worker_id")?,
        version: row.get("version")?,
        created_at: ts(row, "created_at")?,
        updated_at: ts(row, "updated_at")?,
        locked_at: opt_ts(row, "locked_at")?,
        lease_expires_at: opt_ts(row, "lease_expires_at")?,
    })
}

fn job_cursor(job: &Job) -> Cursor {
    Cursor::new(job.created_at, job.id.to_string())
}

pub(crate) const JOBS: Table<Job> = Table {
    name: "jobs",
    kind: "job",
    columns: JOB_COLUMNS,
    from_row: job_from_row,
    cursor: job_cursor,
};

const SCHEDULED_COLUMNS: &str = "id, project_id, input, next_run_at, status, processed_at, output, \
     worker_id, version, created_at, updated_at, locked_at, lease_expires_at";

fn scheduled_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledJobRule> {
    Ok(ScheduledJobRule {
        id: parsed::<Uuid>(row, "id")?,
        project_id: row.get("project_id")?,
        input: json(row, "input")?,
        next_run_at: ts(row, "next_run_at")?,
        status: parsed(row, "status")?,
        processed_at: opt_ts(row, "processed_at")?,
        output: opt_json(row, "output")?,
        worker_id: row.get("worker_id")?,
        version: row.get("version")?,
        created_at: ts(row, "created_at")?,
        updated_at: ts(row, "updated_at")?,
        locked_at: opt_ts(row, "locked_at")?,
        lease_expires_at: opt_ts(row, "lease_expires_at")?,
    })
}

fn scheduled_cursor(rule: &ScheduledJobRule) -> Cursor {
    Cursor::new(rule.created_at, rule.id.to_string())
}

pub(crate) const SCHEDULED_RULES: Table<ScheduledJobRule> = Table {
    name: "scheduled_job_rules",
    kind: "scheduled job rule",
    columns: SCHEDULED_COLUMNS,
    from_row: scheduled_from_row,
    cursor: scheduled_cursor,
};

const RECURRING_COLUMNS: &str = "id, project_id, input, cron, next_run_at, disabled, last_error, \
     last_processed_at, worker_id, version, created_at, updated_at, locked_at, lease_expires_at";

fn recurring_from_row(row: &Row<'_>) -> rusqlite::Result<RecurringJobRule> {
    Ok(RecurringJobRule {
        id: parsed::<Uuid>(row, "id")?,
        project_id: row.get("project_id")?,
        input: json(row, "input")?,
        cron: row.get("cron")?,
        next_run_at: ts(row, "next_run_at")?,
        disabled: row.get("disabled")?,
        last_error: row.get("last_error")?,
        last_processed_at: opt_ts(row, "last_processed_at")?,
        worker_id: row.get("worker_id")?,
        version: row.get("version")?,
        created_at: ts(row, "created_at")?,
        updated_at: ts(row, "updated_at")?,
        locked_at: opt_ts(row, "locked_at")?,
        lease_expires_at: opt_ts(row, "lease_expires_at")?,
    })
}

fn recurring_cursor(rule: &RecurringJobRule) -> Cursor {
    Cursor::new(rule.created_at, rule.id.to_string())
}

pub(crate) const RECURRING_RULES: Table<RecurringJobRule> = Table {
    name: "recurring_job_rules",
    kind: "recurring job rule",
    columns: RECURRING_COLUMNS,
    from_row: recurring_from_row,
    cursor: recurring_cursor,
};
