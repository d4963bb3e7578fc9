//! Poll/lock/release building blocks shared by the three work-item tables.
//!
//! Every helper runs on a connection (or an open `BEGIN IMMEDIATE`
//! transaction) and never spans more than one transaction. The per-store
//! claim statements live with their stores because eligibility differs.

use rusqlite::{params, Connection, OptionalExtension, Row};

use cadence_core::{Cursor, Page, SchedulerError};

/// Static description of one work-item table.
pub(crate) struct Table<T: 'static> {
    pub name: &'static str,
    /// Human name used in error messages.
    pub kind: &'static str,
    pub columns: &'static str,
    pub from_row: fn(&Row<'_>) -> rusqlite::Result<T>,
    pub cursor: fn(&T) -> Cursor,
}

/// Assignments that clear a lock.
pub(crate) const CLEAR_LOCK: &str = "worker_id = NULL, locked_at = NULL, lease_expires_at = NULL";

/// Where a row stands, read after a conditional statement matched nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Presence {
    Missing,
    Tombstoned,
    Unlocked { version: i64 },
    Locked { worker_id: String, version: i64 },
}

impl Presence {
    pub fn read<T>(conn: &Connection, table: &Table<T>, id: &str) -> rusqlite::Result<Self> {
        let sql = format!(
            "SELECT worker_id, version, deleted_at FROM {} WHERE id = ?1",
            table.name
        );
        let row = conn
            .query_row(&sql, params![id], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            })
            .optional()?;

        Ok(match row {
            None => Presence::Missing,
            Some((_, _, Some(_))) => Presence::Tombstoned,
            Some((None, version, None)) => Presence::Unlocked { version },
            Some((Some(worker_id), version, None)) => Presence::Locked { worker_id, version },
        })
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Presence::Missing | Presence::Tombstoned)
    }
}

/// Result of a statement that only applies to a held item.
pub(crate) type Guarded<T> = Result<T, Presence>;

/// Map a failed guard onto the error taxonomy.
pub(crate) fn guard_error(kind: &str, id: &str, worker_id: &str, presence: Presence) -> SchedulerError {
    match presence {
        Presence::Missing | Presence::Tombstoned => SchedulerError::not_found(kind, id),
        Presence::Unlocked { .. } => {
            SchedulerError::JobAcquisition(format!("{} '{}' is not locked", kind, id))
        }
        Presence::Locked { worker_id: holder, .. } => SchedulerError::JobAcquisition(format!(
            "{} '{}' is held by '{}', not '{}'",
            kind, id, holder, worker_id
        )),
    }
}

pub(crate) fn fetch<T>(conn: &Connection, table: &Table<T>, id: &str) -> rusqlite::Result<Option<T>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1 AND deleted_at IS NULL",
        table.columns, table.name
    );
    conn.query_row(&sql, params![id], table.from_row).optional()
}

/// Outcome of a release attempt.
#[derive(Debug)]
pub(crate) enum ReleaseOutcome<T> {
    Released(T),
    /// The item was not locked; returned as stored.
    AlreadyReleased(T),
    /// Unknown id, or a tombstone that has now been purged.
    Missing,
}

impl<T> ReleaseOutcome<T> {
    pub fn into_result(self, kind: &str, id: &str) -> Result<T, SchedulerError> {
        match self {
            ReleaseOutcome::Released(item) | ReleaseOutcome::AlreadyReleased(item) => Ok(item),
            ReleaseOutcome::Missing => Err(SchedulerError::not_found(kind, id)),
        }
    }
}

/// Clear the lock on `id`, applying `extra` assignments in the same statement.
///
/// Parameters available to `extra`: `?1` id, `?2` now.
pub(crate) fn release<T>(
    conn: &Connection,
    table: &Table<T>,
    id: &str,
    now: i64,
    extra: &str,
) -> rusqlite::Result<ReleaseOutcome<T>> {
    let sql = format!(
        "UPDATE {name} SET {clear}, version = version + 1, updated_at = ?2{extra} \
         WHERE id = ?1 AND worker_id IS NOT NULL AND deleted_at IS NULL \
         RETURNING {cols}",
        name = table.name,
        clear = CLEAR_LOCK,
        extra = extra,
        cols = table.columns,
    );
    match conn.query_row(&sql, params![id, now], table.from_row).optional()? {
        Some(item) => Ok(ReleaseOutcome::Released(item)),
        None => settle_unreleased(conn, table, id),
    }
}

/// Resolve a release that matched no locked row.
pub(crate) fn settle_unreleased<T>(
    conn: &Connection,
    table: &Table<T>,
    id: &str,
) -> rusqlite::Result<ReleaseOutcome<T>> {
    match Presence::read(conn, table, id)? {
        Presence::Missing => Ok(ReleaseOutcome::Missing),
        Presence::Tombstoned => {
            purge(conn, table, id)?;
            Ok(ReleaseOutcome::Missing)
        }
        Presence::Unlocked { .. } | Presence::Locked { .. } => match fetch(conn, table, id)? {
            Some(item) => Ok(ReleaseOutcome::AlreadyReleased(item)),
            None => Ok(ReleaseOutcome::Missing),
        },
    }
}

/// Clear the lock on `id` only if `worker_id` still holds it.
///
/// A worker whose lease ran out and was re-claimed gets the row's
/// [`Presence`] instead of clearing the new holder's lock. Parameters
/// available to `extra`: `?1` id, `?2` now.
pub(crate) fn release_held<T>(
    conn: &Connection,
    table: &Table<T>,
    id: &str,
    worker_id: &str,
    now: i64,
    extra: &str,
) -> rusqlite::Result<Guarded<T>> {
    let sql = format!(
        "UPDATE {name} SET {clear}, version = version + 1, updated_at = ?2{extra} \
         WHERE id = ?1 AND worker_id = ?3 AND deleted_at IS NULL \
         RETURNING {cols}",
        name = table.name,
        clear = CLEAR_LOCK,
        extra = extra,
        cols = table.columns,
    );
    match conn
        .query_row(&sql, params![id, now, worker_id], table.from_row)
        .optional()?
    {
        Some(item) => Ok(Ok(item)),
        None => Ok(Err(settle_held(conn, table, id)?)),
    }
}

/// Read where `id` stands after a holder-guarded write missed, purging a
/// tombstone on the way out.
pub(crate) fn settle_held<T>(conn: &Connection, table: &Table<T>, id: &str) -> rusqlite::Result<Presence> {
    let presence = Presence::read(conn, table, id)?;
    if presence == Presence::Tombstoned {
        purge(conn, table, id)?;
    }
    Ok(presence)
}

fn purge<T>(conn: &Connection, table: &Table<T>, id: &str) -> rusqlite::Result<usize> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", table.name);
    conn.execute(&sql, params![id])
}

/// Push the lease of an item held by `worker_id` out to `expires_at`.
pub(crate) fn heartbeat<T>(
    conn: &Connection,
    table: &Table<T>,
    id: &str,
    worker_id: &str,
    now: i64,
    expires_at: Option<i64>,
) -> rusqlite::Result<Guarded<T>> {
    let sql = format!(
        "UPDATE {} SET lease_expires_at = ?3, version = version + 1, updated_at = ?4 \
         WHERE id = ?1 AND worker_id = ?2 AND deleted_at IS NULL \
         RETURNING {}",
        table.name, table.columns
    );
    match conn
        .query_row(&sql, params![id, worker_id, expires_at, now], table.from_row)
        .optional()?
    {
        Some(item) => Ok(Ok(item)),
        None => Ok(Err(Presence::read(conn, table, id)?)),
    }
}

/// Remove an item. Locked items are tombstoned so their holder finds out on
/// its next write; unlocked items are deleted outright.
pub(crate) fn delete<T>(conn: &Connection, table: &Table<T>, id: &str, now: i64) -> rusqlite::Result<bool> {
    let tombstone = format!(
        "UPDATE {} SET deleted_at = ?2, version = version + 1, updated_at = ?2 \
         WHERE id = ?1 AND worker_id IS NOT NULL AND deleted_at IS NULL",
        table.name
    );
    if conn.execute(&tombstone, params![id, now])? > 0 {
        return Ok(true);
    }

    let remove = format!(
        "DELETE FROM {} WHERE id = ?1 AND deleted_at IS NULL",
        table.name
    );
    Ok(conn.execute(&remove, params![id])? > 0)
}

/// Remove every item of a project. Returns how many became invisible.
pub(crate) fn delete_by_project<T>(
    conn: &Connection,
    table: &Table<T>,
    project_id: &str,
    now: i64,
) -> rusqlite::Result<usize> {
    let tombstone = format!(
        "UPDATE {} SET deleted_at = ?2, version = version + 1, updated_at = ?2 \
         WHERE project_id = ?1 AND worker_id IS NOT NULL AND deleted_at IS NULL",
        table.name
    );
    let tombstoned = conn.execute(&tombstone, params![project_id, now])?;

    let remove = format!(
        "DELETE FROM {} WHERE project_id = ?1 AND worker_id IS NULL AND deleted_at IS NULL",
        table.name
    );
    let removed = conn.execute(&remove, params![project_id])?;

    Ok(tombstoned + removed)
}

/// One page of a project's items, newest first.
pub(crate) fn list<T>(
    conn: &Connection,
    table: &Table<T>,
    project_id: &str,
    after: Option<&Cursor>,
    limit: u32,
) -> rusqlite::Result<Page<T>> {
    let sql = format!(
        "SELECT {} FROM {} \
         WHERE project_id = ?1 AND deleted_at IS NULL \
           AND (?2 IS NULL OR created_at < ?2 OR (created_at = ?2 AND id < ?3)) \
         ORDER BY created_at DESC, id DESC \
         LIMIT ?4",
        table.columns, table.name
    );
    let (created_at, id) = match after {
        Some(cursor) => (Some(cursor.created_at.timestamp_millis()), Some(cursor.id.as_str())),
        None => (None, None),
    };

    let mut stmt = conn.prepare(&sql)?;
    let mut items = stmt
        .query_map(
            params![project_id, created_at, id, i64::from(limit) + 1],
            table.from_row,
        )?
        .collect::<rusqlite::Result<Vec<T>>>()?;

    let limit = limit as usize;
    let next_cursor = if items.len() > limit {
        items.truncate(limit);
        items.last().map(|item| (table.cursor)(item).encode())
    } else {
        None
    };

    Ok(Page { items, next_cursor })
}

/// Counts from one reaping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reaped {
    /// Locks cleared because their lease ran out.
    pub released: usize,
    /// Tombstones whose holder is gone.
    pub purged: usize,
}

impl Reaped {
    pub fn total(&self) -> usize {
        self.released + self.purged
    }
}

/// Clear every expired lock and purge tombstones nobody holds any more.
///
/// Parameters available to `extra`: `?1` now.
pub(crate) fn reap<T>(conn: &Connection, table: &Table<T>, now: i64, extra: &str) -> rusqlite::Result<Reaped> {
    let release = format!(
        "UPDATE {} SET {}, version = version + 1, updated_at = ?1{} \
         WHERE worker_id IS NOT NULL AND deleted_at IS NULL \
           AND lease_expires_at IS NOT NULL AND lease_expires_at <= ?1",
        table.name, CLEAR_LOCK, extra
    );
    let released = conn.execute(&release, params![now])?;

    let purge = format!(
        "DELETE FROM {} WHERE deleted_at IS NOT NULL \
           AND (worker_id IS NULL OR (lease_expires_at IS NOT NULL AND lease_expires_at <= ?1))",
        table.name
    );
    let purged = conn.execute(&purge, params![now])?;

    Ok(Reaped { released, purged })
}
