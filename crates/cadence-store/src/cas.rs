//! Version-guarded updates.
//!
//! `update_if_version` is the only way a lock holder writes to an item, and
//! `update_unlocked_if_version` the only way anyone else does. The guard and
//! the write are one statement, so a caller acting on a stale snapshot can
//! never overwrite a newer one.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use cadence_core::SchedulerError;

use crate::protocol::{Presence, Table};

/// Column assignments for a guarded update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    columns: Vec<(&'static str, Value)>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` to `column`. A later assignment to the same column wins.
    pub fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }
}

/// Result of [`update_if_version`].
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    Updated(T),
    /// The stored version differs from the expected one.
    Conflict { found: i64 },
    /// Versions match but nobody holds the item.
    NotLocked,
    /// Versions match but the item is locked and only its holder may write.
    Held { worker_id: String },
    /// Unknown id or tombstoned item.
    Missing,
}

impl<T> CasOutcome<T> {
    pub fn into_result(self, kind: &str, id: &str, expected: i64) -> Result<T, SchedulerError> {
        match self {
            CasOutcome::Updated(item) => Ok(item),
            CasOutcome::Conflict { found } => Err(SchedulerError::VersionConflict {
                id: id.to_string(),
                expected,
                found,
            }),
            CasOutcome::NotLocked => Err(SchedulerError::JobAcquisition(format!(
                "{} '{}' must be locked before it is updated",
                kind, id
            ))),
            CasOutcome::Held { worker_id } => Err(SchedulerError::JobAcquisition(format!(
                "{} '{}' is held by '{}' and cannot be changed",
                kind, id, worker_id
            ))),
            CasOutcome::Missing => Err(SchedulerError::not_found(kind, id)),
        }
    }
}

/// Apply `patch` to a locked item if its version is still `expected`.
///
/// Bumps `version` and stamps `updated_at = now` on success.
pub(crate) fn update_if_version<T>(
    conn: &Connection,
    table: &Table<T>,
    id: &str,
    expected: i64,
    patch: &Patch,
    now: i64,
) -> rusqlite::Result<CasOutcome<T>> {
    if let Some(item) = apply(conn, table, id, expected, patch, now, "worker_id IS NOT NULL")? {
        return Ok(CasOutcome::Updated(item));
    }

    Ok(match Presence::read(conn, table, id)? {
        Presence::Missing | Presence::Tombstoned => CasOutcome::Missing,
        Presence::Unlocked { version } if version == expected => CasOutcome::NotLocked,
        Presence::Unlocked { version } | Presence::Locked { version, .. } => {
            CasOutcome::Conflict { found: version }
        }
    })
}

/// Apply `patch` to an item nobody holds if its version is still `expected`.
pub(crate) fn update_unlocked_if_version<T>(
    conn: &Connection,
    table: &Table<T>,
    id: &str,
    expected: i64,
    patch: &Patch,
    now: i64,
) -> rusqlite::Result<CasOutcome<T>> {
    if let Some(item) = apply(conn, table, id, expected, patch, now, "worker_id IS NULL")? {
        return Ok(CasOutcome::Updated(item));
    }

    Ok(match Presence::read(conn, table, id)? {
        Presence::Missing | Presence::Tombstoned => CasOutcome::Missing,
        Presence::Locked { worker_id, version } if version == expected => CasOutcome::Held { worker_id },
        Presence::Unlocked { version } | Presence::Locked { version, .. } => {
            CasOutcome::Conflict { found: version }
        }
    })
}

fn apply<T>(
    conn: &Connection,
    table: &Table<T>,
    id: &str,
    expected: i64,
    patch: &Patch,
    now: i64,
    lock_clause: &str,
) -> rusqlite::Result<Option<T>> {
    let mut assignments = vec!["version = version + 1".to_string(), "updated_at = ?3".to_string()];
    let mut values = vec![
        Value::Text(id.to_string()),
        Value::Integer(expected),
        Value::Integer(now),
    ];
    for (column, value) in &patch.columns {
        values.push(value.clone());
        assignments.push(format!("{} = ?{}", column, values.len()));
    }

    let sql = format!(
        "UPDATE {} SET {} \
         WHERE id = ?1 AND version = ?2 AND {} AND deleted_at IS NULL \
         RETURNING {}",
        table.name,
        assignments.join(", "),
        lock_clause,
        table.columns
    );

    conn.query_row(&sql, params_from_iter(values), table.from_row)
        .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_last_assignment_wins() {
        let patch = Patch::new()
            .set("status", "running".to_string())
            .set("output", Value::Null)
            .set("status", "completed".to_string());

        assert_eq!(patch.len(), 2);
        assert_eq!(
            patch.columns[0],
            ("status", Value::Text("completed".to_string()))
        );
    }

    #[test]
    fn test_conflict_maps_to_version_conflict() {
        let outcome: CasOutcome<()> = CasOutcome::Conflict { found: 7 };
        let err = outcome.into_result("job", "j1", 5).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::VersionConflict { expected: 5, found: 7, .. }
        ));
    }

    #[test]
    fn test_held_maps_to_acquisition_error() {
        let outcome: CasOutcome<()> = CasOutcome::Held {
            worker_id: "w1".to_string(),
        };
        let err = outcome.into_result("recurring rule", "r1", 3).unwrap_err();
        assert!(matches!(err, SchedulerError::JobAcquisition(msg) if msg.contains("'w1'")));
    }

    #[test]
    fn test_missing_maps_to_not_found() {
        let outcome: CasOutcome<()> = CasOutcome::Missing;
        let err = outcome.into_result("job", "j1", 1).unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }
}
