//! Project membership and API keys.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use cadence_core::SchedulerError;

use crate::codec::{millis, opt_ts, ts};
use crate::db::Database;

/// Prefix of generated keys.
const KEY_PREFIX: &str = "cad_";

/// A project-scoped API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub project_id: String,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Idempotent.
    async fn add_member(&self, project_id: &str, user_id: &str) -> Result<(), SchedulerError>;

    async fn remove_member(&self, project_id: &str, user_id: &str) -> Result<bool, SchedulerError>;

    async fn is_member(&self, project_id: &str, user_id: &str) -> Result<bool, SchedulerError>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn issue_key(&self, project_id: &str) -> Result<ApiKey, SchedulerError>;

    async fn revoke_key(&self, key: &str) -> Result<bool, SchedulerError>;

    async fn fetch_key(&self, key: &str) -> Result<Option<ApiKey>, SchedulerError>;

    /// Stamp `last_used_at` on a live key bound to `project_id`.
    ///
    /// Returns `false` for unknown, revoked or foreign keys.
    async fn consume_key(&self, key: &str, project_id: &str) -> Result<bool, SchedulerError>;
}

/// Membership and key tables on the shared database.
#[derive(Clone)]
pub struct SqliteAccessStore {
    db: Database,
}

impl SqliteAccessStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn api_key_from_row(row: &Row<'_>) -> rusqlite::Result<ApiKey> {
    Ok(ApiKey {
        key: row.get("key")?,
        project_id: row.get("project_id")?,
        revoked: row.get("revoked")?,
        created_at: ts(row, "created_at")?,
        last_used_at: opt_ts(row, "last_used_at")?,
    })
}

#[async_trait]
impl MembershipStore for SqliteAccessStore {
    async fn add_member(&self, project_id: &str, user_id: &str) -> Result<(), SchedulerError> {
        let now = millis(self.db.now());
        let (project, user) = (project_id.to_string(), user_id.to_string());
        self.db
            .write(move |tx| {
                tx.execute(
                    "INSERT OR IGNORE INTO project_members (project_id, user_id, created_at) \
                     VALUES (?1, ?2, ?3)",
                    params![project, user, now],
                )
            })
            .await?;

        info!("Added user {} to project {}", user_id, project_id);
        Ok(())
    }

    async fn remove_member(&self, project_id: &str, user_id: &str) -> Result<bool, SchedulerError> {
        let (project, user) = (project_id.to_string(), user_id.to_string());
        let removed = self
            .db
            .write(move |tx| {
                tx.execute(
                    "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                    params![project, user],
                )
            })
            .await?;
        Ok(removed > 0)
    }

    async fn is_member(&self, project_id: &str, user_id: &str) -> Result<bool, SchedulerError> {
        let (project, user) = (project_id.to_string(), user_id.to_string());
        self.db
            .read(move |conn| {
                conn.prepare_cached(
                    "SELECT 1 FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                )?
                .exists(params![project, user])
            })
            .await
    }
}

#[async_trait]
impl ApiKeyStore for SqliteAccessStore {
    async fn issue_key(&self, project_id: &str) -> Result<ApiKey, SchedulerError> {
        let key = format!("{}{}", KEY_PREFIX, Uuid::new_v4().simple());
        let now = millis(self.db.now());
        let project = project_id.to_string();

        let api_key = self
            .db
            .write(move |tx| {
                tx.query_row(
                    "INSERT INTO api_keys (key, project_id, revoked, created_at) \
                     VALUES (?1, ?2, 0, ?3) \
                     RETURNING key, project_id, revoked, created_at, last_used_at",
                    params![key, project, now],
                    api_key_from_row,
                )
            })
            .await?;

        info!("Issued API key for project {}", project_id);
        Ok(api_key)
    }

    async fn revoke_key(&self, key: &str) -> Result<bool, SchedulerError> {
        let key = key.to_string();
        let revoked = self
            .db
            .write(move |tx| {
                tx.execute(
                    "UPDATE api_keys SET revoked = 1 WHERE key = ?1 AND revoked = 0",
                    params![key],
                )
            })
            .await?;
        Ok(revoked > 0)
    }

    async fn fetch_key(&self, key: &str) -> Result<Option<ApiKey>, SchedulerError> {
        let key = key.to_string();
        self.db
            .read(move |conn| {
                conn.query_row(
                    "SELECT key, project_id, revoked, created_at, last_used_at FROM api_keys WHERE key = ?1",
                    params![key],
                    api_key_from_row,
                )
                .optional()
            })
            .await
    }

    async fn consume_key(&self, key: &str, project_id: &str) -> Result<bool, SchedulerError> {
        let now = millis(self.db.now());
        let (key, project) = (key.to_string(), project_id.to_string());
        let updated = self
            .db
            .write(move |tx| {
                tx.execute(
                    "UPDATE api_keys SET last_used_at = ?3 \
                     WHERE key = ?1 AND project_id = ?2 AND revoked = 0",
                    params![key, project, now],
                )
            })
            .await?;

        debug!("API key check for project {}: {}", project_id, updated > 0);
        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cadence_core::ManualClock;
    use chrono::TimeZone;

    async fn setup() -> (SqliteAccessStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()));
        let db = Database::in_memory().await.unwrap().with_clock(clock.clone());
        (SqliteAccessStore::new(db), clock)
    }

    #[tokio::test]
    async fn test_membership() {
        let (store, _) = setup().await;
        assert!(!store.is_member("p1", "alice").await.unwrap());

        store.add_member("p1", "alice").await.unwrap();
        store.add_member("p1", "alice").await.unwrap();
        assert!(store.is_member("p1", "alice").await.unwrap());
        assert!(!store.is_member("p2", "alice").await.unwrap());

        assert!(store.remove_member("p1", "alice").await.unwrap());
        assert!(!store.remove_member("p1", "alice").await.unwrap());
        assert!(!store.is_member("p1", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_consume_key_stamps_last_used() {
        let (store, clock) = setup().await;
        let issued = store.issue_key("p1").await.unwrap();
        assert!(issued.key.starts_with(KEY_PREFIX));
        assert!(issued.last_used_at.is_none());

        clock.advance(chrono::Duration::minutes(5));
        assert!(store.consume_key(&issued.key, "p1").await.unwrap());

        let fetched = store.fetch_key(&issued.key).await.unwrap().unwrap();
        assert_eq!(fetched.last_used_at, Some(issued.created_at + chrono::Duration::minutes(5)));
    }

    #[tokio::test]
    async fn test_consume_key_rejects_foreign_and_revoked() {
        let (store, _) = setup().await;
        let issued = store.issue_key("p1").await.unwrap();

        assert!(!store.consume_key(&issued.key, "p2").await.unwrap());
        assert!(!store.consume_key("cad_unknown", "p1").await.unwrap());

        assert!(store.revoke_key(&issued.key).await.unwrap());
        assert!(!store.revoke_key(&issued.key).await.unwrap());
        assert!(!store.consume_key(&issued.key, "p1").await.unwrap());

        let fetched = store.fetch_key(&issued.key).await.unwrap().unwrap();
        assert!(fetched.revoked);
        assert!(fetched.last_used_at.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_an_error() {
        let (store, _) = setup().await;
        let issued = store.issue_key("p1").await.unwrap();

        let key = issued.key.clone();
        store
            .db
            .write(move |tx| {
                tx.execute(
                    "UPDATE api_keys SET last_used_at = ?2 WHERE key = ?1",
                    params![key, i64::MAX],
                )
            })
            .await
            .unwrap();

        let err = store.fetch_key(&issued.key).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Database(_)));
    }
}
