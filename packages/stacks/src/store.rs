// ABOUTME: Storage layer for stack records in SQLite
// ABOUTME: Provides CRUD operations and single-statement phase transitions

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use thiserror::Error;

use sandstack_gateway::{Bundle, ProviderHandle, Region};

use crate::types::{StackPhase, StackRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Stack not found: {0}")]
    NotFound(String),
    #[error("Stack name already in use: {0}")]
    NameTaken(String),
    #[error("Invalid column value: {0}")]
    InvalidColumn(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const STACK_COLUMNS: &str = r#"id, name, region, instance_name, bundle, notification_topic,
       ttl_seconds, phase, provider_handle, delete_pending, last_error,
       created_at, updated_at, expires_at, deleted_at"#;

/// Storage layer for stack records.
///
/// Every phase transition is a single UPDATE so concurrent readers always
/// observe a consistent snapshot. The partial unique index on live names
/// enforces the one-live-stack-per-name invariant even under concurrent
/// deploys.
pub struct StackStore {
    pool: SqlitePool,
}

impl StackStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist yet
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stacks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                region TEXT NOT NULL,
                instance_name TEXT NOT NULL,
                bundle TEXT NOT NULL,
                notification_topic TEXT,
                ttl_seconds INTEGER NOT NULL,
                phase TEXT NOT NULL,
                provider_handle TEXT,
                delete_pending INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at TEXT,
                deleted_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // New deploys always insert in 'pending', so this index closes the
        // check-then-insert race between concurrent deploys of one name.
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_stacks_live_name
            ON stacks(name)
            WHERE phase IN ('pending', 'provisioning', 'active', 'expiring')
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert(&self, record: &StackRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stacks (
                id, name, region, instance_name, bundle, notification_topic,
                ttl_seconds, phase, provider_handle, delete_pending, last_error,
                created_at, updated_at, expires_at, deleted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(record.region.as_str())
        .bind(&record.instance_name)
        .bind(record.bundle.as_str())
        .bind(&record.notification_topic)
        .bind(record.ttl_seconds as i64)
        .bind(record.phase.as_str())
        .bind(record.provider_handle.as_ref().map(|h| h.0.clone()))
        .bind(record.delete_pending)
        .bind(&record.last_error)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .bind(record.expires_at.map(|d| d.to_rfc3339()))
        .bind(record.deleted_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return StoreError::NameTaken(record.name.clone());
                }
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<StackRecord> {
        let query = format!("SELECT {} FROM stacks WHERE id = ?", STACK_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        row_to_record(row)
    }

    /// Find a record holding `name`: any non-terminal phase, or a failed
    /// delete that sweep still owes to the provider.
    pub async fn find_live_by_name(&self, name: &str) -> Result<Option<StackRecord>> {
        let query = format!(
            r#"
            SELECT {} FROM stacks
            WHERE name = ?
              AND (phase IN ('pending', 'provisioning', 'active', 'expiring', 'terminating')
                   OR (phase = 'failed' AND delete_pending = 1))
            LIMIT 1
            "#,
            STACK_COLUMNS
        );
        let row = sqlx::query(&query).bind(name).fetch_optional(&self.pool).await?;
        row.map(row_to_record).transpose()
    }

    pub async fn list(&self) -> Result<Vec<StackRecord>> {
        let query = format!("SELECT {} FROM stacks ORDER BY created_at ASC", STACK_COLUMNS);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_record).collect()
    }

    /// Records that may need the sweep's attention: anything with resources
    /// behind it that has not settled in Deleted.
    pub async fn list_unsettled(&self) -> Result<Vec<StackRecord>> {
        let query = format!(
            r#"
            SELECT {} FROM stacks
            WHERE phase IN ('active', 'expiring', 'terminating')
               OR (phase = 'failed' AND delete_pending = 1)
            ORDER BY updated_at ASC
            "#,
            STACK_COLUMNS
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_record).collect()
    }

    pub async fn update_phase(
        &self,
        id: &str,
        phase: StackPhase,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE stacks SET phase = ?1, last_error = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(phase.as_str())
            .bind(last_error)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn record_handle(&self, id: &str, handle: &ProviderHandle) -> Result<()> {
        sqlx::query("UPDATE stacks SET provider_handle = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(&handle.0)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Transition to Active and fix the expiry instant, in one statement
    pub async fn mark_active(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE stacks SET phase = 'active', expires_at = ?1, last_error = NULL, updated_at = ?2 WHERE id = ?3",
        )
        .bind(expires_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Transition to Terminating and mark the delete as owed to the provider
    pub async fn mark_terminating(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE stacks SET phase = 'terminating', delete_pending = 1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Transition to Deleted; nothing is owed to the provider anymore
    pub async fn mark_deleted(&self, id: &str, deleted_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE stacks SET phase = 'deleted', delete_pending = 0, deleted_at = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(deleted_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_record(row: SqliteRow) -> Result<StackRecord> {
    let region_str: String = row.get("region");
    let region = Region::from_str(&region_str)
        .ok_or_else(|| StoreError::InvalidColumn(format!("region: {}", region_str)))?;

    let bundle_str: String = row.get("bundle");
    let bundle = Bundle::from_str(&bundle_str)
        .ok_or_else(|| StoreError::InvalidColumn(format!("bundle: {}", bundle_str)))?;

    let phase_str: String = row.get("phase");
    let phase = StackPhase::from_str(&phase_str)
        .ok_or_else(|| StoreError::InvalidColumn(format!("phase: {}", phase_str)))?;

    let handle: Option<String> = row.get("provider_handle");
    let ttl_seconds: i64 = row.get("ttl_seconds");

    Ok(StackRecord {
        id: row.get("id"),
        name: row.get("name"),
        region,
        instance_name: row.get("instance_name"),
        bundle,
        notification_topic: row.get("notification_topic"),
        ttl_seconds: ttl_seconds as u64,
        phase,
        provider_handle: handle.map(ProviderHandle),
        delete_pending: row.get("delete_pending"),
        last_error: row.get("last_error"),
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
        expires_at: parse_optional_timestamp(row.get("expires_at"))?,
        deleted_at: parse_optional_timestamp(row.get("deleted_at"))?,
    })
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidColumn(format!("timestamp: {}", value)))
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_timestamp).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeployRequest;
    use pretty_assertions::assert_eq;

    async fn test_store() -> StackStore {
        // A single connection keeps every query on the same in-memory database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create test database");
        let store = StackStore::new(pool);
        store.init_schema().await.expect("Failed to init schema");
        store
    }

    fn record(id: &str, name: &str) -> StackRecord {
        StackRecord::from_request(id.to_string(), &DeployRequest::new(name), Utc::now())
    }

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let store = test_store().await;
        let original = record("stk_a", "demo");

        store.insert(&original).await.expect("insert failed");
        let loaded = store.get("stk_a").await.expect("get failed");

        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.phase, StackPhase::Pending);
        assert_eq!(loaded.region, original.region);
        assert_eq!(loaded.bundle, original.bundle);
        assert_eq!(loaded.ttl_seconds, original.ttl_seconds);
        assert!(loaded.provider_handle.is_none());
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = test_store().await;
        assert!(matches!(
            store.get("stk_missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_live_name_is_rejected() {
        let store = test_store().await;
        store.insert(&record("stk_a", "demo")).await.unwrap();

        let err = store.insert(&record("stk_b", "demo")).await.unwrap_err();
        assert!(matches!(err, StoreError::NameTaken(name) if name == "demo"));
    }

    #[tokio::test]
    async fn name_is_reusable_after_deletion() {
        let store = test_store().await;
        store.insert(&record("stk_a", "demo")).await.unwrap();
        store.mark_terminating("stk_a").await.unwrap();
        store.mark_deleted("stk_a", Utc::now()).await.unwrap();

        store
            .insert(&record("stk_b", "demo"))
            .await
            .expect("name should be free again");
    }

    #[tokio::test]
    async fn transitions_update_the_right_fields() {
        let store = test_store().await;
        store.insert(&record("stk_a", "demo")).await.unwrap();

        store
            .update_phase("stk_a", StackPhase::Provisioning, None)
            .await
            .unwrap();
        store
            .record_handle("stk_a", &ProviderHandle::from("ph-1"))
            .await
            .unwrap();

        let expires = Utc::now() + chrono::Duration::seconds(60);
        store.mark_active("stk_a", expires).await.unwrap();

        let loaded = store.get("stk_a").await.unwrap();
        assert_eq!(loaded.phase, StackPhase::Active);
        assert_eq!(loaded.provider_handle, Some(ProviderHandle::from("ph-1")));
        let stored_expiry = loaded.expires_at.expect("expires_at should be set");
        assert!((stored_expiry - expires).num_milliseconds().abs() < 1000);

        store.mark_terminating("stk_a").await.unwrap();
        let loaded = store.get("stk_a").await.unwrap();
        assert_eq!(loaded.phase, StackPhase::Terminating);
        assert!(loaded.delete_pending);

        store.mark_deleted("stk_a", Utc::now()).await.unwrap();
        let loaded = store.get("stk_a").await.unwrap();
        assert_eq!(loaded.phase, StackPhase::Deleted);
        assert!(!loaded.delete_pending);
        assert!(loaded.deleted_at.is_some());
        // Fixed at activation, untouched by later transitions
        assert_eq!(loaded.expires_at, Some(stored_expiry));
    }

    #[tokio::test]
    async fn find_live_by_name_sees_owed_deletes() {
        let store = test_store().await;
        store.insert(&record("stk_a", "demo")).await.unwrap();
        store.mark_terminating("stk_a").await.unwrap();
        store
            .update_phase("stk_a", StackPhase::Failed, Some("delete timed out"))
            .await
            .unwrap();

        // The failed delete still owes resources, so the name stays held
        let live = store.find_live_by_name("demo").await.unwrap();
        assert_eq!(live.map(|r| r.id), Some("stk_a".to_string()));

        store.mark_deleted("stk_a", Utc::now()).await.unwrap();
        assert!(store.find_live_by_name("demo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_unsettled_filters_settled_records() {
        let store = test_store().await;

        store.insert(&record("stk_pending", "a")).await.unwrap();

        store.insert(&record("stk_active", "b")).await.unwrap();
        store
            .mark_active("stk_active", Utc::now() + chrono::Duration::seconds(60))
            .await
            .unwrap();

        store.insert(&record("stk_done", "c")).await.unwrap();
        store.mark_terminating("stk_done").await.unwrap();
        store.mark_deleted("stk_done", Utc::now()).await.unwrap();

        store.insert(&record("stk_failed", "d")).await.unwrap();
        store
            .update_phase("stk_failed", StackPhase::Failed, Some("quota exceeded"))
            .await
            .unwrap();

        let unsettled = store.list_unsettled().await.unwrap();
        let ids: Vec<&str> = unsettled.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["stk_active"]);
    }
}
