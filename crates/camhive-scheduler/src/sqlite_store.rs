//! SQLite-backed devices, triggers and captures.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use camhive_core::{Datalake, NewCapture};
use camhive_schema::{
    CaptureRecord, Classification, Device, DeviceConfig, DeviceStatus, TriggerConfig, TriggerKind,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use crate::state::{TriggerRecord, TriggerStatus};
use crate::store::{DeviceDirectory, TriggerStore};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at the given path
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn upsert_device(&self, device: &Device) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO devices (device_id, tenant_id, name, status, trigger_enabled, interval_seconds)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
               ON CONFLICT(device_id) DO UPDATE SET
                   tenant_id = excluded.tenant_id,
                   name = excluded.name,
                   status = excluded.status,
                   trigger_enabled = excluded.trigger_enabled,
                   interval_seconds = excluded.interval_seconds"#,
            params![
                device.device_id,
                device.tenant_id,
                device.name,
                device.status.as_str(),
                device.config.trigger.enabled,
                device.config.trigger.interval_seconds,
            ],
        )?;
        Ok(())
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT device_id, tenant_id, name, status, trigger_enabled, interval_seconds
               FROM devices ORDER BY device_id"#,
        )?;
        let rows = stmt.query_map([], row_to_device)?;

        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?);
        }
        Ok(devices)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Triggers
    // ─────────────────────────────────────────────────────────────────────────

    /// Newest first.
    pub async fn recent_triggers(&self, device_id: &str, limit: usize) -> Result<Vec<TriggerRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT trigger_id, device_id, kind, status, created_at_ms, executed_at_ms,
                      capture_id, error
               FROM triggers WHERE device_id = ?1
               ORDER BY created_at_ms DESC, rowid DESC LIMIT ?2"#,
        )?;
        let rows = stmt.query_map(params![device_id, limit as i64], row_to_trigger)?;

        let mut triggers = Vec::new();
        for row in rows {
            triggers.push(row?);
        }
        Ok(triggers)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Captures
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_capture(&self, record_id: &str) -> Result<Option<CaptureRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                r#"SELECT record_id, device_id, trigger_label, trigger_id, captured_at_ms,
                          ingested_at_ms, image IS NOT NULL, thumbnail IS NOT NULL, classification
                   FROM captures WHERE record_id = ?1"#,
                [record_id],
                row_to_capture,
            )
            .optional()?;
        Ok(record)
    }

    pub async fn count_captures(&self, device_id: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM captures WHERE device_id = ?1",
            [device_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl DeviceDirectory for SqliteStore {
    async fn active_devices(&self) -> Result<Vec<Device>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"SELECT device_id, tenant_id, name, status, trigger_enabled, interval_seconds
               FROM devices WHERE status = 'active' ORDER BY device_id"#,
        )?;
        let rows = stmt.query_map([], row_to_device)?;

        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?);
        }
        Ok(devices)
    }

    async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let conn = self.conn.lock().await;
        let device = conn
            .query_row(
                r#"SELECT device_id, tenant_id, name, status, trigger_enabled, interval_seconds
                   FROM devices WHERE device_id = ?1"#,
                [device_id],
                row_to_device,
            )
            .optional()?;
        Ok(device)
    }

    async fn last_capture_at(&self, device_id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        let ms: Option<i64> = conn.query_row(
            "SELECT MAX(ingested_at_ms) FROM captures WHERE device_id = ?1",
            [device_id],
            |row| row.get(0),
        )?;
        Ok(ms.map(from_ms))
    }
}

#[async_trait]
impl TriggerStore for SqliteStore {
    async fn insert_trigger(&self, record: &TriggerRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO triggers
               (trigger_id, device_id, kind, status, created_at_ms, executed_at_ms, capture_id, error)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            params![
                record.trigger_id,
                record.device_id,
                record.kind.as_str(),
                record.status.as_str(),
                record.created_at.timestamp_millis(),
                record.executed_at.map(|at| at.timestamp_millis()),
                record.capture_id,
                record.error,
            ],
        )?;
        Ok(())
    }

    async fn mark_failed(&self, trigger_id: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE triggers SET status = 'failed', error = ?2 WHERE trigger_id = ?1",
            params![trigger_id, error],
        )?;
        Ok(())
    }

    async fn mark_executed(
        &self,
        trigger_id: &str,
        capture_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            r#"UPDATE triggers SET status = 'executed', executed_at_ms = ?2, capture_id = ?3
               WHERE trigger_id = ?1"#,
            params![trigger_id, at.timestamp_millis(), capture_id],
        )?;
        Ok(changed > 0)
    }

    async fn get_trigger(&self, trigger_id: &str) -> Result<Option<TriggerRecord>> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                r#"SELECT trigger_id, device_id, kind, status, created_at_ms, executed_at_ms,
                          capture_id, error
                   FROM triggers WHERE trigger_id = ?1"#,
                [trigger_id],
                row_to_trigger,
            )
            .optional()?;
        Ok(record)
    }

    async fn last_trigger_at(
        &self,
        device_id: &str,
        kind: TriggerKind,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        let ms: Option<i64> = conn.query_row(
            "SELECT MAX(created_at_ms) FROM triggers WHERE device_id = ?1 AND kind = ?2",
            params![device_id, kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(ms.map(from_ms))
    }
}

#[async_trait]
impl Datalake for SqliteStore {
    async fn store_capture(&self, capture: NewCapture) -> Result<CaptureRecord> {
        let classification = serde_json::to_string(&capture.classification)?;
        let metadata = serde_json::to_string(&capture.metadata)?;
        let record = CaptureRecord {
            record_id: capture.record_id,
            device_id: capture.device_id,
            trigger_label: capture.trigger_label,
            trigger_id: capture.trigger_id,
            captured_at: capture.captured_at,
            ingested_at: capture.ingested_at,
            image_stored: capture.image.is_some(),
            thumbnail_stored: capture.thumbnail.is_some(),
            classification: capture.classification,
        };

        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO captures
               (record_id, device_id, trigger_label, trigger_id, captured_at_ms, ingested_at_ms,
                state, score, classification, metadata, image, thumbnail)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                record.record_id,
                record.device_id,
                record.trigger_label,
                record.trigger_id,
                record.captured_at.timestamp_millis(),
                record.ingested_at.timestamp_millis(),
                record.classification.state.as_str(),
                record.classification.score,
                classification,
                metadata,
                capture.image,
                capture.thumbnail,
            ],
        )?;
        Ok(record)
    }
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_column<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn row_to_device(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        device_id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        status: parse_column::<DeviceStatus>(3, &row.get::<_, String>(3)?)?,
        config: DeviceConfig {
            trigger: TriggerConfig {
                enabled: row.get(4)?,
                interval_seconds: row.get(5)?,
            },
        },
    })
}

fn row_to_trigger(row: &Row<'_>) -> rusqlite::Result<TriggerRecord> {
    let kind = match row.get::<_, String>(2)?.as_str() {
        "manual" => TriggerKind::Manual,
        _ => TriggerKind::Scheduled,
    };
    Ok(TriggerRecord {
        trigger_id: row.get(0)?,
        device_id: row.get(1)?,
        kind,
        status: parse_column::<TriggerStatus>(3, &row.get::<_, String>(3)?)?,
        created_at: from_ms(row.get(4)?),
        executed_at: row.get::<_, Option<i64>>(5)?.map(from_ms),
        capture_id: row.get(6)?,
        error: row.get(7)?,
    })
}

fn row_to_capture(row: &Row<'_>) -> rusqlite::Result<CaptureRecord> {
    let classification: Classification = serde_json::from_str(&row.get::<_, String>(8)?)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(CaptureRecord {
        record_id: row.get(0)?,
        device_id: row.get(1)?,
        trigger_label: row.get(2)?,
        trigger_id: row.get(3)?,
        captured_at: from_ms(row.get(4)?),
        ingested_at: from_ms(row.get(5)?),
        image_stored: row.get(6)?,
        thumbnail_stored: row.get(7)?,
        classification,
    })
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"CREATE TABLE IF NOT EXISTS __camhive_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );"#,
    )?;

    let applied: std::collections::HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT version FROM __camhive_schema_version")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };

    let migrations: Vec<(i64, &str)> = vec![
        (
            1,
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                device_id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                trigger_enabled INTEGER NOT NULL DEFAULT 0,
                interval_seconds INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS triggers (
                trigger_id TEXT PRIMARY KEY,
                device_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                executed_at_ms INTEGER,
                capture_id TEXT,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_triggers_device ON triggers(device_id, kind, created_at_ms DESC);
            "#,
        ),
        (
            2,
            r#"
            CREATE TABLE IF NOT EXISTS captures (
                record_id TEXT PRIMARY KEY,
                device_id TEXT NOT NULL,
                trigger_label TEXT NOT NULL,
                trigger_id TEXT,
                captured_at_ms INTEGER NOT NULL,
                ingested_at_ms INTEGER NOT NULL,
                state TEXT NOT NULL,
                score REAL NOT NULL,
                classification TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT 'null',
                image BLOB,
                thumbnail BLOB
            );

            CREATE INDEX IF NOT EXISTS idx_captures_device ON captures(device_id, ingested_at_ms DESC);
            "#,
        ),
    ];

    for (version, sql) in migrations {
        if !applied.contains(&version) {
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO __camhive_schema_version (version) VALUES (?1)",
                [version],
            )?;
            tracing::debug!(version, "applied camhive migration");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camhive_schema::ClassificationState;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    fn device(id: &str, status: DeviceStatus) -> Device {
        Device {
            device_id: id.into(),
            tenant_id: "tenant-a".into(),
            name: format!("Camera {id}"),
            status,
            config: DeviceConfig {
                trigger: TriggerConfig {
                    enabled: true,
                    interval_seconds: 60,
                },
            },
        }
    }

    fn new_capture(record_id: &str, image: Option<Vec<u8>>) -> NewCapture {
        let now = Utc::now();
        NewCapture {
            record_id: record_id.into(),
            device_id: "cam1".into(),
            trigger_label: "door".into(),
            trigger_id: None,
            captured_at: now,
            ingested_at: now,
            image,
            thumbnail: None,
            metadata: serde_json::json!({"battery": 80}),
            classification: Classification::new(ClassificationState::Alert, 0.9, Some("open".into())),
        }
    }

    #[tokio::test]
    async fn devices_round_trip_and_filter_by_status() {
        let (_dir, store) = setup();
        store.upsert_device(&device("cam1", DeviceStatus::Active)).await.unwrap();
        store.upsert_device(&device("cam2", DeviceStatus::Disabled)).await.unwrap();

        let active = store.active_devices().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0], device("cam1", DeviceStatus::Active));
        assert_eq!(store.list_devices().await.unwrap().len(), 2);

        store.upsert_device(&device("cam2", DeviceStatus::Active)).await.unwrap();
        assert_eq!(store.active_devices().await.unwrap().len(), 2);
        assert!(store.get_device("cam3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trigger_lifecycle() {
        let (_dir, store) = setup();
        let record = TriggerRecord::sent("cam1", TriggerKind::Scheduled, Utc::now());
        store.insert_trigger(&record).await.unwrap();

        let loaded = store.get_trigger(&record.trigger_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TriggerStatus::Sent);
        assert_eq!(loaded.kind, TriggerKind::Scheduled);

        let executed_at = Utc::now();
        assert!(store
            .mark_executed(&record.trigger_id, "rec-1", executed_at)
            .await
            .unwrap());
        let loaded = store.get_trigger(&record.trigger_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TriggerStatus::Executed);
        assert_eq!(loaded.capture_id.as_deref(), Some("rec-1"));
        assert_eq!(
            loaded.executed_at.map(|at| at.timestamp_millis()),
            Some(executed_at.timestamp_millis())
        );

        assert!(!store.mark_executed("nope", "rec-2", Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn failed_trigger_keeps_error() {
        let (_dir, store) = setup();
        let record = TriggerRecord::sent("cam1", TriggerKind::Manual, Utc::now());
        store.insert_trigger(&record).await.unwrap();
        store.mark_failed(&record.trigger_id, "hub closed").await.unwrap();

        let loaded = store.get_trigger(&record.trigger_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TriggerStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("hub closed"));
        assert!(store
            .last_trigger_at("cam1", TriggerKind::Scheduled)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .last_trigger_at("cam1", TriggerKind::Manual)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn captures_store_optional_image() {
        let (_dir, store) = setup();
        assert!(store.last_capture_at("cam1").await.unwrap().is_none());

        store.store_capture(new_capture("r1", Some(vec![1, 2, 3]))).await.unwrap();
        let pruned = store.store_capture(new_capture("r2", None)).await.unwrap();
        assert!(!pruned.image_stored);

        let loaded = store.get_capture("r1").await.unwrap().unwrap();
        assert!(loaded.image_stored);
        assert_eq!(loaded.classification.state, ClassificationState::Alert);
        assert_eq!(loaded.classification.reason.as_deref(), Some("open"));
        assert!(!store.get_capture("r2").await.unwrap().unwrap().image_stored);

        assert_eq!(store.count_captures("cam1").await.unwrap(), 2);
        assert!(store.last_capture_at("cam1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/test.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_device(&device("cam1", DeviceStatus::Active)).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_millisecond_triggers_both_persist() {
        let (_dir, store) = setup();
        let at = Utc::now();
        let first = TriggerRecord::sent("cam1", TriggerKind::Manual, at);
        let mut second = TriggerRecord::sent("cam1", TriggerKind::Manual, at);
        while second.trigger_id == first.trigger_id {
            second = TriggerRecord::sent("cam1", TriggerKind::Manual, at);
        }
        store.insert_trigger(&first).await.unwrap();
        store.insert_trigger(&second).await.unwrap();

        let recent = store.recent_triggers("cam1", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].trigger_id, second.trigger_id);
        assert!(store.recent_triggers("cam2", 10).await.unwrap().is_empty());
    }
}
