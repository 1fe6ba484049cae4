//! SQLite store

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::{Hook, HookColumn, HookDetail, HookFilter, HookStore, MuteKey, MuteRule, MuteRuleStore, StorageError};

const SCHEMA: [&str; 6] = [
    r#"
    CREATE TABLE IF NOT EXISTS hooks (
        hook_id     TEXT PRIMARY KEY,
        alert_name  TEXT NOT NULL,
        instance    TEXT NOT NULL,
        job         TEXT NOT NULL,
        level       TEXT NOT NULL,
        ignored     INTEGER NOT NULL DEFAULT 0,
        status      TEXT NOT NULL,
        starts_at   TEXT NOT NULL,
        ends_at     TEXT,
        updated_at  TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_hooks_starts_at ON hooks (starts_at)",
    "CREATE INDEX IF NOT EXISTS idx_hooks_instance ON hooks (instance, alert_name)",
    r#"
    CREATE TABLE IF NOT EXISTS hook_details (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        hook_id     TEXT NOT NULL,
        status      TEXT NOT NULL,
        req_json    TEXT NOT NULL,
        message     TEXT NOT NULL,
        created_at  TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_hook_details_hook_id ON hook_details (hook_id)",
    r#"
    CREATE TABLE IF NOT EXISTS mute_rules (
        instance    TEXT NOT NULL COLLATE NOCASE,
        alert_name  TEXT NOT NULL COLLATE NOCASE,
        job         TEXT NOT NULL COLLATE NOCASE,
        status      TEXT NOT NULL COLLATE NOCASE,
        forever     INTEGER NOT NULL DEFAULT 0,
        starts_at   TEXT NOT NULL,
        ends_at     TEXT NOT NULL,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL,
        PRIMARY KEY (instance, alert_name, job, status)
    )
    "#,
];

/// Fixed-width UTC text so stored timestamps order lexicographically
fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("Failed to parse timestamp '{}': {}", raw, e)))
}

#[derive(sqlx::FromRow)]
struct HookRow {
    hook_id: String,
    alert_name: String,
    instance: String,
    job: String,
    level: String,
    ignored: i64,
    status: String,
    starts_at: String,
    ends_at: Option<String>,
    updated_at: String,
}

impl TryFrom<HookRow> for Hook {
    type Error = StorageError;

    fn try_from(row: HookRow) -> Result<Self, Self::Error> {
        Ok(Hook {
            hook_id: row.hook_id,
            alert_name: row.alert_name,
            instance: row.instance,
            job: row.job,
            level: row.level,
            ignored: row.ignored != 0,
            status: row.status,
            starts_at: decode_time(&row.starts_at)?,
            ends_at: row.ends_at.as_deref().map(decode_time).transpose()?,
            updated_at: decode_time(&row.updated_at)?,
            hook_details: Vec::new(),
        })
    }
}

#[derive(sqlx::FromRow)]
struct HookDetailRow {
    id: i64,
    hook_id: String,
    status: String,
    req_json: String,
    message: String,
    created_at: String,
}

impl TryFrom<HookDetailRow> for HookDetail {
    type Error = StorageError;

    fn try_from(row: HookDetailRow) -> Result<Self, Self::Error> {
        Ok(HookDetail {
            id: row.id,
            hook_id: row.hook_id,
            status: row.status,
            req_json: row.req_json,
            message: row.message,
            created_at: decode_time(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MuteRuleRow {
    instance: String,
    alert_name: String,
    job: String,
    status: String,
    forever: i64,
    starts_at: String,
    ends_at: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<MuteRuleRow> for MuteRule {
    type Error = StorageError;

    fn try_from(row: MuteRuleRow) -> Result<Self, Self::Error> {
        Ok(MuteRule {
            instance: row.instance,
            alert_name: row.alert_name,
            job: row.job,
            status: row.status,
            forever: row.forever != 0,
            starts_at: decode_time(&row.starts_at)?,
            ends_at: decode_time(&row.ends_at)?,
            created_at: decode_time(&row.created_at)?,
            updated_at: decode_time(&row.updated_at)?,
        })
    }
}

/// Store backed by a SQLite connection pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open a pool, creating the database file when missing
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        info!("Opening SQLite database at {}", url);
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Create tables and indexes that do not exist yet
    pub async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    async fn details_for(&self, hook_id: &str) -> Result<Vec<HookDetail>, StorageError> {
        let rows: Vec<HookDetailRow> = sqlx::query_as(
            r#"
            SELECT id, hook_id, status, req_json, message, created_at
            FROM hook_details
            WHERE hook_id = ?
            ORDER BY id
            "#,
        )
        .bind(hook_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HookDetail::try_from).collect()
    }
}

#[async_trait]
impl HookStore for SqliteStore {
    async fn upsert_hook(&self, hook: &Hook, columns: &[HookColumn]) -> Result<(), StorageError> {
        let assignments: Vec<String> = HookColumn::resolve(columns)
            .iter()
            .map(|c| format!("{0} = excluded.{0}", c.as_str()))
            .chain(std::iter::once("updated_at = excluded.updated_at".to_string()))
            .collect();
        let statement = format!(
            r#"
            INSERT INTO hooks (hook_id, alert_name, instance, job, level, ignored, status, starts_at, ends_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (hook_id) DO UPDATE SET {}
            "#,
            assignments.join(", ")
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(&statement)
            .bind(&hook.hook_id)
            .bind(&hook.alert_name)
            .bind(&hook.instance)
            .bind(&hook.job)
            .bind(&hook.level)
            .bind(if hook.ignored { 1i64 } else { 0i64 })
            .bind(&hook.status)
            .bind(encode_time(&hook.starts_at))
            .bind(hook.ends_at.as_ref().map(encode_time))
            .bind(encode_time(&hook.updated_at))
            .execute(&mut *tx)
            .await?;

        for detail in &hook.hook_details {
            sqlx::query(
                r#"
                INSERT INTO hook_details (hook_id, status, req_json, message, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&hook.hook_id)
            .bind(&detail.status)
            .bind(&detail.req_json)
            .bind(&detail.message)
            .bind(encode_time(&detail.created_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Upserted hook {} with {} details", hook.hook_id, hook.hook_details.len());
        Ok(())
    }

    async fn list_hooks(&self, filter: &HookFilter) -> Result<Vec<Hook>, StorageError> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT hook_id, alert_name, instance, job, level, ignored, status, starts_at, ends_at, updated_at \
             FROM hooks WHERE 1 = 1",
        );

        let equals = [
            ("hook_id", &filter.hook_id),
            ("alert_name", &filter.alert_name),
            ("instance", &filter.instance),
            ("job", &filter.job),
            ("status", &filter.status),
            ("level", &filter.level),
        ];
        for (column, value) in equals {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                query.push(format!(" AND {} = ", column)).push_bind(value.to_string());
            }
        }
        if let Some(from) = &filter.starts_at {
            query.push(" AND starts_at >= ").push_bind(encode_time(from));
        }
        if let Some(until) = &filter.ends_at {
            query
                .push(" AND ends_at IS NOT NULL AND ends_at < ")
                .push_bind(encode_time(until));
        }
        query.push(" ORDER BY starts_at DESC");
        if filter.limit > 0 {
            query.push(" LIMIT ").push_bind(filter.limit as i64);
        }

        let rows = query.build_query_as::<HookRow>().fetch_all(&self.pool).await?;

        let mut hooks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut hook = Hook::try_from(row)?;
            hook.hook_details = self.details_for(&hook.hook_id).await?;
            hooks.push(hook);
        }
        Ok(hooks)
    }
}

#[async_trait]
impl MuteRuleStore for SqliteStore {
    async fn load_all(&self) -> Result<Vec<MuteRule>, StorageError> {
        let rows: Vec<MuteRuleRow> = sqlx::query_as(
            r#"
            SELECT instance, alert_name, job, status, forever, starts_at, ends_at, created_at, updated_at
            FROM mute_rules
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MuteRule::try_from).collect()
    }

    async fn upsert_rule(&self, rule: &MuteRule) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO mute_rules (instance, alert_name, job, status, forever, starts_at, ends_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (instance, alert_name, job, status) DO UPDATE SET
                forever = excluded.forever,
                starts_at = excluded.starts_at,
                ends_at = excluded.ends_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&rule.instance)
        .bind(&rule.alert_name)
        .bind(&rule.job)
        .bind(&rule.status)
        .bind(if rule.forever { 1i64 } else { 0i64 })
        .bind(encode_time(&rule.starts_at))
        .bind(encode_time(&rule.ends_at))
        .bind(encode_time(&rule.created_at))
        .bind(encode_time(&rule.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_rule(&self, key: &MuteKey) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM mute_rules WHERE instance = ? AND alert_name = ? AND job = ? AND status = ?",
        )
        .bind(&key.instance)
        .bind(&key.alert_name)
        .bind(&key.job)
        .bind(&key.status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
