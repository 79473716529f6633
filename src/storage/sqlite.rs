//! SQLite Backend - embedded file database for local/dev
//!
//! Foreign keys are switched on for every pooled connection. The migration
//! lock is a single-row table; a killed process leaves the row behind and
//! `migrate unlock` clears it.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::backend::{
    Backend, BackendKind, ColumnShape, ForeignKeyShape, IndexShape, SchemaSnapshot, TableShape,
};
use super::error::ExecError;
use super::ledger::{LedgerEntry, LedgerRecord, LedgerWrite, LEDGER_TABLE, LOCK_TABLE};
use super::registry::Version;

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS _schema_migrations (
    version     INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    checksum    TEXT NOT NULL,
    applied_at  TIMESTAMP NOT NULL,
    dirty       BOOLEAN NOT NULL DEFAULT 0
)";

const CREATE_LOCK: &str = "CREATE TABLE IF NOT EXISTS _schema_migrations_lock (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    holder      TEXT NOT NULL,
    acquired_at TIMESTAMP NOT NULL
)";

const INSERT_ENTRY: &str =
    "INSERT INTO _schema_migrations (version, name, checksum, applied_at, dirty) VALUES (?, ?, ?, ?, ?)";

const DELETE_ENTRY: &str = "DELETE FROM _schema_migrations WHERE version = ?";

/// SQLITE_BUSY or SQLITE_LOCKED, extended codes included.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map_or(false, |code| matches!(code & 0xff, 5 | 6)),
        _ => false,
    }
}

/// SQLite connection pool wrapper
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Connect from a `sqlite:` URL, creating the file if missing.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Every connection to `:memory:` is its own database
        let max_connections = if url.contains(":memory:") { 1 } else { max_connections };
        Self::connect_with(options, max_connections).await
    }

    pub async fn connect_with(options: SqliteConnectOptions, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options.foreign_keys(true))
            .await?;

        info!("SQLite connected (max_connections={})", max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_lock_row(&self, holder: &str) -> Result<bool, sqlx::Error> {
        sqlx::query(CREATE_LOCK).execute(&self.pool).await?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO _schema_migrations_lock (id, holder, acquired_at) VALUES (1, ?, ?)",
        )
        .bind(holder)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn table_shape(&self, table: &str) -> Result<TableShape, sqlx::Error> {
        let columns: Vec<(String, String, i64, Option<String>, i64)> = sqlx::query_as(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let index_list: Vec<(String, i64)> =
            sqlx::query_as("SELECT name, \"unique\" FROM pragma_index_list(?) ORDER BY name")
                .bind(table)
                .fetch_all(&self.pool)
                .await?;

        let mut indexes = Vec::with_capacity(index_list.len());
        for (name, unique) in index_list {
            let columns: Vec<Option<String>> =
                sqlx::query_scalar("SELECT name FROM pragma_index_info(?) ORDER BY seqno")
                    .bind(&name)
                    .fetch_all(&self.pool)
                    .await?;
            let columns: Vec<String> = columns.into_iter().map(Option::unwrap_or_default).collect();
            indexes.push(IndexShape {
                definition: format!("{} ({})", table, columns.join(", ")),
                name,
                unique: unique != 0,
            });
        }

        let foreign_keys: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
            "SELECT \"from\", \"table\", \"to\", on_delete FROM pragma_foreign_key_list(?) ORDER BY id, seq",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut foreign_keys: Vec<ForeignKeyShape> = foreign_keys
            .into_iter()
            .map(|(column, references_table, to, on_delete)| ForeignKeyShape {
                column,
                references_table,
                references_column: to.unwrap_or_default(),
                on_delete,
            })
            .collect();
        foreign_keys.sort();

        Ok(TableShape {
            columns: columns
                .into_iter()
                .map(|(name, data_type, notnull, default, pk)| ColumnShape {
                    name,
                    data_type,
                    nullable: notnull == 0,
                    default,
                    primary_key: pk > 0,
                })
                .collect(),
            indexes,
            foreign_keys,
        })
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn ensure_ledger(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_LEDGER).execute(&self.pool).await?;
        sqlx::query(CREATE_LOCK).execute(&self.pool).await?;
        Ok(())
    }

    async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(LEDGER_TABLE)
                .fetch_one(&self.pool)
                .await?;
        if exists == 0 {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, LedgerEntry>(
            "SELECT version, name, checksum, applied_at, dirty FROM _schema_migrations ORDER BY version",
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn insert_entry(&self, record: &LedgerRecord<'_>, dirty: bool) -> Result<(), sqlx::Error> {
        sqlx::query(INSERT_ENTRY)
            .bind(record.version)
            .bind(record.name)
            .bind(record.checksum)
            .bind(Utc::now())
            .bind(dirty)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_dirty(&self, version: Version, dirty: bool) -> Result<(), sqlx::Error> {
        let result = sqlx::query("UPDATE _schema_migrations SET dirty = ? WHERE version = ?")
            .bind(dirty)
            .bind(version)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    async fn delete_entry(&self, version: Version) -> Result<(), sqlx::Error> {
        sqlx::query(DELETE_ENTRY).bind(version).execute(&self.pool).await?;
        Ok(())
    }

    async fn execute_transactional(
        &self,
        statements: &[String],
        write: &LedgerWrite<'_>,
    ) -> Result<(), ExecError> {
        let mut tx = self.pool.begin().await.map_err(ExecError::Transaction)?;

        for (index, statement) in statements.iter().enumerate() {
            sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(statement.as_str()))
                .await
                .map_err(|source| ExecError::Statement {
                    index,
                    statement: statement.clone(),
                    source,
                })?;
        }

        match write {
            LedgerWrite::Applied(record) => {
                sqlx::query(INSERT_ENTRY)
                    .bind(record.version)
                    .bind(record.name)
                    .bind(record.checksum)
                    .bind(Utc::now())
                    .bind(false)
                    .execute(&mut *tx)
                    .await
                    .map_err(ExecError::Ledger)?;
            }
            LedgerWrite::Reverted(version) => {
                sqlx::query(DELETE_ENTRY)
                    .bind(*version)
                    .execute(&mut *tx)
                    .await
                    .map_err(ExecError::Ledger)?;
            }
        }

        tx.commit().await.map_err(ExecError::Transaction)
    }

    async fn execute_statements(&self, statements: &[String]) -> Result<(), ExecError> {
        for (index, statement) in statements.iter().enumerate() {
            sqlx::raw_sql(statement.as_str())
                .execute(&self.pool)
                .await
                .map_err(|source| ExecError::Statement {
                    index,
                    statement: statement.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn try_acquire_lock(&self, holder: &str) -> Result<bool, sqlx::Error> {
        match self.insert_lock_row(holder).await {
            Ok(taken) => Ok(taken),
            // Another runner is mid-write; let the backoff loop retry
            Err(e) if is_busy(&e) => {
                debug!("Lock attempt hit a busy database: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn release_lock(&self, holder: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM _schema_migrations_lock WHERE id = 1 AND holder = ?")
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_stale_lock(&self) -> Result<bool, sqlx::Error> {
        let exists: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(LOCK_TABLE)
                .fetch_one(&self.pool)
                .await?;
        if exists == 0 {
            return Ok(false);
        }
        let result = sqlx::query("DELETE FROM _schema_migrations_lock")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn describe_schema(&self) -> Result<SchemaSnapshot, sqlx::Error> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = SchemaSnapshot::default();
        for table in tables.into_iter().filter(|t| !t.starts_with(LEDGER_TABLE)) {
            let shape = self.table_shape(&table).await?;
            snapshot.tables.insert(table, shape);
        }
        Ok(snapshot)
    }
}
