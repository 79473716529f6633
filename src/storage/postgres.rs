//! PostgreSQL Backend - networked database for staging/production
//!
//! Uses `sqlx` for async queries. The migration lock is a session-level
//! advisory lock, so the connection that took it is parked in the backend
//! until release; it dies with the session if the process is killed.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Postgres;
use tracing::{debug, info};

use super::backend::{
    Backend, BackendKind, ColumnShape, ForeignKeyShape, IndexShape, SchemaSnapshot, TableShape,
};
use super::error::ExecError;
use super::ledger::{LedgerEntry, LedgerRecord, LedgerWrite, LEDGER_TABLE};
use super::registry::Version;

/// Advisory lock key shared by every runner against the same database
const ADVISORY_LOCK_KEY: i64 = 0x5354_454c_4c41_5201;

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS _schema_migrations (
    version     BIGINT PRIMARY KEY,
    name        TEXT NOT NULL,
    checksum    TEXT NOT NULL,
    applied_at  TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
    dirty       BOOLEAN NOT NULL DEFAULT FALSE
)";

const INSERT_ENTRY: &str =
    "INSERT INTO _schema_migrations (version, name, checksum, applied_at, dirty) VALUES ($1, $2, $3, $4, $5)";

const DELETE_ENTRY: &str = "DELETE FROM _schema_migrations WHERE version = $1";

/// PostgreSQL connection pool wrapper
pub struct PostgresBackend {
    pool: PgPool,
    lock_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PostgresBackend {
    /// Connect to PostgreSQL
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        // One extra connection stays parked holding the advisory lock
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1) + 1)
            .connect(database_url)
            .await?;

        info!("PostgreSQL connected (max_connections={})", max_connections);
        Ok(Self::from_pool(pool))
    }

    /// Connect with an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_conn: Mutex::new(None),
        }
    }

    /// Get reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_shape(&self, table: &str) -> Result<TableShape, sqlx::Error> {
        let primary: Vec<String> = sqlx::query_scalar(
            "SELECT a.attname::text
             FROM pg_index i
             JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
             WHERE i.indrelid = $1::regclass AND i.indisprimary",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let columns: Vec<(String, String, bool, Option<String>)> = sqlx::query_as(
            "SELECT column_name::text, data_type::text, is_nullable = 'YES', column_default::text
             FROM information_schema.columns
             WHERE table_schema = current_schema() AND table_name = $1
             ORDER BY ordinal_position",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let indexes: Vec<(String, String)> = sqlx::query_as(
            "SELECT indexname::text, indexdef
             FROM pg_indexes
             WHERE schemaname = current_schema() AND tablename = $1
             ORDER BY indexname",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let foreign_keys: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT kcu.column_name::text, ccu.table_name::text, ccu.column_name::text, rc.delete_rule::text
             FROM information_schema.referential_constraints rc
             JOIN information_schema.key_column_usage kcu
               ON kcu.constraint_name = rc.constraint_name
              AND kcu.constraint_schema = rc.constraint_schema
             JOIN information_schema.constraint_column_usage ccu
               ON ccu.constraint_name = rc.unique_constraint_name
              AND ccu.constraint_schema = rc.unique_constraint_schema
             WHERE kcu.table_schema = current_schema() AND kcu.table_name = $1",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let mut foreign_keys: Vec<ForeignKeyShape> = foreign_keys
            .into_iter()
            .map(|(column, references_table, references_column, on_delete)| ForeignKeyShape {
                column,
                references_table,
                references_column,
                on_delete,
            })
            .collect();
        foreign_keys.sort();

        Ok(TableShape {
            columns: columns
                .into_iter()
                .map(|(name, data_type, nullable, default)| ColumnShape {
                    primary_key: primary.contains(&name),
                    name,
                    data_type,
                    nullable,
                    default,
                })
                .collect(),
            indexes: indexes
                .into_iter()
                .map(|(name, definition)| IndexShape {
                    unique: definition.contains("UNIQUE INDEX"),
                    name,
                    definition,
                })
                .collect(),
            foreign_keys,
        })
    }
}

#[async_trait]
impl Backend for PostgresBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    async fn ensure_ledger(&self) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_LEDGER).execute(&self.pool).await?;
        Ok(())
    }

    async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>, sqlx::Error> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1::text) IS NOT NULL")
            .bind(LEDGER_TABLE)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
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
        let result = sqlx::query("UPDATE _schema_migrations SET dirty = $2 WHERE version = $1")
            .bind(version)
            .bind(dirty)
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

    async fn try_acquire_lock(&self, _holder: &str) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(ADVISORY_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await?;
        if locked {
            *self.lock_conn.lock() = Some(conn);
        }
        Ok(locked)
    }

    async fn release_lock(&self, _holder: &str) -> Result<(), sqlx::Error> {
        let conn = self.lock_conn.lock().take();
        if let Some(mut conn) = conn {
            let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
                .bind(ADVISORY_LOCK_KEY)
                .fetch_one(&mut *conn)
                .await?;
            debug!("Advisory lock released: {}", released);
        }
        Ok(())
    }

    async fn clear_stale_lock(&self) -> Result<bool, sqlx::Error> {
        // Session locks cannot outlive their session
        Ok(false)
    }

    async fn describe_schema(&self) -> Result<SchemaSnapshot, sqlx::Error> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'
             ORDER BY table_name",
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
