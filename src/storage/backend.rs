//! Backend seam - one trait, one implementation per database engine
//!
//! The runner only talks to the database through [`Backend`]. Each engine
//! declares its [`Capabilities`] up front; the portable builder consults them
//! when rendering, and Migration Units consult [`BackendKind`] when choosing
//! between the portable path and a native escape hatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::ExecError;
use super::ledger::{LedgerEntry, LedgerRecord, LedgerWrite};
use super::registry::Version;

/// Database engine behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded file database (local/dev)
    Sqlite,
    /// Networked relational server (staging/production)
    Postgres,
}

impl BackendKind {
    /// Detect the backend from a connection URL scheme.
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "sqlite" => Some(BackendKind::Sqlite),
            "postgres" | "postgresql" => Some(BackendKind::Postgres),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgres",
        }
    }

    /// What this engine can do natively as a single operation.
    pub fn capabilities(self) -> Capabilities {
        match self {
            BackendKind::Sqlite => Capabilities {
                transactional_ddl: true,
                add_column_with_reference: false,
                add_unique_column: false,
                add_column_with_expression_default: false,
                add_not_null_column_without_default: false,
                // Bundled SQLite is >= 3.35
                drop_column: true,
            },
            BackendKind::Postgres => Capabilities {
                transactional_ddl: true,
                add_column_with_reference: true,
                add_unique_column: true,
                add_column_with_expression_default: true,
                add_not_null_column_without_default: true,
                drop_column: true,
            },
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Native single-operation support per engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub transactional_ddl: bool,
    pub add_column_with_reference: bool,
    pub add_unique_column: bool,
    pub add_column_with_expression_default: bool,
    pub add_not_null_column_without_default: bool,
    pub drop_column: bool,
}

// ============================================================================
// Live schema description
// ============================================================================

/// Structural description of the live schema (ledger tables excluded).
///
/// Used to audit that `down` followed by `up` restores an equivalent schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSnapshot {
    pub tables: BTreeMap<String, TableShape>,
}

impl SchemaSnapshot {
    pub fn table(&self, name: &str) -> Option<&TableShape> {
        self.tables.get(name)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table)
            .map(|t| t.columns.iter().any(|c| c.name == column))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableShape {
    pub columns: Vec<ColumnShape>,
    pub indexes: Vec<IndexShape>,
    pub foreign_keys: Vec<ForeignKeyShape>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnShape {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct IndexShape {
    pub name: String,
    pub unique: bool,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ForeignKeyShape {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
    pub on_delete: String,
}

// ============================================================================
// Backend trait
// ============================================================================

/// Everything the runner needs from a database.
///
/// Ledger and lock both live in the target database. Implementations never
/// decide ordering or consistency; that is the runner's job.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities {
        self.kind().capabilities()
    }

    /// Create the ledger and lock tables if they do not exist yet.
    async fn ensure_ledger(&self) -> Result<(), sqlx::Error>;

    /// All ledger rows ordered by version. Empty if the ledger was never created.
    async fn ledger_entries(&self) -> Result<Vec<LedgerEntry>, sqlx::Error>;

    async fn insert_entry(&self, record: &LedgerRecord<'_>, dirty: bool) -> Result<(), sqlx::Error>;

    async fn set_dirty(&self, version: Version, dirty: bool) -> Result<(), sqlx::Error>;

    async fn delete_entry(&self, version: Version) -> Result<(), sqlx::Error>;

    /// Run statements and the ledger write as one transaction.
    async fn execute_transactional(
        &self,
        statements: &[String],
        write: &LedgerWrite<'_>,
    ) -> Result<(), ExecError>;

    /// Run statements one by one, each committing on its own.
    async fn execute_statements(&self, statements: &[String]) -> Result<(), ExecError>;

    /// Non-blocking attempt at the exclusive migration lock. Runs before
    /// `ensure_ledger`; a database busy with another runner's write is
    /// `Ok(false)`, not an error.
    async fn try_acquire_lock(&self, holder: &str) -> Result<bool, sqlx::Error>;

    async fn release_lock(&self, holder: &str) -> Result<(), sqlx::Error>;

    /// Remove a lock left behind by a dead process. Returns whether one was removed.
    async fn clear_stale_lock(&self) -> Result<bool, sqlx::Error>;

    async fn describe_schema(&self) -> Result<SchemaSnapshot, sqlx::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(BackendKind::from_url("sqlite://data/game.db"), Some(BackendKind::Sqlite));
        assert_eq!(BackendKind::from_url("sqlite::memory:"), Some(BackendKind::Sqlite));
        assert_eq!(
            BackendKind::from_url("postgres://user:pw@db:5432/stellar"),
            Some(BackendKind::Postgres)
        );
        assert_eq!(
            BackendKind::from_url("postgresql://db/stellar"),
            Some(BackendKind::Postgres)
        );
        assert_eq!(BackendKind::from_url("mysql://db/stellar"), None);
        assert_eq!(BackendKind::from_url(""), None);
    }

    #[test]
    fn test_sqlite_lacks_column_alteration_support() {
        let caps = BackendKind::Sqlite.capabilities();
        assert!(!caps.add_column_with_reference);
        assert!(!caps.add_unique_column);
        assert!(caps.drop_column);

        let caps = BackendKind::Postgres.capabilities();
        assert!(caps.add_column_with_reference);
        assert!(caps.transactional_ddl);
    }

    #[test]
    fn test_snapshot_column_lookup() {
        let mut snapshot = SchemaSnapshot::default();
        snapshot.tables.insert(
            "players".into(),
            TableShape {
                columns: vec![ColumnShape {
                    name: "wallet_address".into(),
                    data_type: "TEXT".into(),
                    nullable: true,
                    default: None,
                    primary_key: false,
                }],
                ..Default::default()
            },
        );
        assert!(snapshot.has_column("players", "wallet_address"));
        assert!(!snapshot.has_column("players", "matrix_user_id"));
        assert!(!snapshot.has_column("notes", "content"));
    }
}
