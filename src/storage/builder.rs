//! Portable schema builder
//!
//! Migration Units describe tables, columns and indexes once; rendering turns
//! each [`Operation`] into one statement for the connected backend. When the
//! backend cannot express an operation natively, rendering fails with
//! [`UnsupportedOperation`] instead of emulating it (no table rebuilds).
//! Units that still need the change on that backend use a native escape hatch
//! (see [`super::registry::Transformation::native`]).

use std::fmt;

use super::backend::BackendKind;

/// Rendering failure: the backend has no native single operation for this.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{backend} cannot {operation} natively: {reason}")]
pub struct UnsupportedOperation {
    pub backend: BackendKind,
    pub operation: String,
    pub reason: &'static str,
}

// ============================================================================
// Column types and values
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing 64-bit primary key
    Id,
    BigInt,
    Integer,
    Text,
    Boolean,
    Timestamp,
    /// Structured payload, opaque to the schema
    Json,
}

impl ColumnType {
    fn sql(self, backend: BackendKind) -> &'static str {
        match (self, backend) {
            (ColumnType::Id, BackendKind::Sqlite) => "INTEGER PRIMARY KEY AUTOINCREMENT",
            (ColumnType::Id, BackendKind::Postgres) => "BIGSERIAL PRIMARY KEY",
            (ColumnType::BigInt, BackendKind::Sqlite) => "INTEGER",
            (ColumnType::BigInt, BackendKind::Postgres) => "BIGINT",
            (ColumnType::Integer, _) => "INTEGER",
            (ColumnType::Text, _) => "TEXT",
            (ColumnType::Boolean, _) => "BOOLEAN",
            (ColumnType::Timestamp, BackendKind::Sqlite) => "TIMESTAMP",
            (ColumnType::Timestamp, BackendKind::Postgres) => "TIMESTAMP WITH TIME ZONE",
            (ColumnType::Json, BackendKind::Sqlite) => "TEXT",
            (ColumnType::Json, BackendKind::Postgres) => "JSONB",
        }
    }
}

/// Literal used in defaults and backfills
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(&'static str),
    Json(&'static str),
    CurrentTimestamp,
}

impl SqlValue {
    fn render(&self, backend: BackendKind) -> String {
        match (self, backend) {
            (SqlValue::Null, _) => "NULL".into(),
            (SqlValue::Bool(true), BackendKind::Sqlite) => "1".into(),
            (SqlValue::Bool(false), BackendKind::Sqlite) => "0".into(),
            (SqlValue::Bool(true), BackendKind::Postgres) => "TRUE".into(),
            (SqlValue::Bool(false), BackendKind::Postgres) => "FALSE".into(),
            (SqlValue::Int(i), _) => i.to_string(),
            (SqlValue::Text(s), _) => quote(s),
            (SqlValue::Json(s), BackendKind::Sqlite) => quote(s),
            (SqlValue::Json(s), BackendKind::Postgres) => format!("{}::jsonb", quote(s)),
            (SqlValue::CurrentTimestamp, BackendKind::Sqlite) => "CURRENT_TIMESTAMP".into(),
            (SqlValue::CurrentTimestamp, BackendKind::Postgres) => "NOW()".into(),
        }
    }

    fn is_expression(&self) -> bool {
        matches!(self, SqlValue::CurrentTimestamp)
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// `column IN ('a', 'b', ...)` for closed-set CHECK constraints.
pub fn check_in(column: &str, values: &[&str]) -> String {
    let list: Vec<String> = values.iter().map(|v| quote(v)).collect();
    format!("{} IN ({})", column, list.join(", "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    NoAction,
    Cascade,
    SetNull,
    Restrict,
}

impl OnDelete {
    fn clause(self) -> &'static str {
        match self {
            OnDelete::NoAction => "",
            OnDelete::Cascade => " ON DELETE CASCADE",
            OnDelete::SetNull => " ON DELETE SET NULL",
            OnDelete::Restrict => " ON DELETE RESTRICT",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
    pub on_delete: OnDelete,
}

// ============================================================================
// Definitions
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<SqlValue>,
    pub unique: bool,
    pub check: Option<String>,
    pub references: Option<ForeignKey>,
}

impl ColumnDef {
    /// Nullable column with no default.
    pub fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
            default: None,
            unique: false,
            check: None,
            references: None,
        }
    }

    pub fn id() -> Self {
        Self::new("id", ColumnType::Id).not_null()
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default(mut self, value: SqlValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn check(mut self, expr: impl Into<String>) -> Self {
        self.check = Some(expr.into());
        self
    }

    pub fn references(mut self, table: &'static str, column: &'static str, on_delete: OnDelete) -> Self {
        self.references = Some(ForeignKey {
            table,
            column,
            on_delete,
        });
        self
    }

    fn render(&self, backend: BackendKind) -> String {
        let mut sql = format!("{} {}", self.name, self.ty.sql(backend));
        if !self.nullable && self.ty != ColumnType::Id {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.render(backend));
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" CHECK ({})", check));
        }
        if let Some(fk) = &self.references {
            sql.push_str(&format!(" REFERENCES {} ({}){}", fk.table, fk.column, fk.on_delete.clause()));
        }
        sql
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<&'static str>,
    pub uniques: Vec<(&'static str, Vec<&'static str>)>,
    pub checks: Vec<(&'static str, String)>,
}

impl TableDef {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            columns: Vec::new(),
            primary_key: Vec::new(),
            uniques: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Composite primary key
    pub fn primary_key(mut self, columns: &[&'static str]) -> Self {
        self.primary_key = columns.to_vec();
        self
    }

    pub fn unique(mut self, name: &'static str, columns: &[&'static str]) -> Self {
        self.uniques.push((name, columns.to_vec()));
        self
    }

    pub fn check(mut self, name: &'static str, expr: impl Into<String>) -> Self {
        self.checks.push((name, expr.into()));
        self
    }

    fn render(&self, backend: BackendKind) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(|c| c.render(backend)).collect();
        if !self.primary_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.primary_key.join(", ")));
        }
        for (name, columns) in &self.uniques {
            parts.push(format!("CONSTRAINT {} UNIQUE ({})", name, columns.join(", ")));
        }
        for (name, expr) in &self.checks {
            parts.push(format!("CONSTRAINT {} CHECK ({})", name, expr));
        }
        format!("CREATE TABLE {} ({})", self.name, parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: &'static str,
    pub table: &'static str,
    pub columns: Vec<&'static str>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: &'static str, table: &'static str, columns: &[&'static str]) -> Self {
        Self {
            name,
            table,
            columns: columns.to_vec(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn render(&self) -> String {
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            self.table,
            self.columns.join(", ")
        )
    }
}

/// One-time bulk conditional update that brings existing rows in line with a
/// constraint introduced by the same unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Backfill {
    pub table: &'static str,
    pub assignments: Vec<(&'static str, SqlValue)>,
    pub filters: Vec<(&'static str, SqlValue)>,
}

impl Backfill {
    pub fn table(table: &'static str) -> Self {
        Self {
            table,
            assignments: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn set(mut self, column: &'static str, value: SqlValue) -> Self {
        self.assignments.push((column, value));
        self
    }

    /// Restrict to rows where `column = value` (`IS NULL` for [`SqlValue::Null`]).
    pub fn filter(mut self, column: &'static str, value: SqlValue) -> Self {
        self.filters.push((column, value));
        self
    }

    fn render(&self, backend: BackendKind) -> String {
        let sets: Vec<String> = self
            .assignments
            .iter()
            .map(|(col, value)| format!("{} = {}", col, value.render(backend)))
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.table, sets.join(", "));
        if !self.filters.is_empty() {
            let predicates: Vec<String> = self
                .filters
                .iter()
                .map(|(col, value)| match value {
                    SqlValue::Null => format!("{} IS NULL", col),
                    other => format!("{} = {}", col, other.render(backend)),
                })
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        sql
    }
}

// ============================================================================
// Operations
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateTable(TableDef),
    DropTable(&'static str),
    AddColumn { table: &'static str, column: ColumnDef },
    DropColumn { table: &'static str, column: &'static str },
    CreateIndex(IndexDef),
    DropIndex(&'static str),
    Backfill(Backfill),
}

impl Operation {
    pub fn add_column(table: &'static str, column: ColumnDef) -> Self {
        Operation::AddColumn { table, column }
    }

    pub fn drop_column(table: &'static str, column: &'static str) -> Self {
        Operation::DropColumn { table, column }
    }

    /// Render as a single statement for `backend`.
    pub fn render(&self, backend: BackendKind) -> Result<String, UnsupportedOperation> {
        let caps = backend.capabilities();
        let unsupported = |operation: String, reason: &'static str| UnsupportedOperation {
            backend,
            operation,
            reason,
        };

        match self {
            Operation::CreateTable(table) => Ok(table.render(backend)),
            Operation::DropTable(name) => Ok(format!("DROP TABLE {}", name)),
            Operation::AddColumn { table, column } => {
                let what = || format!("add column {}.{}", table, column.name);
                if column.references.is_some() && !caps.add_column_with_reference {
                    return Err(unsupported(what(), "foreign key on an added column requires a table rebuild"));
                }
                if column.unique && !caps.add_unique_column {
                    return Err(unsupported(what(), "UNIQUE on an added column; add a unique index instead"));
                }
                if column.default.as_ref().map(SqlValue::is_expression).unwrap_or(false)
                    && !caps.add_column_with_expression_default
                {
                    return Err(unsupported(what(), "non-constant default on an added column"));
                }
                if !column.nullable && column.default.is_none() && !caps.add_not_null_column_without_default {
                    return Err(unsupported(what(), "NOT NULL column added without a default"));
                }
                Ok(format!("ALTER TABLE {} ADD COLUMN {}", table, column.render(backend)))
            }
            Operation::DropColumn { table, column } => {
                if !caps.drop_column {
                    return Err(unsupported(format!("drop column {}.{}", table, column), "no DROP COLUMN"));
                }
                Ok(format!("ALTER TABLE {} DROP COLUMN {}", table, column))
            }
            Operation::CreateIndex(index) => Ok(index.render()),
            Operation::DropIndex(name) => Ok(format!("DROP INDEX {}", name)),
            Operation::Backfill(backfill) => Ok(backfill.render(backend)),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateTable(t) => write!(f, "create table {}", t.name),
            Operation::DropTable(name) => write!(f, "drop table {}", name),
            Operation::AddColumn { table, column } => write!(f, "add column {}.{}", table, column.name),
            Operation::DropColumn { table, column } => write!(f, "drop column {}.{}", table, column),
            Operation::CreateIndex(i) => write!(f, "create index {}", i.name),
            Operation::DropIndex(name) => write!(f, "drop index {}", name),
            Operation::Backfill(b) => write!(f, "backfill {}", b.table),
        }
    }
}
