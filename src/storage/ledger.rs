//! Ledger - the record, inside the target database, of applied units
//!
//! One row per applied Migration Unit:
//! `version` (primary key), `name`, `checksum`, `applied_at`, `dirty`.
//!
//! The ledger is bootstrapped outside the registry's ordering. A clean row
//! means applied; a dirty row means a non-transactional transformation was
//! started and never confirmed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha3::{Digest, Sha3_256};
use std::collections::BTreeSet;

use super::backend::BackendKind;
use super::error::MigrationError;
use super::registry::{Registry, Version};

pub const LEDGER_TABLE: &str = "_schema_migrations";
pub const LOCK_TABLE: &str = "_schema_migrations_lock";

/// Ledger row as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub dirty: bool,
}

/// Fields written when marking a unit applied
#[derive(Debug, Clone, Copy)]
pub struct LedgerRecord<'a> {
    pub version: Version,
    pub name: &'a str,
    pub checksum: &'a str,
}

/// Ledger update that accompanies one transformation
#[derive(Debug, Clone, Copy)]
pub enum LedgerWrite<'a> {
    Applied(LedgerRecord<'a>),
    Reverted(Version),
}

impl LedgerWrite<'_> {
    pub fn version(&self) -> Version {
        match self {
            LedgerWrite::Applied(record) => record.version,
            LedgerWrite::Reverted(version) => *version,
        }
    }
}

/// SHA3-256 over the rendered `up` statements, hex encoded.
pub fn checksum(statements: &[String]) -> String {
    let mut hasher = Sha3_256::new();
    for statement in statements {
        hasher.update(statement.as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Ledger reconciled against the registry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LedgerState {
    /// Clean rows for registry versions, ascending
    pub applied: Vec<LedgerEntry>,
    /// Rows whose transformation was started but never confirmed
    pub dirty: Vec<Version>,
    /// Clean rows with no matching unit in the registry
    pub unknown: Vec<Version>,
    /// Registry versions below the highest applied one that are not applied
    pub gaps: Vec<Version>,
    /// Applied units whose current `up` no longer matches the recorded checksum
    pub modified: Vec<Version>,
}

impl LedgerState {
    pub fn analyze(registry: &Registry, mut entries: Vec<LedgerEntry>, backend: BackendKind) -> Self {
        entries.sort_by_key(|e| e.version);

        let mut state = LedgerState::default();
        for entry in entries {
            if entry.dirty {
                state.dirty.push(entry.version);
            } else if !registry.contains(entry.version) {
                state.unknown.push(entry.version);
            } else {
                state.applied.push(entry);
            }
        }

        let applied: BTreeSet<Version> = state.applied.iter().map(|e| e.version).collect();
        if let Some(&highest) = applied.iter().next_back() {
            state.gaps = registry
                .versions()
                .into_iter()
                .take_while(|v| *v < highest)
                .filter(|v| !applied.contains(v))
                .collect();
        }

        for entry in &state.applied {
            let Some(unit) = registry.get(entry.version) else {
                continue;
            };
            // Units that cannot render on this backend cannot have been applied
            // through the runner; leave them to the gap/unknown checks.
            if let Ok(statements) = unit.up(backend).render(backend) {
                if checksum(&statements) != entry.checksum {
                    state.modified.push(entry.version);
                }
            }
        }

        state
    }

    pub fn is_consistent(&self) -> bool {
        self.dirty.is_empty() && self.unknown.is_empty() && self.gaps.is_empty()
    }

    /// Refuse to proceed on drift; never guess a repair.
    pub fn ensure_consistent(&self) -> Result<(), MigrationError> {
        if !self.dirty.is_empty() {
            return Err(MigrationError::inconsistent(format!(
                "version(s) {:?} started without confirmation (transformation may be partially applied); \
                 inspect and run `migrate resolve`",
                self.dirty
            )));
        }
        if !self.unknown.is_empty() {
            return Err(MigrationError::inconsistent(format!(
                "ledger records version(s) {:?} unknown to this build",
                self.unknown
            )));
        }
        if !self.gaps.is_empty() {
            return Err(MigrationError::inconsistent(format!(
                "version(s) {:?} were never applied but later versions were",
                self.gaps
            )));
        }
        Ok(())
    }

    pub fn applied_versions(&self) -> Vec<Version> {
        self.applied.iter().map(|e| e.version).collect()
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn highest_applied(&self) -> Option<Version> {
        self.applied.last().map(|e| e.version)
    }

    pub fn is_applied(&self, version: Version) -> bool {
        self.applied.iter().any(|e| e.version == version)
    }
}
