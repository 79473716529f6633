//! Migration Runner - applies and reverts Migration Units
//!
//! ```text
//! lock ─► read ledger ─► reconcile with registry ─► plan ─► per unit:
//!                                                          transformation + ledger write
//! ```
//!
//! The registry is the only ordering authority and the ledger must always be
//! a contiguous prefix of it. Batches stop at the first failure; the ledger
//! then reflects exactly the units that completed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::backend::{Backend, BackendKind, SchemaSnapshot};
use super::error::{ExecError, MigrationError, TransformationFailure};
use super::ledger::{self, LedgerRecord, LedgerState, LedgerWrite};
use super::registry::{Direction, Migration, Registry, Version};

/// Longest single wait between lock attempts
const MAX_LOCK_BACKOFF: Duration = Duration::from_secs(30);

/// Upper bound for `up`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Latest,
    Version(Version),
}

impl Target {
    fn bound(self) -> Version {
        match self {
            Target::Latest => Version::MAX,
            Target::Version(v) => v,
        }
    }
}

/// Versions `up` will apply, ascending: everything after the applied prefix, up to `target`.
pub fn plan_up(registry_versions: &[Version], applied_count: usize, target: Target) -> Vec<Version> {
    let bound = target.bound();
    registry_versions
        .iter()
        .skip(applied_count)
        .copied()
        .take_while(|v| *v <= bound)
        .collect()
}

/// Versions `down` will revert, descending (last applied first).
pub fn plan_down(applied_versions: &[Version], target: Version) -> Vec<Version> {
    applied_versions
        .iter()
        .rev()
        .copied()
        .take_while(|v| *v > target)
        .collect()
}

/// Lock retry policy
#[derive(Debug, Clone, Copy)]
pub struct LockPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(500),
        }
    }
}

/// How an operator resolves a ledger row by hand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The transformation is in place: record the unit as applied.
    Applied,
    /// The transformation is not in place: remove the unit from the ledger.
    Reverted,
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ExecutedUnit {
    pub version: Version,
    pub name: String,
    pub native: bool,
    pub elapsed_ms: u128,
}

/// Units executed by one `up`/`down` call, in execution order
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub direction: Direction,
    pub executed: Vec<ExecutedUnit>,
}

impl RunReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            executed: Vec::new(),
        }
    }

    pub fn versions(&self) -> Vec<Version> {
        self.executed.iter().map(|u| u.version).collect()
    }

    pub fn is_noop(&self) -> bool {
        self.executed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedUnit {
    pub version: Version,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingUnit {
    pub version: Version,
    pub name: String,
}

/// Read-only view of applied vs pending units and any drift
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub backend: BackendKind,
    pub applied: Vec<AppliedUnit>,
    pub pending: Vec<PendingUnit>,
    pub dirty: Vec<Version>,
    pub unknown: Vec<Version>,
    pub gaps: Vec<Version>,
    pub modified: Vec<Version>,
}

impl StatusReport {
    pub fn is_consistent(&self) -> bool {
        self.dirty.is_empty() && self.unknown.is_empty() && self.gaps.is_empty()
    }

    pub fn applied_versions(&self) -> Vec<Version> {
        self.applied.iter().map(|u| u.version).collect()
    }

    pub fn pending_versions(&self) -> Vec<Version> {
        self.pending.iter().map(|u| u.version).collect()
    }

    pub fn current_version(&self) -> Option<Version> {
        self.applied.last().map(|u| u.version)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Schema status ({}): {} applied, {} pending",
            self.backend,
            self.applied.len(),
            self.pending.len()
        )?;
        for unit in &self.applied {
            writeln!(f, "  [x] v{:<4} {}  ({})", unit.version, unit.name, unit.applied_at.to_rfc3339())?;
        }
        for unit in &self.pending {
            writeln!(f, "  [ ] v{:<4} {}", unit.version, unit.name)?;
        }
        if !self.dirty.is_empty() {
            writeln!(f, "  DIRTY (started, never confirmed): {:?}", self.dirty)?;
        }
        if !self.unknown.is_empty() {
            writeln!(f, "  UNKNOWN to this build: {:?}", self.unknown)?;
        }
        if !self.gaps.is_empty() {
            writeln!(f, "  GAPS (skipped below applied): {:?}", self.gaps)?;
        }
        if !self.modified.is_empty() {
            writeln!(f, "  MODIFIED since applied: {:?}", self.modified)?;
        }
        Ok(())
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Single-runner orchestrator over one backend and one registry
pub struct MigrationRunner {
    backend: Arc<dyn Backend>,
    registry: Registry,
    lock_policy: LockPolicy,
    holder: String,
}

impl MigrationRunner {
    pub fn new(backend: Arc<dyn Backend>, registry: Registry) -> Self {
        Self {
            backend,
            registry,
            lock_policy: LockPolicy::default(),
            holder: format!("migrate-{}", std::process::id()),
        }
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    /// Identity recorded with the lock (distinct runners in one process need distinct holders).
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Apply pending units in ascending order up to `target`.
    pub async fn up_to(&self, target: Target) -> Result<RunReport, MigrationError> {
        if let Target::Version(version) = target {
            self.check_target(version)?;
        }
        self.lock_and_bootstrap().await?;
        let result = self.apply_pending(target).await;
        self.release_lock().await;
        result
    }

    /// Revert applied units above `target`, most recent first.
    pub async fn down_to(&self, target: Version) -> Result<RunReport, MigrationError> {
        if target != 0 {
            self.check_target(target)?;
        }
        self.lock_and_bootstrap().await?;
        let result = self.revert_applied(target).await;
        self.release_lock().await;
        result
    }

    /// Applied vs pending. Never mutates, never takes the lock.
    pub async fn status(&self) -> Result<StatusReport, MigrationError> {
        let state = self.read_state().await?;

        let applied = state
            .applied
            .iter()
            .map(|e| AppliedUnit {
                version: e.version,
                name: e.name.clone(),
                applied_at: e.applied_at,
            })
            .collect();
        let pending = self
            .registry
            .units()
            .iter()
            .filter(|u| !state.is_applied(u.version()) && !state.dirty.contains(&u.version()))
            .map(|u| PendingUnit {
                version: u.version(),
                name: u.name().to_string(),
            })
            .collect();

        Ok(StatusReport {
            backend: self.backend.kind(),
            applied,
            pending,
            dirty: state.dirty,
            unknown: state.unknown,
            gaps: state.gaps,
            modified: state.modified,
        })
    }

    /// Live schema description, for audits.
    pub async fn schema(&self) -> Result<SchemaSnapshot, MigrationError> {
        Ok(self.backend.describe_schema().await?)
    }

    /// Manually settle one ledger row. Operator-only; the runner never calls this.
    pub async fn resolve(&self, version: Version, resolution: Resolution) -> Result<(), MigrationError> {
        let unit = self
            .registry
            .get(version)
            .ok_or(MigrationError::UnknownVersion(version))?;

        self.lock_and_bootstrap().await?;
        let result = self.resolve_locked(unit, resolution).await;
        self.release_lock().await;
        result
    }

    /// Clear a lock left by a killed runner.
    pub async fn unlock(&self) -> Result<bool, MigrationError> {
        let cleared = self.backend.clear_stale_lock().await?;
        if cleared {
            warn!("Stale migration lock cleared");
        } else {
            info!("No stale migration lock to clear");
        }
        Ok(cleared)
    }

    // ------------------------------------------------------------------------

    fn check_target(&self, version: Version) -> Result<(), MigrationError> {
        if self.registry.contains(version) {
            Ok(())
        } else {
            Err(MigrationError::UnknownVersion(version))
        }
    }

    async fn read_state(&self) -> Result<LedgerState, MigrationError> {
        let entries = self.backend.ledger_entries().await?;
        Ok(LedgerState::analyze(&self.registry, entries, self.backend.kind()))
    }

    async fn read_consistent_state(&self) -> Result<LedgerState, MigrationError> {
        let state = self.read_state().await?;
        if let Err(err) = state.ensure_consistent() {
            error!("{}", err);
            return Err(err);
        }
        for version in &state.modified {
            warn!("Migration v{} changed after it was applied (checksum mismatch)", version);
        }
        Ok(state)
    }

    async fn apply_pending(&self, target: Target) -> Result<RunReport, MigrationError> {
        let state = self.read_consistent_state().await?;
        let versions = plan_up(&self.registry.versions(), state.applied_count(), target);

        let mut report = RunReport::new(Direction::Up);
        if versions.is_empty() {
            debug!(
                "Schema up to date at v{}",
                state.highest_applied().unwrap_or(0)
            );
            return Ok(report);
        }

        info!("Applying {} migration(s)", versions.len());
        for version in versions {
            let unit = self
                .registry
                .get(version)
                .ok_or(MigrationError::UnknownVersion(version))?;
            report.executed.push(self.run_unit(unit, Direction::Up).await?);
        }
        Ok(report)
    }

    async fn revert_applied(&self, target: Version) -> Result<RunReport, MigrationError> {
        let state = self.read_consistent_state().await?;
        let versions = plan_down(&state.applied_versions(), target);

        let mut report = RunReport::new(Direction::Down);
        if versions.is_empty() {
            debug!("Nothing applied above v{}", target);
            return Ok(report);
        }

        info!("Reverting {} migration(s) down to v{}", versions.len(), target);
        for version in versions {
            let unit = self
                .registry
                .get(version)
                .ok_or(MigrationError::UnknownVersion(version))?;
            if unit.data_lossy_down() {
                warn!("Reverting v{} '{}' discards data it cannot restore", version, unit.name());
            }
            report.executed.push(self.run_unit(unit, Direction::Down).await?);
        }
        Ok(report)
    }

    async fn run_unit(&self, unit: &dyn Migration, direction: Direction) -> Result<ExecutedUnit, MigrationError> {
        let kind = self.backend.kind();
        let version = unit.version();
        let fail = |source: TransformationFailure| MigrationError::Transformation {
            version,
            name: unit.name().to_string(),
            direction,
            source,
        };

        let transformation = match direction {
            Direction::Up => unit.up(kind),
            Direction::Down => unit.down(kind),
        };
        let statements = transformation.render(kind).map_err(|e| {
            error!("Migration v{} '{}' cannot run on {}: {}", version, unit.name(), kind, e);
            fail(e.into())
        })?;

        let checksum = match direction {
            Direction::Up => ledger::checksum(&statements),
            Direction::Down => String::new(),
        };
        let write = match direction {
            Direction::Up => LedgerWrite::Applied(LedgerRecord {
                version,
                name: unit.name(),
                checksum: &checksum,
            }),
            Direction::Down => LedgerWrite::Reverted(version),
        };

        info!(
            "Running migration v{} '{}' ({}{})",
            version,
            unit.name(),
            direction,
            if transformation.is_native() { ", native" } else { "" }
        );
        let started = Instant::now();

        if transformation.is_transactional() && self.backend.capabilities().transactional_ddl {
            self.backend
                .execute_transactional(&statements, &write)
                .await
                .map_err(|e| {
                    error!("Migration v{} '{}' failed: {}", version, unit.name(), e);
                    fail(e.into())
                })?;
        } else {
            self.run_outside_transaction(unit, &statements, &write)
                .await
                .map_err(|e| match e {
                    Staged::Failed(e) => fail(e.into()),
                    Staged::Unconfirmed(e) => e,
                })?;
        }

        let elapsed = started.elapsed();
        info!(
            "Migration v{} '{}' {} in {:.2}s",
            version,
            unit.name(),
            match direction {
                Direction::Up => "applied",
                Direction::Down => "reverted",
            },
            elapsed.as_secs_f64()
        );

        Ok(ExecutedUnit {
            version,
            name: unit.name().to_string(),
            native: transformation.is_native(),
            elapsed_ms: elapsed.as_millis(),
        })
    }

    /// Transformation and ledger update as two steps, guarded by a dirty marker
    /// so that a crash in between shows up in `status()`.
    async fn run_outside_transaction(
        &self,
        unit: &dyn Migration,
        statements: &[String],
        write: &LedgerWrite<'_>,
    ) -> Result<(), Staged> {
        let version = write.version();

        let marked = match write {
            LedgerWrite::Applied(record) => self.backend.insert_entry(record, true).await,
            LedgerWrite::Reverted(_) => self.backend.set_dirty(version, true).await,
        };
        marked.map_err(|e| Staged::Failed(ExecError::Ledger(e)))?;

        if let Err(e) = self.backend.execute_statements(statements).await {
            if e.statements_completed() == Some(0) {
                // Nothing ran: withdraw the marker
                let undo = match write {
                    LedgerWrite::Applied(_) => self.backend.delete_entry(version).await,
                    LedgerWrite::Reverted(_) => self.backend.set_dirty(version, false).await,
                };
                if let Err(undo_err) = undo {
                    error!("Could not clear dirty marker for v{}: {}", version, undo_err);
                }
            } else {
                error!(
                    "Migration v{} '{}' partially executed outside a transaction; ledger left dirty",
                    version,
                    unit.name()
                );
            }
            return Err(Staged::Failed(e));
        }

        let confirm = match write {
            LedgerWrite::Applied(_) => self.backend.set_dirty(version, false).await,
            LedgerWrite::Reverted(_) => self.backend.delete_entry(version).await,
        };
        confirm.map_err(|e| {
            error!("Migration v{} ran but its ledger update failed: {}", version, e);
            Staged::Unconfirmed(MigrationError::inconsistent(format!(
                "v{} '{}' transformation completed but the ledger update failed: {}",
                version,
                unit.name(),
                e
            )))
        })
    }

    async fn resolve_locked(&self, unit: &dyn Migration, resolution: Resolution) -> Result<(), MigrationError> {
        let kind = self.backend.kind();
        let version = unit.version();
        let existing = self
            .backend
            .ledger_entries()
            .await?
            .into_iter()
            .find(|e| e.version == version);

        match (resolution, existing) {
            (Resolution::Applied, Some(entry)) if entry.dirty => {
                self.backend.set_dirty(version, false).await?;
            }
            (Resolution::Applied, Some(_)) => {
                debug!("v{} already recorded as applied", version);
            }
            (Resolution::Applied, None) => {
                let statements = unit.up(kind).render(kind).map_err(|e| MigrationError::Transformation {
                    version,
                    name: unit.name().to_string(),
                    direction: Direction::Up,
                    source: e.into(),
                })?;
                let checksum = ledger::checksum(&statements);
                self.backend
                    .insert_entry(
                        &LedgerRecord {
                            version,
                            name: unit.name(),
                            checksum: &checksum,
                        },
                        false,
                    )
                    .await?;
            }
            (Resolution::Reverted, _) => {
                self.backend.delete_entry(version).await?;
            }
        }

        warn!("Ledger entry v{} '{}' resolved by operator as {:?}", version, unit.name(), resolution);
        Ok(())
    }

    /// Take the lock, then create the ledger while holding it.
    async fn lock_and_bootstrap(&self) -> Result<(), MigrationError> {
        self.acquire_lock().await?;
        if let Err(e) = self.backend.ensure_ledger().await {
            self.release_lock().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn acquire_lock(&self) -> Result<(), MigrationError> {
        let attempts = self.lock_policy.attempts.max(1);
        let mut delay = self.lock_policy.backoff;

        for attempt in 1..=attempts {
            if self.backend.try_acquire_lock(&self.holder).await? {
                debug!("Migration lock acquired by {}", self.holder);
                return Ok(());
            }
            if attempt < attempts {
                warn!(
                    "Migration lock busy (attempt {}/{}), retrying in {:?}",
                    attempt, attempts, delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_LOCK_BACKOFF);
            }
        }

        error!("Gave up on migration lock after {} attempts", attempts);
        Err(MigrationError::LockContention { attempts })
    }

    async fn release_lock(&self) {
        if let Err(e) = self.backend.release_lock(&self.holder).await {
            error!("Failed to release migration lock: {} (run `migrate unlock`)", e);
        }
    }
}

/// Outcome of a non-transactional step that did not complete
enum Staged {
    /// The transformation itself failed
    Failed(ExecError),
    /// The transformation ran; the ledger could not be confirmed
    Unconfirmed(MigrationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_up_from_empty() {
        assert_eq!(plan_up(&[1, 2, 3], 0, Target::Latest), vec![1, 2, 3]);
        assert_eq!(plan_up(&[1, 2, 3], 0, Target::Version(2)), vec![1, 2]);
    }

    #[test]
    fn test_plan_up_is_noop_at_or_past_target() {
        assert!(plan_up(&[1, 2, 3], 3, Target::Latest).is_empty());
        assert!(plan_up(&[1, 2, 3], 2, Target::Version(1)).is_empty());
        assert!(plan_up(&[1, 2, 3], 2, Target::Version(2)).is_empty());
    }

    #[test]
    fn test_plan_up_target_between_versions() {
        assert_eq!(plan_up(&[10, 20, 30], 1, Target::Version(25)), vec![20]);
    }

    #[test]
    fn test_plan_down_is_lifo() {
        assert_eq!(plan_down(&[1, 2, 3, 4], 2), vec![4, 3]);
        assert_eq!(plan_down(&[1, 2, 3, 4], 0), vec![4, 3, 2, 1]);
        assert!(plan_down(&[1, 2], 2).is_empty());
        assert!(plan_down(&[], 0).is_empty());
    }

    #[test]
    fn test_lock_policy_default() {
        let policy = LockPolicy::default();
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.backoff, Duration::from_millis(500));
    }
}
