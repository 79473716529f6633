//! Migration Unit contract and the ordered Registry
//!
//! The Registry is an explicit, immutable list built once at startup and
//! handed to the runner. Construction fails if versions repeat or go
//! backwards; there is no discovery and no global mutable list.

use std::fmt;

use serde::Serialize;

use super::backend::BackendKind;
use super::builder::{Operation, UnsupportedOperation};
use super::error::RegistryError;

/// Migration version. Positive, strictly ascending in registry order.
pub type Version = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Plan {
    Portable(Vec<Operation>),
    Native(Vec<String>),
}

/// What a unit does in one direction on one backend.
///
/// Either portable builder operations, or a literal statement sequence for
/// the backend (the native escape hatch). The unit's author picks per
/// backend; the runner never swaps one for the other.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformation {
    plan: Plan,
    transactional: bool,
}

impl Transformation {
    pub fn portable(operations: Vec<Operation>) -> Self {
        Self {
            plan: Plan::Portable(operations),
            transactional: true,
        }
    }

    pub fn native<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            plan: Plan::Native(statements.into_iter().map(Into::into).collect()),
            transactional: true,
        }
    }

    /// Run statements outside a transaction (for statements the backend
    /// refuses inside one). The ledger is then guarded by a dirty marker.
    pub fn outside_transaction(mut self) -> Self {
        self.transactional = false;
        self
    }

    pub fn is_native(&self) -> bool {
        matches!(self.plan, Plan::Native(_))
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Statements to execute, in order. Portable operations the backend
    /// cannot express fail here, before anything runs.
    pub fn render(&self, backend: BackendKind) -> Result<Vec<String>, UnsupportedOperation> {
        match &self.plan {
            Plan::Portable(ops) => ops.iter().map(|op| op.render(backend)).collect(),
            Plan::Native(statements) => Ok(statements.clone()),
        }
    }
}

/// One versioned, reversible schema transformation.
pub trait Migration: Send + Sync {
    fn version(&self) -> Version;

    fn name(&self) -> &'static str;

    fn up(&self, backend: BackendKind) -> Transformation;

    /// Inverse of [`Migration::up`]. Restores structure; data removed by the
    /// reverted change is not recoverable.
    fn down(&self, backend: BackendKind) -> Transformation;

    /// `down` discards data written by `up` beyond the dropped structure
    /// (e.g. a backfill that cannot be undone).
    fn data_lossy_down(&self) -> bool {
        false
    }
}

/// Complete ordered catalog of Migration Units
pub struct Registry {
    units: Vec<Box<dyn Migration>>,
}

impl Registry {
    /// Validate and freeze the catalog. Order given is the order applied.
    pub fn new(units: Vec<Box<dyn Migration>>) -> Result<Self, RegistryError> {
        if units.is_empty() {
            return Err(RegistryError::Empty);
        }

        for (i, unit) in units.iter().enumerate() {
            if unit.version() <= 0 {
                return Err(RegistryError::NonPositive {
                    version: unit.version(),
                    name: unit.name().to_string(),
                });
            }
            if i == 0 {
                continue;
            }
            let previous = &units[i - 1];
            if unit.version() == previous.version() {
                return Err(RegistryError::Duplicate {
                    version: unit.version(),
                    first: previous.name().to_string(),
                    second: unit.name().to_string(),
                });
            }
            if unit.version() < previous.version() {
                return Err(RegistryError::NonMonotonic {
                    version: unit.version(),
                    previous: previous.version(),
                    name: unit.name().to_string(),
                });
            }
        }

        Ok(Self { units })
    }

    pub fn units(&self) -> &[Box<dyn Migration>] {
        &self.units
    }

    pub fn versions(&self) -> Vec<Version> {
        self.units.iter().map(|u| u.version()).collect()
    }

    pub fn get(&self, version: Version) -> Option<&dyn Migration> {
        self.position(version).map(|i| self.units[i].as_ref())
    }

    pub fn position(&self, version: Version) -> Option<usize> {
        self.units.binary_search_by_key(&version, |u| u.version()).ok()
    }

    pub fn contains(&self, version: Version) -> bool {
        self.position(version).is_some()
    }

    pub fn latest(&self) -> Version {
        self.units.last().map(|u| u.version()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.units.iter().map(|u| (u.version(), u.name())))
            .finish()
    }
}
