//! Stellar Schema Library
//!
//! Versioned, reversible schema migrations for the game server database:
//! - Ordered Migration Units with a portable builder and native escape hatch
//! - Ledger of applied units stored in the target database
//! - Runner with advisory locking and drift detection (SQLite + PostgreSQL)
//! - Row types and invariants of the resulting schema

pub mod config;  // Env-driven runner configuration
pub mod model;  // Schema Model rows and invariant checks
pub mod storage;  // Migration engine (registry, ledger, runner, backends)

// Re-export commonly used types
pub use config::{ConfigError, MigrateConfig};
pub use storage::backend::{Backend, BackendKind, SchemaSnapshot};
pub use storage::error::{MigrationError, RegistryError};
pub use storage::registry::{Direction, Migration, Registry, Transformation, Version};
pub use storage::runner::{MigrationRunner, Resolution, RunReport, StatusReport, Target};
pub use storage::{init_runner, StartupError};
