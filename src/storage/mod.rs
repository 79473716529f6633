//! Storage Layer - versioned schema migrations for the game database
//!
//! ## Architecture
//! ```text
//! [migrate CLI]
//!       ↓
//! [MigrationRunner] ── Registry (migrations::registry)
//!       ↓
//! [Backend trait]
//!       ↓
//! ┌────────────────┬──────────────────┐
//! │ SqliteBackend  │ PostgresBackend  │
//! │ (local/dev)    │ (staging/prod)   │
//! └────────────────┴──────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let config = MigrateConfig::from_env()?;
//! let runner = storage::init_runner(&config).await?;
//!
//! runner.up_to(Target::Latest).await?;
//! println!("{}", runner.status().await?);
//! ```

pub mod backend;
pub mod builder;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod postgres;
pub mod registry;
pub mod runner;
pub mod sqlite;

use std::sync::Arc;
use tracing::info;

use crate::config::{ConfigError, MigrateConfig};

use self::backend::{Backend, BackendKind};
use self::error::RegistryError;
use self::postgres::PostgresBackend;
use self::runner::MigrationRunner;
use self::sqlite::SqliteBackend;

/// Failures before the runner exists
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl StartupError {
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Registry(_) => 4,
            StartupError::Config(_) | StartupError::Database(_) => 1,
        }
    }
}

/// Connect to the configured backend.
pub async fn connect(config: &MigrateConfig) -> Result<Arc<dyn Backend>, StartupError> {
    let kind = config.backend_kind()?;
    info!("Connecting to {} at {}", kind, config.redacted_url());

    let backend: Arc<dyn Backend> = match kind {
        BackendKind::Sqlite => {
            Arc::new(SqliteBackend::connect(&config.database_url, config.max_connections).await?)
        }
        BackendKind::Postgres => {
            Arc::new(PostgresBackend::connect(&config.database_url, config.max_connections).await?)
        }
    };
    Ok(backend)
}

/// Validate the registry, connect, and build a runner.
///
/// The registry is checked first so a bad build never touches the database.
pub async fn init_runner(config: &MigrateConfig) -> Result<MigrationRunner, StartupError> {
    let registry = migrations::registry()?;
    let backend = connect(config).await?;

    info!(
        "Migration registry loaded: {} units (latest v{})",
        registry.len(),
        registry.latest()
    );
    Ok(MigrationRunner::new(backend, registry).with_lock_policy(config.lock_policy()))
}
