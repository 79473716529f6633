//! Schema Model - row types for the tables the migrations produce
//!
//! Game-logic collaborators own these rows; the migration engine only owns
//! the containers. The types here mirror the schema at the latest version
//! and carry the invariants that every unit must keep true for existing rows.
//!
//! Structured payloads (`SectorEvent::data`, `Player::tutorial_state`) are
//! opaque `serde_json::Value`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Model invariant violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("Unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Player {player_id} has no resolvable credential")]
    NoCredential { player_id: i64 },

    #[error("Sector event {id} expires at or before creation")]
    ExpiryNotAfterCreation { id: i64 },

    #[error("Sector event {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: SectorEventStatus,
        to: SectorEventStatus,
    },

    #[error("Sector event {id} is {status} but resolver presence is {resolved}")]
    ResolverMismatch {
        id: i64,
        status: SectorEventStatus,
        resolved: bool,
    },

    #[error("Leaderboard '{category}' rank {rank} is not positive")]
    NonPositiveRank { category: String, rank: i32 },

    #[error("Leaderboard '{category}' ranks are not dense: expected {expected}, found {found}")]
    SparseRanks {
        category: String,
        expected: i32,
        found: i32,
    },
}

macro_rules! closed_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            /// Stored values, for CHECK constraints
            pub fn values() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ModelError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_enum!(
    /// Kind of a transient sector event
    SectorEventType, "sector event type" {
        AsteroidField => "asteroid_field",
        Nebula => "nebula",
        DistressSignal => "distress_signal",
        DerelictShip => "derelict_ship",
        ResourceCache => "resource_cache",
        IonStorm => "ion_storm",
    }
);

closed_enum!(
    SectorEventStatus, "sector event status" {
        Active => "active",
        Resolved => "resolved",
        Expired => "expired",
    }
);

closed_enum!(
    /// Push notification platform of a registered device
    DevicePlatform, "device platform" {
        Ios => "ios",
        Android => "android",
        Web => "web",
    }
);

impl SectorEventStatus {
    /// Only `active` moves, and only to a terminal state.
    pub fn can_transition_to(self, next: SectorEventStatus) -> bool {
        matches!(
            (self, next),
            (SectorEventStatus::Active, SectorEventStatus::Resolved)
                | (SectorEventStatus::Active, SectorEventStatus::Expired)
        )
    }

    pub fn is_terminal(self) -> bool {
        self != SectorEventStatus::Active
    }
}

// ============================================================================
// Player
// ============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Player {
    pub id: i64,
    pub username: String,
    pub password_hash: Option<String>,
    pub race: String,
    pub current_sector_id: Option<i64>,
    pub tutorial_step: i32,
    pub tutorial_completed: bool,
    pub tutorial_state: Option<Json<Value>>,
    pub wallet_address: Option<String>,
    pub matrix_user_id: Option<String>,
    pub landed_at_planet_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// How a player proves identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential<'a> {
    Password(&'a str),
    Wallet(&'a str),
    Matrix(&'a str),
}

impl Player {
    /// Resolve a credential: password first, then external identities.
    pub fn credential(&self) -> Result<Credential<'_>, ModelError> {
        if let Some(hash) = present(&self.password_hash) {
            return Ok(Credential::Password(hash));
        }
        if let Some(wallet) = present(&self.wallet_address) {
            return Ok(Credential::Wallet(wallet));
        }
        if let Some(matrix) = present(&self.matrix_user_id) {
            return Ok(Credential::Matrix(matrix));
        }
        Err(ModelError::NoCredential { player_id: self.id })
    }

    pub fn in_tutorial(&self) -> bool {
        !self.tutorial_completed
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

// ============================================================================
// Devices, messages, notes, recipes
// ============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PlayerDevice {
    pub id: i64,
    pub player_id: i64,
    pub fcm_token: String,
    pub platform: String,
    pub updated_at: DateTime<Utc>,
}

impl PlayerDevice {
    pub fn platform(&self) -> Result<DevicePlatform, ModelError> {
        self.platform.parse()
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Message {
    pub id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub subject: String,
    pub body: String,
    pub read: bool,
    pub sender_deleted: bool,
    pub recipient_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Hard-delete only once both sides have deleted it.
    pub fn is_purgeable(&self) -> bool {
        self.sender_deleted && self.recipient_deleted
    }

    pub fn is_visible_to(&self, player_id: i64) -> bool {
        (player_id == self.sender_id && !self.sender_deleted)
            || (player_id == self.recipient_id && !self.recipient_deleted)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Note {
    pub id: i64,
    pub player_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PlayerDiscoveredRecipe {
    pub player_id: i64,
    pub recipe_id: i64,
    pub discovered_at: DateTime<Utc>,
}

// ============================================================================
// Sector events
// ============================================================================

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SectorEvent {
    pub id: i64,
    pub sector_id: i64,
    pub event_type: String,
    pub data: Json<Value>,
    pub status: String,
    pub resolved_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SectorEvent {
    pub fn event_type(&self) -> Result<SectorEventType, ModelError> {
        self.event_type.parse()
    }

    pub fn status(&self) -> Result<SectorEventStatus, ModelError> {
        self.status.parse()
    }

    /// Row-level invariants: known enums, expiry after creation, and a
    /// resolver present exactly when resolved.
    pub fn validate(&self) -> Result<(), ModelError> {
        self.event_type()?;
        let status = self.status()?;

        if self.expires_at <= self.created_at {
            return Err(ModelError::ExpiryNotAfterCreation { id: self.id });
        }
        let resolved = self.resolved_by_id.is_some();
        if resolved != (status == SectorEventStatus::Resolved) {
            return Err(ModelError::ResolverMismatch {
                id: self.id,
                status,
                resolved,
            });
        }
        Ok(())
    }

    pub fn transition(&mut self, next: SectorEventStatus) -> Result<(), ModelError> {
        let current = self.status()?;
        if !current.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                id: self.id,
                from: current,
                to: next,
            });
        }
        self.status = next.as_str().to_string();
        Ok(())
    }
}

// ============================================================================
// Leaderboard cache
// ============================================================================

/// Denormalized projection, rebuilt wholesale by the scoring collaborator.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub category: String,
    pub rank: i32,
    pub player_id: i64,
    pub player_name: String,
    pub score: i64,
    pub updated_at: DateTime<Utc>,
}

/// Ranks are positive and dense (1..=n) within each category.
pub fn validate_leaderboard(entries: &[LeaderboardEntry]) -> Result<(), ModelError> {
    let mut by_category: BTreeMap<&str, Vec<i32>> = BTreeMap::new();
    for entry in entries {
        if entry.rank <= 0 {
            return Err(ModelError::NonPositiveRank {
                category: entry.category.clone(),
                rank: entry.rank,
            });
        }
        by_category.entry(&entry.category).or_default().push(entry.rank);
    }

    for (category, mut ranks) in by_category {
        ranks.sort_unstable();
        for (i, rank) in ranks.into_iter().enumerate() {
            let expected = i as i32 + 1;
            if rank != expected {
                return Err(ModelError::SparseRanks {
                    category: category.to_string(),
                    expected,
                    found: rank,
                });
            }
        }
    }
    Ok(())
}
