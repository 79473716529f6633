//! Migration Units for the game schema
//!
//! One file per unit, named `vNNN_<name>.rs`. [`registry()`] is the only
//! place that lists them; add new units at the end with the next version.
//!
//! Units are append-only once released. Editing an applied unit changes its
//! checksum and shows up as *modified* in `migrate status`.

mod v001_core_tables;
mod v002_messages_and_notes;
mod v003_player_discovered_recipes;
mod v004_player_tutorial;
mod v005_sector_events;
mod v006_leaderboard_cache;
mod v007_player_wallet_address;
mod v008_player_devices;
mod v009_player_landed_at_planet;
mod v010_player_matrix_user_id;
mod v011_tutorial_sandbox_state;
mod v012_messages_recipient_index;

use super::error::RegistryError;
use super::registry::{Migration, Registry};

pub use v001_core_tables::CreateCoreTables;
pub use v002_messages_and_notes::CreateMessagesAndNotes;
pub use v003_player_discovered_recipes::CreatePlayerDiscoveredRecipes;
pub use v004_player_tutorial::AddPlayerTutorial;
pub use v005_sector_events::CreateSectorEvents;
pub use v006_leaderboard_cache::CreateLeaderboardCache;
pub use v007_player_wallet_address::AddPlayerWalletAddress;
pub use v008_player_devices::CreatePlayerDevices;
pub use v009_player_landed_at_planet::AddPlayerLandedAtPlanet;
pub use v010_player_matrix_user_id::AddPlayerMatrixUserId;
pub use v011_tutorial_sandbox_state::AddTutorialSandboxState;
pub use v012_messages_recipient_index::IndexMessagesRecipient;

/// All units in application order.
pub fn units() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateCoreTables),
        Box::new(CreateMessagesAndNotes),
        Box::new(CreatePlayerDiscoveredRecipes),
        Box::new(AddPlayerTutorial),
        Box::new(CreateSectorEvents),
        Box::new(CreateLeaderboardCache),
        Box::new(AddPlayerWalletAddress),
        Box::new(CreatePlayerDevices),
        Box::new(AddPlayerLandedAtPlanet),
        Box::new(AddPlayerMatrixUserId),
        Box::new(AddTutorialSandboxState),
        Box::new(IndexMessagesRecipient),
    ]
}

/// The validated game registry.
pub fn registry() -> Result<Registry, RegistryError> {
    Registry::new(units())
}
