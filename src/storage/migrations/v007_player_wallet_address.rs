use crate::storage::backend::BackendKind;
use crate::storage::builder::{ColumnDef, ColumnType, IndexDef, Operation};
use crate::storage::registry::{Migration, Transformation, Version};

/// Optional wallet identity; uniqueness via an index so the column can be
/// added in place on every backend.
pub struct AddPlayerWalletAddress;

impl Migration for AddPlayerWalletAddress {
    fn version(&self) -> Version {
        7
    }

    fn name(&self) -> &'static str {
        "add_player_wallet_address"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![
            Operation::add_column("players", ColumnDef::new("wallet_address", ColumnType::Text)),
            Operation::CreateIndex(
                IndexDef::new("uq_players_wallet_address", "players", &["wallet_address"]).unique(),
            ),
        ])
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        // Indexed columns cannot be dropped on SQLite
        Transformation::portable(vec![
            Operation::DropIndex("uq_players_wallet_address"),
            Operation::drop_column("players", "wallet_address"),
        ])
    }
}
