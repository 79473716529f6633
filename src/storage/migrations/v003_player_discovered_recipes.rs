use crate::storage::backend::BackendKind;
use crate::storage::builder::{ColumnDef, ColumnType, OnDelete, Operation, SqlValue, TableDef};
use crate::storage::registry::{Migration, Transformation, Version};

/// Player <-> recipe join table, cascading from both sides
pub struct CreatePlayerDiscoveredRecipes;

impl Migration for CreatePlayerDiscoveredRecipes {
    fn version(&self) -> Version {
        3
    }

    fn name(&self) -> &'static str {
        "create_player_discovered_recipes"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        let table = TableDef::new("player_discovered_recipes")
            .column(
                ColumnDef::new("player_id", ColumnType::BigInt)
                    .not_null()
                    .references("players", "id", OnDelete::Cascade),
            )
            .column(
                ColumnDef::new("recipe_id", ColumnType::BigInt)
                    .not_null()
                    .references("recipes", "id", OnDelete::Cascade),
            )
            .column(
                ColumnDef::new("discovered_at", ColumnType::Timestamp)
                    .not_null()
                    .default(SqlValue::CurrentTimestamp),
            )
            .primary_key(&["player_id", "recipe_id"]);

        Transformation::portable(vec![Operation::CreateTable(table)])
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![Operation::DropTable("player_discovered_recipes")])
    }
}
