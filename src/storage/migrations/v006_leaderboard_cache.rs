//! Leaderboard cache
//!
//! A rebuildable projection: `player_id` and `player_name` are snapshots with
//! no foreign key, so rebuilding never contends with player deletes.

use crate::storage::backend::BackendKind;
use crate::storage::builder::{ColumnDef, ColumnType, Operation, SqlValue, TableDef};
use crate::storage::registry::{Migration, Transformation, Version};

pub struct CreateLeaderboardCache;

impl Migration for CreateLeaderboardCache {
    fn version(&self) -> Version {
        6
    }

    fn name(&self) -> &'static str {
        "create_leaderboard_cache"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        let table = TableDef::new("leaderboard_cache")
            .column(ColumnDef::new("category", ColumnType::Text).not_null())
            .column(ColumnDef::new("rank", ColumnType::Integer).not_null().check("rank > 0"))
            .column(ColumnDef::new("player_id", ColumnType::BigInt).not_null())
            .column(ColumnDef::new("player_name", ColumnType::Text).not_null())
            .column(ColumnDef::new("score", ColumnType::BigInt).not_null().default(SqlValue::Int(0)))
            .column(
                ColumnDef::new("updated_at", ColumnType::Timestamp)
                    .not_null()
                    .default(SqlValue::CurrentTimestamp),
            )
            .primary_key(&["category", "rank"]);

        Transformation::portable(vec![Operation::CreateTable(table)])
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![Operation::DropTable("leaderboard_cache")])
    }
}
