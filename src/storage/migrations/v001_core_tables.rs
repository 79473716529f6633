//! Sectors, planets, players and the recipe catalog

use crate::storage::backend::BackendKind;
use crate::storage::builder::{ColumnDef, ColumnType, OnDelete, Operation, SqlValue, TableDef};
use crate::storage::registry::{Migration, Transformation, Version};

pub struct CreateCoreTables;

impl Migration for CreateCoreTables {
    fn version(&self) -> Version {
        1
    }

    fn name(&self) -> &'static str {
        "create_core_tables"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        let sectors = TableDef::new("sectors")
            .column(ColumnDef::id())
            .column(ColumnDef::new("name", ColumnType::Text).not_null().unique())
            .column(ColumnDef::new("x", ColumnType::Integer).not_null().default(SqlValue::Int(0)))
            .column(ColumnDef::new("y", ColumnType::Integer).not_null().default(SqlValue::Int(0)))
            .column(
                ColumnDef::new("created_at", ColumnType::Timestamp)
                    .not_null()
                    .default(SqlValue::CurrentTimestamp),
            );

        let planets = TableDef::new("planets")
            .column(ColumnDef::id())
            .column(
                ColumnDef::new("sector_id", ColumnType::BigInt)
                    .not_null()
                    .references("sectors", "id", OnDelete::Cascade),
            )
            .column(ColumnDef::new("name", ColumnType::Text).not_null())
            .column(ColumnDef::new("planet_type", ColumnType::Text));

        let players = TableDef::new("players")
            .column(ColumnDef::id())
            .column(ColumnDef::new("username", ColumnType::Text).not_null().unique())
            // Nullable: external-identity players have no password
            .column(ColumnDef::new("password_hash", ColumnType::Text))
            .column(
                ColumnDef::new("race", ColumnType::Text)
                    .not_null()
                    .default(SqlValue::Text("human")),
            )
            .column(
                ColumnDef::new("current_sector_id", ColumnType::BigInt).references(
                    "sectors",
                    "id",
                    OnDelete::SetNull,
                ),
            )
            .column(
                ColumnDef::new("created_at", ColumnType::Timestamp)
                    .not_null()
                    .default(SqlValue::CurrentTimestamp),
            );

        let recipes = TableDef::new("recipes")
            .column(ColumnDef::id())
            .column(ColumnDef::new("name", ColumnType::Text).not_null().unique())
            .column(ColumnDef::new("result_item", ColumnType::Text).not_null());

        Transformation::portable(vec![
            Operation::CreateTable(sectors),
            Operation::CreateTable(planets),
            Operation::CreateTable(players),
            Operation::CreateTable(recipes),
        ])
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![
            Operation::DropTable("recipes"),
            Operation::DropTable("players"),
            Operation::DropTable("planets"),
            Operation::DropTable("sectors"),
        ])
    }
}
