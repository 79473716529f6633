use crate::model::DevicePlatform;
use crate::storage::backend::BackendKind;
use crate::storage::builder::{check_in, ColumnDef, ColumnType, OnDelete, Operation, SqlValue, TableDef};
use crate::storage::registry::{Migration, Transformation, Version};

/// Push-notification devices, one row per (player, token)
pub struct CreatePlayerDevices;

impl Migration for CreatePlayerDevices {
    fn version(&self) -> Version {
        8
    }

    fn name(&self) -> &'static str {
        "create_player_devices"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        let table = TableDef::new("player_devices")
            .column(ColumnDef::id())
            .column(
                ColumnDef::new("player_id", ColumnType::BigInt)
                    .not_null()
                    .references("players", "id", OnDelete::Cascade),
            )
            .column(ColumnDef::new("fcm_token", ColumnType::Text).not_null())
            .column(
                ColumnDef::new("platform", ColumnType::Text)
                    .not_null()
                    .check(check_in("platform", &DevicePlatform::values())),
            )
            .column(
                ColumnDef::new("updated_at", ColumnType::Timestamp)
                    .not_null()
                    .default(SqlValue::CurrentTimestamp),
            )
            .unique("uq_player_devices_player_token", &["player_id", "fcm_token"]);

        Transformation::portable(vec![Operation::CreateTable(table)])
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![Operation::DropTable("player_devices")])
    }
}
