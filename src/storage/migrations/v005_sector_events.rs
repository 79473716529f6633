//! Transient sector events
//!
//! Closed sets for `event_type` and `status` come from the model enums so the
//! CHECK constraints and the Rust types cannot drift apart.

use crate::model::{SectorEventStatus, SectorEventType};
use crate::storage::backend::BackendKind;
use crate::storage::builder::{
    check_in, ColumnDef, ColumnType, IndexDef, OnDelete, Operation, SqlValue, TableDef,
};
use crate::storage::registry::{Migration, Transformation, Version};

pub struct CreateSectorEvents;

impl Migration for CreateSectorEvents {
    fn version(&self) -> Version {
        5
    }

    fn name(&self) -> &'static str {
        "create_sector_events"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        let table = TableDef::new("sector_events")
            .column(ColumnDef::id())
            .column(
                ColumnDef::new("sector_id", ColumnType::BigInt)
                    .not_null()
                    .references("sectors", "id", OnDelete::Cascade),
            )
            .column(
                ColumnDef::new("event_type", ColumnType::Text)
                    .not_null()
                    .check(check_in("event_type", &SectorEventType::values())),
            )
            .column(
                ColumnDef::new("data", ColumnType::Json)
                    .not_null()
                    .default(SqlValue::Json("{}")),
            )
            .column(
                ColumnDef::new("status", ColumnType::Text)
                    .not_null()
                    .default(SqlValue::Text("active"))
                    .check(check_in("status", &SectorEventStatus::values())),
            )
            .column(
                ColumnDef::new("resolved_by_id", ColumnType::BigInt).references(
                    "players",
                    "id",
                    OnDelete::SetNull,
                ),
            )
            .column(
                ColumnDef::new("created_at", ColumnType::Timestamp)
                    .not_null()
                    .default(SqlValue::CurrentTimestamp),
            )
            .column(ColumnDef::new("expires_at", ColumnType::Timestamp).not_null())
            .check("ck_sector_events_expiry", "expires_at > created_at");

        Transformation::portable(vec![
            Operation::CreateTable(table),
            Operation::CreateIndex(IndexDef::new(
                "idx_sector_events_sector_status",
                "sector_events",
                &["sector_id", "status"],
            )),
        ])
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![
            Operation::DropIndex("idx_sector_events_sector_status"),
            Operation::DropTable("sector_events"),
        ])
    }
}
