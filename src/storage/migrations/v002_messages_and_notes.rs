use crate::storage::backend::BackendKind;
use crate::storage::builder::{ColumnDef, ColumnType, OnDelete, Operation, SqlValue, TableDef};
use crate::storage::registry::{Migration, Transformation, Version};

pub struct CreateMessagesAndNotes;

fn flag(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Boolean)
        .not_null()
        .default(SqlValue::Bool(false))
}

impl Migration for CreateMessagesAndNotes {
    fn version(&self) -> Version {
        2
    }

    fn name(&self) -> &'static str {
        "create_messages_and_notes"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        // Each side deletes independently; the row goes once both flags are set
        let messages = TableDef::new("messages")
            .column(ColumnDef::id())
            .column(
                ColumnDef::new("sender_id", ColumnType::BigInt)
                    .not_null()
                    .references("players", "id", OnDelete::Cascade),
            )
            .column(
                ColumnDef::new("recipient_id", ColumnType::BigInt)
                    .not_null()
                    .references("players", "id", OnDelete::Cascade),
            )
            .column(ColumnDef::new("subject", ColumnType::Text).not_null())
            .column(ColumnDef::new("body", ColumnType::Text).not_null())
            .column(flag("read"))
            .column(flag("sender_deleted"))
            .column(flag("recipient_deleted"))
            .column(
                ColumnDef::new("created_at", ColumnType::Timestamp)
                    .not_null()
                    .default(SqlValue::CurrentTimestamp),
            );

        let notes = TableDef::new("notes")
            .column(ColumnDef::id())
            .column(
                ColumnDef::new("player_id", ColumnType::BigInt)
                    .not_null()
                    .references("players", "id", OnDelete::Cascade),
            )
            .column(ColumnDef::new("content", ColumnType::Text).not_null())
            .column(
                ColumnDef::new("created_at", ColumnType::Timestamp)
                    .not_null()
                    .default(SqlValue::CurrentTimestamp),
            );

        Transformation::portable(vec![Operation::CreateTable(messages), Operation::CreateTable(notes)])
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![Operation::DropTable("notes"), Operation::DropTable("messages")])
    }
}
