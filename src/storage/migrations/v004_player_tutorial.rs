use crate::storage::backend::BackendKind;
use crate::storage::builder::{ColumnDef, ColumnType, Operation, SqlValue};
use crate::storage::registry::{Migration, Transformation, Version};

pub struct AddPlayerTutorial;

impl Migration for AddPlayerTutorial {
    fn version(&self) -> Version {
        4
    }

    fn name(&self) -> &'static str {
        "add_player_tutorial"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        // Constant defaults keep this a plain ADD COLUMN on every backend
        Transformation::portable(vec![
            Operation::add_column(
                "players",
                ColumnDef::new("tutorial_step", ColumnType::Integer)
                    .not_null()
                    .default(SqlValue::Int(0)),
            ),
            Operation::add_column(
                "players",
                ColumnDef::new("tutorial_completed", ColumnType::Boolean)
                    .not_null()
                    .default(SqlValue::Bool(false)),
            ),
        ])
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![
            Operation::drop_column("players", "tutorial_completed"),
            Operation::drop_column("players", "tutorial_step"),
        ])
    }
}
