use crate::storage::backend::BackendKind;
use crate::storage::builder::{ColumnDef, ColumnType, IndexDef, Operation};
use crate::storage::registry::{Migration, Transformation, Version};

pub struct AddPlayerMatrixUserId;

impl Migration for AddPlayerMatrixUserId {
    fn version(&self) -> Version {
        10
    }

    fn name(&self) -> &'static str {
        "add_player_matrix_user_id"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![
            Operation::add_column("players", ColumnDef::new("matrix_user_id", ColumnType::Text)),
            Operation::CreateIndex(
                IndexDef::new("uq_players_matrix_user_id", "players", &["matrix_user_id"]).unique(),
            ),
        ])
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![
            Operation::DropIndex("uq_players_matrix_user_id"),
            Operation::drop_column("players", "matrix_user_id"),
        ])
    }
}
