//! Sandbox tutorial state
//!
//! The sandbox tutorial tracks progress in `tutorial_state`. Players still
//! mid-way through the old linear tutorial would have no state to resume, so
//! they are force-completed first. The backfill runs before the column is
//! added, in the same transaction: a failure in either step rolls back both.

use crate::storage::backend::BackendKind;
use crate::storage::builder::{Backfill, ColumnDef, ColumnType, Operation, SqlValue};
use crate::storage::registry::{Migration, Transformation, Version};

pub struct AddTutorialSandboxState;

impl Migration for AddTutorialSandboxState {
    fn version(&self) -> Version {
        11
    }

    fn name(&self) -> &'static str {
        "add_tutorial_sandbox_state"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![
            Operation::Backfill(
                Backfill::table("players")
                    .set("tutorial_completed", SqlValue::Bool(true))
                    .filter("tutorial_completed", SqlValue::Bool(false)),
            ),
            Operation::add_column("players", ColumnDef::new("tutorial_state", ColumnType::Json)),
        ])
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![Operation::drop_column("players", "tutorial_state")])
    }

    /// Force-completed tutorials stay completed.
    fn data_lossy_down(&self) -> bool {
        true
    }
}
