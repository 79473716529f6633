//! `players.landed_at_planet_id`, a nullable reference to `planets`
//!
//! SQLite has no portable way to add a referencing column: the builder would
//! need to recreate `players`, and `players` is referenced by messages, notes,
//! devices and recipes while foreign keys are enforced. SQLite does accept a
//! plain `ADD COLUMN ... REFERENCES` when the column defaults to NULL, so that
//! statement is issued verbatim instead.

use crate::storage::backend::BackendKind;
use crate::storage::builder::{ColumnDef, ColumnType, OnDelete, Operation};
use crate::storage::registry::{Migration, Transformation, Version};

pub struct AddPlayerLandedAtPlanet;

impl Migration for AddPlayerLandedAtPlanet {
    fn version(&self) -> Version {
        9
    }

    fn name(&self) -> &'static str {
        "add_player_landed_at_planet"
    }

    fn up(&self, backend: BackendKind) -> Transformation {
        match backend {
            BackendKind::Sqlite => Transformation::native([
                "ALTER TABLE players ADD COLUMN landed_at_planet_id INTEGER \
                 REFERENCES planets (id) ON DELETE SET NULL",
            ]),
            BackendKind::Postgres => Transformation::portable(vec![Operation::add_column(
                "players",
                ColumnDef::new("landed_at_planet_id", ColumnType::BigInt).references(
                    "planets",
                    "id",
                    OnDelete::SetNull,
                ),
            )]),
        }
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        Transformation::portable(vec![Operation::drop_column("players", "landed_at_planet_id")])
    }
}
