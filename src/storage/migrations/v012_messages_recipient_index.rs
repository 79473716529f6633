//! Inbox lookups by recipient
//!
//! On Postgres the index is built concurrently so the messages table stays
//! writable. `CONCURRENTLY` is refused inside a transaction, so the unit runs
//! outside one and the runner guards it with a dirty ledger row.

use crate::storage::backend::BackendKind;
use crate::storage::builder::{IndexDef, Operation};
use crate::storage::registry::{Migration, Transformation, Version};

const INDEX: &str = "idx_messages_recipient";

pub struct IndexMessagesRecipient;

impl Migration for IndexMessagesRecipient {
    fn version(&self) -> Version {
        12
    }

    fn name(&self) -> &'static str {
        "index_messages_recipient"
    }

    fn up(&self, backend: BackendKind) -> Transformation {
        match backend {
            BackendKind::Sqlite => Transformation::portable(vec![Operation::CreateIndex(IndexDef::new(
                INDEX,
                "messages",
                &["recipient_id", "recipient_deleted"],
            ))]),
            BackendKind::Postgres => Transformation::native([format!(
                "CREATE INDEX CONCURRENTLY {} ON messages (recipient_id, recipient_deleted)",
                INDEX
            )])
            .outside_transaction(),
        }
    }

    fn down(&self, backend: BackendKind) -> Transformation {
        match backend {
            BackendKind::Sqlite => Transformation::portable(vec![Operation::DropIndex(INDEX)]),
            BackendKind::Postgres => {
                Transformation::native([format!("DROP INDEX CONCURRENTLY {}", INDEX)]).outside_transaction()
            }
        }
    }
}
