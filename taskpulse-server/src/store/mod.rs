//! Persistence layer over the SQLite pool
//!
//! Each repository owns the SQL for one aggregate. Idempotency comes from
//! table constraints (`INSERT OR IGNORE`, guarded `UPDATE`s), not from locks.

pub mod events;
pub mod tasks;
pub mod users;

pub use events::{normalize_targets, BulkDeleteOutcome, EventStore, EventView, NewEvent};
pub use tasks::{
    Dashboard, NewTask, SortOrder, StatusCounts, TaskFilter, TaskRepo, TaskSort, TaskUpdate,
};
pub use users::UserRepo;

use sqlx::{QueryBuilder, Sqlite};

/// Append `(?, ?, ...)` binding every id
pub(crate) fn push_id_list<'a, S: AsRef<str>>(qb: &mut QueryBuilder<'a, Sqlite>, ids: &'a [S]) {
    qb.push("(");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.as_ref());
    }
    separated.push_unseparated(")");
}

/// Fresh random identifier for a new row
pub(crate) fn new_guid() -> String {
    uuid::Uuid::new_v4().to_string()
}
