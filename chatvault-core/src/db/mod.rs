//! Storage layer: SQLite schema, migrations and the repository.

mod repo;
pub mod schema;

pub use repo::{ChatOverview, Database, InsertOutcome};
