//! # chatvault-core
//!
//! Core library for chatvault - a deduplicating chat-history store.
//!
//! This library provides:
//! - Domain types for chats, users and messages
//! - SQLite storage layer with a storage-enforced uniqueness invariant
//! - The ingestion engine: normalize, upsert identities, dedup, commit
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Messages arrive from a live collector and from historical backfills,
//! both producing the same raw record shape. The engine normalizes each
//! record, ensures the referenced chat and user exist, and commits
//! exactly the novel messages, keyed by `(chat_id, native_id)`. Any
//! number of adapters may run concurrently without coordinating: the
//! storage-level UNIQUE constraint settles every race.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chatvault_core::{Config, Database};
//! use chatvault_core::ingest::IngestCoordinator;
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Database::open(&config.database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! let coordinator = IngestCoordinator::new(db);
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{ChatOverview, Database, InsertOutcome};
pub use error::{Error, Result};
pub use ingest::{ChatIngestReport, IngestCoordinator, RunSummary};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod types;
