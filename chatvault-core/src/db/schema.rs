//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: chats, users, messages
    r#"
    CREATE TABLE IF NOT EXISTS chats (
        id               INTEGER PRIMARY KEY,  -- platform-assigned, immutable
        name             TEXT,
        chat_type        TEXT,
        folder           TEXT,
        members_count    INTEGER,
        is_active        INTEGER NOT NULL DEFAULT 1,
        created_at       DATETIME NOT NULL,
        updated_at       DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS users (
        id               INTEGER PRIMARY KEY,  -- platform-assigned, immutable
        username         TEXT,
        first_name       TEXT,
        last_name        TEXT,
        role             TEXT NOT NULL DEFAULT 'client',
        first_seen       DATETIME NOT NULL,
        last_seen        DATETIME NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        id                  INTEGER PRIMARY KEY AUTOINCREMENT,
        native_id           INTEGER NOT NULL,   -- platform id, unique per chat
        chat_id             INTEGER NOT NULL REFERENCES chats(id),
        user_id             INTEGER NOT NULL REFERENCES users(id),
        text                TEXT,
        kind                TEXT NOT NULL,
        reply_to_native_id  INTEGER,            -- same-chat native id, or NULL
        sent_at             DATETIME NOT NULL,  -- platform timestamp
        ingested_at         DATETIME NOT NULL,  -- commit timestamp
        source              TEXT NOT NULL,      -- 'live' or 'backfill'

        -- The authoritative uniqueness invariant: at most one row may exist
        -- for any (chat, native id) pair, regardless of ingestion source.
        UNIQUE(chat_id, native_id)
    );

    CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);
    CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id);
    CREATE INDEX IF NOT EXISTS idx_messages_sent_at ON messages(sent_at);
    CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
