//! Database repository layer
//!
//! Query, upsert and insert operations for chats, users and messages.
//!
//! Every operation is individually transactional (a single SQL statement).
//! The `(chat_id, native_id)` UNIQUE constraint on `messages` is the
//! authoritative dedup invariant; [`Database::insert_message`] reports a
//! violated insert as [`InsertOutcome::Duplicate`] so that callers can
//! count a skip instead of an error.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

/// Outcome of a message insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row committed; carries the surrogate key.
    Inserted(i64),
    /// The (chat_id, native_id) pair already exists. Expected under
    /// concurrent adapters racing on overlapping ranges; not an error.
    Duplicate,
}

/// Per-chat row for status/report views: chat, message count, watermark.
#[derive(Debug, Clone)]
pub struct ChatOverview {
    pub chat: Chat,
    pub message_count: i64,
    pub watermark: Option<i64>,
}

/// Database handle (single connection behind a mutex).
///
/// Multiple handles may be opened on the same file; cross-process and
/// cross-handle races on message inserts are resolved by the storage-level
/// uniqueness constraint, not by any in-process lock.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL + busy timeout so concurrent adapters can share the file
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // Chat operations
    // ============================================

    /// Insert or merge a chat.
    ///
    /// Only non-null patch fields overwrite stored values. `is_active` is
    /// set on first insert and never touched on merge, so ingestion can
    /// neither deactivate nor reactivate a chat.
    pub fn upsert_chat(&self, patch: &ChatPatch) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO chats (id, name, chat_type, folder, members_count, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
            ON CONFLICT(id) DO UPDATE SET
                name = COALESCE(excluded.name, chats.name),
                chat_type = COALESCE(excluded.chat_type, chats.chat_type),
                folder = COALESCE(excluded.folder, chats.folder),
                members_count = COALESCE(excluded.members_count, chats.members_count),
                updated_at = excluded.updated_at
            "#,
            params![
                patch.id,
                patch.name,
                patch.chat_type,
                patch.folder,
                patch.members_count,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a chat by ID
    pub fn get_chat(&self, id: i64) -> Result<Option<Chat>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM chats WHERE id = ?", [id], Self::row_to_chat)
            .optional()
            .map_err(Error::from)
    }

    /// List chats, optionally only active ones
    pub fn list_chats(&self, active_only: bool) -> Result<Vec<Chat>> {
        let conn = self.conn.lock().unwrap();
        let sql = if active_only {
            "SELECT * FROM chats WHERE is_active = 1 ORDER BY updated_at DESC"
        } else {
            "SELECT * FROM chats ORDER BY updated_at DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let chats = stmt
            .query_map([], Self::row_to_chat)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(chats)
    }

    /// Flip the active flag. Owned by external collaborators; the
    /// ingestion path never calls this.
    pub fn set_chat_active(&self, id: i64, active: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE chats SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// List chats with message counts and watermarks for report views.
    pub fn chat_overview(&self) -> Result<Vec<ChatOverview>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                c.*,
                COUNT(m.id) as message_count,
                MAX(m.native_id) as watermark
            FROM chats c
            LEFT JOIN messages m ON m.chat_id = c.id
            GROUP BY c.id
            ORDER BY c.updated_at DESC
            "#,
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(ChatOverview {
                    chat: Self::row_to_chat(row)?,
                    message_count: row.get("message_count")?,
                    watermark: row.get("watermark")?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_chat(row: &Row) -> rusqlite::Result<Chat> {
        let created_at_str: String = row.get("created_at")?;
        let updated_at_str: String = row.get("updated_at")?;

        Ok(Chat {
            id: row.get("id")?,
            name: row.get("name")?,
            chat_type: row.get("chat_type")?,
            folder: row.get("folder")?,
            members_count: row.get("members_count")?,
            is_active: row.get("is_active")?,
            created_at: parse_datetime(&created_at_str),
            updated_at: parse_datetime(&updated_at_str),
        })
    }

    // ============================================
    // User operations
    // ============================================

    /// Insert or merge a user.
    ///
    /// New users get the default `client` role. Merges never change the
    /// role and never regress `last_seen`: it advances to the max of the
    /// stored and incoming timestamps regardless of arrival order.
    pub fn upsert_user(&self, patch: &UserPatch) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO users (id, username, first_name, last_name, role, first_seen, last_seen)
            VALUES (?1, ?2, ?3, ?4, 'client', ?5, ?5)
            ON CONFLICT(id) DO UPDATE SET
                username = COALESCE(excluded.username, users.username),
                first_name = COALESCE(excluded.first_name, users.first_name),
                last_name = COALESCE(excluded.last_name, users.last_name),
                last_seen = MAX(users.last_seen, excluded.last_seen)
            "#,
            params![
                patch.id,
                patch.username,
                patch.first_name,
                patch.last_name,
                patch.seen_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a user by ID
    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM users WHERE id = ?", [id], Self::row_to_user)
            .optional()
            .map_err(Error::from)
    }

    /// Set a user's role. Owned by external collaborators (role heuristics
    /// live outside the engine); the ingestion path never calls this.
    pub fn set_user_role(&self, id: i64, role: UserRole) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE users SET role = ?1 WHERE id = ?2",
            params![role.as_str(), id],
        )?;
        Ok(())
    }

    /// User counts per role, for report views.
    pub fn count_users_by_role(&self) -> Result<Vec<(UserRole, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT role, COUNT(*) FROM users GROUP BY role ORDER BY COUNT(*) DESC")?;
        let rows = stmt
            .query_map([], |row| {
                let role_str: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((role_str, count))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(role, count)| (role.parse().unwrap_or(UserRole::Client), count))
            .collect())
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        let role_str: String = row.get("role")?;
        let first_seen_str: String = row.get("first_seen")?;
        let last_seen_str: String = row.get("last_seen")?;

        Ok(User {
            id: row.get("id")?,
            username: row.get("username")?,
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            role: role_str.parse().unwrap_or(UserRole::Client),
            first_seen: parse_datetime(&first_seen_str),
            last_seen: parse_datetime(&last_seen_str),
        })
    }

    // ============================================
    // Message operations
    // ============================================

    /// Which of the given native ids are already persisted for a chat.
    ///
    /// Used by the dedup gate as a pre-filter; the UNIQUE constraint
    /// remains the source of truth under concurrency.
    pub fn existing_native_ids(&self, chat_id: i64, ids: &[i64]) -> Result<HashSet<i64>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let conn = self.conn.lock().unwrap();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT native_id FROM messages WHERE chat_id = ? AND native_id IN ({})",
            placeholders
        );

        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(chat_id)];
        for id in ids {
            params.push(Box::new(*id));
        }
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql)?;
        let present = stmt
            .query_map(params_refs.as_slice(), |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(present)
    }

    /// Check whether a message exists in a chat by native id.
    pub fn message_exists(&self, chat_id: i64, native_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM messages WHERE chat_id = ? AND native_id = ?",
                params![chat_id, native_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert a message, enforcing the (chat_id, native_id) invariant.
    ///
    /// A UNIQUE violation is reported as [`InsertOutcome::Duplicate`];
    /// any other failure is a real error.
    pub fn insert_message(&self, msg: &NormalizedMessage) -> Result<InsertOutcome> {
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            r#"
            INSERT INTO messages (native_id, chat_id, user_id, text, kind,
                                  reply_to_native_id, sent_at, ingested_at, source)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                msg.native_id,
                msg.chat_id,
                msg.user_id,
                msg.text,
                msg.kind.as_str(),
                msg.reply_to_native_id,
                msg.sent_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                msg.source.as_str(),
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted(conn.last_insert_rowid())),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Highest native id committed for a chat, if any.
    ///
    /// Adapters use this to bound the next fetch's lower range.
    pub fn watermark(&self, chat_id: i64) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(native_id) FROM messages WHERE chat_id = ?",
            [chat_id],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// Get a message by its (chat, native id) pair
    pub fn get_message(&self, chat_id: i64, native_id: i64) -> Result<Option<Message>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM messages WHERE chat_id = ? AND native_id = ?",
            params![chat_id, native_id],
            Self::row_to_message,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Most recent messages for a chat, newest first
    pub fn recent_messages(&self, chat_id: i64, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM messages WHERE chat_id = ? ORDER BY sent_at DESC, native_id DESC LIMIT ?",
        )?;
        let messages = stmt
            .query_map(params![chat_id, limit as i64], Self::row_to_message)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    /// Count messages, optionally for a single chat
    pub fn count_messages(&self, chat_id: Option<i64>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = match chat_id {
            Some(id) => conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?",
                [id],
                |r| r.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?,
        };
        Ok(count)
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<Message> {
        let kind_str: String = row.get("kind")?;
        let source_str: String = row.get("source")?;
        let sent_at_str: String = row.get("sent_at")?;
        let ingested_at_str: String = row.get("ingested_at")?;

        Ok(Message {
            id: row.get("id")?,
            native_id: row.get("native_id")?,
            chat_id: row.get("chat_id")?,
            user_id: row.get("user_id")?,
            text: row.get("text")?,
            kind: kind_str.parse().unwrap_or(MessageKind::Other),
            reply_to_native_id: row.get("reply_to_native_id")?,
            sent_at: parse_datetime(&sent_at_str),
            ingested_at: parse_datetime(&ingested_at_str),
            source: source_str.parse().unwrap_or(SourceKind::Backfill),
        })
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn patch(id: i64, name: Option<&str>) -> ChatPatch {
        ChatPatch {
            id,
            name: name.map(String::from),
            ..Default::default()
        }
    }

    fn user_patch(id: i64, username: Option<&str>, seen_at: DateTime<Utc>) -> UserPatch {
        UserPatch {
            id,
            username: username.map(String::from),
            first_name: None,
            last_name: None,
            seen_at,
        }
    }

    fn msg(chat_id: i64, user_id: i64, native_id: i64, text: &str) -> NormalizedMessage {
        NormalizedMessage {
            native_id,
            chat_id,
            user_id,
            text: Some(text.to_string()),
            kind: MessageKind::Text,
            reply_to_native_id: None,
            sent_at: ts(1_700_000_000 + native_id),
            source: SourceKind::Backfill,
            chat: patch(chat_id, None),
            user: user_patch(user_id, None, ts(1_700_000_000 + native_id)),
        }
    }

    #[test]
    fn test_chat_merge_keeps_existing_fields() {
        let db = test_db();

        db.upsert_chat(&ChatPatch {
            id: 100,
            name: Some("Flowers".to_string()),
            chat_type: Some("group".to_string()),
            folder: None,
            members_count: None,
        })
        .unwrap();

        // A later batch supplies nothing for name, only a folder.
        db.upsert_chat(&ChatPatch {
            id: 100,
            name: None,
            chat_type: None,
            folder: Some("retail".to_string()),
            members_count: Some(25),
        })
        .unwrap();

        let chat = db.get_chat(100).unwrap().unwrap();
        assert_eq!(chat.name.as_deref(), Some("Flowers"));
        assert_eq!(chat.chat_type.as_deref(), Some("group"));
        assert_eq!(chat.folder.as_deref(), Some("retail"));
        assert_eq!(chat.members_count, Some(25));
        assert!(chat.is_active);
    }

    #[test]
    fn test_chat_merge_does_not_touch_active_flag() {
        let db = test_db();
        db.upsert_chat(&patch(100, Some("A"))).unwrap();
        db.set_chat_active(100, false).unwrap();

        db.upsert_chat(&patch(100, Some("B"))).unwrap();

        let chat = db.get_chat(100).unwrap().unwrap();
        assert!(!chat.is_active, "ingestion must not flip is_active");
        assert_eq!(chat.name.as_deref(), Some("B"));
    }

    #[test]
    fn test_user_last_seen_is_monotonic() {
        let db = test_db();

        db.upsert_user(&user_patch(200, Some("ann"), ts(2000))).unwrap();
        // Older record arrives later (e.g. a backfill).
        db.upsert_user(&user_patch(200, None, ts(1000))).unwrap();

        let user = db.get_user(200).unwrap().unwrap();
        assert_eq!(user.last_seen, ts(2000));
        assert_eq!(user.username.as_deref(), Some("ann"));

        db.upsert_user(&user_patch(200, None, ts(3000))).unwrap();
        let user = db.get_user(200).unwrap().unwrap();
        assert_eq!(user.last_seen, ts(3000));
    }

    #[test]
    fn test_user_role_survives_upserts() {
        let db = test_db();
        db.upsert_user(&user_patch(200, None, ts(1000))).unwrap();
        db.set_user_role(200, UserRole::Manager).unwrap();

        db.upsert_user(&user_patch(200, Some("boss"), ts(2000))).unwrap();

        let user = db.get_user(200).unwrap().unwrap();
        assert_eq!(user.role, UserRole::Manager);
    }

    #[test]
    fn test_insert_message_reports_duplicate() {
        let db = test_db();
        db.upsert_chat(&patch(100, None)).unwrap();
        db.upsert_user(&user_patch(200, None, ts(1000))).unwrap();

        let first = db.insert_message(&msg(100, 200, 50, "hello")).unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = db.insert_message(&msg(100, 200, 50, "different payload")).unwrap();
        assert_eq!(second, InsertOutcome::Duplicate);

        // First payload wins; exactly one row exists.
        let stored = db.get_message(100, 50).unwrap().unwrap();
        assert_eq!(stored.text.as_deref(), Some("hello"));
        assert_eq!(db.count_messages(Some(100)).unwrap(), 1);
    }

    #[test]
    fn test_same_native_id_in_different_chats_is_allowed() {
        let db = test_db();
        db.upsert_chat(&patch(100, None)).unwrap();
        db.upsert_chat(&patch(101, None)).unwrap();
        db.upsert_user(&user_patch(200, None, ts(1000))).unwrap();

        assert!(matches!(
            db.insert_message(&msg(100, 200, 50, "a")).unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert!(matches!(
            db.insert_message(&msg(101, 200, 50, "b")).unwrap(),
            InsertOutcome::Inserted(_)
        ));
    }

    #[test]
    fn test_existing_native_ids_and_watermark() {
        let db = test_db();
        db.upsert_chat(&patch(100, None)).unwrap();
        db.upsert_user(&user_patch(200, None, ts(1000))).unwrap();

        assert_eq!(db.watermark(100).unwrap(), None);

        for native_id in [3, 7, 9] {
            db.insert_message(&msg(100, 200, native_id, "x")).unwrap();
        }

        let present = db.existing_native_ids(100, &[1, 3, 7, 20]).unwrap();
        assert_eq!(present, HashSet::from([3, 7]));
        assert_eq!(db.watermark(100).unwrap(), Some(9));
        assert!(db.message_exists(100, 7).unwrap());
        assert!(!db.message_exists(100, 8).unwrap());
    }

    #[test]
    fn test_chat_overview_counts() {
        let db = test_db();
        db.upsert_chat(&patch(100, Some("A"))).unwrap();
        db.upsert_chat(&patch(101, Some("B"))).unwrap();
        db.upsert_user(&user_patch(200, None, ts(1000))).unwrap();
        db.insert_message(&msg(100, 200, 1, "x")).unwrap();
        db.insert_message(&msg(100, 200, 2, "y")).unwrap();

        let overview = db.chat_overview().unwrap();
        assert_eq!(overview.len(), 2);
        let a = overview.iter().find(|o| o.chat.id == 100).unwrap();
        assert_eq!(a.message_count, 2);
        assert_eq!(a.watermark, Some(2));
        let b = overview.iter().find(|o| o.chat.id == 101).unwrap();
        assert_eq!(b.message_count, 0);
        assert_eq!(b.watermark, None);
    }
}
