//! Core domain types for chatvault
//!
//! These types form the canonical data model that normalizes chat history
//! arriving from any source (live collector or historical backfill).
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Chat** | A conversation container with a platform-assigned integer identity |
//! | **User** | A participant; identified by a platform-assigned integer identity |
//! | **Message** | The atomic unit of ingestion; `(chat_id, native_id)` is unique store-wide |
//! | **Native id** | The message id assigned by the platform, unique only within its chat |
//! | **Watermark** | The highest native id known committed for a chat |
//! | **Source** | Which adapter delivered a record: live stream or backfill |
//!
//! A native id is meaningless outside its chat, which is why every lookup
//! and the uniqueness invariant are keyed by the `(chat_id, native_id)` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Sources
// ============================================

/// Which ingestion path delivered a record.
///
/// Both paths produce the same normalized shape and share one commit path;
/// the tag is recorded on each message row for lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Live event stream from the platform collector
    Live,
    /// Historical bulk backfill
    Backfill,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Live => "live",
            SourceKind::Backfill => "backfill",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(SourceKind::Live),
            "backfill" => Ok(SourceKind::Backfill),
            _ => Err(format!("unknown source kind: {}", s)),
        }
    }
}

// ============================================
// Chats
// ============================================

/// A conversation container.
///
/// The identity is platform-assigned and immutable; re-ingestion of a chat
/// with an existing identity merges metadata, never inserts a duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    /// Platform-assigned identity (primary key)
    pub id: i64,
    /// Display name (optional, mutable)
    pub name: Option<String>,
    /// Platform chat type ("group", "supergroup", ...)
    pub chat_type: Option<String>,
    /// Category/folder tag
    pub folder: Option<String>,
    /// Advisory member count
    pub members_count: Option<i64>,
    /// Active flag; flipped by external collaborators, never by ingestion
    pub is_active: bool,
    /// When this chat was first seen
    pub created_at: DateTime<Utc>,
    /// Last metadata update
    pub updated_at: DateTime<Utc>,
}

/// Metadata supplied for a chat by an inbound batch.
///
/// Only non-null fields are merged into an existing row; fields the source
/// did not supply leave the stored values untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatPatch {
    pub id: i64,
    pub name: Option<String>,
    pub chat_type: Option<String>,
    pub folder: Option<String>,
    pub members_count: Option<i64>,
}

// ============================================
// Users
// ============================================

/// Role classification for a user.
///
/// Ingestion only ever assigns the default `Client` role on first sight;
/// role changes are owned by an external collaborator and are never
/// downgraded by the ingestion path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Client,
    Manager,
    Director,
    Bot,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Client => "client",
            UserRole::Manager => "manager",
            UserRole::Director => "director",
            UserRole::Bot => "bot",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(UserRole::Client),
            "manager" => Ok(UserRole::Manager),
            "director" => Ok(UserRole::Director),
            "bot" => Ok(UserRole::Bot),
            _ => Err(format!("unknown user role: {}", s)),
        }
    }
}

/// A chat participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Platform-assigned identity (primary key)
    pub id: i64,
    /// Username without the leading @ (optional, mutable)
    pub username: Option<String>,
    /// First name
    pub first_name: Option<String>,
    /// Last name
    pub last_name: Option<String>,
    /// Role classification
    pub role: UserRole,
    /// First message observed from this user
    pub first_seen: DateTime<Utc>,
    /// Latest message timestamp observed; advances monotonically
    pub last_seen: DateTime<Utc>,
}

impl User {
    /// Best display label for reports: username, else first name, else id.
    pub fn display_label(&self) -> String {
        self.username
            .clone()
            .or_else(|| self.first_name.clone())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Profile fields supplied for a user by an inbound batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPatch {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Timestamp of the message carrying this patch; `last_seen` advances
    /// to the max of this and the stored value.
    pub seen_at: DateTime<Utc>,
}

// ============================================
// Messages
// ============================================

/// Payload kind of a message. Non-text kinds carry no text, or a caption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Photo,
    Document,
    Sticker,
    Voice,
    Video,
    Other,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Photo => "photo",
            MessageKind::Document => "document",
            MessageKind::Sticker => "sticker",
            MessageKind::Voice => "voice",
            MessageKind::Video => "video",
            MessageKind::Other => "other",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "photo" => Ok(MessageKind::Photo),
            "document" => Ok(MessageKind::Document),
            "sticker" => Ok(MessageKind::Sticker),
            "voice" => Ok(MessageKind::Voice),
            "video" => Ok(MessageKind::Video),
            "other" => Ok(MessageKind::Other),
            _ => Err(format!("unknown message kind: {}", s)),
        }
    }
}

/// A persisted message (the atomic unit of ingestion).
///
/// Created exactly once on first successful ingestion of its
/// `(chat_id, native_id)` pair; never updated or deleted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Surrogate key (auto-incremented)
    pub id: i64,
    /// Platform-native message id; unique only within the chat
    pub native_id: i64,
    /// Owning chat
    pub chat_id: i64,
    /// Sender
    pub user_id: i64,
    /// Text payload; absent for non-text messages
    pub text: Option<String>,
    /// Payload kind
    pub kind: MessageKind,
    /// Native id of the message this replies to (same chat only)
    pub reply_to_native_id: Option<i64>,
    /// When the message was sent on the platform
    pub sent_at: DateTime<Utc>,
    /// When the row was committed
    pub ingested_at: DateTime<Utc>,
    /// Which adapter committed the row
    pub source: SourceKind,
}

/// A normalized inbound message, produced by the entity normalizer.
///
/// All required fields are present and defaults are filled; the chat and
/// user patches carry whatever metadata the raw record supplied so the
/// identity upsert layer can merge it.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub native_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub text: Option<String>,
    pub kind: MessageKind,
    pub reply_to_native_id: Option<i64>,
    pub sent_at: DateTime<Utc>,
    pub source: SourceKind,
    /// Chat metadata carried by the record
    pub chat: ChatPatch,
    /// Sender metadata carried by the record
    pub user: UserPatch,
}
