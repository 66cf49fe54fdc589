//! Entity normalizer: raw inbound records to the canonical message shape.
//!
//! Adapters deliver loosely-shaped JSON records (field sets vary between
//! the live collector and backfill dumps). Normalization happens once at
//! this boundary; nothing deeper in the pipeline branches on source shape.

use crate::error::{Error, Result};
use crate::types::{ChatPatch, MessageKind, NormalizedMessage, SourceKind, UserPatch};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Normalize one raw record into the canonical message shape.
///
/// Pure function, no side effects. Required identity fields are
/// `message_id`, `chat_id` and `user_id`; a record missing any of them,
/// or carrying a non-integer value, fails with
/// [`Error::MalformedRecord`]. Optional fields get their documented
/// defaults: `message_type` → text, reply reference → absent,
/// `timestamp` → now.
pub fn normalize(raw: &Value, source: SourceKind) -> Result<NormalizedMessage> {
    let native_id = require_i64(raw, "message_id")?;
    let chat_id = require_i64(raw, "chat_id")?;
    let user_id = require_i64(raw, "user_id")?;
    let sent_at = parse_timestamp(raw)?;

    let kind = match opt_str(raw, "message_type") {
        // Unknown kinds are preserved as `other` rather than rejected
        Some(s) => s.parse().unwrap_or(MessageKind::Other),
        None => MessageKind::default(),
    };

    Ok(NormalizedMessage {
        native_id,
        chat_id,
        user_id,
        text: opt_str(raw, "text"),
        kind,
        reply_to_native_id: opt_i64(raw, "reply_to_message_id"),
        sent_at,
        source,
        chat: ChatPatch {
            id: chat_id,
            name: opt_str(raw, "chat_name"),
            chat_type: opt_str(raw, "chat_type"),
            folder: opt_str(raw, "folder"),
            members_count: opt_i64(raw, "members_count"),
        },
        user: UserPatch {
            id: user_id,
            username: opt_str(raw, "username"),
            first_name: opt_str(raw, "first_name"),
            last_name: opt_str(raw, "last_name"),
            seen_at: sent_at,
        },
    })
}

fn require_i64(raw: &Value, key: &str) -> Result<i64> {
    raw.get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::MalformedRecord {
            reason: format!("missing or non-integer field `{}`", key),
        })
}

fn opt_i64(raw: &Value, key: &str) -> Option<i64> {
    raw.get(key).and_then(Value::as_i64)
}

/// Optional string field; blank values count as absent so they cannot
/// clobber stored metadata during the upsert merge.
fn opt_str(raw: &Value, key: &str) -> Option<String> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Timestamps arrive as unix seconds (live collector) or RFC 3339 strings
/// (dump exports). A missing timestamp defaults to the ingestion time.
fn parse_timestamp(raw: &Value) -> Result<DateTime<Utc>> {
    match raw.get("timestamp") {
        None | Some(Value::Null) => Ok(Utc::now()),
        Some(v) => {
            if let Some(secs) = v.as_i64() {
                Utc.timestamp_opt(secs, 0)
                    .single()
                    .ok_or_else(|| Error::MalformedRecord {
                        reason: format!("timestamp out of range: {}", secs),
                    })
            } else if let Some(s) = v.as_str() {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| Error::MalformedRecord {
                        reason: format!("invalid timestamp `{}`: {}", s, e),
                    })
            } else {
                Err(Error::MalformedRecord {
                    reason: "timestamp must be unix seconds or an RFC 3339 string".to_string(),
                })
            }
        }
    }
}
