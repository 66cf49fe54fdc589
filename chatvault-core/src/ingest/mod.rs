//! Ingestion engine: normalization, identity upserts, dedup and commit.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌───────────────────┐     ┌─────────────────┐
//! │  Record Sources  │ ──► │ IngestCoordinator │ ──► │    Database     │
//! │ (live, backfill) │     │                   │     │ (chats, users,  │
//! └──────────────────┘     │  normalize        │     │  messages)      │
//!                          │  upsert identities│     └─────────────────┘
//!                          │  dedup gate       │
//!                          │  ordered commit   │
//!                          └───────────────────┘
//! ```
//!
//! Any number of coordinators may run concurrently against the same
//! database file, with no coordination between them: the dedup pre-check
//! is only an optimization, and the `(chat_id, native_id)` UNIQUE
//! constraint settles races. A batch for one chat moves through
//! normalization, a single identity-upsert pass, the dedup gate, and an
//! ordered commit; individual messages resolve independently to saved,
//! skipped or errored, while an identity-upsert storage failure aborts
//! that chat's batch only.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chatvault_core::{Database, SourceKind};
//! use chatvault_core::ingest::{DumpSource, IngestCoordinator};
//!
//! let db = Database::open(&path)?;
//! db.migrate()?;
//! let coordinator = IngestCoordinator::new(db);
//!
//! let dump = DumpSource::new("./dump");
//! let chats = dump.discover_chats()?;
//! let summary = coordinator.sync_source(SourceKind::Backfill, &dump, &chats);
//! println!("saved {} of {} messages", summary.messages_saved, summary.messages_seen);
//! ```

mod dedup;
mod dump;
mod normalize;
mod source;

pub use dedup::partition_new;
pub use dump::DumpSource;
pub use normalize::normalize;
pub use source::{RecordSource, StaticSource};

use crate::db::{Database, InsertOutcome};
use crate::error::{Error, Result};
use crate::types::{ChatPatch, NormalizedMessage, SourceKind, UserPatch};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use uuid::Uuid;

/// What to do with a reply whose target is not a known message of the
/// same chat (a cross-chat or dangling reference).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPolicy {
    /// Ingest the message with the reply reference nulled and count a
    /// warning (default).
    #[default]
    NullAndWarn,
    /// Count the message as errored and drop it.
    Reject,
}

/// Result of ingesting one chat's batch.
#[derive(Debug, Clone)]
pub struct ChatIngestReport {
    /// Chat the batch belonged to
    pub chat_id: i64,
    /// Records presented by the caller
    pub seen: usize,
    /// Messages committed
    pub saved: usize,
    /// Re-deliveries skipped (pre-check or storage-level duplicate)
    pub skipped: usize,
    /// Records that failed normalization or commit
    pub errored: usize,
    /// Replies nulled because their target was not in this chat
    pub reply_warnings: usize,
    /// Highest native id committed for the chat after this batch
    pub watermark: Option<i64>,
}

impl ChatIngestReport {
    fn new(chat_id: i64, seen: usize) -> Self {
        Self {
            chat_id,
            seen,
            saved: 0,
            skipped: 0,
            errored: 0,
            reply_warnings: 0,
            watermark: None,
        }
    }
}

/// Aggregate result of one sync run across many chats.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Run identifier for log correlation
    pub run_id: Uuid,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
    /// Chats whose batch completed (including all-duplicate batches)
    pub chats_processed: usize,
    /// Chats aborted by a chat-level failure
    pub chats_failed: usize,
    /// Records presented across all chats
    pub messages_seen: usize,
    /// Messages committed
    pub messages_saved: usize,
    /// Re-deliveries skipped
    pub messages_skipped: usize,
    /// Records that failed normalization or commit
    pub messages_errored: usize,
    /// Replies nulled across all chats
    pub reply_warnings: usize,
    /// Chat-level error descriptions (chat id → error)
    pub errors: Vec<(i64, String)>,
    /// Per-chat reports, in sync order
    pub chat_reports: Vec<ChatIngestReport>,
}

impl RunSummary {
    fn begin() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            chats_processed: 0,
            chats_failed: 0,
            messages_seen: 0,
            messages_saved: 0,
            messages_skipped: 0,
            messages_errored: 0,
            reply_warnings: 0,
            errors: Vec::new(),
            chat_reports: Vec::new(),
        }
    }

    fn absorb(&mut self, report: ChatIngestReport) {
        self.chats_processed += 1;
        self.messages_seen += report.seen;
        self.messages_saved += report.saved;
        self.messages_skipped += report.skipped;
        self.messages_errored += report.errored;
        self.reply_warnings += report.reply_warnings;
        self.chat_reports.push(report);
    }

    fn record_chat_error(&mut self, chat_id: i64, error: Error) {
        tracing::warn!(chat_id, error = %error, "Chat batch aborted");
        self.chats_failed += 1;
        self.errors.push((chat_id, error.to_string()));
    }

    /// True when nothing new was committed and nothing went wrong.
    pub fn is_noop(&self) -> bool {
        self.messages_saved == 0 && self.messages_errored == 0 && self.errors.is_empty()
    }
}

/// Coordinates batch ingestion for any number of sources.
///
/// Holds no shared mutable state beyond the database handle; all batch
/// tracking structures are call-scoped, so multiple coordinators can run
/// in one process without synchronization.
pub struct IngestCoordinator {
    db: Database,
    reply_policy: ReplyPolicy,
}

impl IngestCoordinator {
    /// Create a coordinator with the default reply policy.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            reply_policy: ReplyPolicy::default(),
        }
    }

    /// Create a coordinator with an explicit reply policy.
    pub fn with_reply_policy(db: Database, reply_policy: ReplyPolicy) -> Self {
        Self { db, reply_policy }
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Ingest one chat's worth of raw records from one source.
    ///
    /// Records are normalized, chat and user identities upserted once,
    /// the batch partitioned by the dedup gate, and the new subset
    /// committed in the order presented. A failure for one record counts
    /// as errored and the batch continues; a storage failure during the
    /// identity upserts aborts the whole batch with
    /// [`Error::StorageUnavailable`].
    pub fn ingest_batch(
        &self,
        chat_id: i64,
        source: SourceKind,
        records: &[serde_json::Value],
    ) -> Result<ChatIngestReport> {
        let mut report = ChatIngestReport::new(chat_id, records.len());

        // normalizing
        let mut batch = Vec::with_capacity(records.len());
        for raw in records {
            match normalize(raw, source) {
                Ok(msg) if msg.chat_id == chat_id => batch.push(msg),
                Ok(msg) => {
                    tracing::warn!(
                        expected = chat_id,
                        found = msg.chat_id,
                        native_id = msg.native_id,
                        "Record belongs to a different chat, counting as errored"
                    );
                    report.errored += 1;
                }
                Err(e) => {
                    tracing::warn!(chat_id, error = %e, "Dropping malformed record");
                    report.errored += 1;
                }
            }
        }

        if batch.is_empty() {
            report.watermark = self.db.watermark(chat_id)?;
            return Ok(report);
        }

        // identities-upserted: one chat upsert, one upsert per distinct user
        self.db
            .upsert_chat(&merge_chat_patches(chat_id, &batch))
            .map_err(storage_unavailable)?;
        for patch in merge_user_patches(&batch) {
            self.db.upsert_user(&patch).map_err(storage_unavailable)?;
        }

        // deduplicated
        let ids: Vec<i64> = batch.iter().map(|m| m.native_id).collect();
        let mut known = self
            .db
            .existing_native_ids(chat_id, &ids)
            .map_err(storage_unavailable)?;
        let (fresh, duplicates) = partition_new(&mut known, batch);
        report.skipped += duplicates.len();

        // committing: each message resolves to saved, skipped or errored
        let mut committed: HashSet<i64> = HashSet::new();
        for mut msg in fresh {
            if !self.resolve_reply(&mut msg, &committed, &mut report) {
                continue;
            }

            match self.db.insert_message(&msg) {
                Ok(InsertOutcome::Inserted(_)) => {
                    report.saved += 1;
                    committed.insert(msg.native_id);
                }
                Ok(InsertOutcome::Duplicate) => {
                    // Lost a race to a concurrent adapter; same as pre-detected
                    tracing::debug!(chat_id, native_id = msg.native_id, "Duplicate at commit");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        chat_id,
                        native_id = msg.native_id,
                        error = %e,
                        "Failed to commit message"
                    );
                    report.errored += 1;
                }
            }
        }

        report.watermark = self.db.watermark(chat_id)?;

        tracing::debug!(
            chat_id,
            seen = report.seen,
            saved = report.saved,
            skipped = report.skipped,
            errored = report.errored,
            "Chat batch done"
        );

        Ok(report)
    }

    /// Validate a reply reference against the chat's known messages.
    ///
    /// Returns false when the message should be dropped (reject policy).
    fn resolve_reply(
        &self,
        msg: &mut NormalizedMessage,
        committed: &HashSet<i64>,
        report: &mut ChatIngestReport,
    ) -> bool {
        let Some(target) = msg.reply_to_native_id else {
            return true;
        };

        let target_known = committed.contains(&target)
            || self
                .db
                .message_exists(msg.chat_id, target)
                .unwrap_or(false);
        if target_known {
            return true;
        }

        match self.reply_policy {
            ReplyPolicy::NullAndWarn => {
                tracing::debug!(
                    chat_id = msg.chat_id,
                    native_id = msg.native_id,
                    target,
                    "Nulling reply to unknown target"
                );
                msg.reply_to_native_id = None;
                report.reply_warnings += 1;
                true
            }
            ReplyPolicy::Reject => {
                tracing::warn!(
                    chat_id = msg.chat_id,
                    native_id = msg.native_id,
                    target,
                    "Rejecting message with unknown reply target"
                );
                report.errored += 1;
                false
            }
        }
    }

    /// Sync a set of chats from a record source (full run).
    ///
    /// For each chat, the fetch is bounded below by the stored watermark.
    /// No failure for one chat propagates past this boundary: failed
    /// chats are recorded in the summary and the run continues.
    pub fn sync_source(
        &self,
        source: SourceKind,
        src: &dyn RecordSource,
        chat_ids: &[i64],
    ) -> RunSummary {
        self.sync_source_with_progress(source, src, chat_ids, |_, _, _| {})
    }

    /// Sync a set of chats with a progress callback.
    ///
    /// The callback receives `(current_index, total, chat_id)` before each
    /// chat is processed, for progress indicators.
    pub fn sync_source_with_progress<F>(
        &self,
        source: SourceKind,
        src: &dyn RecordSource,
        chat_ids: &[i64],
        mut on_progress: F,
    ) -> RunSummary
    where
        F: FnMut(usize, usize, i64),
    {
        let mut run = RunSummary::begin();
        let total = chat_ids.len();

        tracing::info!(run_id = %run.run_id, chats = total, source = %source, "Sync run starting");

        for (i, &chat_id) in chat_ids.iter().enumerate() {
            on_progress(i, total, chat_id);

            let min_native_id = match self.db.watermark(chat_id) {
                Ok(w) => w.unwrap_or(0),
                Err(e) => {
                    run.record_chat_error(chat_id, e);
                    continue;
                }
            };

            let records = match src.fetch(chat_id, min_native_id) {
                Ok(r) => r,
                Err(e) => {
                    run.record_chat_error(chat_id, e);
                    continue;
                }
            };

            if records.is_empty() {
                tracing::debug!(chat_id, min_native_id, "No new records");
                continue;
            }

            match self.ingest_batch(chat_id, source, &records) {
                Ok(report) => run.absorb(report),
                Err(e) => run.record_chat_error(chat_id, e),
            }
        }

        run.finished_at = Utc::now();

        tracing::info!(
            run_id = %run.run_id,
            chats_processed = run.chats_processed,
            chats_failed = run.chats_failed,
            saved = run.messages_saved,
            skipped = run.messages_skipped,
            errored = run.messages_errored,
            "Sync run complete"
        );

        run
    }

    /// Sync every chat present in a dump directory.
    pub fn sync_dump(&self, root: &Path) -> Result<RunSummary> {
        let dump = DumpSource::new(root);
        let chats = dump.discover_chats()?;
        Ok(self.sync_source(SourceKind::Backfill, &dump, &chats))
    }
}

fn storage_unavailable(e: Error) -> Error {
    Error::StorageUnavailable(e.to_string())
}

/// Merge the chat metadata carried by a batch into one patch.
/// Later records win per field, since they are newer.
fn merge_chat_patches(chat_id: i64, batch: &[NormalizedMessage]) -> ChatPatch {
    let mut merged = ChatPatch {
        id: chat_id,
        ..Default::default()
    };
    for msg in batch {
        let p = &msg.chat;
        if p.name.is_some() {
            merged.name = p.name.clone();
        }
        if p.chat_type.is_some() {
            merged.chat_type = p.chat_type.clone();
        }
        if p.folder.is_some() {
            merged.folder = p.folder.clone();
        }
        if p.members_count.is_some() {
            merged.members_count = p.members_count;
        }
    }
    merged
}

/// Collapse a batch to one patch per distinct user, keeping the latest
/// non-null profile fields and the maximum seen-at timestamp.
fn merge_user_patches(batch: &[NormalizedMessage]) -> Vec<UserPatch> {
    let mut by_user: BTreeMap<i64, UserPatch> = BTreeMap::new();
    for msg in batch {
        let p = &msg.user;
        let entry = by_user.entry(p.id).or_insert_with(|| UserPatch {
            id: p.id,
            username: None,
            first_name: None,
            last_name: None,
            seen_at: p.seen_at,
        });
        if p.username.is_some() {
            entry.username = p.username.clone();
        }
        if p.first_name.is_some() {
            entry.first_name = p.first_name.clone();
        }
        if p.last_name.is_some() {
            entry.last_name = p.last_name.clone();
        }
        if p.seen_at > entry.seen_at {
            entry.seen_at = p.seen_at;
        }
    }
    by_user.into_values().collect()
}
