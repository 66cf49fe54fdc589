//! Record source abstraction.

use crate::error::Result;
use serde_json::Value;

/// A source of raw message records for one chat.
///
/// Both the live collector and historical backfills sit behind this seam;
/// the engine does not care how the sequence is obtained. Each call must
/// return the records for `chat_id` with native ids strictly above
/// `min_native_id`, in the order they should be committed. Calls are
/// restartable: fetching the same range twice is harmless because the
/// dedup gate skips re-deliveries.
pub trait RecordSource {
    fn fetch(&self, chat_id: i64, min_native_id: i64) -> Result<Vec<Value>>;
}

/// An in-memory source, mainly for tests and small fixed batches.
#[derive(Debug, Default)]
pub struct StaticSource {
    records: Vec<(i64, Value)>,
}

impl StaticSource {
    pub fn new(records: Vec<(i64, Value)>) -> Self {
        Self { records }
    }
}

impl RecordSource for StaticSource {
    fn fetch(&self, chat_id: i64, min_native_id: i64) -> Result<Vec<Value>> {
        Ok(self
            .records
            .iter()
            .filter(|(cid, raw)| {
                *cid == chat_id
                    && raw
                        .get("message_id")
                        .and_then(Value::as_i64)
                        // Records with an unreadable id are passed through so
                        // the normalizer can count them as errored.
                        .map(|id| id > min_native_id)
                        .unwrap_or(true)
            })
            .map(|(_, raw)| raw.clone())
            .collect())
    }
}
