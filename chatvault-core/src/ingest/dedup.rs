//! Deduplication gate: in-memory pre-filter over the persisted id set.
//!
//! This is the first of the gate's two layers. The second is the
//! storage-level UNIQUE constraint, which stays authoritative when
//! concurrent adapters race on overlapping ranges; a loser there is
//! reported as a duplicate by the repository, never as an error.

use crate::types::NormalizedMessage;
use std::collections::HashSet;

/// Partition a chat's batch into genuinely-new messages and re-deliveries.
///
/// `known` holds the native ids already persisted for the chat and is
/// updated as decisions are made, so duplicates *within* the incoming
/// batch are caught as well, not just duplicates against prior state.
/// Input order is preserved in both partitions.
pub fn partition_new(
    known: &mut HashSet<i64>,
    batch: Vec<NormalizedMessage>,
) -> (Vec<NormalizedMessage>, Vec<NormalizedMessage>) {
    let mut fresh = Vec::new();
    let mut duplicates = Vec::new();

    for msg in batch {
        if known.insert(msg.native_id) {
            fresh.push(msg);
        } else {
            duplicates.push(msg);
        }
    }

    (fresh, duplicates)
}
