//! # Eviction Planning
//!
//! Decides which entries of a namespace must go for the namespace to satisfy
//! its [`CacheRule`]. Planning is pure; the disk cache carries out the plan.

use chrono::{DateTime, Utc};

use crate::cache::types::{CacheEntry, CacheRule};

/// Entries to evict from `entries` so that the rest satisfies `rule`.
///
/// Expired entries go first, then least-recently-touched entries until the
/// count bound holds, then until the size bound holds. Ties in recency are
/// broken by id. `candidate` names a freshly written entry, which is ordered
/// after every other entry so older data is always evicted before it.
pub fn plan_eviction(
    entries: Vec<CacheEntry>,
    rule: &CacheRule,
    now: DateTime<Utc>,
    candidate: Option<&str>,
) -> Vec<CacheEntry> {
    let (mut evicted, mut kept): (Vec<_>, Vec<_>) = entries
        .into_iter()
        .partition(|entry| rule.is_expired(entry.created_at, now));

    // Oldest first; the candidate sorts last
    kept.sort_by(|a, b| {
        let a_is_candidate = candidate == Some(a.id.as_str());
        let b_is_candidate = candidate == Some(b.id.as_str());
        a_is_candidate
            .cmp(&b_is_candidate)
            .then_with(|| a.touched_at.cmp(&b.touched_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut remaining = kept.into_iter().collect::<std::collections::VecDeque<_>>();

    if let Some(max_count) = rule.max_count {
        while remaining.len() > max_count {
            if let Some(entry) = remaining.pop_front() {
                evicted.push(entry);
            }
        }
    }

    if let Some(max_size) = rule.max_size {
        let mut total: u64 = remaining.iter().map(|e| e.size).sum();
        while total > max_size {
            let Some(entry) = remaining.pop_front() else {
                break;
            };
            total -= entry.size;
            evicted.push(entry);
        }
    }

    evicted
}
