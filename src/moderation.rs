// src/moderation.rs
// Staging queue for scraped items awaiting an operator decision.
//
// State machine per item: Pending --approve--> Approved (terminal),
// Pending --reject--> Rejected (terminal). Re-deciding a decided item is
// an InvalidTransition, never a silent success: downstream cache
// invalidation and push dispatch must fire exactly once per item.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::dedup;
use crate::error::{PipelineError, Result};
use crate::sources::ScrapedDocument;

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub id: u64,
    pub source_url: String,
    pub title: String,
    pub fingerprint: String,
    pub raw_content: String,
    pub category: String,
    pub extracted_at: DateTime<Utc>,
    pub status: ItemStatus,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Per-status totals, reported on the status surface.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

/// In-memory item store. Items are sharded by id so transitions on
/// unrelated ids never serialize on one lock; the shard write lock gives
/// per-id mutual exclusion, so of two racing decisions exactly one wins
/// and the loser observes InvalidTransition.
///
/// Items are never deleted: rejected items stay as an audit trail but
/// leave the live fingerprint index, so identical content may be
/// resubmitted after a rejection.
pub struct ModerationQueue {
    shards: Vec<RwLock<HashMap<u64, ScrapedItem>>>,
    // fingerprint -> id for items not in Rejected status; guarded so the
    // duplicate check and the reservation are one atomic step.
    live_fingerprints: Mutex<HashMap<String, u64>>,
    next_id: AtomicU64,
}

impl Default for ModerationQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ModerationQueue {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            live_fingerprints: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn shard_for(&self, id: u64) -> &RwLock<HashMap<u64, ScrapedItem>> {
        let mut h = DefaultHasher::new();
        id.hash(&mut h);
        &self.shards[(h.finish() as usize) % SHARD_COUNT]
    }

    /// Insert a freshly scraped document as Pending. Fails with
    /// DuplicateContent when a Pending/Approved item already carries the
    /// same content fingerprint.
    pub fn submit(&self, doc: &ScrapedDocument) -> Result<ScrapedItem> {
        let fp = dedup::fingerprint(&doc.body);

        let id = {
            let mut live = self.live_fingerprints.lock().expect("fingerprint index poisoned");
            if let Some(&existing_id) = live.get(&fp) {
                counter!("moderation_duplicates_total").increment(1);
                return Err(PipelineError::DuplicateContent {
                    fingerprint: fp,
                    existing_id,
                });
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            live.insert(fp.clone(), id);
            id
        };

        let item = ScrapedItem {
            id,
            source_url: doc.source_url.clone(),
            title: doc.title.clone(),
            fingerprint: fp,
            raw_content: doc.body.clone(),
            category: doc.category.clone(),
            extracted_at: Utc::now(),
            status: ItemStatus::Pending,
            decided_at: None,
        };

        self.shard_for(id)
            .write()
            .expect("item shard poisoned")
            .insert(id, item.clone());
        counter!("moderation_submitted_total").increment(1);
        Ok(item)
    }

    /// Pending -> Approved. Returns the item so the coordinator can drive
    /// cache invalidation and dispatch; this is the exactly-once publish
    /// trigger point.
    pub fn approve(&self, id: u64) -> Result<ScrapedItem> {
        self.transition(id, ItemStatus::Approved)
    }

    /// Pending -> Rejected. No downstream side effects; the fingerprint
    /// leaves the live index so the content may come back later.
    pub fn reject(&self, id: u64) -> Result<ScrapedItem> {
        let item = self.transition(id, ItemStatus::Rejected)?;
        self.live_fingerprints
            .lock()
            .expect("fingerprint index poisoned")
            .remove(&item.fingerprint);
        Ok(item)
    }

    fn transition(&self, id: u64, to: ItemStatus) -> Result<ScrapedItem> {
        let mut shard = self.shard_for(id).write().expect("item shard poisoned");
        let item = shard.get_mut(&id).ok_or(PipelineError::NotFound(id))?;
        if item.status != ItemStatus::Pending {
            return Err(PipelineError::InvalidTransition {
                id,
                current: item.status,
            });
        }
        item.status = to;
        item.decided_at = Some(Utc::now());
        counter!("moderation_decisions_total", "decision" => match to {
            ItemStatus::Approved => "approve",
            _ => "reject",
        })
        .increment(1);
        Ok(item.clone())
    }

    pub fn get(&self, id: u64) -> Option<ScrapedItem> {
        self.shard_for(id).read().expect("item shard poisoned").get(&id).cloned()
    }

    /// Approved items for one category, newest first. This is the source
    /// of truth the publish cache recomputes from on a miss.
    pub fn approved_in_category(&self, category: &str) -> Vec<ScrapedItem> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let map = shard.read().expect("item shard poisoned");
            out.extend(
                map.values()
                    .filter(|i| i.status == ItemStatus::Approved && i.category == category)
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.decided_at.cmp(&a.decided_at));
        out
    }

    pub fn counts(&self) -> QueueCounts {
        let mut c = QueueCounts::default();
        for shard in &self.shards {
            for item in shard.read().expect("item shard poisoned").values() {
                match item.status {
                    ItemStatus::Pending => c.pending += 1,
                    ItemStatus::Approved => c.approved += 1,
                    ItemStatus::Rejected => c.rejected += 1,
                }
            }
        }
        c
    }
}
