// src/push/mod.rs
// Push-notification domain: subscription registry, append-only delivery
// accounting, and the dispatch fan-out (dispatcher.rs).

pub mod dispatcher;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryResult {
    Delivered,
    Failed,
    Skipped,
}

/// One attempt against one subscription for one publish event.
/// Immutable once written; the log is append-only and windowed by
/// day/week/month for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryRecord {
    pub event_id: u64,
    pub endpoint: String,
    pub result: DeliveryResult,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClickRecord {
    pub event_id: u64,
    pub endpoint: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WindowStats {
    pub sent: u64,
    pub delivered: u64,
    pub clicked: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub today: WindowStats,
    pub week: WindowStats,
    pub month: WindowStats,
    pub delivery_rate: f64,
    pub click_rate: f64,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Endpoint-keyed subscription registry, sharded so failure-count updates
/// on unrelated endpoints never contend. Subscriptions are deactivated,
/// never deleted, to preserve delivery statistics.
pub struct SubscriptionStore {
    shards: Vec<RwLock<HashMap<String, PushSubscription>>>,
}

impl Default for SubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard_for(&self, endpoint: &str) -> &RwLock<HashMap<String, PushSubscription>> {
        let mut h = DefaultHasher::new();
        endpoint.hash(&mut h);
        &self.shards[(h.finish() as usize) % SHARD_COUNT]
    }

    /// Insert a new subscription, or reactivate an existing endpoint with
    /// fresh keys and a clean failure count.
    pub fn subscribe(&self, endpoint: &str, keys: SubscriptionKeys) -> PushSubscription {
        let mut shard = self.shard_for(endpoint).write().expect("subscription shard poisoned");
        match shard.get_mut(endpoint) {
            Some(sub) => {
                sub.keys = keys;
                sub.is_active = true;
                sub.consecutive_failures = 0;
                sub.clone()
            }
            None => {
                let sub = PushSubscription {
                    endpoint: endpoint.to_string(),
                    keys,
                    is_active: true,
                    created_at: Utc::now(),
                    last_delivery_at: None,
                    consecutive_failures: 0,
                };
                shard.insert(endpoint.to_string(), sub.clone());
                sub
            }
        }
    }

    /// Idempotent: an already-inactive or unknown endpoint still reports
    /// success, because the caller cannot distinguish "already gone" from
    /// "never existed".
    pub fn unsubscribe(&self, endpoint: &str) {
        let mut shard = self.shard_for(endpoint).write().expect("subscription shard poisoned");
        if let Some(sub) = shard.get_mut(endpoint) {
            sub.is_active = false;
        }
    }

    pub fn get(&self, endpoint: &str) -> Option<PushSubscription> {
        self.shard_for(endpoint)
            .read()
            .expect("subscription shard poisoned")
            .get(endpoint)
            .cloned()
    }

    pub fn is_active(&self, endpoint: &str) -> bool {
        self.get(endpoint).is_some_and(|s| s.is_active)
    }

    /// Active subscriptions at this instant. A subscription activated
    /// after the snapshot sees no retroactive delivery.
    pub fn snapshot_active(&self) -> Vec<PushSubscription> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let map = shard.read().expect("subscription shard poisoned");
            out.extend(map.values().filter(|s| s.is_active).cloned());
        }
        out
    }

    pub fn record_success(&self, endpoint: &str) {
        let mut shard = self.shard_for(endpoint).write().expect("subscription shard poisoned");
        if let Some(sub) = shard.get_mut(endpoint) {
            sub.consecutive_failures = 0;
            sub.last_delivery_at = Some(Utc::now());
        }
    }

    /// Increment the consecutive-failure count; crossing `threshold`
    /// deactivates the endpoint. Returns true when this call deactivated it.
    pub fn record_failure(&self, endpoint: &str, threshold: u32) -> bool {
        let mut shard = self.shard_for(endpoint).write().expect("subscription shard poisoned");
        if let Some(sub) = shard.get_mut(endpoint) {
            sub.consecutive_failures += 1;
            if sub.is_active && sub.consecutive_failures >= threshold {
                sub.is_active = false;
                return true;
            }
        }
        false
    }

    /// (total, active, inactive)
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut total = 0usize;
        let mut active = 0usize;
        for shard in &self.shards {
            let map = shard.read().expect("subscription shard poisoned");
            total += map.len();
            active += map.values().filter(|s| s.is_active).count();
        }
        (total, active, total - active)
    }
}

/// Append-only delivery + click accounting.
#[derive(Default)]
pub struct DeliveryLog {
    records: Mutex<Vec<DeliveryRecord>>,
    clicks: Mutex<Vec<ClickRecord>>,
}

impl DeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: DeliveryRecord) {
        self.records.lock().expect("delivery log poisoned").push(record);
    }

    pub fn record_click(&self, event_id: u64, endpoint: &str) {
        self.clicks.lock().expect("click log poisoned").push(ClickRecord {
            event_id,
            endpoint: endpoint.to_string(),
            at: Utc::now(),
        });
    }

    /// Aggregate the log into the boundary stats shape. Rates with a zero
    /// denominator are 0, not a division error.
    pub fn stats(&self, store: &SubscriptionStore) -> PushStats {
        let records = self.records.lock().expect("delivery log poisoned");
        let clicks = self.clicks.lock().expect("click log poisoned");
        let now = Utc::now();

        let today_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
            .single()
            .unwrap_or(now);
        let week_start = now - ChronoDuration::days(7);
        let month_start = now - ChronoDuration::days(30);

        let window = |since: DateTime<Utc>| -> WindowStats {
            let mut w = WindowStats::default();
            for r in records.iter().filter(|r| r.at >= since) {
                match r.result {
                    DeliveryResult::Delivered => {
                        w.sent += 1;
                        w.delivered += 1;
                    }
                    DeliveryResult::Failed => w.sent += 1,
                    DeliveryResult::Skipped => {}
                }
            }
            w.clicked = clicks.iter().filter(|c| c.at >= since).count() as u64;
            w
        };

        let all = window(DateTime::<Utc>::MIN_UTC);
        let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };

        let last_record = records.iter().map(|r| r.at).max();
        let last_click = clicks.iter().map(|c| c.at).max();
        let (total, active, inactive) = store.counts();

        PushStats {
            total,
            active,
            inactive,
            today: window(today_start),
            week: window(week_start),
            month: window(month_start),
            delivery_rate: ratio(all.delivered, all.sent),
            click_rate: ratio(all.clicked, all.delivered),
            last_activity: last_record.into_iter().chain(last_click).max(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> SubscriptionKeys {
        SubscriptionKeys {
            p256dh: "BP-test".into(),
            auth: "secret".into(),
        }
    }

    #[test]
    fn unsubscribe_is_idempotent_for_unknown_endpoints() {
        let store = SubscriptionStore::new();
        store.unsubscribe("https://push.example/none");
        store.subscribe("https://push.example/a", keys());
        store.unsubscribe("https://push.example/a");
        store.unsubscribe("https://push.example/a");
        assert!(!store.is_active("https://push.example/a"));
        let (total, active, inactive) = store.counts();
        assert_eq!((total, active, inactive), (1, 0, 1));
    }

    #[test]
    fn failure_threshold_deactivates() {
        let store = SubscriptionStore::new();
        store.subscribe("e", keys());
        assert!(!store.record_failure("e", 3));
        assert!(!store.record_failure("e", 3));
        assert!(store.record_failure("e", 3), "third failure crosses threshold");
        assert!(!store.is_active("e"));
        // Already inactive: further failures never "re-deactivate".
        assert!(!store.record_failure("e", 3));
    }

    #[test]
    fn success_resets_failure_count() {
        let store = SubscriptionStore::new();
        store.subscribe("e", keys());
        store.record_failure("e", 5);
        store.record_failure("e", 5);
        store.record_success("e");
        assert_eq!(store.get("e").unwrap().consecutive_failures, 0);
        assert!(store.get("e").unwrap().last_delivery_at.is_some());
    }

    #[test]
    fn resubscribe_reactivates_with_clean_state() {
        let store = SubscriptionStore::new();
        store.subscribe("e", keys());
        store.record_failure("e", 1);
        assert!(!store.is_active("e"));
        store.subscribe("e", keys());
        let sub = store.get("e").unwrap();
        assert!(sub.is_active);
        assert_eq!(sub.consecutive_failures, 0);
    }

    #[test]
    fn stats_with_empty_log_are_zero_not_nan() {
        let store = SubscriptionStore::new();
        let log = DeliveryLog::new();
        let stats = log.stats(&store);
        assert_eq!(stats.delivery_rate, 0.0);
        assert_eq!(stats.click_rate, 0.0);
        assert!(stats.last_activity.is_none());
    }
}
