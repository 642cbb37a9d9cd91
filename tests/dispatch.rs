// tests/dispatch.rs
//
// Fan-out accounting and self-healing: per-endpoint failure isolation,
// threshold deactivation, timeout-as-failure, and stats aggregation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use newsroom_pipeline::push::dispatcher::{
    DispatchConfig, NotificationDispatcher, PublishEvent, PushMessage, PushSender,
};
use newsroom_pipeline::push::{DeliveryLog, PushSubscription, SubscriptionKeys, SubscriptionStore};

struct FakeSender {
    failing: HashSet<String>,
    slow: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeSender {
    fn new() -> Self {
        Self {
            failing: HashSet::new(),
            slow: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, endpoint: &str) -> Self {
        self.failing.insert(endpoint.to_string());
        self
    }

    fn slow(mut self, endpoint: &str) -> Self {
        self.slow.insert(endpoint.to_string());
        self
    }

    fn calls_to(&self, endpoint: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|e| *e == endpoint).count()
    }
}

#[async_trait]
impl PushSender for FakeSender {
    async fn send(&self, sub: &PushSubscription, _message: &PushMessage) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(sub.endpoint.clone());
        if self.slow.contains(&sub.endpoint) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        if self.failing.contains(&sub.endpoint) {
            bail!("endpoint gone");
        }
        Ok(())
    }
}

fn keys() -> SubscriptionKeys {
    SubscriptionKeys {
        p256dh: "BP-test".into(),
        auth: "secret".into(),
    }
}

fn event(id: u64) -> PublishEvent {
    PublishEvent {
        event_id: id,
        article_id: id,
        title: "Council approves budget".into(),
        category: "politics".into(),
        url: format!("/articles/{id}"),
    }
}

fn dispatcher(sender: Arc<FakeSender>, threshold: u32) -> NotificationDispatcher {
    NotificationDispatcher::new(
        Arc::new(SubscriptionStore::new()),
        Arc::new(DeliveryLog::new()),
        sender,
        DispatchConfig {
            failure_threshold: threshold,
            max_in_flight: 4,
            attempt_timeout: Duration::from_millis(200),
        },
    )
}

#[tokio::test]
async fn report_counts_match_failures() {
    let sender = Arc::new(FakeSender::new().failing("e3").failing("e4"));
    let d = dispatcher(Arc::clone(&sender), 5);
    for e in ["e1", "e2", "e3", "e4", "e5"] {
        d.store().subscribe(e, keys());
    }

    let report = d.dispatch(&event(1)).await;
    assert_eq!(report.sent, 5);
    assert_eq!(report.delivered, 3);
    assert_eq!(report.failed, 2);

    // Each failing endpoint incremented by exactly one; survivors reset.
    assert_eq!(d.store().get("e3").unwrap().consecutive_failures, 1);
    assert_eq!(d.store().get("e4").unwrap().consecutive_failures, 1);
    assert_eq!(d.store().get("e1").unwrap().consecutive_failures, 0);
    assert!(d.store().get("e1").unwrap().last_delivery_at.is_some());
}

#[tokio::test]
async fn threshold_breach_deactivates_and_stops_further_dispatch() {
    let sender = Arc::new(FakeSender::new().failing("dead"));
    let d = dispatcher(Arc::clone(&sender), 2);
    d.store().subscribe("dead", keys());
    d.store().subscribe("live", keys());

    d.dispatch(&event(1)).await;
    assert!(d.store().is_active("dead"), "one failure is below the threshold");
    d.dispatch(&event(2)).await;
    assert!(!d.store().is_active("dead"), "second failure crosses threshold 2");

    let report = d.dispatch(&event(3)).await;
    assert_eq!(report.sent, 1, "snapshot excludes the deactivated endpoint");
    assert_eq!(sender.calls_to("dead"), 2, "no attempt after deactivation");
    assert_eq!(sender.calls_to("live"), 3);
}

#[tokio::test]
async fn timeout_is_recorded_as_failure_without_aborting_the_batch() {
    let sender = Arc::new(FakeSender::new().slow("stuck"));
    let d = dispatcher(Arc::clone(&sender), 5);
    d.store().subscribe("stuck", keys());
    d.store().subscribe("fast", keys());

    let report = d.dispatch(&event(1)).await;
    assert_eq!(report.sent, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(d.store().get("stuck").unwrap().consecutive_failures, 1);
}

#[tokio::test]
async fn stats_windows_and_rates() {
    let sender = Arc::new(FakeSender::new().failing("bad"));
    let d = dispatcher(Arc::clone(&sender), 5);
    d.store().subscribe("good", keys());
    d.store().subscribe("bad", keys());

    d.dispatch(&event(1)).await;
    d.dispatch(&event(2)).await;
    d.log().record_click(1, "good");

    let stats = d.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 2);
    assert_eq!(stats.today.sent, 4);
    assert_eq!(stats.today.delivered, 2);
    assert_eq!(stats.today.clicked, 1);
    assert!((stats.delivery_rate - 0.5).abs() < f64::EPSILON);
    assert!((stats.click_rate - 0.5).abs() < f64::EPSILON);
    assert!(stats.last_activity.is_some());
}

#[tokio::test]
async fn dispatch_with_no_active_subscriptions_is_a_noop() {
    let sender = Arc::new(FakeSender::new());
    let d = dispatcher(Arc::clone(&sender), 5);
    d.store().subscribe("e", keys());
    d.store().unsubscribe("e");

    let report = d.dispatch(&event(1)).await;
    assert_eq!((report.sent, report.delivered, report.failed), (0, 0, 0));
    assert_eq!(sender.calls_to("e"), 0);
}
