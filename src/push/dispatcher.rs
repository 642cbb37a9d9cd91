// src/push/dispatcher.rs
// Fan-out of one publish event to every active subscription, with
// per-endpoint failure isolation: one dead endpoint never aborts the
// batch, and repeated failures deactivate the endpoint on their own.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::{DeliveryLog, DeliveryRecord, DeliveryResult, PushStats, PushSubscription, SubscriptionStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEvent {
    pub event_id: u64,
    pub article_id: u64,
    pub title: String,
    pub category: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub url: String,
    pub tag: String,
}

impl PushMessage {
    pub fn from_event(event: &PublishEvent) -> Self {
        Self {
            title: event.title.clone(),
            body: format!("New in {}", event.category),
            url: event.url.clone(),
            tag: format!("article-{}", event.article_id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Consecutive failures after which an endpoint is deactivated.
    pub failure_threshold: u32,
    /// Upper bound on in-flight deliveries per dispatch.
    pub max_in_flight: usize,
    /// Per-attempt timeout; a timed-out attempt is recorded Failed and the
    /// batch continues.
    pub attempt_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            max_in_flight: 8,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// One delivery attempt against one endpoint. Tests inject fakes; the
/// production implementation posts over HTTP.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, message: &PushMessage) -> Result<()>;
}

/// Sends the payload to the subscription endpoint as JSON. Encryption per
/// RFC 8291 is delegated to the push gateway fronting the endpoints.
pub struct HttpPushSender {
    client: reqwest::Client,
}

impl HttpPushSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPushSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(&self, subscription: &PushSubscription, message: &PushMessage) -> Result<()> {
        let resp = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", "86400")
            .json(message)
            .send()
            .await
            .context("push endpoint request")?;
        resp.error_for_status().context("push endpoint status")?;
        Ok(())
    }
}

pub struct NotificationDispatcher {
    store: Arc<SubscriptionStore>,
    log: Arc<DeliveryLog>,
    sender: Arc<dyn PushSender>,
    cfg: DispatchConfig,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<SubscriptionStore>,
        log: Arc<DeliveryLog>,
        sender: Arc<dyn PushSender>,
        cfg: DispatchConfig,
    ) -> Self {
        Self {
            store,
            log,
            sender,
            cfg,
        }
    }

    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    pub fn log(&self) -> &Arc<DeliveryLog> {
        &self.log
    }

    /// Fan the event out to the subscriptions active right now. Attempts
    /// run with bounded parallelism and an individual timeout; there is no
    /// batch-level cancellation, every issued attempt completes on its own.
    pub async fn dispatch(&self, event: &PublishEvent) -> DispatchReport {
        let snapshot = self.store.snapshot_active();
        let mut report = DispatchReport {
            sent: snapshot.len(),
            ..Default::default()
        };
        if snapshot.is_empty() {
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.cfg.max_in_flight.max(1)));
        let message = Arc::new(PushMessage::from_event(event));
        let mut attempts: JoinSet<(String, DeliveryResult)> = JoinSet::new();

        for sub in snapshot {
            let semaphore = Arc::clone(&semaphore);
            let message = Arc::clone(&message);
            let sender = Arc::clone(&self.sender);
            let store = Arc::clone(&self.store);
            let threshold = self.cfg.failure_threshold;
            let timeout = self.cfg.attempt_timeout;
            let event_id = event.event_id;

            attempts.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");

                // Deactivated between snapshot and attempt: skip, don't send.
                if !store.is_active(&sub.endpoint) {
                    return (sub.endpoint, DeliveryResult::Skipped);
                }

                let outcome = tokio::time::timeout(timeout, sender.send(&sub, &message)).await;
                match outcome {
                    Ok(Ok(())) => {
                        store.record_success(&sub.endpoint);
                        (sub.endpoint, DeliveryResult::Delivered)
                    }
                    Ok(Err(e)) => {
                        let deactivated = store.record_failure(&sub.endpoint, threshold);
                        tracing::warn!(
                            error = ?e,
                            endpoint = %sub.endpoint,
                            event_id,
                            deactivated,
                            "push delivery failed"
                        );
                        (sub.endpoint, DeliveryResult::Failed)
                    }
                    Err(_) => {
                        let deactivated = store.record_failure(&sub.endpoint, threshold);
                        tracing::warn!(
                            endpoint = %sub.endpoint,
                            event_id,
                            deactivated,
                            "push delivery timed out"
                        );
                        (sub.endpoint, DeliveryResult::Failed)
                    }
                }
            });
        }

        while let Some(joined) = attempts.join_next().await {
            let (endpoint, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = ?e, "delivery task panicked");
                    continue;
                }
            };
            match result {
                DeliveryResult::Delivered => report.delivered += 1,
                DeliveryResult::Failed => report.failed += 1,
                DeliveryResult::Skipped => {}
            }
            self.log.append(DeliveryRecord {
                event_id: event.event_id,
                endpoint,
                result,
                at: Utc::now(),
            });
        }

        counter!("push_dispatched_total").increment(report.sent as u64);
        counter!("push_delivered_total").increment(report.delivered as u64);
        counter!("push_failed_total").increment(report.failed as u64);
        report
    }

    pub fn stats(&self) -> PushStats {
        self.log.stats(&self.store)
    }
}
