// src/pipeline.rs
// Orchestration: scraped batches in, moderation decisions out to cache
// invalidation and push dispatch.
//
// The three publish steps (approve -> invalidate -> dispatch) run
// sequentially per item and are not individually retried here; each
// component owns its internal resilience. An invalidated cache with a
// failed dispatch is a recoverable intermediate state, so partial
// failure is logged and surfaced, never rolled back.

use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::cache::PublishCache;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::moderation::{ModerationQueue, ScrapedItem};
use crate::push::dispatcher::{DispatchReport, NotificationDispatcher, PublishEvent};
use crate::sources::ScrapedDocument;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("moderation_submitted_total", "Scraped items accepted into the queue.");
        describe_counter!("moderation_duplicates_total", "Submissions rejected by dedup.");
        describe_counter!("moderation_decisions_total", "Operator approve/reject decisions.");
        describe_counter!("cache_hits_total", "Publish cache hits.");
        describe_counter!("cache_misses_total", "Publish cache misses (absent or stale).");
        describe_counter!("cache_invalidated_keys_total", "Keys removed by invalidation.");
        describe_counter!("push_dispatched_total", "Subscriptions targeted by dispatch.");
        describe_counter!("push_delivered_total", "Successful push deliveries.");
        describe_counter!("push_failed_total", "Failed push deliveries.");
        describe_counter!("pipeline_published_total", "Items published end to end.");
        describe_counter!("scrape_documents_total", "Documents parsed from sources.");
        describe_counter!("scrape_source_errors_total", "Source fetch/parse errors.");
        describe_counter!("scrape_runs_total", "Completed scrape driver ticks.");
        describe_histogram!("scrape_parse_ms", "Source parse time in milliseconds.");
        describe_gauge!("scrape_last_run_ts", "Unix ts when the scrape driver last ran.");
    });
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestReport {
    pub submitted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Approve outcome: the decided item plus what the publish side effects did.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub item: ScrapedItem,
    pub invalidated_keys: usize,
    pub dispatch: DispatchReport,
}

pub struct PipelineCoordinator {
    queue: Arc<ModerationQueue>,
    cache: Arc<PublishCache>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl PipelineCoordinator {
    pub fn new(
        queue: Arc<ModerationQueue>,
        cache: Arc<PublishCache>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            queue,
            cache,
            dispatcher,
        }
    }

    pub fn queue(&self) -> &Arc<ModerationQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &Arc<PublishCache> {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Consume a scraped batch: fingerprint and stage each document.
    /// Duplicates are counted and logged, never retried.
    pub fn ingest(&self, docs: &[ScrapedDocument]) -> IngestReport {
        let mut report = IngestReport::default();
        for doc in docs {
            match self.queue.submit(doc) {
                Ok(item) => {
                    tracing::debug!(id = item.id, category = %item.category, "staged scraped item");
                    report.submitted += 1;
                }
                Err(PipelineError::DuplicateContent { existing_id, .. }) => {
                    tracing::debug!(
                        url = %doc.source_url,
                        existing_id,
                        "duplicate content dropped at ingestion"
                    );
                    report.duplicates += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, url = %doc.source_url, "submit failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// The exactly-once publish path: transition to Approved, drop the
    /// cache keys the item's category touches, then fan out the event.
    pub async fn approve(&self, id: u64) -> Result<PublishOutcome> {
        let item = self.queue.approve(id)?;

        let mut invalidated_keys = 0usize;
        for pattern in patterns_for_category(&item.category) {
            invalidated_keys += self.cache.invalidate(Some(&pattern));
        }

        let event = PublishEvent {
            event_id: item.id,
            article_id: item.id,
            title: item.title.clone(),
            category: item.category.clone(),
            url: format!("/articles/{}", item.id),
        };
        let dispatch = self.dispatcher.dispatch(&event).await;
        if dispatch.failed > 0 {
            tracing::warn!(
                article_id = item.id,
                failed = dispatch.failed,
                delivered = dispatch.delivered,
                "publish dispatch completed with failures"
            );
        }
        counter!("pipeline_published_total").increment(1);

        Ok(PublishOutcome {
            item,
            invalidated_keys,
            dispatch,
        })
    }

    /// Rejection has no downstream side effects.
    pub fn reject(&self, id: u64) -> Result<ScrapedItem> {
        self.queue.reject(id)
    }
}

/// Cache key patterns touched by an approval in `category`: the category
/// listing plus the shared front-page views.
pub fn patterns_for_category(category: &str) -> Vec<String> {
    vec![
        format!("articles:category:{category}*"),
        "articles:latest*".to_string(),
        "articles:home*".to_string(),
    ]
}

/// Build a coordinator and its components from config. Sender is injected
/// so tests can fake delivery.
pub fn build(
    cfg: &PipelineConfig,
    sender: Arc<dyn crate::push::dispatcher::PushSender>,
) -> PipelineCoordinator {
    use crate::push::dispatcher::DispatchConfig;
    use crate::push::{DeliveryLog, SubscriptionStore};

    let queue = Arc::new(ModerationQueue::new());
    let cache = Arc::new(PublishCache::new(cfg.cache.memory_budget_bytes));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(SubscriptionStore::new()),
        Arc::new(DeliveryLog::new()),
        sender,
        DispatchConfig {
            failure_threshold: cfg.failure_threshold,
            max_in_flight: cfg.dispatch.max_in_flight,
            attempt_timeout: std::time::Duration::from_secs(cfg.dispatch.timeout_secs),
        },
    ));
    PipelineCoordinator::new(queue, cache, dispatcher)
}
