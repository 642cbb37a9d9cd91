// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod metrics;
pub mod moderation;
pub mod pipeline;
pub mod push;
pub mod sources;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::cache::PublishCache;
pub use crate::config::PipelineConfig;
pub use crate::error::PipelineError;
pub use crate::moderation::{ItemStatus, ModerationQueue, ScrapedItem};
pub use crate::pipeline::{PipelineCoordinator, PublishOutcome};
pub use crate::push::dispatcher::{
    DispatchReport, NotificationDispatcher, PublishEvent, PushSender,
};
pub use crate::push::{DeliveryLog, PushSubscription, SubscriptionKeys, SubscriptionStore};
