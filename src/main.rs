//! Newsroom Pipeline — Binary Entrypoint
//! Boots the Axum HTTP server, wiring the moderation/cache/push pipeline,
//! routes, and the optional background scrape driver.

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newsroom_pipeline::api::{create_router, AppState};
use newsroom_pipeline::config::PipelineConfig;
use newsroom_pipeline::metrics::Metrics;
use newsroom_pipeline::pipeline;
use newsroom_pipeline::push::dispatcher::HttpPushSender;
use newsroom_pipeline::sources::{
    rss::RssSource,
    scheduler::{spawn_scrape_scheduler, ScrapeSchedulerCfg},
    SourceClient,
};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("newsroom_pipeline=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default()?;
    if cfg.vapid_public_key.is_empty() {
        tracing::warn!("VAPID public key not configured; push subscribe clients will get an empty key");
    }

    let metrics = Metrics::init();

    let coordinator = Arc::new(pipeline::build(&cfg, Arc::new(HttpPushSender::new())));

    if cfg.scrape.interval_secs > 0 && !cfg.scrape.feeds.is_empty() {
        let sources: Vec<Box<dyn SourceClient>> = cfg
            .scrape
            .feeds
            .iter()
            .map(|f| Box::new(RssSource::from_url(&f.name, &f.category, &f.url)) as Box<dyn SourceClient>)
            .collect();
        spawn_scrape_scheduler(
            ScrapeSchedulerCfg {
                interval_secs: cfg.scrape.interval_secs,
            },
            sources,
            Arc::clone(&coordinator),
        );
        tracing::info!(
            interval_secs = cfg.scrape.interval_secs,
            feeds = cfg.scrape.feeds.len(),
            "scrape driver started"
        );
    }

    let state = AppState {
        coordinator,
        vapid_public_key: cfg.vapid_public_key.clone(),
        config: Arc::new(cfg),
    };
    let app = create_router(state).merge(metrics.router());

    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "newsroom pipeline listening");
    axum::serve(listener, app).await?;
    Ok(())
}
