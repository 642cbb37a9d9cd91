use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::error::PipelineError;
use crate::pipeline::PipelineCoordinator;
use crate::push::SubscriptionKeys;
use crate::sources::ScrapedDocument;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<PipelineCoordinator>,
    pub config: Arc<crate::config::PipelineConfig>,
    pub vapid_public_key: String,
}

/// Uniform envelope: `{ success, data?, error?, message? }`. Internal
/// faults surface as a generic 500 with a non-leaking message.
#[derive(serde::Serialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

type Reply = (StatusCode, Json<ApiResponse>);

fn ok(data: Value) -> Reply {
    (
        StatusCode::OK,
        Json(ApiResponse {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }),
    )
}

fn bad_request(error: &str, message: impl Into<String>) -> Reply {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(error.to_string()),
            message: Some(message.into()),
        }),
    )
}

fn internal_error() -> Reply {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some("InternalError".to_string()),
            message: Some("internal error".to_string()),
        }),
    )
}

/// Moderation errors from the decision endpoints. Unknown ids read the
/// same as malformed ones to the caller.
fn moderation_error(e: PipelineError) -> Reply {
    match e {
        PipelineError::NotFound(_) => bad_request("InvalidId", e.to_string()),
        PipelineError::InvalidTransition { .. } => bad_request("InvalidTransition", e.to_string()),
        PipelineError::Validation(_) => bad_request("ValidationError", e.to_string()),
        PipelineError::DuplicateContent { .. } => bad_request("DuplicateContent", e.to_string()),
        other => {
            tracing::error!(error = %other, "moderation endpoint internal failure");
            internal_error()
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/admin/scraped", post(ingest_batch))
        .route("/api/admin/scraped/{id}/approve", post(approve_item))
        .route("/api/admin/scraped/{id}/reject", post(reject_item))
        .route("/api/articles/{category}", get(list_articles))
        .route("/api/cache/status", get(cache_status))
        .route("/api/cache/clear", post(cache_clear))
        .route("/api/push/stats", get(push_stats))
        .route("/api/push/subscribe", post(push_subscribe))
        .route("/api/push/unsubscribe", post(push_unsubscribe))
        .route("/api/push/click", post(push_click))
        .route("/api/push/public-key", get(push_public_key))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestDoc {
    source_url: String,
    #[serde(default)]
    title: String,
    content: String,
    category: String,
}

async fn ingest_batch(State(state): State<AppState>, Json(docs): Json<Vec<IngestDoc>>) -> Reply {
    let batch: Vec<ScrapedDocument> = docs
        .into_iter()
        .map(|d| ScrapedDocument {
            source_url: d.source_url,
            title: d.title,
            body: d.content,
            category: d.category,
            published_at: Utc::now().timestamp().max(0) as u64,
        })
        .collect();
    let report = state.coordinator.ingest(&batch);
    ok(json!(report))
}

async fn approve_item(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    let Ok(id) = id.parse::<u64>() else {
        return bad_request("InvalidId", "item id must be numeric");
    };
    match state.coordinator.approve(id).await {
        Ok(outcome) => ok(json!({
            "articleId": outcome.item.id,
            "status": outcome.item.status,
            "approvedAt": outcome.item.decided_at,
            "invalidatedKeys": outcome.invalidated_keys,
            "dispatch": outcome.dispatch,
        })),
        Err(e) => moderation_error(e),
    }
}

async fn reject_item(State(state): State<AppState>, Path(id): Path<String>) -> Reply {
    let Ok(id) = id.parse::<u64>() else {
        return bad_request("InvalidId", "item id must be numeric");
    };
    match state.coordinator.reject(id) {
        Ok(item) => ok(json!({
            "articleId": item.id,
            "status": item.status,
            "rejectedAt": item.decided_at,
        })),
        Err(e) => moderation_error(e),
    }
}

/// Public read path. A miss (absent or stale) is recomputed from the
/// approved item store and written back with the category TTL, so the
/// cache never holds anything it cannot rebuild.
async fn list_articles(State(state): State<AppState>, Path(category): Path<String>) -> Reply {
    let key = format!("articles:category:{category}");
    if let Some(payload) = state.coordinator.cache().get(&key) {
        return ok(json!({ "articles": payload, "cached": true }));
    }

    let articles: Vec<Value> = state
        .coordinator
        .queue()
        .approved_in_category(&category)
        .into_iter()
        .map(|item| {
            json!({
                "articleId": item.id,
                "title": item.title,
                "sourceUrl": item.source_url,
                "publishedAt": item.decided_at,
            })
        })
        .collect();
    let payload = json!(articles);
    state
        .coordinator
        .cache()
        .put(&key, payload.clone(), state.config.ttl_for(&category));
    ok(json!({ "articles": payload, "cached": false }))
}

async fn cache_status(State(state): State<AppState>) -> Reply {
    ok(json!(state.coordinator.cache().status()))
}

#[derive(Deserialize, Default)]
struct ClearReq {
    pattern: Option<String>,
}

async fn cache_clear(State(state): State<AppState>, body: Option<Json<ClearReq>>) -> Reply {
    let pattern = body.and_then(|Json(b)| b.pattern);
    let cleared = state.coordinator.cache().invalidate(pattern.as_deref());
    ok(json!({
        "pattern": pattern,
        "clearedKeys": cleared,
        "clearedAt": Utc::now(),
    }))
}

async fn push_stats(State(state): State<AppState>) -> Reply {
    ok(json!(state.coordinator.dispatcher().stats()))
}

#[derive(Deserialize)]
struct SubscribeReq {
    endpoint: Option<String>,
    keys: Option<SubscriptionKeys>,
}

async fn push_subscribe(State(state): State<AppState>, Json(req): Json<SubscribeReq>) -> Reply {
    let Some(endpoint) = req.endpoint.filter(|e| !e.trim().is_empty()) else {
        return bad_request("MissingEndpoint", "subscription endpoint is required");
    };
    let keys = req.keys.unwrap_or(SubscriptionKeys {
        p256dh: String::new(),
        auth: String::new(),
    });
    let sub = state.coordinator.dispatcher().store().subscribe(&endpoint, keys);
    ok(json!({
        "endpoint": sub.endpoint,
        "subscribedAt": sub.created_at,
    }))
}

#[derive(Deserialize)]
struct UnsubscribeReq {
    endpoint: Option<String>,
}

async fn push_unsubscribe(State(state): State<AppState>, Json(req): Json<UnsubscribeReq>) -> Reply {
    let Some(endpoint) = req.endpoint.filter(|e| !e.trim().is_empty()) else {
        return bad_request("MissingEndpoint", "subscription endpoint is required");
    };
    // Idempotent: unknown or already-inactive endpoints still succeed.
    state.coordinator.dispatcher().store().unsubscribe(&endpoint);
    ok(json!({
        "endpoint": endpoint,
        "unsubscribedAt": Utc::now(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClickReq {
    endpoint: Option<String>,
    event_id: Option<u64>,
}

async fn push_click(State(state): State<AppState>, Json(req): Json<ClickReq>) -> Reply {
    let Some(endpoint) = req.endpoint.filter(|e| !e.trim().is_empty()) else {
        return bad_request("MissingEndpoint", "subscription endpoint is required");
    };
    let Some(event_id) = req.event_id else {
        return bad_request("ValidationError", "eventId is required");
    };
    state.coordinator.dispatcher().log().record_click(event_id, &endpoint);
    ok(json!({
        "endpoint": endpoint,
        "eventId": event_id,
        "clickedAt": Utc::now(),
    }))
}

async fn push_public_key(State(state): State<AppState>) -> Reply {
    ok(json!({ "publicKey": state.vapid_public_key }))
}
