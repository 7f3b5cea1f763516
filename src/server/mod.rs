//! Webhook server
//!
//! Routes:
//! - `POST /github` signed GitHub webhooks
//! - `GET /api/v0/queue/{owner}/{name}` raw queue record
//! - `GET /health`

pub mod events;

use crate::config::Settings;
use crate::error::Error;
use crate::merge::MergeOrchestrator;
use crate::platform::PlatformService;
use crate::types::RepoId;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use events::WebhookEvent;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Header carrying the webhook event name
pub const EVENT_HEADER: &str = "x-github-event";

/// Shared server state
pub struct AppState {
    /// Loaded settings
    pub settings: Settings,
    /// Code host
    pub platform: Arc<dyn PlatformService>,
    /// Queue engine
    pub orchestrator: MergeOrchestrator,
}

/// Body of webhook responses
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Human-readable status
    pub message: String,
}

/// Build the full application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v0/queue/{owner}/{name}", get(queue_record))
        .merge(webhook_router(Arc::clone(&state)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/github", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn queue_record(
    State(state): State<Arc<AppState>>,
    Path((owner, name)): Path<(String, String)>,
) -> Response {
    let repo = RepoId::new(owner, name);
    match state.orchestrator.registry().store().load_raw(&repo) {
        Ok(Some(bytes)) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("no queue record for {repo}")).into_response(),
        Err(Error::InvalidRepository(msg)) => (StatusCode::BAD_REQUEST, msg).into_response(),
        Err(e) => {
            error!(%repo, "failed to read queue record: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Check a `sha256=<hex>` signature of `payload` in constant time
pub fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(signature_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };

    mac.update(payload);
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.settings.github.webhook_secret, &bytes, signature) {
        warn!("invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, axum::body::Body::from(bytes));
    Ok(next.run(request).await)
}

async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let kind = headers
        .get(EVENT_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let event = WebhookEvent::parse(kind, &body).map_err(|e| {
        warn!(kind, "malformed webhook payload: {e}");
        StatusCode::BAD_REQUEST
    })?;

    if let Some(repo) = event.repository()
        && !state.settings.is_accepted(&repo)
    {
        warn!(%repo, "event from a repository that is not accepted");
        return Err(StatusCode::FORBIDDEN);
    }

    info!(kind, "accepted webhook");
    tokio::spawn(async move {
        if let Err(e) = events::dispatch(&state, event).await {
            error!("failed to handle event: {e}");
        }
    });

    Ok(Json(WebhookResponse {
        message: "accepted".to_string(),
    }))
}
