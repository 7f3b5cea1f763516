//! `serve` - run the webhook server

use super::AppContext;
use anyhow::{Context, Result};
use rplus::merge::{MergeOrchestrator, MergeabilityOracle};
use rplus::platform::{GitHubService, PlatformService};
use rplus::queue::QueueRegistry;
use rplus::server::{self, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Build the service graph and serve until the process is stopped
pub async fn run_serve(ctx: AppContext, port: Option<u16>) -> Result<()> {
    let AppContext { settings, store } = ctx;
    let port = port.unwrap_or(settings.port);

    let platform: Arc<dyn PlatformService> = Arc::new(GitHubService::new(
        &settings.github.api_token,
        settings.github.base_url.as_deref(),
    )?);
    info!(state_dir = %store.root().display(), "using queue store");

    let registry = Arc::new(QueueRegistry::new(store));
    let orchestrator = MergeOrchestrator::new(
        Arc::clone(&platform),
        registry,
        MergeabilityOracle::default(),
    );

    let state = Arc::new(AppState {
        settings,
        platform,
        orchestrator,
    });
    let app = server::router(state);

    let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!(port, "rplus listening");

    axum::serve(listener, app).await?;
    Ok(())
}
