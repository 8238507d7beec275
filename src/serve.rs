//! `chainprobe serve`: inbound HTTP trigger for scheduled invocations.
//!
//! - `GET /api/read/{chain}`: collect one chain's read probes
//! - `GET /api/write/solana`: run the transaction-landing probe
//! - `GET /api/support/update_state`: refresh the reference-state document
//!
//! Every route requires `Authorization: Bearer <CRON_SECRET>` unless
//! `SKIP_AUTH=true`.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::collect::{self, Target};
use crate::config::{Environment, ProbeConfig};
use crate::update_state::StateManager;

/// Shared by every handler; read-only.
pub struct AppState {
    pub config: ProbeConfig,
    pub env: Environment,
}

type Reply = (StatusCode, String);

fn authorized(env: &Environment, headers: &HeaderMap) -> bool {
    if env.skip_auth {
        return true;
    }
    if env.cron_secret.is_empty() {
        tracing::warn!("CRON_SECRET is not set; rejecting request");
        return false;
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", env.cron_secret))
}

fn unauthorized() -> Reply {
    (StatusCode::UNAUTHORIZED, "Unauthorized".into())
}

fn internal(e: anyhow::Error) -> Reply {
    tracing::error!("invocation failed: {:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
}

async fn collect_target(app: &AppState, target: Target) -> Reply {
    match collect::run(&app.config, &app.env, target).await {
        Ok(report) => {
            tracing::info!("{}", report.push_status());
            (StatusCode::OK, report.summary())
        }
        Err(e) => internal(e),
    }
}

async fn read_chain(State(app): State<Arc<AppState>>, Path(chain): Path<String>, headers: HeaderMap) -> Reply {
    if !authorized(&app.env, &headers) {
        return unauthorized();
    }
    collect_target(&app, Target::Chain(chain)).await
}

async fn write_solana(State(app): State<Arc<AppState>>, headers: HeaderMap) -> Reply {
    if !authorized(&app.env, &headers) {
        return unauthorized();
    }
    collect_target(&app, Target::Landing).await
}

async fn update_state(State(app): State<Arc<AppState>>, headers: HeaderMap) -> Reply {
    if !authorized(&app.env, &headers) {
        return unauthorized();
    }
    let outcome = async { StateManager::new(&app.config, &app.env)?.update().await };
    match outcome.await {
        Ok(outcome) => (StatusCode::OK, outcome.to_string()),
        Err(e) => internal(e),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/read/{chain}", get(read_chain))
        .route("/api/write/solana", get(write_solana))
        .route("/api/support/update_state", get(update_state))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, router(Arc::new(state))).await?;
    Ok(())
}
