use std::{net::SocketAddr, path::Path, sync::Arc};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chat_gateway::{BoundedGateway, ChatGateway, InMemoryGateway, RestChatGateway};
use shared::{
    domain::ChannelId,
    error::{ApiError, ErrorCode},
    protocol::{InteractionEvent, InteractionReply, RunPayload},
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracker_core::{runs, TrackerContext, TrackerSettings};

mod config;
mod locations;

use config::{load_settings, prepare_database_url, Settings};
use locations::load_locations;

const MAX_INTERACTION_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    tracker: TrackerContext,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let locations = load_locations(Path::new(&settings.locations_path))?;
    info!(count = locations.len(), path = %settings.locations_path, "location catalog loaded");

    let tracker = TrackerContext {
        storage,
        gateway: build_gateway(&settings)?,
        locations: Arc::new(locations),
        settings: TrackerSettings {
            initial_general_channel: settings.initial_general_channel_id.map(ChannelId),
        },
    };
    let app = build_router(Arc::new(AppState { tracker }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_gateway(settings: &Settings) -> anyhow::Result<Arc<dyn ChatGateway>> {
    let timeout = settings.gateway_timeout();
    match &settings.gateway_url {
        Some(url) => {
            let rest = RestChatGateway::new(url)?;
            info!(
                gateway_url = %url,
                timeout_ms = settings.gateway_timeout_ms,
                "using chat gateway bridge"
            );
            Ok(Arc::new(BoundedGateway::new(rest, timeout)))
        }
        None => {
            warn!("no gateway_url configured; channels and panels exist only in process memory");
            Ok(Arc::new(BoundedGateway::new(InMemoryGateway::new(), timeout)))
        }
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/interactions", post(http_interaction))
        .route("/runs/current", get(http_current_run))
        .layer(RequestBodyLimitLayer::new(MAX_INTERACTION_BYTES))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.tracker.storage.health_check().await.map_err(|error| {
        error!(%error, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

/// Each event runs on its own task; a panic while handling one event answers that event with
/// an internal error and leaves the others untouched.
async fn http_interaction(
    State(state): State<Arc<AppState>>,
    Json(event): Json<InteractionEvent>,
) -> Json<InteractionReply> {
    let tracker = state.tracker.clone();
    let user_id = event.user_id;
    let kind = event.interaction.label();
    let handled =
        tokio::spawn(async move { tracker_core::handle_interaction(&tracker, event).await }).await;

    match handled {
        Ok(reply) => Json(reply),
        Err(join_error) => {
            error!(user_id = user_id.0, kind, error = %join_error, "interaction task failed");
            Json(InteractionReply::Error(ApiError::new(
                ErrorCode::Internal,
                "Something went wrong. Please try again.",
            )))
        }
    }
}

async fn http_current_run(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RunPayload>, (StatusCode, Json<ApiError>)> {
    match runs::current_run(&state.tracker.storage).await {
        Ok(Some(run)) => Ok(Json(run.to_payload())),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError::new(ErrorCode::NoActiveRun, "no active run")),
        )),
        Err(err) => {
            error!(error = %err, "current run lookup failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, Json(err.into())))
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
