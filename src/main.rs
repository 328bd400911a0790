use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repo_warden::config::Config;
use repo_warden::ctrl::{Hub, NoopProcessor, RepoSignal};
use repo_warden::io::Registry;
use repo_warden::types::{CreateOrDeleteEvent, PullRequestEvent, PushEvent, Repo, RepoUuid};

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    repos: Arc<HashMap<RepoUuid, Repo>>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repo_warden=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());
    let repos = Arc::new(load_repos());

    // Provider clients (GitHub REST, Slack web API) are wired in here; with
    // none registered the controllers log and skip provider calls, which is
    // enough to exercise routing locally.
    let registry = Arc::new(Registry::new());
    let hub = Hub::new(registry, config.clone(), Arc::new(NoopProcessor));

    let state = AppState {
        hub: hub.clone(),
        repos,
    };

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/webhooks/{repo_id}/push", post(handle_push))
        .route("/webhooks/{repo_id}/branch", post(handle_branch))
        .route("/webhooks/{repo_id}/pull_request", post(handle_pull_request))
        .with_state(state);

    tracing::info!(addr = %config.bind_addr, "listening");

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .unwrap();
}

/// Loads the repo roster from the JSON file named by `WARDEN_REPOS`.
fn load_repos() -> HashMap<RepoUuid, Repo> {
    let Ok(path) = std::env::var("WARDEN_REPOS") else {
        tracing::warn!("WARDEN_REPOS not set, no repositories configured");
        return HashMap::new();
    };

    let bytes = std::fs::read(&path).unwrap_or_else(|e| panic!("reading {path}: {e}"));
    let repos: Vec<Repo> =
        serde_json::from_slice(&bytes).unwrap_or_else(|e| panic!("parsing {path}: {e}"));

    tracing::info!(count = repos.len(), "loaded repository roster");
    repos.into_iter().map(|r| (r.id.clone(), r)).collect()
}

async fn shutdown_signal(hub: Arc<Hub>) {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutting down controllers");
    hub.shutdown();
}

async fn handle_push(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
    Json(event): Json<PushEvent>,
) -> StatusCode {
    let Some(repo) = state.repos.get(&RepoUuid::new(repo_id)) else {
        return StatusCode::NOT_FOUND;
    };
    state.hub.signal_repo(repo, RepoSignal::Push(event));
    StatusCode::ACCEPTED
}

async fn handle_branch(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
    Json(event): Json<CreateOrDeleteEvent>,
) -> StatusCode {
    let Some(repo) = state.repos.get(&RepoUuid::new(repo_id)) else {
        return StatusCode::NOT_FOUND;
    };
    state.hub.signal_repo(repo, RepoSignal::CreateOrDelete(event));
    StatusCode::ACCEPTED
}

async fn handle_pull_request(
    State(state): State<AppState>,
    Path(repo_id): Path<String>,
    Json(event): Json<PullRequestEvent>,
) -> StatusCode {
    let Some(repo) = state.repos.get(&RepoUuid::new(repo_id)) else {
        return StatusCode::NOT_FOUND;
    };
    state.hub.signal_repo(repo, RepoSignal::PullRequest(event));
    StatusCode::ACCEPTED
}
