use crate::config::{OmdbConfig, ServerConfig};
use crate::error::FetchError;
use crate::models::{MovieDetails, WatchedMovie};
use crate::omdb::{self, OmdbApi, OmdbClient};
use crate::search::SearchFetcher;
use crate::store::{FileStore, KeyValueStore};
use crate::watched::{WatchedList, WatchedSummary};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub omdb: Arc<dyn OmdbApi>,
    pub search: Arc<SearchFetcher>,
    pub watched: Arc<WatchedList>,
}

impl AppState {
    pub fn new(omdb: Arc<dyn OmdbApi>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            search: Arc::new(SearchFetcher::new(omdb.clone())),
            watched: Arc::new(WatchedList::load(store)),
            omdb,
        }
    }
}

pub async fn run_server(config: ServerConfig, omdb: OmdbConfig) -> Result<()> {
    let omdb: Arc<dyn OmdbApi> = Arc::new(OmdbClient::new(omdb)?);
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&config.data_dir));

    let state = AppState::new(omdb, store);
    let search = state.search.clone();
    let app = build_router(state);

    info!("Listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(search))
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search", get(search))
        .route("/movies/:imdb_id", get(movie_details))
        .route("/watched", get(list_watched).post(add_watched))
        .route("/watched/:imdb_id", delete(remove_watched))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
}

async fn search(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Response {
    match state.search.search(&params.q).await {
        Some(result) => Json(result).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MovieView {
    details: MovieDetails,
    watched: bool,
    user_rating: Option<u8>,
}

async fn movie_details(State(state): State<AppState>, Path(imdb_id): Path<String>) -> Response {
    let Some(imdb_id) = omdb::parse_imdb_id(&imdb_id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid IMDb id");
    };
    match fetch_details(&state, &imdb_id).await {
        Ok(details) => Json(MovieView {
            details,
            watched: state.watched.is_watched(&imdb_id),
            user_rating: state.watched.user_rating(&imdb_id),
        })
        .into_response(),
        Err(resp) => resp,
    }
}

#[derive(Serialize)]
struct WatchedView {
    movies: Vec<WatchedMovie>,
    summary: WatchedSummary,
}

async fn list_watched(State(state): State<AppState>) -> Json<WatchedView> {
    Json(WatchedView {
        movies: state.watched.movies(),
        summary: state.watched.summary(),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddWatched {
    #[serde(rename = "imdbID")]
    imdb_id: String,
    user_rating: f64,
    #[serde(default)]
    count_rating_decisions: u32,
}

fn star_rating(raw: f64) -> Option<u8> {
    (raw.fract() == 0.0 && (1.0..=10.0).contains(&raw)).then_some(raw as u8)
}

async fn add_watched(State(state): State<AppState>, Json(body): Json<AddWatched>) -> Response {
    let Some(imdb_id) = omdb::parse_imdb_id(&body.imdb_id) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid IMDb id");
    };
    let Some(user_rating) = star_rating(body.user_rating) else {
        return error_response(StatusCode::BAD_REQUEST, "Rating must be between 1 and 10");
    };
    if state.watched.is_watched(&imdb_id) {
        return error_response(StatusCode::CONFLICT, "Movie already watched");
    }

    let details = match fetch_details(&state, &imdb_id).await {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let movie = WatchedMovie::from_details(
        &imdb_id,
        &details,
        user_rating,
        body.count_rating_decisions,
    );
    match state.watched.add(movie.clone()) {
        Ok(true) => (StatusCode::CREATED, Json(movie)).into_response(),
        Ok(false) => error_response(StatusCode::CONFLICT, "Movie already watched"),
        Err(e) => {
            warn!("Failed to persist watched list: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save watched list")
        }
    }
}

async fn remove_watched(State(state): State<AppState>, Path(imdb_id): Path<String>) -> Response {
    match state.watched.remove(&imdb_id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Movie is not in the watched list"),
        Err(e) => {
            warn!("Failed to persist watched list: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save watched list")
        }
    }
}

async fn fetch_details(state: &AppState, imdb_id: &str) -> Result<MovieDetails, Response> {
    // Detail lookups are one-shot; nothing supersedes them.
    let cancel = CancellationToken::new();
    state
        .omdb
        .fetch_details(imdb_id, &cancel)
        .await
        .map_err(|e: FetchError| {
            warn!("Failed to fetch details for {}: {}", imdb_id, e);
            error_response(StatusCode::BAD_GATEWAY, &e.to_string())
        })
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn shutdown_signal(search: Arc<SearchFetcher>) {
    let source = next_stop_signal().await;
    info!("Received {}, abandoning in-flight search", source);
    search.cancel();
}

async fn next_stop_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "Ctrl+C",
        _ = terminate => "SIGTERM",
    }
}
