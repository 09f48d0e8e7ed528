//! REST API and SSE routes

use crate::cache::CacheError;
use crate::playback::{start_playback_task, PlaybackInfo, PlaybackSession};
use crate::state::{AppState, ReplayEntry};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt as FuturesStreamExt};
use orr_adapters::{read_archive_bytes, SyntheticConfig, SyntheticSource};
use orr_core::builder::replay_key;
use orr_core::chunks::{Manifest, DEFAULT_CHUNK_SIZE};
use orr_core::model::{SessionCode, SessionInput};
use orr_core::source::SessionSource;
use orr_core::ReplayOptions;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

/// Largest accepted batch on the raw frames endpoint, a few minutes of
/// replay at typical rates.
const MAX_FRAME_BATCH: usize = 7200;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", get(list_sessions))
        .route(
            "/api/replays",
            post(upload_replay).layer(DefaultBodyLimit::max(512 * 1024 * 1024)),
        )
        .route("/api/replays/demo", post(build_demo))
        .route("/api/replays/:key", delete(delete_replay))
        .route("/api/replays/:key/manifest", get(replay_manifest))
        .route("/api/replays/:key/chunks/:index", get(replay_chunk))
        .route("/api/replays/:key/frames", get(replay_frames))
        .route(
            "/api/replays/:key/playback",
            get(playback_info).post(playback_control),
        )
        .route("/api/replays/:key/stream", get(playback_stream))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// === Session Catalog ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    key: String,
    year: u16,
    round: u8,
    session_code: SessionCode,
    session_name: String,
    event_name: String,
    circuit_name: String,
    fps: u32,
    frame_count: usize,
    chunk_count: usize,
    duration: f64,
    drivers: usize,
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let catalog = state.catalog.read().await;

    let mut sessions: Vec<SessionSummary> = catalog
        .values()
        .map(|entry| {
            let meta = &entry.manifest.meta;
            SessionSummary {
                key: entry.manifest.key.clone(),
                year: meta.year,
                round: meta.round,
                session_code: meta.session_code,
                session_name: meta.session_name.clone(),
                event_name: meta.event_name.clone(),
                circuit_name: meta.circuit_name.clone(),
                fps: meta.fps,
                frame_count: entry.manifest.frame_count,
                chunk_count: entry.manifest.chunk_count,
                duration: meta.duration,
                drivers: meta.driver_colors.len(),
            }
        })
        .collect();

    // Newest first; within a round the race outranks its support sessions.
    sessions.sort_by(|a, b| {
        b.year
            .cmp(&a.year)
            .then(b.round.cmp(&a.round))
            .then_with(|| {
                a.session_code
                    .listing_order()
                    .cmp(&b.session_code.listing_order())
            })
            .then(a.fps.cmp(&b.fps))
    });

    Json(sessions)
}

// === Replay Builds ===

#[derive(Deserialize)]
struct DemoQuery {
    fps: Option<u32>,
    drivers: Option<usize>,
    laps: Option<u32>,
    seed: Option<u64>,
    #[serde(default)]
    force: bool,
}

/// Build (or return) the deterministic synthetic session.
async fn build_demo(
    State(state): State<AppState>,
    Query(query): Query<DemoQuery>,
) -> Result<Json<Manifest>, (StatusCode, String)> {
    let mut config = SyntheticConfig::default();
    if let Some(drivers) = query.drivers {
        config.drivers = drivers;
    }
    if let Some(laps) = query.laps {
        config.laps = laps;
    }
    if let Some(seed) = query.seed {
        config.seed = seed;
    }

    let source = SyntheticSource::new(config);
    tracing::info!("building demo replay from {}", source.describe());
    let input = source.load().map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Failed to generate session: {e}"),
        )
    })?;

    let mut options = ReplayOptions::default();
    if let Some(fps) = query.fps {
        options.fps = fps;
    }

    let manifest = build_and_register(&state, &input, &options, query.force).await?;
    Ok(Json(manifest))
}

#[derive(Deserialize)]
struct UploadQuery {
    fps: Option<u32>,
    #[serde(default)]
    force: bool,
}

/// Handle a recorded session archive upload, build the replay, register it.
async fn upload_replay(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<Manifest>, (StatusCode, String)> {
    let (file_name, data) = loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read upload: {e}")))?
            .ok_or((
                StatusCode::BAD_REQUEST,
                "Missing 'file' field in upload".to_string(),
            ))?;

        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("session.orrsession").to_string();
        let data = field.bytes().await.map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                format!("Failed to read file data: {e}"),
            )
        })?;
        break (file_name, data);
    };

    tracing::info!("received session archive: {} ({} bytes)", file_name, data.len());

    let compressed = file_name.to_lowercase().ends_with(".zst");
    let input = read_archive_bytes(&data, compressed).map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Failed to parse session archive: {e:#}"),
        )
    })?;

    let mut options = ReplayOptions::default();
    if let Some(fps) = query.fps {
        options.fps = fps;
    }

    let manifest = build_and_register(&state, &input, &options, query.force).await?;
    Ok(Json(manifest))
}

/// Shared build path for demo and upload: reuse the catalog entry, then the
/// disk cache, then run the pipeline. `force` skips both reuse steps.
async fn build_and_register(
    state: &AppState,
    input: &SessionInput,
    options: &ReplayOptions,
    force: bool,
) -> Result<Manifest, (StatusCode, String)> {
    let key = replay_key(input.info.year, input.info.round, input.info.code, options.fps);

    if !force {
        if let Some(entry) = state.get_replay(&key).await {
            return Ok(entry.manifest.clone());
        }

        match state.cache.load(&key) {
            Ok(Some(bundle)) => {
                tracing::info!("loaded replay {key} from cache");
                let entry = ReplayEntry::build(bundle, DEFAULT_CHUNK_SIZE);
                let manifest = entry.manifest.clone();
                state.insert_replay(key, entry).await;
                return Ok(manifest);
            }
            Ok(None) => {}
            Err(e @ CacheError::FormatVersion { .. }) => {
                return Err((StatusCode::CONFLICT, e.to_string()));
            }
            Err(e) => {
                tracing::warn!("ignoring unreadable cache entry for {key}: {e}");
            }
        }
    }

    let bundle = orr_core::build_replay(input, options).map_err(|e| {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Failed to build replay: {e}"),
        )
    })?;

    if let Err(e) = state.cache.store(&bundle) {
        tracing::warn!("failed to cache replay {key}: {e}");
    }

    let entry = ReplayEntry::build(bundle, DEFAULT_CHUNK_SIZE);
    let manifest = entry.manifest.clone();
    state.insert_replay(key.clone(), entry).await;
    tracing::info!("registered replay {key}");
    Ok(manifest)
}

// === Replay Delivery ===

async fn replay_manifest(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Manifest>, (StatusCode, String)> {
    let entry = state
        .get_replay(&key)
        .await
        .ok_or((StatusCode::NOT_FOUND, format!("Unknown replay: {key}")))?;
    Ok(Json(entry.manifest.clone()))
}

async fn replay_chunk(
    State(state): State<AppState>,
    Path((key, index)): Path<(String, usize)>,
) -> Result<Json<orr_core::ReplayChunk>, (StatusCode, String)> {
    let entry = state
        .get_replay(&key)
        .await
        .ok_or((StatusCode::NOT_FOUND, format!("Unknown replay: {key}")))?;

    let chunk = entry.chunks.get(index).ok_or((
        StatusCode::NOT_FOUND,
        format!(
            "Chunk {index} out of range ({} chunks available)",
            entry.chunks.len()
        ),
    ))?;
    Ok(Json(chunk.clone()))
}

#[derive(Deserialize)]
struct ReplayFramesQuery {
    start: usize,
    count: usize,
}

/// Raw full frames, for consumers that skip the chunk codec. The range is
/// clamped, never an error.
async fn replay_frames(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<ReplayFramesQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let entry = state
        .get_replay(&key)
        .await
        .ok_or((StatusCode::NOT_FOUND, format!("Unknown replay: {key}")))?;

    let total = entry.bundle.frames.len();
    let start = params.start.min(total.saturating_sub(1));
    let count = params.count.min(MAX_FRAME_BATCH).min(total - start);

    let json_frames: Vec<serde_json::Value> = entry.bundle.frames[start..start + count]
        .iter()
        .enumerate()
        .map(|(i, frame)| {
            serde_json::json!({
                "i": start + i,
                "f": frame
            })
        })
        .collect();

    Ok(Json(serde_json::json!(json_frames)))
}

// === Playback ===

#[derive(Deserialize)]
struct PlaybackRequest {
    action: String,
    frame: Option<usize>,
    speed: Option<f64>,
}

async fn playback_control(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(request): Json<PlaybackRequest>,
) -> Result<Json<PlaybackInfo>, (StatusCode, String)> {
    let entry = state
        .get_replay(&key)
        .await
        .ok_or((StatusCode::NOT_FOUND, format!("Unknown replay: {key}")))?;

    let mut playback = state.playback.write().await;

    // Bind the playback slot to this replay, displacing any other session.
    let rebind = playback.as_ref().is_none_or(|s| s.key() != key);
    if rebind {
        tracing::info!("playback bound to {key}");
        *playback = Some(PlaybackSession::new(key.clone(), entry.bundle.clone()));
    }
    let session = playback.as_mut().unwrap();

    match request.action.as_str() {
        "play" => {
            session.play();
            let info = session.info();
            drop(playback);
            start_playback_task(state.clone()).await;
            Ok(Json(info))
        }
        "pause" => {
            session.pause();
            Ok(Json(session.info()))
        }
        "seek" => {
            let frame = request.frame.ok_or((
                StatusCode::BAD_REQUEST,
                "Missing 'frame' for seek".to_string(),
            ))?;
            session.seek(frame);
            Ok(Json(session.info()))
        }
        "speed" => {
            let speed = request.speed.ok_or((
                StatusCode::BAD_REQUEST,
                "Missing 'speed' for speed".to_string(),
            ))?;
            session.set_speed(speed);
            Ok(Json(session.info()))
        }
        _ => Err((
            StatusCode::BAD_REQUEST,
            format!("Unknown action: {}", request.action),
        )),
    }
}

async fn playback_info(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<PlaybackInfo>, (StatusCode, String)> {
    let playback = state.playback.read().await;
    match &*playback {
        Some(session) if session.key() == key => Ok(Json(session.info())),
        _ => Err((
            StatusCode::NOT_FOUND,
            format!("No playback session for {key}"),
        )),
    }
}

/// SSE of played-out frames for one replay, driven by the playback task.
async fn playback_stream(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    if state.get_replay(&key).await.is_none() {
        return Err((StatusCode::NOT_FOUND, format!("Unknown replay: {key}")));
    }

    let rx = state.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let key = key.clone();
        async move {
            match result {
                Ok(update) if update.key == key => match serde_json::to_string(&update) {
                    Ok(json) => Some(Ok(Event::default().data(json))),
                    Err(e) => {
                        tracing::error!("Failed to serialize playback update: {}", e);
                        None
                    }
                },
                // Frames for other replays are not this stream's business.
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("Broadcast stream error: {}", e);
                    None
                }
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// === Deletion ===

#[derive(Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    purge: bool,
}

async fn delete_replay(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, (StatusCode, String)> {
    {
        let mut catalog = state.catalog.write().await;
        if catalog.remove(&key).is_none() {
            return Err((StatusCode::NOT_FOUND, format!("Unknown replay: {key}")));
        }
    }

    // Stop playback if it was running on this replay.
    {
        let mut playback = state.playback.write().await;
        if playback.as_ref().is_some_and(|s| s.key() == key) {
            let mut cancel = state.playback_cancel.write().await;
            if let Some(token) = cancel.take() {
                token.cancel();
            }
            *playback = None;
        }
    }

    if query.purge {
        match state.cache.remove(&key) {
            Ok(removed) => {
                if removed {
                    tracing::info!("purged cache file for {key}");
                }
            }
            Err(e) => tracing::warn!("failed to purge cache file for {key}: {e}"),
        }
    }

    tracing::info!("deleted replay {key}");
    Ok(StatusCode::NO_CONTENT)
}
