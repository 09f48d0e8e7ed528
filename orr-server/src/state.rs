//! Application state management

use crate::cache::ReplayCache;
use crate::playback::{PlaybackSession, PlaybackUpdate};
use orr_core::builder::ReplayBundle;
use orr_core::chunks::{encode_chunks, manifest_for, Manifest, ReplayChunk};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

/// A fully built replay held in memory: the bundle itself plus the
/// pre-encoded wire chunks clients download.
#[derive(Clone)]
pub struct ReplayEntry {
    pub bundle: Arc<ReplayBundle>,
    pub manifest: Manifest,
    pub chunks: Arc<Vec<ReplayChunk>>,
}

impl ReplayEntry {
    /// Encode a bundle into its servable form.
    pub fn build(bundle: ReplayBundle, chunk_size: usize) -> Self {
        let manifest = manifest_for(&bundle, chunk_size);
        let chunks = encode_chunks(&bundle.frames, chunk_size);
        Self {
            bundle: Arc::new(bundle),
            manifest,
            chunks: Arc::new(chunks),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// All loaded replays, keyed by replay key
    pub catalog: Arc<RwLock<HashMap<String, ReplayEntry>>>,

    /// Active playback session (None when nothing is playing)
    pub playback: Arc<RwLock<Option<PlaybackSession>>>,

    /// Cancellation token for the playback task
    pub playback_cancel: Arc<RwLock<Option<CancellationToken>>>,

    /// Broadcast channel for played-out frames
    /// Multiple consumers can subscribe to receive frames
    pub frame_tx: broadcast::Sender<PlaybackUpdate>,

    /// On-disk bundle cache
    pub cache: ReplayCache,
}

impl AppState {
    pub fn new(cache: ReplayCache) -> Self {
        // Create broadcast channel with capacity for 100 frames
        let (frame_tx, _) = broadcast::channel(100);

        Self {
            catalog: Arc::new(RwLock::new(HashMap::new())),
            playback: Arc::new(RwLock::new(None)),
            playback_cancel: Arc::new(RwLock::new(None)),
            frame_tx,
            cache,
        }
    }

    /// Add a replay to the catalog, replacing any previous entry under the same key.
    pub async fn insert_replay(&self, key: String, entry: ReplayEntry) {
        let mut catalog = self.catalog.write().await;
        catalog.insert(key, entry);
    }

    /// Look up a loaded replay by key.
    pub async fn get_replay(&self, key: &str) -> Option<ReplayEntry> {
        let catalog = self.catalog.read().await;
        catalog.get(key).cloned()
    }

    /// Subscribe to played-out frames
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackUpdate> {
        self.frame_tx.subscribe()
    }
}
