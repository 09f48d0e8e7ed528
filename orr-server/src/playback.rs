//! Server-side playback engine
//!
//! Holds the cursor state for the active replay (play/pause/seek/speed) and
//! runs the timed task that advances it and publishes frames onto the
//! broadcast bus for SSE consumers.

use crate::state::AppState;
use orr_core::builder::ReplayBundle;
use orr_core::frame::Frame;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How fast a paused playback task polls for a resume.
const IDLE_POLL_MS: u64 = 50;

/// State for the active playback session
pub struct PlaybackSession {
    key: String,
    bundle: Arc<ReplayBundle>,
    current_frame: usize,
    playing: bool,
    speed: f64,
}

impl PlaybackSession {
    /// New session at frame zero, paused, real-time speed.
    pub fn new(key: String, bundle: Arc<ReplayBundle>) -> Self {
        Self {
            key,
            bundle,
            current_frame: 0,
            playing: false,
            speed: 1.0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn total_frames(&self) -> usize {
        self.bundle.frames.len()
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn fps(&self) -> u32 {
        self.bundle.meta.fps
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// The frame under the cursor.
    pub fn frame(&self) -> &Frame {
        &self.bundle.frames[self.current_frame]
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn seek(&mut self, frame: usize) {
        self.current_frame = frame.min(self.total_frames().saturating_sub(1));
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.clamp(0.1, 16.0);
    }

    /// Step the cursor one frame. Pauses on the last frame and returns None.
    pub fn advance(&mut self) -> Option<usize> {
        if !self.playing {
            return None;
        }

        if self.current_frame >= self.total_frames().saturating_sub(1) {
            self.playing = false;
            return None;
        }

        self.current_frame += 1;
        Some(self.current_frame)
    }

    pub fn info(&self) -> PlaybackInfo {
        PlaybackInfo {
            key: self.key.clone(),
            total_frames: self.total_frames(),
            current_frame: self.current_frame,
            playing: self.playing,
            speed: self.speed,
            fps: self.bundle.meta.fps,
            duration: self.bundle.meta.duration,
        }
    }
}

/// Serializable playback info for the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackInfo {
    pub key: String,
    pub total_frames: usize,
    pub current_frame: usize,
    pub playing: bool,
    pub speed: f64,
    pub fps: u32,
    pub duration: f64,
}

/// One played-out frame on the broadcast bus.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackUpdate {
    pub key: String,
    pub index: usize,
    pub frame: Frame,
}

/// Start the playback task, cancelling any previous one. The task publishes
/// the frame under the cursor at `fps x speed`, then advances; it exits when
/// cancelled or when the playback slot is cleared.
pub async fn start_playback_task(state: AppState) {
    let mut cancel_guard = state.playback_cancel.write().await;
    if let Some(token) = cancel_guard.take() {
        token.cancel();
    }
    let token = CancellationToken::new();
    *cancel_guard = Some(token.clone());
    drop(cancel_guard);

    tokio::spawn(playback_loop(state, token));
}

async fn playback_loop(state: AppState, cancel: CancellationToken) {
    tracing::info!("playback task started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let (playing, fps, speed) = {
            let playback = state.playback.read().await;
            match &*playback {
                Some(session) => (session.is_playing(), session.fps(), session.speed()),
                None => break,
            }
        };

        if !playing {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS)) => continue,
            }
        }

        // Publish the frame under the cursor, then step. On the last frame
        // advance() pauses, so the next iteration falls into the idle poll.
        let update = {
            let mut playback = state.playback.write().await;
            match playback.as_mut() {
                Some(session) => {
                    let update = PlaybackUpdate {
                        key: session.key().to_string(),
                        index: session.current_frame(),
                        frame: session.frame().clone(),
                    };
                    session.advance();
                    update
                }
                None => break,
            }
        };

        // No subscribers is fine; frames are dropped, not queued.
        let _ = state.frame_tx.send(update);

        let interval_ms = (1000.0 / (fps as f64 * speed)).max(1.0);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_micros((interval_ms * 1000.0) as u64)) => {},
        }
    }

    tracing::info!("playback task ended");
}
