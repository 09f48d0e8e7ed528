//! Client-side frame delivery
//!
//! `FramePlayer` keeps a sliding window of decoded chunks around the
//! playhead. Asking for a frame recenters the window: the chunk holding
//! it plus the next few are requested through the caller's fetcher, and
//! chunks that fell out of the window are dropped. Fetches complete
//! asynchronously via `insert_chunk`; until then the frame reports as
//! not ready and the caller shows its last frame or a spinner.

use crate::chunks::{decode_chunk, ChunkError, Manifest, ReplayChunk};
use crate::frame::Frame;
use std::collections::{BTreeMap, BTreeSet};

/// Chunks fetched ahead of the playhead.
const PREFETCH_AHEAD: usize = 2;
/// Chunks kept behind the playhead for small backward seeks.
const KEEP_BEHIND: usize = 2;

/// How the player asks for chunk downloads. Implementations start the
/// fetch and later hand the result to [`FramePlayer::insert_chunk`].
pub trait ChunkFetcher {
    fn request(&mut self, index: usize);
}

/// Outcome of a frame lookup.
#[derive(Debug, PartialEq)]
pub enum FrameQuery<'a> {
    Ready(&'a Frame),
    /// The chunk is being fetched; ask again after `insert_chunk`.
    NotReady,
    OutOfRange,
}

/// Sliding-window frame reader over chunked replay delivery.
pub struct FramePlayer<F> {
    manifest: Manifest,
    fetcher: F,
    chunks: BTreeMap<usize, Vec<Frame>>,
    pending: BTreeSet<usize>,
}

impl<F: ChunkFetcher> FramePlayer<F> {
    pub fn new(manifest: Manifest, fetcher: F) -> Self {
        Self {
            manifest,
            fetcher,
            chunks: BTreeMap::new(),
            pending: BTreeSet::new(),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Look up frame `index`, recentering the fetch window on it.
    pub fn frame(&mut self, index: usize) -> FrameQuery<'_> {
        if index >= self.manifest.frame_count {
            return FrameQuery::OutOfRange;
        }
        let chunk_index = index / self.manifest.chunk_size;
        self.ensure_chunk(chunk_index);
        match self.chunks.get(&chunk_index) {
            Some(frames) => FrameQuery::Ready(&frames[index % self.manifest.chunk_size]),
            None => FrameQuery::NotReady,
        }
    }

    /// Move the fetch window without reading a frame, e.g. right after
    /// the user grabs the scrub bar.
    pub fn seek(&mut self, index: usize) {
        if self.manifest.frame_count == 0 {
            return;
        }
        let index = index.min(self.manifest.frame_count - 1);
        self.ensure_chunk(index / self.manifest.chunk_size);
    }

    /// Store a fetched chunk. Stale chunks (outside the current window)
    /// are accepted and swept on the next lookup.
    pub fn insert_chunk(&mut self, chunk: ReplayChunk) -> Result<(), ChunkError> {
        let index = chunk.index;
        let frames = decode_chunk(chunk)?;
        self.pending.remove(&index);
        self.chunks.insert(index, frames);
        Ok(())
    }

    /// Indices of chunks currently decoded in the window.
    pub fn loaded_chunks(&self) -> Vec<usize> {
        self.chunks.keys().copied().collect()
    }

    /// Recenter the window on a chunk: request it and the next
    /// `PREFETCH_AHEAD`, drop everything more than `KEEP_BEHIND` back.
    pub fn ensure_chunk(&mut self, chunk_index: usize) {
        if self.manifest.chunk_count == 0 {
            return;
        }
        let center = chunk_index.min(self.manifest.chunk_count - 1);
        let lo = center.saturating_sub(KEEP_BEHIND);
        let hi = (center + PREFETCH_AHEAD).min(self.manifest.chunk_count - 1);
        self.chunks.retain(|&i, _| i >= lo && i <= hi);
        self.pending.retain(|&i| i >= lo && i <= hi);
        for i in center..=hi {
            if !self.chunks.contains_key(&i) && self.pending.insert(i) {
                self.fetcher.request(i);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_replay, ReplayOptions};
    use crate::chunks::{encode_chunks, manifest_for};
    use crate::model::{
        Compound, DriverInput, LapBatch, SessionCode, SessionInfo, SessionInput, Stint,
        TelemetrySample,
    };

    #[derive(Default)]
    struct RecordingFetcher {
        requested: Vec<usize>,
    }

    impl ChunkFetcher for RecordingFetcher {
        fn request(&mut self, index: usize) {
            self.requested.push(index);
        }
    }

    /// 61 frames at 2 fps, chunked by 10 -> 7 chunks.
    fn fixture() -> (Vec<ReplayChunk>, Manifest) {
        let sample = |t: f64| TelemetrySample {
            t,
            x: t,
            y: 0.0,
            speed: 180.0,
            throttle: 80.0,
            brake: 0.0,
            gear: 5,
            drs: 0,
            distance: 50.0 * t,
            lap: 1,
        };
        let input = SessionInput {
            info: SessionInfo {
                year: 2024,
                round: 1,
                code: SessionCode::R,
                event_name: "Window GP".to_string(),
                circuit_name: "Ringbuffer Ring".to_string(),
                lap_length: 5000.0,
                total_laps: 2,
                event_date: None,
            },
            drivers: vec![DriverInput {
                code: "AAA".to_string(),
                name: None,
                team: None,
                color: None,
                laps: vec![LapBatch {
                    lap: 1,
                    samples: vec![sample(0.0), sample(30.0)],
                }],
                timing: vec![],
                stints: vec![Stint {
                    number: 1,
                    compound: Compound::Hard,
                    start_lap: 1,
                    end_lap: 2,
                }],
            }],
            weather: vec![],
            race_control: vec![],
            track_status: vec![],
        };
        let bundle = build_replay(
            &input,
            &ReplayOptions {
                fps: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let chunks = encode_chunks(&bundle.frames, 10);
        let manifest = manifest_for(&bundle, 10);
        (chunks, manifest)
    }

    #[test]
    fn test_query_states_and_fetch_on_miss() {
        let (chunks, manifest) = fixture();
        let mut player = FramePlayer::new(manifest, RecordingFetcher::default());

        assert_eq!(player.frame(0), FrameQuery::NotReady);
        assert_eq!(player.fetcher().requested, vec![0, 1, 2]);

        player.insert_chunk(chunks[0].clone()).unwrap();
        match player.frame(0) {
            FrameQuery::Ready(frame) => assert_eq!(frame.t, 0.0),
            other => panic!("expected ready frame, got {other:?}"),
        }
        match player.frame(9) {
            FrameQuery::Ready(frame) => assert_eq!(frame.t, 4.5),
            other => panic!("expected ready frame, got {other:?}"),
        }
        assert_eq!(player.frame(10), FrameQuery::NotReady);
    }

    #[test]
    fn test_no_duplicate_requests_while_pending() {
        let (_, manifest) = fixture();
        let mut player = FramePlayer::new(manifest, RecordingFetcher::default());
        player.frame(0);
        player.frame(5);
        assert_eq!(player.fetcher().requested, vec![0, 1, 2]);
    }

    #[test]
    fn test_window_evicts_behind_and_prefetches_ahead() {
        let (chunks, manifest) = fixture();
        let mut player = FramePlayer::new(manifest, RecordingFetcher::default());
        for chunk in chunks.iter().take(3) {
            player.insert_chunk(chunk.clone()).unwrap();
        }

        // Frame 35 lives in chunk 3; window becomes chunks 1..=5.
        player.frame(35);
        assert_eq!(player.loaded_chunks(), vec![1, 2]);
        let requested = &player.fetcher().requested;
        assert!(requested.contains(&3));
        assert!(requested.contains(&4));
        assert!(requested.contains(&5));
        assert!(!requested.contains(&6));
    }

    #[test]
    fn test_prefetch_clamped_at_final_chunk() {
        let (_, manifest) = fixture();
        let mut player = FramePlayer::new(manifest, RecordingFetcher::default());
        // Frame 60 is in chunk 6, the last one; nothing past it requested.
        player.frame(60);
        assert_eq!(player.fetcher().requested, vec![6]);
    }

    #[test]
    fn test_out_of_range_requests_nothing() {
        let (_, manifest) = fixture();
        let frame_count = manifest.frame_count;
        let mut player = FramePlayer::new(manifest, RecordingFetcher::default());
        assert_eq!(player.frame(frame_count), FrameQuery::OutOfRange);
        assert_eq!(player.frame(usize::MAX), FrameQuery::OutOfRange);
        assert!(player.fetcher().requested.is_empty());
    }

    #[test]
    fn test_stale_chunk_accepted_then_swept() {
        let (chunks, manifest) = fixture();
        let mut player = FramePlayer::new(manifest, RecordingFetcher::default());
        player.insert_chunk(chunks[6].clone()).unwrap();
        assert_eq!(player.loaded_chunks(), vec![6]);

        // Reading near the start sweeps the stale tail chunk.
        player.frame(0);
        assert!(player.loaded_chunks().is_empty());
    }

    #[test]
    fn test_seek_moves_window_without_reading() {
        let (_, manifest) = fixture();
        let mut player = FramePlayer::new(manifest, RecordingFetcher::default());
        player.seek(45);
        assert_eq!(player.fetcher().requested, vec![4, 5, 6]);
    }

    #[test]
    fn test_ensure_chunk_clamps_to_final_chunk() {
        let (_, manifest) = fixture();
        let mut player = FramePlayer::new(manifest, RecordingFetcher::default());
        player.ensure_chunk(100);
        assert_eq!(player.fetcher().requested, vec![6]);
    }
}
