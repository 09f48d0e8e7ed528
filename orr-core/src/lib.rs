//! OpenRaceReplay Core Library
//!
//! This crate turns per-driver lap telemetry into a deterministic replay:
//! a shared timeline of frames carrying car state, positions, events and
//! session context, plus the chunked wire format replays ship in.

pub mod builder;
pub mod chunks;
pub mod events;
pub mod frame;
pub mod model;
pub mod normalize;
pub mod player;
pub mod progress;
pub mod resample;
pub mod source;
pub mod timeline;

pub use builder::{build_replay, ReplayBundle, ReplayError, ReplayMeta, ReplayOptions};
pub use chunks::{decode_chunk, encode_chunks, manifest_for, Manifest, ReplayChunk};
pub use frame::Frame;
pub use model::SessionInput;
pub use source::SessionSource;
pub use timeline::GlobalTimeline;
