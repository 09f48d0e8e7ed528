//! OpenRaceReplay Server Library
//!
//! Exposes server components for integration testing.

pub mod api;
pub mod cache;
pub mod playback;
pub mod state;
