//! Session sources for OpenRaceReplay
//!
//! Everything the replay builder can ingest: a deterministic synthetic
//! race for demos and tests, and recorded session archives on disk.

pub mod archive;
pub mod synthetic;

pub use archive::{read_archive, read_archive_bytes, write_archive, ArchiveSource};
pub use synthetic::{SyntheticConfig, SyntheticSource};
