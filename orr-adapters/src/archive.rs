//! Recorded session archives
//!
//! A session archive is a JSON envelope holding one complete
//! `SessionInput`, optionally zstd-compressed when the filename ends in
//! `.zst`. The envelope pins a format version so stale recordings fail
//! loudly instead of decoding into something subtly wrong.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use orr_core::model::SessionInput;
use orr_core::source::SessionSource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// zstd level for written archives; 3 trades well between size and speed.
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    format_version: u32,
    #[allow(dead_code)]
    recorded_at: DateTime<Utc>,
    input: SessionInput,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeRef<'a> {
    format_version: u32,
    recorded_at: DateTime<Utc>,
    input: &'a SessionInput,
}

/// A session recorded to disk.
pub struct ArchiveSource {
    path: PathBuf,
}

impl ArchiveSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionSource for ArchiveSource {
    fn describe(&self) -> String {
        format!("archive {}", self.path.display())
    }

    fn load(&self) -> Result<SessionInput> {
        read_archive(&self.path)
    }
}

/// Read and validate an archive file.
pub fn read_archive(path: &Path) -> Result<SessionInput> {
    let raw = fs::read(path)
        .with_context(|| format!("reading session archive {}", path.display()))?;
    read_archive_bytes(&raw, is_zstd(path))
        .with_context(|| format!("decoding session archive {}", path.display()))
}

/// Decode an archive already in memory, e.g. an uploaded file body.
pub fn read_archive_bytes(raw: &[u8], compressed: bool) -> Result<SessionInput> {
    let json = if compressed {
        zstd::decode_all(raw).context("decompressing archive")?
    } else {
        raw.to_vec()
    };
    let envelope: Envelope = serde_json::from_slice(&json).context("parsing archive envelope")?;
    if envelope.format_version != ARCHIVE_FORMAT_VERSION {
        bail!(
            "unsupported archive format version {} (expected {})",
            envelope.format_version,
            ARCHIVE_FORMAT_VERSION
        );
    }
    validate(&envelope.input)?;
    debug!(
        drivers = envelope.input.drivers.len(),
        event = %envelope.input.info.event_name,
        "loaded session archive"
    );
    Ok(envelope.input)
}

/// Write a session as an archive; compressed when the path ends in `.zst`.
pub fn write_archive(path: &Path, input: &SessionInput) -> Result<()> {
    let envelope = EnvelopeRef {
        format_version: ARCHIVE_FORMAT_VERSION,
        recorded_at: Utc::now(),
        input,
    };
    let json = serde_json::to_vec(&envelope).context("serializing archive envelope")?;
    let bytes = if is_zstd(path) {
        zstd::encode_all(json.as_slice(), COMPRESSION_LEVEL).context("compressing archive")?
    } else {
        json
    };
    fs::write(path, bytes)
        .with_context(|| format!("writing session archive {}", path.display()))
}

fn is_zstd(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zst"))
}

/// Cheap semantic checks so a bad upload is refused before it reaches the
/// pipeline.
fn validate(input: &SessionInput) -> Result<()> {
    if input.drivers.is_empty() {
        bail!("archive holds no drivers");
    }
    let mut seen = HashSet::new();
    for driver in &input.drivers {
        if driver.code.is_empty() {
            bail!("archive holds a driver with an empty code");
        }
        if !seen.insert(driver.code.as_str()) {
            bail!("duplicate driver code {}", driver.code);
        }
    }
    if input.info.lap_length <= 0.0 || !input.info.lap_length.is_finite() {
        bail!("lap length {} is not positive", input.info.lap_length);
    }
    Ok(())
}
