//! On-disk replay cache
//!
//! Built bundles are deterministic for a `(session, fps)` pair, so they are
//! written once and reused across restarts. Each entry is a single file
//! `<dir>/<key>.orr`: a zstd-compressed MessagePack stream holding the cache
//! format version, a created-at timestamp, and the bundle. The version is
//! read before the bundle so a stale file fails with a real error instead of
//! a shape mismatch deep inside the decoder.

use crate::state::{AppState, ReplayEntry};
use chrono::{DateTime, Utc};
use orr_core::builder::ReplayBundle;
use orr_core::chunks::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bumped whenever the bundle encoding changes shape.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// zstd level for cache files. Bundles compress well; 3 keeps writes fast.
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("zstd: {0}")]
    Compression(std::io::Error),
    #[error(
        "cached bundle has format version {found}, expected {CACHE_FORMAT_VERSION}; \
         rebuild with force=true"
    )]
    FormatVersion { found: u32 },
    #[error("encoding bundle: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decoding bundle: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Handle on the cache directory. Cheap to clone; all I/O is per-call.
#[derive(Debug, Clone)]
pub struct ReplayCache {
    dir: PathBuf,
}

impl ReplayCache {
    /// Open (and create if missing) the cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| CacheError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Platform cache directory, e.g. `~/.cache/openracereplay` on Linux.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("openracereplay")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path a key maps to.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.orr"))
    }

    /// Write a bundle under its own key, replacing any previous file.
    pub fn store(&self, bundle: &ReplayBundle) -> Result<PathBuf, CacheError> {
        let path = self.path_for(&bundle.key());
        let packed = encode_bundle(bundle)?;
        std::fs::write(&path, &packed).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(
            "cached {} ({} frames, {} bytes)",
            path.display(),
            bundle.frames.len(),
            packed.len()
        );
        Ok(path)
    }

    /// Load a bundle by key. `Ok(None)` when no file exists; decode and
    /// version failures are real errors.
    pub fn load(&self, key: &str) -> Result<Option<ReplayBundle>, CacheError> {
        let path = self.path_for(key);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        decode_bundle(&raw).map(Some)
    }

    /// Delete the cache file for a key. Returns whether a file was removed.
    pub fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    /// Keys of every `.orr` file in the cache directory, sorted.
    pub fn scan(&self) -> Result<Vec<String>, CacheError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| CacheError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CacheError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("orr") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Serialize a bundle into the versioned cache format.
pub fn encode_bundle(bundle: &ReplayBundle) -> Result<Vec<u8>, CacheError> {
    let mut body = Vec::new();
    let mut ser = rmp_serde::Serializer::new(&mut body);
    CACHE_FORMAT_VERSION.serialize(&mut ser)?;
    Utc::now().serialize(&mut ser)?;
    bundle.serialize(&mut ser)?;
    zstd::encode_all(body.as_slice(), COMPRESSION_LEVEL).map_err(CacheError::Compression)
}

/// Decode a cache file, checking the format version before the bundle.
pub fn decode_bundle(raw: &[u8]) -> Result<ReplayBundle, CacheError> {
    let body = zstd::decode_all(raw).map_err(CacheError::Compression)?;
    let mut de = rmp_serde::Deserializer::new(body.as_slice());
    let found = u32::deserialize(&mut de)?;
    if found != CACHE_FORMAT_VERSION {
        return Err(CacheError::FormatVersion { found });
    }
    let created_at = DateTime::<Utc>::deserialize(&mut de)?;
    let bundle = ReplayBundle::deserialize(&mut de)?;
    debug!(
        "decoded cached bundle {} created {}",
        bundle.key(),
        created_at.to_rfc3339()
    );
    Ok(bundle)
}

/// Startup task: register every loadable cached bundle in the catalog.
/// Unreadable or stale files are skipped with a warning, never fatal.
pub async fn hydrate(state: AppState) {
    let keys = match state.cache.scan() {
        Ok(keys) => keys,
        Err(e) => {
            warn!("cache scan failed: {e}");
            return;
        }
    };

    let mut loaded = 0usize;
    for key in keys {
        let cache = state.cache.clone();
        let load_key = key.clone();
        let result = tokio::task::spawn_blocking(move || {
            cache
                .load(&load_key)
                .map(|opt| opt.map(|bundle| ReplayEntry::build(bundle, DEFAULT_CHUNK_SIZE)))
        })
        .await;
        match result {
            Ok(Ok(Some(entry))) => {
                state.insert_replay(key, entry).await;
                loaded += 1;
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("skipping cached replay {key}: {e}"),
            Err(e) => warn!("cache load task for {key} panicked: {e}"),
        }
    }

    if loaded > 0 {
        info!(
            "hydrated {loaded} replay(s) from {}",
            state.cache.dir().display()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orr_adapters::{SyntheticConfig, SyntheticSource};
    use orr_core::source::SessionSource;
    use orr_core::{build_replay, ReplayOptions};

    fn small_bundle() -> ReplayBundle {
        let source = SyntheticSource::new(SyntheticConfig {
            drivers: 2,
            laps: 1,
            ..Default::default()
        });
        let input = source.load().unwrap();
        let options = ReplayOptions {
            fps: 5,
            ..Default::default()
        };
        build_replay(&input, &options).unwrap()
    }

    #[test]
    fn test_store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReplayCache::open(dir.path()).unwrap();
        let bundle = small_bundle();

        let path = cache.store(&bundle).unwrap();
        assert!(path.ends_with(format!("{}.orr", bundle.key())));

        let loaded = cache.load(&bundle.key()).unwrap().unwrap();
        assert_eq!(loaded, bundle);
    }

    #[test]
    fn test_load_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReplayCache::open(dir.path()).unwrap();
        assert!(cache.load("2024_R01_R_fps25").unwrap().is_none());
    }

    #[test]
    fn test_stale_format_version_is_explicit_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReplayCache::open(dir.path()).unwrap();
        let bundle = small_bundle();

        // Re-pack the file with a bumped version number.
        let mut body = Vec::new();
        let mut ser = rmp_serde::Serializer::new(&mut body);
        99u32.serialize(&mut ser).unwrap();
        Utc::now().serialize(&mut ser).unwrap();
        bundle.serialize(&mut ser).unwrap();
        let packed = zstd::encode_all(body.as_slice(), COMPRESSION_LEVEL).unwrap();
        std::fs::write(cache.path_for(&bundle.key()), packed).unwrap();

        let err = cache.load(&bundle.key()).unwrap_err();
        match err {
            CacheError::FormatVersion { found } => assert_eq!(found, 99),
            other => panic!("expected FormatVersion error, got {other}"),
        }
    }

    #[test]
    fn test_corrupt_file_is_error_not_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReplayCache::open(dir.path()).unwrap();
        std::fs::write(cache.path_for("2024_R01_R_fps25"), b"not a cache file").unwrap();
        assert!(cache.load("2024_R01_R_fps25").is_err());
    }

    #[test]
    fn test_scan_lists_only_cache_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReplayCache::open(dir.path()).unwrap();
        let bundle = small_bundle();
        cache.store(&bundle).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        assert_eq!(cache.scan().unwrap(), vec![bundle.key()]);
    }

    #[test]
    fn test_remove_reports_presence() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReplayCache::open(dir.path()).unwrap();
        let bundle = small_bundle();
        cache.store(&bundle).unwrap();

        assert!(cache.remove(&bundle.key()).unwrap());
        assert!(!cache.remove(&bundle.key()).unwrap());
        assert!(cache.load(&bundle.key()).unwrap().is_none());
    }
}
