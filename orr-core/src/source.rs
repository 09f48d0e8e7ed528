//! Session source trait definition

use crate::model::SessionInput;
use anyhow::Result;

/// Trait for session acquisition sources
///
/// Each source is responsible for:
/// - Producing a fully materialized [`SessionInput`] (the pipeline never
///   streams input; everything is loaded before resampling starts)
/// - Validating its own format and reporting unusable data as errors
///
/// Implementations live in `orr-adapters` (synthetic generator, recorded
/// session archives).
pub trait SessionSource {
    /// Short human-readable description of where the session comes from,
    /// e.g. "synthetic(seed=7)" or the archive path.
    fn describe(&self) -> String;

    /// Load the complete session input.
    ///
    /// Returns an error only for unusable sources (missing file, corrupt
    /// envelope, unsupported version). Per-lap telemetry problems are not
    /// errors at this boundary; the normalizer handles those as coverage
    /// gaps.
    fn load(&self) -> Result<SessionInput>;
}
