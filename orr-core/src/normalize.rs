//! Telemetry normalizer
//!
//! Concatenates a driver's per-lap sample batches into one ascending-time
//! sequence. A batch that fails validation is skipped in full and reported
//! as a coverage gap on the output; normalization itself never fails, so a
//! bad lap costs coverage, not the build.

use crate::model::{DriverInput, LapBatch, TelemetrySample};
use std::fmt;
use tracing::warn;

/// Why a lap batch was excluded from the normalized sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GapReason {
    /// The batch carried no samples.
    EmptyBatch,
    /// A sample held a NaN or infinite value.
    NonFinite { index: usize },
    /// Sample times decreased within the batch.
    NonMonotonicTime { index: usize },
    /// The batch started before the previously accepted batch ended.
    OverlapsPrevious { batch_start: f64, previous_end: f64 },
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapReason::EmptyBatch => write!(f, "empty batch"),
            GapReason::NonFinite { index } => {
                write!(f, "non-finite value at sample {index}")
            }
            GapReason::NonMonotonicTime { index } => {
                write!(f, "time went backwards at sample {index}")
            }
            GapReason::OverlapsPrevious {
                batch_start,
                previous_end,
            } => write!(
                f,
                "batch starts at {batch_start:.3}s before previous lap ended at {previous_end:.3}s"
            ),
        }
    }
}

/// A lap excluded from a driver's coverage, with the reason.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageGap {
    pub lap: u32,
    pub reason: GapReason,
}

/// One driver's normalized telemetry: ascending in time, lap numbers
/// stamped, brake scale unified, plus any coverage gaps hit on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverTelemetry {
    pub code: String,
    pub samples: Vec<TelemetrySample>,
    pub gaps: Vec<CoverageGap>,
}

impl DriverTelemetry {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// First and last sample times, if any samples survived.
    pub fn span(&self) -> Option<(f64, f64)> {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => Some((first.t, last.t)),
            _ => None,
        }
    }

    /// Highest recorded speed in km/h.
    pub fn max_speed(&self) -> Option<f64> {
        self.samples
            .iter()
            .map(|s| s.speed)
            .fold(None, |acc, v| match acc {
                Some(m) if m >= v => Some(m),
                _ => Some(v),
            })
    }
}

/// Validate one lap batch against the sequence built so far.
///
/// `previous_end` is the last accepted sample time, if any. On success the
/// returned samples carry the batch's lap number and a 0-100 brake scale.
pub fn normalize_batch(
    batch: &LapBatch,
    previous_end: Option<f64>,
) -> Result<Vec<TelemetrySample>, GapReason> {
    if batch.samples.is_empty() {
        return Err(GapReason::EmptyBatch);
    }

    for (index, sample) in batch.samples.iter().enumerate() {
        if !sample.is_finite() {
            return Err(GapReason::NonFinite { index });
        }
        if index > 0 && sample.t < batch.samples[index - 1].t {
            return Err(GapReason::NonMonotonicTime { index });
        }
    }

    let batch_start = batch.samples[0].t;
    if let Some(previous_end) = previous_end {
        if batch_start < previous_end {
            return Err(GapReason::OverlapsPrevious {
                batch_start,
                previous_end,
            });
        }
    }

    // Some sources report brake as 0-1 instead of 0-100.
    let brake_scale = pedal_scale(batch.samples.iter().map(|s| s.brake));

    let samples = batch
        .samples
        .iter()
        .map(|s| TelemetrySample {
            brake: s.brake * brake_scale,
            lap: batch.lap,
            ..*s
        })
        .collect();

    Ok(samples)
}

/// Normalize all of a driver's lap batches into one monotonic sequence.
///
/// Never fails: every rejected batch becomes a [`CoverageGap`] and is
/// logged. A driver with no valid laps yields an empty sequence.
pub fn normalize_driver(driver: &DriverInput) -> DriverTelemetry {
    let mut samples: Vec<TelemetrySample> = Vec::new();
    let mut gaps = Vec::new();

    for batch in &driver.laps {
        let previous_end = samples.last().map(|s| s.t);
        match normalize_batch(batch, previous_end) {
            Ok(mut batch_samples) => samples.append(&mut batch_samples),
            Err(reason) => {
                warn!(
                    driver = %driver.code,
                    lap = batch.lap,
                    %reason,
                    "skipping lap batch"
                );
                gaps.push(CoverageGap {
                    lap: batch.lap,
                    reason,
                });
            }
        }
    }

    DriverTelemetry {
        code: driver.code.clone(),
        samples,
        gaps,
    }
}

/// 1.0 when values already span 0-100, 100.0 when they look like 0-1.
fn pedal_scale(values: impl Iterator<Item = f64>) -> f64 {
    let max = values.fold(0.0_f64, f64::max);
    if max <= 1.0 {
        100.0
    } else {
        1.0
    }
}
