//! Progress & ranking
//!
//! `progress` is the sole ordering key for race position: laps completed
//! plus in-lap distance, in meters. Positions are assigned per tick by
//! sorting present drivers on descending progress, with ties broken by
//! driver code so repeated builds rank identically. Retirement is derived
//! from presence windows: a driver whose coverage ends well before the
//! timeline does is marked retired at the tick of last appearance.

use crate::resample::ResampledDriver;
use crate::timeline::GlobalTimeline;
use serde::{Deserialize, Serialize};

/// Combined lap + in-lap distance metric in meters.
///
/// `lap` is clamped to 1 and `distance` wraps at `lap_length`, so slightly
/// out-of-range source values cannot produce a jump of a whole lap.
pub fn progress(lap: u32, distance: f64, lap_length: f64) -> f64 {
    let lap = lap.max(1);
    (lap - 1) as f64 * lap_length + lap_distance(distance, lap_length)
}

/// Distance into the current lap, `[0, lap_length)`.
fn lap_distance(distance: f64, lap_length: f64) -> f64 {
    if lap_length <= 0.0 {
        return distance;
    }
    distance.rem_euclid(lap_length)
}

/// One driver's rank at a single tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedDriver {
    pub code: String,
    pub progress: f64,
    /// 1-based race position.
    pub position: u32,
}

/// Rank present drivers by descending progress, ties by ascending code.
///
/// Positions are 1..K over exactly the drivers given; absent drivers are
/// simply not passed in and receive no position.
pub fn rank_by_progress(mut entries: Vec<(String, f64)>) -> Vec<RankedDriver> {
    entries.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (code, progress))| RankedDriver {
            code,
            progress,
            position: (i + 1) as u32,
        })
        .collect()
}

/// Retirement detection settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetirementConfig {
    /// How many seconds before the timeline end a driver's coverage must
    /// stop for the driver to count as retired rather than finished.
    pub margin_secs: f64,
}

impl Default for RetirementConfig {
    fn default() -> Self {
        Self { margin_secs: 60.0 }
    }
}

/// A driver leaving the session, marked at the last tick they appear on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retirement {
    pub driver: String,
    /// Replay-relative time of last appearance.
    pub t: f64,
}

/// Find retirements from presence windows.
///
/// Returns `(tick, retirement)` pairs sorted by tick; each retiring driver
/// appears exactly once, at the tick of last appearance.
pub fn detect_retirements(
    drivers: &[ResampledDriver],
    timeline: &GlobalTimeline,
    config: &RetirementConfig,
) -> Vec<(usize, Retirement)> {
    let end = timeline.duration();
    let mut out: Vec<(usize, Retirement)> = drivers
        .iter()
        .filter_map(|d| {
            let last_seen = timeline.tick(d.last_tick);
            let gap = end - last_seen;
            (gap > config.margin_secs).then(|| {
                (
                    d.last_tick,
                    Retirement {
                        driver: d.code.clone(),
                        t: last_seen,
                    },
                )
            })
        })
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.driver.cmp(&b.1.driver)));
    out
}
