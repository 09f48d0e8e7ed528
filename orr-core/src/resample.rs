//! Resampler
//!
//! Projects one driver's normalized telemetry onto the global timeline.
//! Continuous fields (position, speed, distance, pedals) are linearly
//! interpolated between bracketing samples; discrete fields (gear, DRS,
//! lap) hold the last known value. There is no extrapolation: outside the
//! driver's sample range the driver is simply not present, expressed here
//! as an inclusive tick window. Resampling is a pure function of the
//! sample sequence and the timeline.

use crate::normalize::DriverTelemetry;
use crate::timeline::GlobalTimeline;

/// One driver's telemetry resampled onto the global timeline, stored as
/// columns over the driver's presence window `[first_tick, last_tick]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledDriver {
    pub code: String,
    /// First timeline tick the driver is present on (inclusive).
    pub first_tick: usize,
    /// Last timeline tick the driver is present on (inclusive).
    pub last_tick: usize,
    // Continuous columns, linearly interpolated.
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub speed: Vec<f64>,
    pub distance: Vec<f64>,
    pub throttle: Vec<f64>,
    pub brake: Vec<f64>,
    // Discrete columns, last-known-value.
    pub gear: Vec<i8>,
    pub drs: Vec<u8>,
    pub lap: Vec<u32>,
}

impl ResampledDriver {
    /// Number of ticks in the presence window.
    pub fn len(&self) -> usize {
        self.last_tick - self.first_tick + 1
    }

    pub fn is_empty(&self) -> bool {
        false // a window always holds at least one tick
    }

    pub fn contains_tick(&self, tick: usize) -> bool {
        tick >= self.first_tick && tick <= self.last_tick
    }

    /// Column offset for a timeline tick, if the driver is present there.
    pub fn offset(&self, tick: usize) -> Option<usize> {
        self.contains_tick(tick).then(|| tick - self.first_tick)
    }
}

/// Resample one driver onto the timeline.
///
/// Returns `None` when no timeline tick falls inside the driver's sample
/// range (including drivers with no samples at all). A driver with exactly
/// one sample is present only on a tick that lands on it, carrying that
/// sample's values verbatim.
pub fn resample_driver(
    telemetry: &DriverTelemetry,
    timeline: &GlobalTimeline,
) -> Option<ResampledDriver> {
    let samples = &telemetry.samples;
    let (first_t, last_t) = telemetry.span()?;

    let first_tick = timeline.first_tick_at_or_after(first_t)?;
    let last_tick = timeline.last_tick_at_or_before(last_t)?;
    if first_tick > last_tick {
        return None;
    }

    let len = last_tick - first_tick + 1;
    let mut out = ResampledDriver {
        code: telemetry.code.clone(),
        first_tick,
        last_tick,
        x: Vec::with_capacity(len),
        y: Vec::with_capacity(len),
        speed: Vec::with_capacity(len),
        distance: Vec::with_capacity(len),
        throttle: Vec::with_capacity(len),
        brake: Vec::with_capacity(len),
        gear: Vec::with_capacity(len),
        drs: Vec::with_capacity(len),
        lap: Vec::with_capacity(len),
    };

    // `lo` tracks the latest sample with samples[lo].t <= tick time; ticks
    // ascend, so the cursor only moves forward.
    let n = samples.len();
    let mut lo = 0usize;
    for tick in first_tick..=last_tick {
        let t = timeline.session_time(tick);
        while lo + 1 < n && samples[lo + 1].t <= t {
            lo += 1;
        }
        let a = &samples[lo];
        let b = &samples[(lo + 1).min(n - 1)];

        // Degenerate brackets (single sample, duplicate timestamps, window
        // edges) collapse to the anchor sample.
        let w = if b.t > a.t {
            ((t - a.t) / (b.t - a.t)).clamp(0.0, 1.0)
        } else {
            0.0
        };

        out.x.push(lerp(a.x, b.x, w));
        out.y.push(lerp(a.y, b.y, w));
        out.speed.push(lerp(a.speed, b.speed, w));
        out.distance.push(lerp(a.distance, b.distance, w));
        out.throttle.push(lerp(a.throttle, b.throttle, w));
        out.brake.push(lerp(a.brake, b.brake, w));

        out.gear.push(a.gear);
        out.drs.push(a.drs);
        out.lap.push(a.lap);
    }

    Some(out)
}

fn lerp(a: f64, b: f64, w: f64) -> f64 {
    a + (b - a) * w
}
