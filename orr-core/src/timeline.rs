//! Global replay timeline
//!
//! One fixed-rate tick sequence shared by every driver. The span is the
//! union of all driver sample ranges, so a driver whose data ends early
//! simply drops out while the replay runs on. Tick timestamps are
//! replay-relative (tick 0 = 0.0); the session-absolute origin is kept for
//! aligning context streams.

/// Tolerance for mapping sample times onto tick indexes.
const TIME_EPS: f64 = 1e-9;

/// Fixed-rate timeline spanning the union of driver coverage.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalTimeline {
    fps: u32,
    /// Session time of tick 0.
    origin: f64,
    /// Replay-relative tick times: `ticks[i] == i / fps`.
    ticks: Vec<f64>,
}

impl GlobalTimeline {
    /// Build the timeline from per-driver `(first, last)` sample times.
    ///
    /// Returns `None` when no spans are given (no driver has samples).
    /// `fps` must be non-zero; the caller validates it.
    pub fn from_spans(spans: &[(f64, f64)], fps: u32) -> Option<Self> {
        let origin = spans
            .iter()
            .map(|(first, _)| *first)
            .fold(None, |acc: Option<f64>, v| {
                Some(acc.map_or(v, |m| m.min(v)))
            })?;
        let end = spans
            .iter()
            .map(|(_, last)| *last)
            .fold(f64::NEG_INFINITY, f64::max);

        let span = (end - origin).max(0.0);
        let count = ((span * fps as f64) + TIME_EPS).floor() as usize + 1;
        let ticks = (0..count).map(|i| i as f64 / fps as f64).collect();

        Some(Self { fps, origin, ticks })
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Session time of tick 0.
    pub fn origin(&self) -> f64 {
        self.origin
    }

    /// Seconds between consecutive ticks.
    pub fn dt(&self) -> f64 {
        1.0 / self.fps as f64
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Replay-relative tick times.
    pub fn ticks(&self) -> &[f64] {
        &self.ticks
    }

    /// Replay-relative time of tick `index`.
    pub fn tick(&self, index: usize) -> f64 {
        self.ticks[index]
    }

    /// Replay duration in seconds (time of the last tick).
    pub fn duration(&self) -> f64 {
        self.ticks.last().copied().unwrap_or(0.0)
    }

    /// Session time of tick `index`.
    pub fn session_time(&self, index: usize) -> f64 {
        self.origin + self.ticks[index]
    }

    /// Convert a session time to replay-relative seconds.
    pub fn to_replay(&self, session_t: f64) -> f64 {
        session_t - self.origin
    }

    /// First tick at or after `session_t`, if any tick qualifies.
    pub fn first_tick_at_or_after(&self, session_t: f64) -> Option<usize> {
        let raw = (session_t - self.origin) * self.fps as f64;
        let index = (raw - TIME_EPS).ceil().max(0.0) as usize;
        (index < self.ticks.len()).then_some(index)
    }

    /// Last tick at or before `session_t`, if any tick qualifies.
    pub fn last_tick_at_or_before(&self, session_t: f64) -> Option<usize> {
        let raw = (session_t - self.origin) * self.fps as f64;
        let floored = (raw + TIME_EPS).floor();
        if floored < 0.0 {
            return None;
        }
        Some((floored as usize).min(self.ticks.len() - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_is_union_of_driver_ranges() {
        // Driver A covers 10..20, driver B covers 14..26.
        let tl = GlobalTimeline::from_spans(&[(10.0, 20.0), (14.0, 26.0)], 10).unwrap();
        assert_eq!(tl.origin(), 10.0);
        assert_eq!(tl.duration(), 16.0);
        assert_eq!(tl.len(), 161);
        assert_eq!(tl.tick(0), 0.0);
        assert_eq!(tl.session_time(0), 10.0);
    }

    #[test]
    fn test_uniform_spacing() {
        let tl = GlobalTimeline::from_spans(&[(0.0, 2.0)], 25).unwrap();
        assert_eq!(tl.len(), 51);
        let dt = tl.dt();
        for w in tl.ticks().windows(2) {
            assert!((w[1] - w[0] - dt).abs() < 1e-12);
        }
    }

    #[test]
    fn test_partial_trailing_interval_dropped() {
        // 1.03s at 10 fps: ticks at 0.0..=1.0, the 0.03 tail has no tick.
        let tl = GlobalTimeline::from_spans(&[(5.0, 6.03)], 10).unwrap();
        assert_eq!(tl.len(), 11);
        assert!((tl.duration() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_spans_means_no_timeline() {
        assert!(GlobalTimeline::from_spans(&[], 25).is_none());
    }

    #[test]
    fn test_single_instant_span() {
        let tl = GlobalTimeline::from_spans(&[(7.0, 7.0)], 25).unwrap();
        assert_eq!(tl.len(), 1);
        assert_eq!(tl.duration(), 0.0);
    }

    #[test]
    fn test_tick_lookup_at_exact_boundaries() {
        let tl = GlobalTimeline::from_spans(&[(10.0, 20.0)], 4).unwrap();
        // Exactly on a tick.
        assert_eq!(tl.first_tick_at_or_after(10.25), Some(1));
        assert_eq!(tl.last_tick_at_or_before(10.25), Some(1));
        // Between ticks.
        assert_eq!(tl.first_tick_at_or_after(10.3), Some(2));
        assert_eq!(tl.last_tick_at_or_before(10.3), Some(1));
        // Before the start.
        assert_eq!(tl.first_tick_at_or_after(9.0), Some(0));
        assert_eq!(tl.last_tick_at_or_before(9.0), None);
        // Past the end.
        assert_eq!(tl.first_tick_at_or_after(21.0), None);
        assert_eq!(tl.last_tick_at_or_before(21.0), Some(40));
    }
}
