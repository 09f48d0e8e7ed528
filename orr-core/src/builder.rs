//! Replay builder
//!
//! Runs the full pipeline for one session: normalize every driver's lap
//! batches, lay the global timeline over the union of their coverage,
//! resample, then walk the ticks once to rank drivers, derive events and
//! assemble frames. The output bundle is immutable and cacheable per
//! `(year, round, session, fps)`.

use crate::events::EventDetector;
use crate::frame::{
    DriverFrameState, Frame, MessageWindow, SectorTimes, StatusCursor, WeatherCursor,
};
use crate::model::{DriverInput, LapTiming, SessionCode, SessionInput};
use crate::normalize::normalize_driver;
use crate::progress::{
    detect_retirements, progress, rank_by_progress, Retirement, RetirementConfig,
};
use crate::resample::{resample_driver, ResampledDriver};
use crate::timeline::GlobalTimeline;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Fatal build failures. Anything recoverable (bad laps, missing weather)
/// degrades coverage instead of erroring.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("no driver has any usable telemetry samples")]
    NoTelemetry,
    #[error("fps must be at least 1")]
    InvalidFps,
    #[error("lap length must be positive, got {0}")]
    InvalidLapLength(f64),
}

/// Build-time knobs. `fps` picks the timeline rate and is part of the
/// cache key; the rest tune context presentation and retirement marking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    pub fps: u32,
    /// How long a race-control message stays displayed.
    pub message_window_secs: f64,
    /// Most messages shown at once.
    pub max_messages: usize,
    pub retirement: RetirementConfig,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            fps: 25,
            message_window_secs: 10.0,
            max_messages: 5,
            retirement: RetirementConfig::default(),
        }
    }
}

/// A driver's session top speed, for the manifest leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopSpeed {
    pub driver: String,
    /// km/h.
    pub speed: f64,
}

/// Session identity and display constants carried with every replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayMeta {
    pub year: u16,
    pub round: u8,
    pub session_code: SessionCode,
    pub session_name: String,
    pub event_name: String,
    pub circuit_name: String,
    pub fps: u32,
    pub lap_length: f64,
    pub total_laps: u32,
    /// Driver code -> "#rrggbb".
    pub driver_colors: BTreeMap<String, String>,
    /// Top 10 by session-maximum speed, descending.
    pub top_speeds: Vec<TopSpeed>,
    /// Replay duration in seconds.
    pub duration: f64,
}

/// The finished, cacheable replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBundle {
    pub meta: ReplayMeta,
    /// Replay-relative tick times; `frames[i].t == timeline[i]`.
    pub timeline: Vec<f64>,
    pub frames: Vec<Frame>,
}

impl ReplayBundle {
    /// Cache key for this bundle.
    pub fn key(&self) -> String {
        replay_key(
            self.meta.year,
            self.meta.round,
            self.meta.session_code,
            self.meta.fps,
        )
    }
}

/// Canonical cache key, e.g. `2024_R07_R_fps25`.
pub fn replay_key(year: u16, round: u8, code: SessionCode, fps: u32) -> String {
    format!("{year}_R{round:02}_{code}_fps{fps}")
}

/// Fallback when the source assigned no color to a driver.
const DEFAULT_DRIVER_COLOR: &str = "#808080";

/// Run the whole pipeline for one session.
pub fn build_replay(
    input: &SessionInput,
    options: &ReplayOptions,
) -> Result<ReplayBundle, ReplayError> {
    if options.fps == 0 {
        return Err(ReplayError::InvalidFps);
    }
    let lap_length = input.info.lap_length;
    if lap_length <= 0.0 || !lap_length.is_finite() {
        return Err(ReplayError::InvalidLapLength(lap_length));
    }

    // Stage 1: normalize per-driver lap batches.
    let telemetries: Vec<_> = input.drivers.iter().map(normalize_driver).collect();
    let gap_count: usize = telemetries.iter().map(|t| t.gaps.len()).sum();
    if gap_count > 0 {
        warn!(gaps = gap_count, "lap batches skipped during normalization");
    }

    // Stage 2: global timeline over the union of driver coverage.
    let spans: Vec<(f64, f64)> = telemetries.iter().filter_map(|t| t.span()).collect();
    let timeline =
        GlobalTimeline::from_spans(&spans, options.fps).ok_or(ReplayError::NoTelemetry)?;
    debug!(
        ticks = timeline.len(),
        fps = options.fps,
        duration = timeline.duration(),
        "timeline built"
    );

    // Stage 3: resample every driver onto the timeline.
    let resampled: Vec<ResampledDriver> = telemetries
        .iter()
        .filter_map(|t| resample_driver(t, &timeline))
        .collect();
    if resampled.is_empty() {
        return Err(ReplayError::NoTelemetry);
    }

    // Stages 4-5: one ordered pass for ranking, events and assembly.
    let retirements = group_by_tick(detect_retirements(
        &resampled,
        &timeline,
        &options.retirement,
    ));

    let mut weather = input.weather.clone();
    weather.sort_by(|a, b| a.t.total_cmp(&b.t));
    let mut status_changes = input.track_status.clone();
    status_changes.sort_by(|a, b| a.t.total_cmp(&b.t));
    let mut messages = input.race_control.clone();
    messages.sort_by(|a, b| a.t.total_cmp(&b.t));

    let mut weather_cursor = WeatherCursor::new(&weather);
    let mut status_cursor = StatusCursor::new(&status_changes);
    let mut message_window =
        MessageWindow::new(&messages, options.message_window_secs, options.max_messages);
    let mut detector = EventDetector::new(&input.drivers);

    let mut lap_contexts: Vec<LapContext<'_>> = resampled
        .iter()
        .map(|r| LapContext::new(lookup_driver(input, &r.code)))
        .collect();

    let mut frames = Vec::with_capacity(timeline.len());
    for tick in 0..timeline.len() {
        let session_t = timeline.session_time(tick);
        let replay_t = timeline.tick(tick);

        let mut drivers: BTreeMap<String, DriverFrameState> = BTreeMap::new();
        let mut entries: Vec<(String, f64)> = Vec::new();

        for (res, ctx) in resampled.iter().zip(lap_contexts.iter_mut()) {
            let Some(offset) = res.offset(tick) else {
                continue;
            };
            let lap = res.lap[offset];
            let driver_progress = progress(lap, res.distance[offset], lap_length);
            entries.push((res.code.clone(), driver_progress));

            let (stint, tyre_age, pit_count, compound) = ctx.stint_state(lap);
            drivers.insert(
                res.code.clone(),
                DriverFrameState {
                    x: res.x[offset],
                    y: res.y[offset],
                    speed: res.speed[offset],
                    gear: res.gear[offset],
                    drs: res.drs[offset],
                    throttle: res.throttle[offset],
                    brake: res.brake[offset],
                    lap,
                    progress: driver_progress,
                    position: 0,
                    distance: res.distance[offset],
                    compound,
                    sector_times: ctx.sectors_at(lap, session_t),
                    lap_time: ctx.last_lap_time(session_t),
                    stint,
                    tyre_age,
                    pit_count,
                },
            );
        }

        let ranked = rank_by_progress(entries);
        for r in &ranked {
            if let Some(state) = drivers.get_mut(&r.code) {
                state.position = r.position;
            }
        }

        let events = detector.step(session_t, replay_t, &ranked);

        frames.push(Frame {
            t: replay_t,
            drivers,
            weather: weather_cursor.at(session_t),
            track_status: status_cursor.at(session_t),
            race_messages: message_window.active(session_t),
            fastest_lap: events.fastest_lap,
            position_changes: events.position_changes,
            overall_bests: events.overall_bests,
            retirements: retirements.get(&tick).cloned().unwrap_or_default(),
        });
    }

    let meta = build_meta(input, options, &timeline, &telemetries, &resampled);
    info!(
        key = %replay_key(meta.year, meta.round, meta.session_code, meta.fps),
        drivers = resampled.len(),
        frames = frames.len(),
        "replay built"
    );

    Ok(ReplayBundle {
        meta,
        timeline: timeline.ticks().to_vec(),
        frames,
    })
}

fn build_meta(
    input: &SessionInput,
    options: &ReplayOptions,
    timeline: &GlobalTimeline,
    telemetries: &[crate::normalize::DriverTelemetry],
    resampled: &[ResampledDriver],
) -> ReplayMeta {
    let driver_colors = resampled
        .iter()
        .map(|r| {
            let color = lookup_driver(input, &r.code)
                .and_then(|d| d.color.clone())
                .unwrap_or_else(|| DEFAULT_DRIVER_COLOR.to_string());
            (r.code.clone(), color)
        })
        .collect();

    let mut top_speeds: Vec<TopSpeed> = telemetries
        .iter()
        .filter_map(|t| {
            t.max_speed().map(|speed| TopSpeed {
                driver: t.code.clone(),
                speed,
            })
        })
        .collect();
    top_speeds.sort_by(|a, b| b.speed.total_cmp(&a.speed).then_with(|| a.driver.cmp(&b.driver)));
    top_speeds.truncate(10);

    ReplayMeta {
        year: input.info.year,
        round: input.info.round,
        session_code: input.info.code,
        session_name: input.info.session_name().to_string(),
        event_name: input.info.event_name.clone(),
        circuit_name: input.info.circuit_name.clone(),
        fps: options.fps,
        lap_length: input.info.lap_length,
        total_laps: input.info.total_laps,
        driver_colors,
        top_speeds,
        duration: timeline.duration(),
    }
}

fn lookup_driver<'a>(input: &'a SessionInput, code: &str) -> Option<&'a DriverInput> {
    input.drivers.iter().find(|d| d.code == code)
}

fn group_by_tick(list: Vec<(usize, Retirement)>) -> HashMap<usize, Vec<Retirement>> {
    let mut map: HashMap<usize, Vec<Retirement>> = HashMap::new();
    for (tick, retirement) in list {
        map.entry(tick).or_default().push(retirement);
    }
    map
}

/// Per-driver lap-keyed context: stint state, time-gated sector times and
/// the last completed lap time.
struct LapContext<'a> {
    driver: Option<&'a DriverInput>,
    timing_by_lap: HashMap<u32, &'a LapTiming>,
    /// `(completed_at, lap_time)` sorted by completion.
    completions: Vec<(f64, f64)>,
    next_completion: usize,
    current_lap_time: Option<f64>,
}

impl<'a> LapContext<'a> {
    fn new(driver: Option<&'a DriverInput>) -> Self {
        let timing_by_lap = driver
            .map(|d| d.timing.iter().map(|t| (t.lap, t)).collect())
            .unwrap_or_default();
        let mut completions: Vec<(f64, f64)> = driver
            .map(|d| {
                d.timing
                    .iter()
                    .filter_map(|t| Some((t.completed_at?, t.lap_time?)))
                    .collect()
            })
            .unwrap_or_default();
        completions.sort_by(|a, b| a.0.total_cmp(&b.0));

        Self {
            driver,
            timing_by_lap,
            completions,
            next_completion: 0,
            current_lap_time: None,
        }
    }

    /// `(stint, tyre_age, pit_count, compound)` for the given lap.
    fn stint_state(&self, lap: u32) -> (u32, u32, u32, Option<crate::model::Compound>) {
        match self.driver.and_then(|d| d.stint_for_lap(lap)) {
            Some(stint) => (
                stint.number,
                stint.tyre_age(lap),
                stint.number.saturating_sub(1),
                Some(stint.compound),
            ),
            None => (0, 0, 0, None),
        }
    }

    /// Sector times of the current lap, each revealed once completed.
    fn sectors_at(&self, lap: u32, session_t: f64) -> SectorTimes {
        let Some(timing) = self.timing_by_lap.get(&lap) else {
            return SectorTimes::default();
        };
        let Some(completed_at) = timing.completed_at else {
            return SectorTimes::default();
        };
        let mut out = SectorTimes::default();
        if let Some(s3) = timing.sector3 {
            if session_t >= completed_at {
                out.s3 = Some(s3);
            }
            if let Some(s2) = timing.sector2 {
                if session_t >= completed_at - s3 {
                    out.s2 = Some(s2);
                }
                if let Some(s1) = timing.sector1 {
                    if session_t >= completed_at - s3 - s2 {
                        out.s1 = Some(s1);
                    }
                }
            }
        }
        out
    }

    /// Most recent completed lap time as of `session_t`. Forward-only.
    fn last_lap_time(&mut self, session_t: f64) -> Option<f64> {
        while self.next_completion < self.completions.len()
            && self.completions[self.next_completion].0 <= session_t
        {
            self.current_lap_time = Some(self.completions[self.next_completion].1);
            self.next_completion += 1;
        }
        self.current_lap_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PositionChange;
    use crate::model::{
        Compound, LapBatch, MessageKind, RaceControlMessage, SessionInfo, Stint, TelemetrySample,
        TrackStatus, TrackStatusChange, WeatherSample,
    };

    /// Straight-line driver: distance grows linearly from `d0` at `rate`
    /// m/s over `[t0, t1]`, all on one lap.
    fn linear_driver(code: &str, t0: f64, t1: f64, d0: f64, rate: f64) -> DriverInput {
        let sample = |t: f64| TelemetrySample {
            t,
            x: t,
            y: 0.0,
            speed: rate * 3.6,
            throttle: 95.0,
            brake: 0.0,
            gear: 7,
            drs: 0,
            distance: d0 + rate * (t - t0),
            lap: 1,
        };
        DriverInput {
            code: code.to_string(),
            name: None,
            team: None,
            color: Some("#ff8000".to_string()),
            laps: vec![LapBatch {
                lap: 1,
                samples: vec![sample(t0), sample(t1)],
            }],
            timing: vec![],
            stints: vec![Stint {
                number: 1,
                compound: Compound::Soft,
                start_lap: 1,
                end_lap: 99,
            }],
        }
    }

    fn session(drivers: Vec<DriverInput>) -> SessionInput {
        SessionInput {
            info: SessionInfo {
                year: 2024,
                round: 3,
                code: SessionCode::R,
                event_name: "Test Grand Prix".to_string(),
                circuit_name: "Testring".to_string(),
                lap_length: 1000.0,
                total_laps: 5,
                event_date: None,
            },
            drivers,
            weather: vec![],
            race_control: vec![],
            track_status: vec![],
        }
    }

    fn options(fps: u32) -> ReplayOptions {
        ReplayOptions {
            fps,
            ..Default::default()
        }
    }

    #[test]
    fn test_frame_totality_and_ordering() {
        let input = session(vec![
            linear_driver("AAA", 0.0, 10.0, 10.0, 30.0),
            linear_driver("BBB", 0.0, 10.0, 0.0, 35.0),
        ]);
        let bundle = build_replay(&input, &options(5)).unwrap();

        assert_eq!(bundle.timeline.len(), 51);
        assert_eq!(bundle.frames.len(), 51);
        for (i, frame) in bundle.frames.iter().enumerate() {
            assert_eq!(frame.t, bundle.timeline[i]);
        }
        for w in bundle.frames.windows(2) {
            assert!(w[0].t < w[1].t);
        }
    }

    #[test]
    fn test_empty_session_is_a_build_failure() {
        let input = session(vec![]);
        assert!(matches!(
            build_replay(&input, &options(25)),
            Err(ReplayError::NoTelemetry)
        ));

        // Drivers exist but carry no samples.
        let mut no_samples = linear_driver("AAA", 0.0, 10.0, 0.0, 30.0);
        no_samples.laps.clear();
        let input = session(vec![no_samples]);
        assert!(matches!(
            build_replay(&input, &options(25)),
            Err(ReplayError::NoTelemetry)
        ));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let input = session(vec![linear_driver("AAA", 0.0, 10.0, 0.0, 30.0)]);
        assert!(matches!(
            build_replay(&input, &options(0)),
            Err(ReplayError::InvalidFps)
        ));

        let mut bad = session(vec![linear_driver("AAA", 0.0, 10.0, 0.0, 30.0)]);
        bad.info.lap_length = 0.0;
        assert!(matches!(
            build_replay(&bad, &options(25)),
            Err(ReplayError::InvalidLapLength(_))
        ));
    }

    #[test]
    fn test_single_overtake_emitted_on_crossing_frame() {
        // BBB starts 10 m behind but runs 5 m/s faster: progress crosses
        // at t=2 (tie, broken by code) and BBB leads outright from t=3.
        let input = session(vec![
            linear_driver("AAA", 0.0, 10.0, 10.0, 30.0),
            linear_driver("BBB", 0.0, 10.0, 0.0, 35.0),
        ]);
        let bundle = build_replay(&input, &options(1)).unwrap();

        let all_changes: Vec<(usize, &PositionChange)> = bundle
            .frames
            .iter()
            .enumerate()
            .flat_map(|(i, f)| f.position_changes.iter().map(move |c| (i, c)))
            .collect();
        assert_eq!(all_changes.len(), 1);
        let (frame_index, change) = all_changes[0];
        assert_eq!(frame_index, 3);
        assert_eq!(change.driver, "BBB");
        assert_eq!(change.from_pos, 2);
        assert_eq!(change.to_pos, 1);
        assert_eq!(change.passed.as_deref(), Some("AAA"));

        // Positions settled on every frame: 1..=K.
        for frame in &bundle.frames {
            let mut positions: Vec<u32> =
                frame.drivers.values().map(|d| d.position).collect();
            positions.sort_unstable();
            let expect: Vec<u32> = (1..=frame.drivers.len() as u32).collect();
            assert_eq!(positions, expect);
        }
    }

    #[test]
    fn test_absent_driver_omitted_not_zero_filled() {
        // BBB only has data for the middle of the session.
        let input = session(vec![
            linear_driver("AAA", 0.0, 20.0, 0.0, 30.0),
            linear_driver("BBB", 5.0, 12.0, 0.0, 30.0),
        ]);
        let bundle = build_replay(&input, &options(1)).unwrap();

        assert!(!bundle.frames[4].drivers.contains_key("BBB"));
        assert!(bundle.frames[5].drivers.contains_key("BBB"));
        assert!(bundle.frames[12].drivers.contains_key("BBB"));
        assert!(!bundle.frames[13].drivers.contains_key("BBB"));

        // AAA alone is position 1 when BBB is absent.
        assert_eq!(bundle.frames[0].drivers["AAA"].position, 1);
    }

    #[test]
    fn test_retirement_marked_at_last_appearance() {
        let input = session(vec![
            linear_driver("AAA", 0.0, 200.0, 0.0, 4.0),
            linear_driver("BBB", 0.0, 50.0, 0.0, 4.0),
        ]);
        let bundle = build_replay(&input, &options(1)).unwrap();

        let marked: Vec<(usize, &Retirement)> = bundle
            .frames
            .iter()
            .enumerate()
            .flat_map(|(i, f)| f.retirements.iter().map(move |r| (i, r)))
            .collect();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].0, 50);
        assert_eq!(marked[0].1.driver, "BBB");
        assert_eq!(marked[0].1.t, 50.0);
    }

    #[test]
    fn test_weather_carries_forward_after_first_sample() {
        let mut input = session(vec![linear_driver("AAA", 0.0, 10.0, 0.0, 30.0)]);
        input.weather = vec![WeatherSample {
            t: 2.0,
            air_temp: 19.0,
            track_temp: 30.0,
            humidity: 55.0,
            rainfall: true,
            wind_speed: 4.2,
        }];
        input.track_status = vec![TrackStatusChange {
            t: 4.0,
            status: TrackStatus::SafetyCar,
        }];
        input.race_control = vec![RaceControlMessage {
            t: 4.0,
            kind: MessageKind::Info,
            driver: None,
            text: "SAFETY CAR DEPLOYED".to_string(),
        }];
        let bundle = build_replay(&input, &options(1)).unwrap();

        assert!(bundle.frames[0].weather.is_none());
        assert!(bundle.frames[1].weather.is_none());
        assert_eq!(bundle.frames[2].weather.unwrap().air_temp, 19.0);
        assert_eq!(bundle.frames[10].weather.unwrap().air_temp, 19.0);

        assert_eq!(bundle.frames[3].track_status, TrackStatus::Green);
        assert_eq!(bundle.frames[4].track_status, TrackStatus::SafetyCar);

        assert!(bundle.frames[3].race_messages.is_empty());
        assert_eq!(bundle.frames[4].race_messages.len(), 1);
        assert_eq!(bundle.frames[4].race_messages[0].age, 0.0);
    }

    #[test]
    fn test_stint_and_timing_context_on_frames() {
        let mut driver = linear_driver("AAA", 0.0, 10.0, 0.0, 30.0);
        driver.timing = vec![LapTiming {
            lap: 1,
            sector1: Some(2.0),
            sector2: Some(3.0),
            sector3: Some(4.0),
            lap_time: Some(9.0),
            completed_at: Some(9.0),
        }];
        let input = session(vec![driver]);
        let bundle = build_replay(&input, &options(1)).unwrap();

        let state = |i: usize| &bundle.frames[i].drivers["AAA"];

        assert_eq!(state(0).compound, Some(Compound::Soft));
        assert_eq!(state(0).stint, 1);
        assert_eq!(state(0).tyre_age, 1);
        assert_eq!(state(0).pit_count, 0);

        // Sector reveals: s1 at t=2, s2 at t=5, s3 + lap time at t=9.
        assert_eq!(state(1).sector_times, SectorTimes::default());
        assert_eq!(state(2).sector_times.s1, Some(2.0));
        assert_eq!(state(4).sector_times.s2, None);
        assert_eq!(state(5).sector_times.s2, Some(3.0));
        assert_eq!(state(8).sector_times.s3, None);
        assert_eq!(state(9).sector_times.s3, Some(4.0));
        assert_eq!(state(8).lap_time, None);
        assert_eq!(state(9).lap_time, Some(9.0));
    }

    #[test]
    fn test_meta_colors_top_speeds_and_key() {
        let mut fast = linear_driver("FAS", 0.0, 10.0, 0.0, 40.0);
        fast.color = Some("#123456".to_string());
        let mut slow = linear_driver("SLO", 0.0, 10.0, 0.0, 20.0);
        slow.color = None;
        let input = session(vec![fast, slow]);
        let bundle = build_replay(&input, &options(2)).unwrap();

        assert_eq!(bundle.meta.driver_colors["FAS"], "#123456");
        assert_eq!(bundle.meta.driver_colors["SLO"], DEFAULT_DRIVER_COLOR);
        assert_eq!(bundle.meta.top_speeds[0].driver, "FAS");
        assert!(bundle.meta.top_speeds[0].speed > bundle.meta.top_speeds[1].speed);
        assert_eq!(bundle.key(), "2024_R03_R_fps2");
        assert_eq!(bundle.meta.session_name, "Race");
        assert_eq!(bundle.meta.duration, 10.0);
    }
}
