//! Synthetic session source for demos and tests
//!
//! Generates a complete race session without any recorded data: cars lap
//! a segment-based circuit with per-driver pace, tyre degradation and a
//! mid-race pit stop, alongside a timing sheet, weather drift and a
//! scripted safety-car period. Everything derives from the seed, so the
//! same config always produces byte-identical input.

use anyhow::Result;
use chrono::NaiveDate;
use orr_core::model::{
    Compound, DriverInput, LapBatch, LapTiming, MessageKind, RaceControlMessage, SessionCode,
    SessionInfo, SessionInput, Stint, TelemetrySample, TrackStatus, TrackStatusChange,
    WeatherSample,
};
use orr_core::source::SessionSource;
use tracing::debug;

// =============================================================================
// Track definition: a sequence of segments that form a lap
// =============================================================================

#[derive(Clone, Copy)]
enum SegmentKind {
    Straight, // Full throttle, top speed
    Braking,  // Heavy braking into a corner
    Corner,   // Constant-ish speed cornering
    Accel,    // Accelerating out of a corner
}

#[derive(Clone, Copy)]
struct Segment {
    kind: SegmentKind,
    length: f64,       // meters
    target_speed: f64, // m/s at segment exit
    turn: f64,         // heading change across the segment, radians
}

/// A ~5.5 km circuit. Turns sum to one full revolution so the lap closes
/// on itself.
#[rustfmt::skip]
fn circuit() -> Vec<Segment> {
    vec![
        // Start/finish straight
        Segment { kind: SegmentKind::Straight, length: 900.0,  target_speed: 88.0, turn: 0.0 },
        // T1: heavy braking into a slow right-hander
        Segment { kind: SegmentKind::Braking,  length: 120.0,  target_speed: 38.0, turn: 0.1 },
        Segment { kind: SegmentKind::Corner,   length: 160.0,  target_speed: 34.0, turn: 1.5 },
        Segment { kind: SegmentKind::Accel,    length: 260.0,  target_speed: 68.0, turn: 0.15 },
        // Short straight
        Segment { kind: SegmentKind::Straight, length: 420.0,  target_speed: 80.0, turn: 0.0 },
        // T2: fast left-hander
        Segment { kind: SegmentKind::Braking,  length: 90.0,   target_speed: 52.0, turn: -0.05 },
        Segment { kind: SegmentKind::Corner,   length: 210.0,  target_speed: 50.0, turn: -1.1 },
        Segment { kind: SegmentKind::Accel,    length: 240.0,  target_speed: 72.0, turn: -0.1 },
        // Back straight, the DRS zone
        Segment { kind: SegmentKind::Straight, length: 1000.0, target_speed: 92.0, turn: 0.05 },
        // T3/T4: chicane
        Segment { kind: SegmentKind::Braking,  length: 130.0,  target_speed: 30.0, turn: 0.05 },
        Segment { kind: SegmentKind::Corner,   length: 90.0,   target_speed: 26.0, turn: 0.9 },
        Segment { kind: SegmentKind::Corner,   length: 90.0,   target_speed: 28.0, turn: -0.85 },
        Segment { kind: SegmentKind::Accel,    length: 230.0,  target_speed: 62.0, turn: -0.05 },
        // T5: long sweeping right
        Segment { kind: SegmentKind::Braking,  length: 80.0,   target_speed: 55.0, turn: 0.1 },
        Segment { kind: SegmentKind::Corner,   length: 380.0,  target_speed: 56.0, turn: 1.9 },
        Segment { kind: SegmentKind::Accel,    length: 250.0,  target_speed: 70.0, turn: 0.2 },
        // T6: hairpin
        Segment { kind: SegmentKind::Braking,  length: 140.0,  target_speed: 24.0, turn: -0.05 },
        Segment { kind: SegmentKind::Corner,   length: 110.0,  target_speed: 21.0, turn: 3.3 },
        Segment { kind: SegmentKind::Accel,    length: 280.0,  target_speed: 66.0, turn: 0.2332 },
        // Run back to the line
        Segment { kind: SegmentKind::Straight, length: 310.0,  target_speed: 78.0, turn: 0.0 },
    ]
}

// =============================================================================
// Track geometry and speed profile
// =============================================================================

struct SegmentGeom {
    kind: SegmentKind,
    start_d: f64,
    length: f64,
    entry_speed: f64,
    target_speed: f64,
    start_x: f64,
    start_y: f64,
    start_heading: f64,
    turn: f64,
}

struct TrackProfile {
    segments: Vec<SegmentGeom>,
    length: f64,
    /// Residual start/finish mismatch, blended out along the lap so
    /// consecutive laps join without a jump.
    closure_gap: (f64, f64),
    /// Distance range of the longest straight.
    drs_zone: (f64, f64),
}

impl TrackProfile {
    fn build() -> Self {
        let layout = circuit();
        let mut segments = Vec::with_capacity(layout.len());
        let (mut x, mut y, mut heading) = (0.0_f64, 0.0_f64, 0.0_f64);
        let mut d = 0.0;
        let mut entry_speed = layout.last().map(|s| s.target_speed).unwrap_or(50.0);
        let mut drs_zone = (0.0, 0.0);
        let mut longest_straight = 0.0;

        for seg in &layout {
            segments.push(SegmentGeom {
                kind: seg.kind,
                start_d: d,
                length: seg.length,
                entry_speed,
                target_speed: seg.target_speed,
                start_x: x,
                start_y: y,
                start_heading: heading,
                turn: seg.turn,
            });
            if matches!(seg.kind, SegmentKind::Straight) && seg.length > longest_straight {
                longest_straight = seg.length;
                drs_zone = (d, d + seg.length);
            }
            (x, y, heading) = advance(x, y, heading, seg.length, seg.turn);
            d += seg.length;
            entry_speed = seg.target_speed;
        }

        Self {
            segments,
            length: d,
            closure_gap: (-x, -y),
            drs_zone,
        }
    }

    fn segment_at(&self, d: f64) -> &SegmentGeom {
        let i = self
            .segments
            .partition_point(|s| s.start_d <= d)
            .saturating_sub(1);
        &self.segments[i]
    }

    /// World position at lap distance `d`, identical on every lap.
    fn point_at(&self, d: f64) -> (f64, f64) {
        let d = d.clamp(0.0, self.length);
        let seg = self.segment_at(d);
        let u = d - seg.start_d;
        let (mut x, mut y) = if seg.turn.abs() < 1e-9 {
            (
                seg.start_x + u * seg.start_heading.cos(),
                seg.start_y + u * seg.start_heading.sin(),
            )
        } else {
            let r = seg.length / seg.turn;
            let cx = seg.start_x - r * seg.start_heading.sin();
            let cy = seg.start_y + r * seg.start_heading.cos();
            let a = seg.start_heading + seg.turn * (u / seg.length);
            (cx + r * a.sin(), cy - r * a.cos())
        };
        let f = d / self.length;
        x += self.closure_gap.0 * f;
        y += self.closure_gap.1 * f;
        (x, y)
    }

    /// Reference speed in m/s at lap distance `d`.
    fn speed_at(&self, d: f64) -> f64 {
        let seg = self.segment_at(d.clamp(0.0, self.length));
        let u = ((d - seg.start_d) / seg.length).clamp(0.0, 1.0);
        lerp(seg.entry_speed, seg.target_speed, smoothstep(u))
    }

    /// `(throttle, brake)` in percent at lap distance `d`.
    fn controls_at(&self, d: f64) -> (f64, f64) {
        let seg = self.segment_at(d.clamp(0.0, self.length));
        let u = ((d - seg.start_d) / seg.length).clamp(0.0, 1.0);
        match seg.kind {
            SegmentKind::Straight => (95.0 + 5.0 * (1.0 - u), 0.0),
            SegmentKind::Braking => (0.0, 100.0 - smoothstep(u) * 30.0),
            SegmentKind::Corner => (20.0 + 30.0 * u, 0.0),
            SegmentKind::Accel => (50.0 + 50.0 * smoothstep(u), 0.0),
        }
    }

    fn in_drs_zone(&self, d: f64) -> bool {
        d >= self.drs_zone.0 && d <= self.drs_zone.1
    }
}

fn advance(x: f64, y: f64, heading: f64, length: f64, turn: f64) -> (f64, f64, f64) {
    if turn.abs() < 1e-9 {
        return (x + length * heading.cos(), y + length * heading.sin(), heading);
    }
    let r = length / turn;
    let cx = x - r * heading.sin();
    let cy = y + r * heading.cos();
    let nh = heading + turn;
    (cx + r * nh.sin(), cy - r * nh.cos(), nh)
}

fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn speed_to_gear(kph: f64) -> i8 {
    match kph {
        x if x < 80.0 => 2,
        x if x < 120.0 => 3,
        x if x < 160.0 => 4,
        x if x < 200.0 => 5,
        x if x < 240.0 => 6,
        x if x < 280.0 => 7,
        _ => 8,
    }
}

/// Simple deterministic noise from a seed.
fn noise(seed: f64) -> f64 {
    let x = (seed * 12.9898 + 78.233).sin() * 43_758.547;
    x - x.floor()
}

/// Small jitter centered around 0.
fn jitter(seed: f64, amplitude: f64) -> f64 {
    (noise(seed) - 0.5) * 2.0 * amplitude
}

// =============================================================================
// Roster and calendar
// =============================================================================

/// `(code, name, team, team color)`, two cars per team.
const ROSTER: [(&str, &str, &str, &str); 10] = [
    ("RIV", "Alex Rivera", "Apex Racing", "#e8002d"),
    ("CHE", "Sam Chen", "Apex Racing", "#e8002d"),
    ("KOV", "Mika Kovanen", "Velocity Motorsport", "#1868db"),
    ("DUB", "Lea Dubois", "Velocity Motorsport", "#1868db"),
    ("OKA", "Hiro Okada", "Meridian GP", "#f59600"),
    ("SAN", "Marta Santos", "Meridian GP", "#f59600"),
    ("WEB", "Oliver Webb", "Northline Racing", "#00a19c"),
    ("ALR", "Dani Alric", "Northline Racing", "#00a19c"),
    ("VOS", "Jan Vos", "Tempesta F1", "#6c1d45"),
    ("ILI", "Nadia Ilieva", "Tempesta F1", "#6c1d45"),
];

const EVENTS: [(&str, &str); 5] = [
    ("Meridian Grand Prix", "Meridian International Circuit"),
    ("Costa Azul Grand Prix", "Autodromo Costa Azul"),
    ("Northgate Grand Prix", "Northgate Raceway"),
    ("Silverpine Grand Prix", "Silverpine Park"),
    ("Harbor City Grand Prix", "Harbor City Street Circuit"),
];

// =============================================================================
// SyntheticSource
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticConfig {
    pub year: u16,
    pub round: u8,
    pub code: SessionCode,
    /// Field size, clamped to the roster.
    pub drivers: usize,
    pub laps: u32,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            year: 2024,
            round: 1,
            code: SessionCode::R,
            drivers: 6,
            laps: 5,
            seed: 2024,
        }
    }
}

/// Deterministic generated session.
pub struct SyntheticSource {
    config: SyntheticConfig,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

impl SessionSource for SyntheticSource {
    fn describe(&self) -> String {
        format!(
            "synthetic {} round {} {} ({} drivers, {} laps, seed {})",
            self.config.year,
            self.config.round,
            self.config.code,
            self.config.drivers,
            self.config.laps,
            self.config.seed
        )
    }

    fn load(&self) -> Result<SessionInput> {
        Ok(generate(&self.config))
    }
}

// =============================================================================
// Generation
// =============================================================================

/// Raw feed cadence, 5 Hz.
const SAMPLE_DT: f64 = 0.2;
/// Distance integration step in meters.
const INTEGRATION_STEP: f64 = 4.0;
/// Pit lane speed limit in m/s.
const PIT_LIMITER: f64 = 22.0;
/// Limited stretch after the line on an out lap.
const PIT_EXIT_ZONE: f64 = 400.0;
/// Limited stretch before the line on an in lap.
const PIT_ENTRY_ZONE: f64 = 350.0;

fn generate(config: &SyntheticConfig) -> SessionInput {
    let profile = TrackProfile::build();
    let driver_count = config.drivers.clamp(2, ROSTER.len());
    let laps = config.laps.clamp(1, 100);
    let round = config.round.max(1);
    let seed_base = (config.seed % 100_000) as f64 * 0.618 + 11.17;

    // With a big enough field and race, the tail car stops halfway.
    let retiring = (driver_count >= 4 && laps >= 3).then_some(driver_count - 1);
    let retire_after = laps.div_ceil(2);

    let mut drivers = Vec::with_capacity(driver_count);
    let mut session_end: f64 = 0.0;
    let mut retire_t = None;

    for idx in 0..driver_count {
        let (code, name, team, color) = ROSTER[idx];
        let driver_laps = match retiring {
            Some(r) if r == idx => retire_after,
            _ => laps,
        };
        let stints = stint_plan(idx, laps);
        let pace = 1.0 + idx as f64 * 0.0035 + jitter(seed_base + idx as f64 * 3.7, 0.002);
        let gen = LapGenerator {
            profile: &profile,
            seed: seed_base + idx as f64 * 97.3,
            pace,
            stints: &stints,
        };

        let mut batches = Vec::with_capacity(driver_laps as usize);
        let mut timing = Vec::with_capacity(driver_laps as usize);
        // Small grid stagger at lights out.
        let mut t = 0.35 * idx as f64;
        for lap in 1..=driver_laps {
            let (batch, row, end_t) = gen.lap(lap, t);
            batches.push(batch);
            timing.push(row);
            t = end_t;
        }

        session_end = session_end.max(t);
        if retiring == Some(idx) {
            retire_t = Some(t);
        }

        drivers.push(DriverInput {
            code: code.to_string(),
            name: Some(name.to_string()),
            team: Some(team.to_string()),
            color: Some(color.to_string()),
            laps: batches,
            timing,
            stints,
        });
    }

    let (event_name, circuit_name) = EVENTS[(round as usize - 1) % EVENTS.len()];
    debug!(
        drivers = driver_count,
        laps,
        length = profile.length,
        duration = session_end,
        "generated synthetic session"
    );

    SessionInput {
        info: SessionInfo {
            year: config.year,
            round,
            code: config.code,
            event_name: event_name.to_string(),
            circuit_name: circuit_name.to_string(),
            lap_length: profile.length,
            total_laps: laps,
            event_date: NaiveDate::from_ymd_opt(
                config.year as i32,
                (round as u32 - 1) % 12 + 1,
                14,
            ),
        },
        weather: weather_series(seed_base, session_end),
        race_control: race_control_series(&drivers, retiring, retire_t, session_end),
        track_status: track_status_series(retire_t),
        drivers,
    }
}

/// One stop for races long enough to need one, compounds staggered so
/// teammates diverge.
fn stint_plan(idx: usize, laps: u32) -> Vec<Stint> {
    if laps < 4 {
        return vec![Stint {
            number: 1,
            compound: Compound::Medium,
            start_lap: 1,
            end_lap: laps,
        }];
    }
    let pit_lap = (laps / 2 + 1 + idx as u32 % 2).min(laps);
    let first = if idx % 2 == 0 {
        Compound::Soft
    } else {
        Compound::Medium
    };
    vec![
        Stint {
            number: 1,
            compound: first,
            start_lap: 1,
            end_lap: pit_lap - 1,
        },
        Stint {
            number: 2,
            compound: Compound::Hard,
            start_lap: pit_lap,
            end_lap: laps,
        },
    ]
}

struct LapGenerator<'a> {
    profile: &'a TrackProfile,
    seed: f64,
    /// Driver pace multiplier on the reference speed profile; 1.0 is the
    /// reference lap, larger is slower.
    pace: f64,
    stints: &'a [Stint],
}

impl LapGenerator<'_> {
    /// Generate one lap starting at session time `start_t`. Returns the
    /// batch, its timing row and the session time the lap ended.
    fn lap(&self, lap: u32, start_t: f64) -> (LapBatch, LapTiming, f64) {
        let length = self.profile.length;
        let s1_end = length / 3.0;
        let s2_end = 2.0 * length / 3.0;

        let stint = self.stints.iter().find(|s| s.covers(lap));
        let age = stint.map(|s| s.tyre_age(lap)).unwrap_or(1);
        let degradation = 1.0 + 0.0012 * (age.saturating_sub(1)) as f64;
        let scatter = 1.0 + jitter(self.seed + lap as f64 * 13.9, 0.0025);
        let slowdown = self.pace * degradation * scatter;

        let out_lap = stint.is_some_and(|s| s.number > 1 && lap == s.start_lap);
        let in_lap = self.stints.iter().any(|s| s.number > 1 && lap + 1 == s.start_lap);

        let speed_at = |d: f64| -> f64 {
            let mut v = self.profile.speed_at(d) / slowdown;
            if out_lap && d < PIT_EXIT_ZONE {
                v = v.min(PIT_LIMITER);
            }
            if in_lap && d > length - PIT_ENTRY_ZONE {
                v = v.min(PIT_LIMITER);
            }
            v.max(5.0)
        };

        let mut samples = Vec::new();
        let mut d = 0.0;
        let mut t = start_t;
        let mut next_emit = start_t;
        let mut v = speed_at(0.0);
        let mut cum1 = None;
        let mut cum2 = None;

        while d < length {
            while next_emit <= t {
                samples.push(self.sample(lap, next_emit, d, v));
                next_emit += SAMPLE_DT;
            }
            let step = INTEGRATION_STEP.min(length - d);
            v = speed_at(d + step / 2.0);
            t += step / v;
            d += step;
            if cum1.is_none() && d >= s1_end {
                cum1 = Some(t - start_t);
            }
            if cum2.is_none() && d >= s2_end {
                cum2 = Some(t - start_t);
            }
        }
        // Boundary sample exactly on the line; the next lap starts at the
        // same instant with distance back at zero.
        samples.push(self.sample(lap, t, length, v));

        let lap_time = t - start_t;
        let timing = LapTiming {
            lap,
            sector1: cum1,
            sector2: cum2.zip(cum1).map(|(c2, c1)| c2 - c1),
            sector3: cum2.map(|c2| lap_time - c2),
            lap_time: Some(lap_time),
            completed_at: Some(t),
        };

        (LapBatch { lap, samples }, timing, t)
    }

    fn sample(&self, lap: u32, t: f64, d: f64, v: f64) -> TelemetrySample {
        let (x, y) = self.profile.point_at(d);
        let (throttle, brake) = self.profile.controls_at(d);
        let k = self.seed + t * 7.31;
        let kph = (v * 3.6 + jitter(k, 1.2)).max(0.0);
        let drs = if lap >= 2 && v > 55.0 && self.profile.in_drs_zone(d) {
            12
        } else {
            0
        };
        TelemetrySample {
            t,
            x: x + jitter(k * 1.1, 0.4),
            y: y + jitter(k * 1.2, 0.4),
            speed: kph,
            throttle: (throttle + jitter(k * 1.3, 1.5)).clamp(0.0, 100.0),
            brake: if brake > 0.0 {
                (brake + jitter(k * 1.4, 2.0)).clamp(0.0, 100.0)
            } else {
                0.0
            },
            gear: speed_to_gear(kph),
            drs,
            distance: d,
            lap,
        }
    }
}

fn weather_series(seed_base: f64, session_end: f64) -> Vec<WeatherSample> {
    let mut out = Vec::new();
    let mut t = 0.0;
    while t <= session_end + 30.0 {
        out.push(WeatherSample {
            t,
            air_temp: 21.5 + 1.4 * (t / 600.0).sin() + jitter(seed_base + t * 0.11, 0.15),
            track_temp: 31.0 + 2.8 * (t / 800.0).sin() + jitter(seed_base + t * 0.13, 0.25),
            humidity: (48.0 + 6.0 * (t / 900.0).cos() + jitter(seed_base + t * 0.15, 1.0))
                .clamp(0.0, 100.0),
            rainfall: false,
            wind_speed: (2.8 + jitter(seed_base + t * 0.17, 0.8)).max(0.0),
        });
        t += 30.0;
    }
    out
}

fn track_status_series(retire_t: Option<f64>) -> Vec<TrackStatusChange> {
    let mut out = vec![TrackStatusChange {
        t: 0.0,
        status: TrackStatus::Green,
    }];
    if let Some(t) = retire_t {
        out.push(TrackStatusChange {
            t: t + 4.0,
            status: TrackStatus::SafetyCar,
        });
        out.push(TrackStatusChange {
            t: t + 49.0,
            status: TrackStatus::Green,
        });
    }
    out
}

fn race_control_series(
    drivers: &[DriverInput],
    retiring: Option<usize>,
    retire_t: Option<f64>,
    session_end: f64,
) -> Vec<RaceControlMessage> {
    let mut out = vec![RaceControlMessage {
        t: 0.0,
        kind: MessageKind::Info,
        driver: None,
        text: "GREEN LIGHT - RACE START".to_string(),
    }];

    // DRS opens once the leader completes lap 1.
    if let Some(lap1_end) = drivers
        .first()
        .and_then(|d| d.timing.first())
        .and_then(|t| t.completed_at)
    {
        out.push(RaceControlMessage {
            t: lap1_end + 1.0,
            kind: MessageKind::Info,
            driver: None,
            text: "DRS ENABLED".to_string(),
        });
        if drivers.len() > 1 {
            out.push(RaceControlMessage {
                t: lap1_end * 1.6,
                kind: MessageKind::TrackLimit,
                driver: Some(drivers[1].code.clone()),
                text: format!(
                    "CAR {} LAP TIME DELETED - TRACK LIMITS AT TURN 9",
                    drivers[1].code
                ),
            });
        }
    }

    if let (Some(idx), Some(t)) = (retiring, retire_t) {
        let code = &drivers[idx].code;
        out.push(RaceControlMessage {
            t: t + 2.0,
            kind: MessageKind::Info,
            driver: Some(code.clone()),
            text: format!("CAR {code} STOPPED AT TURN 5"),
        });
        out.push(RaceControlMessage {
            t: t + 4.0,
            kind: MessageKind::Info,
            driver: None,
            text: "SAFETY CAR DEPLOYED".to_string(),
        });
        out.push(RaceControlMessage {
            t: t + 44.0,
            kind: MessageKind::Info,
            driver: None,
            text: "SAFETY CAR IN THIS LAP".to_string(),
        });
    }

    if drivers.len() > 2 {
        out.push(RaceControlMessage {
            t: session_end * 0.6,
            kind: MessageKind::BlueFlag,
            driver: Some(drivers[drivers.len() - 2].code.clone()),
            text: format!("WAVED BLUE FLAG FOR CAR {}", drivers[drivers.len() - 2].code),
        });
        out.push(RaceControlMessage {
            t: session_end * 0.75,
            kind: MessageKind::Penalty,
            driver: Some(drivers[2].code.clone()),
            text: format!("5 SECOND TIME PENALTY FOR CAR {} - UNSAFE RELEASE", drivers[2].code),
        });
    }

    out
}
