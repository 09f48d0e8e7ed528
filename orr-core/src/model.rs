//! Session input model
//!
//! Defines the raw telemetry and session-context types an acquisition
//! source supplies for one session: per-lap sample batches, lap timing,
//! stints, weather, race-control messages and track status transitions.
//! Everything is fully materialized before the pipeline runs.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One raw telemetry sample for a single driver.
///
/// `t` is in session seconds. `distance` is meters since the start of the
/// current lap and resets to zero on every lap boundary. `lap` is stamped
/// by the normalizer from the owning batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    /// Session time in seconds.
    pub t: f64,
    /// World X position in meters.
    pub x: f64,
    /// World Y position in meters.
    pub y: f64,
    /// Speed in km/h.
    pub speed: f64,
    /// Throttle application, 0-100.
    pub throttle: f64,
    /// Brake application, 0-100 after normalization.
    pub brake: f64,
    /// Current gear (0 = neutral).
    pub gear: i8,
    /// Raw DRS status code.
    pub drs: u8,
    /// Meters traveled since lap start.
    pub distance: f64,
    /// Lap number, 1-based.
    #[serde(default)]
    pub lap: u32,
}

impl TelemetrySample {
    /// True when every floating-point field holds a finite value.
    pub fn is_finite(&self) -> bool {
        self.t.is_finite()
            && self.x.is_finite()
            && self.y.is_finite()
            && self.speed.is_finite()
            && self.throttle.is_finite()
            && self.brake.is_finite()
            && self.distance.is_finite()
    }
}

/// One lap's worth of raw samples, internally time-ordered, with
/// lap-relative distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LapBatch {
    /// Lap number this batch belongs to, 1-based.
    pub lap: u32,
    pub samples: Vec<TelemetrySample>,
}

/// Per-lap timing as reported by the acquisition source.
///
/// `completed_at` is the session time at which the lap was completed; it
/// anchors fastest-lap and sector-best observations on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LapTiming {
    pub lap: u32,
    pub sector1: Option<f64>,
    pub sector2: Option<f64>,
    pub sector3: Option<f64>,
    pub lap_time: Option<f64>,
    pub completed_at: Option<f64>,
}

/// Tyre compound fitted for a stint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compound {
    #[serde(rename = "SOFT")]
    Soft,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "HARD")]
    Hard,
    #[serde(rename = "INTERMEDIATE")]
    Intermediate,
    #[serde(rename = "WET")]
    Wet,
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Compound::Soft => "SOFT",
            Compound::Medium => "MEDIUM",
            Compound::Hard => "HARD",
            Compound::Intermediate => "INTERMEDIATE",
            Compound::Wet => "WET",
        };
        f.write_str(s)
    }
}

/// One stint on a single tyre set, spanning an inclusive lap range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stint {
    /// Stint number, 1-based.
    pub number: u32,
    pub compound: Compound,
    pub start_lap: u32,
    pub end_lap: u32,
}

impl Stint {
    pub fn covers(&self, lap: u32) -> bool {
        lap >= self.start_lap && lap <= self.end_lap
    }

    /// Laps this tyre set has run as of `lap`, 1-based.
    pub fn tyre_age(&self, lap: u32) -> u32 {
        lap.saturating_sub(self.start_lap) + 1
    }
}

/// Weather station reading at a session timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSample {
    /// Session time in seconds.
    pub t: f64,
    /// Air temperature in deg C.
    pub air_temp: f64,
    /// Track surface temperature in deg C.
    pub track_temp: f64,
    /// Relative humidity, 0-100.
    pub humidity: f64,
    pub rainfall: bool,
    /// Wind speed in m/s.
    pub wind_speed: f64,
}

/// Race-control message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "blue_flag")]
    BlueFlag,
    #[serde(rename = "penalty")]
    Penalty,
    #[serde(rename = "track_limit")]
    TrackLimit,
    #[serde(rename = "info")]
    Info,
}

/// A race-control message, displayed from `t` for the configured window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceControlMessage {
    /// Session time the message was issued, in seconds.
    pub t: f64,
    pub kind: MessageKind,
    /// Driver the message concerns, if any.
    pub driver: Option<String>,
    pub text: String,
}

/// Track flag state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackStatus {
    #[default]
    #[serde(rename = "GREEN")]
    Green,
    #[serde(rename = "YELLOW")]
    Yellow,
    #[serde(rename = "RED")]
    Red,
    #[serde(rename = "SC")]
    SafetyCar,
    #[serde(rename = "VSC")]
    VirtualSafetyCar,
}

/// A track status transition at a session timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackStatusChange {
    /// Session time in seconds.
    pub t: f64,
    pub status: TrackStatus,
}

/// Session identifier within a championship round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionCode {
    R,
    Q,
    S,
    SQ,
    FP1,
    FP2,
    FP3,
}

impl SessionCode {
    /// Human-readable session name.
    pub fn session_name(&self) -> &'static str {
        match self {
            SessionCode::R => "Race",
            SessionCode::Q => "Qualifying",
            SessionCode::S => "Sprint",
            SessionCode::SQ => "Sprint Qualifying",
            SessionCode::FP1 => "Practice 1",
            SessionCode::FP2 => "Practice 2",
            SessionCode::FP3 => "Practice 3",
        }
    }

    /// Sort key for session listings: race first, practice last.
    pub fn listing_order(&self) -> u8 {
        match self {
            SessionCode::R => 0,
            SessionCode::S => 1,
            SessionCode::SQ => 2,
            SessionCode::Q => 3,
            SessionCode::FP3 => 4,
            SessionCode::FP2 => 5,
            SessionCode::FP1 => 6,
        }
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionCode::R => "R",
            SessionCode::Q => "Q",
            SessionCode::S => "S",
            SessionCode::SQ => "SQ",
            SessionCode::FP1 => "FP1",
            SessionCode::FP2 => "FP2",
            SessionCode::FP3 => "FP3",
        };
        f.write_str(s)
    }
}

impl FromStr for SessionCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R" => Ok(SessionCode::R),
            "Q" => Ok(SessionCode::Q),
            "S" => Ok(SessionCode::S),
            "SQ" => Ok(SessionCode::SQ),
            "FP1" => Ok(SessionCode::FP1),
            "FP2" => Ok(SessionCode::FP2),
            "FP3" => Ok(SessionCode::FP3),
            _ => Err(format!("unknown session code: {s}")),
        }
    }
}

/// Session identity and per-session constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub year: u16,
    /// Championship round, 1-based.
    pub round: u8,
    pub code: SessionCode,
    /// Event name, e.g. "Monaco Grand Prix".
    pub event_name: String,
    pub circuit_name: String,
    /// Circuit length in meters.
    pub lap_length: f64,
    /// Scheduled lap count for the session.
    pub total_laps: u32,
    pub event_date: Option<NaiveDate>,
}

impl SessionInfo {
    pub fn session_name(&self) -> &'static str {
        self.code.session_name()
    }
}

/// Everything the acquisition source supplies for one driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInput {
    /// Three-letter driver code, unique within a session.
    pub code: String,
    pub name: Option<String>,
    pub team: Option<String>,
    /// Display color as "#rrggbb", assigned upstream.
    pub color: Option<String>,
    pub laps: Vec<LapBatch>,
    pub timing: Vec<LapTiming>,
    pub stints: Vec<Stint>,
}

impl DriverInput {
    /// Stint covering `lap`, if the stint table has one.
    pub fn stint_for_lap(&self, lap: u32) -> Option<&Stint> {
        self.stints.iter().find(|s| s.covers(lap))
    }

    /// Timing row for `lap`, if the source reported one.
    pub fn timing_for_lap(&self, lap: u32) -> Option<&LapTiming> {
        self.timing.iter().find(|t| t.lap == lap)
    }
}

/// Complete input for one session build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInput {
    pub info: SessionInfo,
    pub drivers: Vec<DriverInput>,
    /// Time-ordered weather readings.
    pub weather: Vec<WeatherSample>,
    /// Race-control messages, time-ordered.
    pub race_control: Vec<RaceControlMessage>,
    /// Track status transitions, time-ordered.
    pub track_status: Vec<TrackStatusChange>,
}

impl SessionInput {
    pub fn driver(&self, code: &str) -> Option<&DriverInput> {
        self.drivers.iter().find(|d| d.code == code)
    }
}
