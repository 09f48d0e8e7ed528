//! Frame model
//!
//! The pipeline's sole output unit: one fixed-shape record per tick with
//! per-driver state, ranking, events and session context. Also hosts the
//! forward-only cursors the assembler uses to resolve weather, track
//! status and race-control messages against tick times.

use crate::events::{FastestLap, OverallBests, PositionChange};
use crate::model::{
    Compound, MessageKind, RaceControlMessage, TrackStatus, TrackStatusChange, WeatherSample,
};
use crate::progress::Retirement;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Completed sector times for the driver's current lap, if reported.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorTimes {
    pub s1: Option<f64>,
    pub s2: Option<f64>,
    pub s3: Option<f64>,
}

/// One driver's complete state at one tick.
///
/// Fixed shape: every field is present on every frame the driver appears
/// in, so consumers never probe for keys. Drivers outside their presence
/// window are omitted from the frame entirely, never zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverFrameState {
    pub x: f64,
    pub y: f64,
    /// km/h.
    pub speed: f64,
    pub gear: i8,
    pub drs: u8,
    pub throttle: f64,
    pub brake: f64,
    pub lap: u32,
    /// Ranking key in meters; see `progress::progress`.
    pub progress: f64,
    /// 1-based race position at this tick.
    pub position: u32,
    /// Meters since lap start.
    pub distance: f64,
    pub compound: Option<Compound>,
    pub sector_times: SectorTimes,
    /// Last completed lap time, once one exists.
    pub lap_time: Option<f64>,
    /// Current stint number, 0 when the source has no stint table.
    pub stint: u32,
    /// Laps on the current tyre set, 0 when unknown.
    pub tyre_age: u32,
    pub pit_count: u32,
}

/// A race-control message currently inside its display window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveMessage {
    pub kind: MessageKind,
    pub driver: Option<String>,
    pub text: String,
    /// Seconds since the message was issued.
    pub age: f64,
}

/// One tick of the finished replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Replay-relative time in seconds.
    pub t: f64,
    /// Present drivers only, keyed by code. BTreeMap keeps serialization
    /// order deterministic.
    pub drivers: BTreeMap<String, DriverFrameState>,
    /// Nearest preceding weather reading; None before the first one.
    pub weather: Option<WeatherSample>,
    pub track_status: TrackStatus,
    /// Messages inside their display window, newest first.
    pub race_messages: Vec<ActiveMessage>,
    /// Current fastest-lap record.
    pub fastest_lap: Option<FastestLap>,
    /// Overtakes that happened on this tick.
    pub position_changes: Vec<PositionChange>,
    pub overall_bests: OverallBests,
    /// Drivers last seen on this tick.
    pub retirements: Vec<Retirement>,
}

// ============================================================================
// Context cursors
// ============================================================================

/// Nearest-preceding lookup over time-ordered weather samples.
///
/// Tick times must be fed in ascending order; the cursor only moves
/// forward.
pub struct WeatherCursor<'a> {
    samples: &'a [WeatherSample],
    next: usize,
}

impl<'a> WeatherCursor<'a> {
    pub fn new(samples: &'a [WeatherSample]) -> Self {
        Self { samples, next: 0 }
    }

    /// Last sample with `sample.t <= session_t`, if one exists yet.
    pub fn at(&mut self, session_t: f64) -> Option<WeatherSample> {
        while self.next < self.samples.len() && self.samples[self.next].t <= session_t {
            self.next += 1;
        }
        (self.next > 0).then(|| self.samples[self.next - 1])
    }
}

/// Most-recent-transition lookup over time-ordered status changes.
pub struct StatusCursor<'a> {
    changes: &'a [TrackStatusChange],
    next: usize,
}

impl<'a> StatusCursor<'a> {
    pub fn new(changes: &'a [TrackStatusChange]) -> Self {
        Self { changes, next: 0 }
    }

    /// Status in force at `session_t`; Green before any transition.
    pub fn at(&mut self, session_t: f64) -> TrackStatus {
        while self.next < self.changes.len() && self.changes[self.next].t <= session_t {
            self.next += 1;
        }
        if self.next > 0 {
            self.changes[self.next - 1].status
        } else {
            TrackStatus::default()
        }
    }
}

/// Sliding display window over time-ordered race-control messages.
pub struct MessageWindow<'a> {
    messages: &'a [RaceControlMessage],
    start: usize,
    window_secs: f64,
    cap: usize,
}

impl<'a> MessageWindow<'a> {
    pub fn new(messages: &'a [RaceControlMessage], window_secs: f64, cap: usize) -> Self {
        Self {
            messages,
            start: 0,
            window_secs,
            cap,
        }
    }

    /// Messages issued within `window_secs` before `session_t`, newest
    /// first, at most `cap` of them.
    pub fn active(&mut self, session_t: f64) -> Vec<ActiveMessage> {
        while self.start < self.messages.len()
            && self.messages[self.start].t + self.window_secs < session_t
        {
            self.start += 1;
        }

        let mut active: Vec<ActiveMessage> = self.messages[self.start..]
            .iter()
            .take_while(|m| m.t <= session_t)
            .map(|m| ActiveMessage {
                kind: m.kind,
                driver: m.driver.clone(),
                text: m.text.clone(),
                age: session_t - m.t,
            })
            .collect();
        active.reverse();
        active.truncate(self.cap);
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather(t: f64, air: f64) -> WeatherSample {
        WeatherSample {
            t,
            air_temp: air,
            track_temp: air + 12.0,
            humidity: 40.0,
            rainfall: false,
            wind_speed: 1.0,
        }
    }

    #[test]
    fn test_weather_cursor_nearest_preceding() {
        let samples = vec![weather(10.0, 20.0), weather(70.0, 21.0), weather(130.0, 22.0)];
        let mut cursor = WeatherCursor::new(&samples);

        assert_eq!(cursor.at(5.0), None);
        assert_eq!(cursor.at(10.0).unwrap().air_temp, 20.0);
        // 69.9 is closer to 70 but only preceding samples count.
        assert_eq!(cursor.at(69.9).unwrap().air_temp, 20.0);
        assert_eq!(cursor.at(70.0).unwrap().air_temp, 21.0);
        assert_eq!(cursor.at(500.0).unwrap().air_temp, 22.0);
    }

    #[test]
    fn test_status_cursor_defaults_green() {
        let changes = vec![
            TrackStatusChange {
                t: 30.0,
                status: TrackStatus::Yellow,
            },
            TrackStatusChange {
                t: 45.0,
                status: TrackStatus::Green,
            },
        ];
        let mut cursor = StatusCursor::new(&changes);

        assert_eq!(cursor.at(0.0), TrackStatus::Green);
        assert_eq!(cursor.at(30.0), TrackStatus::Yellow);
        assert_eq!(cursor.at(44.9), TrackStatus::Yellow);
        assert_eq!(cursor.at(45.0), TrackStatus::Green);
    }

    #[test]
    fn test_message_window_age_and_cap() {
        let messages: Vec<RaceControlMessage> = (0..8)
            .map(|i| RaceControlMessage {
                t: i as f64,
                kind: MessageKind::Info,
                driver: None,
                text: format!("MSG {i}"),
            })
            .collect();
        let mut window = MessageWindow::new(&messages, 10.0, 5);

        // All eight issued by t=7; capped to the five newest.
        let active = window.active(7.0);
        assert_eq!(active.len(), 5);
        assert_eq!(active[0].text, "MSG 7");
        assert_eq!(active[0].age, 0.0);
        assert_eq!(active[4].text, "MSG 3");
        assert_eq!(active[4].age, 4.0);

        // At t=12.5, messages 0-2 have aged out (window 10s).
        let active = window.active(12.5);
        assert_eq!(active.len(), 5);
        assert_eq!(active.last().unwrap().text, "MSG 3");

        // Far later, nothing is active.
        assert!(window.active(100.0).is_empty());
    }

    #[test]
    fn test_message_window_excludes_future_messages() {
        let messages = vec![
            RaceControlMessage {
                t: 5.0,
                kind: MessageKind::BlueFlag,
                driver: Some("STR".to_string()),
                text: "BLUE FLAG".to_string(),
            },
            RaceControlMessage {
                t: 9.0,
                kind: MessageKind::Penalty,
                driver: Some("STR".to_string()),
                text: "5 SECOND PENALTY".to_string(),
            },
        ];
        let mut window = MessageWindow::new(&messages, 10.0, 5);

        let active = window.active(6.0);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].kind, MessageKind::BlueFlag);
    }

    #[test]
    fn test_frame_serde_round_trip() {
        let mut drivers = BTreeMap::new();
        drivers.insert(
            "GAS".to_string(),
            DriverFrameState {
                x: 120.5,
                y: -44.0,
                speed: 301.2,
                gear: 8,
                drs: 12,
                throttle: 100.0,
                brake: 0.0,
                lap: 12,
                progress: 58_000.4,
                position: 3,
                distance: 3000.4,
                compound: Some(Compound::Medium),
                sector_times: SectorTimes {
                    s1: Some(28.3),
                    s2: None,
                    s3: None,
                },
                lap_time: Some(92.1),
                stint: 2,
                tyre_age: 7,
                pit_count: 1,
            },
        );
        let frame = Frame {
            t: 480.2,
            drivers,
            weather: Some(weather(480.0, 23.5)),
            track_status: TrackStatus::VirtualSafetyCar,
            race_messages: vec![ActiveMessage {
                kind: MessageKind::Info,
                driver: None,
                text: "VSC DEPLOYED".to_string(),
                age: 1.5,
            }],
            fastest_lap: None,
            position_changes: vec![],
            overall_bests: OverallBests::default(),
            retirements: vec![],
        };

        let json = serde_json::to_string(&frame).unwrap();
        let back: Frame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["trackStatus"], "VSC");
        assert!(value["drivers"]["GAS"]["sectorTimes"].is_object());
        assert!(value["drivers"]["GAS"]["tyreAge"].is_number());
    }
}
