//! Event detector
//!
//! Derives fastest-lap records, overtakes and overall-best sectors in one
//! forward pass over the ranked tick stream. Lap and sector completions
//! come from the per-lap timing tables and are observed on the first tick
//! at or after their completion time; records flip `is_new` on for exactly
//! that tick so a renderer can trigger a banner once.

use crate::model::DriverInput;
use crate::progress::RankedDriver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Session fastest-lap record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FastestLap {
    pub driver: String,
    /// Lap time in seconds.
    pub time: f64,
    pub lap: u32,
    /// True exactly on the frame where the record was set.
    pub is_new: bool,
}

/// A position gain detected between consecutive frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionChange {
    pub driver: String,
    pub from_pos: u32,
    pub to_pos: u32,
    /// The driver now directly behind who lost position in the same step,
    /// when the swap is unambiguous.
    pub passed: Option<String>,
    /// Replay-relative time of the change.
    pub t: f64,
}

/// Best completed time for one sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorRecord {
    pub driver: String,
    pub time: f64,
    pub lap: u32,
    /// True exactly on the frame where the record was set.
    pub is_new: bool,
}

/// Running overall-best sector records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallBests {
    pub s1: Option<SectorRecord>,
    pub s2: Option<SectorRecord>,
    pub s3: Option<SectorRecord>,
}

/// Everything the detector derives for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickEvents {
    /// Current fastest-lap record, if any lap has completed.
    pub fastest_lap: Option<FastestLap>,
    /// Current overall-best sectors.
    pub overall_bests: OverallBests,
    /// Overtakes that happened on this tick.
    pub position_changes: Vec<PositionChange>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompletionKind {
    /// Sector 1-3 completed with this time.
    Sector(u8, f64),
    /// Lap completed with this time.
    Lap(f64),
}

/// A timing observation placed on the session time axis.
#[derive(Debug, Clone)]
struct Completion {
    t: f64,
    driver: String,
    lap: u32,
    kind: CompletionKind,
}

/// Single-pass detector over ranked ticks.
#[derive(Debug)]
pub struct EventDetector {
    completions: Vec<Completion>,
    cursor: usize,
    fastest: Option<FastestLap>,
    bests: OverallBests,
    prev_positions: HashMap<String, u32>,
}

impl EventDetector {
    /// Build the completion log from the drivers' timing tables.
    pub fn new(drivers: &[DriverInput]) -> Self {
        let mut completions = Vec::new();
        for driver in drivers {
            for timing in &driver.timing {
                let Some(completed_at) = timing.completed_at else {
                    continue;
                };
                if let Some(lap_time) = timing.lap_time {
                    if lap_time > 0.0 && lap_time.is_finite() {
                        completions.push(Completion {
                            t: completed_at,
                            driver: driver.code.clone(),
                            lap: timing.lap,
                            kind: CompletionKind::Lap(lap_time),
                        });
                    }
                }
                // Sector completion instants are anchored backwards from
                // the lap completion time; without s3 the earlier sectors
                // cannot be placed on the axis and are skipped.
                let (s1, s2, s3) = (timing.sector1, timing.sector2, timing.sector3);
                if let Some(s3_time) = s3 {
                    completions.push(Completion {
                        t: completed_at,
                        driver: driver.code.clone(),
                        lap: timing.lap,
                        kind: CompletionKind::Sector(3, s3_time),
                    });
                    if let Some(s2_time) = s2 {
                        completions.push(Completion {
                            t: completed_at - s3_time,
                            driver: driver.code.clone(),
                            lap: timing.lap,
                            kind: CompletionKind::Sector(2, s2_time),
                        });
                        if let Some(s1_time) = s1 {
                            completions.push(Completion {
                                t: completed_at - s3_time - s2_time,
                                driver: driver.code.clone(),
                                lap: timing.lap,
                                kind: CompletionKind::Sector(1, s1_time),
                            });
                        }
                    }
                }
            }
        }
        completions.sort_by(|a, b| a.t.total_cmp(&b.t));

        Self {
            completions,
            cursor: 0,
            fastest: None,
            bests: OverallBests::default(),
            prev_positions: HashMap::new(),
        }
    }

    /// Advance to the tick at `session_t` and derive its events.
    ///
    /// Must be called with strictly increasing tick times; `ranked` is the
    /// tick's full ranking and `replay_t` its replay-relative timestamp.
    pub fn step(&mut self, session_t: f64, replay_t: f64, ranked: &[RankedDriver]) -> TickEvents {
        // Clear last tick's is_new flags before observing this tick.
        if let Some(fastest) = self.fastest.as_mut() {
            fastest.is_new = false;
        }
        for record in [&mut self.bests.s1, &mut self.bests.s2, &mut self.bests.s3]
            .into_iter()
            .flatten()
        {
            record.is_new = false;
        }

        while self.cursor < self.completions.len() && self.completions[self.cursor].t <= session_t
        {
            let completion = self.completions[self.cursor].clone();
            self.cursor += 1;
            self.observe(completion);
        }

        let position_changes = self.detect_overtakes(ranked, replay_t);

        self.prev_positions = ranked
            .iter()
            .map(|r| (r.code.clone(), r.position))
            .collect();

        TickEvents {
            fastest_lap: self.fastest.clone(),
            overall_bests: self.bests.clone(),
            position_changes,
        }
    }

    fn observe(&mut self, completion: Completion) {
        match completion.kind {
            CompletionKind::Lap(time) => {
                let improves = self
                    .fastest
                    .as_ref()
                    .map_or(true, |record| time < record.time);
                if improves {
                    self.fastest = Some(FastestLap {
                        driver: completion.driver,
                        time,
                        lap: completion.lap,
                        is_new: true,
                    });
                }
            }
            CompletionKind::Sector(sector, time) => {
                let slot = match sector {
                    1 => &mut self.bests.s1,
                    2 => &mut self.bests.s2,
                    _ => &mut self.bests.s3,
                };
                let improves = slot.as_ref().map_or(true, |record| time < record.time);
                if improves {
                    *slot = Some(SectorRecord {
                        driver: completion.driver,
                        time,
                        lap: completion.lap,
                        is_new: true,
                    });
                }
            }
        }
    }

    fn detect_overtakes(&self, ranked: &[RankedDriver], replay_t: f64) -> Vec<PositionChange> {
        let mut changes = Vec::new();
        for driver in ranked {
            let Some(&prev) = self.prev_positions.get(&driver.code) else {
                continue;
            };
            if driver.position >= prev {
                continue;
            }
            // The car gained places; the one passed now sits directly
            // behind and lost places in the same step.
            let passed = ranked
                .iter()
                .find(|other| {
                    other.position == driver.position + 1
                        && self
                            .prev_positions
                            .get(&other.code)
                            .is_some_and(|&p| p < other.position)
                })
                .map(|other| other.code.clone());

            changes.push(PositionChange {
                driver: driver.code.clone(),
                from_pos: prev,
                to_pos: driver.position,
                passed,
                t: replay_t,
            });
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LapTiming;

    fn driver_with_timing(code: &str, timing: Vec<LapTiming>) -> DriverInput {
        DriverInput {
            code: code.to_string(),
            name: None,
            team: None,
            color: None,
            laps: vec![],
            timing,
            stints: vec![],
        }
    }

    fn rank(entries: &[(&str, u32)]) -> Vec<RankedDriver> {
        entries
            .iter()
            .map(|(code, position)| RankedDriver {
                code: code.to_string(),
                progress: 0.0,
                position: *position,
            })
            .collect()
    }

    #[test]
    fn test_fastest_lap_is_new_exactly_once() {
        let drivers = vec![driver_with_timing(
            "LEC",
            vec![LapTiming {
                lap: 3,
                sector1: None,
                sector2: None,
                sector3: None,
                lap_time: Some(85.2),
                completed_at: Some(5.0),
            }],
        )];
        let mut detector = EventDetector::new(&drivers);

        let before = detector.step(4.0, 4.0, &[]);
        assert!(before.fastest_lap.is_none());

        let at = detector.step(5.0, 5.0, &[]);
        let record = at.fastest_lap.unwrap();
        assert!(record.is_new);
        assert_eq!(record.driver, "LEC");
        assert_eq!(record.lap, 3);

        for t in [6.0, 7.0, 8.0] {
            let after = detector.step(t, t, &[]);
            let record = after.fastest_lap.unwrap();
            assert_eq!(record.driver, "LEC");
            assert!(!record.is_new);
        }
    }

    #[test]
    fn test_fastest_lap_only_strict_improvement_replaces() {
        let drivers = vec![
            driver_with_timing(
                "NOR",
                vec![LapTiming {
                    lap: 2,
                    lap_time: Some(80.0),
                    completed_at: Some(10.0),
                    ..Default::default()
                }],
            ),
            driver_with_timing(
                "SAI",
                vec![
                    LapTiming {
                        lap: 2,
                        lap_time: Some(80.0), // equal: not a new record
                        completed_at: Some(20.0),
                        ..Default::default()
                    },
                    LapTiming {
                        lap: 3,
                        lap_time: Some(79.5),
                        completed_at: Some(30.0),
                        ..Default::default()
                    },
                ],
            ),
        ];
        let mut detector = EventDetector::new(&drivers);

        let first = detector.step(10.0, 10.0, &[]).fastest_lap.unwrap();
        assert_eq!(first.driver, "NOR");
        assert!(first.is_new);

        let equal = detector.step(20.0, 20.0, &[]).fastest_lap.unwrap();
        assert_eq!(equal.driver, "NOR");
        assert!(!equal.is_new);

        let better = detector.step(30.0, 30.0, &[]).fastest_lap.unwrap();
        assert_eq!(better.driver, "SAI");
        assert_eq!(better.time, 79.5);
        assert!(better.is_new);
    }

    #[test]
    fn test_single_overtake_event_on_change_frame_only() {
        let mut detector = EventDetector::new(&[]);

        let start = detector.step(0.0, 0.0, &rank(&[("AAA", 1), ("BBB", 2)]));
        assert!(start.position_changes.is_empty());

        let swap = detector.step(1.0, 1.0, &rank(&[("BBB", 1), ("AAA", 2)]));
        assert_eq!(swap.position_changes.len(), 1);
        let change = &swap.position_changes[0];
        assert_eq!(change.driver, "BBB");
        assert_eq!(change.from_pos, 2);
        assert_eq!(change.to_pos, 1);
        assert_eq!(change.passed.as_deref(), Some("AAA"));
        assert_eq!(change.t, 1.0);

        let hold = detector.step(2.0, 2.0, &rank(&[("BBB", 1), ("AAA", 2)]));
        assert!(hold.position_changes.is_empty());
    }

    #[test]
    fn test_overtake_passed_unresolved_when_gap_closes_by_retirement() {
        let mut detector = EventDetector::new(&[]);
        detector.step(0.0, 0.0, &rank(&[("AAA", 1), ("BBB", 2), ("CCC", 3)]));

        // AAA disappears; everyone moves up without passing anyone on track.
        let events = detector.step(1.0, 1.0, &rank(&[("BBB", 1), ("CCC", 2)]));
        assert_eq!(events.position_changes.len(), 2);
        for change in &events.position_changes {
            assert_eq!(change.passed, None);
        }
    }

    #[test]
    fn test_sector_bests_anchor_backwards_from_lap_completion() {
        // Lap completes at t=100 with s1=25, s2=35, s3=30: sector ends at
        // t=35, t=70, t=100.
        let drivers = vec![driver_with_timing(
            "VER",
            vec![LapTiming {
                lap: 1,
                sector1: Some(25.0),
                sector2: Some(35.0),
                sector3: Some(30.0),
                lap_time: Some(90.0),
                completed_at: Some(100.0),
            }],
        )];
        let mut detector = EventDetector::new(&drivers);

        let early = detector.step(34.0, 34.0, &[]);
        assert!(early.overall_bests.s1.is_none());

        let s1 = detector.step(35.0, 35.0, &[]);
        let record = s1.overall_bests.s1.unwrap();
        assert_eq!(record.time, 25.0);
        assert!(record.is_new);
        assert!(s1.overall_bests.s2.is_none());

        let s2 = detector.step(70.0, 70.0, &[]);
        assert!(!s2.overall_bests.s1.unwrap().is_new);
        assert!(s2.overall_bests.s2.unwrap().is_new);

        let s3 = detector.step(100.0, 100.0, &[]);
        assert!(s3.overall_bests.s3.unwrap().is_new);
        // The lap record lands on the same tick.
        assert!(s3.fastest_lap.unwrap().is_new);
    }

    #[test]
    fn test_sector_best_running_minimum() {
        let drivers = vec![
            driver_with_timing(
                "HAM",
                vec![LapTiming {
                    lap: 1,
                    sector3: Some(31.0),
                    completed_at: Some(10.0),
                    ..Default::default()
                }],
            ),
            driver_with_timing(
                "RUS",
                vec![
                    LapTiming {
                        lap: 1,
                        sector3: Some(32.0), // slower: no change
                        completed_at: Some(20.0),
                        ..Default::default()
                    },
                    LapTiming {
                        lap: 2,
                        sector3: Some(30.4),
                        completed_at: Some(30.0),
                        ..Default::default()
                    },
                ],
            ),
        ];
        let mut detector = EventDetector::new(&drivers);

        let first = detector.step(10.0, 10.0, &[]).overall_bests;
        assert_eq!(first.s3.as_ref().unwrap().driver, "HAM");

        let unchanged = detector.step(20.0, 20.0, &[]).overall_bests;
        assert_eq!(unchanged.s3.as_ref().unwrap().driver, "HAM");
        assert!(!unchanged.s3.unwrap().is_new);

        let improved = detector.step(30.0, 30.0, &[]).overall_bests;
        let record = improved.s3.unwrap();
        assert_eq!(record.driver, "RUS");
        assert_eq!(record.time, 30.4);
        assert!(record.is_new);
    }
}
