//! Chunked wire format
//!
//! Frames are shipped to clients in fixed-size chunks of compact,
//! delta-coded JSON. Per-driver state uses short keys and is carried in
//! full on every frame (it changes every tick anyway); session-level
//! context (weather, track status, fastest lap, overall bests) appears
//! only when it differs from the previous frame, with the first frame of
//! each chunk carrying a complete snapshot so chunks decode
//! independently. Decoding reproduces the original frames exactly.

use crate::builder::{ReplayBundle, ReplayMeta};
use crate::events::{FastestLap, OverallBests, PositionChange};
use crate::frame::{ActiveMessage, DriverFrameState, Frame, SectorTimes};
use crate::model::{Compound, TrackStatus, WeatherSample};
use crate::progress::Retirement;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Frames per chunk unless the caller asks otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Chunk-level decode failures.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk {chunk} entry frame is missing its context snapshot")]
    MissingEntryState { chunk: usize },
}

/// Per-driver state with short wire keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactDriver {
    pub x: f64,
    pub y: f64,
    /// Speed, km/h.
    pub s: f64,
    /// Gear.
    pub g: i8,
    /// DRS status code.
    pub d: u8,
    /// Throttle, 0-100.
    pub t: f64,
    /// Brake, 0-100.
    pub b: f64,
    /// Lap number.
    pub l: u32,
    /// Position.
    pub p: u32,
    /// Race progress in meters.
    pub pr: f64,
    /// Lap distance in meters.
    pub di: f64,
    /// Compound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cp: Option<Compound>,
    /// Stint number, 0 when unknown.
    #[serde(default, skip_serializing_if = "u32_is_zero")]
    pub st: u32,
    /// Tyre age in laps.
    #[serde(default, skip_serializing_if = "u32_is_zero")]
    pub ta: u32,
    /// Pit stop count.
    #[serde(default, skip_serializing_if = "u32_is_zero")]
    pub pi: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<f64>,
    /// Last completed lap time, seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,
}

fn u32_is_zero(v: &u32) -> bool {
    *v == 0
}

impl From<&DriverFrameState> for CompactDriver {
    fn from(d: &DriverFrameState) -> Self {
        Self {
            x: d.x,
            y: d.y,
            s: d.speed,
            g: d.gear,
            d: d.drs,
            t: d.throttle,
            b: d.brake,
            l: d.lap,
            p: d.position,
            pr: d.progress,
            di: d.distance,
            cp: d.compound,
            st: d.stint,
            ta: d.tyre_age,
            pi: d.pit_count,
            s1: d.sector_times.s1,
            s2: d.sector_times.s2,
            s3: d.sector_times.s3,
            lt: d.lap_time,
        }
    }
}

impl From<CompactDriver> for DriverFrameState {
    fn from(c: CompactDriver) -> Self {
        Self {
            x: c.x,
            y: c.y,
            speed: c.s,
            gear: c.g,
            drs: c.d,
            throttle: c.t,
            brake: c.b,
            lap: c.l,
            progress: c.pr,
            position: c.p,
            distance: c.di,
            compound: c.cp,
            sector_times: SectorTimes {
                s1: c.s1,
                s2: c.s2,
                s3: c.s3,
            },
            lap_time: c.lt,
            stint: c.st,
            tyre_age: c.ta,
            pit_count: c.pi,
        }
    }
}

/// One frame on the wire. Session-level fields are present only when they
/// changed since the previous frame; weather and fastest-lap presence is
/// monotone over a replay, so an absent field always means "carry the
/// previous value".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactFrame {
    /// Replay time, seconds.
    pub t: f64,
    /// Driver states keyed by code.
    pub dr: BTreeMap<String, CompactDriver>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<WeatherSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<TrackStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fl: Option<FastestLap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ob: Option<OverallBests>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pc: Vec<PositionChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rm: Vec<ActiveMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rt: Vec<Retirement>,
}

/// A contiguous run of frames, decodable on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayChunk {
    pub index: usize,
    pub frames: Vec<CompactFrame>,
}

/// What a client needs before fetching chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub key: String,
    pub meta: ReplayMeta,
    pub frame_count: usize,
    pub chunk_size: usize,
    pub chunk_count: usize,
}

/// Describe a bundle for clients fetching it chunk by chunk.
pub fn manifest_for(bundle: &ReplayBundle, chunk_size: usize) -> Manifest {
    let chunk_size = chunk_size.max(1);
    let frame_count = bundle.frames.len();
    Manifest {
        key: bundle.key(),
        meta: bundle.meta.clone(),
        frame_count,
        chunk_size,
        chunk_count: frame_count.div_ceil(chunk_size),
    }
}

/// Split frames into delta-coded chunks. The previous-frame reference
/// resets at each chunk boundary so every chunk opens with a snapshot.
pub fn encode_chunks(frames: &[Frame], chunk_size: usize) -> Vec<ReplayChunk> {
    let chunk_size = chunk_size.max(1);
    frames
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, run)| {
            let mut prev: Option<&Frame> = None;
            let frames = run
                .iter()
                .map(|frame| {
                    let compact = encode_frame(frame, prev);
                    prev = Some(frame);
                    compact
                })
                .collect();
            ReplayChunk { index, frames }
        })
        .collect()
}

fn encode_frame(frame: &Frame, prev: Option<&Frame>) -> CompactFrame {
    let changed_weather = prev.is_none_or(|p| p.weather != frame.weather);
    let changed_status = prev.is_none_or(|p| p.track_status != frame.track_status);
    let changed_fastest = prev.is_none_or(|p| p.fastest_lap != frame.fastest_lap);
    let changed_bests = prev.is_none_or(|p| p.overall_bests != frame.overall_bests);

    CompactFrame {
        t: frame.t,
        dr: frame
            .drivers
            .iter()
            .map(|(code, state)| (code.clone(), CompactDriver::from(state)))
            .collect(),
        w: if changed_weather { frame.weather } else { None },
        ts: changed_status.then_some(frame.track_status),
        fl: if changed_fastest {
            frame.fastest_lap.clone()
        } else {
            None
        },
        ob: changed_bests.then(|| frame.overall_bests.clone()),
        pc: frame.position_changes.clone(),
        rm: frame.race_messages.clone(),
        rt: frame.retirements.clone(),
    }
}

/// Expand one chunk back into full frames.
pub fn decode_chunk(chunk: ReplayChunk) -> Result<Vec<Frame>, ChunkError> {
    let ReplayChunk { index, frames } = chunk;
    match frames.first() {
        None => return Ok(Vec::new()),
        Some(first) if first.ts.is_none() || first.ob.is_none() => {
            return Err(ChunkError::MissingEntryState { chunk: index });
        }
        Some(_) => {}
    }

    let mut weather: Option<WeatherSample> = None;
    let mut track_status = TrackStatus::default();
    let mut fastest_lap: Option<FastestLap> = None;
    let mut overall_bests = OverallBests::default();

    let mut out = Vec::with_capacity(frames.len());
    for cf in frames {
        if let Some(w) = cf.w {
            weather = Some(w);
        }
        if let Some(ts) = cf.ts {
            track_status = ts;
        }
        if let Some(fl) = cf.fl {
            fastest_lap = Some(fl);
        }
        if let Some(ob) = cf.ob {
            overall_bests = ob;
        }
        out.push(Frame {
            t: cf.t,
            drivers: cf
                .dr
                .into_iter()
                .map(|(code, state)| (code, state.into()))
                .collect(),
            weather,
            track_status,
            race_messages: cf.rm,
            fastest_lap: fastest_lap.clone(),
            position_changes: cf.pc,
            overall_bests: overall_bests.clone(),
            retirements: cf.rt,
        });
    }
    Ok(out)
}
