//! Stateful transport stream demuxer.
//!
//! Turns 188-byte packets into timestamped elementary stream frames. The demuxer is
//! synchronous and single-owner; callers serialize access (the player runs it on a
//! dedicated worker task).

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use media_types::StreamKind;
use tracing::trace;

use crate::adts::{self, AdtsHeader};
use crate::nal::{self, NalFormat};
use crate::packet::{PID_NULL, PID_PAT, TS_PACKET_SIZE, TsPacket};
use crate::pat::Pat;
use crate::pes::{PES_CLOCK_HZ, PartialPes, PesUnit};
use crate::pmt::{Pmt, StreamType};

/// Default number of seconds a frame may lag behind the read position before it is dropped.
pub const DEFAULT_STALE_THRESHOLD: f64 = 2.0;

/// Timing context of one `push`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReadContext {
    /// Playlist start time of the chunk the bytes belong to.
    pub chunk_start: f64,
    /// Playback position the caller is reading from.
    pub read_from: f64,
}

/// Decoder context carried alongside a frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CodecConfig {
    #[default]
    None,
    /// H.264/H.265 parameter sets found in the access unit, without start codes.
    ParameterSets(Vec<Bytes>),
    Adts(AdtsHeader),
}

/// One demuxed elementary stream sample.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pid: u16,
    pub stream_type: StreamType,
    pub kind: StreamKind,
    /// Presentation time in seconds on the playlist timeline.
    pub pts: f64,
    /// Decode time in seconds on the playlist timeline.
    pub dts: f64,
    pub duration: f64,
    pub is_sync: bool,
    /// Annex-B access unit for video, raw ADTS frames for audio.
    pub data: Bytes,
    pub codec_config: CodecConfig,
}

/// Counters describing what the demuxer did with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub packets: u64,
    pub invalid_packets: u64,
    pub frames: u64,
    pub dropped_stale: u64,
    pub dropped_unsynced: u64,
}

/// Split a buffer into slices of at most `packets_per_batch` whole packets.
///
/// A trailing partial packet is discarded.
pub fn split_batches(data: Bytes, packets_per_batch: usize) -> Vec<Bytes> {
    let batch_len = packets_per_batch.max(1) * TS_PACKET_SIZE;
    let usable = data.len() - data.len() % TS_PACKET_SIZE;
    (0..usable)
        .step_by(batch_len)
        .map(|start| data.slice(start..(start + batch_len).min(usable)))
        .collect()
}

#[derive(Debug)]
pub struct Demuxer {
    stale_threshold: f64,
    /// PMT PID -> program number
    programs: HashMap<u16, u16>,
    /// program number -> program map
    program_maps: HashMap<u16, Pmt>,
    /// elementary PID -> stream type
    streams: HashMap<u16, StreamType>,
    pending: HashMap<u16, PartialPes>,
    previous_pts: HashMap<u16, f64>,
    needs_sync: bool,
    pending_video_sync: Option<f64>,
    time_offset: Option<f64>,
    stats: DemuxStats,
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_THRESHOLD)
    }
}

impl Demuxer {
    pub fn new(stale_threshold: f64) -> Self {
        Self {
            stale_threshold,
            programs: HashMap::new(),
            program_maps: HashMap::new(),
            streams: HashMap::new(),
            pending: HashMap::new(),
            previous_pts: HashMap::new(),
            needs_sync: true,
            pending_video_sync: None,
            time_offset: None,
            stats: DemuxStats::default(),
        }
    }

    /// Drop all parser state. The next video frame emitted will be a sync frame.
    pub fn reset(&mut self) {
        self.programs.clear();
        self.program_maps.clear();
        self.streams.clear();
        self.pending.clear();
        self.previous_pts.clear();
        self.needs_sync = true;
        self.pending_video_sync = None;
        self.time_offset = None;
    }

    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// True until a video sync frame has been emitted since the last reset.
    pub fn needs_sync(&self) -> bool {
        self.needs_sync
    }

    /// Registered elementary streams.
    pub fn streams(&self) -> impl Iterator<Item = (u16, StreamType)> + '_ {
        self.streams.iter().map(|(pid, ty)| (*pid, *ty))
    }

    /// Demux whole packets from `data`, returning the frames that pass the gates.
    pub fn push(&mut self, data: &Bytes, ctx: ReadContext) -> Vec<Frame> {
        let mut frames = Vec::new();
        let count = data.len() / TS_PACKET_SIZE;
        for i in 0..count {
            let raw = data.slice(i * TS_PACKET_SIZE..(i + 1) * TS_PACKET_SIZE);
            self.stats.packets += 1;
            let packet = match TsPacket::parse(raw) {
                Ok(packet) => packet,
                Err(e) => {
                    self.stats.invalid_packets += 1;
                    trace!(error = %e, index = i, "Skipping invalid packet");
                    continue;
                }
            };
            self.handle_packet(packet, ctx, &mut frames);
        }
        frames
    }

    /// Complete every partially assembled PES, e.g. at the end of the last chunk.
    pub fn flush(&mut self, ctx: ReadContext) -> Vec<Frame> {
        let mut pids: Vec<u16> = self.pending.keys().copied().collect();
        pids.sort_unstable();
        pids.into_iter()
            .filter_map(|pid| {
                let pes = self.pending.remove(&pid)?;
                self.complete(pid, pes, ctx)
            })
            .collect()
    }

    fn handle_packet(&mut self, packet: TsPacket, ctx: ReadContext, out: &mut Vec<Frame>) {
        if packet.transport_error || packet.pid == PID_NULL {
            return;
        }

        if packet.pid == PID_PAT {
            self.handle_pat(&packet);
            return;
        }

        if let Some(&program_number) = self.programs.get(&packet.pid) {
            self.handle_pmt(&packet, program_number);
            return;
        }

        if !self.streams.contains_key(&packet.pid) {
            trace!(pid = packet.pid, "Skipping packet of unregistered PID");
            return;
        }

        let pid = packet.pid;
        let Some(payload) = packet.payload else {
            return;
        };
        if packet.unit_start {
            if let Some(previous) = self.pending.insert(pid, PartialPes::start(&payload)) {
                out.extend(self.complete(pid, previous, ctx));
            }
        } else if let Some(pes) = self.pending.get_mut(&pid) {
            pes.append(&payload);
        } else {
            trace!(pid, "Skipping continuation without unit start");
            return;
        }

        if self.pending.get(&pid).is_some_and(PartialPes::is_complete)
            && let Some(pes) = self.pending.remove(&pid)
        {
            out.extend(self.complete(pid, pes, ctx));
        }
    }

    fn handle_pat(&mut self, packet: &TsPacket) {
        let Some(section) = packet.psi_payload() else {
            return;
        };
        match Pat::parse(&section) {
            Ok(pat) => {
                self.programs = pat.pmt_pids().collect();
            }
            Err(e) => trace!(error = %e, "Skipping malformed PAT"),
        }
    }

    fn handle_pmt(&mut self, packet: &TsPacket, program_number: u16) {
        let Some(section) = packet.psi_payload() else {
            return;
        };
        match Pmt::parse(&section) {
            Ok(pmt) => {
                for stream in &pmt.streams {
                    if stream.stream_type.kind().is_some() {
                        self.streams.insert(stream.elementary_pid, stream.stream_type);
                    } else {
                        trace!(
                            pid = stream.elementary_pid,
                            stream_type = stream.stream_type.as_u8(),
                            "Ignoring unsupported elementary stream"
                        );
                    }
                }
                self.program_maps.insert(program_number, pmt);
            }
            Err(e) => trace!(error = %e, program_number, "Skipping malformed PMT"),
        }
    }

    fn complete(&mut self, pid: u16, pes: PartialPes, ctx: ReadContext) -> Option<Frame> {
        let stream_type = *self.streams.get(&pid)?;
        let unit = match pes.finish() {
            Ok(unit) => unit,
            Err(e) => {
                trace!(pid, error = %e, "Dropping incomplete PES");
                return None;
            }
        };
        let frame = self.build_frame(pid, stream_type, unit, ctx)?;
        self.gate(frame, ctx)
    }

    fn build_frame(
        &mut self,
        pid: u16,
        stream_type: StreamType,
        unit: PesUnit,
        ctx: ReadContext,
    ) -> Option<Frame> {
        let kind = stream_type.kind()?;
        let Some(raw_pts) = unit.header.pts_seconds().or(unit.header.dts_seconds()) else {
            trace!(pid, "Dropping PES without timestamps");
            return None;
        };
        let raw_dts = unit.header.dts_seconds().unwrap_or(raw_pts);

        let (data, is_sync, codec_config, default_duration) = match stream_type {
            StreamType::H264 => extract_access_unit(NalFormat::Avc, &unit.payload),
            StreamType::H265 => extract_access_unit(NalFormat::Hevc, &unit.payload),
            StreamType::AdtsAac => {
                let header = AdtsHeader::parse(&unit.payload).ok();
                let frames = adts::count_frames(&unit.payload) as f64;
                let duration = header.map_or(0.0, |h| h.frame_duration() * frames);
                let config = header.map_or(CodecConfig::None, CodecConfig::Adts);
                (unit.payload, true, config, duration)
            }
            StreamType::Other(_) => return None,
        };

        let duration = match self.previous_pts.insert(pid, raw_pts) {
            Some(previous) if raw_pts > previous => raw_pts - previous,
            _ => default_duration,
        };

        let offset = *self.time_offset.get_or_insert(ctx.chunk_start - raw_pts);
        self.stats.frames += 1;

        Some(Frame {
            pid,
            stream_type,
            kind,
            pts: raw_pts + offset,
            dts: raw_dts + offset,
            duration,
            is_sync,
            data,
            codec_config,
        })
    }

    /// Stale-data and sync gating.
    fn gate(&mut self, frame: Frame, ctx: ReadContext) -> Option<Frame> {
        if frame.pts < ctx.read_from - self.stale_threshold {
            self.stats.dropped_stale += 1;
            trace!(pid = frame.pid, pts = frame.pts, read_from = ctx.read_from, "Dropping stale frame");
            return None;
        }

        let pass = match frame.kind {
            StreamKind::Video => {
                if self.needs_sync && frame.is_sync {
                    self.pending_video_sync = Some(frame.pts);
                    self.needs_sync = false;
                    true
                } else {
                    !self.needs_sync
                }
            }
            StreamKind::Audio => match self.pending_video_sync {
                Some(sync_pts) if frame.pts >= sync_pts => {
                    self.pending_video_sync = None;
                    true
                }
                Some(_) => false,
                None => !self.needs_sync,
            },
        };

        if pass {
            Some(frame)
        } else {
            self.stats.dropped_unsynced += 1;
            None
        }
    }
}

/// Pull VCL units and parameter sets out of an Annex-B PES payload.
///
/// Returns the access unit (VCL units re-prefixed with start codes, or the raw payload
/// when none are found), the sync flag, the codec context and a zero default duration.
fn extract_access_unit(format: NalFormat, payload: &Bytes) -> (Bytes, bool, CodecConfig, f64) {
    let units = nal::split_units(format, payload);

    let is_sync = match format {
        NalFormat::Avc => units.iter().any(|u| u.unit_type == nal::avc::IDR),
        NalFormat::Hevc => units.iter().any(|u| format.is_parameter_set(u.unit_type)),
    };

    let parameter_sets: Vec<Bytes> = units
        .iter()
        .filter(|u| format.is_parameter_set(u.unit_type))
        .map(|u| u.data.clone())
        .collect();

    let vcl: Vec<&nal::NalUnit> = units.iter().filter(|u| format.is_vcl(u.unit_type)).collect();
    let data = if vcl.is_empty() {
        payload.clone()
    } else {
        let len = vcl.iter().map(|u| u.data.len() + nal::START_CODE.len()).sum();
        let mut out = BytesMut::with_capacity(len);
        for unit in vcl {
            out.put_slice(&nal::START_CODE);
            out.put_slice(&unit.data);
        }
        out.freeze()
    };

    let config = if parameter_sets.is_empty() {
        CodecConfig::None
    } else {
        CodecConfig::ParameterSets(parameter_sets)
    };
    (data, is_sync, config, 0.0)
}
