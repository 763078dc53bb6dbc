//! Synthetic transport stream writer for tests and benchmarks.

use std::collections::HashMap;

use bytes::Bytes;

use crate::adts;
use crate::packet::TS_PACKET_SIZE;
use crate::pes::encode_timestamp;
use crate::pmt::StreamType;

pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x0100;
pub const AUDIO_PID: u16 = 0x0101;

/// Writes PAT/PMT sections and PES-packetized frames as 188-byte packets.
#[derive(Debug)]
pub struct TsWriter {
    video_type: StreamType,
    continuity: HashMap<u16, u8>,
    key_payload_len: usize,
}

impl Default for TsWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl TsWriter {
    pub fn new() -> Self {
        Self {
            video_type: StreamType::H264,
            continuity: HashMap::new(),
            key_payload_len: 400,
        }
    }

    pub fn with_video_type(mut self, video_type: StreamType) -> Self {
        self.video_type = video_type;
        self
    }

    /// Size of the IDR slice body written for keyframes.
    pub fn with_keyframe_size(mut self, len: usize) -> Self {
        self.key_payload_len = len;
        self
    }

    /// PAT followed by a PMT declaring one video and one AAC stream.
    pub fn psi(&mut self) -> Vec<u8> {
        let mut pat = vec![0x00, 0xB0, 13, 0x00, 0x01, 0xC1, 0x00, 0x00];
        pat.extend_from_slice(&1u16.to_be_bytes());
        pat.extend_from_slice(&[0xE0 | (PMT_PID >> 8) as u8, PMT_PID as u8]);
        pat.extend_from_slice(&[0; 4]);

        let mut pmt = vec![
            0x02,
            0xB0,
            23,
            0x00,
            0x01,
            0xC1,
            0x00,
            0x00,
            0xE0 | (VIDEO_PID >> 8) as u8,
            VIDEO_PID as u8,
            0xF0,
            0x00,
        ];
        for (ty, pid) in [(self.video_type, VIDEO_PID), (StreamType::AdtsAac, AUDIO_PID)] {
            pmt.push(ty.as_u8());
            pmt.extend_from_slice(&[0xE0 | (pid >> 8) as u8, pid as u8, 0xF0, 0x00]);
        }
        pmt.extend_from_slice(&[0; 4]);

        let mut out = self.section(0x0000, &pat);
        out.extend(self.section(PMT_PID, &pmt));
        out
    }

    /// One video access unit. Keyframes carry parameter sets and an IDR slice.
    pub fn video_frame(&mut self, pts: u64, keyframe: bool) -> Vec<u8> {
        let mut es = Vec::new();
        let filler = |len: usize| std::iter::repeat_n(0xAB, len);
        match (self.video_type, keyframe) {
            (StreamType::H265, true) => {
                for header in [[0x40, 0x01], [0x42, 0x01], [0x44, 0x01]] {
                    es.extend_from_slice(&[0, 0, 0, 1]);
                    es.extend_from_slice(&header);
                    es.extend(filler(8));
                }
                es.extend_from_slice(&[0, 0, 0, 1, 0x26, 0x01]);
                es.extend(filler(self.key_payload_len));
            }
            (StreamType::H265, false) => {
                es.extend_from_slice(&[0, 0, 0, 1, 0x02, 0x01]);
                es.extend(filler(120));
            }
            (_, true) => {
                es.extend_from_slice(&[0, 0, 0, 1, 0x09, 0xF0]);
                es.extend_from_slice(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1E]);
                es.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80]);
                es.extend_from_slice(&[0, 0, 0, 1, 0x65, 0x88]);
                es.extend(filler(self.key_payload_len));
            }
            (_, false) => {
                es.extend_from_slice(&[0, 0, 0, 1, 0x09, 0xF0]);
                es.extend_from_slice(&[0, 0, 0, 1, 0x41, 0x9A]);
                es.extend(filler(120));
            }
        }
        self.pes(VIDEO_PID, 0xE0, pts, false, &es)
    }

    /// One AAC-LC 44.1 kHz stereo ADTS frame.
    pub fn audio_frame(&mut self, pts: u64) -> Vec<u8> {
        let mut es = adts::encode_header(2, 4, 2, 32).to_vec();
        es.extend(std::iter::repeat_n(0x5A, 32));
        self.pes(AUDIO_PID, 0xC0, pts, true, &es)
    }

    /// A segment of `frames` video frames at 30 fps, with two audio frames after
    /// each video frame. Every `gop`-th frame is a keyframe.
    pub fn segment(&mut self, start_pts: u64, frames: usize, gop: usize) -> Bytes {
        let mut out = self.psi();
        for i in 0..frames {
            let pts = start_pts + i as u64 * 3000;
            out.extend(self.video_frame(pts, i % gop.max(1) == 0));
            out.extend(self.audio_frame(pts));
            out.extend(self.audio_frame(pts + 1500));
        }
        Bytes::from(out)
    }

    fn pes(&mut self, pid: u16, stream_id: u8, pts: u64, bounded: bool, es: &[u8]) -> Vec<u8> {
        let mut pes = vec![0x00, 0x00, 0x01, stream_id];
        let length = if bounded { 3 + 5 + es.len() } else { 0 };
        pes.extend_from_slice(&(length as u16).to_be_bytes());
        pes.extend_from_slice(&[0x80, 0x80, 0x05]);
        pes.extend_from_slice(&encode_timestamp(0b0010, pts));
        pes.extend_from_slice(es);
        self.packetize(pid, &pes)
    }

    fn section(&mut self, pid: u16, section: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x00];
        payload.extend_from_slice(section);
        self.packetize(pid, &payload)
    }

    fn packetize(&mut self, pid: u16, mut data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut first = true;
        while !data.is_empty() {
            let cc = self.continuity.entry(pid).or_insert(0);
            let take = data.len().min(184);
            let mut packet = Vec::with_capacity(TS_PACKET_SIZE);
            packet.push(0x47);
            packet.push((if first { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F));
            packet.push(pid as u8);
            if take == 184 {
                packet.push(0x10 | *cc);
            } else {
                // Stuff through the adaptation field so the payload ends exactly.
                packet.push(0x30 | *cc);
                let adaptation_len = 183 - take;
                packet.push(adaptation_len as u8);
                if adaptation_len > 0 {
                    packet.push(0x00);
                    packet.extend(std::iter::repeat_n(0xFF, adaptation_len - 1));
                }
            }
            packet.extend_from_slice(&data[..take]);
            debug_assert_eq!(packet.len(), TS_PACKET_SIZE);
            out.extend(packet);
            *cc = (*cc + 1) & 0x0F;
            data = &data[take..];
            first = false;
        }
        out
    }
}
