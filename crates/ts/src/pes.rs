use bytes::{Bytes, BytesMut};

use crate::{Result, TsError};

/// PES clock frequency.
pub const PES_CLOCK_HZ: f64 = 90_000.0;

/// Mask of the 33-bit PTS/DTS field.
pub const TIMESTAMP_MASK: u64 = 0x1_FFFF_FFFF;

/// Parse a 33-bit PTS or DTS timestamp from 5 bytes.
///
/// Layout: `[marker(4) | ts32..30 | 1 | ts29..15 | 1 | ts14..0 | 1]`
fn parse_timestamp(data: &[u8]) -> u64 {
    (((data[0] as u64 >> 1) & 0x07) << 30)
        | ((data[1] as u64) << 22)
        | (((data[2] as u64 >> 1) & 0x7F) << 15)
        | ((data[3] as u64) << 7)
        | ((data[4] as u64 >> 1) & 0x7F)
}

/// Encode a 33-bit timestamp with the given 4-bit prefix (`0b0010` PTS only,
/// `0b0011` PTS followed by DTS, `0b0001` DTS).
pub fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    let ts = ts & TIMESTAMP_MASK;
    [
        (prefix << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 0x01,
        (ts >> 22) as u8,
        (((ts >> 15) as u8 & 0x7F) << 1) | 0x01,
        (ts >> 7) as u8,
        ((ts as u8 & 0x7F) << 1) | 0x01,
    ]
}

/// Check if a stream_id has an optional PES header (PTS/DTS fields).
fn has_optional_pes_header(stream_id: u8) -> bool {
    // ISO 13818-1 Table 2-18
    !matches!(
        stream_id,
        0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xFF | 0xF2 | 0xF8
    )
}

/// Parsed PES header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// Zero means unbounded (common for video).
    pub pes_packet_length: u16,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Offset to elementary stream data (past the PES header)
    pub payload_offset: usize,
}

impl PesHeader {
    /// Parse PES header from a byte slice starting with the PES start code (0x000001).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 6 {
            return Err(TsError::InsufficientData {
                expected: 6,
                actual: data.len(),
            });
        }
        if data[..3] != [0x00, 0x00, 0x01] {
            return Err(TsError::InvalidPesStartCode);
        }

        let stream_id = data[3];
        let pes_packet_length = u16::from_be_bytes([data[4], data[5]]);

        if !has_optional_pes_header(stream_id) {
            return Ok(PesHeader {
                stream_id,
                pes_packet_length,
                pts: None,
                dts: None,
                payload_offset: 6,
            });
        }

        if data.len() < 9 {
            return Err(TsError::InsufficientData {
                expected: 9,
                actual: data.len(),
            });
        }

        let pts_dts_flags = (data[7] >> 6) & 0x03;
        let header_end = 9 + data[8] as usize;
        let needed = match pts_dts_flags {
            0b00 => 9,
            0b10 => 14,
            0b11 => 19,
            flags => return Err(TsError::InvalidPtsDtsFlags(flags)),
        };
        if data.len() < needed.max(header_end) {
            return Err(TsError::InsufficientData {
                expected: needed.max(header_end),
                actual: data.len(),
            });
        }

        let pts = (pts_dts_flags & 0b10 != 0).then(|| parse_timestamp(&data[9..14]));
        let dts = (pts_dts_flags == 0b11).then(|| parse_timestamp(&data[14..19]));

        Ok(PesHeader {
            stream_id,
            pes_packet_length,
            pts,
            dts,
            payload_offset: header_end,
        })
    }

    /// Convert PTS to seconds.
    pub fn pts_seconds(&self) -> Option<f64> {
        self.pts.map(|pts| pts as f64 / PES_CLOCK_HZ)
    }

    /// Convert DTS to seconds.
    pub fn dts_seconds(&self) -> Option<f64> {
        self.dts.map(|dts| dts as f64 / PES_CLOCK_HZ)
    }
}

/// A fully assembled PES packet.
#[derive(Debug, Clone)]
pub struct PesUnit {
    pub header: PesHeader,
    /// Elementary stream bytes following the header.
    pub payload: Bytes,
}

/// A PES packet being reassembled from consecutive TS payloads of one PID.
#[derive(Debug, Default)]
pub struct PartialPes {
    data: BytesMut,
}

impl PartialPes {
    /// Start assembling from the payload of a unit-start packet.
    pub fn start(payload: &[u8]) -> Self {
        let mut data = BytesMut::with_capacity(payload.len().max(4096));
        data.extend_from_slice(payload);
        Self { data }
    }

    pub fn append(&mut self, payload: &[u8]) {
        self.data.extend_from_slice(payload);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True once a bounded PES has received all of its declared bytes.
    pub fn is_complete(&self) -> bool {
        if self.data.len() < 6 {
            return false;
        }
        let declared = u16::from_be_bytes([self.data[4], self.data[5]]) as usize;
        declared != 0 && self.data.len() >= 6 + declared
    }

    /// Parse the header and split off the elementary stream payload.
    pub fn finish(self) -> Result<PesUnit> {
        let data = self.data.freeze();
        let header = PesHeader::parse(&data)?;
        let end = if header.pes_packet_length == 0 {
            data.len()
        } else {
            (6 + header.pes_packet_length as usize).min(data.len())
        };
        let payload = if header.payload_offset <= end {
            data.slice(header.payload_offset..end)
        } else {
            Bytes::new()
        };
        Ok(PesUnit { header, payload })
    }
}
