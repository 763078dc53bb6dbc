use crate::{Result, TsError};
use bytes::Bytes;

pub const TS_PACKET_SIZE: usize = 188;

pub const SYNC_BYTE: u8 = 0x47;

/// Program association table.
pub const PID_PAT: u16 = 0x0000;

/// Stuffing packets, skipped by the demuxer.
pub const PID_NULL: u16 = 0x1FFF;

const HEADER_LEN: usize = 4;

/// One packet of a segment, as much of it as demuxing needs.
///
/// The payload is a slice of the chunk buffer, so splitting a chunk into packets does
/// not copy.
#[derive(Debug, Clone)]
pub struct TsPacket {
    pub pid: u16,
    /// The sender flagged the packet as damaged.
    pub transport_error: bool,
    /// A PES packet or PSI section begins in this payload.
    pub unit_start: bool,
    pub continuity: u8,
    /// Adaptation field marks a random access point.
    pub random_access: bool,
    pub payload: Option<Bytes>,
}

impl TsPacket {
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() != TS_PACKET_SIZE {
            return Err(TsError::InvalidPacketSize(data.len()));
        }
        if data[0] != SYNC_BYTE {
            return Err(TsError::InvalidSyncByte(data[0]));
        }

        let header = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let has_adaptation = header & 0x20 != 0;
        let has_payload = header & 0x10 != 0;

        let mut payload_start = HEADER_LEN;
        let mut random_access = false;
        if has_adaptation {
            let len = data[HEADER_LEN] as usize;
            payload_start += 1 + len;
            if payload_start > TS_PACKET_SIZE {
                return Err(TsError::InsufficientData {
                    expected: payload_start,
                    actual: TS_PACKET_SIZE,
                });
            }
            random_access = len > 0 && data[HEADER_LEN + 1] & 0x40 != 0;
        }

        Ok(TsPacket {
            pid: ((header >> 8) & 0x1FFF) as u16,
            transport_error: header & 0x0080_0000 != 0,
            unit_start: header & 0x0040_0000 != 0,
            continuity: (header & 0x0F) as u8,
            random_access,
            payload: (has_payload && payload_start < TS_PACKET_SIZE)
                .then(|| data.slice(payload_start..)),
        })
    }

    /// Section bytes of a PSI packet. A unit start carries a pointer field saying how
    /// many bytes to skip before the section.
    pub fn psi_payload(&self) -> Option<Bytes> {
        let payload = self.payload.as_ref()?;
        if !self.unit_start {
            return Some(payload.clone());
        }
        let start = 1 + *payload.first()? as usize;
        (start < payload.len()).then(|| payload.slice(start..))
    }
}
