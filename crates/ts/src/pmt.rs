use media_types::StreamKind;

use crate::{Result, TsError};

/// Elementary stream types the demuxer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// ISO/IEC 13818-7 ADTS AAC
    AdtsAac,
    /// ITU-T H.264
    H264,
    /// ITU-T H.265
    H265,
    Other(u8),
}

impl StreamType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x0F => StreamType::AdtsAac,
            0x1B => StreamType::H264,
            0x24 => StreamType::H265,
            other => StreamType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            StreamType::AdtsAac => 0x0F,
            StreamType::H264 => 0x1B,
            StreamType::H265 => 0x24,
            StreamType::Other(v) => v,
        }
    }

    /// Media kind carried by this stream type, `None` for unsupported types.
    pub fn kind(self) -> Option<StreamKind> {
        match self {
            StreamType::AdtsAac => Some(StreamKind::Audio),
            StreamType::H264 | StreamType::H265 => Some(StreamKind::Video),
            StreamType::Other(_) => None,
        }
    }
}

/// One elementary stream declared in a program map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: StreamType,
    pub elementary_pid: u16,
}

/// Program Map Table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub program_number: u16,
    pub version_number: u8,
    pub pcr_pid: u16,
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    /// Parse a PMT from PSI section data (pointer field already removed).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(TsError::InsufficientData {
                expected: 12,
                actual: data.len(),
            });
        }
        let table_id = data[0];
        if table_id != 0x02 {
            return Err(TsError::InvalidTableId {
                expected: 0x02,
                actual: table_id,
            });
        }
        let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;
        if section_length < 13 {
            return Err(TsError::InvalidSectionLength(section_length));
        }
        let section_end = 3 + section_length as usize;
        if data.len() < section_end {
            return Err(TsError::InsufficientData {
                expected: section_end,
                actual: data.len(),
            });
        }

        let program_number = u16::from_be_bytes([data[3], data[4]]);
        let version_number = (data[5] >> 1) & 0x1F;
        let pcr_pid = ((data[8] as u16 & 0x1F) << 8) | data[9] as u16;
        let program_info_length = ((data[10] as usize & 0x0F) << 8) | data[11] as usize;

        let streams_end = section_end - 4;
        let mut offset = 12 + program_info_length;
        let mut streams = Vec::new();
        while offset + 5 <= streams_end {
            let stream_type = StreamType::from_u8(data[offset]);
            let elementary_pid = ((data[offset + 1] as u16 & 0x1F) << 8) | data[offset + 2] as u16;
            let es_info_length =
                ((data[offset + 3] as usize & 0x0F) << 8) | data[offset + 4] as usize;
            streams.push(PmtStream {
                stream_type,
                elementary_pid,
            });
            offset += 5 + es_info_length;
        }

        Ok(Pmt {
            program_number,
            version_number,
            pcr_pid,
            streams,
        })
    }
}
