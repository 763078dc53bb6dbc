//! ADTS (Audio Data Transport Stream) header parsing for AAC audio.

use crate::{Result, TsError};

/// PCM samples per AAC frame.
pub const SAMPLES_PER_FRAME: u32 = 1024;

const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Fixed and variable ADTS header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// Audio object type (profile + 1)
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub sample_rate: u32,
    pub channel_configuration: u8,
    /// Frame length including the header
    pub frame_length: usize,
    pub header_length: usize,
}

impl AdtsHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 7 {
            return Err(TsError::InsufficientData {
                expected: 7,
                actual: data.len(),
            });
        }
        if data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return Err(TsError::InvalidAdtsHeader("missing syncword"));
        }
        let protection_absent = data[1] & 0x01 != 0;
        let object_type = ((data[2] >> 6) & 0x03) + 1;
        let sampling_frequency_index = (data[2] >> 2) & 0x0F;
        let sample_rate = *SAMPLE_RATES
            .get(sampling_frequency_index as usize)
            .ok_or(TsError::InvalidAdtsHeader("reserved sampling frequency"))?;
        let channel_configuration = ((data[2] & 0x01) << 2) | ((data[3] >> 6) & 0x03);
        let frame_length = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] >> 5) as usize);
        let header_length = if protection_absent { 7 } else { 9 };
        if frame_length < header_length {
            return Err(TsError::InvalidAdtsHeader("frame shorter than header"));
        }

        Ok(Self {
            object_type,
            sampling_frequency_index,
            sample_rate,
            channel_configuration,
            frame_length,
            header_length,
        })
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration(&self) -> f64 {
        SAMPLES_PER_FRAME as f64 / self.sample_rate as f64
    }

    /// Two-byte AudioSpecificConfig decoders expect as codec context.
    pub fn audio_specific_config(&self) -> [u8; 2] {
        [
            (self.object_type << 3) | (self.sampling_frequency_index >> 1),
            ((self.sampling_frequency_index & 0x01) << 7) | (self.channel_configuration << 3),
        ]
    }
}

/// Count the ADTS frames in a PES payload, stopping at the first malformed header.
pub fn count_frames(mut data: &[u8]) -> usize {
    let mut count = 0;
    while let Ok(header) = AdtsHeader::parse(data) {
        if header.frame_length > data.len() {
            break;
        }
        count += 1;
        data = &data[header.frame_length..];
    }
    count
}

/// Build a 7-byte ADTS header (no CRC) for a frame carrying `payload_len` bytes.
pub fn encode_header(object_type: u8, frequency_index: u8, channels: u8, payload_len: usize) -> [u8; 7] {
    let frame_length = payload_len + 7;
    [
        0xFF,
        0xF1,
        ((object_type - 1) << 6) | (frequency_index << 2) | ((channels >> 2) & 0x01),
        ((channels & 0x03) << 6) | ((frame_length >> 11) as u8 & 0x03),
        (frame_length >> 3) as u8,
        ((frame_length as u8 & 0x07) << 5) | 0x1F,
        0xFC,
    ]
}
