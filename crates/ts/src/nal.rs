//! Annex-B NAL unit scanning for H.264 and H.265 elementary streams.

use bytes::Bytes;
use memchr::memmem;

/// Four-byte Annex-B start code prepended to emitted access units.
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

pub mod avc {
    pub const SLICE: u8 = 1;
    pub const IDR: u8 = 5;
    pub const SEI: u8 = 6;
    pub const SPS: u8 = 7;
    pub const PPS: u8 = 8;
    pub const AUD: u8 = 9;
}

pub mod hevc {
    pub const IDR_W_RADL: u8 = 19;
    pub const IDR_N_LP: u8 = 20;
    pub const CRA: u8 = 21;
    pub const VPS: u8 = 32;
    pub const SPS: u8 = 33;
    pub const PPS: u8 = 34;
    pub const AUD: u8 = 35;
}

/// Video codec family of an Annex-B stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalFormat {
    Avc,
    Hevc,
}

impl NalFormat {
    /// Unit type from the first header byte.
    #[inline]
    pub fn unit_type(self, header: u8) -> u8 {
        match self {
            NalFormat::Avc => header & 0x1F,
            NalFormat::Hevc => (header >> 1) & 0x3F,
        }
    }

    /// Whether the unit type is a parameter set (SPS/PPS, plus VPS for HEVC).
    pub fn is_parameter_set(self, unit_type: u8) -> bool {
        match self {
            NalFormat::Avc => matches!(unit_type, avc::SPS | avc::PPS),
            NalFormat::Hevc => matches!(unit_type, hevc::VPS | hevc::SPS | hevc::PPS),
        }
    }

    /// Whether the unit type carries coded picture data.
    pub fn is_vcl(self, unit_type: u8) -> bool {
        match self {
            NalFormat::Avc => (avc::SLICE..=avc::IDR).contains(&unit_type),
            NalFormat::Hevc => unit_type < 32,
        }
    }
}

/// One NAL unit without its start code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    pub unit_type: u8,
    pub data: Bytes,
}

/// Split an Annex-B byte stream into NAL units.
///
/// Bytes before the first start code are ignored. Trailing zero bytes of a unit
/// (the leading zero of a four-byte start code) are stripped.
pub fn split_units(format: NalFormat, data: &Bytes) -> Vec<NalUnit> {
    let starts: Vec<usize> = memmem::find_iter(data, &[0x00, 0x00, 0x01])
        .map(|pos| pos + 3)
        .collect();

    let mut units = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let mut end = starts.get(i + 1).map_or(data.len(), |next| next - 3);
        while end > start && data[end - 1] == 0x00 {
            end -= 1;
        }
        if end <= start {
            continue;
        }
        units.push(NalUnit {
            unit_type: format.unit_type(data[start]),
            data: data.slice(start..end),
        });
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_avc_units() {
        let data = Bytes::from_static(&[
            0x00, 0x00, 0x00, 0x01, 0x67, 0xAA, // SPS
            0x00, 0x00, 0x01, 0x68, 0xBB, // PPS
            0x00, 0x00, 0x00, 0x01, 0x65, 0x01, 0x02, // IDR
        ]);
        let units = split_units(NalFormat::Avc, &data);
        let types: Vec<u8> = units.iter().map(|u| u.unit_type).collect();
        assert_eq!(types, vec![avc::SPS, avc::PPS, avc::IDR]);
        assert_eq!(&units[0].data[..], &[0x67, 0xAA]);
        assert_eq!(&units[2].data[..], &[0x65, 0x01, 0x02]);
    }

    #[test]
    fn test_split_hevc_units() {
        let data = Bytes::from_static(&[
            0x00, 0x00, 0x01, 0x40, 0x01, 0x0C, // VPS
            0x00, 0x00, 0x01, 0x42, 0x01, 0x01, // SPS
            0x00, 0x00, 0x01, 0x02, 0x01, 0xD0, // TRAIL_R
        ]);
        let units = split_units(NalFormat::Hevc, &data);
        let types: Vec<u8> = units.iter().map(|u| u.unit_type).collect();
        assert_eq!(types, vec![hevc::VPS, hevc::SPS, 1]);
        assert!(NalFormat::Hevc.is_parameter_set(types[1]));
        assert!(NalFormat::Hevc.is_vcl(types[2]));
    }

    #[test]
    fn test_split_without_start_code() {
        let data = Bytes::from_static(&[0x65, 0x01, 0x02]);
        assert!(split_units(NalFormat::Avc, &data).is_empty());
    }

    #[test]
    fn test_vcl_classification() {
        assert!(NalFormat::Avc.is_vcl(avc::SLICE));
        assert!(NalFormat::Avc.is_vcl(avc::IDR));
        assert!(!NalFormat::Avc.is_vcl(avc::SEI));
        assert!(!NalFormat::Avc.is_vcl(avc::AUD));
    }
}
