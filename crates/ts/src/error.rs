use thiserror::Error;

/// Errors produced while parsing transport stream structures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TsError {
    #[error("Invalid packet size: {0}, expected 188")]
    InvalidPacketSize(usize),

    #[error("Invalid sync byte: 0x{0:02X}, expected 0x47")]
    InvalidSyncByte(u8),

    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Invalid table id: expected 0x{expected:02X}, got 0x{actual:02X}")]
    InvalidTableId { expected: u8, actual: u8 },

    #[error("Invalid section length: {0}")]
    InvalidSectionLength(u16),

    #[error("Invalid PES start code")]
    InvalidPesStartCode,

    #[error("Invalid PTS/DTS flags: 0b{0:02b}")]
    InvalidPtsDtsFlags(u8),

    #[error("Invalid ADTS header: {0}")]
    InvalidAdtsHeader(&'static str),

    #[error("Parse error: {0}")]
    ParseError(String),
}
