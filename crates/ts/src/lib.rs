//! MPEG-2 Transport Stream demuxing primitives.
//!
//! Packet, PAT, PMT and PES parsing, Annex-B and ADTS scanning, and the stateful
//! [`Demuxer`] that turns segment bytes into timestamped audio and video frames.

pub mod adts;
pub mod demux;
pub mod error;
pub mod nal;
pub mod packet;
pub mod pat;
pub mod pes;
pub mod pmt;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use adts::AdtsHeader;
pub use demux::{CodecConfig, DemuxStats, Demuxer, Frame, ReadContext, split_batches};
pub use error::TsError;
pub use packet::{PID_NULL, PID_PAT, TS_PACKET_SIZE, TsPacket};
pub use pat::{Pat, PatProgram};
pub use pes::{PesHeader, PesUnit};
pub use pmt::{Pmt, PmtStream, StreamType};

/// Result type for TS parsing operations
pub type Result<T> = std::result::Result<T, TsError>;
