//! HLS playlist model and parser.
//!
//! A [`Manifest`] is either a master playlist listing variant references or a media
//! playlist with exactly one [`ResolvedVariant`].

pub mod chunk;
pub mod error;
pub mod manifest;
pub mod parser;
pub mod variant;

pub use chunk::Chunk;
pub use error::{PlaylistError, Result};
pub use manifest::Manifest;
pub use media_types::Resolution;
pub use variant::{ResolvedVariant, SINGLE_VARIANT_NAME, Variant, VariantInfo};
