use thiserror::Error;

/// Errors produced while parsing a playlist. A failed parse never yields a partial manifest.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaylistError {
    #[error("missing required attribute `{key}`")]
    MissingAttribute { key: String },

    #[error("malformed `{key}` in line `{line}`")]
    MalformedMatch { key: &'static str, line: String },

    #[error("segment declaration `{line}` is not followed by exactly one URI")]
    ChunkComponentCount { line: String },

    #[error("master playlist declares no variants")]
    MissingVariants,

    #[error("cannot resolve `{uri}`: {reason}")]
    InvalidUrl { uri: String, reason: String },
}

impl PlaylistError {
    pub fn missing_attribute(key: impl Into<String>) -> Self {
        Self::MissingAttribute { key: key.into() }
    }

    pub fn malformed(key: &'static str, line: impl Into<String>) -> Self {
        Self::MalformedMatch {
            key,
            line: line.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlaylistError>;
