//! Frame decoding and encoding failures.

/// Why an inbound frame could not be turned into a protocol message.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Not valid JSON, or valid JSON of the wrong shape.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// A well-formed request envelope carrying a tag this hub does not know.
    #[error("unknown request tag: {0}")]
    UnknownTag(String),
    /// An outbound message could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

impl FrameError {
    /// Short classification string for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::UnknownTag(_) => "unknown_tag",
            Self::Encode(_) => "encode",
        }
    }
}
