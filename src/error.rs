use thiserror::Error;

/// Malformed input rejected at the engine boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidInputError {
    #[error("frame buffer is empty")]
    EmptyFrame,

    #[error("frame has a zero dimension, got {width}x{height}")]
    ZeroDimension { width: usize, height: usize },

    #[error("frame dimensions {width}x{height} overflow the pixel count")]
    DimensionOverflow { width: usize, height: usize },

    #[error("frame buffer holds {got} bytes, expected {expected} for a single-channel frame")]
    BufferSizeMismatch { expected: usize, got: usize },

    #[error("frame must be single-channel 8-bit, got {channels} channel(s)")]
    NotSingleChannel { channels: u8 },

    #[error("timestamp must be finite, got {0}")]
    InvalidTimestamp(f64),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    InvalidInput(#[from] InvalidInputError),
}

pub type Result<T> = std::result::Result<T, Error>;
