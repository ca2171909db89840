// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("3D 'location' are not supported. Set 2D locations instead (channel {channel} has {dims} coordinates)")]
    UnsupportedGeometry { channel: usize, dims: usize },

    #[error("Channel count mismatch: recording has {expected} channels but {actual} locations")]
    ChannelCountMismatch { expected: usize, actual: usize },

    #[error("Recording has no channels")]
    EmptyRecording,
}

pub type Result<T> = std::result::Result<T, DomainError>;
