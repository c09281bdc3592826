/// Errors produced by hash and object-id operations.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hex character at position {position}: '{character}'")]
    InvalidHex { position: usize, character: char },

    #[error("invalid hex length: expected {expected}, got {actual}")]
    InvalidHexLength { expected: usize, actual: usize },

    #[error("invalid id length: expected {expected} bytes, got {actual}")]
    InvalidIdLength { expected: usize, actual: usize },

    #[error("fan-out table is not monotonic at bucket {bucket}")]
    NonMonotonicFanout { bucket: usize },

    #[error("SHA-1 collision detected")]
    Collision,
}
