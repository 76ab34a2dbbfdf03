use thiserror::Error;

/// Failures while reading content notifications or playlist payloads.
#[derive(Debug, Error)]
pub enum ContentError {
    /// The text was not a valid notification or payload.
    #[error("malformed content: {0}")]
    Decode(#[from] serde_json::Error),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ContentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound)
    }
}
