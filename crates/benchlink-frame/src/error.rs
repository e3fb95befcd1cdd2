/// Errors that can occur during frame encoding, alignment, and transfer.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// No start marker was found anywhere in the received window.
    #[error("start marker 0xAA not found in {len}-byte window")]
    MarkerNotFound { len: usize },

    /// The payload does not fit in a frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel reported end of stream before a complete frame arrived.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// True when the underlying read gave up waiting for bytes.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::Io(err) if matches!(
                err.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
