/// Errors that can occur talking to a line-protocol instrument.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] benchlink_transport::TransportError),

    /// I/O error on the line other than a read timeout.
    #[error("line I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No complete line arrived before the read timeout.
    #[error("timed out waiting for a reply line")]
    Timeout,

    /// A reply line grew past the allowed length without a terminator.
    #[error("reply line exceeds {max} bytes")]
    LineTooLong { max: usize },

    /// Every attempt at an exchange failed.
    #[error("no valid reply to {command:?} after {attempts} attempts; check the connection")]
    RetriesExhausted { command: String, attempts: u32 },

    /// No instrument answered on the port.
    #[error("no instrument found on {port}; a {expected} was expected")]
    NoInstrument { port: String, expected: String },

    /// A different instrument answered on the port.
    #[error("instrument on {port} should be a {expected}, found {found:?}")]
    WrongInstrument {
        port: String,
        expected: String,
        found: String,
    },

    /// A reply could not be interpreted.
    #[error("cannot parse reply {reply:?}: {reason}")]
    Parse { reply: String, reason: String },

    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl LineError {
    pub(crate) fn parse(reply: &str, reason: impl Into<String>) -> Self {
        LineError::Parse {
            reply: reply.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LineError>;
