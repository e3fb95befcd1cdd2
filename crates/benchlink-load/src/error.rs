use std::fmt;

use crate::command::Command;
use crate::status::StatusCode;

/// Why an attempt was abandoned and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    /// No full frame arrived before the reply deadline.
    TimedOut,
    /// The reply's trailing checksum did not match.
    ChecksumFailed,
    /// No start marker in the received window.
    FramingFailed,
    /// The device reported that our frame arrived corrupted.
    DeviceChecksum,
    /// A valid reply echoed neither the status code nor the request's
    /// command, typically a late answer to an earlier request.
    UnexpectedEcho,
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RetryCause::TimedOut => "reply timed out",
            RetryCause::ChecksumFailed => "reply checksum mismatch",
            RetryCause::FramingFailed => "no start marker in reply",
            RetryCause::DeviceChecksum => "device reported checksum incorrect",
            RetryCause::UnexpectedEcho => "reply echoes a different command",
        };
        f.write_str(text)
    }
}

/// Errors that can occur talking to a programmable load.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] benchlink_transport::TransportError),

    /// Frame-level error outside the retry policy.
    #[error("frame error: {0}")]
    Frame(#[from] benchlink_frame::FrameError),

    /// The device refused the command. Retrying will not help.
    #[error("{command} rejected by device: {status}")]
    DeviceRejected { command: Command, status: StatusCode },

    /// Every attempt failed.
    #[error(
        "communication with the {device} failed after {attempts} attempts ({last}); \
         check all connections and restart"
    )]
    RetryBudgetExhausted {
        device: String,
        attempts: u32,
        last: RetryCause,
    },

    /// The device answered with a value outside its documented range.
    #[error("unexpected reply to {command}: {detail}")]
    UnexpectedReply { command: Command, detail: String },

    /// A caller-supplied value cannot be represented on the wire.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, LoadError>;
