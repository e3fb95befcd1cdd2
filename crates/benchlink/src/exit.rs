use std::fmt;
use std::io;

use benchlink_frame::FrameError;
use benchlink_line::LineError;
use benchlink_load::{LoadError, RetryCause, StatusCode};
use benchlink_transport::TransportError;

// Exit codes follow sysexits-style semantics.
pub const SUCCESS: i32 = 0;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DEVICE_REJECTED: i32 = 20;
pub const INSTRUMENT_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::NotConnected => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

fn serial_code(err: &serialport::Error) -> i32 {
    match err.kind() {
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => PERMISSION_DENIED,
        serialport::ErrorKind::InvalidInput => USAGE,
        _ => TRANSPORT_ERROR,
    }
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::Open { ref source, .. } | TransportError::Serial(ref source) => {
            CliError::new(serial_code(source), format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn load_error(context: &str, err: LoadError) -> CliError {
    match err {
        LoadError::Transport(err) => transport_error(context, err),
        LoadError::Frame(err) => frame_error(context, err),
        LoadError::DeviceRejected {
            status: StatusCode::ParameterIncorrect,
            ..
        } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        LoadError::DeviceRejected { .. } => {
            CliError::new(DEVICE_REJECTED, format!("{context}: {err}"))
        }
        LoadError::RetryBudgetExhausted {
            last: RetryCause::TimedOut,
            ..
        } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        LoadError::RetryBudgetExhausted { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        LoadError::UnexpectedReply { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        LoadError::InvalidValue(_) => CliError::new(USAGE, format!("{context}: {err}")),
    }
}

pub fn line_error(context: &str, err: LineError) -> CliError {
    match err {
        LineError::Transport(err) => transport_error(context, err),
        LineError::Io(source) => io_error(context, source),
        LineError::Timeout | LineError::RetriesExhausted { .. } => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        LineError::NoInstrument { .. } | LineError::WrongInstrument { .. } => {
            CliError::new(INSTRUMENT_CHECK_FAILED, format!("{context}: {err}"))
        }
        LineError::LineTooLong { .. } | LineError::Parse { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        LineError::InvalidArgument(_) => CliError::new(USAGE, format!("{context}: {err}")),
    }
}
