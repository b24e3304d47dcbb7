use std::fmt;
use std::io;

use rexec_peer::PeerError;
use rexec_pipe::PipeError;
use rexec_transport::TransportError;
use rexec_wire::WireError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
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
        io::ErrorKind::NotFound | io::ErrorKind::InvalidInput => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. } if source.kind() == io::ErrorKind::PermissionDenied => {
            io_error(context, source)
        }
        TransportError::InvalidAddress { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn wire_error(context: &str, err: WireError) -> CliError {
    match err {
        WireError::TooLarge { .. } | WireError::Malformed { .. } | WireError::InvalidAddress { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn pipe_error(context: &str, err: PipeError) -> CliError {
    match err {
        PipeError::Io { source, path } => io_error(&format!("{context} ({})", path.display()), source),
        PipeError::Corrupt { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        PipeError::InvalidConfig(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Wire(err) => wire_error(context, err),
        PeerError::Pipe(err) => pipe_error(context, err),
        PeerError::Json(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        PeerError::ConnectionTimeout { .. }
        | PeerError::CommandTimeout { .. }
        | PeerError::NodeNotFound { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PeerError::InvalidCommand(_) => CliError::new(USAGE, format!("{context}: {err}")),
        PeerError::RemoteExecution { .. }
        | PeerError::NotConnected { .. }
        | PeerError::InvalidState { .. }
        | PeerError::HandshakeFailed(_) => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}
