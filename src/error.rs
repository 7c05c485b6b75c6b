//! Status codes and errors returned by the client.
//!
//! Every fallible operation in this crate returns an [`AceError`], and every
//! [`AceError`] maps onto exactly one [`Status`]. The status set is closed:
//! callers that only care about the outcome class can match on
//! [`AceError::status`] and ignore the detail.
//!
//! [`Status::Quit`] and [`Status::ServerKilled`] are not failures. They are
//! reported through a successful [`Reply`](crate::Reply) and mark the end of a
//! session.
use std::fmt;

use thiserror::Error;

use crate::{connection::ConnState, protocol::TransportError};

/// Outcome class of a client operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    Quit,
    InvalidConnection,
    BadArgs,
    NotOpen,
    AllocationFailed,
    /// Retained for status-code compatibility; the std socket path creates
    /// and connects in a single step and reports [`Status::ConnectFailed`].
    SocketCreateFailed,
    UnknownHost,
    ConnectFailed,
    /// Retained for status-code compatibility; readiness waits are expressed
    /// as socket timeouts and surface as [`Status::TimedOut`].
    SelectFailed,
    HandshakeFailed,
    ReadError,
    WriteError,
    /// Retained for status-code compatibility; writes to a closed peer are
    /// reported as [`Status::ConnectionReset`].
    SignalSetupFailed,
    NonBlockingSetupFailed,
    TimedOut,
    /// Retained for status-code compatibility; creating a handle cannot fail
    /// other than through [`Status::BadArgs`].
    CreateFailed,
    Internal,
    RequestFailed,
    ServerKilled,
    MalformedHeader,
    UnknownMessageType,
    ProtocolViolation,
    ConnectionReset,
}

impl Status {
    /// Fixed, connection-independent description of the status.
    pub fn description(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Quit => "connection closed by \"quit\" request",
            Status::InvalidConnection => "invalid connection",
            Status::BadArgs => "bad arguments to function",
            Status::NotOpen => "connection to server is not open",
            Status::AllocationFailed => "could not allocate message buffer",
            Status::SocketCreateFailed => "could not create socket",
            Status::UnknownHost => "unknown host",
            Status::ConnectFailed => "could not connect to server",
            Status::SelectFailed => "waiting on socket failed",
            Status::HandshakeFailed => "handshake with server failed",
            Status::ReadError => "error reading from socket",
            Status::WriteError => "error writing to socket",
            Status::SignalSetupFailed => "could not set up signal handling",
            Status::NonBlockingSetupFailed => "could not set socket options",
            Status::TimedOut => "timed out waiting for server",
            Status::CreateFailed => "could not create connection",
            Status::Internal => "internal error",
            Status::RequestFailed => "server could not process request",
            Status::ServerKilled => "server terminated the session",
            Status::MalformedHeader => "malformed message header",
            Status::UnknownMessageType => "unknown message type",
            Status::ProtocolViolation => "protocol violation",
            Status::ConnectionReset => "connection reset by server",
        }
    }

    /// True for statuses that represent a completed operation.
    pub fn is_success(self) -> bool {
        matches!(self, Status::Ok | Status::Quit | Status::ServerKilled)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Error)]
pub enum AceError {
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    #[error("bad arguments: {0}")]
    BadArgs(String),

    #[error("connection is not open (state: {0})")]
    NotOpen(ConnState),

    #[error("could not allocate {0} bytes for reply")]
    AllocationFailed(usize),

    #[error("handshake failed: {reason}")]
    HandshakeFailed {
        reason: String,
        #[source]
        source: Option<Box<AceError>>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server's explanation, verbatim.
    #[error("{0}")]
    RequestFailed(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AceError {
    pub fn status(&self) -> Status {
        match self {
            AceError::InvalidConnection(_) => Status::InvalidConnection,
            AceError::BadArgs(_) => Status::BadArgs,
            AceError::NotOpen(_) => Status::NotOpen,
            AceError::AllocationFailed(_) => Status::AllocationFailed,
            AceError::HandshakeFailed { .. } => Status::HandshakeFailed,
            AceError::Transport(e) => e.status(),
            AceError::RequestFailed(_) => Status::RequestFailed,
            AceError::ProtocolViolation(_) => Status::ProtocolViolation,
            AceError::Internal(_) => Status::Internal,
        }
    }

    /// Errors after which the position in the byte stream is unknown and the
    /// connection cannot carry further requests.
    pub(crate) fn breaks_stream(&self) -> bool {
        matches!(
            self,
            AceError::Transport(_) | AceError::AllocationFailed(_) | AceError::ProtocolViolation(_)
        )
    }

    pub(crate) fn handshake(reason: impl Into<String>) -> Self {
        AceError::HandshakeFailed {
            reason: reason.into(),
            source: None,
        }
    }
}
