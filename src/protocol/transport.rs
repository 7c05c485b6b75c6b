use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use log::{debug, trace, warn};
use thiserror::Error;

use crate::error::Status;

use super::{
    SessionInfo,
    header::{HEADER_LEN, HeaderError, MessageType, WireHeader},
};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown host '{host}'")]
    UnknownHost {
        host: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to set socket timeout: {0}")]
    SocketOption(#[source] io::Error),

    #[error("error reading from socket: {0}")]
    Read(#[source] io::Error),

    #[error("error writing to socket: {0}")]
    Write(#[source] io::Error),

    #[error("socket {0} timed out")]
    TimedOut(&'static str),

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("frame of {len} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("could not allocate {0} bytes for frame payload")]
    Allocation(usize),

    #[error("failed to shut down socket: {0}")]
    Shutdown(#[source] io::Error),

    #[error(transparent)]
    Header(#[from] HeaderError),
}

impl TransportError {
    pub fn status(&self) -> Status {
        match self {
            TransportError::UnknownHost { .. } => Status::UnknownHost,
            TransportError::Connect { .. } => Status::ConnectFailed,
            TransportError::SocketOption(_) => Status::NonBlockingSetupFailed,
            TransportError::Read(_) => Status::ReadError,
            TransportError::Write(_) => Status::WriteError,
            TransportError::TimedOut(_) => Status::TimedOut,
            TransportError::ConnectionReset(_) => Status::ConnectionReset,
            TransportError::FrameTooLarge { .. } => Status::ProtocolViolation,
            TransportError::Allocation(_) => Status::AllocationFailed,
            TransportError::Shutdown(_) => Status::Internal,
            TransportError::Header(e) => e.status(),
        }
    }
}

/// Blocking byte stream carrying frames.
///
/// A `timeout` of `None` blocks indefinitely. Otherwise the timeout bounds
/// each individual blocking read or write, not the whole buffer.
pub trait Transport {
    fn read_exact_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<(), TransportError>;

    fn write_all_timeout(
        &mut self,
        buf: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), TransportError>;

    /// Closes both directions. A stream that is already disconnected is not
    /// an error.
    fn shutdown(&mut self) -> Result<(), TransportError>;

    /// Handle that can close the stream from another thread.
    fn abort_handle(&self) -> Option<AbortHandle> {
        None
    }
}

/// Closes a socket from outside the call stack driving it. A call blocked on
/// the socket then fails with a reset or read error.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    stream: Arc<TcpStream>,
}

impl AbortHandle {
    pub fn abort(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            res => res,
        }
    }
}

pub struct TcpTransport {
    stream: TcpStream,
    read_timeout: Option<Option<Duration>>,
    write_timeout: Option<Option<Duration>>,
}

impl TcpTransport {
    /// Resolves `host` and connects to the first address that accepts.
    pub fn connect(
        host: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::UnknownHost {
                host: host.to_string(),
                source: Some(e),
            })?
            .collect();

        let mut last_err = None;
        for addr in addrs {
            debug!("connecting to {addr}");
            let res = match timeout {
                Some(t) => TcpStream::connect_timeout(&addr, t),
                None => TcpStream::connect(addr),
            };
            match res {
                Ok(stream) => return Ok(Self::from(stream)),
                Err(source) => {
                    warn!("could not connect to {addr}: {source}");
                    last_err = Some(TransportError::Connect { addr, source });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| TransportError::UnknownHost {
            host: host.to_string(),
            source: None,
        }))
    }

    fn apply_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        if self.read_timeout != Some(timeout) {
            self.stream
                .set_read_timeout(timeout)
                .map_err(TransportError::SocketOption)?;
            self.read_timeout = Some(timeout);
        }
        Ok(())
    }

    fn apply_write_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        if self.write_timeout != Some(timeout) {
            self.stream
                .set_write_timeout(timeout)
                .map_err(TransportError::SocketOption)?;
            self.write_timeout = Some(timeout);
        }
        Ok(())
    }
}

impl From<TcpStream> for TcpTransport {
    fn from(stream: TcpStream) -> Self {
        Self {
            stream,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl Transport for TcpTransport {
    fn read_exact_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        self.apply_read_timeout(timeout)?;
        read_full(&mut self.stream, buf)
    }

    fn write_all_timeout(
        &mut self,
        buf: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        self.apply_write_timeout(timeout)?;
        write_full(&mut self.stream, buf)
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(TransportError::Shutdown(e)),
            _ => Ok(()),
        }
    }

    fn abort_handle(&self) -> Option<AbortHandle> {
        match self.stream.try_clone() {
            Ok(stream) => Some(AbortHandle {
                stream: Arc::new(stream),
            }),
            Err(e) => {
                warn!("could not clone socket for abort handle: {e}");
                None
            }
        }
    }
}

/// Reads until `buf` is full, retrying partial and interrupted reads.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(TransportError::ConnectionReset(format!(
                    "peer closed the connection after {filled} of {} bytes",
                    buf.len()
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify(e, "read")),
        }
    }
    Ok(())
}

/// Writes all of `buf`, retrying partial and interrupted writes.
pub(crate) fn write_full<W: Write>(writer: &mut W, buf: &[u8]) -> Result<(), TransportError> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => {
                return Err(TransportError::ConnectionReset(format!(
                    "peer stopped accepting data after {written} of {} bytes",
                    buf.len()
                )));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify(e, "write")),
        }
    }
    writer.flush().map_err(|e| classify(e, "write"))
}

fn classify(e: io::Error, direction: &'static str) -> TransportError {
    use io::ErrorKind::*;

    match e.kind() {
        // unix reports an expired socket timeout as WouldBlock
        WouldBlock | TimedOut => TransportError::TimedOut(direction),
        ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof => {
            TransportError::ConnectionReset(e.to_string())
        }
        _ if direction == "read" => TransportError::Read(e),
        _ => TransportError::Write(e),
    }
}

/// One header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: WireHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }
}

/// Reads and writes whole frames over a [`Transport`].
pub struct FramedTransport<T: Transport> {
    inner: T,
    timeout: Option<Duration>,
    max_frame_len: usize,
    session: SessionInfo,
}

impl<T: Transport> FramedTransport<T> {
    pub fn new(inner: T, timeout: Option<Duration>, max_frame_len: usize) -> Self {
        Self {
            inner,
            timeout,
            max_frame_len,
            session: SessionInfo::default(),
        }
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Session values echoed in every outgoing header.
    pub fn set_session(&mut self, session: SessionInfo) {
        self.session = session;
    }

    pub fn session(&self) -> SessionInfo {
        self.session
    }

    pub fn send_frame(
        &mut self,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let length = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
            len: payload.len(),
            limit: u32::MAX as usize,
        })?;

        let header = WireHeader {
            length,
            server_version: self.session.server_version,
            client_id: self.session.client_id,
            max_bytes: self.session.max_bytes,
            message_type,
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.extend_from_slice(&header.encode()?);
        buf.extend_from_slice(payload);

        trace!("sending {message_type} frame, {length} payload bytes");
        self.inner.write_all_timeout(&buf, self.timeout)
    }

    pub fn recv_frame(&mut self) -> Result<Frame, TransportError> {
        let mut head = [0u8; HEADER_LEN];
        self.inner.read_exact_timeout(&mut head, self.timeout)?;
        let header = WireHeader::decode(&head)?;

        let len = header.length as usize;
        if len > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                len,
                limit: self.max_frame_len,
            });
        }

        let mut payload = Vec::new();
        payload
            .try_reserve_exact(len)
            .map_err(|_| TransportError::Allocation(len))?;
        payload.resize(len, 0);
        if len > 0 {
            self.inner.read_exact_timeout(&mut payload, self.timeout)?;
        }

        trace!("received {} frame, {len} payload bytes", header.message_type);
        Ok(Frame { header, payload })
    }

    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.inner.abort_handle()
    }

    pub fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown()
    }

    #[cfg(test)]
    pub(crate) fn get_ref(&self) -> &T {
        &self.inner
    }
}
