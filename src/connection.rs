//! Connection handle.
//!
//! A [`Connection`] owns its socket, its configuration and the secrets
//! derived during the handshake. It is driven by one caller at a time and is
//! never shared: higher layers that want concurrency run one connection per
//! worker thread.
//!
//! # Lifecycle
//!
//! ```text
//! Unconnected --connect--> Handshaking --> Ready <--> AwaitingContinuation
//!                               |            |
//!                               v            v  quit / kill / disconnect
//!                             Failed       Closed
//! ```
//!
//! A connection whose handshake failed, or whose byte stream was left in an
//! unknown position by a transport error, is `Failed` and must be replaced.
//!
//! # Example
//! ```no_run
//! use aceconn::{Connection, ConnectionConfig, Status};
//!
//! let config = ConnectionConfig::new("localhost", 23100, "anonymous", "");
//! let mut conn = Connection::create(config).unwrap();
//! conn.connect().unwrap();
//!
//! let reply = conn.request("find sequence *").unwrap();
//! println!("{}", reply.text());
//!
//! let reply = conn.request("quit").unwrap();
//! assert_eq!(reply.status, Status::Quit);
//! ```
use std::{fmt, mem, time::Duration};

use log::{debug, info, warn};

use crate::{
    auth::{CredentialHasher, Md5Hasher},
    config::{ConnectionConfig, socket_timeout},
    error::{AceError, Status},
    protocol::{
        AbortHandle, CLIENT_GOODBYE, FramedTransport, Outcome, Reply, RequestKind, SessionInfo,
        TcpTransport, Transport, exchange, nul_terminated, perform_handshake,
    },
};

/// Position within the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    Connecting,
    GreetingSent,
    CredentialsSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Unconnected,
    Handshaking(HandshakeStep),
    Ready,
    /// A sliced reply is being collected.
    AwaitingContinuation,
    Closed,
    Failed,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnState::Unconnected => f.write_str("unconnected"),
            ConnState::Handshaking(HandshakeStep::Connecting) => f.write_str("connecting"),
            ConnState::Handshaking(HandshakeStep::GreetingSent) => f.write_str("greeting sent"),
            ConnState::Handshaking(HandshakeStep::CredentialsSent) => {
                f.write_str("credentials sent")
            }
            ConnState::Ready => f.write_str("ready"),
            ConnState::AwaitingContinuation => f.write_str("awaiting continuation"),
            ConnState::Closed => f.write_str("closed"),
            ConnState::Failed => f.write_str("failed"),
        }
    }
}

/// The raw password is only held until the handshake has used it.
enum Secret {
    Password(String),
    Hashed {
        passwd_hash: Option<String>,
        nonce_hash: Option<String>,
    },
}

pub struct Connection<T: Transport = TcpTransport> {
    config: ConnectionConfig,
    secret: Secret,
    hasher: Box<dyn CredentialHasher>,
    state: ConnState,
    framed: Option<FramedTransport<T>>,
    session: Option<SessionInfo>,
    last_status: Status,
    last_message: String,
}

impl Connection<TcpTransport> {
    /// Builds an unconnected handle. Never touches the network.
    pub fn create(config: ConnectionConfig) -> Result<Self, AceError> {
        Self::new(config)
    }

    /// Opens the socket and performs the handshake.
    ///
    /// Any failure leaves the connection unusable; create a new one rather
    /// than retrying.
    pub fn connect(&mut self) -> Result<(), AceError> {
        let result = self.open_socket();
        self.record(result)
    }

    fn open_socket(&mut self) -> Result<(), AceError> {
        self.ensure_unconnected()?;
        self.transition(ConnState::Handshaking(HandshakeStep::Connecting));
        info!("connecting to {}, port {}", self.config.host, self.config.port);

        match TcpTransport::connect(
            &self.config.host,
            self.config.port,
            self.config.socket_timeout(),
        ) {
            Ok(transport) => self.establish(transport),
            Err(e) => {
                self.transition(ConnState::Failed);
                Err(e.into())
            }
        }
    }
}

impl<T: Transport> Connection<T> {
    /// Builds an unconnected handle over any transport type.
    pub fn new(mut config: ConnectionConfig) -> Result<Self, AceError> {
        config.validate()?;
        let passwd = mem::take(&mut config.passwd);

        Ok(Self {
            config,
            secret: Secret::Password(passwd),
            hasher: Box::new(Md5Hasher),
            state: ConnState::Unconnected,
            framed: None,
            session: None,
            last_status: Status::Ok,
            last_message: String::new(),
        })
    }

    /// Replaces the credential hashing scheme used by the handshake.
    pub fn with_hasher(mut self, hasher: impl CredentialHasher + 'static) -> Self {
        self.hasher = Box::new(hasher);
        self
    }

    /// Performs the handshake over an already open transport.
    pub fn connect_with(&mut self, transport: T) -> Result<(), AceError> {
        let result = self
            .ensure_unconnected()
            .and_then(|_| {
                self.transition(ConnState::Handshaking(HandshakeStep::Connecting));
                self.establish(transport)
            });
        self.record(result)
    }

    /// Sends a command and returns the complete reply.
    ///
    /// Sending the quit command closes the connection; the reply then has
    /// [`Status::Quit`].
    pub fn request(&mut self, text: &str) -> Result<Reply, AceError> {
        self.request_with(RequestKind::Command, text)
    }

    /// Sends raw data for the server to parse.
    pub fn request_data(&mut self, text: &str) -> Result<Reply, AceError> {
        self.request_with(RequestKind::Data, text)
    }

    pub fn request_with(&mut self, kind: RequestKind, text: &str) -> Result<Reply, AceError> {
        let result = self.send_request(kind, text);
        match &result {
            Ok(reply) if reply.status == Status::ServerKilled => {
                let text = reply.text();
                let detail = if text.is_empty() {
                    Status::ServerKilled.description()
                } else {
                    &*text
                };
                self.set_last(Status::ServerKilled, detail);
            }
            Ok(reply) => self.set_last(reply.status, reply.status.description()),
            Err(e) => self.set_last_error(e),
        }
        result
    }

    /// Sends the quit command if the session is still live, then closes the
    /// socket regardless.
    pub fn disconnect(&mut self) -> Result<(), AceError> {
        let result = self.close();
        self.record(result)
    }

    /// Latest status and its message, prefixed with `"<host>, port <port>"`.
    pub fn last_error(&self) -> (Status, &str) {
        (self.last_status, &self.last_message)
    }

    /// Detailed message if `status` is the one last recorded, otherwise the
    /// generic description of `status`.
    pub fn error_message(&self, status: Status) -> &str {
        if status == self.last_status && !self.last_message.is_empty() {
            &self.last_message
        } else {
            status.description()
        }
    }

    /// Changes the per-call timeout. Zero never times out.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.config.timeout = timeout;
        if let Some(framed) = self.framed.as_mut() {
            framed.set_timeout(socket_timeout(timeout));
        }
    }

    /// True while the socket is open.
    pub fn is_open(&self) -> bool {
        self.framed.is_some()
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Session values handed out by the server, once connected.
    pub fn session(&self) -> Option<SessionInfo> {
        self.session
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Hash of userid and password, once the handshake has used them.
    pub fn passwd_hash(&self) -> Option<&str> {
        match &self.secret {
            Secret::Hashed { passwd_hash, .. } => passwd_hash.as_deref(),
            Secret::Password(_) => None,
        }
    }

    /// Nonce-combined proof sent to the server during the handshake.
    pub fn nonce_hash(&self) -> Option<&str> {
        match &self.secret {
            Secret::Hashed { nonce_hash, .. } => nonce_hash.as_deref(),
            Secret::Password(_) => None,
        }
    }

    /// Handle that can close the socket from another thread, aborting a
    /// blocked request.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.framed.as_ref().and_then(|framed| framed.abort_handle())
    }

    fn ensure_unconnected(&self) -> Result<(), AceError> {
        match self.state {
            ConnState::Unconnected => Ok(()),
            ConnState::Failed => Err(AceError::InvalidConnection(String::from(
                "connection failed earlier and must be recreated",
            ))),
            other => Err(AceError::InvalidConnection(format!(
                "cannot connect, connection is {other}"
            ))),
        }
    }

    fn establish(&mut self, transport: T) -> Result<(), AceError> {
        let mut framed = FramedTransport::new(
            transport,
            self.config.socket_timeout(),
            self.config.max_frame_len,
        );

        let Secret::Password(passwd) = &self.secret else {
            self.transition(ConnState::Failed);
            return Err(AceError::Internal(String::from(
                "password already consumed by an earlier handshake",
            )));
        };

        let state = &mut self.state;
        let result = perform_handshake(
            &mut framed,
            &self.config.userid,
            passwd,
            self.hasher.as_ref(),
            self.config.max_frame_len,
            |step| {
                debug!("handshake: {step:?}");
                *state = ConnState::Handshaking(step);
            },
        );

        match result {
            Ok(handshake) => {
                self.secret = Secret::Hashed {
                    passwd_hash: handshake.passwd_hash,
                    nonce_hash: handshake.nonce_hash,
                };
                self.session = Some(handshake.session);
                self.framed = Some(framed);
                self.transition(ConnState::Ready);
                info!("connected to {}, port {}", self.config.host, self.config.port);
                Ok(())
            }
            Err(e) => {
                if let Err(shutdown) = framed.shutdown() {
                    debug!("ignoring shutdown failure after handshake error: {shutdown}");
                }
                self.transition(ConnState::Failed);
                Err(e)
            }
        }
    }

    fn send_request(&mut self, kind: RequestKind, text: &str) -> Result<Reply, AceError> {
        match self.state {
            ConnState::Ready | ConnState::AwaitingContinuation => {}
            ConnState::Failed => {
                return Err(AceError::InvalidConnection(String::from(
                    "connection failed earlier and must be recreated",
                )));
            }
            other => return Err(AceError::NotOpen(other)),
        }

        if text.contains('\0') {
            return Err(AceError::BadArgs(String::from(
                "request text contains a NUL byte",
            )));
        }

        let payload = nul_terminated(text);
        let max_bytes = self.session.map_or(0, |s| s.max_bytes as usize);
        if max_bytes > 0 && payload.len() > max_bytes {
            return Err(AceError::BadArgs(format!(
                "request of {} bytes exceeds server limit of {max_bytes} bytes",
                payload.len()
            )));
        }

        let Some(framed) = self.framed.as_mut() else {
            return Err(AceError::NotOpen(self.state));
        };

        let state = &mut self.state;
        let result = exchange(
            framed,
            kind.message_type(),
            &payload,
            self.config.max_frame_len,
            || *state = ConnState::AwaitingContinuation,
        );

        let conversation = match result {
            Ok(conversation) => conversation,
            Err(e) => {
                let next = if e.breaks_stream() {
                    ConnState::Failed
                } else {
                    ConnState::Ready
                };
                self.transition(next);
                return Err(e);
            }
        };
        self.transition(ConnState::Ready);

        match conversation.outcome {
            Outcome::Complete(bytes) if kind == RequestKind::Command && text == CLIENT_GOODBYE => {
                info!("connection closed by \"quit\" request");
                if let Err(e) = self.close_transport() {
                    debug!("ignoring shutdown failure after quit: {e}");
                }
                Ok(Reply {
                    status: Status::Quit,
                    bytes,
                })
            }
            Outcome::Complete(bytes) => Ok(Reply {
                status: Status::Ok,
                bytes,
            }),
            Outcome::Failed(msg) => Err(AceError::RequestFailed(msg)),
            Outcome::Killed(bytes) => {
                warn!("server killed the session");
                if let Err(e) = self.close_transport() {
                    debug!("ignoring shutdown failure after kill: {e}");
                }
                Ok(Reply {
                    status: Status::ServerKilled,
                    bytes,
                })
            }
        }
    }

    fn close(&mut self) -> Result<(), AceError> {
        if matches!(
            self.state,
            ConnState::Ready | ConnState::AwaitingContinuation
        ) {
            match self.send_request(RequestKind::Command, CLIENT_GOODBYE) {
                Ok(_) => return Ok(()),
                Err(e) => warn!("quit request failed while disconnecting: {e}"),
            }
        }

        if self.framed.is_some() {
            info!(
                "closing connection to {}, port {}",
                self.config.host, self.config.port
            );
            return self.close_transport();
        }

        if self.state != ConnState::Unconnected {
            self.transition(ConnState::Closed);
        }
        Ok(())
    }

    fn close_transport(&mut self) -> Result<(), AceError> {
        let framed = self.framed.take();
        self.transition(ConnState::Closed);
        if let Some(mut framed) = framed {
            framed.shutdown()?;
        }
        Ok(())
    }

    fn transition(&mut self, next: ConnState) {
        if self.state != next {
            debug!("connection state: {} -> {next}", self.state);
            self.state = next;
        }
    }

    fn record<R>(&mut self, result: Result<R, AceError>) -> Result<R, AceError> {
        match &result {
            Ok(_) => self.set_last(Status::Ok, Status::Ok.description()),
            Err(e) => self.set_last_error(e),
        }
        result
    }

    fn set_last_error(&mut self, e: &AceError) {
        warn!(
            "{}, port {}: {e} ({:?})",
            self.config.host,
            self.config.port,
            e.status()
        );
        self.set_last(e.status(), e);
    }

    fn set_last(&mut self, status: Status, detail: impl fmt::Display) {
        self.last_status = status;
        self.last_message = format!(
            "{}, port {}: {detail}",
            self.config.host, self.config.port
        );
    }
}
