//! Wire protocol spoken with an acedb socket server.
//!
//! This module layers the client conversation on top of a plain byte stream.
//! Nothing in here knows what the textual commands mean; requests and replies
//! are opaque payloads.
//!
//! # Overview
//!
//! Every unit on the wire is a *frame*: a fixed 50 byte [`WireHeader`]
//! followed by exactly `length` payload bytes. The header's message type tag
//! drives the conversation:
//!
//! - the client sends `ACESERV_MSGREQ` (commands) or `ACESERV_MSGDATA` (data
//!   to be parsed by the server);
//! - the server answers `ACESERV_MSGOK` with the reply, or
//!   `ACESERV_MSGENCORE` with one slice of a longer reply. The client asks for
//!   each further slice with an `"encore"` frame until a final `OK` arrives;
//! - `ACESERV_MSGFAIL` carries the server's error text and
//!   `ACESERV_MSGKILL` ends the session.
//!
//! # Byte order
//!
//! Header integers travel in the producer's native order. The first word is
//! a fixed sentinel that tells the receiver whether to swap the rest. See
//! [`Endianness::detect`].
//!
//! # Handshake
//!
//! Before any request the client greets the server with `"bonjour"`. The
//! server answers with a nonce, the client proves knowledge of the password
//! by returning a hash of it combined with the nonce, and the server closes
//! the exchange with `"et bonjour a vous"`. The header of that final frame
//! carries the server version, client id and maximum request size for the
//! session.
//!
//! # Key Components
//!
//! - [`WireHeader`]: encode/decode of the fixed header.
//! - [`Transport`]: blocking byte stream with per-call timeouts; [`TcpTransport`]
//!   is the socket implementation.
//! - [`FramedTransport`]: whole-frame reads and writes.
//! - `exchange`: one request and its (possibly sliced) reply.
//! - `handshake`: the greeting and credential exchange.
mod exchange;
mod handshake;
mod header;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use exchange::{Reply, RequestKind};
pub use handshake::SessionInfo;
pub use header::{
    BYTE_ORDER_SENTINEL, Endianness, HEADER_LEN, HeaderError, MSG_TYPE_LEN, MessageType,
    WireHeader,
};
pub use transport::{AbortHandle, Frame, FramedTransport, TcpTransport, Transport, TransportError};

pub(crate) use exchange::{Outcome, exchange, nul_terminated};
pub(crate) use handshake::perform_handshake;

/// Greeting sent by the client to open the handshake.
pub const CLIENT_HELLO: &str = "bonjour";
/// Server's acknowledgement that the handshake succeeded.
pub const SERVER_HELLO: &str = "et bonjour a vous";
/// Client request for the next slice of a reply.
pub const CLIENT_ENCORE: &str = "encore";
/// Command that ends the session gracefully.
pub const CLIENT_GOODBYE: &str = "quit";
