//! Test doubles for the protocol layers: an in-memory transport fed with
//! pre-encoded server frames, and a loopback server driven by a script.
use std::{
    io::{self, Cursor},
    net::{SocketAddr, TcpListener},
    thread::{self, JoinHandle},
    time::Duration,
};

use log::debug;

use crate::config::ConnectionConfig;

use super::{
    SessionInfo,
    exchange::text_of,
    header::{Endianness, HEADER_LEN, MessageType, WireHeader},
    transport::{FramedTransport, TcpTransport, Transport, TransportError, read_full, write_full},
};

pub(crate) const TEST_SESSION: SessionInfo = SessionInfo {
    server_version: 4,
    client_id: 7,
    max_bytes: 4096,
};

pub(crate) const TEST_NONCE: &[u8] = b"4ef9a1\0";

/// Reads come from a fixed buffer, writes are captured.
#[derive(Debug, Default)]
pub(crate) struct MemoryTransport {
    incoming: Cursor<Vec<u8>>,
    pub outgoing: Vec<u8>,
    pub shut_down: bool,
    pub fail_shutdown: bool,
}

impl MemoryTransport {
    pub fn new(incoming: Vec<u8>) -> Self {
        Self {
            incoming: Cursor::new(incoming),
            ..Default::default()
        }
    }
}

impl Transport for MemoryTransport {
    fn read_exact_timeout(
        &mut self,
        buf: &mut [u8],
        _timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        read_full(&mut self.incoming, buf)
    }

    fn write_all_timeout(
        &mut self,
        buf: &[u8],
        _timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        write_full(&mut self.outgoing, buf)
    }

    fn shutdown(&mut self) -> Result<(), TransportError> {
        if self.fail_shutdown {
            return Err(TransportError::Shutdown(io::Error::other("shutdown refused")));
        }
        self.shut_down = true;
        Ok(())
    }
}

pub(crate) fn server_frame(message_type: MessageType, payload: &[u8]) -> Vec<u8> {
    server_frame_as(Endianness::NATIVE, message_type, payload)
}

pub(crate) fn server_frame_as(
    order: Endianness,
    message_type: MessageType,
    payload: &[u8],
) -> Vec<u8> {
    let header = WireHeader::new(message_type, payload.len() as u32);
    frame_bytes(header, order, payload)
}

/// Frame carrying the session values a server hands out after the handshake.
pub(crate) fn session_frame(message_type: MessageType, payload: &[u8]) -> Vec<u8> {
    let header = WireHeader {
        length: payload.len() as u32,
        server_version: TEST_SESSION.server_version,
        client_id: TEST_SESSION.client_id,
        max_bytes: TEST_SESSION.max_bytes,
        message_type,
    };
    frame_bytes(header, Endianness::NATIVE, payload)
}

fn frame_bytes(header: WireHeader, order: Endianness, payload: &[u8]) -> Vec<u8> {
    let mut bytes = header.encode_as(order).unwrap().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

/// Server side of a successful nonce handshake.
pub(crate) fn handshake_script() -> Vec<u8> {
    let mut bytes = server_frame(MessageType::Ok, TEST_NONCE);
    bytes.extend(session_frame(MessageType::Ok, b"et bonjour a vous\0"));
    bytes
}

/// Splits captured client output back into frames.
pub(crate) fn client_frames(mut bytes: &[u8]) -> Vec<(MessageType, Vec<u8>)> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let header = WireHeader::decode(&bytes[..HEADER_LEN]).unwrap();
        let end = HEADER_LEN + header.length as usize;
        frames.push((header.message_type, bytes[HEADER_LEN..end].to_vec()));
        bytes = &bytes[end..];
    }
    frames
}

/// The server end of one loopback connection.
pub(crate) struct ServerSide {
    framed: FramedTransport<TcpTransport>,
}

impl ServerSide {
    pub fn recv(&mut self) -> (MessageType, String) {
        let frame = self.framed.recv_frame().unwrap();
        (frame.message_type(), text_of(&frame.payload))
    }

    pub fn send(&mut self, message_type: MessageType, payload: &[u8]) {
        self.framed.send_frame(message_type, payload).unwrap();
    }

    pub fn handshake(&mut self) {
        assert_eq!(self.recv(), (MessageType::Request, String::from("bonjour")));
        self.send(MessageType::Ok, TEST_NONCE);

        let (message_type, credentials) = self.recv();
        assert_eq!(message_type, MessageType::Request);
        assert!(credentials.starts_with("anonymous "));
        self.send(MessageType::Ok, b"et bonjour a vous\0");
    }
}

/// Single-connection loopback server running `script` on its own thread.
pub(crate) struct FakeServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub fn spawn<F>(script: F) -> Self
    where
        F: FnOnce(ServerSide) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (stream, peer) = listener.accept().unwrap();
            debug!("fake server accepted {peer}");

            let mut framed = FramedTransport::new(TcpTransport::from(stream), None, 1 << 24);
            framed.set_session(TEST_SESSION);
            script(ServerSide { framed });
        });

        Self { addr, handle }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.addr.port(), "anonymous", "secret")
            .with_timeout(Duration::from_secs(5))
    }

    pub fn join(self) {
        self.handle.join().unwrap();
    }
}
