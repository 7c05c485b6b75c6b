//! Fixed-size message header.
//!
//! ```text
//! offset  size  field
//!      0     4  byte-order sentinel (0x12345678 in the producer's order)
//!      4     4  payload length
//!      8     4  server version
//!     12     4  client id
//!     16     4  max request size
//!     20    30  message type tag, NUL padded
//! ```
//!
//! Integers are written in the producer's native byte order. The receiver
//! reads the sentinel to learn that order and decodes the remaining integer
//! fields accordingly.
use std::{fmt, str::FromStr};

use bincode::{
    Decode, Encode,
    config::{self, Config},
};
use thiserror::Error;

use crate::error::Status;

/// Size of an encoded header.
pub const HEADER_LEN: usize = 50;
/// Size of the message type field, including the NUL terminator.
pub const MSG_TYPE_LEN: usize = 30;
/// Fixed word used to detect the producer's byte order.
pub const BYTE_ORDER_SENTINEL: u32 = 0x1234_5678;

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("malformed header: {0}")]
    Malformed(String),

    #[error("unknown message type '{0}'")]
    UnknownMessageType(String),

    #[error("failed to encode header: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode header: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl HeaderError {
    pub fn status(&self) -> Status {
        match self {
            HeaderError::UnknownMessageType(_) => Status::UnknownMessageType,
            HeaderError::Malformed(_) | HeaderError::Decode(_) => Status::MalformedHeader,
            HeaderError::Encode(_) => Status::Internal,
        }
    }
}

/// Byte order of the integers in a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endianness = Endianness::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endianness = Endianness::Big;

    /// Producer's byte order, given the raw sentinel bytes of a header.
    ///
    /// Anything other than the sentinel in native order is taken to come from
    /// a producer of the opposite order.
    pub fn detect(sentinel: [u8; 4]) -> Self {
        if u32::from_ne_bytes(sentinel) == BYTE_ORDER_SENTINEL {
            Self::NATIVE
        } else {
            Self::NATIVE.swapped()
        }
    }

    pub fn swapped(self) -> Self {
        match self {
            Endianness::Little => Endianness::Big,
            Endianness::Big => Endianness::Little,
        }
    }

    /// Whether integers from a producer of this order must be byte-swapped
    /// before use.
    pub fn needs_swap(self) -> bool {
        self != Self::NATIVE
    }
}

/// Closed set of message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Client command.
    Request,
    /// Client data to be parsed by the server.
    Data,
    /// Final (or only) slice of a reply.
    Ok,
    /// One slice of a longer reply; from the client, a request for the next.
    Encore,
    /// Server could not process the request.
    Fail,
    /// Server is terminating the session.
    Kill,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Request => "ACESERV_MSGREQ",
            MessageType::Data => "ACESERV_MSGDATA",
            MessageType::Ok => "ACESERV_MSGOK",
            MessageType::Encore => "ACESERV_MSGENCORE",
            MessageType::Fail => "ACESERV_MSGFAIL",
            MessageType::Kill => "ACESERV_MSGKILL",
        }
    }

    fn to_field(self) -> [u8; MSG_TYPE_LEN] {
        let mut field = [0u8; MSG_TYPE_LEN];
        let tag = self.as_str().as_bytes();
        field[..tag.len()].copy_from_slice(tag);
        field
    }

    /// Reads the tag up to its first NUL. A field with no NUL in any of its
    /// 30 bytes is malformed rather than read as a 29 character tag.
    fn from_field(field: &[u8; MSG_TYPE_LEN]) -> Result<Self, HeaderError> {
        let end = field.iter().position(|&b| b == 0).ok_or_else(|| {
            HeaderError::Malformed(String::from(
                "message type is not NUL terminated within its field",
            ))
        })?;

        let tag = std::str::from_utf8(&field[..end]).map_err(|_| {
            HeaderError::UnknownMessageType(String::from_utf8_lossy(&field[..end]).into_owned())
        })?;
        tag.parse()
    }
}

impl FromStr for MessageType {
    type Err = HeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACESERV_MSGREQ" => Ok(MessageType::Request),
            "ACESERV_MSGDATA" => Ok(MessageType::Data),
            "ACESERV_MSGOK" => Ok(MessageType::Ok),
            "ACESERV_MSGENCORE" => Ok(MessageType::Encore),
            "ACESERV_MSGFAIL" => Ok(MessageType::Fail),
            "ACESERV_MSGKILL" => Ok(MessageType::Kill),
            other => Err(HeaderError::UnknownMessageType(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded header. The sentinel is implied and never exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub length: u32,
    pub server_version: u32,
    pub client_id: u32,
    pub max_bytes: u32,
    pub message_type: MessageType,
}

/// Header exactly as laid out on the wire.
#[derive(Encode, Decode)]
struct RawHeader {
    sentinel: u32,
    length: u32,
    server_version: u32,
    client_id: u32,
    max_bytes: u32,
    msg_type: [u8; MSG_TYPE_LEN],
}

impl WireHeader {
    pub fn new(message_type: MessageType, length: u32) -> Self {
        Self {
            length,
            server_version: 0,
            client_id: 0,
            max_bytes: 0,
            message_type,
        }
    }

    /// Encodes the header in native byte order.
    pub fn encode(&self) -> Result<[u8; HEADER_LEN], HeaderError> {
        self.encode_as(Endianness::NATIVE)
    }

    /// Encodes the header as a producer of the given byte order would.
    pub fn encode_as(&self, order: Endianness) -> Result<[u8; HEADER_LEN], HeaderError> {
        let raw = RawHeader {
            sentinel: BYTE_ORDER_SENTINEL,
            length: self.length,
            server_version: self.server_version,
            client_id: self.client_id,
            max_bytes: self.max_bytes,
            msg_type: self.message_type.to_field(),
        };

        let base = config::standard().with_fixed_int_encoding();
        match order {
            Endianness::Little => encode_raw(&raw, base.with_little_endian()),
            Endianness::Big => encode_raw(&raw, base.with_big_endian()),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        if buf.len() != HEADER_LEN {
            return Err(HeaderError::Malformed(format!(
                "expected {HEADER_LEN} bytes, got {}",
                buf.len()
            )));
        }

        let order = Endianness::detect([buf[0], buf[1], buf[2], buf[3]]);
        let base = config::standard().with_fixed_int_encoding();
        let raw = match order {
            Endianness::Little => decode_raw(buf, base.with_little_endian())?,
            Endianness::Big => decode_raw(buf, base.with_big_endian())?,
        };

        Ok(Self {
            length: raw.length,
            server_version: raw.server_version,
            client_id: raw.client_id,
            max_bytes: raw.max_bytes,
            message_type: MessageType::from_field(&raw.msg_type)?,
        })
    }
}

fn encode_raw<C: Config>(raw: &RawHeader, config: C) -> Result<[u8; HEADER_LEN], HeaderError> {
    let mut buf = [0u8; HEADER_LEN];
    let written = bincode::encode_into_slice(raw, &mut buf, config)?;
    if written != HEADER_LEN {
        return Err(HeaderError::Malformed(format!(
            "encoded {written} bytes, expected {HEADER_LEN}"
        )));
    }
    Ok(buf)
}

fn decode_raw<C: Config>(buf: &[u8], config: C) -> Result<RawHeader, HeaderError> {
    let (raw, read): (RawHeader, usize) = bincode::decode_from_slice(buf, config)?;
    if read != HEADER_LEN {
        return Err(HeaderError::Malformed(format!(
            "decoded {read} bytes, expected {HEADER_LEN}"
        )));
    }
    Ok(raw)
}
