use std::borrow::Cow;

use log::{debug, trace};

use crate::error::{AceError, Status};

use super::{
    CLIENT_ENCORE,
    header::{MessageType, WireHeader},
    transport::{FramedTransport, Transport},
};

/// How the server should treat the request text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestKind {
    /// A command, e.g. `find sequence *`.
    #[default]
    Command,
    /// Raw data for the server to parse.
    Data,
}

impl RequestKind {
    pub fn message_type(self) -> MessageType {
        match self {
            RequestKind::Command => MessageType::Request,
            RequestKind::Data => MessageType::Data,
        }
    }
}

/// Reply to a completed request.
///
/// `status` is [`Status::Ok`] for an ordinary reply, [`Status::Quit`] after
/// the quit command and [`Status::ServerKilled`] when the server ended the
/// session. The bytes are the concatenation of every slice the server sent,
/// exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub bytes: Vec<u8>,
}

impl Reply {
    /// Reply as text, without the trailing NUL terminator.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(trim_nul(&self.bytes))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Complete(Vec<u8>),
    Failed(String),
    Killed(Vec<u8>),
}

#[derive(Debug)]
pub(crate) struct Conversation {
    pub outcome: Outcome,
    /// Header of the frame that ended the exchange.
    pub last_header: WireHeader,
    pub continuations: usize,
}

/// Sends one request and collects the whole reply, asking for further
/// slices for as long as the server answers `ENCORE`.
///
/// `on_continuation` runs each time a slice arrives and another one is
/// about to be requested.
pub(crate) fn exchange<T, F>(
    framed: &mut FramedTransport<T>,
    message_type: MessageType,
    payload: &[u8],
    max_reply_len: usize,
    on_continuation: F,
) -> Result<Conversation, AceError>
where
    T: Transport,
    F: FnMut(),
{
    framed.send_frame(message_type, payload)?;
    collect_reply(framed, max_reply_len, on_continuation)
}

pub(crate) fn collect_reply<T, F>(
    framed: &mut FramedTransport<T>,
    max_reply_len: usize,
    mut on_continuation: F,
) -> Result<Conversation, AceError>
where
    T: Transport,
    F: FnMut(),
{
    let mut reply: Option<Vec<u8>> = None;
    let mut continuations = 0;

    loop {
        let frame = framed.recv_frame()?;
        let last_header = frame.header;

        let outcome = match last_header.message_type {
            MessageType::Ok => Outcome::Complete(append(reply.take(), frame.payload, max_reply_len)?),
            MessageType::Encore => {
                reply = Some(append(reply.take(), frame.payload, max_reply_len)?);
                continuations += 1;
                on_continuation();

                debug!("reply sliced, requesting slice {}", continuations + 1);
                framed.send_frame(MessageType::Encore, &nul_terminated(CLIENT_ENCORE))?;
                continue;
            }
            MessageType::Fail => Outcome::Failed(text_of(&frame.payload)),
            MessageType::Kill => Outcome::Killed(frame.payload),
            other @ (MessageType::Request | MessageType::Data) => {
                return Err(AceError::ProtocolViolation(format!(
                    "server sent client message type {other}"
                )));
            }
        };

        trace!("exchange finished after {continuations} continuation(s)");
        return Ok(Conversation {
            outcome,
            last_header,
            continuations,
        });
    }
}

fn append(acc: Option<Vec<u8>>, slice: Vec<u8>, limit: usize) -> Result<Vec<u8>, AceError> {
    let Some(mut acc) = acc else {
        return Ok(slice);
    };

    let total = acc.len() + slice.len();
    if total > limit {
        return Err(AceError::ProtocolViolation(format!(
            "reassembled reply of {total} bytes exceeds limit of {limit} bytes"
        )));
    }
    acc.try_reserve(slice.len())
        .map_err(|_| AceError::AllocationFailed(total))?;
    acc.extend_from_slice(&slice);
    Ok(acc)
}

/// Request text as sent on the wire: the text plus a NUL terminator.
pub(crate) fn nul_terminated(text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(text.len() + 1);
    payload.extend_from_slice(text.as_bytes());
    payload.push(0);
    payload
}

pub(crate) fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

pub(crate) fn text_of(bytes: &[u8]) -> String {
    String::from_utf8_lossy(trim_nul(bytes)).into_owned()
}
