use log::{debug, info};

use crate::{auth::CredentialHasher, connection::HandshakeStep, error::AceError};

use super::{
    CLIENT_HELLO, SERVER_HELLO,
    exchange::{Conversation, Outcome, collect_reply, nul_terminated, text_of},
    header::{MessageType, WireHeader},
    transport::{FramedTransport, Transport},
};

/// Values the server hands out when the handshake completes. They stay fixed
/// for the rest of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub server_version: u32,
    pub client_id: u32,
    /// Largest request the server accepts, zero if it set no limit.
    pub max_bytes: u32,
}

impl From<&WireHeader> for SessionInfo {
    fn from(header: &WireHeader) -> Self {
        Self {
            server_version: header.server_version,
            client_id: header.client_id,
            max_bytes: header.max_bytes,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Handshake {
    pub session: SessionInfo,
    /// Hash of userid and password, if the server asked for credentials.
    pub passwd_hash: Option<String>,
    /// Nonce-combined hash sent to the server.
    pub nonce_hash: Option<String>,
}

/// Greets the server and, if it replies with a nonce, proves the password.
///
/// `on_step` is told about each transition so the caller can track where a
/// failure happened. Any failure is reported as [`AceError::HandshakeFailed`].
pub(crate) fn perform_handshake<T, F>(
    framed: &mut FramedTransport<T>,
    userid: &str,
    passwd: &str,
    hasher: &dyn CredentialHasher,
    max_reply_len: usize,
    mut on_step: F,
) -> Result<Handshake, AceError>
where
    T: Transport,
    F: FnMut(HandshakeStep),
{
    send(framed, CLIENT_HELLO)?;
    on_step(HandshakeStep::GreetingSent);
    let (reply, header) = completed(collect(framed, max_reply_len)?, "greeting")?;

    if reply == SERVER_HELLO {
        debug!("server accepted greeting without credentials");
        return Ok(finish(framed, &header, None, None));
    }

    let nonce = reply;
    if nonce.is_empty() || nonce.chars().any(char::is_whitespace) {
        return Err(AceError::handshake(format!(
            "server greeting should be a single word nonce but was \"{nonce}\""
        )));
    }

    let passwd_hash = hasher.passwd_hash(userid, passwd);
    let nonce_hash = hasher.nonce_hash(&passwd_hash, &nonce);
    let credentials = format!("{userid} {nonce_hash}");

    send(framed, &credentials)?;
    on_step(HandshakeStep::CredentialsSent);
    let (reply, header) = completed(collect(framed, max_reply_len)?, "credentials")?;

    if reply != SERVER_HELLO {
        return Err(AceError::handshake(format!(
            "server reply in handshake incorrect, it should have said \"{SERVER_HELLO}\" \
             but actually said \"{reply}\""
        )));
    }

    Ok(finish(framed, &header, Some(passwd_hash), Some(nonce_hash)))
}

fn send<T: Transport>(framed: &mut FramedTransport<T>, text: &str) -> Result<(), AceError> {
    framed
        .send_frame(MessageType::Request, &nul_terminated(text))
        .map_err(|e| wrap(e.into()))
}

fn collect<T: Transport>(
    framed: &mut FramedTransport<T>,
    max_reply_len: usize,
) -> Result<Conversation, AceError> {
    collect_reply(framed, max_reply_len, || {}).map_err(wrap)
}

fn completed(conv: Conversation, stage: &str) -> Result<(String, WireHeader), AceError> {
    match conv.outcome {
        Outcome::Complete(bytes) => Ok((text_of(&bytes), conv.last_header)),
        Outcome::Failed(msg) => Err(AceError::handshake(format!(
            "server refused {stage}: {msg}"
        ))),
        Outcome::Killed(_) => Err(AceError::handshake(format!(
            "server ended the session during {stage}"
        ))),
    }
}

fn finish<T: Transport>(
    framed: &mut FramedTransport<T>,
    header: &WireHeader,
    passwd_hash: Option<String>,
    nonce_hash: Option<String>,
) -> Handshake {
    let session = SessionInfo::from(header);
    framed.set_session(session);
    info!(
        "handshake complete: server version {}, client id {}, max request {} bytes",
        session.server_version, session.client_id, session.max_bytes
    );

    Handshake {
        session,
        passwd_hash,
        nonce_hash,
    }
}

fn wrap(source: AceError) -> AceError {
    AceError::HandshakeFailed {
        reason: source.to_string(),
        source: Some(Box::new(source)),
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        auth::Md5Hasher,
        error::Status,
        protocol::testing::{
            MemoryTransport, TEST_SESSION, client_frames, server_frame, session_frame,
        },
    };

    use super::*;

    fn run(incoming: Vec<u8>) -> (Result<Handshake, AceError>, Vec<HandshakeStep>, Vec<u8>) {
        let mut framed = FramedTransport::new(MemoryTransport::new(incoming), None, 1 << 20);
        let mut steps = Vec::new();
        let res = perform_handshake(&mut framed, "anonymous", "secret", &Md5Hasher, 1 << 20, |s| {
            steps.push(s)
        });
        (res, steps, framed.get_ref().outgoing.clone())
    }

    #[test]
    fn credentials_are_hashed_with_nonce() {
        let mut incoming = server_frame(MessageType::Ok, b"abc123\0");
        incoming.extend(session_frame(MessageType::Ok, b"et bonjour a vous\0"));

        let (res, steps, outgoing) = run(incoming);
        let handshake = res.unwrap();

        assert_eq!(handshake.session, TEST_SESSION);
        assert_eq!(
            steps,
            vec![HandshakeStep::GreetingSent, HandshakeStep::CredentialsSent]
        );

        let passwd_hash = Md5Hasher.passwd_hash("anonymous", "secret");
        let nonce_hash = Md5Hasher.nonce_hash(&passwd_hash, "abc123");
        assert_eq!(handshake.nonce_hash.as_deref(), Some(nonce_hash.as_str()));

        let sent = client_frames(&outgoing);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (MessageType::Request, b"bonjour\0".to_vec()));
        let expected = format!("anonymous {nonce_hash}\0");
        assert_eq!(sent[1], (MessageType::Request, expected.into_bytes()));
        // the raw password never leaves the client
        assert!(!String::from_utf8_lossy(&outgoing).contains("secret"));
    }

    #[test]
    fn immediate_acknowledgement_skips_credentials() {
        let (res, steps, outgoing) = run(session_frame(MessageType::Ok, b"et bonjour a vous\0"));
        let handshake = res.unwrap();

        assert_eq!(handshake.session, TEST_SESSION);
        assert!(handshake.nonce_hash.is_none());
        assert_eq!(steps, vec![HandshakeStep::GreetingSent]);
        assert_eq!(client_frames(&outgoing).len(), 1);
    }

    #[test]
    fn wrong_acknowledgement_fails() {
        let mut incoming = server_frame(MessageType::Ok, b"abc123\0");
        incoming.extend(server_frame(MessageType::Ok, b"go away\0"));

        let err = run(incoming).0.unwrap_err();
        assert_eq!(err.status(), Status::HandshakeFailed);
        assert!(err.to_string().contains("go away"));
    }

    #[test]
    fn multi_word_nonce_fails() {
        let err = run(server_frame(MessageType::Ok, b"not a nonce\0")).0.unwrap_err();
        assert_eq!(err.status(), Status::HandshakeFailed);
    }

    #[test]
    fn refused_credentials_fail() {
        let mut incoming = server_frame(MessageType::Ok, b"abc123\0");
        incoming.extend(server_frame(MessageType::Fail, b"bad password\0"));

        let err = run(incoming).0.unwrap_err();
        assert_eq!(err.status(), Status::HandshakeFailed);
        assert!(err.to_string().contains("bad password"));
    }

    #[test]
    fn socket_failure_is_wrapped() {
        let err = run(Vec::new()).0.unwrap_err();

        assert_eq!(err.status(), Status::HandshakeFailed);
        let AceError::HandshakeFailed { source, .. } = err else {
            unreachable!()
        };
        assert_eq!(source.unwrap().status(), Status::ConnectionReset);
    }
}
