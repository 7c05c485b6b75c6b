//! Credential hashing for the handshake.
//!
//! The password itself never crosses the wire. The client first hashes the
//! userid with the password, then hashes that result with the nonce the
//! server handed out, and sends only the second hash.
use md5::{Digest, Md5};

/// Turns a userid, password and server nonce into the proof sent during
/// the handshake.
pub trait CredentialHasher: Send {
    /// Hash identifying the user's password, independent of any session.
    fn passwd_hash(&self, userid: &str, passwd: &str) -> String;

    /// Session-specific proof built from the password hash and the nonce.
    fn nonce_hash(&self, passwd_hash: &str, nonce: &str) -> String;
}

/// MD5 over the concatenated inputs, as lowercase hex. This is what acedb
/// servers expect.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hasher;

impl Md5Hasher {
    fn hex_digest(parts: &[&str]) -> String {
        let mut hasher = Md5::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

impl CredentialHasher for Md5Hasher {
    fn passwd_hash(&self, userid: &str, passwd: &str) -> String {
        Self::hex_digest(&[userid, passwd])
    }

    fn nonce_hash(&self, passwd_hash: &str, nonce: &str) -> String {
        Self::hex_digest(&[passwd_hash, nonce])
    }
}
