//! Blocking client for the acedb socket server.
//!
//! Open a [`Connection`] from a [`ConnectionConfig`], send textual requests
//! and read back whole replies. The wire format lives in [`protocol`].
pub mod auth;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;

pub use auth::{CredentialHasher, Md5Hasher};
pub use cli::{Command, prompt};
pub use config::ConnectionConfig;
pub use connection::{ConnState, Connection, HandshakeStep};
pub use error::{AceError, Status};
pub use protocol::{Reply, RequestKind};

/// Version of this client library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
