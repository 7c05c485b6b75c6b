use std::{fmt, time::Duration};

use crate::error::AceError;

/// Timeout applied when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Largest single frame, and largest reassembled reply, accepted from the
/// server.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Everything needed to open a connection.
///
/// A zero `timeout` never times out. A non-zero one bounds each blocking
/// socket read or write separately.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub userid: String,
    pub passwd: String,
    pub timeout: Duration,
    pub max_frame_len: usize,
}

impl ConnectionConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        userid: impl Into<String>,
        passwd: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            userid: userid.into(),
            passwd: passwd.into(),
            timeout: DEFAULT_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Per-call socket timeout, `None` meaning block forever.
    pub fn socket_timeout(&self) -> Option<Duration> {
        socket_timeout(self.timeout)
    }

    pub fn validate(&self) -> Result<(), AceError> {
        if self.host.trim().is_empty() {
            return Err(AceError::BadArgs(String::from("server host is empty")));
        }
        if self.port == 0 {
            return Err(AceError::BadArgs(String::from("server port must be non-zero")));
        }
        if self.userid.is_empty() || self.userid.chars().any(char::is_whitespace) {
            return Err(AceError::BadArgs(String::from(
                "userid must be a single non-empty word",
            )));
        }
        if self.max_frame_len == 0 {
            return Err(AceError::BadArgs(String::from(
                "maximum frame length must be non-zero",
            )));
        }
        Ok(())
    }
}

pub(crate) fn socket_timeout(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("userid", &self.userid)
            .field("passwd", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("max_frame_len", &self.max_frame_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Status;

    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::new("localhost", 23100, "anonymous", "");

        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert_eq!(config.socket_timeout(), Some(DEFAULT_TIMEOUT));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeout_blocks_forever() {
        let config =
            ConnectionConfig::new("localhost", 23100, "anonymous", "").with_timeout(Duration::ZERO);

        assert_eq!(config.socket_timeout(), None);
    }

    #[test]
    fn rejects_bad_arguments() {
        let cases = [
            ConnectionConfig::new("", 23100, "anonymous", ""),
            ConnectionConfig::new("localhost", 0, "anonymous", ""),
            ConnectionConfig::new("localhost", 23100, "", ""),
            ConnectionConfig::new("localhost", 23100, "two words", ""),
            ConnectionConfig::new("localhost", 23100, "anonymous", "").with_max_frame_len(0),
        ];

        for config in cases {
            assert_eq!(config.validate().unwrap_err().status(), Status::BadArgs);
        }
    }

    #[test]
    fn debug_hides_password() {
        let config = ConnectionConfig::new("localhost", 23100, "anonymous", "hunter2");

        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
