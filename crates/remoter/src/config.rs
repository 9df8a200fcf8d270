//! Process-level settings for the session server and for peer clients.

use std::time::Duration;

use crate::handles::InstanceId;
use crate::handles::PeerId;

pub const DEFAULT_PORT: u16 = 8080;

/// How long an idle dispatcher waits before polling again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `host:port`, suitable for binding a listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Join this instance instead of creating one.
    pub instance: Option<InstanceId>,
    /// Resume as this peer instead of registering a new one. Only honoured
    /// together with `instance`.
    pub peer: Option<PeerId>,
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            instance: None,
            peer: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn instance(mut self, instance: Option<InstanceId>) -> Self {
        self.instance = instance;
        self
    }

    #[must_use]
    pub const fn peer(mut self, peer: Option<PeerId>) -> Self {
        self.peer = peer;
        self
    }

    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(ServerConfig::default().bind_addr(), "0.0.0.0:8080");
        assert_eq!(ClientConfig::default().base_url(), "http://localhost:8080");
        assert_eq!(ClientConfig::default().poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_setters_chain() {
        let config = ClientConfig::default()
            .host("example.org")
            .port(9000)
            .instance(Some(InstanceId(3)))
            .peer(Some(PeerId(1234)));
        assert_eq!(config.base_url(), "http://example.org:9000");
        assert_eq!(config.instance, Some(InstanceId(3)));
        assert_eq!(config.peer, Some(PeerId(1234)));
    }
}
