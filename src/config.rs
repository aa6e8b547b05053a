use std::time::Duration;

/// How long `connect()` waits for the transport to open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a stopping transport waits for the close handshake.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Settings for one Colibri channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// URL of the bridge's Colibri WebSocket, as handed out by the bridge.
    pub channel_address: String,
    /// Identity of this endpoint in the conference. Kept for callers and
    /// logging; no message of the handshake carries it.
    pub endpoint_id: String,
    pub connect_timeout: Duration,
    pub close_grace: Duration,
}

impl ClientConfig {
    pub fn new(channel_address: impl Into<String>, endpoint_id: impl Into<String>) -> Self {
        Self {
            channel_address: channel_address.into(),
            endpoint_id: endpoint_id.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Whether a connect attempt can be made at all.
    pub fn has_address(&self) -> bool {
        !self.channel_address.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::new("wss://example.test/colibri-ws/abc", "ep1");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.close_grace, DEFAULT_CLOSE_GRACE);
        assert!(config.has_address());
    }

    #[test]
    fn blank_address_is_not_usable() {
        assert!(!ClientConfig::new("", "ep1").has_address());
        assert!(!ClientConfig::new("   ", "ep1").has_address());
    }
}
