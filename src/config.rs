//! Endpoint timing configuration.
//!
//! All protocol deadlines in one place, with the standard defaults. Every
//! value is configurable; the drivers read them, the state machine itself
//! never touches a clock.

use embassy_time::Duration;

/// Timeouts and intervals for one endpoint connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// CONNECT_RESPONSE deadline.
    pub connect_timeout: Duration,
    /// CONNECTIONSTATE_REQUEST cadence.
    pub heartbeat_interval: Duration,
    /// CONNECTIONSTATE_RESPONSE deadline.
    pub heartbeat_timeout: Duration,
    /// TUNNELING_ACK deadline.
    pub tunneling_ack_timeout: Duration,
    /// DEVICE_CONFIGURATION_ACK deadline.
    pub configuration_ack_timeout: Duration,
    /// DISCONNECT_RESPONSE deadline.
    pub disconnect_timeout: Duration,
    /// SEARCH_RESPONSE collection window.
    pub search_timeout: Duration,
}

impl ConnectionConfig {
    /// The defaults prescribed by the protocol.
    pub const fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(10),
            tunneling_ack_timeout: Duration::from_secs(1),
            configuration_ack_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(10),
            search_timeout: Duration::from_secs(3),
        }
    }

    /// Override the connect deadline.
    pub const fn with_connect_timeout(mut self, value: Duration) -> Self {
        self.connect_timeout = value;
        self
    }

    /// Override the heartbeat cadence.
    pub const fn with_heartbeat_interval(mut self, value: Duration) -> Self {
        self.heartbeat_interval = value;
        self
    }

    /// Override the heartbeat response deadline.
    pub const fn with_heartbeat_timeout(mut self, value: Duration) -> Self {
        self.heartbeat_timeout = value;
        self
    }

    /// Override the tunneling ack deadline.
    pub const fn with_tunneling_ack_timeout(mut self, value: Duration) -> Self {
        self.tunneling_ack_timeout = value;
        self
    }

    /// Override the device configuration ack deadline.
    pub const fn with_configuration_ack_timeout(mut self, value: Duration) -> Self {
        self.configuration_ack_timeout = value;
        self
    }

    /// Override the disconnect deadline.
    pub const fn with_disconnect_timeout(mut self, value: Duration) -> Self {
        self.disconnect_timeout = value;
        self
    }

    /// Override the search collection window.
    pub const fn with_search_timeout(mut self, value: Duration) -> Self {
        self.search_timeout = value;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}
