//! KNXnet/IP protocol constants and identifier enums.

/// KNXnet/IP protocol version 1.0.
pub const KNXNETIP_VERSION_10: u8 = 0x10;

/// Standard KNXnet/IP header length (6 octets).
pub const HEADER_SIZE_10: u8 = 0x06;

/// Standard UDP/TCP port for KNXnet/IP communication.
pub const KNXNETIP_DEFAULT_PORT: u16 = 3671;

/// KNXnet/IP multicast address for routing and discovery.
pub const KNXNETIP_MULTICAST_ADDR: [u8; 4] = [224, 0, 23, 12];

/// Default TTL for routing multicast.
pub const ROUTING_TTL: u8 = 16;

// =============================================================================
// Service Type Identifiers
// =============================================================================

/// KNXnet/IP service type identifiers.
///
/// The 16-bit code partitions frames into families: Core (0x02xx),
/// Device Management (0x03xx), Tunneling (0x04xx), Routing (0x05xx) and
/// Secure (0x09xx). The service type fixes the grammar of the frame body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum ServiceType {
    // Core services (0x02xx)
    /// `SEARCH_REQUEST` - device discovery request
    SearchRequest = 0x0201,
    /// `SEARCH_RESPONSE` - device discovery response
    SearchResponse = 0x0202,
    /// `DESCRIPTION_REQUEST` - device self-description request
    DescriptionRequest = 0x0203,
    /// `DESCRIPTION_RESPONSE` - device self-description response
    DescriptionResponse = 0x0204,
    /// `CONNECT_REQUEST`
    ConnectRequest = 0x0205,
    /// `CONNECT_RESPONSE`
    ConnectResponse = 0x0206,
    /// `CONNECTIONSTATE_REQUEST` - heartbeat
    ConnectionStateRequest = 0x0207,
    /// `CONNECTIONSTATE_RESPONSE`
    ConnectionStateResponse = 0x0208,
    /// `DISCONNECT_REQUEST`
    DisconnectRequest = 0x0209,
    /// `DISCONNECT_RESPONSE`
    DisconnectResponse = 0x020A,
    /// `SEARCH_REQUEST_EXTENDED` - discovery with SRP filters
    SearchRequestExtended = 0x020B,
    /// `SEARCH_RESPONSE_EXTENDED`
    SearchResponseExtended = 0x020C,

    // Device Management (0x03xx)
    /// `DEVICE_CONFIGURATION_REQUEST`
    DeviceConfigurationRequest = 0x0310,
    /// `DEVICE_CONFIGURATION_ACK`
    DeviceConfigurationAck = 0x0311,

    // Tunneling (0x04xx)
    /// `TUNNELING_REQUEST`
    TunnelingRequest = 0x0420,
    /// `TUNNELING_ACK`
    TunnelingAck = 0x0421,

    // Routing (0x05xx)
    /// `ROUTING_INDICATION` - multicast telegram distribution
    RoutingIndication = 0x0530,
    /// `ROUTING_LOST_MESSAGE` - router dropped telegrams
    RoutingLostMessage = 0x0531,
    /// `ROUTING_BUSY` - flow control
    RoutingBusy = 0x0532,

    // Secure services (0x09xx)
    /// `SECURE_WRAPPER` - authenticated, encrypted envelope
    SecureWrapper = 0x0950,
    /// `SESSION_REQUEST`
    SessionRequest = 0x0951,
    /// `SESSION_RESPONSE`
    SessionResponse = 0x0952,
    /// `SESSION_AUTHENTICATE`
    SessionAuthenticate = 0x0953,
    /// `SESSION_STATUS`
    SessionStatus = 0x0954,
    /// `TIMER_NOTIFY` - secure routing timer synchronization
    TimerNotify = 0x0955,
}

impl ServiceType {
    /// Convert a raw u16 to a `ServiceType`.
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0201 => Some(Self::SearchRequest),
            0x0202 => Some(Self::SearchResponse),
            0x0203 => Some(Self::DescriptionRequest),
            0x0204 => Some(Self::DescriptionResponse),
            0x0205 => Some(Self::ConnectRequest),
            0x0206 => Some(Self::ConnectResponse),
            0x0207 => Some(Self::ConnectionStateRequest),
            0x0208 => Some(Self::ConnectionStateResponse),
            0x0209 => Some(Self::DisconnectRequest),
            0x020A => Some(Self::DisconnectResponse),
            0x020B => Some(Self::SearchRequestExtended),
            0x020C => Some(Self::SearchResponseExtended),
            0x0310 => Some(Self::DeviceConfigurationRequest),
            0x0311 => Some(Self::DeviceConfigurationAck),
            0x0420 => Some(Self::TunnelingRequest),
            0x0421 => Some(Self::TunnelingAck),
            0x0530 => Some(Self::RoutingIndication),
            0x0531 => Some(Self::RoutingLostMessage),
            0x0532 => Some(Self::RoutingBusy),
            0x0950 => Some(Self::SecureWrapper),
            0x0951 => Some(Self::SessionRequest),
            0x0952 => Some(Self::SessionResponse),
            0x0953 => Some(Self::SessionAuthenticate),
            0x0954 => Some(Self::SessionStatus),
            0x0955 => Some(Self::TimerNotify),
            _ => None,
        }
    }

    /// Convert to the raw u16 wire value.
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Whether this service belongs to the secure family.
    pub const fn is_secure(self) -> bool {
        matches!(
            self,
            Self::SecureWrapper
                | Self::SessionRequest
                | Self::SessionResponse
                | Self::SessionAuthenticate
                | Self::SessionStatus
                | Self::TimerNotify
        )
    }
}

// =============================================================================
// Connection Type Codes
// =============================================================================

/// Connection types carried in a CRI/CRD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConnectionType {
    /// Data connection for configuring a KNXnet/IP device.
    DeviceManagement = 0x03,
    /// Data connection for forwarding single KNX telegrams.
    Tunnel = 0x04,
    /// Data connection for configuration and data transfer with an
    /// object server.
    ObjectServer = 0x08,
}

impl ConnectionType {
    /// Convert a raw code octet.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x03 => Some(Self::DeviceManagement),
            0x04 => Some(Self::Tunnel),
            0x08 => Some(Self::ObjectServer),
            _ => None,
        }
    }

    /// Convert to the raw code octet.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Tunneling layer selector inside a tunnel CRI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TunnelLayer {
    /// Link layer tunnel (cEMI `L_Data`).
    #[default]
    LinkLayer = 0x02,
    /// Raw tunnel.
    Raw = 0x04,
    /// Busmonitor tunnel.
    Busmonitor = 0x80,
}

impl TunnelLayer {
    /// Convert a raw layer octet.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::LinkLayer),
            0x04 => Some(Self::Raw),
            0x80 => Some(Self::Busmonitor),
            _ => None,
        }
    }
}

// =============================================================================
// Host Protocol Codes
// =============================================================================

/// IPv4 UDP host protocol code.
pub const IPV4_UDP: u8 = 0x01;

/// IPv4 TCP host protocol code.
pub const IPV4_TCP: u8 = 0x02;

// =============================================================================
// Status / Error Codes
// =============================================================================

/// Operation successful.
pub const E_NO_ERROR: u8 = 0x00;

/// Requested host protocol not supported.
pub const E_HOST_PROTOCOL_TYPE: u8 = 0x01;

/// Requested protocol version not supported.
pub const E_VERSION_NOT_SUPPORTED: u8 = 0x02;

/// Received sequence number out of order.
pub const E_SEQUENCE_NUMBER: u8 = 0x04;

/// Requested connection type not supported.
pub const E_CONNECTION_TYPE: u8 = 0x22;

/// Requested connection option not supported.
pub const E_CONNECTION_OPTION: u8 = 0x23;

/// No more free connections on the server.
pub const E_NO_MORE_CONNECTIONS: u8 = 0x24;

/// Data connection error.
pub const E_DATA_CONNECTION: u8 = 0x26;

/// KNX subnetwork connection error.
pub const E_KNX_CONNECTION: u8 = 0x27;

/// Requested tunneling layer not supported.
pub const E_TUNNELING_LAYER: u8 = 0x29;

// =============================================================================
// cEMI Message Codes
// =============================================================================

/// cEMI link-layer message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CemiMessageCode {
    /// `L_Raw.req`
    LRawReq = 0x10,
    /// `L_Data.req`
    LDataReq = 0x11,
    /// `L_Poll_Data.req`
    LPollDataReq = 0x13,
    /// `L_Poll_Data.con`
    LPollDataCon = 0x25,
    /// `L_Data.ind`
    LDataInd = 0x29,
    /// `L_Busmon.ind`
    LBusmonInd = 0x2B,
    /// `L_Raw.ind`
    LRawInd = 0x2D,
    /// `L_Data.con`
    LDataCon = 0x2E,
    /// `L_Raw.con`
    LRawCon = 0x2F,
}

impl CemiMessageCode {
    /// Convert a raw message-code octet.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x10 => Some(Self::LRawReq),
            0x11 => Some(Self::LDataReq),
            0x13 => Some(Self::LPollDataReq),
            0x25 => Some(Self::LPollDataCon),
            0x29 => Some(Self::LDataInd),
            0x2B => Some(Self::LBusmonInd),
            0x2D => Some(Self::LRawInd),
            0x2E => Some(Self::LDataCon),
            0x2F => Some(Self::LRawCon),
            _ => None,
        }
    }

    /// Convert to the raw message-code octet.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// KNX Priority
// =============================================================================

/// KNX telegram priority, bits 3-2 of control field 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    /// System priority.
    System = 0b00,
    /// Normal priority (default).
    #[default]
    Normal = 0b01,
    /// Urgent priority.
    Urgent = 0b10,
    /// Low priority.
    Low = 0b11,
}

impl Priority {
    /// Convert the low two bits of `value`.
    pub const fn from_u8(value: u8) -> Self {
        match value & 0b11 {
            0b00 => Self::System,
            0b01 => Self::Normal,
            0b10 => Self::Urgent,
            _ => Self::Low,
        }
    }

    /// Convert to the raw two-bit value.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

// =============================================================================
// Secure Session
// =============================================================================

/// Secure session status codes carried in `SESSION_STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SessionStatusCode {
    /// User authenticated successfully.
    AuthenticationSuccess = 0x00,
    /// Credentials rejected.
    AuthenticationFailed = 0x01,
    /// Frame received before authentication completed.
    Unauthenticated = 0x02,
    /// Session timed out on the peer.
    Timeout = 0x03,
    /// Orderly session close.
    Close = 0x04,
    /// Keep-alive; resets the peer's session timeout.
    KeepAlive = 0x05,
}

impl SessionStatusCode {
    /// Convert a raw status octet.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::AuthenticationSuccess),
            0x01 => Some(Self::AuthenticationFailed),
            0x02 => Some(Self::Unauthenticated),
            0x03 => Some(Self::Timeout),
            0x04 => Some(Self::Close),
            0x05 => Some(Self::KeepAlive),
            _ => None,
        }
    }

    /// Convert to the raw status octet.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Reserved management user id for secure sessions.
pub const SECURE_USER_MANAGEMENT: u8 = 0x01;

/// Highest assignable secure user id.
pub const SECURE_USER_MAX: u8 = 0x7F;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_type_round_trip() {
        for raw in [
            0x0201u16, 0x0202, 0x0203, 0x0204, 0x0205, 0x0206, 0x0207, 0x0208, 0x0209, 0x020A,
            0x020B, 0x020C, 0x0310, 0x0311, 0x0420, 0x0421, 0x0530, 0x0531, 0x0532, 0x0950,
            0x0951, 0x0952, 0x0953, 0x0954, 0x0955,
        ] {
            let st = ServiceType::from_u16(raw).unwrap();
            assert_eq!(st.to_u16(), raw);
        }
        assert!(ServiceType::from_u16(0x0740).is_none());
    }

    #[test]
    fn secure_family_classification() {
        assert!(ServiceType::SecureWrapper.is_secure());
        assert!(ServiceType::TimerNotify.is_secure());
        assert!(!ServiceType::TunnelingRequest.is_secure());
    }

    #[test]
    fn priority_masks_to_two_bits() {
        assert_eq!(Priority::from_u8(0b1110), Priority::Urgent);
        assert_eq!(Priority::from_u8(0b01), Priority::Normal);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn session_status_codes() {
        assert_eq!(SessionStatusCode::Close.to_u8(), 0x04);
        assert_eq!(SessionStatusCode::from_u8(0x05), Some(SessionStatusCode::KeepAlive));
        assert_eq!(SessionStatusCode::from_u8(0x06), None);
    }
}
