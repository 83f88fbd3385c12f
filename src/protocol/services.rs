//! KNXnet/IP service frame builders and parsers.
//!
//! One thin, stateless typed view per service on top of the generic
//! [`Frame`]: builders assemble the body and delegate header bookkeeping to
//! [`Frame::from_body`], parsers read a received body back into fields.
//! Nothing here owns protocol state; the connection machinery composes
//! these.
//!
//! ## Protocol Flow
//!
//! ```text
//! Client                          Gateway
//!   |                                |
//!   |------- CONNECT_REQUEST ------->|
//!   |<------ CONNECT_RESPONSE -------|
//!   |                                |
//!   |------ TUNNELING_REQUEST ------>|
//!   |<------ TUNNELING_ACK ----------|
//!   |                                |
//!   |--- CONNECTIONSTATE_REQUEST --->|  (every 60s)
//!   |<-- CONNECTIONSTATE_RESPONSE ---|
//!   |                                |
//!   |------ DISCONNECT_REQUEST ----->|
//!   |<----- DISCONNECT_RESPONSE -----|
//! ```

use crate::bytes::ByteStore;
use crate::error::{KnxError, Result};
use crate::protocol::constants::{ServiceType, E_NO_ERROR};
use crate::protocol::frame::Frame;
use crate::protocol::structures::{Cri, Crd, DeviceDib, Dib, Hpai, ServiceFamiliesDib, Srp};
use heapless::Vec;

/// Maximum cEMI payload embedded in a tunneling or configuration request.
pub const MAX_EMBEDDED_CEMI: usize = 128;

/// Maximum SRPs in an extended search request.
pub const MAX_SRPS: usize = 4;

/// Maximum DIBs parsed out of one (extended) response.
pub const MAX_DIBS: usize = 6;

// =============================================================================
// Connection header
// =============================================================================

/// Connection header prefixed to data-channel frames (4 octets): structure
/// length, channel id, sequence counter, and a fourth octet that is
/// reserved in requests but carries the status in acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionHeader {
    /// Channel id assigned by the server.
    pub channel_id: u8,
    /// Sequence counter, wrapping at 256.
    pub sequence: u8,
    /// Reserved (requests) or status (acknowledgements).
    pub status: u8,
}

impl ConnectionHeader {
    /// Size on the wire.
    pub const SIZE: usize = 4;

    /// Header for a request (fourth octet reserved).
    pub const fn request(channel_id: u8, sequence: u8) -> Self {
        Self {
            channel_id,
            sequence,
            status: 0x00,
        }
    }

    /// Header for an acknowledgement carrying `status`.
    pub const fn ack(channel_id: u8, sequence: u8, status: u8) -> Self {
        Self {
            channel_id,
            sequence,
            status,
        }
    }

    /// Parse from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::structure_truncated());
        }
        if data[0] as usize != Self::SIZE {
            return Err(KnxError::length_mismatch());
        }
        Ok(Self {
            channel_id: data[1],
            sequence: data[2],
            status: data[3],
        })
    }

    /// Append the four header octets to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        out.push_u8(Self::SIZE as u8)?;
        out.push_u8(self.channel_id)?;
        out.push_u8(self.sequence)?;
        out.push_u8(self.status)
    }
}

// =============================================================================
// CONNECT
// =============================================================================

/// `CONNECT_REQUEST` (0x0205): control HPAI, data HPAI, CRI.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectRequest {
    /// Control endpoint for connection management replies.
    pub control_endpoint: Hpai,
    /// Data endpoint for the channel's payload traffic.
    pub data_endpoint: Hpai,
    /// Requested connection type and options.
    pub cri: Cri,
}

impl ConnectRequest {
    /// Tunnel connect request in NAT form.
    pub fn tunnel() -> Self {
        Self {
            control_endpoint: Hpai::nat(),
            data_endpoint: Hpai::nat(),
            cri: Cri::tunnel_link_layer(),
        }
    }

    /// Device management connect request in NAT form.
    pub fn device_management() -> Self {
        Self {
            control_endpoint: Hpai::nat(),
            data_endpoint: Hpai::nat(),
            cri: Cri::DeviceManagement,
        }
    }

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        self.control_endpoint.encode(&mut body)?;
        self.data_endpoint.encode(&mut body)?;
        self.cri.encode(&mut body)?;
        Frame::from_body(ServiceType::ConnectRequest, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let control_endpoint = Hpai::parse(body)?;
        let data_endpoint =
            Hpai::parse(body.get(Hpai::SIZE..).ok_or_else(KnxError::structure_truncated)?)?;
        let cri = Cri::parse(body.get(2 * Hpai::SIZE..).ok_or_else(KnxError::structure_truncated)?)?;
        Ok(Self {
            control_endpoint,
            data_endpoint,
            cri,
        })
    }
}

/// `CONNECT_RESPONSE` (0x0206): channel, status, data HPAI, CRD.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectResponse {
    /// Channel id assigned by the server.
    pub channel_id: u8,
    /// Status code; 0 = accepted.
    pub status: u8,
    /// Server's data endpoint for this channel.
    pub data_endpoint: Hpai,
    /// Connection response data.
    pub crd: Crd,
}

impl ConnectResponse {
    /// Parse from a frame body.
    ///
    /// A refused connect may legally stop after the status octet; the data
    /// endpoint then degenerates to the NAT form.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(KnxError::structure_truncated());
        }
        let channel_id = body[0];
        let status = body[1];
        if status != E_NO_ERROR && body.len() < 2 + Hpai::SIZE {
            return Ok(Self {
                channel_id,
                status,
                data_endpoint: Hpai::nat(),
                crd: Crd::DeviceManagement,
            });
        }
        let data_endpoint = Hpai::parse(&body[2..])?;
        let crd = Crd::parse(
            body.get(2 + Hpai::SIZE..)
                .ok_or_else(KnxError::structure_truncated)?,
        )?;
        Ok(Self {
            channel_id,
            status,
            data_endpoint,
            crd,
        })
    }

    /// Build the frame (used by the test fixtures playing the server).
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        body.push_u8(self.channel_id)?;
        body.push_u8(self.status)?;
        self.data_endpoint.encode(&mut body)?;
        self.crd.encode(&mut body)?;
        Frame::from_body(ServiceType::ConnectResponse, body.as_slice())
    }

    /// Whether the server accepted the connection.
    pub const fn is_ok(&self) -> bool {
        self.status == E_NO_ERROR
    }
}

// =============================================================================
// CONNECTIONSTATE / DISCONNECT
// =============================================================================

macro_rules! channel_control_request {
    ($(#[$doc:meta])* $name:ident, $service:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub struct $name {
            /// Channel the request refers to.
            pub channel_id: u8,
            /// Client control endpoint.
            pub control_endpoint: Hpai,
        }

        impl $name {
            /// Create a request for `channel_id`.
            pub const fn new(channel_id: u8, control_endpoint: Hpai) -> Self {
                Self {
                    channel_id,
                    control_endpoint,
                }
            }

            /// Build the frame: channel id, reserved octet, control HPAI.
            pub fn build(&self) -> Result<Frame> {
                let mut body = ByteStore::new();
                body.push_u8(self.channel_id)?;
                body.push_u8(0x00)?;
                self.control_endpoint.encode(&mut body)?;
                Frame::from_body($service, body.as_slice())
            }

            /// Parse from a frame body.
            pub fn parse(body: &[u8]) -> Result<Self> {
                if body.len() < 2 + Hpai::SIZE {
                    return Err(KnxError::structure_truncated());
                }
                Ok(Self {
                    channel_id: body[0],
                    control_endpoint: Hpai::parse(&body[2..])?,
                })
            }
        }
    };
}

macro_rules! channel_control_response {
    ($(#[$doc:meta])* $name:ident, $service:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub struct $name {
            /// Channel the response refers to.
            pub channel_id: u8,
            /// Status code; 0 = OK.
            pub status: u8,
        }

        impl $name {
            /// Create a response for `channel_id`.
            pub const fn new(channel_id: u8, status: u8) -> Self {
                Self { channel_id, status }
            }

            /// Build the frame: channel id, status octet.
            pub fn build(&self) -> Result<Frame> {
                Frame::from_body($service, &[self.channel_id, self.status])
            }

            /// Parse from a frame body.
            pub fn parse(body: &[u8]) -> Result<Self> {
                if body.len() < 2 {
                    return Err(KnxError::structure_truncated());
                }
                Ok(Self {
                    channel_id: body[0],
                    status: body[1],
                })
            }

            /// Whether the peer reported success.
            pub const fn is_ok(&self) -> bool {
                self.status == E_NO_ERROR
            }
        }
    };
}

channel_control_request!(
    /// `CONNECTIONSTATE_REQUEST` (0x0207), the heartbeat.
    ConnectionStateRequest,
    ServiceType::ConnectionStateRequest
);
channel_control_response!(
    /// `CONNECTIONSTATE_RESPONSE` (0x0208).
    ConnectionStateResponse,
    ServiceType::ConnectionStateResponse
);
channel_control_request!(
    /// `DISCONNECT_REQUEST` (0x0209).
    DisconnectRequest,
    ServiceType::DisconnectRequest
);
channel_control_response!(
    /// `DISCONNECT_RESPONSE` (0x020A).
    DisconnectResponse,
    ServiceType::DisconnectResponse
);

// =============================================================================
// TUNNELING / DEVICE CONFIGURATION
// =============================================================================

/// A data-channel request (`TUNNELING_REQUEST` 0x0420 or
/// `DEVICE_CONFIGURATION_REQUEST` 0x0310): connection header plus an
/// embedded cEMI frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataRequest {
    /// Which of the two data services this is.
    pub service: ServiceType,
    /// Channel id.
    pub channel_id: u8,
    /// Send sequence counter.
    pub sequence: u8,
    /// Embedded cEMI frame.
    pub cemi: Vec<u8, MAX_EMBEDDED_CEMI>,
}

impl DataRequest {
    /// A tunneling request.
    pub fn tunneling(channel_id: u8, sequence: u8, cemi: &[u8]) -> Result<Self> {
        Self::new(ServiceType::TunnelingRequest, channel_id, sequence, cemi)
    }

    /// A device configuration request.
    pub fn configuration(channel_id: u8, sequence: u8, cemi: &[u8]) -> Result<Self> {
        Self::new(
            ServiceType::DeviceConfigurationRequest,
            channel_id,
            sequence,
            cemi,
        )
    }

    fn new(service: ServiceType, channel_id: u8, sequence: u8, cemi: &[u8]) -> Result<Self> {
        if !matches!(
            service,
            ServiceType::TunnelingRequest | ServiceType::DeviceConfigurationRequest
        ) {
            return Err(KnxError::unexpected_service_type());
        }
        Ok(Self {
            service,
            channel_id,
            sequence,
            cemi: Vec::from_slice(cemi).map_err(|_| KnxError::out_of_resource())?,
        })
    }

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        ConnectionHeader::request(self.channel_id, self.sequence).encode(&mut body)?;
        body.push_slice(&self.cemi)?;
        Frame::from_body(self.service, body.as_slice())
    }

    /// Parse from a frame body (the service type comes from the header).
    pub fn parse(service: ServiceType, body: &[u8]) -> Result<Self> {
        let header = ConnectionHeader::parse(body)?;
        Self::new(service, header.channel_id, header.sequence, &body[ConnectionHeader::SIZE..])
    }
}

/// A data-channel acknowledgement (`TUNNELING_ACK` 0x0421 or
/// `DEVICE_CONFIGURATION_ACK` 0x0311): the 4-octet connection header with
/// the status in its last octet. Total frame size is 10 octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataAck {
    /// Which of the two ack services this is.
    pub service: ServiceType,
    /// Channel id.
    pub channel_id: u8,
    /// Acknowledged sequence counter.
    pub sequence: u8,
    /// Status code; 0 = OK.
    pub status: u8,
}

impl DataAck {
    /// A tunneling ack.
    pub const fn tunneling(channel_id: u8, sequence: u8, status: u8) -> Self {
        Self {
            service: ServiceType::TunnelingAck,
            channel_id,
            sequence,
            status,
        }
    }

    /// A device configuration ack.
    pub const fn configuration(channel_id: u8, sequence: u8, status: u8) -> Self {
        Self {
            service: ServiceType::DeviceConfigurationAck,
            channel_id,
            sequence,
            status,
        }
    }

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        ConnectionHeader::ack(self.channel_id, self.sequence, self.status).encode(&mut body)?;
        Frame::from_body(self.service, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(service: ServiceType, body: &[u8]) -> Result<Self> {
        if !matches!(
            service,
            ServiceType::TunnelingAck | ServiceType::DeviceConfigurationAck
        ) {
            return Err(KnxError::unexpected_service_type());
        }
        let header = ConnectionHeader::parse(body)?;
        Ok(Self {
            service,
            channel_id: header.channel_id,
            sequence: header.sequence,
            status: header.status,
        })
    }

    /// Whether the peer accepted the request.
    pub const fn is_ok(&self) -> bool {
        self.status == E_NO_ERROR
    }
}

// =============================================================================
// ROUTING
// =============================================================================

/// `ROUTING_INDICATION` (0x0530): a bare cEMI frame on the multicast group.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoutingIndication {
    /// The multicast cEMI frame.
    pub cemi: Vec<u8, MAX_EMBEDDED_CEMI>,
}

impl RoutingIndication {
    /// Wrap a cEMI frame.
    pub fn new(cemi: &[u8]) -> Result<Self> {
        Ok(Self {
            cemi: Vec::from_slice(cemi).map_err(|_| KnxError::out_of_resource())?,
        })
    }

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        Frame::from_body(ServiceType::RoutingIndication, &self.cemi)
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        Self::new(body)
    }
}

/// `ROUTING_BUSY` (0x0532): flow control from an overloaded router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoutingBusy {
    /// Router device state.
    pub device_state: u8,
    /// Requested send pause in milliseconds.
    pub wait_time_ms: u16,
    /// Busy control field; non-zero scopes the pause to a device class.
    pub control: u16,
}

impl RoutingBusy {
    const STRUCT_SIZE: u8 = 6;

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        body.push_u8(Self::STRUCT_SIZE)?;
        body.push_u8(self.device_state)?;
        body.push_u16(self.wait_time_ms)?;
        body.push_u16(self.control)?;
        Frame::from_body(ServiceType::RoutingBusy, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < Self::STRUCT_SIZE as usize || body[0] != Self::STRUCT_SIZE {
            return Err(KnxError::structure_truncated());
        }
        Ok(Self {
            device_state: body[1],
            wait_time_ms: u16::from_be_bytes([body[2], body[3]]),
            control: u16::from_be_bytes([body[4], body[5]]),
        })
    }
}

/// `ROUTING_LOST_MESSAGE` (0x0531): the router dropped telegrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RoutingLostMessage {
    /// Router device state.
    pub device_state: u8,
    /// Number of telegrams lost since the last report.
    pub lost_count: u16,
}

impl RoutingLostMessage {
    const STRUCT_SIZE: u8 = 4;

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        body.push_u8(Self::STRUCT_SIZE)?;
        body.push_u8(self.device_state)?;
        body.push_u16(self.lost_count)?;
        Frame::from_body(ServiceType::RoutingLostMessage, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < Self::STRUCT_SIZE as usize || body[0] != Self::STRUCT_SIZE {
            return Err(KnxError::structure_truncated());
        }
        Ok(Self {
            device_state: body[1],
            lost_count: u16::from_be_bytes([body[2], body[3]]),
        })
    }
}

// =============================================================================
// SEARCH / DESCRIPTION
// =============================================================================

/// `SEARCH_REQUEST` (0x0201): the client's response HPAI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SearchRequest {
    /// Where the server should send its response.
    pub discovery_endpoint: Hpai,
}

impl SearchRequest {
    /// Create a search request.
    pub const fn new(discovery_endpoint: Hpai) -> Self {
        Self { discovery_endpoint }
    }

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        self.discovery_endpoint.encode(&mut body)?;
        Frame::from_body(ServiceType::SearchRequest, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(Self {
            discovery_endpoint: Hpai::parse(body)?,
        })
    }
}

/// `SEARCH_REQUEST_EXTENDED` (0x020B): response HPAI plus SRP filters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SearchRequestExtended {
    /// Where the server should send its response.
    pub discovery_endpoint: Hpai,
    /// Optional search parameters narrowing who answers and what they
    /// include.
    pub srps: Vec<Srp, MAX_SRPS>,
}

impl SearchRequestExtended {
    /// Create an extended search request without filters.
    pub fn new(discovery_endpoint: Hpai) -> Self {
        Self {
            discovery_endpoint,
            srps: Vec::new(),
        }
    }

    /// Add an SRP filter.
    pub fn with_srp(mut self, srp: Srp) -> Result<Self> {
        self.srps.push(srp).map_err(|_| KnxError::out_of_resource())?;
        Ok(self)
    }

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        self.discovery_endpoint.encode(&mut body)?;
        for srp in &self.srps {
            srp.encode(&mut body)?;
        }
        Frame::from_body(ServiceType::SearchRequestExtended, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let discovery_endpoint = Hpai::parse(body)?;
        let mut srps = Vec::new();
        let mut at = Hpai::SIZE;
        while at < body.len() {
            let (srp, used) = Srp::parse(&body[at..])?;
            srps.push(srp).map_err(|_| KnxError::out_of_resource())?;
            at += used;
        }
        Ok(Self {
            discovery_endpoint,
            srps,
        })
    }
}

/// A parsed `SEARCH_RESPONSE` (0x0202) or `SEARCH_RESPONSE_EXTENDED`
/// (0x020C): control HPAI plus DIBs. The classic response carries exactly
/// the device-hardware and supported-families blocks; the extended response
/// may carry more.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SearchResponse {
    /// Server control endpoint to connect to.
    pub control_endpoint: Hpai,
    /// Device hardware block.
    pub device: DeviceDib,
    /// Supported service families.
    pub families: ServiceFamiliesDib,
    /// Everything else the (extended) response carried.
    pub extra_dibs: Vec<Dib, MAX_DIBS>,
}

impl SearchResponse {
    /// Parse from a frame body; shared by both response services.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let control_endpoint = Hpai::parse(body)?;
        let mut device = None;
        let mut families = None;
        let mut extra_dibs = Vec::new();
        let mut at = Hpai::SIZE;
        while at < body.len() {
            let (dib, used) = Dib::parse(&body[at..])?;
            match dib {
                Dib::DeviceInfo(d) if device.is_none() => device = Some(d),
                Dib::ServiceFamilies(d) if families.is_none() => families = Some(d),
                other => extra_dibs
                    .push(other)
                    .map_err(|_| KnxError::out_of_resource())?,
            }
            at += used;
        }
        Ok(Self {
            control_endpoint,
            device: device.ok_or_else(KnxError::structure_truncated)?,
            families: families.ok_or_else(KnxError::structure_truncated)?,
            extra_dibs,
        })
    }

    /// Build a classic search response (test fixtures playing the server).
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        self.control_endpoint.encode(&mut body)?;
        self.device.encode(&mut body)?;
        self.families.encode(&mut body)?;
        for dib in &self.extra_dibs {
            dib.encode(&mut body)?;
        }
        Frame::from_body(ServiceType::SearchResponse, body.as_slice())
    }
}

/// `DESCRIPTION_REQUEST` (0x0203): the client's control HPAI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DescriptionRequest {
    /// Where the server should send the description.
    pub control_endpoint: Hpai,
}

impl DescriptionRequest {
    /// Create a description request.
    pub const fn new(control_endpoint: Hpai) -> Self {
        Self { control_endpoint }
    }

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        self.control_endpoint.encode(&mut body)?;
        Frame::from_body(ServiceType::DescriptionRequest, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        Ok(Self {
            control_endpoint: Hpai::parse(body)?,
        })
    }
}

/// A parsed `DESCRIPTION_RESPONSE` (0x0204): the server's DIBs without a
/// leading HPAI.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DescriptionResponse {
    /// Device hardware block.
    pub device: DeviceDib,
    /// Supported service families.
    pub families: ServiceFamiliesDib,
    /// Any further blocks.
    pub extra_dibs: Vec<Dib, MAX_DIBS>,
}

impl DescriptionResponse {
    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let mut device = None;
        let mut families = None;
        let mut extra_dibs = Vec::new();
        let mut at = 0;
        while at < body.len() {
            let (dib, used) = Dib::parse(&body[at..])?;
            match dib {
                Dib::DeviceInfo(d) if device.is_none() => device = Some(d),
                Dib::ServiceFamilies(d) if families.is_none() => families = Some(d),
                other => extra_dibs
                    .push(other)
                    .map_err(|_| KnxError::out_of_resource())?,
            }
            at += used;
        }
        Ok(Self {
            device: device.ok_or_else(KnxError::structure_truncated)?,
            families: families.ok_or_else(KnxError::structure_truncated)?,
            extra_dibs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Ipv4Addr;
    use crate::protocol::structures::{FamilyVersion, ServiceFamily};

    #[test]
    fn connect_request_round_trip() {
        let request = ConnectRequest::tunnel();
        let frame = request.build().unwrap();
        assert_eq!(frame.size(), 26);
        assert_eq!(frame.bytes()[0], 0x06);
        assert_eq!(
            u16::from_be_bytes([frame.bytes()[2], frame.bytes()[3]]),
            0x0205
        );
        let parsed = ConnectRequest::parse(frame.body()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn connect_response_round_trip() {
        let response = ConnectResponse {
            channel_id: 7,
            status: 0,
            data_endpoint: Hpai::udp(Ipv4Addr::new(192, 168, 1, 10), 3671),
            crd: Crd::Tunnel { address: 0x110A },
        };
        let frame = response.build().unwrap();
        let parsed = ConnectResponse::parse(frame.body()).unwrap();
        assert_eq!(parsed, response);
        assert!(parsed.is_ok());
    }

    #[test]
    fn refused_connect_response_may_be_short() {
        let parsed = ConnectResponse::parse(&[0x00, 0x24]).unwrap();
        assert!(!parsed.is_ok());
        assert_eq!(parsed.status, 0x24);
    }

    #[test]
    fn connectionstate_request_reference_bytes() {
        // channel 255, control HPAI UDP 127.0.0.1:3671
        let request = ConnectionStateRequest::new(
            255,
            Hpai::udp(Ipv4Addr::LOCALHOST, 3671),
        );
        let frame = request.build().unwrap();
        assert_eq!(
            frame.bytes(),
            &[
                0x06, 0x10, 0x02, 0x07, 0x00, 0x10, 0xFF, 0x00, 0x08, 0x01, 0x7F, 0x00, 0x00,
                0x01, 0x0E, 0x57
            ]
        );
        let parsed = ConnectionStateRequest::parse(frame.body()).unwrap();
        assert_eq!(parsed.channel_id, 255);
    }

    #[test]
    fn tunneling_ack_reference_bytes() {
        let ack = DataAck::tunneling(5, 3, 0);
        let frame = ack.build().unwrap();
        assert_eq!(
            frame.bytes(),
            &[0x06, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x05, 0x03, 0x00]
        );
        let parsed = DataAck::parse(ServiceType::TunnelingAck, frame.body()).unwrap();
        assert_eq!(parsed, ack);
        assert!(parsed.is_ok());
    }

    #[test]
    fn tunneling_request_round_trip() {
        let cemi = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x00, 0x00, 0x80];
        let request = DataRequest::tunneling(5, 0, &cemi).unwrap();
        let frame = request.build().unwrap();
        assert_eq!(frame.size(), 6 + 4 + cemi.len());
        let parsed = DataRequest::parse(ServiceType::TunnelingRequest, frame.body()).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.cemi.as_slice(), &cemi);
    }

    #[test]
    fn device_configuration_shares_the_shape() {
        let cemi = [0xFC, 0x00, 0x0B, 0x01, 0x34, 0x10, 0x00];
        let request = DataRequest::configuration(2, 9, &cemi).unwrap();
        let frame = request.build().unwrap();
        assert_eq!(
            u16::from_be_bytes([frame.bytes()[2], frame.bytes()[3]]),
            0x0310
        );
        let ack = DataAck::configuration(2, 9, 0).build().unwrap();
        assert_eq!(ack.size(), 10);
    }

    #[test]
    fn routing_busy_round_trip() {
        let busy = RoutingBusy {
            device_state: 0,
            wait_time_ms: 100,
            control: 0,
        };
        let frame = busy.build().unwrap();
        assert_eq!(frame.size(), 12);
        assert_eq!(RoutingBusy::parse(frame.body()).unwrap(), busy);
    }

    #[test]
    fn routing_lost_round_trip() {
        let lost = RoutingLostMessage {
            device_state: 1,
            lost_count: 17,
        };
        let frame = lost.build().unwrap();
        assert_eq!(frame.size(), 10);
        assert_eq!(RoutingLostMessage::parse(frame.body()).unwrap(), lost);
    }

    #[test]
    fn search_request_is_fourteen_octets() {
        let frame = SearchRequest::new(Hpai::udp(Ipv4Addr::new(192, 168, 1, 29), 52000))
            .build()
            .unwrap();
        assert_eq!(frame.size(), 14);
        assert_eq!(frame.bytes()[2..4], [0x02, 0x01]);
    }

    #[test]
    fn extended_search_with_srps_round_trips() {
        let request = SearchRequestExtended::new(Hpai::nat())
            .with_srp(Srp::programming_mode())
            .unwrap()
            .with_srp(Srp::service(ServiceFamily::IpTunneling, 1))
            .unwrap();
        let frame = request.build().unwrap();
        let parsed = SearchRequestExtended::parse(frame.body()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn search_response_round_trip() {
        let mut name = [0u8; 30];
        name[..4].copy_from_slice(b"ip-1");
        let mut families = ServiceFamiliesDib::default();
        families
            .families
            .push(FamilyVersion {
                family: ServiceFamily::Core as u8,
                version: 1,
            })
            .unwrap();
        let response = SearchResponse {
            control_endpoint: Hpai::udp(Ipv4Addr::new(192, 168, 1, 250), 3671),
            device: DeviceDib {
                medium: 0x20,
                status: 0,
                individual_address: 0x1100,
                project_installation_id: 0,
                serial_number: [0; 6],
                multicast_address: Ipv4Addr::new(224, 0, 23, 12),
                mac_address: [0; 6],
                friendly_name: name,
            },
            families,
            extra_dibs: Vec::new(),
        };
        let frame = response.build().unwrap();
        let parsed = SearchResponse::parse(frame.body()).unwrap();
        assert_eq!(parsed, response);
        assert_eq!(parsed.device.name(), b"ip-1");
    }

    #[test]
    fn description_request_and_response() {
        let request = DescriptionRequest::new(Hpai::nat());
        let frame = request.build().unwrap();
        assert_eq!(frame.size(), 14);
        assert_eq!(DescriptionRequest::parse(frame.body()).unwrap(), request);

        // A description response reuses the search-response DIB grammar,
        // minus the leading HPAI.
        let search = {
            let mut name = [0u8; 30];
            name[..4].copy_from_slice(b"ip-1");
            let mut families = ServiceFamiliesDib::default();
            families
                .families
                .push(FamilyVersion {
                    family: ServiceFamily::DeviceManagement as u8,
                    version: 1,
                })
                .unwrap();
            SearchResponse {
                control_endpoint: Hpai::nat(),
                device: DeviceDib {
                    medium: 0x20,
                    status: 0,
                    individual_address: 0x1100,
                    project_installation_id: 0,
                    serial_number: [0; 6],
                    multicast_address: Ipv4Addr::new(224, 0, 23, 12),
                    mac_address: [0; 6],
                    friendly_name: name,
                },
                families,
                extra_dibs: Vec::new(),
            }
        };
        let frame = search.build().unwrap();
        // Skip the HPAI: the remaining body is a valid description response.
        let parsed = DescriptionResponse::parse(&frame.body()[Hpai::SIZE..]).unwrap();
        assert_eq!(parsed.device, search.device);
        assert_eq!(
            parsed.families.version_of(ServiceFamily::DeviceManagement),
            Some(1)
        );
    }

    #[test]
    fn malformed_bodies_are_parse_errors() {
        assert!(ConnectResponse::parse(&[0x07]).is_err());
        assert!(DataAck::parse(ServiceType::TunnelingAck, &[0x04, 0x05]).is_err());
        assert!(DataAck::parse(ServiceType::ConnectRequest, &[0x04, 0x05, 0x00, 0x00]).is_err());
        assert!(SearchResponse::parse(&[0x08, 0x01, 0, 0, 0, 0, 0, 0]).is_err());
    }
}
