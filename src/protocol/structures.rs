//! Embedded KNXnet/IP structures: HPAI, CRI, CRD, DIB and SRP.
//!
//! Every embedded structure starts with a 2-octet header: one length octet
//! (covering the whole structure) and one code octet whose meaning depends
//! on which structure family the parent grammar expects at that position.
//!
//! Builders follow the collect-then-query contract: fields may be supplied
//! in any order, `create()` never fails, and `is_valid()` on the result
//! reports whether the assembled bytes match the structure's grammar. The
//! wire is round-trippable through corrupt payloads, so validity is a query,
//! not an exception; unknown codes are preserved verbatim for forward
//! compatibility.

use crate::bytes::ByteStore;
use crate::error::{KnxError, Result};
use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::constants::{ConnectionType, TunnelLayer, IPV4_TCP, IPV4_UDP};
use heapless::Vec;

/// Upper bound of service-family entries in one DIB.
const MAX_FAMILIES: usize = 8;

/// Upper bound of KNX individual addresses in one DIB.
const MAX_KNX_ADDRESSES: usize = 8;

/// Upper bound of requested DIB codes in one SRP.
const MAX_REQUESTED_DIBS: usize = 8;

// =============================================================================
// HPAI
// =============================================================================

/// Host protocol address information: endpoint descriptor for one side of a
/// connection (8 octets).
///
/// ```text
/// ┌──────────────┬──────────────┬─────────────────────┐
/// │ Structure Len│ Host Protocol│   IP Address        │
/// │   (1 byte)   │   (1 byte)   │   (4 bytes IPv4)    │
/// ├──────────────┴──────────────┴─────────────────────┤
/// │                Port (2 bytes)                      │
/// └────────────────────────────────────────────────────┘
/// ```
///
/// The all-zero address together with port 0 is the NAT traversal form: the
/// peer replies to the datagram's source address instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Hpai {
    /// Host protocol code, [`IPV4_UDP`] or [`IPV4_TCP`].
    pub protocol: u8,
    /// IPv4 host address.
    pub address: Ipv4Addr,
    /// Port number.
    pub port: u16,
}

impl Hpai {
    /// Structure size on the wire.
    pub const SIZE: usize = 8;

    /// UDP HPAI for the given endpoint.
    pub const fn udp(address: Ipv4Addr, port: u16) -> Self {
        Self {
            protocol: IPV4_UDP,
            address,
            port,
        }
    }

    /// TCP HPAI for the given endpoint.
    pub const fn tcp(address: Ipv4Addr, port: u16) -> Self {
        Self {
            protocol: IPV4_TCP,
            address,
            port,
        }
    }

    /// The NAT traversal form: UDP, 0.0.0.0:0.
    pub const fn nat() -> Self {
        Self::udp(Ipv4Addr::UNSPECIFIED, 0)
    }

    /// Builder collecting fields in any order.
    pub fn builder() -> HpaiBuilder {
        HpaiBuilder::default()
    }

    /// Parse an HPAI from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(KnxError::structure_truncated());
        }
        if data[0] as usize != Self::SIZE {
            return Err(KnxError::length_mismatch());
        }
        Ok(Self {
            protocol: data[1],
            address: Ipv4Addr::new(data[2], data[3], data[4], data[5]),
            port: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Append the 8 structure octets to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        out.push_u8(Self::SIZE as u8)?;
        out.push_u8(self.protocol)?;
        out.push_host_address(self.address.octets())?;
        out.push_u16(self.port)
    }

    /// Grammar check: recognized host protocol code.
    pub fn is_valid(&self) -> bool {
        self.protocol == IPV4_UDP || self.protocol == IPV4_TCP
    }

    /// Whether this is the NAT traversal form.
    pub fn is_nat(&self) -> bool {
        self.address.is_unspecified() && self.port == 0
    }

    /// The address/port pair.
    pub fn endpoint(&self) -> IpEndpoint {
        IpEndpoint::new(self.address, self.port)
    }
}

/// Fluent [`Hpai`] builder.
///
/// A host address that is never supplied stays the AnyIPv4 wildcard — the
/// NAT form — rather than substituting loopback; peers behind NAT reply to
/// the datagram source.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HpaiBuilder {
    protocol: Option<u8>,
    address: Option<Ipv4Addr>,
    port: u16,
}

impl HpaiBuilder {
    /// Set the host protocol code.
    pub fn host_protocol(mut self, protocol: u8) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Set the host address.
    pub fn host_address(mut self, address: Ipv4Addr) -> Self {
        self.address = Some(address);
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Assemble the structure. Missing protocol defaults to UDP; a missing
    /// address stays the wildcard.
    pub fn create(self) -> Hpai {
        Hpai {
            protocol: self.protocol.unwrap_or(IPV4_UDP),
            address: self.address.unwrap_or(Ipv4Addr::UNSPECIFIED),
            port: self.port,
        }
    }
}

// =============================================================================
// CRI / CRD
// =============================================================================

/// Connection request information, the client half of a CONNECT negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Cri {
    /// Tunnel connection with the requested layer.
    Tunnel {
        /// Requested tunneling layer.
        layer: TunnelLayer,
    },
    /// Device management connection (no payload).
    DeviceManagement,
    /// Unrecognized connection type, payload preserved verbatim.
    Unknown {
        /// Raw connection type code.
        code: u8,
        /// Payload after the two header octets.
        payload: Vec<u8, 8>,
    },
}

impl Cri {
    /// Link-layer tunnel CRI (the common case).
    pub const fn tunnel_link_layer() -> Self {
        Self::Tunnel {
            layer: TunnelLayer::LinkLayer,
        }
    }

    /// Parse a CRI from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (len, code) = structure_header(data)?;
        match ConnectionType::from_u8(code) {
            Some(ConnectionType::Tunnel) => {
                if len != 4 || data.len() < 4 {
                    return Err(KnxError::length_mismatch());
                }
                let layer = TunnelLayer::from_u8(data[2]).ok_or_else(KnxError::unknown_code)?;
                Ok(Self::Tunnel { layer })
            }
            Some(ConnectionType::DeviceManagement) => {
                if len != 2 {
                    return Err(KnxError::length_mismatch());
                }
                Ok(Self::DeviceManagement)
            }
            _ => Ok(Self::Unknown {
                code,
                payload: Vec::from_slice(data.get(2..len).ok_or_else(KnxError::structure_truncated)?)
                    .map_err(|_| KnxError::out_of_resource())?,
            }),
        }
    }

    /// Append the structure octets to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        match self {
            Self::Tunnel { layer } => {
                out.push_u8(4)?;
                out.push_u8(ConnectionType::Tunnel.to_u8())?;
                out.push_u8(*layer as u8)?;
                out.push_u8(0x00) // reserved
            }
            Self::DeviceManagement => {
                out.push_u8(2)?;
                out.push_u8(ConnectionType::DeviceManagement.to_u8())
            }
            Self::Unknown { code, payload } => {
                out.push_u8(2 + payload.len() as u8)?;
                out.push_u8(*code)?;
                out.push_slice(payload)
            }
        }
    }

    /// Size on the wire.
    pub fn size(&self) -> usize {
        match self {
            Self::Tunnel { .. } => 4,
            Self::DeviceManagement => 2,
            Self::Unknown { payload, .. } => 2 + payload.len(),
        }
    }

    /// Grammar check: a recognized connection type.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Unknown { .. })
    }

    /// The connection type this CRI asks for, if recognized.
    pub fn connection_type(&self) -> Option<ConnectionType> {
        match self {
            Self::Tunnel { .. } => Some(ConnectionType::Tunnel),
            Self::DeviceManagement => Some(ConnectionType::DeviceManagement),
            Self::Unknown { .. } => None,
        }
    }
}

/// Connection response data, the server half of a CONNECT negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Crd {
    /// Tunnel connection: the individual address assigned to the tunnel.
    Tunnel {
        /// Assigned KNX individual address, raw.
        address: u16,
    },
    /// Device management connection (no payload).
    DeviceManagement,
    /// Unrecognized connection type, payload preserved verbatim.
    Unknown {
        /// Raw connection type code.
        code: u8,
        /// Payload after the two header octets.
        payload: Vec<u8, 8>,
    },
}

impl Crd {
    /// Parse a CRD from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (len, code) = structure_header(data)?;
        match ConnectionType::from_u8(code) {
            Some(ConnectionType::Tunnel) => {
                if len != 4 || data.len() < 4 {
                    return Err(KnxError::length_mismatch());
                }
                Ok(Self::Tunnel {
                    address: u16::from_be_bytes([data[2], data[3]]),
                })
            }
            Some(ConnectionType::DeviceManagement) => {
                if len != 2 {
                    return Err(KnxError::length_mismatch());
                }
                Ok(Self::DeviceManagement)
            }
            _ => Ok(Self::Unknown {
                code,
                payload: Vec::from_slice(data.get(2..len).ok_or_else(KnxError::structure_truncated)?)
                    .map_err(|_| KnxError::out_of_resource())?,
            }),
        }
    }

    /// Append the structure octets to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        match self {
            Self::Tunnel { address } => {
                out.push_u8(4)?;
                out.push_u8(ConnectionType::Tunnel.to_u8())?;
                out.push_knx_address(*address)
            }
            Self::DeviceManagement => {
                out.push_u8(2)?;
                out.push_u8(ConnectionType::DeviceManagement.to_u8())
            }
            Self::Unknown { code, payload } => {
                out.push_u8(2 + payload.len() as u8)?;
                out.push_u8(*code)?;
                out.push_slice(payload)
            }
        }
    }

    /// Size on the wire.
    pub fn size(&self) -> usize {
        match self {
            Self::Tunnel { .. } => 4,
            Self::DeviceManagement => 2,
            Self::Unknown { payload, .. } => 2 + payload.len(),
        }
    }

    /// Grammar check: a recognized connection type.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Unknown { .. })
    }
}

// =============================================================================
// DIB
// =============================================================================

/// Description type codes tagging a DIB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DescriptionType {
    /// Device hardware block.
    DeviceInfo = 0x01,
    /// Supported service families.
    SupportedServiceFamilies = 0x02,
    /// IP configuration.
    IpConfig = 0x03,
    /// Current IP configuration.
    CurrentIpConfig = 0x04,
    /// Additional KNX individual addresses.
    KnxAddresses = 0x05,
    /// Manufacturer specific data.
    ManufacturerData = 0xFE,
}

impl DescriptionType {
    /// Convert a raw code octet.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::DeviceInfo),
            0x02 => Some(Self::SupportedServiceFamilies),
            0x03 => Some(Self::IpConfig),
            0x04 => Some(Self::CurrentIpConfig),
            0x05 => Some(Self::KnxAddresses),
            0xFE => Some(Self::ManufacturerData),
            _ => None,
        }
    }
}

/// Service family identifiers inside a supported-families DIB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ServiceFamily {
    /// KNXnet/IP Core.
    Core = 0x02,
    /// Device management.
    DeviceManagement = 0x03,
    /// Tunneling.
    IpTunneling = 0x04,
    /// Routing.
    IpRouting = 0x05,
    /// Remote logging.
    RemoteLogging = 0x06,
    /// Remote configuration and diagnosis.
    RemoteConfigDiagnosis = 0x07,
    /// Object server.
    ObjectServer = 0x08,
    /// KNXnet/IP Secure.
    Security = 0x09,
}

impl ServiceFamily {
    /// Convert a raw family octet.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::Core),
            0x03 => Some(Self::DeviceManagement),
            0x04 => Some(Self::IpTunneling),
            0x05 => Some(Self::IpRouting),
            0x06 => Some(Self::RemoteLogging),
            0x07 => Some(Self::RemoteConfigDiagnosis),
            0x08 => Some(Self::ObjectServer),
            0x09 => Some(Self::Security),
            _ => None,
        }
    }
}

/// Device hardware DIB (54 octets) as returned in search and description
/// responses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceDib {
    /// KNX medium code (0x02 = TP1, 0x20 = IP, ...).
    pub medium: u8,
    /// Device status; bit 0 = programming mode.
    pub status: u8,
    /// KNX individual address, raw.
    pub individual_address: u16,
    /// Project installation identifier.
    pub project_installation_id: u16,
    /// 6-octet KNX serial number.
    pub serial_number: [u8; 6],
    /// Routing multicast address the device listens on.
    pub multicast_address: Ipv4Addr,
    /// MAC address.
    pub mac_address: [u8; 6],
    /// Friendly name, ISO 8859-1, zero-padded.
    pub friendly_name: [u8; 30],
}

impl DeviceDib {
    /// Structure size on the wire.
    pub const SIZE: usize = 54;

    /// Parse from the start of `data` (header octets included).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || data[0] as usize != Self::SIZE {
            return Err(KnxError::structure_truncated());
        }
        if data[1] != DescriptionType::DeviceInfo as u8 {
            return Err(KnxError::unknown_code());
        }
        let mut serial_number = [0u8; 6];
        serial_number.copy_from_slice(&data[8..14]);
        let mut mac_address = [0u8; 6];
        mac_address.copy_from_slice(&data[18..24]);
        let mut friendly_name = [0u8; 30];
        friendly_name.copy_from_slice(&data[24..54]);
        Ok(Self {
            medium: data[2],
            status: data[3],
            individual_address: u16::from_be_bytes([data[4], data[5]]),
            project_installation_id: u16::from_be_bytes([data[6], data[7]]),
            serial_number,
            multicast_address: Ipv4Addr::new(data[14], data[15], data[16], data[17]),
            mac_address,
            friendly_name,
        })
    }

    /// Append the 54 structure octets to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        out.push_u8(Self::SIZE as u8)?;
        out.push_u8(DescriptionType::DeviceInfo as u8)?;
        out.push_u8(self.medium)?;
        out.push_u8(self.status)?;
        out.push_knx_address(self.individual_address)?;
        out.push_u16(self.project_installation_id)?;
        out.push_slice(&self.serial_number)?;
        out.push_host_address(self.multicast_address.octets())?;
        out.push_slice(&self.mac_address)?;
        out.push_slice(&self.friendly_name)
    }

    /// Friendly name with the zero padding stripped.
    pub fn name(&self) -> &[u8] {
        let end = self
            .friendly_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.friendly_name.len());
        &self.friendly_name[..end]
    }

    /// Whether the device advertises programming mode.
    pub fn programming_mode(&self) -> bool {
        self.status & 0x01 != 0
    }
}

/// One (family, version) pair in a supported-families DIB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FamilyVersion {
    /// Raw family id (use [`ServiceFamily::from_u8`] to classify).
    pub family: u8,
    /// Highest supported protocol version of that family.
    pub version: u8,
}

/// Supported service families DIB.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceFamiliesDib {
    /// The advertised families, in wire order.
    pub families: Vec<FamilyVersion, MAX_FAMILIES>,
}

impl ServiceFamiliesDib {
    /// Parse from the start of `data` (header octets included).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (len, code) = structure_header(data)?;
        if code != DescriptionType::SupportedServiceFamilies as u8 {
            return Err(KnxError::unknown_code());
        }
        if len < 2 || len % 2 != 0 || data.len() < len {
            return Err(KnxError::length_mismatch());
        }
        let mut families = Vec::new();
        let mut at = 2;
        while at + 1 < len {
            families
                .push(FamilyVersion {
                    family: data[at],
                    version: data[at + 1],
                })
                .map_err(|_| KnxError::out_of_resource())?;
            at += 2;
        }
        Ok(Self { families })
    }

    /// Append the structure octets to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        out.push_u8(2 + 2 * self.families.len() as u8)?;
        out.push_u8(DescriptionType::SupportedServiceFamilies as u8)?;
        for fv in &self.families {
            out.push_u8(fv.family)?;
            out.push_u8(fv.version)?;
        }
        Ok(())
    }

    /// Version of the given family, if advertised.
    pub fn version_of(&self, family: ServiceFamily) -> Option<u8> {
        self.families
            .iter()
            .find(|fv| fv.family == family as u8)
            .map(|fv| fv.version)
    }
}

/// One description information block.
///
/// Recognized blocks get typed representations; anything else is carried
/// verbatim so a response can be re-emitted unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dib {
    /// Device hardware block.
    DeviceInfo(DeviceDib),
    /// Supported service families.
    ServiceFamilies(ServiceFamiliesDib),
    /// IP configuration: ip, subnet, gateway, capabilities, assignment.
    IpConfig {
        /// Configured IP address.
        address: Ipv4Addr,
        /// Subnet mask.
        subnet: Ipv4Addr,
        /// Default gateway.
        gateway: Ipv4Addr,
        /// Capability bitset (BootP/DHCP/AutoIP).
        capabilities: u8,
        /// Address assignment methods enabled.
        assignment: u8,
    },
    /// Current IP configuration.
    CurrentIpConfig {
        /// Currently active IP address.
        address: Ipv4Addr,
        /// Active subnet mask.
        subnet: Ipv4Addr,
        /// Active default gateway.
        gateway: Ipv4Addr,
        /// DHCP server that leased the address.
        dhcp_server: Ipv4Addr,
        /// Active assignment method.
        assignment: u8,
    },
    /// Additional individual addresses.
    KnxAddresses {
        /// Raw 2-octet addresses, in wire order.
        addresses: Vec<u16, MAX_KNX_ADDRESSES>,
    },
    /// Manufacturer specific block.
    ManufacturerData {
        /// KNX manufacturer id.
        manufacturer: u16,
        /// Opaque payload.
        payload: Vec<u8, 32>,
    },
    /// Unknown description type, preserved verbatim (header included).
    Unknown {
        /// Raw description type code.
        code: u8,
        /// Payload after the two header octets.
        payload: Vec<u8, 64>,
    },
}

impl Dib {
    /// Parse one DIB from the start of `data`; returns the block and its
    /// size on the wire.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let (len, code) = structure_header(data)?;
        if data.len() < len {
            return Err(KnxError::structure_truncated());
        }
        let body = &data[2..len];
        let dib = match DescriptionType::from_u8(code) {
            Some(DescriptionType::DeviceInfo) => Self::DeviceInfo(DeviceDib::parse(data)?),
            Some(DescriptionType::SupportedServiceFamilies) => {
                Self::ServiceFamilies(ServiceFamiliesDib::parse(data)?)
            }
            Some(DescriptionType::IpConfig) if body.len() >= 14 => Self::IpConfig {
                address: Ipv4Addr::new(body[0], body[1], body[2], body[3]),
                subnet: Ipv4Addr::new(body[4], body[5], body[6], body[7]),
                gateway: Ipv4Addr::new(body[8], body[9], body[10], body[11]),
                capabilities: body[12],
                assignment: body[13],
            },
            Some(DescriptionType::CurrentIpConfig) if body.len() >= 18 => Self::CurrentIpConfig {
                address: Ipv4Addr::new(body[0], body[1], body[2], body[3]),
                subnet: Ipv4Addr::new(body[4], body[5], body[6], body[7]),
                gateway: Ipv4Addr::new(body[8], body[9], body[10], body[11]),
                dhcp_server: Ipv4Addr::new(body[12], body[13], body[14], body[15]),
                assignment: body[16],
            },
            Some(DescriptionType::KnxAddresses) => {
                let mut addresses = Vec::new();
                let mut at = 0;
                while at + 1 < body.len() {
                    addresses
                        .push(u16::from_be_bytes([body[at], body[at + 1]]))
                        .map_err(|_| KnxError::out_of_resource())?;
                    at += 2;
                }
                Self::KnxAddresses { addresses }
            }
            Some(DescriptionType::ManufacturerData) if body.len() >= 2 => Self::ManufacturerData {
                manufacturer: u16::from_be_bytes([body[0], body[1]]),
                payload: Vec::from_slice(&body[2..]).map_err(|_| KnxError::out_of_resource())?,
            },
            _ => Self::Unknown {
                code,
                payload: Vec::from_slice(body).map_err(|_| KnxError::out_of_resource())?,
            },
        };
        Ok((dib, len))
    }

    /// Append the structure octets to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        match self {
            Self::DeviceInfo(d) => d.encode(out),
            Self::ServiceFamilies(d) => d.encode(out),
            Self::IpConfig {
                address,
                subnet,
                gateway,
                capabilities,
                assignment,
            } => {
                out.push_u8(16)?;
                out.push_u8(DescriptionType::IpConfig as u8)?;
                out.push_host_address(address.octets())?;
                out.push_host_address(subnet.octets())?;
                out.push_host_address(gateway.octets())?;
                out.push_u8(*capabilities)?;
                out.push_u8(*assignment)
            }
            Self::CurrentIpConfig {
                address,
                subnet,
                gateway,
                dhcp_server,
                assignment,
            } => {
                out.push_u8(20)?;
                out.push_u8(DescriptionType::CurrentIpConfig as u8)?;
                out.push_host_address(address.octets())?;
                out.push_host_address(subnet.octets())?;
                out.push_host_address(gateway.octets())?;
                out.push_host_address(dhcp_server.octets())?;
                out.push_u8(*assignment)?;
                out.push_u8(0x00) // reserved
            }
            Self::KnxAddresses { addresses } => {
                out.push_u8(2 + 2 * addresses.len() as u8)?;
                out.push_u8(DescriptionType::KnxAddresses as u8)?;
                for addr in addresses {
                    out.push_knx_address(*addr)?;
                }
                Ok(())
            }
            Self::ManufacturerData {
                manufacturer,
                payload,
            } => {
                out.push_u8(4 + payload.len() as u8)?;
                out.push_u8(DescriptionType::ManufacturerData as u8)?;
                out.push_u16(*manufacturer)?;
                out.push_slice(payload)
            }
            Self::Unknown { code, payload } => {
                out.push_u8(2 + payload.len() as u8)?;
                out.push_u8(*code)?;
                out.push_slice(payload)
            }
        }
    }

    /// Grammar check: a recognized description type.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Unknown { .. })
    }
}

// =============================================================================
// SRP
// =============================================================================

/// Search request parameter types for extended discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SrpType {
    /// Only devices currently in programming mode shall answer.
    SelectByProgrammingMode = 0x01,
    /// Only the device with the given MAC address shall answer.
    SelectByMacAddress = 0x02,
    /// Only devices supporting the given service family shall answer.
    SelectByService = 0x03,
    /// The response shall contain the listed DIBs.
    RequestDibs = 0x04,
}

impl SrpType {
    /// Convert a raw type octet (mandatory bit already stripped).
    /// 0x00 is reserved and treated as unknown.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::SelectByProgrammingMode),
            0x02 => Some(Self::SelectByMacAddress),
            0x03 => Some(Self::SelectByService),
            0x04 => Some(Self::RequestDibs),
            _ => None,
        }
    }
}

/// Mandatory bit in the SRP type octet.
const SRP_MANDATORY: u8 = 0x80;

/// One search request parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Srp {
    /// Whether a server that cannot interpret this SRP must stay silent.
    pub mandatory: bool,
    /// The filter itself.
    pub filter: SrpFilter,
}

/// The filter payload of an SRP.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SrpFilter {
    /// Answer only in programming mode.
    ProgrammingMode,
    /// Answer only if the MAC matches.
    MacAddress([u8; 6]),
    /// Answer only if the service family (at least `version`) is supported.
    Service {
        /// Required family.
        family: u8,
        /// Minimum version.
        version: u8,
    },
    /// Request these DIB codes in the response; padded with 0 to an even
    /// count on the wire.
    RequestDibs(Vec<u8, MAX_REQUESTED_DIBS>),
    /// Unknown SRP type, payload preserved verbatim.
    Unknown {
        /// Raw type octet without the mandatory bit.
        code: u8,
        /// Payload after the two header octets.
        payload: Vec<u8, 16>,
    },
}

impl Srp {
    /// Mandatory programming-mode filter.
    pub fn programming_mode() -> Self {
        Self {
            mandatory: true,
            filter: SrpFilter::ProgrammingMode,
        }
    }

    /// Mandatory MAC filter.
    pub fn mac_address(mac: [u8; 6]) -> Self {
        Self {
            mandatory: true,
            filter: SrpFilter::MacAddress(mac),
        }
    }

    /// Mandatory service-family filter.
    pub fn service(family: ServiceFamily, version: u8) -> Self {
        Self {
            mandatory: true,
            filter: SrpFilter::Service {
                family: family as u8,
                version,
            },
        }
    }

    /// Request-DIBs parameter (conventionally non-mandatory).
    pub fn request_dibs(codes: &[u8]) -> Result<Self> {
        Ok(Self {
            mandatory: false,
            filter: SrpFilter::RequestDibs(
                Vec::from_slice(codes).map_err(|_| KnxError::out_of_resource())?,
            ),
        })
    }

    /// Parse one SRP from the start of `data`; returns the parameter and
    /// its size on the wire.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let (len, raw_type) = structure_header(data)?;
        if data.len() < len {
            return Err(KnxError::structure_truncated());
        }
        let mandatory = raw_type & SRP_MANDATORY != 0;
        let code = raw_type & !SRP_MANDATORY;
        let body = &data[2..len];
        let filter = match SrpType::from_u8(code) {
            Some(SrpType::SelectByProgrammingMode) if body.is_empty() => {
                SrpFilter::ProgrammingMode
            }
            Some(SrpType::SelectByMacAddress) if body.len() == 6 => {
                let mut mac = [0u8; 6];
                mac.copy_from_slice(body);
                SrpFilter::MacAddress(mac)
            }
            Some(SrpType::SelectByService) if body.len() == 2 => SrpFilter::Service {
                family: body[0],
                version: body[1],
            },
            Some(SrpType::RequestDibs) => SrpFilter::RequestDibs(
                Vec::from_slice(body).map_err(|_| KnxError::out_of_resource())?,
            ),
            _ => SrpFilter::Unknown {
                code,
                payload: Vec::from_slice(body).map_err(|_| KnxError::out_of_resource())?,
            },
        };
        Ok((
            Self { mandatory, filter },
            len,
        ))
    }

    /// Append the structure octets to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        let type_octet = |code: u8, mandatory: bool| {
            if mandatory {
                code | SRP_MANDATORY
            } else {
                code
            }
        };
        match &self.filter {
            SrpFilter::ProgrammingMode => {
                out.push_u8(2)?;
                out.push_u8(type_octet(
                    SrpType::SelectByProgrammingMode as u8,
                    self.mandatory,
                ))
            }
            SrpFilter::MacAddress(mac) => {
                out.push_u8(8)?;
                out.push_u8(type_octet(SrpType::SelectByMacAddress as u8, self.mandatory))?;
                out.push_slice(mac)
            }
            SrpFilter::Service { family, version } => {
                out.push_u8(4)?;
                out.push_u8(type_octet(SrpType::SelectByService as u8, self.mandatory))?;
                out.push_u8(*family)?;
                out.push_u8(*version)
            }
            SrpFilter::RequestDibs(codes) => {
                // Padded to an even octet count.
                let padded = codes.len() + codes.len() % 2;
                out.push_u8(2 + padded as u8)?;
                out.push_u8(type_octet(SrpType::RequestDibs as u8, self.mandatory))?;
                out.push_slice(codes)?;
                if codes.len() % 2 != 0 {
                    out.push_u8(0x00)?;
                }
                Ok(())
            }
            SrpFilter::Unknown { code, payload } => {
                out.push_u8(2 + payload.len() as u8)?;
                out.push_u8(type_octet(*code, self.mandatory))?;
                out.push_slice(payload)
            }
        }
    }

    /// Grammar check: a recognized, non-reserved SRP type.
    pub fn is_valid(&self) -> bool {
        !matches!(self.filter, SrpFilter::Unknown { .. })
    }
}

/// Read the 2-octet structure header (length, code).
fn structure_header(data: &[u8]) -> Result<(usize, u8)> {
    if data.len() < 2 {
        return Err(KnxError::structure_truncated());
    }
    let len = data[0] as usize;
    if len < 2 {
        return Err(KnxError::length_mismatch());
    }
    Ok((len, data[1]))
}
