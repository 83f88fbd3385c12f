//! Network types and transport abstraction for KNXnet/IP communication.
//!
//! This module provides lightweight `no_std` address types plus the
//! [`AsyncTransport`](transport::AsyncTransport) trait the endpoint drivers
//! are written against. Real sockets live in the Embassy adapter; tests use
//! the mock transport.

pub mod transport;

#[cfg(feature = "embassy")]
pub mod embassy_adapter;

pub mod mock_transport;

use core::fmt;

/// Standard KNXnet/IP UDP port.
pub const KNXNETIP_PORT: u16 = 3671;

/// KNXnet/IP routing/discovery multicast group, 224.0.23.12.
pub const KNXNETIP_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 12);

/// IPv4 address representation.
///
/// A lightweight wrapper around a 4-byte array with ergonomic conversions
/// from arrays, tuples and raw `u32` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ipv4Addr {
    octets: [u8; 4],
}

impl Ipv4Addr {
    /// Create a new IPv4 address from individual octets.
    #[inline]
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self {
            octets: [a, b, c, d],
        }
    }

    /// The four octets that make up this address.
    #[inline]
    pub const fn octets(&self) -> [u8; 4] {
        self.octets
    }

    /// The wildcard address 0.0.0.0, used for the NAT form of an HPAI.
    pub const UNSPECIFIED: Self = Self::new(0, 0, 0, 0);

    /// Localhost, 127.0.0.1.
    pub const LOCALHOST: Self = Self::new(127, 0, 0, 1);

    /// Whether this is the wildcard address.
    #[inline]
    pub const fn is_unspecified(&self) -> bool {
        matches!(self.octets, [0, 0, 0, 0])
    }

    /// Whether this address is in the IPv4 multicast range.
    #[inline]
    pub const fn is_multicast(&self) -> bool {
        self.octets[0] >= 224 && self.octets[0] <= 239
    }
}

impl From<[u8; 4]> for Ipv4Addr {
    #[inline]
    fn from(octets: [u8; 4]) -> Self {
        Self { octets }
    }
}

impl From<(u8, u8, u8, u8)> for Ipv4Addr {
    #[inline]
    fn from((a, b, c, d): (u8, u8, u8, u8)) -> Self {
        Self::new(a, b, c, d)
    }
}

impl From<Ipv4Addr> for [u8; 4] {
    #[inline]
    fn from(addr: Ipv4Addr) -> [u8; 4] {
        addr.octets
    }
}

impl From<u32> for Ipv4Addr {
    #[inline]
    fn from(ip: u32) -> Self {
        Self {
            octets: ip.to_be_bytes(),
        }
    }
}

impl From<Ipv4Addr> for u32 {
    #[inline]
    fn from(addr: Ipv4Addr) -> u32 {
        u32::from_be_bytes(addr.octets)
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.octets[0], self.octets[1], self.octets[2], self.octets[3]
        )
    }
}

impl core::str::FromStr for Ipv4Addr {
    type Err = crate::error::KnxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let mut octets = [0u8; 4];

        for octet in &mut octets {
            let part = parts.next().ok_or_else(crate::error::KnxError::unknown_code)?;
            *octet = part
                .parse()
                .map_err(|_| crate::error::KnxError::unknown_code())?;
        }

        if parts.next().is_some() {
            return Err(crate::error::KnxError::unknown_code());
        }

        Ok(Self { octets })
    }
}

/// An IPv4 address/port pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IpEndpoint {
    /// Host address.
    pub addr: Ipv4Addr,
    /// UDP or TCP port.
    pub port: u16,
}

impl IpEndpoint {
    /// Create a new endpoint.
    #[inline]
    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    /// The all-zero endpoint (NAT form).
    pub const UNSPECIFIED: Self = Self::new(Ipv4Addr::UNSPECIFIED, 0);
}

impl fmt::Display for IpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octet_conversions() {
        let addr = Ipv4Addr::from([192, 168, 1, 10]);
        assert_eq!(addr.octets(), [192, 168, 1, 10]);
        assert_eq!(u32::from(addr), 0xC0A8_010A);
        assert_eq!(Ipv4Addr::from(0xC0A8_010Au32), addr);
    }

    #[test]
    fn parse_from_str() {
        let addr: Ipv4Addr = "224.0.23.12".parse().unwrap();
        assert_eq!(addr, KNXNETIP_MULTICAST);
        assert!(addr.is_multicast());
        assert!("192.168.1".parse::<Ipv4Addr>().is_err());
        assert!("192.168.1.256".parse::<Ipv4Addr>().is_err());
        assert!("a.b.c.d".parse::<Ipv4Addr>().is_err());
    }

    #[test]
    fn constants() {
        assert!(Ipv4Addr::UNSPECIFIED.is_unspecified());
        assert_eq!(Ipv4Addr::LOCALHOST.octets(), [127, 0, 0, 1]);
        assert_eq!(IpEndpoint::UNSPECIFIED.port, 0);
    }

    #[test]
    fn display() {
        extern crate std;
        let ep = IpEndpoint::new(Ipv4Addr::new(10, 0, 0, 1), 3671);
        assert_eq!(std::format!("{}", ep), "10.0.0.1:3671");
    }
}
