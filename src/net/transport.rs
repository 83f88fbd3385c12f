//! Datagram transport abstraction.
//!
//! The endpoint drivers never touch sockets directly; they depend on
//! [`AsyncTransport`] (and [`MulticastTransport`] where routing or discovery
//! needs group membership). This keeps the protocol machinery testable with
//! the scripted [mock](crate::net::mock_transport::MockTransport) and lets
//! real deployments plug in Embassy sockets or anything else that can move
//! datagrams.
//!
//! The transport does not parse. It reports socket-level failures through
//! the `Socket*` error kinds and nothing else.

use crate::error::Result;
use crate::net::{IpEndpoint, Ipv4Addr};

/// Asynchronous datagram transport.
///
/// Implementations can be real network sockets, mock objects for testing, or
/// alternative transports. A TCP adapter implements the same interface by
/// reassembling whole KNXnet/IP frames from the stream before handing them
/// up (the frame header carries the total length).
#[allow(async_fn_in_trait)]
pub trait AsyncTransport {
    /// Bind the transport to a local port (0 = any available port).
    ///
    /// Default implementation is a no-op for transports without explicit
    /// binding.
    ///
    /// # Errors
    ///
    /// `Socket(BindFailed)` if the port cannot be acquired.
    fn bind(&mut self, _port: u16) -> Result<()> {
        Ok(())
    }

    /// Send one datagram to `addr`.
    ///
    /// # Errors
    ///
    /// `Socket(SendFailed)` on transmission failure, `Socket(Closed)` if the
    /// transport is no longer usable.
    async fn send_to(&mut self, data: &[u8], addr: IpEndpoint) -> Result<()>;

    /// Receive one datagram.
    ///
    /// Resolves once data is available or the transport fails. Returns the
    /// byte count and the sender.
    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)>;

    /// The local endpoint the transport is bound to, if any.
    fn local_endpoint(&self) -> Option<IpEndpoint> {
        None
    }

    /// Whether the transport is ready for traffic.
    fn is_ready(&self) -> bool {
        true
    }

    /// Close the transport and release resources.
    fn close(&mut self) {}
}

/// Multicast capabilities on top of [`AsyncTransport`].
///
/// Only discovery and routing need these; tunneling and device management
/// run over plain unicast.
#[allow(async_fn_in_trait)]
pub trait MulticastTransport: AsyncTransport {
    /// Join the given multicast group on the bound interface.
    ///
    /// # Errors
    ///
    /// `Socket(BindFailed)` if the membership cannot be established.
    async fn join(&mut self, group: Ipv4Addr) -> Result<()>;

    /// Send one datagram to a multicast group with the given TTL.
    ///
    /// Implementations that cannot set a per-datagram TTL may apply the
    /// socket default; KNXnet/IP routing uses TTL 16 by convention and
    /// discovery stays link-local either way.
    async fn send_multicast(
        &mut self,
        group: Ipv4Addr,
        port: u16,
        ttl: u8,
        data: &[u8],
    ) -> Result<()>;
}
