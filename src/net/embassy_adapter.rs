//! Embassy socket adapters.
//!
//! Implements [`AsyncTransport`] over `embassy-net` sockets: a UDP adapter
//! (unicast plus multicast membership for discovery and routing) and a TCP
//! adapter for secure sessions. The TCP adapter reassembles whole KNXnet/IP
//! frames from the byte stream using the total length declared in the
//! frame header, so the upper layers see one frame per "datagram" on every
//! transport.
//!
//! ## Example
//!
//! ```rust,no_run
//! use knxnet::net::embassy_adapter::EmbassyUdpTransport;
//! use embassy_net::udp::PacketMetadata;
//!
//! let mut rx_meta = [PacketMetadata::EMPTY; 4];
//! let mut tx_meta = [PacketMetadata::EMPTY; 4];
//! let mut rx_buffer = [0u8; 2048];
//! let mut tx_buffer = [0u8; 2048];
//! # fn with_stack(stack: &embassy_net::Stack<'static>, rx_meta: &'static mut [PacketMetadata], tx_meta: &'static mut [PacketMetadata], rx_buffer: &'static mut [u8], tx_buffer: &'static mut [u8]) {
//! let transport = EmbassyUdpTransport::new(stack, rx_meta, rx_buffer, tx_meta, tx_buffer);
//! # }
//! ```

use crate::error::{KnxError, Result};
use crate::net::transport::{AsyncTransport, MulticastTransport};
use crate::net::{IpEndpoint, Ipv4Addr};
use crate::protocol::frame::FrameHeader;
use embassy_net::tcp::TcpSocket;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint as NetEndpoint, Stack};

fn to_net_endpoint(endpoint: IpEndpoint) -> NetEndpoint {
    let [a, b, c, d] = endpoint.addr.octets();
    NetEndpoint::new(IpAddress::v4(a, b, c, d), endpoint.port)
}

fn from_net_endpoint(endpoint: NetEndpoint) -> IpEndpoint {
    match endpoint.addr {
        IpAddress::Ipv4(addr) => {
            let octets = addr.octets();
            IpEndpoint::new(Ipv4Addr::from(octets), endpoint.port)
        }
        // KNXnet/IP is IPv4-only.
        _ => IpEndpoint::UNSPECIFIED,
    }
}

/// UDP adapter over `embassy_net::udp::UdpSocket`.
pub struct EmbassyUdpTransport<'a> {
    stack: Stack<'a>,
    socket: UdpSocket<'a>,
    bound: bool,
}

impl<'a> EmbassyUdpTransport<'a> {
    /// Wrap a socket built from the given stack and buffers.
    pub fn new(
        stack: &Stack<'a>,
        rx_meta: &'a mut [PacketMetadata],
        rx_buffer: &'a mut [u8],
        tx_meta: &'a mut [PacketMetadata],
        tx_buffer: &'a mut [u8],
    ) -> Self {
        let socket = UdpSocket::new(*stack, rx_meta, rx_buffer, tx_meta, tx_buffer);
        Self {
            stack: *stack,
            socket,
            bound: false,
        }
    }
}

impl<'a> AsyncTransport for EmbassyUdpTransport<'a> {
    fn bind(&mut self, port: u16) -> Result<()> {
        self.socket.bind(port).map_err(|_| KnxError::bind_failed())?;
        self.bound = true;
        Ok(())
    }

    async fn send_to(&mut self, data: &[u8], addr: IpEndpoint) -> Result<()> {
        self.socket
            .send_to(data, to_net_endpoint(addr))
            .await
            .map_err(|_| KnxError::send_failed())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
        let (n, meta) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(|_| KnxError::socket_closed())?;
        Ok((n, from_net_endpoint(meta.endpoint)))
    }

    fn local_endpoint(&self) -> Option<IpEndpoint> {
        if self.bound {
            let endpoint = self.socket.endpoint();
            Some(IpEndpoint::new(Ipv4Addr::UNSPECIFIED, endpoint.port))
        } else {
            None
        }
    }

    fn is_ready(&self) -> bool {
        self.bound
    }

    fn close(&mut self) {
        self.socket.close();
        self.bound = false;
    }
}

impl<'a> MulticastTransport for EmbassyUdpTransport<'a> {
    async fn join(&mut self, group: Ipv4Addr) -> Result<()> {
        let [a, b, c, d] = group.octets();
        self.stack
            .join_multicast_group(embassy_net::Ipv4Address::new(a, b, c, d))
            .map_err(|_| KnxError::bind_failed())?;
        Ok(())
    }

    async fn send_multicast(
        &mut self,
        group: Ipv4Addr,
        port: u16,
        ttl: u8,
        data: &[u8],
    ) -> Result<()> {
        self.socket.set_hop_limit(Some(ttl));
        let result = self.send_to(data, IpEndpoint::new(group, port)).await;
        self.socket.set_hop_limit(None);
        result
    }
}

/// TCP adapter over `embassy_net::tcp::TcpSocket`, delivering whole
/// KNXnet/IP frames.
pub struct EmbassyTcpTransport<'a> {
    socket: TcpSocket<'a>,
    server: IpEndpoint,
    connected: bool,
}

impl<'a> EmbassyTcpTransport<'a> {
    /// Wrap a socket built from the given stack and buffers.
    pub fn new(
        stack: &Stack<'a>,
        rx_buffer: &'a mut [u8],
        tx_buffer: &'a mut [u8],
        server: IpEndpoint,
    ) -> Self {
        let socket = TcpSocket::new(*stack, rx_buffer, tx_buffer);
        Self {
            socket,
            server,
            connected: false,
        }
    }

    /// Open the stream to the configured server.
    pub async fn connect(&mut self) -> Result<()> {
        self.socket
            .connect(to_net_endpoint(self.server))
            .await
            .map_err(|_| KnxError::bind_failed())?;
        self.connected = true;
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .socket
                .read(&mut buf[filled..])
                .await
                .map_err(|_| KnxError::socket_closed())?;
            if n == 0 {
                return Err(KnxError::socket_closed());
            }
            filled += n;
        }
        Ok(())
    }
}

impl<'a> AsyncTransport for EmbassyTcpTransport<'a> {
    async fn send_to(&mut self, data: &[u8], _addr: IpEndpoint) -> Result<()> {
        if !self.connected {
            return Err(KnxError::socket_closed());
        }
        let mut written = 0;
        while written < data.len() {
            let n = self
                .socket
                .write(&data[written..])
                .await
                .map_err(|_| KnxError::send_failed())?;
            if n == 0 {
                return Err(KnxError::send_failed());
            }
            written += n;
        }
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
        if !self.connected {
            return Err(KnxError::socket_closed());
        }
        // One whole frame per call: header first, then the declared rest.
        if buf.len() < FrameHeader::SIZE {
            return Err(KnxError::out_of_resource());
        }
        self.read_exact_split(buf).await
    }

    fn is_ready(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        self.socket.close();
        self.connected = false;
    }
}

impl<'a> EmbassyTcpTransport<'a> {
    async fn read_exact_split(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
        {
            let (header, _) = buf.split_at_mut(FrameHeader::SIZE);
            self.read_exact(header).await?;
        }
        let total = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        if total < FrameHeader::SIZE || total > buf.len() {
            // Unframeable stream; the connection is unusable.
            self.close();
            return Err(KnxError::socket_closed());
        }
        {
            let rest = &mut buf[FrameHeader::SIZE..total];
            if !rest.is_empty() {
                self.read_exact(rest).await?;
            }
        }
        Ok((total, self.server))
    }
}
