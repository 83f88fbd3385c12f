//! Mock transport for testing.
//!
//! A scripted implementation of [`AsyncTransport`]: responses queued with
//! [`MockTransport::add_response`] are returned by `recv_from()` in FIFO
//! order, everything sent through `send_to()` is journaled for inspection,
//! and an exhausted response queue reports a timeout — which is exactly what
//! the endpoint drivers treat a silent peer as.

use crate::error::{KnxError, Result};
use crate::net::transport::{AsyncTransport, MulticastTransport};
use crate::net::{IpEndpoint, Ipv4Addr};

#[cfg(feature = "std")]
use std::collections::VecDeque;
#[cfg(feature = "std")]
use std::vec::Vec;

#[cfg(not(feature = "std"))]
extern crate alloc;
#[cfg(not(feature = "std"))]
use alloc::collections::VecDeque;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

/// Default peer reported as the sender of scripted responses.
const DEFAULT_PEER: IpEndpoint = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671);

/// Scripted transport double.
///
/// ```rust,no_run
/// use knxnet::net::mock_transport::MockTransport;
///
/// let mut mock = MockTransport::new();
/// mock.add_response(vec![0x06, 0x10, 0x02, 0x06, 0x00, 0x08, 0x07, 0x00]);
/// // hand `mock` to an endpoint; afterwards inspect mock.sent_packets()
/// ```
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: VecDeque<(Vec<u8>, IpEndpoint)>,
    sent_packets: Vec<(Vec<u8>, IpEndpoint)>,
    joined_groups: Vec<Ipv4Addr>,
    bound_port: Option<u16>,
    ready: bool,
}

impl MockTransport {
    /// Create a new mock transport, ready by default.
    pub fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            sent_packets: Vec::new(),
            joined_groups: Vec::new(),
            bound_port: None,
            ready: true,
        }
    }

    /// Queue a response returned by the next `recv_from()` call, reported
    /// as coming from the default gateway endpoint.
    pub fn add_response(&mut self, data: Vec<u8>) {
        self.add_response_from(data, DEFAULT_PEER);
    }

    /// Queue a response with an explicit source endpoint.
    pub fn add_response_from(&mut self, data: Vec<u8>, from: IpEndpoint) {
        self.responses.push_back((data, from));
    }

    /// All packets sent through this transport, in order.
    pub fn sent_packets(&self) -> &[(Vec<u8>, IpEndpoint)] {
        &self.sent_packets
    }

    /// The most recently sent packet, if any.
    pub fn last_sent(&self) -> Option<&(Vec<u8>, IpEndpoint)> {
        self.sent_packets.last()
    }

    /// Multicast groups joined through [`MulticastTransport::join`].
    pub fn joined_groups(&self) -> &[Ipv4Addr] {
        &self.joined_groups
    }

    /// Forget the sent-packet journal.
    pub fn clear_sent(&mut self) {
        self.sent_packets.clear();
    }

    /// Drop all queued responses.
    pub fn clear_responses(&mut self) {
        self.responses.clear();
    }

    /// Force the ready flag, e.g. to simulate an unbound socket.
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Number of queued responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }
}

impl AsyncTransport for MockTransport {
    fn bind(&mut self, port: u16) -> Result<()> {
        self.bound_port = Some(if port == 0 { 52000 } else { port });
        Ok(())
    }

    async fn send_to(&mut self, data: &[u8], addr: IpEndpoint) -> Result<()> {
        if !self.ready {
            return Err(KnxError::send_failed());
        }
        self.sent_packets.push((data.to_vec(), addr));
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, IpEndpoint)> {
        if !self.ready {
            return Err(KnxError::socket_closed());
        }
        match self.responses.pop_front() {
            Some((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            // Script exhausted: behave like a silent peer.
            None => Err(KnxError::ack_timeout()),
        }
    }

    fn local_endpoint(&self) -> Option<IpEndpoint> {
        self.bound_port
            .map(|port| IpEndpoint::new(Ipv4Addr::UNSPECIFIED, port))
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn close(&mut self) {
        self.ready = false;
        self.responses.clear();
    }
}

impl MulticastTransport for MockTransport {
    async fn join(&mut self, group: Ipv4Addr) -> Result<()> {
        self.joined_groups.push(group);
        Ok(())
    }

    async fn send_multicast(
        &mut self,
        group: Ipv4Addr,
        port: u16,
        _ttl: u8,
        data: &[u8],
    ) -> Result<()> {
        self.send_to(data, IpEndpoint::new(group, port)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_is_journaled_and_responses_are_fifo() {
        let mut mock = MockTransport::new();
        mock.add_response(vec![0x01]);
        mock.add_response(vec![0x02, 0x03]);

        let dest = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671);
        mock.send_to(&[0xAA, 0xBB], dest).await.unwrap();
        assert_eq!(mock.sent_packets().len(), 1);
        assert_eq!(mock.sent_packets()[0].0, vec![0xAA, 0xBB]);
        assert_eq!(mock.sent_packets()[0].1, dest);

        let mut buf = [0u8; 16];
        let (n, _) = mock.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x01]);
        let (n, _) = mock.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x02, 0x03]);
    }

    #[tokio::test]
    async fn exhausted_script_times_out() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 16];
        let err = mock.recv_from(&mut buf).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn multicast_join_is_recorded() {
        let mut mock = MockTransport::new();
        mock.join(Ipv4Addr::new(224, 0, 23, 12)).await.unwrap();
        assert_eq!(mock.joined_groups(), &[Ipv4Addr::new(224, 0, 23, 12)]);

        mock.send_multicast(Ipv4Addr::new(224, 0, 23, 12), 3671, 16, &[0x06])
            .await
            .unwrap();
        assert_eq!(mock.last_sent().unwrap().1.port, 3671);
    }

    #[test]
    fn ready_state_follows_close() {
        let mut mock = MockTransport::new();
        assert!(mock.is_ready());
        mock.close();
        assert!(!mock.is_ready());
    }
}
