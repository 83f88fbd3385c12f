//! Multicast routing endpoint.
//!
//! Routing distributes cEMI telegrams to every coupler in the multicast
//! group, unacknowledged. The endpoint joins 224.0.23.12:3671 (or a
//! configured group), sends `ROUTING_INDICATION` frames and surfaces
//! incoming indications plus the two flow-control signals: `ROUTING_BUSY`
//! pauses the send path for the advertised wait time, `ROUTING_LOST_MESSAGE`
//! is reported upward so the application knows telegrams went missing.
//!
//! The multicast socket may be shared by several receivers in one process;
//! only the owning endpoint sends on it.

use crate::bytes::MAX_FRAME_SIZE;
use crate::error::{KnxError, Result};
use crate::knx_log;
use crate::net::transport::MulticastTransport;
use crate::net::{IpEndpoint, Ipv4Addr, KNXNETIP_MULTICAST, KNXNETIP_PORT};
use crate::protocol::constants::{ServiceType, ROUTING_TTL};
use crate::protocol::frame::FrameView;
use crate::protocol::services::{
    RoutingBusy, RoutingIndication, RoutingLostMessage, MAX_EMBEDDED_CEMI,
};
use embassy_time::{with_timeout, Duration, Instant, Timer};
use heapless::Vec;

/// Receive window used by [`RoutingEndpoint::poll_event`] per call.
const POLL_WINDOW: Duration = Duration::from_millis(100);

/// Events surfaced by the routing endpoint.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RoutingEvent {
    /// A routing indication arrived; the embedded cEMI frame.
    Frame(Vec<u8, MAX_EMBEDDED_CEMI>),
    /// A router asked for a send pause.
    Busy {
        /// Requested pause in milliseconds.
        wait_ms: u16,
    },
    /// A router dropped telegrams.
    Lost {
        /// Telegrams lost since the last report.
        count: u16,
    },
}

/// Multicast routing endpoint.
pub struct RoutingEndpoint<T: MulticastTransport> {
    transport: T,
    group: Ipv4Addr,
    port: u16,
    rx_buffer: [u8; MAX_FRAME_SIZE],
    busy_until: Option<Instant>,
    joined: bool,
}

impl<T: MulticastTransport> RoutingEndpoint<T> {
    /// Endpoint on the standard KNXnet/IP group.
    pub fn new(transport: T) -> Self {
        Self::with_group(transport, KNXNETIP_MULTICAST, KNXNETIP_PORT)
    }

    /// Endpoint on a custom multicast group.
    pub fn with_group(transport: T, group: Ipv4Addr, port: u16) -> Self {
        Self {
            transport,
            group,
            port,
            rx_buffer: [0u8; MAX_FRAME_SIZE],
            busy_until: None,
            joined: false,
        }
    }

    /// Join the multicast group and bind the routing port.
    pub async fn join(&mut self) -> Result<()> {
        self.transport.bind(self.port)?;
        self.transport.join(self.group).await?;
        self.joined = true;
        knx_log!(info, "joined routing group {}", self.group);
        Ok(())
    }

    /// Whether the group membership is established.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Send one cEMI frame as a routing indication.
    ///
    /// Honors an active `ROUTING_BUSY` pause before transmitting.
    pub async fn send(&mut self, cemi: &[u8]) -> Result<()> {
        if !self.joined {
            return Err(KnxError::InvalidState);
        }
        if let Some(until) = self.busy_until {
            let now = Instant::now();
            if until > now {
                Timer::after(until.duration_since(now)).await;
            }
            self.busy_until = None;
        }
        let frame = RoutingIndication::new(cemi)?.build()?;
        self.transport
            .send_multicast(self.group, self.port, ROUTING_TTL, frame.bytes())
            .await
    }

    /// Wait up to the poll window for the next routing event.
    pub async fn poll_event(&mut self) -> Result<Option<RoutingEvent>> {
        if !self.joined {
            return Ok(None);
        }
        let received =
            with_timeout(POLL_WINDOW, self.transport.recv_from(&mut self.rx_buffer)).await;
        let (n, _from) = match received {
            Ok(Ok(tuple)) => tuple,
            Ok(Err(e)) if e.is_timeout() => return Ok(None),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(None),
        };

        let view = match FrameView::parse(&self.rx_buffer[..n]) {
            Ok(view) => view,
            Err(_) => {
                knx_log!(debug, "dropping malformed routing datagram");
                return Ok(None);
            }
        };

        match view.service_type() {
            ServiceType::RoutingIndication => {
                let indication = match RoutingIndication::parse(view.body()) {
                    Ok(i) => i,
                    Err(_) => return Ok(None),
                };
                Ok(Some(RoutingEvent::Frame(indication.cemi)))
            }
            ServiceType::RoutingBusy => {
                let busy = match RoutingBusy::parse(view.body()) {
                    Ok(b) => b,
                    Err(_) => return Ok(None),
                };
                self.busy_until = Some(
                    Instant::now() + Duration::from_millis(u64::from(busy.wait_time_ms)),
                );
                knx_log!(debug, "routing busy, pausing {} ms", busy.wait_time_ms);
                Ok(Some(RoutingEvent::Busy {
                    wait_ms: busy.wait_time_ms,
                }))
            }
            ServiceType::RoutingLostMessage => {
                let lost = match RoutingLostMessage::parse(view.body()) {
                    Ok(l) => l,
                    Err(_) => return Ok(None),
                };
                knx_log!(warn, "router lost {} telegrams", lost.lost_count);
                Ok(Some(RoutingEvent::Lost {
                    count: lost.lost_count,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Leave the group and release the socket.
    pub fn close(&mut self) {
        self.joined = false;
        self.transport.close();
    }

    /// The endpoint the group traffic uses.
    pub fn group_endpoint(&self) -> IpEndpoint {
        IpEndpoint::new(self.group, self.port)
    }

    /// Access the underlying transport (tests inspect the mock's journal).
    pub fn transport(&self) -> &T {
        &self.transport
    }
}
