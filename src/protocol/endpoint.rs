//! Async endpoint driver.
//!
//! One [`Endpoint`] owns a transport, a sans-IO [`Connection`] core and the
//! timing configuration, and runs the per-endpoint event loop: socket
//! receive, deadline bookkeeping and user-initiated sends are multiplexed
//! here, while every protocol decision stays inside the core. Events are
//! delivered from [`Endpoint::poll_event`] in arrival order; nothing is
//! delivered after [`Endpoint::disconnect`] completes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use knxnet::protocol::endpoint::Endpoint;
//! use knxnet::net::{IpEndpoint, Ipv4Addr};
//!
//! # async fn demo<T: knxnet::net::transport::AsyncTransport>(transport: T) -> knxnet::error::Result<()> {
//! let gateway = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671);
//! let mut endpoint = Endpoint::tunnel(transport, gateway);
//!
//! endpoint.connect().await?;
//! endpoint.send(&[0x11, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x08, 0x01, 0x00, 0x00, 0x81]).await?;
//! while let Some(_event) = endpoint.poll_event().await? {
//!     // react to bus traffic
//! }
//! endpoint.disconnect().await?;
//! # Ok(()) }
//! ```

use crate::bytes::MAX_FRAME_SIZE;
use crate::config::ConnectionConfig;
use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use crate::net::IpEndpoint;
use crate::protocol::connection::{Action, Actions, Connection, EndpointState};
use crate::protocol::constants::ConnectionType;
use crate::protocol::services::MAX_EMBEDDED_CEMI;
use embassy_time::{with_timeout, Duration, Instant};
use heapless::{Deque, Vec};

/// Receive window used by [`Endpoint::poll_event`] per call.
const POLL_WINDOW: Duration = Duration::from_millis(100);

/// Events surfaced to the application.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointEvent {
    /// A cEMI frame arrived on the channel.
    Frame(Vec<u8, MAX_EMBEDDED_CEMI>),
    /// The connection state changed.
    StateChanged(EndpointState),
    /// A protocol or timeout fault was observed; the state machine has
    /// already reacted.
    Error(KnxError),
}

/// A sink for endpoint events, for applications that prefer push delivery
/// over polling. Invoked on the endpoint's own task, in order.
pub trait EventSink {
    /// Receive one event.
    fn on_event(&mut self, event: EndpointEvent);
}

/// Async client endpoint for tunneling or device management.
pub struct Endpoint<T: AsyncTransport> {
    transport: T,
    server: IpEndpoint,
    connection: Connection,
    config: ConnectionConfig,
    rx_buffer: [u8; MAX_FRAME_SIZE],
    events: Deque<EndpointEvent, 8>,
    heartbeat_sent_at: Option<Instant>,
    last_heartbeat: Instant,
}

impl<T: AsyncTransport> Endpoint<T> {
    /// A tunneling endpoint talking to `server`.
    pub fn tunnel(transport: T, server: IpEndpoint) -> Self {
        Self::new(transport, server, Connection::tunnel(), ConnectionConfig::new())
    }

    /// A device management endpoint talking to `server`.
    pub fn device_management(transport: T, server: IpEndpoint) -> Self {
        Self::new(
            transport,
            server,
            Connection::device_management(),
            ConnectionConfig::new(),
        )
    }

    /// Full control over the core and configuration.
    pub fn new(
        transport: T,
        server: IpEndpoint,
        connection: Connection,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            transport,
            server,
            connection,
            config,
            rx_buffer: [0u8; MAX_FRAME_SIZE],
            events: Deque::new(),
            heartbeat_sent_at: None,
            last_heartbeat: Instant::now(),
        }
    }

    /// Replace the timing configuration.
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Current connection state.
    pub fn state(&self) -> EndpointState {
        self.connection.state()
    }

    /// Channel id once connected.
    pub fn channel_id(&self) -> u8 {
        self.connection.channel_id()
    }

    /// Whether a channel is established.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            EndpointState::Connected | EndpointState::Heartbeat
        )
    }

    /// Access the sans-IO core (request context, sequence numbers).
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Access the underlying transport (tests inspect the mock's journal).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Establish the channel: send CONNECT_REQUEST and wait for the
    /// response within the configured connect timeout.
    pub async fn connect(&mut self) -> Result<()> {
        self.transport.bind(0)?;
        let actions = self.connection.connect_to()?;
        self.run_actions(actions).await?;

        let deadline = self.config.connect_timeout;
        loop {
            match with_timeout(deadline, self.transport.recv_from(&mut self.rx_buffer)).await {
                Ok(Ok((n, _from))) => {
                    let bytes: Vec<u8, MAX_FRAME_SIZE> =
                        Vec::from_slice(&self.rx_buffer[..n])
                            .map_err(|_| KnxError::out_of_resource())?;
                    let actions = self.connection.handle_frame(&bytes);
                    self.run_actions(actions).await?;
                    match self.state() {
                        EndpointState::Connected => {
                            self.last_heartbeat = Instant::now();
                            return Ok(());
                        }
                        EndpointState::Failed => return Err(self.take_error()),
                        _ => continue,
                    }
                }
                Ok(Err(e)) if e.is_timeout() => {
                    let actions = self.connection.connect_elapsed();
                    self.run_actions(actions).await?;
                    return Err(self.take_error());
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    let actions = self.connection.connect_elapsed();
                    self.run_actions(actions).await?;
                    return Err(self.take_error());
                }
            }
        }
    }

    /// Send one cEMI frame and wait for the matching acknowledgement,
    /// retransmitting once on timeout.
    pub async fn send(&mut self, cemi: &[u8]) -> Result<()> {
        let actions = self.connection.send_cemi(cemi)?;
        self.run_actions(actions).await?;

        let deadline = match self.connection.connection_type() {
            ConnectionType::DeviceManagement => self.config.configuration_ack_timeout,
            _ => self.config.tunneling_ack_timeout,
        };

        while self.connection.has_outstanding_request() {
            match with_timeout(deadline, self.transport.recv_from(&mut self.rx_buffer)).await {
                Ok(Ok((n, _from))) => {
                    let bytes: Vec<u8, MAX_FRAME_SIZE> =
                        Vec::from_slice(&self.rx_buffer[..n])
                            .map_err(|_| KnxError::out_of_resource())?;
                    let actions = self.connection.handle_frame(&bytes);
                    self.run_actions(actions).await?;
                }
                Ok(Err(e)) if e.is_timeout() => {
                    let actions = self.connection.ack_elapsed();
                    self.run_actions(actions).await?;
                    if self.state() == EndpointState::Failed {
                        return Err(self.take_error());
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    let actions = self.connection.ack_elapsed();
                    self.run_actions(actions).await?;
                    if self.state() == EndpointState::Failed {
                        return Err(self.take_error());
                    }
                }
            }
        }
        Ok(())
    }

    /// Wait up to the poll window for the next event.
    ///
    /// Drives heartbeat scheduling as a side effect: a due
    /// CONNECTIONSTATE_REQUEST is emitted here and an overdue response is
    /// escalated through the state machine.
    pub async fn poll_event(&mut self) -> Result<Option<EndpointEvent>> {
        if let Some(event) = self.events.pop_front() {
            return Ok(Some(event));
        }
        if !self.is_connected() {
            return Ok(None);
        }

        self.drive_heartbeat().await?;

        match with_timeout(POLL_WINDOW, self.transport.recv_from(&mut self.rx_buffer)).await {
            Ok(Ok((n, _from))) => {
                let bytes: Vec<u8, MAX_FRAME_SIZE> = Vec::from_slice(&self.rx_buffer[..n])
                    .map_err(|_| KnxError::out_of_resource())?;
                let actions = self.connection.handle_frame(&bytes);
                self.run_actions(actions).await?;
            }
            Ok(Err(e)) if e.is_timeout() => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {}
        }
        Ok(self.events.pop_front())
    }

    /// Tear the channel down; best effort, never delivers events afterward.
    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.is_connected() {
            self.events.clear();
            return Ok(());
        }
        let actions = self.connection.disconnect()?;
        self.run_actions(actions).await?;

        while self.state() == EndpointState::Disconnecting {
            match with_timeout(
                self.config.disconnect_timeout,
                self.transport.recv_from(&mut self.rx_buffer),
            )
            .await
            {
                Ok(Ok((n, _from))) => {
                    let bytes: Vec<u8, MAX_FRAME_SIZE> = Vec::from_slice(&self.rx_buffer[..n])
                        .map_err(|_| KnxError::out_of_resource())?;
                    let actions = self.connection.handle_frame(&bytes);
                    self.run_actions(actions).await?;
                }
                _ => {
                    let actions = self.connection.disconnect_elapsed();
                    self.run_actions(actions).await?;
                }
            }
        }
        self.events.clear();
        self.transport.close();
        Ok(())
    }

    /// Drain pending events into `sink`.
    pub fn drain_events(&mut self, sink: &mut impl EventSink) {
        while let Some(event) = self.events.pop_front() {
            sink.on_event(event);
        }
    }

    async fn drive_heartbeat(&mut self) -> Result<()> {
        let now = Instant::now();
        match self.heartbeat_sent_at {
            None => {
                if now.duration_since(self.last_heartbeat) >= self.config.heartbeat_interval {
                    let actions = self.connection.heartbeat_due();
                    self.run_actions(actions).await?;
                    self.heartbeat_sent_at = Some(now);
                }
            }
            Some(sent) => {
                if self.state() == EndpointState::Connected {
                    // Response arrived through the normal receive path.
                    self.heartbeat_sent_at = None;
                    self.last_heartbeat = now;
                } else if now.duration_since(sent) >= self.config.heartbeat_timeout {
                    let actions = self.connection.heartbeat_elapsed();
                    self.run_actions(actions).await?;
                    self.heartbeat_sent_at = Some(now);
                    if self.state() == EndpointState::Failed {
                        self.heartbeat_sent_at = None;
                    }
                }
            }
        }
        Ok(())
    }

    async fn run_actions(&mut self, actions: Actions) -> Result<()> {
        for action in actions {
            match action {
                Action::Send(frame) => {
                    self.transport.send_to(frame.bytes(), self.server).await?;
                }
                Action::Deliver(cemi) => {
                    if self.events.push_back(EndpointEvent::Frame(cemi)).is_err() {
                        return Err(KnxError::out_of_resource());
                    }
                }
                Action::StateChanged(state) => {
                    let _ = self.events.push_back(EndpointEvent::StateChanged(state));
                }
                Action::Error(error) => {
                    let _ = self.events.push_back(EndpointEvent::Error(error));
                }
            }
        }
        Ok(())
    }

    /// Pull the most recent error event out of the queue, or synthesize a
    /// connect timeout when none was recorded.
    fn take_error(&mut self) -> KnxError {
        let mut found = None;
        while let Some(event) = self.events.pop_front() {
            if let EndpointEvent::Error(e) = event {
                found = Some(e);
            }
        }
        found.unwrap_or_else(KnxError::connect_timeout)
    }
}

impl<T: AsyncTransport> Drop for Endpoint<T> {
    fn drop(&mut self) {
        // Graceful teardown needs the async context; at minimum release
        // the socket.
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock_transport::MockTransport;
    use crate::net::Ipv4Addr;
    use crate::protocol::services::{DataAck, DataRequest, DisconnectResponse};

    fn gateway() -> IpEndpoint {
        IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671)
    }

    fn connect_response(channel: u8) -> std::vec::Vec<u8> {
        let mut bytes = std::vec![0x06, 0x10, 0x02, 0x06, 0x00, 0x14, channel, 0x00];
        bytes.extend_from_slice(&[0x08, 0x01, 192, 168, 1, 10, 0x0E, 0x57]);
        bytes.extend_from_slice(&[0x04, 0x04, 0x11, 0x0A]);
        bytes
    }

    #[tokio::test]
    async fn connect_handshake() {
        let mut mock = MockTransport::new();
        mock.add_response(connect_response(5));

        let mut endpoint = Endpoint::tunnel(mock, gateway());
        endpoint.connect().await.unwrap();
        assert!(endpoint.is_connected());
        assert_eq!(endpoint.channel_id(), 5);
    }

    #[tokio::test]
    async fn connect_timeout_reports_error() {
        // No scripted response: the mock acts as a silent server.
        let mock = MockTransport::new();
        let mut endpoint = Endpoint::tunnel(mock, gateway());
        let err = endpoint.connect().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(endpoint.state(), EndpointState::Failed);
    }

    #[tokio::test]
    async fn send_waits_for_matching_ack() {
        let mut mock = MockTransport::new();
        mock.add_response(connect_response(5));
        mock.add_response(DataAck::tunneling(5, 0, 0).build().unwrap().bytes().to_vec());

        let mut endpoint = Endpoint::tunnel(mock, gateway());
        endpoint.connect().await.unwrap();

        let cemi = [0x11, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x08, 0x01, 0x00, 0x00, 0x81];
        endpoint.send(&cemi).await.unwrap();
        assert!(!endpoint.connection().has_outstanding_request());
    }

    #[tokio::test]
    async fn unacked_send_retransmits_then_fails() {
        let mut mock = MockTransport::new();
        mock.add_response(connect_response(5));
        // No ack scripted at all.
        let mut endpoint = Endpoint::tunnel(mock, gateway());
        endpoint.connect().await.unwrap();

        let cemi = [0x11, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x08, 0x01, 0x00, 0x00, 0x81];
        let err = endpoint.send(&cemi).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(endpoint.state(), EndpointState::Failed);
    }

    #[tokio::test]
    async fn incoming_request_surfaces_as_frame_event() {
        let cemi = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x00, 0x00, 0x80];
        let mut mock = MockTransport::new();
        mock.add_response(connect_response(5));
        mock.add_response(
            DataRequest::tunneling(5, 0, &cemi)
                .unwrap()
                .build()
                .unwrap()
                .bytes()
                .to_vec(),
        );

        let mut endpoint = Endpoint::tunnel(mock, gateway());
        endpoint.connect().await.unwrap();

        let event = endpoint.poll_event().await.unwrap();
        match event {
            Some(EndpointEvent::Frame(data)) => assert_eq!(data.as_slice(), &cemi),
            other => panic!("expected frame event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn disconnect_completes_and_stops_delivery() {
        let mut mock = MockTransport::new();
        mock.add_response(connect_response(5));
        mock.add_response(
            DisconnectResponse::new(5, 0)
                .build()
                .unwrap()
                .bytes()
                .to_vec(),
        );

        let mut endpoint = Endpoint::tunnel(mock, gateway());
        endpoint.connect().await.unwrap();
        endpoint.disconnect().await.unwrap();
        assert_eq!(endpoint.state(), EndpointState::Disconnected);
        assert!(endpoint.poll_event().await.unwrap().is_none());
    }
}
