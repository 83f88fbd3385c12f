//! Endpoint connection state machine.
//!
//! The client side of a tunneling or device-management channel: handshake,
//! heartbeat, the acknowledged request window with one retransmit, and
//! orderly disconnect. The machine is sans-IO — inputs are received frames,
//! elapsed deadlines and user commands; outputs are a bounded list of
//! [`Action`]s for the driver to execute. No method suspends and none reads
//! a clock, which is what makes the whole state space testable with plain
//! byte fixtures.
//!
//! ## State Machine
//!
//! ```text
//!            connect_to                CONNECT_RESPONSE(ok)
//! Disconnected ────────► Connecting ──────────────────────► Connected
//!      ▲                     │ timeout/refused                 │  ▲
//!      │                     ▼                    heartbeat due│  │response
//!      │                   Failed ◄──── 3 heartbeat failures ──┴──┘
//!      │                     ▲          or 2nd ack timeout   Heartbeat
//!      │   DISCONNECT done   │
//!      └─────────────── Disconnecting ◄── disconnect() / server request
//! ```
//!
//! The tunneling contract guarantees at most one in-flight request per
//! direction. Duplicate incoming sequence numbers are acknowledged again
//! but not re-delivered, which keeps servers that resend on a lost ACK
//! happy; anything further out of window is dropped silently.

use crate::error::{KnxError, Result};
use crate::knx_log;
use crate::net::IpEndpoint;
use crate::protocol::constants::{ConnectionType, ServiceType, E_NO_ERROR};
use crate::protocol::device_mgmt::{DeviceMgmtCode, DeviceMgmtFrame};
use crate::protocol::frame::{Frame, FrameView};
use crate::protocol::services::{
    ConnectRequest, ConnectResponse, ConnectionStateRequest, ConnectionStateResponse, DataAck,
    DataRequest, DisconnectRequest, DisconnectResponse, MAX_EMBEDDED_CEMI,
};
use crate::protocol::structures::Hpai;
use heapless::Vec;

/// Heartbeat failures tolerated before the channel is declared dead.
const MAX_HEARTBEAT_FAILURES: u8 = 3;

/// Consecutive peer protocol violations tolerated before giving up.
const MAX_PROTOCOL_ERRORS: u8 = 3;

/// Retransmissions of an unacknowledged request (one retransmit, then fail).
const MAX_RETRANSMITS: u8 = 1;

/// Endpoint connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointState {
    /// No channel.
    Disconnected,
    /// CONNECT_REQUEST sent, waiting for the response.
    Connecting,
    /// Channel established.
    Connected,
    /// CONNECTIONSTATE_REQUEST outstanding.
    Heartbeat,
    /// DISCONNECT_REQUEST sent or received, tearing down.
    Disconnecting,
    /// Channel failed; behaves as `Disconnected` once the error was seen.
    Failed,
}

/// One output of the state machine.
#[derive(Debug)]
pub enum Action {
    /// Transmit this frame to the peer.
    Send(Frame),
    /// Hand the embedded cEMI frame upward.
    Deliver(Vec<u8, MAX_EMBEDDED_CEMI>),
    /// The endpoint state changed.
    StateChanged(EndpointState),
    /// Surface a protocol/timeout error as an event.
    Error(KnxError),
}

/// Bounded action list produced by each input.
pub type Actions = Vec<Action, 4>;

#[derive(Debug, Clone)]
struct PendingRequest {
    frame: Frame,
    sequence: u8,
    retransmits: u8,
}

/// The sans-IO connection core.
#[derive(Debug)]
pub struct Connection {
    connection_type: ConnectionType,
    state: EndpointState,
    control_endpoint: Hpai,
    channel_id: u8,
    server_data_endpoint: Option<IpEndpoint>,
    send_sequence: u8,
    recv_sequence: u8,
    outbox: Option<PendingRequest>,
    heartbeat_failures: u8,
    protocol_errors: u8,
    client_initiated_disconnect: bool,
    pending_mgmt_request: Option<DeviceMgmtCode>,
}

impl Connection {
    /// A fresh, disconnected endpoint core. The control endpoint defaults
    /// to the NAT form; servers reply to the datagram source.
    pub fn new(connection_type: ConnectionType) -> Self {
        Self {
            connection_type,
            state: EndpointState::Disconnected,
            control_endpoint: Hpai::nat(),
            channel_id: 0,
            server_data_endpoint: None,
            send_sequence: 0,
            recv_sequence: 0,
            outbox: None,
            heartbeat_failures: 0,
            protocol_errors: 0,
            client_initiated_disconnect: false,
            pending_mgmt_request: None,
        }
    }

    /// A tunneling connection core.
    pub fn tunnel() -> Self {
        Self::new(ConnectionType::Tunnel)
    }

    /// A device management connection core.
    pub fn device_management() -> Self {
        Self::new(ConnectionType::DeviceManagement)
    }

    /// Use an explicit control HPAI instead of the NAT form.
    pub fn with_control_endpoint(mut self, hpai: Hpai) -> Self {
        self.control_endpoint = hpai;
        self
    }

    /// Current state.
    pub const fn state(&self) -> EndpointState {
        self.state
    }

    /// The connection type this core negotiates.
    pub const fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Channel id assigned by the server (0 while disconnected).
    pub const fn channel_id(&self) -> u8 {
        self.channel_id
    }

    /// Server data endpoint recorded from the CONNECT_RESPONSE.
    pub const fn server_data_endpoint(&self) -> Option<IpEndpoint> {
        self.server_data_endpoint
    }

    /// Next send sequence number.
    pub const fn send_sequence(&self) -> u8 {
        self.send_sequence
    }

    /// Expected receive sequence number.
    pub const fn recv_sequence(&self) -> u8 {
        self.recv_sequence
    }

    /// Whether a request is waiting for its acknowledgement.
    pub fn has_outstanding_request(&self) -> bool {
        self.outbox.is_some()
    }

    /// The device-management request kind the channel is waiting on.
    ///
    /// Needed to tell the colliding `M_FuncPropCommand.con` /
    /// `M_FuncPropStateRead.con` opcodes apart.
    pub const fn outstanding_mgmt_request(&self) -> Option<DeviceMgmtCode> {
        self.pending_mgmt_request
    }

    // -------------------------------------------------------------------------
    // User commands
    // -------------------------------------------------------------------------

    /// Start the handshake. Valid in `Disconnected`/`Failed`.
    pub fn connect_to(&mut self) -> Result<Actions> {
        if !matches!(
            self.state,
            EndpointState::Disconnected | EndpointState::Failed
        ) {
            return Err(KnxError::InvalidState);
        }
        let request = ConnectRequest {
            control_endpoint: self.control_endpoint,
            data_endpoint: self.control_endpoint,
            cri: match self.connection_type {
                ConnectionType::DeviceManagement => {
                    crate::protocol::structures::Cri::DeviceManagement
                }
                _ => crate::protocol::structures::Cri::tunnel_link_layer(),
            },
        };
        let mut actions = Actions::new();
        push(&mut actions, Action::Send(request.build()?));
        self.reset_channel();
        self.transition(EndpointState::Connecting, &mut actions);
        Ok(actions)
    }

    /// Queue one cEMI frame. Valid in `Connected` with an empty outbox —
    /// the channel carries at most one outstanding request.
    pub fn send_cemi(&mut self, cemi: &[u8]) -> Result<Actions> {
        if self.state != EndpointState::Connected {
            return Err(KnxError::InvalidState);
        }
        if self.outbox.is_some() {
            return Err(KnxError::InvalidState);
        }
        let sequence = self.send_sequence;
        let request = match self.connection_type {
            ConnectionType::DeviceManagement => {
                self.pending_mgmt_request = DeviceMgmtFrame::parse(cemi).ok().map(|f| f.code);
                DataRequest::configuration(self.channel_id, sequence, cemi)?
            }
            _ => DataRequest::tunneling(self.channel_id, sequence, cemi)?,
        };
        let frame = request.build()?;
        self.outbox = Some(PendingRequest {
            frame: frame.clone(),
            sequence,
            retransmits: 0,
        });
        self.send_sequence = self.send_sequence.wrapping_add(1);
        let mut actions = Actions::new();
        push(&mut actions, Action::Send(frame));
        Ok(actions)
    }

    /// Begin a client-initiated disconnect.
    pub fn disconnect(&mut self) -> Result<Actions> {
        if !matches!(
            self.state,
            EndpointState::Connected | EndpointState::Heartbeat
        ) {
            return Err(KnxError::InvalidState);
        }
        let request = DisconnectRequest::new(self.channel_id, self.control_endpoint);
        let mut actions = Actions::new();
        push(&mut actions, Action::Send(request.build()?));
        self.client_initiated_disconnect = true;
        self.transition(EndpointState::Disconnecting, &mut actions);
        Ok(actions)
    }

    // -------------------------------------------------------------------------
    // Deadlines (driven by the endpoint task)
    // -------------------------------------------------------------------------

    /// The connect deadline elapsed without a response.
    pub fn connect_elapsed(&mut self) -> Actions {
        let mut actions = Actions::new();
        if self.state == EndpointState::Connecting {
            push(
                &mut actions,
                Action::Error(KnxError::connect_timeout()),
            );
            self.transition(EndpointState::Failed, &mut actions);
        }
        actions
    }

    /// The heartbeat interval elapsed; emit a CONNECTIONSTATE_REQUEST.
    pub fn heartbeat_due(&mut self) -> Actions {
        let mut actions = Actions::new();
        if self.state != EndpointState::Connected {
            return actions;
        }
        match ConnectionStateRequest::new(self.channel_id, self.control_endpoint).build() {
            Ok(frame) => {
                push(&mut actions, Action::Send(frame));
                self.transition(EndpointState::Heartbeat, &mut actions);
            }
            Err(e) => push(&mut actions, Action::Error(e)),
        }
        actions
    }

    /// The heartbeat response deadline elapsed.
    ///
    /// Retries the CONNECTIONSTATE_REQUEST until the third consecutive
    /// miss, then declares the channel dead.
    pub fn heartbeat_elapsed(&mut self) -> Actions {
        let mut actions = Actions::new();
        if self.state != EndpointState::Heartbeat {
            return actions;
        }
        self.heartbeat_failures += 1;
        if self.heartbeat_failures >= MAX_HEARTBEAT_FAILURES {
            knx_log!(warn, "heartbeat lost, channel {} failed", self.channel_id);
            push(
                &mut actions,
                Action::Error(KnxError::heartbeat_timeout()),
            );
            self.transition(EndpointState::Failed, &mut actions);
            return actions;
        }
        match ConnectionStateRequest::new(self.channel_id, self.control_endpoint).build() {
            Ok(frame) => push(&mut actions, Action::Send(frame)),
            Err(e) => push(&mut actions, Action::Error(e)),
        }
        actions
    }

    /// The acknowledgement deadline elapsed.
    ///
    /// Retransmits the pending request once; a second miss fails the
    /// channel.
    pub fn ack_elapsed(&mut self) -> Actions {
        let mut actions = Actions::new();
        let Some(pending) = self.outbox.as_mut() else {
            return actions;
        };
        if pending.retransmits < MAX_RETRANSMITS {
            pending.retransmits += 1;
            knx_log!(
                debug,
                "ack timeout, retransmitting sequence {}",
                pending.sequence
            );
            let frame = pending.frame.clone();
            push(&mut actions, Action::Send(frame));
        } else {
            self.outbox = None;
            push(&mut actions, Action::Error(KnxError::ack_timeout()));
            self.transition(EndpointState::Failed, &mut actions);
        }
        actions
    }

    /// The disconnect deadline elapsed; finish regardless.
    pub fn disconnect_elapsed(&mut self) -> Actions {
        let mut actions = Actions::new();
        if self.state == EndpointState::Disconnecting {
            push(&mut actions, Action::Error(KnxError::disconnect_timeout()));
            self.reset_channel();
            self.transition(EndpointState::Disconnected, &mut actions);
        }
        actions
    }

    // -------------------------------------------------------------------------
    // Frame input
    // -------------------------------------------------------------------------

    /// Feed one received datagram.
    ///
    /// Corrupt frames never propagate: they are logged and dropped, and the
    /// returned action list is empty.
    pub fn handle_frame(&mut self, data: &[u8]) -> Actions {
        let mut actions = Actions::new();
        let view = match FrameView::parse(data) {
            Ok(view) => view,
            Err(_) => {
                knx_log!(debug, "dropping malformed datagram ({} bytes)", data.len());
                return actions;
            }
        };

        match view.service_type() {
            ServiceType::ConnectResponse => self.on_connect_response(view.body(), &mut actions),
            ServiceType::ConnectionStateResponse => {
                self.on_heartbeat_response(view.body(), &mut actions)
            }
            ServiceType::DisconnectRequest => self.on_disconnect_request(view.body(), &mut actions),
            ServiceType::DisconnectResponse => {
                self.on_disconnect_response(view.body(), &mut actions)
            }
            ServiceType::TunnelingRequest | ServiceType::DeviceConfigurationRequest => {
                self.on_data_request(view.service_type(), view.body(), &mut actions)
            }
            ServiceType::TunnelingAck | ServiceType::DeviceConfigurationAck => {
                self.on_data_ack(view.service_type(), view.body(), &mut actions)
            }
            other => {
                knx_log!(debug, "unexpected service type {} on channel", other.to_u16());
                self.count_protocol_error(
                    KnxError::unexpected_service_type(),
                    &mut actions,
                );
            }
        }
        actions
    }

    fn on_connect_response(&mut self, body: &[u8], actions: &mut Actions) {
        if self.state != EndpointState::Connecting {
            return;
        }
        let response = match ConnectResponse::parse(body) {
            Ok(r) => r,
            Err(_) => {
                push(actions, Action::Error(KnxError::length_mismatch()));
                self.transition(EndpointState::Failed, actions);
                return;
            }
        };
        if !response.is_ok() {
            push(
                actions,
                Action::Error(KnxError::negative_status(response.status)),
            );
            self.transition(EndpointState::Failed, actions);
            return;
        }
        self.channel_id = response.channel_id;
        self.server_data_endpoint = Some(response.data_endpoint.endpoint());
        self.send_sequence = 0;
        self.recv_sequence = 0;
        self.heartbeat_failures = 0;
        self.protocol_errors = 0;
        knx_log!(info, "channel {} established", self.channel_id);
        self.transition(EndpointState::Connected, actions);
    }

    fn on_heartbeat_response(&mut self, body: &[u8], actions: &mut Actions) {
        if self.state != EndpointState::Heartbeat {
            return;
        }
        let response = match ConnectionStateResponse::parse(body) {
            Ok(r) => r,
            Err(_) => return,
        };
        if response.channel_id != self.channel_id {
            self.count_protocol_error(KnxError::wrong_channel(), actions);
            return;
        }
        if response.is_ok() {
            self.heartbeat_failures = 0;
            self.protocol_errors = 0;
            self.transition(EndpointState::Connected, actions);
        } else {
            push(
                actions,
                Action::Error(KnxError::negative_status(response.status)),
            );
            self.transition(EndpointState::Failed, actions);
        }
    }

    fn on_disconnect_request(&mut self, body: &[u8], actions: &mut Actions) {
        let request = match DisconnectRequest::parse(body) {
            Ok(r) => r,
            Err(_) => return,
        };
        if request.channel_id != self.channel_id {
            self.count_protocol_error(KnxError::wrong_channel(), actions);
            return;
        }
        // Server-initiated teardown: confirm, then drop the channel.
        match DisconnectResponse::new(self.channel_id, E_NO_ERROR).build() {
            Ok(frame) => push(actions, Action::Send(frame)),
            Err(e) => push(actions, Action::Error(e)),
        }
        knx_log!(info, "server disconnected channel {}", self.channel_id);
        self.reset_channel();
        self.transition(EndpointState::Disconnected, actions);
    }

    fn on_disconnect_response(&mut self, body: &[u8], actions: &mut Actions) {
        if self.state != EndpointState::Disconnecting || !self.client_initiated_disconnect {
            return;
        }
        if let Ok(response) = DisconnectResponse::parse(body) {
            if response.channel_id != self.channel_id {
                self.count_protocol_error(KnxError::wrong_channel(), actions);
                return;
            }
        }
        self.reset_channel();
        self.transition(EndpointState::Disconnected, actions);
    }

    fn on_data_request(&mut self, service: ServiceType, body: &[u8], actions: &mut Actions) {
        if !matches!(
            self.state,
            EndpointState::Connected | EndpointState::Heartbeat
        ) {
            return;
        }
        let expected_service = match self.connection_type {
            ConnectionType::DeviceManagement => ServiceType::DeviceConfigurationRequest,
            _ => ServiceType::TunnelingRequest,
        };
        if service != expected_service {
            self.count_protocol_error(KnxError::unexpected_service_type(), actions);
            return;
        }
        let request = match DataRequest::parse(service, body) {
            Ok(r) => r,
            Err(_) => return,
        };
        if request.channel_id != self.channel_id {
            self.count_protocol_error(KnxError::wrong_channel(), actions);
            return;
        }

        let expected = self.recv_sequence;
        let duplicate = expected.wrapping_sub(1);
        if request.sequence == expected {
            self.recv_sequence = self.recv_sequence.wrapping_add(1);
            self.protocol_errors = 0;
            if let Ok(ack) = self.build_ack(request.sequence) {
                push(actions, Action::Send(ack));
            }
            if self.connection_type == ConnectionType::DeviceManagement {
                // A confirmation resolves the outstanding request context.
                if let Ok(frame) = DeviceMgmtFrame::parse(&request.cemi) {
                    if frame.code == DeviceMgmtCode::FunctionPropertyConfirmation
                        || frame.code == DeviceMgmtCode::PropertyReadConfirmation
                        || frame.code == DeviceMgmtCode::PropertyWriteConfirmation
                    {
                        self.pending_mgmt_request = None;
                    }
                }
            }
            push(actions, Action::Deliver(request.cemi));
        } else if request.sequence == duplicate {
            // The peer resent because our ACK was lost; confirm again but
            // do not deliver twice.
            knx_log!(debug, "duplicate sequence {}, re-acking", request.sequence);
            if let Ok(ack) = self.build_ack(request.sequence) {
                push(actions, Action::Send(ack));
            }
        } else {
            knx_log!(
                debug,
                "sequence {} outside window (expected {}), dropped",
                request.sequence,
                expected
            );
        }
    }

    fn on_data_ack(&mut self, service: ServiceType, body: &[u8], actions: &mut Actions) {
        let ack = match DataAck::parse(service, body) {
            Ok(a) => a,
            Err(_) => return,
        };
        if ack.channel_id != self.channel_id {
            self.count_protocol_error(KnxError::wrong_channel(), actions);
            return;
        }
        let Some(pending) = self.outbox.as_ref() else {
            return;
        };
        if ack.sequence != pending.sequence {
            self.count_protocol_error(KnxError::sequence_out_of_window(), actions);
            return;
        }
        self.outbox = None;
        self.protocol_errors = 0;
        if !ack.is_ok() {
            push(actions, Action::Error(KnxError::negative_status(ack.status)));
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn build_ack(&self, sequence: u8) -> Result<Frame> {
        let ack = match self.connection_type {
            ConnectionType::DeviceManagement => {
                DataAck::configuration(self.channel_id, sequence, E_NO_ERROR)
            }
            _ => DataAck::tunneling(self.channel_id, sequence, E_NO_ERROR),
        };
        ack.build()
    }

    fn count_protocol_error(&mut self, error: KnxError, actions: &mut Actions) {
        self.protocol_errors += 1;
        push(actions, Action::Error(error));
        if self.protocol_errors >= MAX_PROTOCOL_ERRORS
            && !matches!(
                self.state,
                EndpointState::Disconnected | EndpointState::Failed
            )
        {
            self.transition(EndpointState::Failed, actions);
        }
    }

    fn transition(&mut self, next: EndpointState, actions: &mut Actions) {
        if self.state != next {
            self.state = next;
            push(actions, Action::StateChanged(next));
        }
    }

    fn reset_channel(&mut self) {
        self.channel_id = 0;
        self.server_data_endpoint = None;
        self.send_sequence = 0;
        self.recv_sequence = 0;
        self.outbox = None;
        self.heartbeat_failures = 0;
        self.protocol_errors = 0;
        self.client_initiated_disconnect = false;
        self.pending_mgmt_request = None;
    }
}

/// Push that tolerates a full action list; the list is sized for the worst
/// real case, overflow would mean a logic bug and the action is dropped
/// with a log line rather than a panic.
fn push(actions: &mut Actions, action: Action) {
    if actions.push(action).is_err() {
        knx_log!(error, "action list overflow, dropping action");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolErrorKind;
    use crate::protocol::constants::E_NO_MORE_CONNECTIONS;

    fn connect_response(channel: u8, status: u8) -> std::vec::Vec<u8> {
        let mut bytes = std::vec![
            0x06, 0x10, 0x02, 0x06, 0x00, 0x14, // header
            channel, status,
        ];
        bytes.extend_from_slice(&[0x08, 0x01, 192, 168, 1, 10, 0x0E, 0x57]); // HPAI
        bytes.extend_from_slice(&[0x04, 0x04, 0x11, 0x0A]); // tunnel CRD
        bytes
    }

    fn connected() -> Connection {
        let mut conn = Connection::tunnel();
        conn.connect_to().unwrap();
        conn.handle_frame(&connect_response(7, 0));
        assert_eq!(conn.state(), EndpointState::Connected);
        conn
    }

    fn has_state_change(actions: &Actions, state: EndpointState) -> bool {
        actions
            .iter()
            .any(|a| matches!(a, Action::StateChanged(s) if *s == state))
    }

    fn sent_frames(actions: &Actions) -> std::vec::Vec<&Frame> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(f) => Some(f),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn scripted_connect_and_server_disconnect() {
        let mut conn = Connection::tunnel();
        let actions = conn.connect_to().unwrap();
        assert_eq!(conn.state(), EndpointState::Connecting);
        let frames = sent_frames(&actions);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].service_type(), ServiceType::ConnectRequest);

        let actions = conn.handle_frame(&connect_response(7, 0));
        assert!(has_state_change(&actions, EndpointState::Connected));
        assert_eq!(conn.channel_id(), 7);

        // Server-initiated disconnect: respond with status 0, drop channel.
        let disconnect = DisconnectRequest::new(7, Hpai::nat()).build().unwrap();
        let actions = conn.handle_frame(disconnect.bytes());
        let frames = sent_frames(&actions);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].service_type(), ServiceType::DisconnectResponse);
        assert_eq!(frames[0].body(), &[7, 0]);
        assert!(has_state_change(&actions, EndpointState::Disconnected));
        assert_eq!(conn.state(), EndpointState::Disconnected);
    }

    #[test]
    fn refused_connect_fails_with_status() {
        let mut conn = Connection::tunnel();
        conn.connect_to().unwrap();
        let actions = conn.handle_frame(&connect_response(0, E_NO_MORE_CONNECTIONS));
        assert_eq!(conn.state(), EndpointState::Failed);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Error(KnxError::Protocol(e))
                if e.kind() == ProtocolErrorKind::NegativeStatus(E_NO_MORE_CONNECTIONS)
        )));
    }

    #[test]
    fn connect_timeout_fails() {
        let mut conn = Connection::tunnel();
        conn.connect_to().unwrap();
        let actions = conn.connect_elapsed();
        assert_eq!(conn.state(), EndpointState::Failed);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Error(e) if e.is_timeout())));
        // Failed behaves as Disconnected: reconnecting is allowed.
        assert!(conn.connect_to().is_ok());
    }

    #[test]
    fn send_assigns_wrapping_sequence_and_blocks_second_request() {
        let mut conn = connected();
        let cemi = [0x11, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x08, 0x01, 0x00, 0x00, 0x81];
        let actions = conn.send_cemi(&cemi).unwrap();
        let frames = sent_frames(&actions);
        assert_eq!(frames[0].service_type(), ServiceType::TunnelingRequest);
        assert_eq!(conn.send_sequence(), 1);
        assert!(conn.has_outstanding_request());

        // At most one in-flight request per channel.
        assert!(conn.send_cemi(&cemi).is_err());

        // Matching ack clears the slot.
        let ack = DataAck::tunneling(7, 0, 0).build().unwrap();
        conn.handle_frame(ack.bytes());
        assert!(!conn.has_outstanding_request());
        assert!(conn.send_cemi(&cemi).is_ok());
    }

    #[test]
    fn sequence_wraps_modulo_256() {
        let mut conn = connected();
        let cemi = [0x11, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x08, 0x01, 0x00, 0x00, 0x81];
        for expected in 0..=255u8 {
            let actions = conn.send_cemi(&cemi).unwrap();
            let frames = sent_frames(&actions);
            // Connection header sequence octet.
            assert_eq!(frames[0].body()[2], expected);
            let ack = DataAck::tunneling(7, expected, 0).build().unwrap();
            conn.handle_frame(ack.bytes());
        }
        assert_eq!(conn.send_sequence(), 0);
    }

    #[test]
    fn ack_timeout_retransmits_once_then_fails() {
        let mut conn = connected();
        let cemi = [0x11, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x08, 0x01, 0x00, 0x00, 0x81];
        let first = conn.send_cemi(&cemi).unwrap();
        let original = sent_frames(&first)[0].bytes().to_vec();

        let retry = conn.ack_elapsed();
        let frames = sent_frames(&retry);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes(), original.as_slice());
        assert_eq!(conn.state(), EndpointState::Connected);

        let fail = conn.ack_elapsed();
        assert!(has_state_change(&fail, EndpointState::Failed));
        assert!(fail
            .iter()
            .any(|a| matches!(a, Action::Error(e) if e.is_timeout())));
    }

    #[test]
    fn incoming_request_is_acked_and_delivered_in_order() {
        let mut conn = connected();
        let cemi = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x00, 0x00, 0x80];
        let request = DataRequest::tunneling(7, 0, &cemi).unwrap().build().unwrap();

        let actions = conn.handle_frame(request.bytes());
        let frames = sent_frames(&actions);
        assert_eq!(frames[0].service_type(), ServiceType::TunnelingAck);
        assert_eq!(frames[0].body(), &[0x04, 7, 0, 0]);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Deliver(d) if d.as_slice() == cemi)));
        assert_eq!(conn.recv_sequence(), 1);
    }

    #[test]
    fn duplicate_sequence_is_reacked_but_not_redelivered() {
        let mut conn = connected();
        let cemi = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x00, 0x00, 0x80];
        let request = DataRequest::tunneling(7, 0, &cemi).unwrap().build().unwrap();
        conn.handle_frame(request.bytes());

        // Same sequence again: the peer missed our ACK.
        let actions = conn.handle_frame(request.bytes());
        let frames = sent_frames(&actions);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].service_type(), ServiceType::TunnelingAck);
        assert!(!actions.iter().any(|a| matches!(a, Action::Deliver(_))));
        assert_eq!(conn.recv_sequence(), 1);
    }

    #[test]
    fn out_of_window_sequence_is_dropped_silently() {
        let mut conn = connected();
        let cemi = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x00, 0x00, 0x80];
        let request = DataRequest::tunneling(7, 9, &cemi).unwrap().build().unwrap();
        let actions = conn.handle_frame(request.bytes());
        assert!(actions.is_empty());
        assert_eq!(conn.recv_sequence(), 0);
    }

    #[test]
    fn wrong_channel_counts_toward_failure() {
        let mut conn = connected();
        let cemi = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x00, 0x00, 0x80];
        let request = DataRequest::tunneling(9, 0, &cemi).unwrap().build().unwrap();
        for _ in 0..2 {
            let actions = conn.handle_frame(request.bytes());
            assert!(actions
                .iter()
                .any(|a| matches!(a, Action::Error(KnxError::Protocol(_)))));
            assert_eq!(conn.state(), EndpointState::Connected);
        }
        let actions = conn.handle_frame(request.bytes());
        assert!(has_state_change(&actions, EndpointState::Failed));
    }

    #[test]
    fn heartbeat_cycle() {
        let mut conn = connected();
        let actions = conn.heartbeat_due();
        let frames = sent_frames(&actions);
        assert_eq!(
            frames[0].service_type(),
            ServiceType::ConnectionStateRequest
        );
        assert_eq!(conn.state(), EndpointState::Heartbeat);

        let response = ConnectionStateResponse::new(7, 0).build().unwrap();
        let actions = conn.handle_frame(response.bytes());
        assert!(has_state_change(&actions, EndpointState::Connected));
    }

    #[test]
    fn three_missed_heartbeats_fail_the_channel() {
        let mut conn = connected();
        conn.heartbeat_due();

        // Two misses: retried, still alive.
        for _ in 0..2 {
            let actions = conn.heartbeat_elapsed();
            let frames = sent_frames(&actions);
            assert_eq!(frames.len(), 1);
            assert_eq!(
                frames[0].service_type(),
                ServiceType::ConnectionStateRequest
            );
            assert_eq!(conn.state(), EndpointState::Heartbeat);
        }

        // Third miss: dead.
        let actions = conn.heartbeat_elapsed();
        assert!(has_state_change(&actions, EndpointState::Failed));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Error(e) if e.is_timeout())));
    }

    #[test]
    fn heartbeat_response_resets_the_failure_counter() {
        let mut conn = connected();
        conn.heartbeat_due();
        conn.heartbeat_elapsed();
        conn.heartbeat_elapsed();

        let response = ConnectionStateResponse::new(7, 0).build().unwrap();
        conn.handle_frame(response.bytes());
        assert_eq!(conn.state(), EndpointState::Connected);

        // A fresh cycle gets three new attempts.
        conn.heartbeat_due();
        conn.heartbeat_elapsed();
        conn.heartbeat_elapsed();
        assert_eq!(conn.state(), EndpointState::Heartbeat);
        conn.heartbeat_elapsed();
        assert_eq!(conn.state(), EndpointState::Failed);
    }

    #[test]
    fn client_disconnect_waits_for_response() {
        let mut conn = connected();
        let actions = conn.disconnect().unwrap();
        let frames = sent_frames(&actions);
        assert_eq!(frames[0].service_type(), ServiceType::DisconnectRequest);
        assert_eq!(conn.state(), EndpointState::Disconnecting);

        let response = DisconnectResponse::new(7, 0).build().unwrap();
        let actions = conn.handle_frame(response.bytes());
        assert!(has_state_change(&actions, EndpointState::Disconnected));
        assert_eq!(conn.channel_id(), 0);
    }

    #[test]
    fn disconnect_timeout_completes_anyway() {
        let mut conn = connected();
        conn.disconnect().unwrap();
        let actions = conn.disconnect_elapsed();
        assert!(has_state_change(&actions, EndpointState::Disconnected));
    }

    #[test]
    fn malformed_datagrams_are_dropped_silently() {
        let mut conn = connected();
        assert!(conn.handle_frame(&[0x06, 0x10]).is_empty());
        assert!(conn.handle_frame(&[0xFF; 16]).is_empty());
        // Truncated but valid header: declared length too large.
        assert!(conn
            .handle_frame(&[0x06, 0x10, 0x04, 0x20, 0x00, 0x40, 0x00])
            .is_empty());
        assert_eq!(conn.state(), EndpointState::Connected);
    }

    #[test]
    fn device_management_uses_configuration_services() {
        let mut conn = Connection::device_management();
        conn.connect_to().unwrap();
        // CONNECT_RESPONSE with device management CRD.
        let mut bytes = std::vec![0x06, 0x10, 0x02, 0x06, 0x00, 0x12, 3, 0];
        bytes.extend_from_slice(&[0x08, 0x01, 192, 168, 1, 10, 0x0E, 0x57]);
        bytes.extend_from_slice(&[0x02, 0x03]);
        conn.handle_frame(&bytes);
        assert_eq!(conn.state(), EndpointState::Connected);

        let mgmt = DeviceMgmtFrame::property_read(0x000B, 1, 52, 1, 0);
        let cemi = mgmt.to_bytes().unwrap();
        let actions = conn.send_cemi(cemi.as_slice()).unwrap();
        let frames = sent_frames(&actions);
        assert_eq!(
            frames[0].service_type(),
            ServiceType::DeviceConfigurationRequest
        );
        assert_eq!(
            conn.outstanding_mgmt_request(),
            Some(DeviceMgmtCode::PropertyReadRequest)
        );

        // Ack, then the confirmation arrives as a configuration request.
        let ack = DataAck::configuration(3, 0, 0).build().unwrap();
        conn.handle_frame(ack.bytes());

        let confirmation = [0xFB, 0x00, 0x0B, 0x01, 0x34, 0x10, 0x00, 0x01];
        let request = DataRequest::configuration(3, 0, &confirmation)
            .unwrap()
            .build()
            .unwrap();
        let actions = conn.handle_frame(request.bytes());
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Deliver(d) if d.as_slice() == confirmation)));
        let frames = sent_frames(&actions);
        assert_eq!(
            frames[0].service_type(),
            ServiceType::DeviceConfigurationAck
        );
        // Context resolved by the confirmation.
        assert_eq!(conn.outstanding_mgmt_request(), None);
    }
}
