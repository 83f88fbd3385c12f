//! Secure session establishment and framing.
//!
//! The KNXnet/IP Secure overlay: an X25519 handshake authenticated by
//! password-derived keys, then AES-CCM secure wrappers around every
//! application frame, with strictly increasing 48-bit sequence counters on
//! both directions for replay protection.
//!
//! ## Establishment (over TCP)
//!
//! ```text
//! Client                               Server
//!   |-- SESSION_REQUEST (pubkey) -------->|
//!   |<- SESSION_RESPONSE (id, pub, MAC) --|   MAC: device auth hash
//!   |-- SESSION_AUTHENTICATE (user, MAC)->|   MAC: user password hash
//!   |<- SESSION_STATUS ------------------ |
//! ```
//!
//! Both handshake MACs cover `XOR(client_public, server_public)` and are
//! transmitted in encrypted form. The session key is the truncated SHA-256
//! of the X25519 shared secret.
//!
//! [`SecureSessionCore`] is the sans-IO half (handshake steps, seal/open,
//! replay window); [`SecureSession`] drives it over an
//! [`AsyncTransport`]. [`GroupTimer`] carries the timer-notify
//! synchronization used by secure multicast routing.

use crate::bytes::MAX_FRAME_SIZE;
use crate::error::{KnxError, Result};
use crate::knx_log;
use crate::net::transport::AsyncTransport;
use crate::net::IpEndpoint;
use crate::protocol::constants::{ServiceType, SessionStatusCode};
use crate::protocol::frame::{Frame, FrameView};
use crate::protocol::structures::Hpai;
use crate::secure::crypto::{
    compute_mac, decrypt_mac, decrypt_payload, device_authentication_code_hash, encrypt_mac,
    encrypt_payload, public_key_xor, user_password_hash, CurveKeypair, PayloadBuffer,
};
use crate::secure::frames::{
    SecureWrapper, SessionAuthenticate, SessionRequest, SessionResponse, SessionStatus,
    TimerNotify,
};
use embassy_time::{with_timeout, Duration};
use zeroize::Zeroize;

/// Handshake step timeout (the protocol's authentication timeout).
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Receive window used by [`SecureSession::poll_frame`] per call.
const POLL_WINDOW: Duration = Duration::from_millis(100);

/// Default timer-notify tolerance window in milliseconds.
const TIMER_TOLERANCE_MS: u64 = 2000;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecureState {
    /// Nothing sent yet.
    Idle,
    /// SESSION_REQUEST sent; waiting for the server's response.
    AwaitingResponse,
    /// SESSION_AUTHENTICATE sent; waiting for the status verdict.
    AwaitingStatus,
    /// Session established; wrappers flow.
    Authenticated,
    /// Session over (closed, expired, or a security fault).
    Closed,
}

/// Credentials for one secure session.
#[derive(Debug, Clone)]
pub struct SecureCredentials {
    /// Secure user id, 1..=127.
    pub user_id: u8,
    /// Hash of the user password.
    pub user_password_hash: [u8; 16],
    /// Hash of the device authentication code.
    pub device_authentication_hash: [u8; 16],
}

impl SecureCredentials {
    /// Derive both hashes from the plaintext secrets.
    pub fn derive(user_id: u8, user_password: &[u8], device_code: &[u8]) -> Result<Self> {
        Ok(Self {
            user_id,
            user_password_hash: user_password_hash(user_password)?,
            device_authentication_hash: device_authentication_code_hash(device_code)?,
        })
    }
}

impl Drop for SecureCredentials {
    fn drop(&mut self) {
        self.user_password_hash.zeroize();
        self.device_authentication_hash.zeroize();
    }
}

/// The sans-IO secure session state machine.
pub struct SecureSessionCore {
    keypair: CurveKeypair,
    serial: [u8; 6],
    credentials: SecureCredentials,
    state: SecureState,
    session_id: u16,
    session_key: [u8; 16],
    peer_public: [u8; 32],
    send_sequence: u64,
    last_received: Option<u64>,
    message_tag: u16,
}

impl SecureSessionCore {
    /// Create a session core.
    ///
    /// `keypair` comes from caller-supplied entropy, `serial` is the
    /// client's KNX serial number carried in every wrapper.
    pub fn new(keypair: CurveKeypair, serial: [u8; 6], credentials: SecureCredentials) -> Self {
        Self {
            keypair,
            serial,
            credentials,
            state: SecureState::Idle,
            session_id: 0,
            session_key: [0u8; 16],
            peer_public: [0u8; 32],
            send_sequence: 0,
            last_received: None,
            message_tag: 0,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SecureState {
        self.state
    }

    /// Session id assigned by the server.
    pub const fn session_id(&self) -> u16 {
        self.session_id
    }

    /// Next send sequence (48-bit, monotonically increasing).
    pub const fn send_sequence(&self) -> u64 {
        self.send_sequence
    }

    /// Step 1: the SESSION_REQUEST frame.
    pub fn start(&mut self) -> Result<Frame> {
        if self.state != SecureState::Idle {
            return Err(KnxError::InvalidState);
        }
        let request = SessionRequest::new(
            Hpai::tcp(crate::net::Ipv4Addr::UNSPECIFIED, 0),
            self.keypair.public_bytes(),
        );
        let frame = request.build()?;
        self.state = SecureState::AwaitingResponse;
        Ok(frame)
    }

    /// Step 2: verify the SESSION_RESPONSE, derive the session key, and
    /// produce the SESSION_AUTHENTICATE frame.
    pub fn handle_response(&mut self, body: &[u8]) -> Result<Frame> {
        if self.state != SecureState::AwaitingResponse {
            return Err(KnxError::InvalidState);
        }
        let response = SessionResponse::parse(body)?;
        let xor = public_key_xor(&self.keypair.public_bytes(), &response.public_key);

        // The transmitted MAC is masked; unmask, then compare against our
        // own computation keyed with the device authentication hash.
        let received = decrypt_mac(
            &self.credentials.device_authentication_hash,
            &response.mac,
            0,
            &[0u8; 6],
            0,
        );
        let expected = compute_mac(
            &self.credentials.device_authentication_hash,
            &SessionResponse::mac_header(),
            response.session_id,
            &xor,
            0,
            &[0u8; 6],
            0,
        )?;
        if received != expected {
            self.terminate();
            return Err(KnxError::mac_mismatch());
        }

        self.session_id = response.session_id;
        self.peer_public = response.public_key;
        self.session_key = self.keypair.derive_session_key(&response.public_key);

        let auth_mac = compute_mac(
            &self.credentials.user_password_hash,
            &SessionAuthenticate::mac_header(),
            u16::from(self.credentials.user_id),
            &xor,
            0,
            &[0u8; 6],
            0,
        )?;
        let masked = encrypt_mac(
            &self.credentials.user_password_hash,
            &auth_mac,
            0,
            &[0u8; 6],
            0,
        );
        let frame = SessionAuthenticate {
            user_id: self.credentials.user_id,
            mac: masked,
        }
        .build()?;
        self.state = SecureState::AwaitingStatus;
        Ok(frame)
    }

    /// Step 3: the server's SESSION_STATUS verdict.
    pub fn handle_status(&mut self, body: &[u8]) -> Result<SessionStatusCode> {
        let status = SessionStatus::parse(body)?.status;
        match status {
            SessionStatusCode::AuthenticationSuccess
                if self.state == SecureState::AwaitingStatus =>
            {
                self.state = SecureState::Authenticated;
                knx_log!(info, "secure session {} authenticated", self.session_id);
            }
            SessionStatusCode::KeepAlive => {}
            SessionStatusCode::AuthenticationFailed | SessionStatusCode::Unauthenticated => {
                self.terminate();
                return Err(KnxError::authentication_failed());
            }
            SessionStatusCode::Timeout | SessionStatusCode::Close => {
                self.terminate();
                return Err(KnxError::session_closed());
            }
            _ => {}
        }
        Ok(status)
    }

    /// Wrap one application frame in a SECURE_WRAPPER.
    pub fn seal(&mut self, frame_bytes: &[u8]) -> Result<Frame> {
        if self.state != SecureState::Authenticated {
            return Err(KnxError::session_closed());
        }
        let sequence = self.send_sequence;
        self.send_sequence += 1;
        let tag = self.message_tag;

        let payload = encrypt_payload(&self.session_key, frame_bytes, sequence, &self.serial, tag)?;
        let wrapper_header = SecureWrapper {
            session_id: self.session_id,
            sequence,
            serial: self.serial,
            tag,
            payload: payload.clone(),
            mac: [0u8; 16],
        }
        .mac_header();

        // CCM: authenticate the plaintext, transmit the masked MAC.
        let mac = compute_mac(
            &self.session_key,
            &wrapper_header,
            self.session_id,
            frame_bytes,
            sequence,
            &self.serial,
            tag,
        )?;
        let masked = encrypt_mac(&self.session_key, &mac, sequence, &self.serial, tag);

        SecureWrapper {
            session_id: self.session_id,
            sequence,
            serial: self.serial,
            tag,
            payload,
            mac: masked,
        }
        .build()
    }

    /// Unwrap a received SECURE_WRAPPER body into the embedded frame.
    ///
    /// Rejects wrappers for other sessions, replays (sequence not strictly
    /// greater than the last accepted) and MAC failures; security failures
    /// terminate the session.
    pub fn open(&mut self, body: &[u8]) -> Result<PayloadBuffer> {
        if self.state != SecureState::Authenticated {
            return Err(KnxError::session_closed());
        }
        let wrapper = SecureWrapper::parse(body)?;
        if wrapper.session_id != self.session_id {
            return Err(KnxError::wrong_channel());
        }
        if let Some(last) = self.last_received {
            if wrapper.sequence <= last {
                knx_log!(
                    warn,
                    "replayed wrapper sequence {} (last {})",
                    wrapper.sequence,
                    last
                );
                self.terminate();
                return Err(KnxError::replay_detected());
            }
        }

        let plaintext = decrypt_payload(
            &self.session_key,
            &wrapper.payload,
            wrapper.sequence,
            &wrapper.serial,
            wrapper.tag,
        )?;
        let mac = compute_mac(
            &self.session_key,
            &wrapper.mac_header(),
            self.session_id,
            &plaintext,
            wrapper.sequence,
            &wrapper.serial,
            wrapper.tag,
        )?;
        let received = decrypt_mac(
            &self.session_key,
            &wrapper.mac,
            wrapper.sequence,
            &wrapper.serial,
            wrapper.tag,
        );
        if mac != received {
            self.terminate();
            return Err(KnxError::mac_mismatch());
        }

        self.last_received = Some(wrapper.sequence);
        Ok(plaintext)
    }

    /// A sealed SESSION_STATUS KeepAlive, refreshing the server's session
    /// timeout while the data path is idle.
    pub fn keep_alive(&mut self) -> Result<Frame> {
        let status = SessionStatus::new(SessionStatusCode::KeepAlive).build()?;
        self.seal(status.bytes())
    }

    /// A sealed SESSION_STATUS Close; the core transitions to `Closed`
    /// after building it.
    pub fn close(&mut self) -> Result<Frame> {
        let status = SessionStatus::new(SessionStatusCode::Close).build()?;
        let frame = self.seal(status.bytes())?;
        self.terminate();
        Ok(frame)
    }

    fn terminate(&mut self) {
        self.state = SecureState::Closed;
        self.session_key.zeroize();
    }
}

impl Drop for SecureSessionCore {
    fn drop(&mut self) {
        self.session_key.zeroize();
    }
}

/// Async secure session driver over a frame-delivering transport
/// (TCP adapter for unicast sessions).
pub struct SecureSession<T: AsyncTransport> {
    transport: T,
    server: IpEndpoint,
    core: SecureSessionCore,
    rx_buffer: [u8; MAX_FRAME_SIZE],
}

impl<T: AsyncTransport> SecureSession<T> {
    /// Create a driver around an established transport.
    pub fn new(transport: T, server: IpEndpoint, core: SecureSessionCore) -> Self {
        Self {
            transport,
            server,
            core,
            rx_buffer: [0u8; MAX_FRAME_SIZE],
        }
    }

    /// The sans-IO core.
    pub fn core(&self) -> &SecureSessionCore {
        &self.core
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the three-step handshake.
    pub async fn authenticate(&mut self) -> Result<()> {
        let request = self.core.start()?;
        self.transport.send_to(request.bytes(), self.server).await?;

        let body = self.expect(ServiceType::SessionResponse).await?;
        let authenticate = self.core.handle_response(&body)?;
        self.transport
            .send_to(authenticate.bytes(), self.server)
            .await?;

        let body = self.expect(ServiceType::SessionStatus).await?;
        self.core.handle_status(&body)?;
        if self.core.state() != SecureState::Authenticated {
            return Err(KnxError::authentication_failed());
        }
        Ok(())
    }

    /// Seal and transmit one application frame.
    pub async fn send_frame(&mut self, frame_bytes: &[u8]) -> Result<()> {
        let wrapper = self.core.seal(frame_bytes)?;
        self.transport.send_to(wrapper.bytes(), self.server).await
    }

    /// Wait up to the poll window for the next unwrapped application frame.
    ///
    /// Sealed SESSION_STATUS frames are consumed here: Close/Timeout end
    /// the session, KeepAlive is absorbed.
    pub async fn poll_frame(&mut self) -> Result<Option<PayloadBuffer>> {
        if self.core.state() != SecureState::Authenticated {
            return Err(KnxError::session_closed());
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
                knx_log!(debug, "dropping malformed secure datagram");
                return Ok(None);
            }
        };
        if view.service_type() != ServiceType::SecureWrapper {
            return Ok(None);
        }
        let body: heapless::Vec<u8, MAX_FRAME_SIZE> =
            heapless::Vec::from_slice(view.body()).map_err(|_| KnxError::out_of_resource())?;
        let inner = self.core.open(&body)?;

        // A sealed session status is control traffic, not payload.
        if let Ok(inner_view) = FrameView::parse(&inner) {
            if inner_view.service_type() == ServiceType::SessionStatus {
                self.core.handle_status(inner_view.body())?;
                return Ok(None);
            }
        }
        Ok(Some(inner))
    }

    /// Send a keep-alive wrapper.
    pub async fn keep_alive(&mut self) -> Result<()> {
        let frame = self.core.keep_alive()?;
        self.transport.send_to(frame.bytes(), self.server).await
    }

    /// Close the session and the transport.
    pub async fn close(&mut self) -> Result<()> {
        if self.core.state() == SecureState::Authenticated {
            let frame = self.core.close()?;
            self.transport.send_to(frame.bytes(), self.server).await?;
        }
        self.transport.close();
        Ok(())
    }

    async fn expect(&mut self, service: ServiceType) -> Result<heapless::Vec<u8, MAX_FRAME_SIZE>> {
        loop {
            let (n, _from) = with_timeout(
                HANDSHAKE_TIMEOUT,
                self.transport.recv_from(&mut self.rx_buffer),
            )
            .await
            .map_err(|_| KnxError::connect_timeout())??;
            let view = match FrameView::parse(&self.rx_buffer[..n]) {
                Ok(view) => view,
                Err(_) => continue,
            };
            if view.service_type() == service {
                return heapless::Vec::from_slice(view.body())
                    .map_err(|_| KnxError::out_of_resource());
            }
            // A status frame instead of the expected step is a verdict.
            if view.service_type() == ServiceType::SessionStatus {
                self.core.handle_status(view.body())?;
            }
        }
    }
}

// =============================================================================
// Secure routing timer
// =============================================================================

/// The authoritative multicast timer for secure routing.
///
/// The backbone key doubles as the session key of the routing group. The
/// timer advances through MAC-authenticated TIMER_NOTIFY frames; a notify
/// within the tolerance window of the local timer is accepted and moves
/// the local timer forward, anything else is rejected.
pub struct GroupTimer {
    backbone_key: [u8; 16],
    timer_value: u64,
    tolerance_ms: u64,
}

impl GroupTimer {
    /// Timer keyed with the group's backbone key.
    pub fn new(backbone_key: [u8; 16]) -> Self {
        Self {
            backbone_key,
            timer_value: 0,
            tolerance_ms: TIMER_TOLERANCE_MS,
        }
    }

    /// Override the tolerance window.
    pub fn with_tolerance_ms(mut self, tolerance_ms: u64) -> Self {
        self.tolerance_ms = tolerance_ms;
        self
    }

    /// The current local timer value.
    pub const fn value(&self) -> u64 {
        self.timer_value
    }

    /// Build an authenticated TIMER_NOTIFY for the current value.
    pub fn make_notify(&self, serial: [u8; 6], tag: u16) -> Result<Frame> {
        let mac = compute_mac(
            &self.backbone_key,
            &TimerNotify::mac_header(),
            0,
            &[],
            self.timer_value,
            &serial,
            tag,
        )?;
        let masked = encrypt_mac(&self.backbone_key, &mac, self.timer_value, &serial, tag);
        TimerNotify {
            timer_value: self.timer_value,
            serial,
            tag,
            mac: masked,
        }
        .build()
    }

    /// Validate a received TIMER_NOTIFY body and synchronize.
    ///
    /// Accepted when the MAC verifies and the value lies within the
    /// tolerance window of the local timer; an accepted value ahead of the
    /// local timer advances it.
    pub fn handle_notify(&mut self, body: &[u8]) -> Result<()> {
        let notify = TimerNotify::parse(body)?;
        let expected = compute_mac(
            &self.backbone_key,
            &TimerNotify::mac_header(),
            0,
            &[],
            notify.timer_value,
            &notify.serial,
            notify.tag,
        )?;
        let received = decrypt_mac(
            &self.backbone_key,
            &notify.mac,
            notify.timer_value,
            &notify.serial,
            notify.tag,
        );
        if expected != received {
            return Err(KnxError::mac_mismatch());
        }

        let low = self.timer_value.saturating_sub(self.tolerance_ms);
        let high = self.timer_value.saturating_add(self.tolerance_ms);
        if notify.timer_value < low || notify.timer_value > high {
            return Err(KnxError::replay_detected());
        }
        if notify.timer_value > self.timer_value {
            self.timer_value = notify.timer_value;
        }
        Ok(())
    }

    /// Advance the local timer (driven by the local millisecond clock).
    pub fn advance(&mut self, delta_ms: u64) {
        self.timer_value = (self.timer_value + delta_ms) & 0xFFFF_FFFF_FFFF;
    }
}

impl Drop for GroupTimer {
    fn drop(&mut self) {
        self.backbone_key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock_transport::MockTransport;
    use crate::net::Ipv4Addr;

    const SERIAL: [u8; 6] = [0x00, 0xFA, 0x12, 0x34, 0x56, 0x78];

    fn credentials() -> SecureCredentials {
        SecureCredentials::derive(2, b"secret", b"trustme").unwrap()
    }

    fn client_core() -> SecureSessionCore {
        SecureSessionCore::new(CurveKeypair::from_seed([0x11; 32]), SERIAL, credentials())
    }

    /// Play the server side of the handshake with the shared primitives.
    fn server_response(client_public: &[u8; 32], session_id: u16) -> (Frame, [u8; 16]) {
        let server_keys = CurveKeypair::from_seed([0x77; 32]);
        let xor = public_key_xor(client_public, &server_keys.public_bytes());
        let device_hash = device_authentication_code_hash(b"trustme").unwrap();
        let mac = compute_mac(
            &device_hash,
            &SessionResponse::mac_header(),
            session_id,
            &xor,
            0,
            &[0u8; 6],
            0,
        )
        .unwrap();
        let masked = encrypt_mac(&device_hash, &mac, 0, &[0u8; 6], 0);
        let frame = SessionResponse {
            session_id,
            public_key: server_keys.public_bytes(),
            mac: masked,
        }
        .build()
        .unwrap();
        let session_key = server_keys.derive_session_key(client_public);
        (frame, session_key)
    }

    fn authenticated_pair() -> (SecureSessionCore, [u8; 16]) {
        let mut core = client_core();
        let request = core.start().unwrap();
        let request = SessionRequest::parse(request.body()).unwrap();
        let (response, server_key) = server_response(&request.public_key, 1);
        core.handle_response(response.body()).unwrap();
        let status = SessionStatus::new(SessionStatusCode::AuthenticationSuccess)
            .build()
            .unwrap();
        core.handle_status(status.body()).unwrap();
        assert_eq!(core.state(), SecureState::Authenticated);
        (core, server_key)
    }

    #[test]
    fn handshake_derives_matching_keys() {
        let (core, server_key) = authenticated_pair();
        assert_eq!(core.session_id(), 1);
        // Both sides hold the same session key: a wrapper sealed by the
        // client must open with the server's derivation.
        let mut client = core;
        let inner = [0x06u8, 0x10, 0x04, 0x20, 0x00, 0x0A, 0x04, 0x01, 0x00, 0x00];
        let wrapper = client.seal(&inner).unwrap();
        let body = wrapper.body();

        let parsed = SecureWrapper::parse(body).unwrap();
        let plain = decrypt_payload(
            &server_key,
            &parsed.payload,
            parsed.sequence,
            &parsed.serial,
            parsed.tag,
        )
        .unwrap();
        assert_eq!(plain.as_slice(), &inner);
    }

    #[test]
    fn tampered_response_mac_is_rejected() {
        let mut core = client_core();
        let request = core.start().unwrap();
        let request = SessionRequest::parse(request.body()).unwrap();
        let (response, _) = server_response(&request.public_key, 1);

        let mut bytes = response.body().to_vec();
        bytes[40] ^= 0x01; // flip one MAC bit
        let err = core.handle_response(&bytes).unwrap_err();
        assert!(err.is_security());
        assert_eq!(core.state(), SecureState::Closed);
    }

    #[test]
    fn wrong_device_code_fails_the_mac_check() {
        let mut core = SecureSessionCore::new(
            CurveKeypair::from_seed([0x11; 32]),
            SERIAL,
            SecureCredentials::derive(2, b"secret", b"not-trustme").unwrap(),
        );
        let request = core.start().unwrap();
        let request = SessionRequest::parse(request.body()).unwrap();
        let (response, _) = server_response(&request.public_key, 1);
        assert!(core.handle_response(response.body()).is_err());
    }

    #[test]
    fn seal_open_round_trip_with_increasing_sequences() {
        let (mut client, _) = authenticated_pair();
        // A second core with the same material plays the receiving side.
        let (mut receiver, _) = authenticated_pair();

        let inner = [0x06u8, 0x10, 0x04, 0x20, 0x00, 0x0A, 0x04, 0x01, 0x00, 0x00];
        for expected_seq in 0..3u64 {
            let wrapper = client.seal(&inner).unwrap();
            let parsed = SecureWrapper::parse(wrapper.body()).unwrap();
            assert_eq!(parsed.sequence, expected_seq);
            let opened = receiver.open(wrapper.body()).unwrap();
            assert_eq!(opened.as_slice(), &inner);
        }
    }

    #[test]
    fn replayed_wrapper_is_rejected() {
        let (mut client, _) = authenticated_pair();
        let (mut receiver, _) = authenticated_pair();

        let inner = [0x06u8, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x01, 0x00, 0x00];
        let wrapper = client.seal(&inner).unwrap();
        receiver.open(wrapper.body()).unwrap();

        let err = receiver.open(wrapper.body()).unwrap_err();
        assert!(matches!(
            err,
            KnxError::Security(ref e)
                if e.kind() == crate::error::SecurityErrorKind::ReplayDetected
        ));
        assert_eq!(receiver.state(), SecureState::Closed);
    }

    #[test]
    fn tampered_wrapper_payload_fails_the_mac() {
        let (mut client, _) = authenticated_pair();
        let (mut receiver, _) = authenticated_pair();

        let inner = [0x06u8, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x01, 0x00, 0x00];
        let wrapper = client.seal(&inner).unwrap();
        let mut bytes = wrapper.body().to_vec();
        bytes[SecureWrapper::PREFIX] ^= 0xFF;
        let err = receiver.open(&bytes).unwrap_err();
        assert!(err.is_security());
    }

    #[test]
    fn failed_authentication_status() {
        let mut core = client_core();
        let request = core.start().unwrap();
        let request = SessionRequest::parse(request.body()).unwrap();
        let (response, _) = server_response(&request.public_key, 1);
        core.handle_response(response.body()).unwrap();

        let status = SessionStatus::new(SessionStatusCode::AuthenticationFailed)
            .build()
            .unwrap();
        let err = core.handle_status(status.body()).unwrap_err();
        assert!(err.is_security());
        assert_eq!(core.state(), SecureState::Closed);
    }

    #[test]
    fn close_seals_a_status_and_ends_the_session() {
        let (mut core, _) = authenticated_pair();
        let frame = core.close().unwrap();
        assert_eq!(frame.service_type(), ServiceType::SecureWrapper);
        assert_eq!(core.state(), SecureState::Closed);
        assert!(core.seal(&[0x06, 0x10, 0x04, 0x20, 0x00, 0x06]).is_err());
    }

    #[tokio::test]
    async fn driver_runs_the_full_handshake() {
        // Pre-script the server: response to the known client public key,
        // then the success status.
        let client_keys = CurveKeypair::from_seed([0x11; 32]);
        let (response, _) = server_response(&client_keys.public_bytes(), 9);
        let status = SessionStatus::new(SessionStatusCode::AuthenticationSuccess)
            .build()
            .unwrap();

        let mut mock = MockTransport::new();
        mock.add_response(response.bytes().to_vec());
        mock.add_response(status.bytes().to_vec());

        let core = SecureSessionCore::new(client_keys, SERIAL, credentials());
        let server = IpEndpoint::new(Ipv4Addr::new(192, 168, 1, 10), 3671);
        let mut session = SecureSession::new(mock, server, core);
        session.authenticate().await.unwrap();
        assert_eq!(session.core().state(), SecureState::Authenticated);
        assert_eq!(session.core().session_id(), 9);

        // Both handshake frames went out.
        assert_eq!(session.transport().sent_packets().len(), 2);
        assert_eq!(session.transport().sent_packets()[0].0[2..4], [0x09, 0x51]);
        assert_eq!(session.transport().sent_packets()[1].0[2..4], [0x09, 0x53]);
    }

    #[test]
    fn group_timer_synchronizes_within_tolerance() {
        let key = [0x42u8; 16];
        let mut sender = GroupTimer::new(key);
        sender.advance(1500);
        let notify = sender.make_notify(SERIAL, 1).unwrap();

        let mut receiver = GroupTimer::new(key);
        receiver.handle_notify(notify.body()).unwrap();
        assert_eq!(receiver.value(), 1500);

        // Too far in the past now: the receiver moved on.
        receiver.advance(10_000);
        assert!(receiver.handle_notify(notify.body()).is_err());
    }

    #[test]
    fn group_timer_rejects_wrong_key() {
        let mut sender = GroupTimer::new([0x42u8; 16]);
        sender.advance(100);
        let notify = sender.make_notify(SERIAL, 1).unwrap();

        let mut receiver = GroupTimer::new([0x43u8; 16]);
        let err = receiver.handle_notify(notify.body()).unwrap_err();
        assert!(err.is_security());
    }

    #[test]
    fn group_timer_never_moves_backwards() {
        let key = [0x42u8; 16];
        let mut sender = GroupTimer::new(key);
        sender.advance(1000);
        let behind = sender.make_notify(SERIAL, 1).unwrap();

        let mut receiver = GroupTimer::new(key);
        receiver.advance(1800);
        receiver.handle_notify(behind.body()).unwrap();
        assert_eq!(receiver.value(), 1800);
    }
}
