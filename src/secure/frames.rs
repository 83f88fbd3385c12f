//! Secure service frames.
//!
//! Typed views and builders for the KNXnet/IP Secure family: the session
//! handshake (`SESSION_REQUEST` / `SESSION_RESPONSE` /
//! `SESSION_AUTHENTICATE` / `SESSION_STATUS`), the `SECURE_WRAPPER`
//! envelope and the multicast `TIMER_NOTIFY`. MAC computation lives in
//! [`crypto`](crate::secure::crypto); frames here carry the 16-octet MAC
//! verbatim.
//!
//! Handshake frames have fixed sizes, so the header a MAC must cover is
//! known before the MAC itself exists: build the MAC against
//! [`FrameHeader::new`] with the documented body length, then create the
//! final frame in one go.

use crate::bytes::ByteStore;
use crate::error::{KnxError, Result};
use crate::protocol::constants::{ServiceType, SessionStatusCode, SECURE_USER_MAX};
use crate::protocol::frame::{Frame, FrameHeader};
use crate::protocol::structures::Hpai;
use crate::secure::crypto::PayloadBuffer;

/// Body length of a SESSION_AUTHENTICATE frame.
pub const SESSION_AUTHENTICATE_BODY: u16 = 18;

/// Body length of a SESSION_RESPONSE frame.
pub const SESSION_RESPONSE_BODY: u16 = 50;

/// Body length of a TIMER_NOTIFY frame.
pub const TIMER_NOTIFY_BODY: u16 = 30;

/// `SESSION_REQUEST` (0x0951): client HPAI plus the client's public curve
/// point.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionRequest {
    /// The client control endpoint (TCP HPAI for unicast sessions).
    pub control_endpoint: Hpai,
    /// Client X25519 public key.
    pub public_key: [u8; 32],
}

impl SessionRequest {
    /// Create a request.
    pub const fn new(control_endpoint: Hpai, public_key: [u8; 32]) -> Self {
        Self {
            control_endpoint,
            public_key,
        }
    }

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        self.control_endpoint.encode(&mut body)?;
        body.push_slice(&self.public_key)?;
        Frame::from_body(ServiceType::SessionRequest, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < Hpai::SIZE + 32 {
            return Err(KnxError::structure_truncated());
        }
        let control_endpoint = Hpai::parse(body)?;
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&body[Hpai::SIZE..Hpai::SIZE + 32]);
        Ok(Self {
            control_endpoint,
            public_key,
        })
    }
}

/// `SESSION_RESPONSE` (0x0952): session id, server public key, MAC.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionResponse {
    /// Identifier the server assigned to this session.
    pub session_id: u16,
    /// Server X25519 public key.
    pub public_key: [u8; 32],
    /// MAC keyed with the device authentication code hash.
    pub mac: [u8; 16],
}

impl SessionResponse {
    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        body.push_u16(self.session_id)?;
        body.push_slice(&self.public_key)?;
        body.push_slice(&self.mac)?;
        Frame::from_body(ServiceType::SessionResponse, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < SESSION_RESPONSE_BODY as usize {
            return Err(KnxError::structure_truncated());
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&body[2..34]);
        let mut mac = [0u8; 16];
        mac.copy_from_slice(&body[34..50]);
        Ok(Self {
            session_id: u16::from_be_bytes([body[0], body[1]]),
            public_key,
            mac,
        })
    }

    /// The header this frame's MAC is computed over.
    pub fn mac_header() -> FrameHeader {
        FrameHeader::new(ServiceType::SessionResponse, SESSION_RESPONSE_BODY)
    }
}

/// `SESSION_AUTHENTICATE` (0x0953): user id plus MAC.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionAuthenticate {
    /// Secure user id, 1..=127.
    pub user_id: u8,
    /// MAC keyed with the user password hash.
    pub mac: [u8; 16],
}

impl SessionAuthenticate {
    /// Build the frame; rejects user ids outside 1..=127.
    pub fn build(&self) -> Result<Frame> {
        if self.user_id == 0 || self.user_id > SECURE_USER_MAX {
            return Err(KnxError::authentication_failed());
        }
        let mut body = ByteStore::new();
        body.push_u8(0x00)?; // reserved
        body.push_u8(self.user_id)?;
        body.push_slice(&self.mac)?;
        Frame::from_body(ServiceType::SessionAuthenticate, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < SESSION_AUTHENTICATE_BODY as usize {
            return Err(KnxError::structure_truncated());
        }
        let mut mac = [0u8; 16];
        mac.copy_from_slice(&body[2..18]);
        Ok(Self {
            user_id: body[1],
            mac,
        })
    }

    /// The header this frame's MAC is computed over.
    pub fn mac_header() -> FrameHeader {
        FrameHeader::new(ServiceType::SessionAuthenticate, SESSION_AUTHENTICATE_BODY)
    }
}

/// `SESSION_STATUS` (0x0954): a fixed 8-octet frame either side may send
/// at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionStatus {
    /// The conveyed status.
    pub status: SessionStatusCode,
}

impl SessionStatus {
    /// Create a status frame value.
    pub const fn new(status: SessionStatusCode) -> Self {
        Self { status }
    }

    /// Build the frame: status octet plus a reserved octet.
    pub fn build(&self) -> Result<Frame> {
        Frame::from_body(ServiceType::SessionStatus, &[self.status.to_u8(), 0x00])
    }

    /// Parse from a frame body; unknown status octets are a parse error.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let raw = *body.first().ok_or_else(KnxError::structure_truncated)?;
        Ok(Self {
            status: SessionStatusCode::from_u8(raw).ok_or_else(KnxError::unknown_code)?,
        })
    }
}

/// `SECURE_WRAPPER` (0x0950): the authenticated, encrypted envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecureWrapper {
    /// Session the wrapper belongs to (0 for multicast routing).
    pub session_id: u16,
    /// 48-bit monotonically increasing send sequence.
    pub sequence: u64,
    /// Sender's 6-octet KNX serial number.
    pub serial: [u8; 6],
    /// Message tag; echoes the request tag in responses.
    pub tag: u16,
    /// The encrypted embedded frame.
    pub payload: PayloadBuffer,
    /// Encrypted MAC.
    pub mac: [u8; 16],
}

impl SecureWrapper {
    /// Octets before the payload: session id, sequence, serial, tag.
    pub const PREFIX: usize = 16;

    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        body.push_u16(self.session_id)?;
        body.push_u48(self.sequence)?;
        body.push_slice(&self.serial)?;
        body.push_u16(self.tag)?;
        body.push_slice(&self.payload)?;
        body.push_slice(&self.mac)?;
        Frame::from_body(ServiceType::SecureWrapper, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < Self::PREFIX + 16 {
            return Err(KnxError::structure_truncated());
        }
        let store = ByteStore::from_slice(body)?;
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&body[8..14]);
        let payload_end = body.len() - 16;
        let mut mac = [0u8; 16];
        mac.copy_from_slice(&body[payload_end..]);
        Ok(Self {
            session_id: store.u16_at(0).ok_or_else(KnxError::structure_truncated)?,
            sequence: store.u48_at(2).ok_or_else(KnxError::structure_truncated)?,
            serial,
            tag: store.u16_at(14).ok_or_else(KnxError::structure_truncated)?,
            payload: PayloadBuffer::from_slice(&body[Self::PREFIX..payload_end])
                .map_err(|_| KnxError::out_of_resource())?,
            mac,
        })
    }

    /// The header the wrapper's MAC is computed over.
    pub fn mac_header(&self) -> FrameHeader {
        FrameHeader::new(
            ServiceType::SecureWrapper,
            (Self::PREFIX + self.payload.len() + 16) as u16,
        )
    }
}

/// `TIMER_NOTIFY` (0x0955): the authoritative 48-bit timer of a secure
/// routing group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerNotify {
    /// Current timer value of the sender.
    pub timer_value: u64,
    /// Sender's 6-octet KNX serial number.
    pub serial: [u8; 6],
    /// Message tag.
    pub tag: u16,
    /// Encrypted MAC keyed with the backbone key.
    pub mac: [u8; 16],
}

impl TimerNotify {
    /// Build the frame.
    pub fn build(&self) -> Result<Frame> {
        let mut body = ByteStore::new();
        body.push_u48(self.timer_value)?;
        body.push_slice(&self.serial)?;
        body.push_u16(self.tag)?;
        body.push_slice(&self.mac)?;
        Frame::from_body(ServiceType::TimerNotify, body.as_slice())
    }

    /// Parse from a frame body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < TIMER_NOTIFY_BODY as usize {
            return Err(KnxError::structure_truncated());
        }
        let store = ByteStore::from_slice(body)?;
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&body[6..12]);
        let mut mac = [0u8; 16];
        mac.copy_from_slice(&body[14..30]);
        Ok(Self {
            timer_value: store.u48_at(0).ok_or_else(KnxError::structure_truncated)?,
            serial,
            tag: store.u16_at(12).ok_or_else(KnxError::structure_truncated)?,
            mac,
        })
    }

    /// The header a timer notify MAC is computed over.
    pub fn mac_header() -> FrameHeader {
        FrameHeader::new(ServiceType::TimerNotify, TIMER_NOTIFY_BODY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Ipv4Addr;

    #[test]
    fn session_request_round_trip() {
        let request = SessionRequest::new(
            Hpai::tcp(Ipv4Addr::UNSPECIFIED, 0),
            [0x42; 32],
        );
        let frame = request.build().unwrap();
        assert_eq!(frame.size(), 46);
        assert_eq!(SessionRequest::parse(frame.body()).unwrap(), request);
    }

    #[test]
    fn session_response_round_trip() {
        let response = SessionResponse {
            session_id: 1,
            public_key: [0x24; 32],
            mac: [0xAB; 16],
        };
        let frame = response.build().unwrap();
        assert_eq!(frame.size(), 56);
        assert_eq!(frame.header(), SessionResponse::mac_header());
        assert_eq!(SessionResponse::parse(frame.body()).unwrap(), response);
    }

    #[test]
    fn session_authenticate_checks_user_id() {
        let auth = SessionAuthenticate {
            user_id: 2,
            mac: [0x55; 16],
        };
        let frame = auth.build().unwrap();
        assert_eq!(frame.size(), 24);
        assert_eq!(frame.header(), SessionAuthenticate::mac_header());
        assert_eq!(SessionAuthenticate::parse(frame.body()).unwrap(), auth);

        assert!(SessionAuthenticate {
            user_id: 0,
            mac: [0; 16]
        }
        .build()
        .is_err());
        assert!(SessionAuthenticate {
            user_id: 128,
            mac: [0; 16]
        }
        .build()
        .is_err());
    }

    #[test]
    fn session_status_close_serialization() {
        let frame = SessionStatus::new(SessionStatusCode::Close).build().unwrap();
        assert_eq!(frame.size(), 8);
        assert_eq!(&frame.bytes()[6..], &[0x04, 0x00]);
        assert!(frame.is_valid());
        let parsed = SessionStatus::parse(frame.body()).unwrap();
        assert_eq!(parsed.status, SessionStatusCode::Close);
    }

    #[test]
    fn session_status_rejects_unknown_codes() {
        assert!(SessionStatus::parse(&[0x09, 0x00]).is_err());
    }

    #[test]
    fn secure_wrapper_round_trip() {
        let wrapper = SecureWrapper {
            session_id: 1,
            sequence: 0x0000_0000_0005,
            serial: [0x00, 0xFA, 0x12, 0x34, 0x56, 0x78],
            tag: 0xAFFE,
            payload: PayloadBuffer::from_slice(&[0x06, 0x10, 0x05, 0x30, 0x00, 0x08, 0x29, 0x00])
                .unwrap(),
            mac: [0x99; 16],
        };
        let frame = wrapper.build().unwrap();
        assert_eq!(frame.size(), 6 + 16 + 8 + 16);
        assert_eq!(frame.header(), wrapper.mac_header());
        let parsed = SecureWrapper::parse(frame.body()).unwrap();
        assert_eq!(parsed, wrapper);
        assert_eq!(parsed.sequence, 5);
    }

    #[test]
    fn timer_notify_round_trip() {
        let notify = TimerNotify {
            timer_value: 211_938_428_830_917 & 0xFFFF_FFFF_FFFF,
            serial: [0x00, 0xFA, 0x12, 0x34, 0x56, 0x78],
            tag: 0x0001,
            mac: [0x11; 16],
        };
        let frame = notify.build().unwrap();
        assert_eq!(frame.size(), 36);
        assert_eq!(frame.header(), TimerNotify::mac_header());
        assert_eq!(TimerNotify::parse(frame.body()).unwrap(), notify);
    }

    #[test]
    fn truncated_secure_bodies_are_rejected() {
        assert!(SessionRequest::parse(&[0x08, 0x02]).is_err());
        assert!(SessionResponse::parse(&[0x00; 20]).is_err());
        assert!(SessionAuthenticate::parse(&[0x00; 4]).is_err());
        assert!(SecureWrapper::parse(&[0x00; 20]).is_err());
        assert!(TimerNotify::parse(&[0x00; 10]).is_err());
    }
}
