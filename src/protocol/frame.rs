//! KNXnet/IP frame parsing and emission.
//!
//! All KNXnet/IP frames share the same outer shape:
//!
//! ```text
//! ┌─────────────────────────────┐
//! │  Header (6 bytes)           │
//! │  - Header Length: 0x06      │
//! │  - Protocol Version: 0x10   │
//! │  - Service Type: 2 bytes    │
//! │  - Total Length: 2 bytes    │
//! ├─────────────────────────────┤
//! │  Body (variable)            │
//! │  - Service-specific data    │
//! └─────────────────────────────┘
//! ```
//!
//! Two frame representations exist: [`FrameView`] borrows an incoming
//! datagram for the hot receive path, [`Frame`] owns its bytes and is what
//! the service builders produce. A frame emitted by this module always
//! satisfies the header invariants: `bytes[0] == 6`, `bytes[1] == 0x10`,
//! and the declared total length equals the actual byte count.

use crate::bytes::ByteStore;
use crate::error::{KnxError, Result};
use crate::protocol::constants::{ServiceType, HEADER_SIZE_10, KNXNETIP_VERSION_10};

/// Hint for error paths; the success path is the overwhelmingly common one
/// when parsing frames off the wire.
#[inline(always)]
#[cold]
const fn unlikely(b: bool) -> bool {
    b
}

/// KNXnet/IP frame header (6 octets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameHeader {
    /// Header length, always 0x06.
    pub header_length: u8,
    /// Protocol version, always 0x10.
    pub protocol_version: u8,
    /// Service type identifier.
    pub service_type: ServiceType,
    /// Total frame length, header included.
    pub total_length: u16,
}

impl FrameHeader {
    /// Size of the header in octets.
    pub const SIZE: usize = 6;

    /// Create a header for a frame with `body_length` octets of body.
    pub const fn new(service_type: ServiceType, body_length: u16) -> Self {
        Self {
            header_length: HEADER_SIZE_10,
            protocol_version: KNXNETIP_VERSION_10,
            service_type,
            total_length: Self::SIZE as u16 + body_length,
        }
    }

    /// Parse a header from the start of `data`.
    ///
    /// # Errors
    ///
    /// `Parse(WrongHeader)` on a short buffer, bad length octet or bad
    /// version; `Parse(UnknownServiceType)` for an unrecognized service.
    #[inline(always)]
    pub fn parse(data: &[u8]) -> Result<Self> {
        if unlikely(data.len() < Self::SIZE) {
            return Err(KnxError::wrong_header());
        }

        // SAFETY: bounds checked above, data.len() >= 6; indices 0..=5 are
        // in range. Frame headers are parsed for every received datagram.
        let header_length = unsafe { *data.get_unchecked(0) };
        let protocol_version = unsafe { *data.get_unchecked(1) };
        let service_type_raw =
            u16::from_be_bytes([unsafe { *data.get_unchecked(2) }, unsafe {
                *data.get_unchecked(3)
            }]);
        let total_length = u16::from_be_bytes([unsafe { *data.get_unchecked(4) }, unsafe {
            *data.get_unchecked(5)
        }]);

        if unlikely(header_length != HEADER_SIZE_10) {
            return Err(KnxError::wrong_header());
        }
        if unlikely(protocol_version != KNXNETIP_VERSION_10) {
            return Err(KnxError::wrong_header());
        }

        let service_type = ServiceType::from_u16(service_type_raw)
            .ok_or_else(KnxError::unknown_service_type)?;

        Ok(Self {
            header_length,
            protocol_version,
            service_type,
            total_length,
        })
    }

    /// Append the six header octets to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        out.push_u8(self.header_length)?;
        out.push_u8(self.protocol_version)?;
        out.push_u16(self.service_type.to_u16())?;
        out.push_u16(self.total_length)
    }

    /// The six header octets as an array.
    pub fn bytes(&self) -> [u8; Self::SIZE] {
        let st = self.service_type.to_u16().to_be_bytes();
        let len = self.total_length.to_be_bytes();
        [
            self.header_length,
            self.protocol_version,
            st[0],
            st[1],
            len[0],
            len[1],
        ]
    }

    /// Body length declared by this header.
    pub const fn body_length(&self) -> u16 {
        self.total_length.saturating_sub(Self::SIZE as u16)
    }
}

/// Peek at the service type without a full parse.
///
/// Used to route datagrams before deciding how to handle them; returns
/// `None` when the buffer is too short or the code is unknown.
#[inline]
pub fn peek_service_type(data: &[u8]) -> Option<ServiceType> {
    if data.len() < FrameHeader::SIZE {
        return None;
    }
    ServiceType::from_u16(u16::from_be_bytes([data[2], data[3]]))
}

/// Zero-copy view of a KNXnet/IP frame.
#[derive(Debug)]
pub struct FrameView<'a> {
    data: &'a [u8],
    header: FrameHeader,
}

impl<'a> FrameView<'a> {
    /// Parse a frame from a received datagram.
    ///
    /// # Errors
    ///
    /// Header errors as in [`FrameHeader::parse`]; `Parse(LengthMismatch)`
    /// when the declared total length exceeds the bytes available or is
    /// shorter than the header itself.
    #[inline(always)]
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = FrameHeader::parse(data)?;

        if unlikely(
            (header.total_length as usize) < FrameHeader::SIZE
                || data.len() < header.total_length as usize,
        ) {
            return Err(KnxError::length_mismatch());
        }

        Ok(Self { data, header })
    }

    /// The parsed header.
    #[inline(always)]
    pub const fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// The service type.
    #[inline(always)]
    pub const fn service_type(&self) -> ServiceType {
        self.header.service_type
    }

    /// The frame body (everything after the header).
    #[inline(always)]
    pub fn body(&self) -> &'a [u8] {
        let start = FrameHeader::SIZE;
        let end = self.header.total_length as usize;
        // SAFETY: parse() validated data.len() >= total_length >= SIZE,
        // so start..end is in bounds.
        unsafe { self.data.get_unchecked(start..end) }
    }

    /// The complete frame, header included, trimmed to the declared length.
    #[inline(always)]
    pub fn bytes(&self) -> &'a [u8] {
        // SAFETY: parse() validated data.len() >= total_length.
        unsafe { self.data.get_unchecked(..self.header.total_length as usize) }
    }

    /// Copy into an owned [`Frame`].
    pub fn to_owned(&self) -> Result<Frame> {
        Frame::from_body(self.service_type(), self.body())
    }
}

/// An owned KNXnet/IP frame.
///
/// Holds the complete wire image. Service proxies interpret the body;
/// builders construct frames through [`Frame::from_body`] and patch the
/// stored bytes in place where a header rewrite is needed (secure MACs).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    service_type: ServiceType,
    store: ByteStore,
}

impl Frame {
    /// Build a frame from a service type and body octets.
    pub fn from_body(service_type: ServiceType, body: &[u8]) -> Result<Self> {
        let mut store = ByteStore::new();
        let header = FrameHeader::new(service_type, body.len() as u16);
        header.encode(&mut store)?;
        store.push_slice(body)?;
        Ok(Self {
            service_type,
            store,
        })
    }

    /// Parse an owned frame from received bytes.
    ///
    /// Accepts exactly one frame; trailing bytes beyond the declared total
    /// length are not copied (TCP reassembly hands in exact frames, UDP
    /// datagrams carry one frame each).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let view = FrameView::parse(data)?;
        view.to_owned()
    }

    /// The service type.
    #[inline]
    pub const fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// The frame header, reconstructed from the stored bytes.
    pub fn header(&self) -> FrameHeader {
        FrameHeader::new(self.service_type, self.body().len() as u16)
    }

    /// Complete wire image.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.store.as_slice()
    }

    /// Body octets after the 6-octet header.
    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.store.as_slice()[FrameHeader::SIZE..]
    }

    /// Total frame size in octets.
    #[inline]
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// Whether the stored bytes satisfy the header invariants.
    pub fn is_valid(&self) -> bool {
        FrameView::parse(self.bytes())
            .map(|v| v.bytes().len() == self.size())
            .unwrap_or(false)
    }

    /// Read access to the underlying buffer.
    pub fn store(&self) -> &ByteStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_parse() {
        let data = [0x06, 0x10, 0x02, 0x01, 0x00, 0x0E];
        let header = FrameHeader::parse(&data).unwrap();
        assert_eq!(header.header_length, 0x06);
        assert_eq!(header.protocol_version, 0x10);
        assert_eq!(header.service_type, ServiceType::SearchRequest);
        assert_eq!(header.total_length, 14);
        assert_eq!(header.body_length(), 8);
    }

    #[test]
    fn header_rejects_bad_version() {
        let data = [0x06, 0x20, 0x02, 0x01, 0x00, 0x0E];
        assert!(FrameHeader::parse(&data).unwrap_err().is_parse());
        let data = [0x05, 0x10, 0x02, 0x01, 0x00, 0x0E];
        assert!(FrameHeader::parse(&data).unwrap_err().is_parse());
    }

    #[test]
    fn header_rejects_unknown_service() {
        let data = [0x06, 0x10, 0x07, 0x40, 0x00, 0x06];
        assert!(FrameHeader::parse(&data).is_err());
    }

    #[test]
    fn frame_emission_satisfies_invariants() {
        let frame = Frame::from_body(ServiceType::SearchRequest, &[1, 2, 3, 4]).unwrap();
        let bytes = frame.bytes();
        assert_eq!(bytes[0], 0x06);
        assert_eq!(bytes[1], 0x10);
        assert_eq!(
            u16::from_be_bytes([bytes[4], bytes[5]]) as usize,
            bytes.len()
        );
        assert!(frame.is_valid());
    }

    #[test]
    fn view_parse_emit_round_trip() {
        let data = [
            0x06, 0x10, 0x04, 0x20, 0x00, 0x0A, 0x04, 0x07, 0x00, 0x00,
        ];
        let view = FrameView::parse(&data).unwrap();
        assert_eq!(view.service_type(), ServiceType::TunnelingRequest);
        assert_eq!(view.body(), &[0x04, 0x07, 0x00, 0x00]);

        let owned = view.to_owned().unwrap();
        assert_eq!(owned.bytes(), &data);
    }

    #[test]
    fn view_rejects_truncated_frames() {
        // Declares 14 octets but only 10 present.
        let data = [0x06, 0x10, 0x02, 0x01, 0x00, 0x0E, 0x08, 0x01, 0x00, 0x00];
        assert!(FrameView::parse(&data).is_err());
    }

    #[test]
    fn view_accepts_trailing_garbage_but_trims_it() {
        let data = [
            0x06, 0x10, 0x04, 0x21, 0x00, 0x0A, 0x04, 0x05, 0x03, 0x00, 0xDE, 0xAD,
        ];
        let view = FrameView::parse(&data).unwrap();
        assert_eq!(view.bytes().len(), 10);
    }

    #[test]
    fn peek_without_full_parse() {
        let data = [0x06, 0x10, 0x09, 0x50, 0x00, 0x2A];
        assert_eq!(peek_service_type(&data), Some(ServiceType::SecureWrapper));
        assert_eq!(peek_service_type(&data[..4]), None);
    }
}
