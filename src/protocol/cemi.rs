//! Common External Message Interface (cEMI) link-layer codec.
//!
//! cEMI is the canonical framing for KNX telegrams carried over KNXnet/IP.
//! This module covers the link-layer side used by tunneling and routing:
//! `L_Data` frames, the two control fields, and the TPDU (TPCI/APCI) packing
//! in the first payload octets. Device management frames live in
//! [`device_mgmt`](crate::protocol::device_mgmt).
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Message Code (1 byte)                    │
//! ├──────────────────────────────────────────┤
//! │ Additional Info Length (1 byte)          │
//! ├──────────────────────────────────────────┤
//! │ Additional Info (variable)               │
//! ├──────────────────────────────────────────┤
//! │ Service Information (L_Data)             │
//! │  ├─ Control Field 1 (1 byte)             │
//! │  ├─ Control Field 2 (1 byte)             │
//! │  ├─ Source Address (2 bytes)             │
//! │  ├─ Destination Address (2 bytes)        │
//! │  ├─ Data Length (1 byte)                 │
//! │  ├─ TPCI/APCI (1-2 bytes)                │
//! │  └─ Data (variable)                      │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The data length octet counts the appended data octets, i.e. the TPDU
//! bytes excluding the leading control-byte pair. A control TPDU
//! (Connect/Disconnect/Ack) is a single octet with no APCI.

use crate::addressing::{GroupAddress, IndividualAddress};
use crate::bytes::ByteStore;
use crate::error::{KnxError, Result};
use crate::protocol::constants::{CemiMessageCode, Priority};
use heapless::Vec;

/// Maximum payload data carried in one link-layer frame.
pub const MAX_CEMI_DATA: usize = 64;

// =============================================================================
// Control fields
// =============================================================================

/// Control field 1 of an `L_Data` frame.
///
/// ```text
/// Bit 7: Frame Type (0=extended, 1=standard)
/// Bit 6: Reserved
/// Bit 5: Repeat (0=repeat, 1=do not repeat)
/// Bit 4: System Broadcast (0=system, 1=broadcast)
/// Bit 3-2: Priority
/// Bit 1: Acknowledge Request
/// Bit 0: Confirm (0=no error, 1=error)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlField1 {
    raw: u8,
}

impl From<u8> for ControlField1 {
    #[inline(always)]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl From<ControlField1> for u8 {
    #[inline(always)]
    fn from(ctrl: ControlField1) -> u8 {
        ctrl.raw
    }
}

impl ControlField1 {
    /// Raw byte value.
    #[inline(always)]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    /// Standard frame (true) or extended (false).
    #[inline(always)]
    pub const fn is_standard_frame(self) -> bool {
        (self.raw & 0x80) != 0
    }

    /// Repeat suppression flag.
    #[inline(always)]
    pub const fn do_not_repeat(self) -> bool {
        (self.raw & 0x20) != 0
    }

    /// Broadcast (true) vs system broadcast (false).
    #[inline(always)]
    pub const fn is_broadcast(self) -> bool {
        (self.raw & 0x10) != 0
    }

    /// Telegram priority.
    #[inline(always)]
    pub const fn priority(self) -> Priority {
        Priority::from_u8((self.raw >> 2) & 0x03)
    }

    /// Layer-2 acknowledge requested.
    #[inline(always)]
    pub const fn ack_requested(self) -> bool {
        (self.raw & 0x02) != 0
    }

    /// Confirm error flag (only meaningful in `L_Data.con`).
    #[inline(always)]
    pub const fn has_error(self) -> bool {
        (self.raw & 0x01) != 0
    }

    /// Assemble a control field from its parts.
    pub const fn new(
        standard_frame: bool,
        do_not_repeat: bool,
        broadcast: bool,
        priority: Priority,
        ack_requested: bool,
        has_error: bool,
    ) -> Self {
        let mut raw = 0u8;
        if standard_frame {
            raw |= 0x80;
        }
        if do_not_repeat {
            raw |= 0x20;
        }
        if broadcast {
            raw |= 0x10;
        }
        raw |= (priority.to_u8() & 0x03) << 2;
        if ack_requested {
            raw |= 0x02;
        }
        if has_error {
            raw |= 0x01;
        }
        Self { raw }
    }
}

impl Default for ControlField1 {
    /// Standard frame, do-not-repeat, broadcast, low priority: 0xBC, the
    /// field most group telegrams on the wire carry.
    #[inline]
    fn default() -> Self {
        Self { raw: 0xBC }
    }
}

/// Control field 2 of an `L_Data` frame.
///
/// ```text
/// Bit 7: Destination Address Type (0=individual, 1=group)
/// Bit 6-4: Hop Count (0-7)
/// Bit 3-0: Extended Frame Format (0000=standard)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlField2 {
    raw: u8,
}

impl From<u8> for ControlField2 {
    #[inline(always)]
    fn from(raw: u8) -> Self {
        Self { raw }
    }
}

impl From<ControlField2> for u8 {
    #[inline(always)]
    fn from(ctrl: ControlField2) -> u8 {
        ctrl.raw
    }
}

impl ControlField2 {
    /// Raw byte value.
    #[inline(always)]
    pub const fn raw(self) -> u8 {
        self.raw
    }

    /// Destination is a group address (true) or individual (false).
    #[inline(always)]
    pub const fn is_group_address(self) -> bool {
        (self.raw & 0x80) != 0
    }

    /// Hop count (0-7).
    #[inline(always)]
    pub const fn hop_count(self) -> u8 {
        (self.raw >> 4) & 0x07
    }

    /// Extended frame format bits.
    #[inline(always)]
    pub const fn extended_format(self) -> u8 {
        self.raw & 0x0F
    }

    /// Assemble a control field from its parts.
    pub const fn new(is_group: bool, hop_count: u8, extended_format: u8) -> Self {
        let mut raw = 0u8;
        if is_group {
            raw |= 0x80;
        }
        raw |= (hop_count & 0x07) << 4;
        raw |= extended_format & 0x0F;
        Self { raw }
    }
}

impl Default for ControlField2 {
    /// Group address, hop count 6, standard format: 0xE0.
    #[inline]
    fn default() -> Self {
        Self { raw: 0xE0 }
    }
}

// =============================================================================
// TPDU
// =============================================================================

/// Transport layer control information, the top 6 bits of the first TPDU
/// octet. Data variants carry an APCI in the following bits; control
/// variants (connection-oriented handshake on the bus) are one octet long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tpci {
    /// Unnumbered data (group communication).
    UnnumberedData,
    /// Numbered data on a transport connection.
    NumberedData {
        /// Sequence number (0-15).
        sequence: u8,
    },
    /// `T_Connect`.
    Connect,
    /// `T_Disconnect`.
    Disconnect,
    /// `T_Ack` for a numbered data packet.
    Ack {
        /// Acknowledged sequence number (0-15).
        sequence: u8,
    },
    /// `T_Nak` for a numbered data packet.
    Nak {
        /// Rejected sequence number (0-15).
        sequence: u8,
    },
}

impl Tpci {
    /// Decode from the first TPDU octet.
    pub const fn from_byte(byte: u8) -> Self {
        let sequence = (byte >> 2) & 0x0F;
        match byte >> 6 {
            0b00 => Self::UnnumberedData,
            0b01 => Self::NumberedData { sequence },
            0b10 => {
                if byte & 0x01 != 0 {
                    Self::Disconnect
                } else {
                    Self::Connect
                }
            }
            _ => {
                if byte & 0x01 != 0 {
                    Self::Nak { sequence }
                } else {
                    Self::Ack { sequence }
                }
            }
        }
    }

    /// Encode as the first TPDU octet, APCI bits cleared.
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::UnnumberedData => 0x00,
            Self::NumberedData { sequence } => 0x40 | ((sequence & 0x0F) << 2),
            Self::Connect => 0x80,
            Self::Disconnect => 0x81,
            Self::Ack { sequence } => 0xC2 | ((sequence & 0x0F) << 2),
            Self::Nak { sequence } => 0xC3 | ((sequence & 0x0F) << 2),
        }
    }

    /// Whether this TPDU carries an APCI (data variants).
    pub const fn is_data(self) -> bool {
        matches!(self, Self::UnnumberedData | Self::NumberedData { .. })
    }
}

/// Application layer control information, 10 bits spanning the two TPDU
/// control octets.
///
/// Two encodings coexist: the short family uses only the upper 4 bits and
/// leaves the low 6 bits of the second octet for small embedded data; the
/// extended family uses all 10 bits. Decoding tries the exact extended
/// match first and falls back to the 4-bit grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Apci {
    /// `A_GroupValue_Read`
    GroupValueRead,
    /// `A_GroupValue_Response`
    GroupValueResponse,
    /// `A_GroupValue_Write`
    GroupValueWrite,
    /// `A_IndividualAddress_Write`
    IndividualAddressWrite,
    /// `A_IndividualAddress_Read`
    IndividualAddressRead,
    /// `A_IndividualAddress_Response`
    IndividualAddressResponse,
    /// `A_ADC_Read`
    AdcRead,
    /// `A_ADC_Response`
    AdcResponse,
    /// `A_Memory_Read`
    MemoryRead,
    /// `A_Memory_Response`
    MemoryResponse,
    /// `A_Memory_Write`
    MemoryWrite,
    /// `A_DeviceDescriptor_Read`
    DeviceDescriptorRead,
    /// `A_DeviceDescriptor_Response`
    DeviceDescriptorResponse,
    /// `A_Restart`
    Restart,
    /// `A_FunctionPropertyCommand`
    FunctionPropertyCommand,
    /// `A_FunctionPropertyState_Read`
    FunctionPropertyStateRead,
    /// `A_FunctionPropertyState_Response`
    FunctionPropertyStateResponse,
    /// `A_PropertyValue_Read`
    PropertyValueRead,
    /// `A_PropertyValue_Response`
    PropertyValueResponse,
    /// `A_PropertyValue_Write`
    PropertyValueWrite,
    /// `A_PropertyDescription_Read`
    PropertyDescriptionRead,
    /// `A_PropertyDescription_Response`
    PropertyDescriptionResponse,
    /// Anything else, raw 10-bit value preserved.
    Unknown(u16),
}

impl Apci {
    /// Decode from the raw 10-bit value.
    pub const fn from_u16(value: u16) -> Self {
        // Exact extended codes first.
        match value & 0x3FF {
            0x2C7 => Self::FunctionPropertyCommand,
            0x2C8 => Self::FunctionPropertyStateRead,
            0x2C9 => Self::FunctionPropertyStateResponse,
            0x3D5 => Self::PropertyValueRead,
            0x3D6 => Self::PropertyValueResponse,
            0x3D7 => Self::PropertyValueWrite,
            0x3D8 => Self::PropertyDescriptionRead,
            0x3D9 => Self::PropertyDescriptionResponse,
            v => match v & 0x3C0 {
                0x000 => Self::GroupValueRead,
                0x040 => Self::GroupValueResponse,
                0x080 => Self::GroupValueWrite,
                0x0C0 => Self::IndividualAddressWrite,
                0x100 => Self::IndividualAddressRead,
                0x140 => Self::IndividualAddressResponse,
                0x180 => Self::AdcRead,
                0x1C0 => Self::AdcResponse,
                0x200 => Self::MemoryRead,
                0x240 => Self::MemoryResponse,
                0x280 => Self::MemoryWrite,
                0x300 => Self::DeviceDescriptorRead,
                0x340 => Self::DeviceDescriptorResponse,
                0x380 => Self::Restart,
                _ => Self::Unknown(v),
            },
        }
    }

    /// Decode from the two TPDU control octets.
    pub const fn from_bytes(byte1: u8, byte2: u8) -> Self {
        Self::from_u16(((byte1 as u16 & 0x03) << 8) | byte2 as u16)
    }

    /// The raw 10-bit value.
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::GroupValueRead => 0x000,
            Self::GroupValueResponse => 0x040,
            Self::GroupValueWrite => 0x080,
            Self::IndividualAddressWrite => 0x0C0,
            Self::IndividualAddressRead => 0x100,
            Self::IndividualAddressResponse => 0x140,
            Self::AdcRead => 0x180,
            Self::AdcResponse => 0x1C0,
            Self::MemoryRead => 0x200,
            Self::MemoryResponse => 0x240,
            Self::MemoryWrite => 0x280,
            Self::DeviceDescriptorRead => 0x300,
            Self::DeviceDescriptorResponse => 0x340,
            Self::Restart => 0x380,
            Self::FunctionPropertyCommand => 0x2C7,
            Self::FunctionPropertyStateRead => 0x2C8,
            Self::FunctionPropertyStateResponse => 0x2C9,
            Self::PropertyValueRead => 0x3D5,
            Self::PropertyValueResponse => 0x3D6,
            Self::PropertyValueWrite => 0x3D7,
            Self::PropertyDescriptionRead => 0x3D8,
            Self::PropertyDescriptionResponse => 0x3D9,
            Self::Unknown(v) => v,
        }
    }

    /// Whether this APCI uses the short (4-bit) encoding and can embed up
    /// to 6 bits of data in its second octet.
    pub const fn is_short(self) -> bool {
        self.to_u16() & 0x03F == 0
    }
}

/// One decoded TPDU: transport control, optional application control and
/// the application data octets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tpdu {
    /// Transport control field.
    pub tpci: Tpci,
    /// Application control field; `None` for control TPDUs.
    pub apci: Option<Apci>,
    /// Data octets following the control bytes. For short APCIs with a
    /// 6-bit payload this is empty and the value sits in `small_data`.
    pub data: Vec<u8, MAX_CEMI_DATA>,
    /// 6-bit value embedded in the APCI octet (short encodings only).
    pub small_data: u8,
}

impl Tpdu {
    /// Group value write with a 6-bit embedded value.
    pub fn group_write_small(value: u8) -> Self {
        Self {
            tpci: Tpci::UnnumberedData,
            apci: Some(Apci::GroupValueWrite),
            data: Vec::new(),
            small_data: value & 0x3F,
        }
    }

    /// Group value write with explicit data octets.
    pub fn group_write(data: &[u8]) -> Result<Self> {
        Ok(Self {
            tpci: Tpci::UnnumberedData,
            apci: Some(Apci::GroupValueWrite),
            data: Vec::from_slice(data).map_err(|_| KnxError::out_of_resource())?,
            small_data: 0,
        })
    }

    /// Group value read.
    pub fn group_read() -> Self {
        Self {
            tpci: Tpci::UnnumberedData,
            apci: Some(Apci::GroupValueRead),
            data: Vec::new(),
            small_data: 0,
        }
    }

    /// Parse a TPDU from `bytes`, which must cover exactly the TPDU.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let first = *bytes.first().ok_or_else(KnxError::structure_truncated)?;
        let tpci = Tpci::from_byte(first);
        if !tpci.is_data() {
            return Ok(Self {
                tpci,
                apci: None,
                data: Vec::new(),
                small_data: 0,
            });
        }
        let second = *bytes.get(1).ok_or_else(KnxError::structure_truncated)?;
        let apci = Apci::from_bytes(first, second);
        let small_data = if apci.is_short() { second & 0x3F } else { 0 };
        Ok(Self {
            tpci,
            apci: Some(apci),
            data: Vec::from_slice(&bytes[2..]).map_err(|_| KnxError::out_of_resource())?,
            small_data,
        })
    }

    /// Append the TPDU octets to `out`; returns the appended byte count.
    pub fn encode(&self, out: &mut ByteStore) -> Result<usize> {
        let tpci_byte = self.tpci.to_byte();
        match self.apci {
            None => {
                out.push_u8(tpci_byte)?;
                Ok(1)
            }
            Some(apci) => {
                let value = apci.to_u16();
                out.push_u8(tpci_byte | ((value >> 8) as u8 & 0x03))?;
                let mut second = (value & 0xFF) as u8;
                if apci.is_short() {
                    second |= self.small_data & 0x3F;
                }
                out.push_u8(second)?;
                out.push_slice(&self.data)?;
                Ok(2 + self.data.len())
            }
        }
    }

    /// The value of the data-length octet for this TPDU: appended data
    /// octets only, control bytes excluded.
    pub fn data_length(&self) -> u8 {
        self.data.len() as u8
    }
}

/// Extract the 6-bit value embedded in a short APCI octet.
pub const fn extract_6bit_value(apci_byte: u8) -> u8 {
    apci_byte & 0x3F
}

// =============================================================================
// L_Data
// =============================================================================

/// One cEMI `L_Data` frame, owned.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LData {
    /// Message code (`L_Data.req`/`.con`/`.ind`).
    pub code: CemiMessageCode,
    /// Control field 1.
    pub ctrl1: ControlField1,
    /// Control field 2.
    pub ctrl2: ControlField2,
    /// Source individual address.
    pub source: IndividualAddress,
    /// Raw destination; interpret through `ctrl2.is_group_address()`.
    pub destination: u16,
    /// Transport/application payload.
    pub tpdu: Tpdu,
}

impl LData {
    /// Shortest possible frame: code, add-info length, two control fields,
    /// two addresses, data length, one TPDU octet.
    pub const MIN_SIZE: usize = 9;

    /// An `L_Data.req` group value write with a 6-bit value.
    pub fn group_write_small(
        source: IndividualAddress,
        destination: GroupAddress,
        value: u8,
    ) -> Self {
        Self {
            code: CemiMessageCode::LDataReq,
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source,
            destination: destination.raw(),
            tpdu: Tpdu::group_write_small(value),
        }
    }

    /// An `L_Data.req` group value read.
    pub fn group_read(source: IndividualAddress, destination: GroupAddress) -> Self {
        Self {
            code: CemiMessageCode::LDataReq,
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source,
            destination: destination.raw(),
            tpdu: Tpdu::group_read(),
        }
    }

    /// Parse a complete cEMI frame (message code onward). Additional info
    /// is skipped; its length octet is honored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(KnxError::structure_truncated());
        }
        let code = CemiMessageCode::from_u8(data[0]).ok_or_else(KnxError::unknown_code)?;
        let add_info_len = data[1] as usize;
        let service = data
            .get(2 + add_info_len..)
            .ok_or_else(KnxError::structure_truncated)?;
        if service.len() < 7 {
            return Err(KnxError::structure_truncated());
        }

        let ctrl1 = ControlField1::from(service[0]);
        let ctrl2 = ControlField2::from(service[1]);
        let source = IndividualAddress::from(u16::from_be_bytes([service[2], service[3]]));
        let destination = u16::from_be_bytes([service[4], service[5]]);
        let data_length = service[6] as usize;

        let tpdu_bytes = service
            .get(7..)
            .ok_or_else(KnxError::structure_truncated)?;
        // The TPDU is the control byte(s) plus `data_length` data octets.
        let tpci = Tpci::from_byte(*tpdu_bytes.first().ok_or_else(KnxError::structure_truncated)?);
        let tpdu_len = if tpci.is_data() { 2 + data_length } else { 1 };
        let tpdu_bytes = tpdu_bytes
            .get(..tpdu_len)
            .ok_or_else(KnxError::structure_truncated)?;

        Ok(Self {
            code,
            ctrl1,
            ctrl2,
            source,
            destination,
            tpdu: Tpdu::parse(tpdu_bytes)?,
        })
    }

    /// Append the complete cEMI octets (no additional info) to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        out.push_u8(self.code.to_u8())?;
        out.push_u8(0x00)?; // no additional info
        out.push_u8(self.ctrl1.raw())?;
        out.push_u8(self.ctrl2.raw())?;
        out.push_knx_address(self.source.raw())?;
        out.push_knx_address(self.destination)?;
        out.push_u8(self.tpdu.data_length())?;
        self.tpdu.encode(out)?;
        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> Result<ByteStore> {
        let mut out = ByteStore::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Destination as a group address, when control field 2 says so.
    pub fn destination_group(&self) -> Option<GroupAddress> {
        self.ctrl2
            .is_group_address()
            .then(|| GroupAddress::from(self.destination))
    }

    /// Destination as an individual address, when control field 2 says so.
    pub fn destination_individual(&self) -> Option<IndividualAddress> {
        (!self.ctrl2.is_group_address()).then(|| IndividualAddress::from(self.destination))
    }

    /// Whether this is a group value write.
    pub fn is_group_write(&self) -> bool {
        self.tpdu.apci == Some(Apci::GroupValueWrite)
    }

    /// Whether this is a group value read.
    pub fn is_group_read(&self) -> bool {
        self.tpdu.apci == Some(Apci::GroupValueRead)
    }

    /// Whether this is a group value response.
    pub fn is_group_response(&self) -> bool {
        self.tpdu.apci == Some(Apci::GroupValueResponse)
    }
}

// =============================================================================
// Raw cEMI classification
// =============================================================================

/// Borrowed view of a raw cEMI frame, for classification before full
/// parsing.
#[derive(Debug)]
pub struct CemiView<'a> {
    code: CemiMessageCode,
    data: &'a [u8],
}

impl<'a> CemiView<'a> {
    /// Minimum size: message code plus additional-info length.
    pub const MIN_SIZE: usize = 2;

    /// Classify a raw cEMI frame.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(KnxError::structure_truncated());
        }
        let code = CemiMessageCode::from_u8(data[0]).ok_or_else(KnxError::unknown_code)?;
        Ok(Self { code, data })
    }

    /// The message code.
    pub const fn code(&self) -> CemiMessageCode {
        self.code
    }

    /// Whether this is an `L_Data` frame.
    pub const fn is_ldata(&self) -> bool {
        matches!(
            self.code,
            CemiMessageCode::LDataReq | CemiMessageCode::LDataInd | CemiMessageCode::LDataCon
        )
    }

    /// Fully parse as `L_Data`.
    pub fn to_ldata(&self) -> Result<LData> {
        if !self.is_ldata() {
            return Err(KnxError::unknown_code());
        }
        LData::parse(self.data)
    }

    /// The raw frame bytes.
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_field1_bits() {
        let ctrl = ControlField1::from(0xBCu8);
        assert!(ctrl.is_standard_frame());
        assert!(ctrl.do_not_repeat());
        assert!(ctrl.is_broadcast());
        assert_eq!(ctrl.priority(), Priority::Low);
        assert!(!ctrl.ack_requested());
        assert!(!ctrl.has_error());
        assert_eq!(ControlField1::default().raw(), 0xBC);

        let rebuilt = ControlField1::new(true, true, true, Priority::Low, false, false);
        assert_eq!(rebuilt.raw(), 0xBC);
    }

    #[test]
    fn control_field2_bits() {
        let ctrl = ControlField2::default();
        assert_eq!(ctrl.raw(), 0xE0);
        assert!(ctrl.is_group_address());
        assert_eq!(ctrl.hop_count(), 6);
        assert_eq!(ctrl.extended_format(), 0);

        let individual = ControlField2::new(false, 5, 0);
        assert!(!individual.is_group_address());
        assert_eq!(individual.hop_count(), 5);
    }

    #[test]
    fn tpci_round_trip() {
        for tpci in [
            Tpci::UnnumberedData,
            Tpci::NumberedData { sequence: 3 },
            Tpci::Connect,
            Tpci::Disconnect,
            Tpci::Ack { sequence: 9 },
            Tpci::Nak { sequence: 15 },
        ] {
            assert_eq!(Tpci::from_byte(tpci.to_byte()), tpci);
        }
        assert_eq!(Tpci::Connect.to_byte(), 0x80);
        assert_eq!(Tpci::Disconnect.to_byte(), 0x81);
        assert_eq!(Tpci::Ack { sequence: 0 }.to_byte(), 0xC2);
        assert!(!Tpci::Connect.is_data());
    }

    #[test]
    fn apci_short_codes() {
        assert_eq!(Apci::from_bytes(0x00, 0x00), Apci::GroupValueRead);
        assert_eq!(Apci::from_bytes(0x00, 0x80), Apci::GroupValueWrite);
        // Embedded 6-bit data does not disturb classification.
        assert_eq!(Apci::from_bytes(0x00, 0x81), Apci::GroupValueWrite);
        assert_eq!(Apci::from_bytes(0x00, 0x40), Apci::GroupValueResponse);
        assert!(Apci::GroupValueWrite.is_short());
    }

    #[test]
    fn apci_extended_codes() {
        assert_eq!(Apci::from_u16(0x3D5), Apci::PropertyValueRead);
        assert_eq!(Apci::from_u16(0x3D7), Apci::PropertyValueWrite);
        assert_eq!(Apci::from_u16(0x2C8), Apci::FunctionPropertyStateRead);
        assert!(!Apci::PropertyValueRead.is_short());
        // Bytes: upper two bits in byte1, rest in byte2.
        assert_eq!(Apci::from_bytes(0x03, 0xD5), Apci::PropertyValueRead);
    }

    #[test]
    fn tpdu_small_write_round_trip() {
        let tpdu = Tpdu::group_write_small(0x01);
        let mut out = ByteStore::new();
        let n = tpdu.encode(&mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(out.as_slice(), &[0x00, 0x81]);

        let parsed = Tpdu::parse(out.as_slice()).unwrap();
        assert_eq!(parsed, tpdu);
        assert_eq!(parsed.small_data, 0x01);
        assert_eq!(parsed.data_length(), 0);
    }

    #[test]
    fn tpdu_control_is_single_octet() {
        let tpdu = Tpdu::parse(&[0x80]).unwrap();
        assert_eq!(tpdu.tpci, Tpci::Connect);
        assert_eq!(tpdu.apci, None);
        let mut out = ByteStore::new();
        assert_eq!(tpdu.encode(&mut out).unwrap(), 1);
    }

    #[test]
    fn tpdu_property_value_read_round_trip() {
        let tpdu = Tpdu {
            tpci: Tpci::NumberedData { sequence: 1 },
            apci: Some(Apci::PropertyValueRead),
            data: Vec::from_slice(&[0x00, 0x0B, 0x01, 0x10, 0x01]).unwrap(),
            small_data: 0,
        };
        let mut out = ByteStore::new();
        tpdu.encode(&mut out).unwrap();
        let parsed = Tpdu::parse(out.as_slice()).unwrap();
        assert_eq!(parsed, tpdu);
    }

    #[test]
    fn ldata_group_write_round_trip() {
        let frame = LData::group_write_small(
            IndividualAddress::new(1, 1, 1).unwrap(),
            GroupAddress::new(1, 0, 1).unwrap(),
            0x01,
        );
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(
            bytes.as_slice(),
            &[0x11, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x08, 0x01, 0x00, 0x00, 0x81]
        );

        let parsed = LData::parse(bytes.as_slice()).unwrap();
        assert_eq!(parsed, frame);
        assert!(parsed.is_group_write());
        assert_eq!(
            parsed.destination_group().unwrap(),
            GroupAddress::new(1, 0, 1).unwrap()
        );
        assert_eq!(extract_6bit_value(bytes.as_slice()[10]), 0x01);
    }

    #[test]
    fn ldata_with_additional_info_is_skipped() {
        let data = [
            0x29, // L_Data.ind
            0x04, // additional info length
            0x01, 0x02, 0x03, 0x04, // additional info
            0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x00, 0x00, 0x80,
        ];
        let frame = LData::parse(&data).unwrap();
        assert_eq!(frame.code, CemiMessageCode::LDataInd);
        assert!(frame.is_group_write());
        assert_eq!(frame.source, IndividualAddress::new(1, 1, 1).unwrap());
    }

    #[test]
    fn ldata_explicit_data_octets() {
        let frame = LData {
            code: CemiMessageCode::LDataReq,
            ctrl1: ControlField1::default(),
            ctrl2: ControlField2::default(),
            source: IndividualAddress::new(1, 1, 1).unwrap(),
            destination: GroupAddress::new(1, 2, 3).unwrap().raw(),
            tpdu: Tpdu::group_write(&[0x12, 0x34]).unwrap(),
        };
        let bytes = frame.to_bytes().unwrap();
        // Data length octet counts the two appended octets.
        assert_eq!(bytes.u8_at(6), Some(2));
        let parsed = LData::parse(bytes.as_slice()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn invalid_message_code_is_rejected() {
        let data = [0xFF, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x00];
        assert!(LData::parse(&data).is_err());
        assert!(CemiView::parse(&data).is_err());
    }

    #[test]
    fn truncated_frames_are_rejected() {
        assert!(LData::parse(&[0x11, 0x00, 0xBC]).is_err());
        // Data length claims more octets than present.
        let data = [0x11, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x05, 0x00, 0x80];
        assert!(LData::parse(&data).is_err());
    }

    #[test]
    fn cemi_view_classifies() {
        let data = [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x01, 0x0A, 0x03, 0x00, 0x00, 0x80];
        let view = CemiView::parse(&data).unwrap();
        assert!(view.is_ldata());
        let ldata = view.to_ldata().unwrap();
        assert!(ldata.is_group_write());
    }
}
