//! cEMI device management frames.
//!
//! Local device management speaks property services against interface
//! objects inside the KNXnet/IP server itself, carried in
//! `DEVICE_CONFIGURATION_REQUEST` frames. Property frames share one layout:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Message Code (1 byte)                       │
//! │ Interface Object Type (2 bytes)             │
//! │ Object Instance (1 byte, >= 1)              │
//! │ Property Id (1 byte)                        │
//! │ Number of Elements (high nibble)            │
//! │ Start Index (12 bits)                       │
//! │ Data (variable)                             │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Function property frames drop the packed elements/index word, reset
//! frames are a bare message code. Validity is message-code specific; a
//! negative property confirmation carries number-of-elements 0 plus one
//! error octet, a negative function-property confirmation omits the return
//! code entirely.
//!
//! `M_FuncPropCommand.con` and `M_FuncPropStateRead.con` share the opcode
//! 0xFA; both are decoded as [`DeviceMgmtCode::FunctionPropertyConfirmation`]
//! and the endpoint disambiguates from the request it has outstanding.

use crate::bytes::ByteStore;
use crate::error::{KnxError, Result};
use heapless::Vec;

/// Maximum data octets carried in one device management frame.
pub const MAX_MGMT_DATA: usize = 64;

/// Device management message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DeviceMgmtCode {
    /// `M_PropRead.req`
    PropertyReadRequest = 0xFC,
    /// `M_PropRead.con`
    PropertyReadConfirmation = 0xFB,
    /// `M_PropWrite.req`
    PropertyWriteRequest = 0xF6,
    /// `M_PropWrite.con`
    PropertyWriteConfirmation = 0xF5,
    /// `M_PropInfo.ind`
    PropertyInfoIndication = 0xF7,
    /// `M_FuncPropCommand.req`
    FunctionPropertyCommandRequest = 0xF8,
    /// `M_FuncPropStateRead.req`
    FunctionPropertyStateReadRequest = 0xF9,
    /// `M_FuncPropCommand.con` and `M_FuncPropStateRead.con` (shared
    /// opcode; the preceding request tells them apart).
    FunctionPropertyConfirmation = 0xFA,
    /// `M_Reset.req`
    ResetRequest = 0xF1,
    /// `M_Reset.ind`
    ResetIndication = 0xF0,
}

impl DeviceMgmtCode {
    /// Convert a raw message-code octet.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0xFC => Some(Self::PropertyReadRequest),
            0xFB => Some(Self::PropertyReadConfirmation),
            0xF6 => Some(Self::PropertyWriteRequest),
            0xF5 => Some(Self::PropertyWriteConfirmation),
            0xF7 => Some(Self::PropertyInfoIndication),
            0xF8 => Some(Self::FunctionPropertyCommandRequest),
            0xF9 => Some(Self::FunctionPropertyStateReadRequest),
            0xFA => Some(Self::FunctionPropertyConfirmation),
            0xF1 => Some(Self::ResetRequest),
            0xF0 => Some(Self::ResetIndication),
            _ => None,
        }
    }

    /// Convert to the raw message-code octet.
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether this code belongs to the function property family (no
    /// packed elements/index word on the wire).
    pub const fn is_function_property(self) -> bool {
        matches!(
            self,
            Self::FunctionPropertyCommandRequest
                | Self::FunctionPropertyStateReadRequest
                | Self::FunctionPropertyConfirmation
        )
    }

    /// Whether this code is a bare reset frame.
    pub const fn is_reset(self) -> bool {
        matches!(self, Self::ResetRequest | Self::ResetIndication)
    }
}

/// Standardized interface object types.
///
/// Known system object types plus the manufacturer-specific window; the
/// property compatibility check below keys off this classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterfaceObjectType;

impl InterfaceObjectType {
    /// Device object.
    pub const DEVICE: u16 = 0x0000;
    /// Group address table.
    pub const GROUP_ADDRESS_TABLE: u16 = 0x0001;
    /// Association table.
    pub const ASSOCIATION_TABLE: u16 = 0x0002;
    /// Application program.
    pub const APPLICATION_PROGRAM: u16 = 0x0003;
    /// Interface program.
    pub const INTERFACE_PROGRAM: u16 = 0x0004;
    /// Router object.
    pub const ROUTER: u16 = 0x0006;
    /// cEMI server object.
    pub const CEMI_SERVER: u16 = 0x0008;
    /// Group object table.
    pub const GROUP_OBJECT_TABLE: u16 = 0x0009;
    /// KNXnet/IP parameter object.
    pub const KNXNETIP_PARAMETER: u16 = 0x000B;
    /// File server object.
    pub const FILE_SERVER: u16 = 0x000D;
    /// Security interface object.
    pub const SECURITY: u16 = 0x0011;
    /// RF medium object.
    pub const RF_MEDIUM: u16 = 0x0013;

    /// First manufacturer-specific object type.
    pub const MANUFACTURER_FIRST: u16 = 0xB000;

    /// Whether `value` names a recognized interface object type.
    pub const fn is_object_type(value: u16) -> bool {
        matches!(
            value,
            Self::DEVICE
                | Self::GROUP_ADDRESS_TABLE
                | Self::ASSOCIATION_TABLE
                | Self::APPLICATION_PROGRAM
                | Self::INTERFACE_PROGRAM
                | Self::ROUTER
                | Self::CEMI_SERVER
                | Self::GROUP_OBJECT_TABLE
                | Self::KNXNETIP_PARAMETER
                | Self::FILE_SERVER
                | Self::SECURITY
                | Self::RF_MEDIUM
        ) || value >= Self::MANUFACTURER_FIRST
    }

    /// Whether property `pid` can occur on object type `object_type`.
    ///
    /// Static table: the general property range applies to every object;
    /// each system object additionally owns its specific range;
    /// manufacturer objects accept anything.
    pub const fn is_match(object_type: u16, pid: u8) -> bool {
        // General properties (PID_OBJECT_TYPE .. PID_DOWNLOAD_COUNTER).
        if pid <= 53 {
            return true;
        }
        if object_type >= Self::MANUFACTURER_FIRST {
            return true;
        }
        match object_type {
            Self::DEVICE => pid >= 54 && pid <= 89,
            Self::ROUTER => pid >= 54 && pid <= 120,
            Self::CEMI_SERVER => pid >= 54 && pid <= 123,
            Self::KNXNETIP_PARAMETER => pid >= 54 && pid <= 111,
            Self::SECURITY => pid >= 54 && pid <= 95,
            Self::RF_MEDIUM => pid >= 54 && pid <= 104,
            // Table-style objects only use the general range plus the
            // load/run control block.
            Self::GROUP_ADDRESS_TABLE
            | Self::ASSOCIATION_TABLE
            | Self::APPLICATION_PROGRAM
            | Self::INTERFACE_PROGRAM
            | Self::GROUP_OBJECT_TABLE
            | Self::FILE_SERVER => pid <= 70,
            _ => false,
        }
    }
}

/// One device management frame, owned.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceMgmtFrame {
    /// Message code.
    pub code: DeviceMgmtCode,
    /// Interface object type.
    pub object_type: u16,
    /// Object instance, >= 1.
    pub object_instance: u8,
    /// Property id.
    pub property_id: u8,
    /// Number of elements (0..15); 0 marks a negative confirmation.
    pub number_of_elements: u8,
    /// Start index (0..4095).
    pub start_index: u16,
    /// Data octets (property values, error byte, or function property
    /// return code + data).
    pub data: Vec<u8, MAX_MGMT_DATA>,
}

impl DeviceMgmtFrame {
    /// An `M_PropRead.req` for `count` elements starting at `start_index`.
    pub fn property_read(
        object_type: u16,
        object_instance: u8,
        property_id: u8,
        count: u8,
        start_index: u16,
    ) -> Self {
        Self {
            code: DeviceMgmtCode::PropertyReadRequest,
            object_type,
            object_instance,
            property_id,
            number_of_elements: count,
            start_index,
            data: Vec::new(),
        }
    }

    /// An `M_PropWrite.req` carrying `data`.
    pub fn property_write(
        object_type: u16,
        object_instance: u8,
        property_id: u8,
        count: u8,
        start_index: u16,
        data: &[u8],
    ) -> Result<Self> {
        Ok(Self {
            code: DeviceMgmtCode::PropertyWriteRequest,
            object_type,
            object_instance,
            property_id,
            number_of_elements: count,
            start_index,
            data: Vec::from_slice(data).map_err(|_| KnxError::out_of_resource())?,
        })
    }

    /// An `M_FuncPropCommand.req` carrying `data`.
    pub fn function_property_command(
        object_type: u16,
        object_instance: u8,
        property_id: u8,
        data: &[u8],
    ) -> Result<Self> {
        Ok(Self {
            code: DeviceMgmtCode::FunctionPropertyCommandRequest,
            object_type,
            object_instance,
            property_id,
            number_of_elements: 0,
            start_index: 0,
            data: Vec::from_slice(data).map_err(|_| KnxError::out_of_resource())?,
        })
    }

    /// An `M_Reset.req`.
    pub fn reset() -> Self {
        Self {
            code: DeviceMgmtCode::ResetRequest,
            object_type: 0,
            object_instance: 0,
            property_id: 0,
            number_of_elements: 0,
            start_index: 0,
            data: Vec::new(),
        }
    }

    /// Parse a device management frame.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let code = DeviceMgmtCode::from_u8(*bytes.first().ok_or_else(KnxError::structure_truncated)?)
            .ok_or_else(KnxError::unknown_code)?;

        if code.is_reset() {
            return Ok(Self {
                code,
                object_type: 0,
                object_instance: 0,
                property_id: 0,
                number_of_elements: 0,
                start_index: 0,
                data: Vec::from_slice(&bytes[1..]).map_err(|_| KnxError::out_of_resource())?,
            });
        }

        if bytes.len() < 5 {
            return Err(KnxError::structure_truncated());
        }
        let object_type = u16::from_be_bytes([bytes[1], bytes[2]]);
        let object_instance = bytes[3];
        let property_id = bytes[4];

        if code.is_function_property() {
            return Ok(Self {
                code,
                object_type,
                object_instance,
                property_id,
                number_of_elements: 0,
                start_index: 0,
                data: Vec::from_slice(&bytes[5..]).map_err(|_| KnxError::out_of_resource())?,
            });
        }

        if bytes.len() < 7 {
            return Err(KnxError::structure_truncated());
        }
        let packed = u16::from_be_bytes([bytes[5], bytes[6]]);
        Ok(Self {
            code,
            object_type,
            object_instance,
            property_id,
            number_of_elements: (packed >> 12) as u8,
            start_index: packed & 0x0FFF,
            data: Vec::from_slice(&bytes[7..]).map_err(|_| KnxError::out_of_resource())?,
        })
    }

    /// Append the frame octets to `out`.
    pub fn encode(&self, out: &mut ByteStore) -> Result<()> {
        out.push_u8(self.code.to_u8())?;
        if self.code.is_reset() {
            return Ok(());
        }
        out.push_u16(self.object_type)?;
        out.push_u8(self.object_instance)?;
        out.push_u8(self.property_id)?;
        if !self.code.is_function_property() {
            let packed =
                ((self.number_of_elements as u16 & 0x0F) << 12) | (self.start_index & 0x0FFF);
            out.push_u16(packed)?;
        }
        out.push_slice(&self.data)
    }

    /// Serialize into a fresh buffer.
    pub fn to_bytes(&self) -> Result<ByteStore> {
        let mut out = ByteStore::new();
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Frame size on the wire.
    pub fn size(&self) -> usize {
        if self.code.is_reset() {
            1
        } else if self.code.is_function_property() {
            5 + self.data.len()
        } else {
            7 + self.data.len()
        }
    }

    /// Message-code specific validity.
    ///
    /// Size rules per code, then a recognized object type, instance >= 1,
    /// and type/property compatibility against the static table.
    pub fn is_valid(&self) -> bool {
        let size = self.size();
        match self.code {
            // The read request shall not carry further data.
            DeviceMgmtCode::PropertyReadRequest => {
                if size != 7 {
                    return false;
                }
            }
            // Shall carry data: values, or NoE=0 plus an error octet.
            DeviceMgmtCode::PropertyReadConfirmation
            | DeviceMgmtCode::PropertyWriteRequest => {
                if size < 8 {
                    return false;
                }
            }
            // Positive: exactly the write request minus data. Negative:
            // NoE=0 and one error octet.
            DeviceMgmtCode::PropertyWriteConfirmation => {
                if (self.number_of_elements >= 1 && size != 7)
                    || (self.number_of_elements == 0 && size != 8)
                {
                    return false;
                }
            }
            DeviceMgmtCode::PropertyInfoIndication => {
                if size < 7 {
                    return false;
                }
            }
            DeviceMgmtCode::FunctionPropertyCommandRequest
            | DeviceMgmtCode::FunctionPropertyStateReadRequest => {
                if size < 6 {
                    return false;
                }
            }
            // Return code and data are omitted on error, leaving 5 octets.
            DeviceMgmtCode::FunctionPropertyConfirmation => {
                if size < 5 {
                    return false;
                }
            }
            DeviceMgmtCode::ResetRequest | DeviceMgmtCode::ResetIndication => {
                return size == 1;
            }
        }

        if !InterfaceObjectType::is_object_type(self.object_type) {
            return false;
        }
        if self.object_instance < 1 {
            return false;
        }
        InterfaceObjectType::is_match(self.object_type, self.property_id)
    }

    /// Whether this frame is a negative confirmation.
    ///
    /// Property confirmations signal the error with number-of-elements 0;
    /// function property confirmations by omitting the return code.
    pub fn is_negative_confirmation(&self) -> bool {
        match self.code {
            DeviceMgmtCode::PropertyReadConfirmation
            | DeviceMgmtCode::PropertyWriteConfirmation => self.number_of_elements == 0,
            DeviceMgmtCode::FunctionPropertyConfirmation => self.size() == 5,
            _ => false,
        }
    }

    /// The error octet of a negative property confirmation.
    pub fn error_code(&self) -> Option<u8> {
        if self.is_negative_confirmation() && !self.code.is_function_property() {
            self.data.first().copied()
        } else {
            None
        }
    }

    /// The return code of a positive function property confirmation.
    pub fn return_code(&self) -> Option<u8> {
        if self.code == DeviceMgmtCode::FunctionPropertyConfirmation && self.size() >= 6 {
            self.data.first().copied()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_read_request_round_trip() {
        let frame = DeviceMgmtFrame::property_read(
            InterfaceObjectType::KNXNETIP_PARAMETER,
            1,
            52, // PID_KNX_INDIVIDUAL_ADDRESS
            1,
            0,
        );
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(
            bytes.as_slice(),
            &[0xFC, 0x00, 0x0B, 0x01, 0x34, 0x10, 0x00]
        );
        assert_eq!(frame.size(), 7);
        assert!(frame.is_valid());

        let parsed = DeviceMgmtFrame::parse(bytes.as_slice()).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.number_of_elements, 1);
        assert_eq!(parsed.start_index, 0);
    }

    #[test]
    fn read_request_with_data_is_invalid() {
        let mut frame = DeviceMgmtFrame::property_read(InterfaceObjectType::DEVICE, 1, 1, 1, 0);
        frame.data.push(0x00).unwrap();
        assert!(!frame.is_valid());
    }

    #[test]
    fn packed_elements_and_start_index() {
        let frame = DeviceMgmtFrame::property_read(InterfaceObjectType::DEVICE, 1, 1, 15, 4095);
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.u16_at(5), Some(0xFFFF));
        let parsed = DeviceMgmtFrame::parse(bytes.as_slice()).unwrap();
        assert_eq!(parsed.number_of_elements, 15);
        assert_eq!(parsed.start_index, 4095);
    }

    #[test]
    fn negative_read_confirmation() {
        // NoE = 0, one error octet.
        let bytes = [0xFB, 0x00, 0x00, 0x01, 0x34, 0x00, 0x00, 0x07];
        let frame = DeviceMgmtFrame::parse(&bytes).unwrap();
        assert_eq!(frame.code, DeviceMgmtCode::PropertyReadConfirmation);
        assert!(frame.is_valid());
        assert!(frame.is_negative_confirmation());
        assert_eq!(frame.error_code(), Some(0x07));
    }

    #[test]
    fn write_confirmation_sizes() {
        // Positive confirmation: exactly 7 octets, NoE >= 1.
        let positive = [0xF5, 0x00, 0x00, 0x01, 0x35, 0x10, 0x00];
        let frame = DeviceMgmtFrame::parse(&positive).unwrap();
        assert!(frame.is_valid());
        assert!(!frame.is_negative_confirmation());

        // Negative confirmation: 8 octets, NoE == 0.
        let negative = [0xF5, 0x00, 0x00, 0x01, 0x35, 0x00, 0x00, 0x26];
        let frame = DeviceMgmtFrame::parse(&negative).unwrap();
        assert!(frame.is_valid());
        assert!(frame.is_negative_confirmation());
        assert_eq!(frame.error_code(), Some(0x26));

        // Positive with trailing data is malformed.
        let bad = [0xF5, 0x00, 0x00, 0x01, 0x35, 0x10, 0x00, 0xAA];
        assert!(!DeviceMgmtFrame::parse(&bad).unwrap().is_valid());
    }

    #[test]
    fn function_property_confirmation_negative_is_five_octets() {
        // Shared opcode 0xFA; negative form omits return code and data.
        let negative = [0xFA, 0x00, 0x08, 0x01, 0x42];
        let frame = DeviceMgmtFrame::parse(&negative).unwrap();
        assert_eq!(frame.code, DeviceMgmtCode::FunctionPropertyConfirmation);
        assert!(frame.is_valid());
        assert!(frame.is_negative_confirmation());
        assert_eq!(frame.return_code(), None);

        let positive = [0xFA, 0x00, 0x08, 0x01, 0x42, 0x00, 0x12];
        let frame = DeviceMgmtFrame::parse(&positive).unwrap();
        assert!(!frame.is_negative_confirmation());
        assert_eq!(frame.return_code(), Some(0x00));
    }

    #[test]
    fn function_property_request_layout() {
        let frame = DeviceMgmtFrame::function_property_command(
            InterfaceObjectType::CEMI_SERVER,
            1,
            0x42,
            &[0x00, 0x01],
        )
        .unwrap();
        let bytes = frame.to_bytes().unwrap();
        // No packed elements/index word.
        assert_eq!(bytes.as_slice(), &[0xF8, 0x00, 0x08, 0x01, 0x42, 0x00, 0x01]);
        assert!(frame.is_valid());
    }

    #[test]
    fn reset_frames_are_one_octet() {
        let frame = DeviceMgmtFrame::reset();
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.as_slice(), &[0xF1]);
        assert!(frame.is_valid());

        let parsed = DeviceMgmtFrame::parse(&[0xF0]).unwrap();
        assert_eq!(parsed.code, DeviceMgmtCode::ResetIndication);
        assert!(parsed.is_valid());
    }

    #[test]
    fn unknown_object_type_is_invalid() {
        let frame = DeviceMgmtFrame::property_read(0x0F00, 1, 1, 1, 0);
        assert!(!frame.is_valid());
        // Manufacturer window is accepted.
        let frame = DeviceMgmtFrame::property_read(0xB001, 1, 200, 1, 0);
        assert!(frame.is_valid());
    }

    #[test]
    fn instance_zero_is_invalid() {
        let frame = DeviceMgmtFrame::property_read(InterfaceObjectType::DEVICE, 0, 1, 1, 0);
        assert!(!frame.is_valid());
    }

    #[test]
    fn property_compatibility_table() {
        // General range is valid on every object.
        assert!(InterfaceObjectType::is_match(InterfaceObjectType::DEVICE, 1));
        assert!(InterfaceObjectType::is_match(
            InterfaceObjectType::GROUP_ADDRESS_TABLE,
            53
        ));
        // Device-specific range is rejected on a table object.
        assert!(!InterfaceObjectType::is_match(
            InterfaceObjectType::GROUP_ADDRESS_TABLE,
            85
        ));
        assert!(InterfaceObjectType::is_match(InterfaceObjectType::DEVICE, 85));
        // Manufacturer objects accept anything.
        assert!(InterfaceObjectType::is_match(0xB000, 254));
    }

    #[test]
    fn unknown_message_code_is_rejected() {
        assert!(DeviceMgmtFrame::parse(&[0x42, 0x00]).is_err());
    }
}
