//! The 24-byte upstream CS protocol header.

use crate::error::LinretError;
use crate::types::Serial;

pub const HEADER_SZ: usize = 24;
pub const MAGIC: u8 = 0x3A;
pub const VERSION: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    AckNakResponse,
    NodeIdListRequest,
    NodeIdListResponse,
    SrmStateRequest,
    SrmStateResponse,
    LrStateRequest,
    LrStateResponse,
    ChaStateRequest,
    ChaStateResponse,
    ChaLrStateRequest,
    ChaLrStateResponse,
    CmdSetConfig,
    CmdAcquisitionCtl,
}

impl PacketType {
    pub fn code(self) -> u8 {
        match self {
            PacketType::AckNakResponse => 1,
            PacketType::NodeIdListRequest => 3,
            PacketType::SrmStateRequest => 5,
            PacketType::LrStateRequest => 6,
            PacketType::ChaStateRequest => 7,
            PacketType::ChaLrStateRequest => 8,
            PacketType::CmdSetConfig => 12,
            PacketType::CmdAcquisitionCtl => 14,
            PacketType::NodeIdListResponse => 19,
            PacketType::SrmStateResponse => 20,
            PacketType::LrStateResponse => 21,
            PacketType::ChaStateResponse => 22,
            PacketType::ChaLrStateResponse => 23,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, LinretError> {
        Ok(match code {
            1 => PacketType::AckNakResponse,
            3 => PacketType::NodeIdListRequest,
            5 => PacketType::SrmStateRequest,
            6 => PacketType::LrStateRequest,
            7 => PacketType::ChaStateRequest,
            8 => PacketType::ChaLrStateRequest,
            12 => PacketType::CmdSetConfig,
            14 => PacketType::CmdAcquisitionCtl,
            19 => PacketType::NodeIdListResponse,
            20 => PacketType::SrmStateResponse,
            21 => PacketType::LrStateResponse,
            22 => PacketType::ChaStateResponse,
            23 => PacketType::ChaLrStateResponse,
            _ => return Err(LinretError::InvalidEnumValue),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsHeader {
    pub cs_cmd_type: PacketType,
    pub session_id: u8,
    pub src_serial: Serial,
    pub dst_serial: Serial,
    pub payload_length: u32,
}

impl CsHeader {
    pub fn is_broadcast(&self) -> bool {
        self.dst_serial.is_broadcast()
    }

    /// Builds the header for a response to `self`, optionally overriding the
    /// responder's own serial (mirrors `response_hdr`).
    pub fn response_header(&self, cs_cmd_type: PacketType, src_serial: Option<Serial>) -> CsHeader {
        CsHeader {
            cs_cmd_type,
            session_id: self.session_id,
            src_serial: src_serial.unwrap_or(self.dst_serial),
            dst_serial: self.src_serial,
            payload_length: 0,
        }
    }

    pub fn to_bytes(&self, payload_length: u32) -> [u8; HEADER_SZ] {
        let mut out = [0u8; HEADER_SZ];
        out[0] = MAGIC;
        out[1] = VERSION;
        out[2] = self.cs_cmd_type.code();
        out[3] = self.session_id;
        out[4..12].copy_from_slice(self.src_serial.as_bytes());
        out[12..20].copy_from_slice(self.dst_serial.as_bytes());
        out[20..24].copy_from_slice(&payload_length.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinretError> {
        if bytes.len() < HEADER_SZ {
            return Err(LinretError::BufferTooShort);
        }
        if bytes[0] != MAGIC || bytes[1] != VERSION {
            return Err(LinretError::BadCsMagicOrVersion);
        }
        let cs_cmd_type = PacketType::from_code(bytes[2])?;
        let session_id = bytes[3];
        let src_serial = Serial(bytes[4..12].try_into().unwrap());
        let dst_serial = Serial(bytes[12..20].try_into().unwrap());
        let payload_length = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        Ok(CsHeader {
            cs_cmd_type,
            session_id,
            src_serial,
            dst_serial,
            payload_length,
        })
    }
}
