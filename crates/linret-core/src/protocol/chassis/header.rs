//! The 16-byte chassis protocol header.
//!
//! Wire layout, little-endian: `if_type:u8, chunk_n:u8, chunk_sz:u16,
//! reserved:4, random_id:u8, reserved:3, src_addr:u8, dst_addr:u8,
//! msg_type:u8, nak_code:u8`.

use crate::error::LinretError;
use crate::types::IfType;

pub const HEADER_SZ: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NakCode {
    NoError = 0,
    TryAgain = 1,
    DestUnreachable = 3,
    UnknownCmd = 4,
    SrmConnTxErr = 5,
    SrmConnRxErr = 6,
    SrmCtlErrGeneric = 7,
    SrmCtlErrPhase = 8,
    SrmCtlErrNoGps = 9,
    SrmCtlErrNoTime = 10,
    SrmDataErr = 11,
    SrmsAdcParamsMismatch = 12,
    CtlSrmSchInvalid = 16,
    CtlSetPpsInvalid = 17,
    CtlSetClkInvalid = 18,
    CtlSetClkOutOfPhase = 19,
}

impl NakCode {
    pub fn from_u8(v: u8) -> Result<Self, LinretError> {
        Ok(match v {
            0 => NakCode::NoError,
            1 => NakCode::TryAgain,
            3 => NakCode::DestUnreachable,
            4 => NakCode::UnknownCmd,
            5 => NakCode::SrmConnTxErr,
            6 => NakCode::SrmConnRxErr,
            7 => NakCode::SrmCtlErrGeneric,
            8 => NakCode::SrmCtlErrPhase,
            9 => NakCode::SrmCtlErrNoGps,
            10 => NakCode::SrmCtlErrNoTime,
            11 => NakCode::SrmDataErr,
            12 => NakCode::SrmsAdcParamsMismatch,
            16 => NakCode::CtlSrmSchInvalid,
            17 => NakCode::CtlSetPpsInvalid,
            18 => NakCode::CtlSetClkInvalid,
            19 => NakCode::CtlSetClkOutOfPhase,
            _ => return Err(LinretError::InvalidEnumValue),
        })
    }

    pub fn is_error(self) -> bool {
        !matches!(self, NakCode::NoError)
    }
}

/// Message-type bitfields.
pub mod msg_bits {
    pub const STR: u8 = 0x08;
    pub const SRM: u8 = 0x10;
    pub const CTL: u8 = 0x20;
    pub const ACK: u8 = 0x80;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChassisHeader {
    pub if_type: IfType,
    pub chunk_n: u8,
    pub chunk_sz: u16,
    pub random_id: u8,
    pub src_addr: u8,
    pub dst_addr: u8,
    pub msg_type: u8,
    pub nak_code: NakCode,
}

impl ChassisHeader {
    pub fn request(if_type: IfType, msg_type: u8, dst_addr: u8, random_id: u8) -> Self {
        ChassisHeader {
            if_type,
            chunk_n: 0,
            chunk_sz: 0,
            random_id,
            src_addr: 0,
            dst_addr,
            msg_type,
            nak_code: NakCode::NoError,
        }
    }

    pub fn has_stream_bit(&self) -> bool {
        self.msg_type & msg_bits::STR != 0
    }

    pub fn has_ack_bit(&self) -> bool {
        self.msg_type & msg_bits::ACK != 0
    }

    pub fn to_bytes(&self, chunk_sz: u16) -> [u8; HEADER_SZ] {
        let mut out = [0u8; HEADER_SZ];
        out[0] = self.if_type as u8;
        out[1] = self.chunk_n;
        out[2..4].copy_from_slice(&chunk_sz.to_le_bytes());
        // bytes 4..8 reserved
        out[8] = self.random_id;
        // bytes 9..12 reserved
        out[12] = self.src_addr;
        out[13] = self.dst_addr;
        out[14] = self.msg_type;
        out[15] = self.nak_code as u8;
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinretError> {
        if bytes.len() < HEADER_SZ {
            return Err(LinretError::BufferTooShort);
        }
        let if_type = IfType::try_from(bytes[0])?;
        let chunk_n = bytes[1];
        let chunk_sz = u16::from_le_bytes([bytes[2], bytes[3]]);
        let random_id = bytes[8];
        let src_addr = bytes[12];
        let dst_addr = bytes[13];
        let msg_type = bytes[14];
        let nak_code = NakCode::from_u8(bytes[15])?;
        Ok(ChassisHeader {
            if_type,
            chunk_n,
            chunk_sz,
            random_id,
            src_addr,
            dst_addr,
            msg_type,
            nak_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let hdr = ChassisHeader {
            if_type: IfType::Wired0,
            chunk_n: 1,
            chunk_sz: 64,
            random_id: 9,
            src_addr: 2,
            dst_addr: 3,
            msg_type: msg_bits::STR | 2 | msg_bits::ACK,
            nak_code: NakCode::NoError,
        };
        let bytes = hdr.to_bytes(64);
        assert_eq!(bytes.len(), HEADER_SZ);
        assert_eq!(ChassisHeader::from_bytes(&bytes).unwrap(), hdr);
    }

    #[test]
    fn too_short_buffer_is_rejected() {
        let bytes = [0u8; 10];
        assert_eq!(ChassisHeader::from_bytes(&bytes), Err(LinretError::BufferTooShort));
    }
}
