//! Decoded upstream CS requests, keyed off `PacketType` the way `ChassisFrame`
//! is keyed off the chassis `MsgType`.

use crate::adc::AdcConfig;
use crate::error::LinretError;
use crate::types::CsDevType;

use super::header::{CsHeader, PacketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
    Idle,
    Running,
}

impl AcqState {
    fn from_code(code: u8) -> Result<Self, LinretError> {
        match code {
            0 => Ok(AcqState::Idle),
            0xFF => Ok(AcqState::Running),
            _ => Err(LinretError::InvalidEnumValue),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CsRequest {
    NodeIdList { dev_type: CsDevType },
    LrState,
    SrmState,
    ChaState,
    ChaLrState,
    SetConfig(AdcConfig),
    AcqControl { run: AcqState },
}

fn dev_type_from_u16(v: u16) -> Result<CsDevType, LinretError> {
    Ok(match v {
        0 => CsDevType::Any,
        0x1 => CsDevType::Lr,
        0x2 => CsDevType::Srm,
        0x21 => CsDevType::ChaLr,
        0x22 => CsDevType::ChaRn,
        _ => return Err(LinretError::InvalidEnumValue),
    })
}

/// Decodes the request payload body for `header.cs_cmd_type`. The caller
/// already validated `header.payload_length == payload.len()`.
pub fn decode(header: &CsHeader, payload: &[u8]) -> Result<CsRequest, LinretError> {
    match header.cs_cmd_type {
        PacketType::NodeIdListRequest => {
            if payload.len() < 2 {
                return Err(LinretError::BufferTooShort);
            }
            let dev = u16::from_le_bytes(payload[0..2].try_into().unwrap());
            Ok(CsRequest::NodeIdList {
                dev_type: dev_type_from_u16(dev)?,
            })
        }
        PacketType::LrStateRequest => Ok(CsRequest::LrState),
        PacketType::SrmStateRequest => Ok(CsRequest::SrmState),
        PacketType::ChaStateRequest => Ok(CsRequest::ChaState),
        PacketType::ChaLrStateRequest => Ok(CsRequest::ChaLrState),
        PacketType::CmdSetConfig => Ok(CsRequest::SetConfig(AdcConfig::from_cs_bytes(payload)?)),
        PacketType::CmdAcquisitionCtl => {
            if payload.len() < 2 {
                return Err(LinretError::BufferTooShort);
            }
            Ok(CsRequest::AcqControl {
                run: AcqState::from_code(payload[0])?,
            })
        }
        _ => Err(LinretError::InvalidEnumValue),
    }
}
