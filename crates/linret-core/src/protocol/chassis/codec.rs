//! Decodes a raw chassis frame into a tagged `ChassisFrame` variant.
//!
//! Mirrors `deserialize_frame`/`PowerlinkFrame`: one entry point inspects the
//! header's `msg_type` and dispatches to the matching payload decoder, so
//! callers match on a closed enum instead of re-checking the byte.

use super::control::{
    ChaStatusResponse, ClockSetResponse, DiscoveryResponse, SrmStatusResponse, SrmTableResponse,
};
use super::header::{ChassisHeader, HEADER_SZ};
use super::stream::{StreamDataHeader, StreamFeedbackPayload, StreamStartPayload};
use super::MsgType;
use crate::error::LinretError;

#[derive(Debug, Clone, PartialEq)]
pub enum ChassisFrame {
    Handshake,
    EchoAck,
    ChaStatus(ChaStatusResponse),
    SrmStatus(SrmStatusResponse),
    Discovery(DiscoveryResponse),
    SrmTable(SrmTableResponse),
    ClockSet(ClockSetResponse),
    StreamStartAck,
    StreamStopAck,
    StreamData { node_id: u8, packet_n: u32, payload: Vec<u8> },
    SrmRunAck,
    SrmStopAck,
    /// Decoded, but this message carries no payload the Coordinator/StreamEngine
    /// acts on (e.g. a generic ACK); the header alone is retained for logging.
    Unhandled(ChassisHeader),
}

/// Parses `(header, payload)` from a single already-reassembled message.
pub fn decode(header: ChassisHeader, payload: &[u8]) -> Result<ChassisFrame, LinretError> {
    if (payload.len() as u16) < header.chunk_sz {
        return Err(LinretError::PayloadLengthMismatch);
    }

    let Some(msg_type) = MsgType::from_code(header.msg_type) else {
        return Ok(ChassisFrame::Unhandled(header));
    };

    if header.nak_code.is_error() {
        return Ok(ChassisFrame::Unhandled(header));
    }

    Ok(match msg_type {
        MsgType::LrHandshakeAck => ChassisFrame::Handshake,
        MsgType::EchoAck => ChassisFrame::EchoAck,
        MsgType::CntlStatAck => ChassisFrame::ChaStatus(ChaStatusResponse::from_bytes(payload)?),
        MsgType::SrmStatAck => ChassisFrame::SrmStatus(SrmStatusResponse::from_bytes(payload)?),
        MsgType::CntlNodesBcAck => ChassisFrame::Discovery(DiscoveryResponse::from_bytes(payload)?),
        MsgType::SrmFatAck => ChassisFrame::SrmTable(SrmTableResponse::from_bytes(payload)?),
        MsgType::CntlClkSetAck => {
            ChassisFrame::ClockSet(ClockSetResponse::from_bytes(payload, header.nak_code))
        }
        MsgType::StreamStartAck => ChassisFrame::StreamStartAck,
        MsgType::StreamStopAck => ChassisFrame::StreamStopAck,
        MsgType::StreamData => {
            if header.chunk_n == 0 {
                let (data_hdr, rest) = StreamDataHeader::from_bytes(payload)?;
                ChassisFrame::StreamData {
                    node_id: data_hdr.node_id,
                    packet_n: data_hdr.packet_n,
                    payload: if data_hdr.payload_present {
                        rest.to_vec()
                    } else {
                        Vec::new()
                    },
                }
            } else {
                // Continuation chunk: the caller (ChassisLink reassembly) is
                // responsible for stashing node_id/packet_n from the first
                // chunk and concatenating this raw payload onto it.
                ChassisFrame::StreamData {
                    node_id: 0,
                    packet_n: 0,
                    payload: payload.to_vec(),
                }
            }
        }
        MsgType::SrmRunAck => ChassisFrame::SrmRunAck,
        MsgType::SrmStopAck => ChassisFrame::SrmStopAck,
        _ => ChassisFrame::Unhandled(header),
    })
}

/// Serializes a `(header, payload)` pair onto the wire.
pub fn encode(header: &ChassisHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SZ + payload.len());
    out.extend_from_slice(&header.to_bytes(payload.len() as u16));
    out.extend_from_slice(payload);
    out
}

/// Consumes `StreamStartPayload`/`StreamFeedbackPayload` construction so
/// `StreamEngine` never hand-assembles the bitmask layout itself.
pub fn encode_stream_start(header: &ChassisHeader, payload: &StreamStartPayload) -> Vec<u8> {
    encode(header, &payload.to_bytes())
}

pub fn encode_stream_feedback(header: &ChassisHeader, payload: &StreamFeedbackPayload) -> Vec<u8> {
    encode(header, &payload.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chassis::header::NakCode;
    use crate::types::IfType;

    #[test]
    fn nak_response_never_updates_state() {
        let hdr = ChassisHeader {
            if_type: IfType::Wired0,
            chunk_n: 0,
            chunk_sz: 0,
            random_id: 1,
            src_addr: 2,
            dst_addr: 0,
            msg_type: MsgType::CntlStatAck.code(),
            nak_code: NakCode::TryAgain,
        };
        let frame = decode(hdr, &[]).unwrap();
        assert!(matches!(frame, ChassisFrame::Unhandled(_)));
    }

    #[test]
    fn payload_shorter_than_chunk_sz_is_rejected() {
        let hdr = ChassisHeader {
            if_type: IfType::Wired0,
            chunk_n: 0,
            chunk_sz: 10,
            random_id: 1,
            src_addr: 2,
            dst_addr: 0,
            msg_type: MsgType::EchoAck.code(),
            nak_code: NakCode::NoError,
        };
        assert_eq!(decode(hdr, &[1, 2, 3]), Err(LinretError::PayloadLengthMismatch));
    }
}
