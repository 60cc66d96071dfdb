//! Encodes upstream CS responses.

use crate::adc::AdcConfig;
use crate::types::Serial;

use super::header::{CsHeader, PacketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    Ack = 1,
    Nak = 2,
    Stall = 3,
}

pub struct NodeIdListResponse {
    pub devs: Vec<Serial>,
}

impl NodeIdListResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.devs.len() * 8);
        out.extend_from_slice(&(self.devs.len() as u16).to_le_bytes());
        for s in &self.devs {
            out.extend_from_slice(s.as_bytes());
        }
        out
    }
}

pub fn ack_nak_response(header: &CsHeader, ack: AckCode, src_serial: Option<Serial>) -> (CsHeader, Vec<u8>) {
    let resp_hdr = header.response_header(PacketType::AckNakResponse, src_serial);
    (resp_hdr, vec![ack as u8])
}

pub struct ChaStatusSummary {
    pub acq_running: bool,
    pub temperature: i8,
    pub humidity: u8,
    pub pps_present: bool,
    pub adc_config: AdcConfig,
}

impl ChaStatusSummary {
    /// `<L 4s B b B B B>`: reserved, ADC CS bytes, acq state, temp, humidity,
    /// sync state, test signal (always NO_SIGNAL — test-signal injection is
    /// out of scope).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 4 + 1 + 1 + 1 + 1 + 1);
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.adc_config.to_cs_bytes());
        out.push(if self.acq_running { 0xFF } else { 0 });
        out.push(self.temperature as u8);
        out.push(self.humidity);
        out.push(if self.pps_present { 0xFF } else { 0 });
        out.push(0); // CS_TEST_SIGNAL::NO_SIGNAL
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::{DataRate, GainCode};
    use crate::protocol::cs::header::PacketType;

    #[test]
    fn ack_nak_swaps_header_direction() {
        let hdr = CsHeader {
            cs_cmd_type: PacketType::CmdSetConfig,
            session_id: 3,
            src_serial: Serial([0; 8]),
            dst_serial: Serial([9; 8]),
            payload_length: 0,
        };
        let (resp_hdr, payload) = ack_nak_response(&hdr, AckCode::Ack, None);
        assert_eq!(resp_hdr.cs_cmd_type, PacketType::AckNakResponse);
        assert_eq!(resp_hdr.dst_serial, hdr.src_serial);
        assert_eq!(payload, vec![AckCode::Ack as u8]);
    }

    #[test]
    fn node_id_list_encodes_count_prefix() {
        let resp = NodeIdListResponse {
            devs: vec![Serial([1; 8]), Serial([2; 8])],
        };
        let bytes = resp.to_bytes();
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 2);
        assert_eq!(bytes.len(), 2 + 16);
    }

    #[test]
    fn cha_status_summary_carries_adc_config() {
        let cfg = AdcConfig::new(DataRate::Dr1000, [true; 4], [GainCode::Gain2; 4]);
        let summary = ChaStatusSummary {
            acq_running: true,
            temperature: 20,
            humidity: 50,
            pps_present: true,
            adc_config: cfg,
        };
        let bytes = summary.to_bytes();
        assert_eq!(AdcConfig::from_cs_bytes(&bytes[4..8]).unwrap(), cfg);
    }
}
