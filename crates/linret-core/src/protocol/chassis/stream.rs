//! Streaming payloads: STREAM_START / STREAM_FB / STREAM_DATA / SRM_RUN.

use crate::adc::AdcConfig;
use crate::bitcursor::{BitReader, BitWriter};
use crate::error::LinretError;

/// Number of 32-bit words in the packet bitmask (covers up to 416 packets).
pub const BITMASK_WORDS: usize = 13;

pub type PacketBitmask = [u32; BITMASK_WORDS];

pub fn bitmask_set(mask: &mut PacketBitmask, bit_n: u32) {
    let (word, bit) = (bit_n >> 5, 1u32 << (bit_n & 0x1F));
    mask[word as usize] |= bit;
}

pub fn bitmask_read(mask: &PacketBitmask, bit_n: u32) -> bool {
    let (word, bit) = (bit_n >> 5, 1u32 << (bit_n & 0x1F));
    mask[word as usize] & bit != 0
}

fn mask_to_bytes(mask: &PacketBitmask) -> Vec<u8> {
    mask.iter().flat_map(|w| w.to_le_bytes()).collect()
}

fn mask_from_bytes(bytes: &[u8]) -> Result<PacketBitmask, LinretError> {
    if bytes.len() < BITMASK_WORDS * 4 {
        return Err(LinretError::BufferTooShort);
    }
    let mut mask = [0u32; BITMASK_WORDS];
    for (i, slot) in mask.iter_mut().enumerate() {
        let base = i * 4;
        *slot = u32::from_le_bytes(bytes[base..base + 4].try_into().unwrap());
    }
    Ok(mask)
}

pub struct StreamStartPayload {
    pub timestamp: u32,
    pub packets: PacketBitmask,
    pub adc_code: u32,
}

impl StreamStartPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + BITMASK_WORDS * 4 + 4);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&mask_to_bytes(&self.packets));
        out.extend_from_slice(&self.adc_code.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinretError> {
        if bytes.len() < 4 + BITMASK_WORDS * 4 + 4 {
            return Err(LinretError::BufferTooShort);
        }
        let timestamp = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let packets = mask_from_bytes(&bytes[4..4 + BITMASK_WORDS * 4])?;
        let adc_off = 4 + BITMASK_WORDS * 4;
        let adc_code = u32::from_le_bytes(bytes[adc_off..adc_off + 4].try_into().unwrap());
        Ok(StreamStartPayload {
            timestamp,
            packets,
            adc_code,
        })
    }
}

pub struct StreamFeedbackPayload {
    pub timestamp: u32,
    pub packets: PacketBitmask,
}

impl StreamFeedbackPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + BITMASK_WORDS * 4);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&mask_to_bytes(&self.packets));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinretError> {
        if bytes.len() < 4 + BITMASK_WORDS * 4 {
            return Err(LinretError::BufferTooShort);
        }
        let timestamp = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let packets = mask_from_bytes(&bytes[4..])?;
        Ok(StreamFeedbackPayload { timestamp, packets })
    }
}

/// First chunk of a STREAM_DATA message: `node_id`, a packed byte of
/// `{packet_n:3, payload_present:1, err_code:4}`, then payload from offset 4.
pub struct StreamDataHeader {
    pub node_id: u8,
    pub packet_n: u32,
    pub payload_present: bool,
    pub err_code: u32,
}

impl StreamDataHeader {
    pub const HDR_SZ: usize = 4;

    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, &[u8]), LinretError> {
        if bytes.len() < Self::HDR_SZ {
            return Err(LinretError::BufferTooShort);
        }
        let node_id = bytes[0];
        let mut r = BitReader::from_u16(bytes[1] as u16);
        let packet_n = r.read(3)?;
        let payload_present = r.read(1)? != 0;
        let err_code = r.read(4)?;
        Ok((
            StreamDataHeader {
                node_id,
                packet_n,
                payload_present,
                err_code,
            },
            &bytes[4..],
        ))
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let mut w = BitWriter::new();
        w.write(self.packet_n, 3);
        w.write(self.payload_present as u32, 1);
        w.write(self.err_code, 4);
        let mut out = [0u8; 4];
        out[0] = self.node_id;
        out[1] = w.as_u16() as u8;
        out
    }
}

/// SRM_RUN_REQ payload: chassis-level flags, then the SRM command block.
pub struct SrmRunPayload {
    pub use_chassis_time: bool,
    pub use_chassis_coord: bool,
    pub cmd_send_time: u32,
    pub ignore_pps: bool,
    pub height: i16,
    pub lat: i32,
    pub lon: i32,
    pub adc_params: AdcConfig,
}

impl SrmRunPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 4 + 1 + 1 + 2 + 4 + 4 + 4);
        out.push(self.use_chassis_time as u8);
        out.push(self.use_chassis_coord as u8);
        out.extend_from_slice(&[0u8; 2]); // pad
        out.extend_from_slice(&self.cmd_send_time.to_le_bytes());
        out.push(self.ignore_pps as u8);
        out.push(0); // pad
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&self.lat.to_le_bytes());
        out.extend_from_slice(&self.lon.to_le_bytes());
        out.extend_from_slice(&self.adc_params.to_srm_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::{DataRate, GainCode};

    #[test]
    fn stream_start_round_trips() {
        let mut packets = [0u32; BITMASK_WORDS];
        bitmask_set(&mut packets, 0);
        bitmask_set(&mut packets, 5);
        bitmask_set(&mut packets, 40);
        let payload = StreamStartPayload {
            timestamp: 1_700_000_000,
            packets,
            adc_code: 0xABCD,
        };
        let bytes = payload.to_bytes();
        let back = StreamStartPayload::from_bytes(&bytes).unwrap();
        assert_eq!(back.timestamp, 1_700_000_000);
        assert_eq!(back.packets, packets);
        assert_eq!(back.adc_code, 0xABCD);
    }

    #[test]
    fn stream_data_header_round_trips() {
        let hdr = StreamDataHeader {
            node_id: 3,
            packet_n: 5,
            payload_present: true,
            err_code: 0,
        };
        let bytes = hdr.to_bytes();
        let (back, rest) = StreamDataHeader::from_bytes(&bytes).unwrap();
        assert_eq!(back.node_id, 3);
        assert_eq!(back.packet_n, 5);
        assert!(back.payload_present);
        assert!(rest.is_empty());
    }

    #[test]
    fn bitmask_set_and_read_agree() {
        let mut mask = [0u32; BITMASK_WORDS];
        bitmask_set(&mut mask, 0);
        bitmask_set(&mut mask, 1);
        bitmask_set(&mut mask, 3);
        bitmask_set(&mut mask, 4);
        bitmask_set(&mut mask, 5);
        for i in [0u32, 1, 3, 4, 5] {
            assert!(bitmask_read(&mask, i));
        }
        assert!(!bitmask_read(&mask, 2));
    }

    #[test]
    fn srm_run_payload_carries_adc_params() {
        let params = AdcConfig::new(DataRate::Dr2000, [true, false, true, false], [GainCode::Gain4; 4]);
        let payload = SrmRunPayload {
            use_chassis_time: true,
            use_chassis_coord: false,
            cmd_send_time: 0,
            ignore_pps: false,
            height: 0,
            lat: 0,
            lon: 0,
            adc_params: params,
        };
        let bytes = payload.to_bytes();
        let adc_off = bytes.len() - 4;
        assert_eq!(AdcConfig::from_srm_bytes(&bytes[adc_off..]).unwrap(), params);
    }
}
