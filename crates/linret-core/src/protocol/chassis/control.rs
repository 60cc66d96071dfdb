//! Control-plane payloads: handshake, status, discovery, clock-sync, and
//! recorder-table exchanges. Layouts follow the original struct field order;
//! sizes are fixed so a short read is always detected.

use crate::adc::AdcConfig;
use crate::error::LinretError;
use crate::types::Serial;

use super::header::{ChassisHeader, NakCode};
use super::MsgType;

/// A request carrying nothing beyond the header (handshake, status poll,
/// discovery poll, recorder stop/table/stat poll, reboot).
pub fn simple_request(if_type: crate::types::IfType, msg_type: MsgType, dst: u8, rand: u8) -> ChassisHeader {
    ChassisHeader::request(if_type, msg_type.code(), dst, rand)
}

/// `cha_state`: last chassis status snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaStatusResponse {
    pub batt_vin: [f32; 2],
    pub gps: GpsFix,
    pub inpt_pps_valid: bool,
    pub sync_src_gps: bool,
    pub wifi_link0_ok: bool,
    pub wifi_link1_ok: bool,
    pub ethernet_ok: bool,
    pub mode_lr: bool,
    pub mode_seabed: bool,
    /// `chasis_time_valid`: the chassis has a usable appended-unix-time.
    pub chassis_time_valid: bool,
    /// `state_time_sync_ok`: the chassis's own clock-sync state machine
    /// considers itself synced (distinct from our own `synced` bookkeeping).
    pub sync_ok: bool,
    pub peer_mac: [u8; 6],
    pub serial: Serial,
    pub comment: String,
}

impl ChaStatusResponse {
    /// `<2f 6B 6s 8s 64s>`: two floats, a 6-byte flag/gps packet, 6-byte MAC,
    /// 8-byte serial, a 64-byte comment.
    pub const PAYLOAD_SZ: usize = 8 + 1 + 3 + 4 + 4 + 6 + 8 + 64;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::PAYLOAD_SZ);
        out.extend_from_slice(&self.batt_vin[0].to_le_bytes());
        out.extend_from_slice(&self.batt_vin[1].to_le_bytes());
        let mut flags = 0u8;
        if self.inpt_pps_valid {
            flags |= 1;
        }
        if self.sync_src_gps {
            flags |= 1 << 1;
        }
        if self.wifi_link0_ok {
            flags |= 1 << 2;
        }
        if self.wifi_link1_ok {
            flags |= 1 << 3;
        }
        if self.ethernet_ok {
            flags |= 1 << 4;
        }
        if self.mode_lr {
            flags |= 1 << 5;
        }
        if self.mode_seabed {
            flags |= 1 << 6;
        }
        if self.chassis_time_valid {
            flags |= 1 << 7;
        }
        out.push(flags);
        out.push(self.sync_ok as u8);
        out.extend_from_slice(&[0u8; 2]); // pad
        out.extend_from_slice(&self.gps.fix);
        out.extend_from_slice(&self.gps.num_sv.to_le_bytes());
        out.extend_from_slice(&self.peer_mac);
        out.extend_from_slice(self.serial.as_bytes());
        let mut comment = self.comment.clone().into_bytes();
        comment.resize(64, 0);
        out.extend_from_slice(&comment);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinretError> {
        if bytes.len() < Self::PAYLOAD_SZ {
            return Err(LinretError::BufferTooShort);
        }
        let batt_vin = [
            f32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            f32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        ];
        let flags = bytes[8];
        let sync_ok = bytes[9] != 0;
        let fix: [u8; 4] = bytes[12..16].try_into().unwrap();
        let num_sv = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
        let peer_mac: [u8; 6] = bytes[20..26].try_into().unwrap();
        let serial = Serial(bytes[26..34].try_into().unwrap());
        let comment_bytes = &bytes[34..98];
        let comment = String::from_utf8_lossy(comment_bytes)
            .trim_end_matches('\0')
            .to_string();
        Ok(ChaStatusResponse {
            batt_vin,
            gps: GpsFix { fix, num_sv },
            inpt_pps_valid: flags & 1 != 0,
            sync_src_gps: flags & (1 << 1) != 0,
            wifi_link0_ok: flags & (1 << 2) != 0,
            wifi_link1_ok: flags & (1 << 3) != 0,
            ethernet_ok: flags & (1 << 4) != 0,
            mode_lr: flags & (1 << 5) != 0,
            mode_seabed: flags & (1 << 6) != 0,
            chassis_time_valid: flags & (1 << 7) != 0,
            sync_ok,
            peer_mac,
            serial,
            comment,
        })
    }
}

/// Simplified GPS fix summary (`CHA_GPS_STRUCT`): quality code plus satellite
/// count, enough to drive the health-digest color coding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub fix: [u8; 4],
    pub num_sv: u32,
}

/// `srm_state`: last recorder status snapshot, or absent.
#[derive(Debug, Clone, PartialEq)]
pub struct SrmStatusResponse {
    pub acq_running: bool,
    pub adc_sync_ok: bool,
    pub pps_present: bool,
    pub sd_ok: bool,
    pub sd_record_running: bool,
    pub temperature: i8,
    pub humidity: u8,
    pub adc_params: AdcConfig,
}

impl SrmStatusResponse {
    pub const PAYLOAD_SZ: usize = 1 + 1 + 1 + 4;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.acq_running {
            flags |= 1;
        }
        if self.adc_sync_ok {
            flags |= 1 << 1;
        }
        if self.pps_present {
            flags |= 1 << 2;
        }
        if self.sd_ok {
            flags |= 1 << 3;
        }
        if self.sd_record_running {
            flags |= 1 << 4;
        }
        let mut out = vec![flags, self.temperature as u8, self.humidity];
        out.extend_from_slice(&self.adc_params.to_srm_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinretError> {
        if bytes.len() < Self::PAYLOAD_SZ {
            return Err(LinretError::BufferTooShort);
        }
        let flags = bytes[0];
        let adc_params = AdcConfig::from_srm_bytes(&bytes[3..7])?;
        Ok(SrmStatusResponse {
            acq_running: flags & 1 != 0,
            adc_sync_ok: flags & (1 << 1) != 0,
            pps_present: flags & (1 << 2) != 0,
            sd_ok: flags & (1 << 3) != 0,
            sd_record_running: flags & (1 << 4) != 0,
            temperature: bytes[1] as i8,
            humidity: bytes[2],
            adc_params,
        })
    }
}

/// `discovery_state`: a fixed-size slot table of neighboring peers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiscoverySlot {
    pub peer_mac: [u8; 6],
    pub rssi: i8,
    pub gps: Option<(i32, i32)>,
}

pub const DISCOVERY_SLOTS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResponse {
    pub slots: [Option<DiscoverySlot>; DISCOVERY_SLOTS],
}

impl DiscoveryResponse {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinretError> {
        const SLOT_SZ: usize = 6 + 1 + 1 + 8; // mac, rssi, present flag, lat/lon i32 pair
        if bytes.len() < SLOT_SZ * DISCOVERY_SLOTS {
            return Err(LinretError::BufferTooShort);
        }
        let mut slots = [None; DISCOVERY_SLOTS];
        for (i, slot) in slots.iter_mut().enumerate() {
            let base = i * SLOT_SZ;
            let present = bytes[base + 7] != 0;
            if !present {
                continue;
            }
            let peer_mac: [u8; 6] = bytes[base..base + 6].try_into().unwrap();
            let rssi = bytes[base + 6] as i8;
            let lat = i32::from_le_bytes(bytes[base + 8..base + 12].try_into().unwrap());
            let lon = i32::from_le_bytes(bytes[base + 12..base + 16].try_into().unwrap());
            *slot = Some(DiscoverySlot {
                peer_mac,
                rssi,
                gps: Some((lat, lon)),
            });
        }
        Ok(DiscoveryResponse { slots })
    }
}

/// `srm_fat_state`: recorder serial discovered via the two-chunk table
/// exchange (see `ChassisLink` reassembly).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SrmTableResponse {
    pub serial: Serial,
}

impl SrmTableResponse {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LinretError> {
        if bytes.len() < 8 {
            return Err(LinretError::BufferTooShort);
        }
        Ok(SrmTableResponse {
            serial: Serial(bytes[0..8].try_into().unwrap()),
        })
    }
}

pub struct ClockSetRequest {
    pub second: u32,
}

impl ClockSetRequest {
    pub fn to_bytes(&self) -> [u8; 4] {
        self.second.to_le_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSetResponse {
    /// Phase offset in nanoseconds, absent when the chassis NAKed the set.
    pub phase_ns: Option<u32>,
}

impl ClockSetResponse {
    pub fn from_bytes(bytes: &[u8], nak: NakCode) -> Self {
        if nak.is_error() || bytes.len() < 4 {
            return ClockSetResponse { phase_ns: None };
        }
        ClockSetResponse {
            phase_ns: Some(u32::from_le_bytes(bytes[0..4].try_into().unwrap())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::{DataRate, GainCode};

    #[test]
    fn cha_status_round_trips() {
        let resp = ChaStatusResponse {
            batt_vin: [14.2, 13.9],
            gps: GpsFix { fix: [1, 0, 0, 0], num_sv: 7 },
            inpt_pps_valid: true,
            sync_src_gps: true,
            wifi_link0_ok: false,
            wifi_link1_ok: true,
            ethernet_ok: true,
            mode_lr: true,
            mode_seabed: false,
            chassis_time_valid: true,
            sync_ok: true,
            peer_mac: [0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x03],
            serial: Serial([1, 2, 3, 4, 5, 6, 7, 8]),
            comment: "test unit".to_string(),
        };
        let bytes = resp.to_bytes();
        assert_eq!(ChaStatusResponse::from_bytes(&bytes).unwrap(), resp);
    }

    #[test]
    fn srm_status_round_trips() {
        let resp = SrmStatusResponse {
            acq_running: true,
            adc_sync_ok: true,
            pps_present: true,
            sd_ok: false,
            sd_record_running: false,
            temperature: 22,
            humidity: 45,
            adc_params: AdcConfig::new(
                DataRate::Dr500,
                [true; 4],
                [GainCode::Gain1; 4],
            ),
        };
        let bytes = resp.to_bytes();
        assert_eq!(SrmStatusResponse::from_bytes(&bytes).unwrap(), resp);
    }

    #[test]
    fn clock_set_response_absent_on_nak() {
        let resp = ClockSetResponse::from_bytes(&[1, 0, 0, 0], NakCode::TryAgain);
        assert_eq!(resp.phase_ns, None);
    }
}
