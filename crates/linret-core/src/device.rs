//! A single chassis's live state: last known snapshots, outstanding
//! requests, and the health-digest statistics derived from them.

use std::time::{Duration, Instant};

use crate::adc::AdcConfig;
use crate::protocol::chassis::control::{
    ChaStatusResponse, ClockSetRequest, DiscoveryResponse, SrmStatusResponse, SrmTableResponse,
};
use crate::protocol::chassis::header::{ChassisHeader, NakCode};
use crate::protocol::chassis::stream::SrmRunPayload;
use crate::protocol::chassis::{codec, MsgType};
use crate::types::{CsDevType, FullAddr, IfType, NodeAddr, Serial};

/// Per-request timeouts, all taken from `Config::node_timeouts`.
#[derive(Debug, Clone, Copy)]
pub struct NodeTimeouts {
    pub node_total_lifetime: Duration,
    pub packet_wait_timeout: Duration,
    pub packet_lifetime: Duration,
}

impl Default for NodeTimeouts {
    fn default() -> Self {
        NodeTimeouts {
            node_total_lifetime: Duration::from_secs(10),
            packet_wait_timeout: Duration::from_millis(150),
            packet_lifetime: Duration::from_millis(750),
        }
    }
}

/// Outcome of a `ChassisDevice::check_timeouts` pass.
pub enum TimeoutOutcome {
    Ok,
    TimedOut,
}

/// A frame the caller (Coordinator) must push onto the ChassisLink outbound
/// bus, paired with the bookkeeping this device needs once it is sent.
pub struct OutboundChassisRequest {
    pub header: ChassisHeader,
    pub payload: Vec<u8>,
}

struct PendingRequest {
    if_type: IfType,
    dst_addr: NodeAddr,
    random_id: u8,
    send_time: Instant,
    /// Set only for clock-set requests: the wall-clock second and fractional
    /// phase we asked the chassis to adopt, needed to judge the reply.
    clock_set: Option<(u64, f64)>,
}

#[derive(Default)]
struct DeviceStats {
    rx: Vec<(Instant, u8)>,
    lats: Vec<(Instant, f64)>,
}

const STATS_WINDOW: Duration = Duration::from_secs(60);

impl DeviceStats {
    fn prune(&mut self, now: Instant) {
        self.rx.retain(|(t, _)| now.saturating_duration_since(*t) <= STATS_WINDOW);
        self.lats.retain(|(t, _)| now.saturating_duration_since(*t) <= STATS_WINDOW);
    }

    fn loss_rate(&self) -> f64 {
        if self.rx.is_empty() {
            return 0.0;
        }
        let lost = self.rx.iter().filter(|(_, v)| *v == 1).count();
        lost as f64 / self.rx.len() as f64
    }

    fn mean_latency_ms(&self) -> Option<f64> {
        if self.lats.is_empty() {
            return None;
        }
        Some(self.lats.iter().map(|(_, v)| v).sum::<f64>() / self.lats.len() as f64)
    }
}

pub struct ChassisDevice {
    pub if_type: IfType,
    pub addr: NodeAddr,
    pub full_addr: FullAddr,
    pub cs_dev_type: CsDevType,
    pub cha_serial: Serial,
    pub srm_serial: Option<Serial>,
    pub was_in_stopped_state: bool,
    pub appended_unix_time: Option<u64>,
    pub synced: bool,
    pub cha_state: ChaStatusResponse,
    cha_state_recv_time: Instant,
    pub srm_state: Option<SrmStatusResponse>,
    srm_state_recv_time: Option<Instant>,
    pub discovery_state: Option<DiscoveryResponse>,
    discovery_state_recv_time: Option<Instant>,
    pub srm_fat_state: Option<SrmTableResponse>,
    random_id: u8,
    pending_requests: Vec<PendingRequest>,
    stats: DeviceStats,
}

impl ChassisDevice {
    pub fn new(if_type: IfType, addr: NodeAddr, cha_serial: Serial, initial_state: ChaStatusResponse, now: Instant) -> Self {
        let cs_dev_type = if if_type == IfType::Local {
            CsDevType::ChaLr
        } else {
            CsDevType::ChaRn
        };
        ChassisDevice {
            if_type,
            addr,
            full_addr: FullAddr::new(if_type, addr),
            cs_dev_type,
            cha_serial,
            srm_serial: None,
            was_in_stopped_state: true,
            appended_unix_time: None,
            synced: false,
            cha_state: initial_state,
            cha_state_recv_time: now,
            srm_state: None,
            srm_state_recv_time: None,
            discovery_state: None,
            discovery_state_recv_time: None,
            srm_fat_state: None,
            random_id: 0,
            pending_requests: Vec::new(),
            stats: DeviceStats::default(),
        }
    }

    fn next_random_id(&mut self) -> u8 {
        let id = self.random_id;
        self.random_id = self.random_id.wrapping_add(1);
        id
    }

    fn enqueue(&mut self, now: Instant, header: ChassisHeader, payload: Vec<u8>, clock_set: Option<(u64, f64)>, out: &mut Vec<OutboundChassisRequest>) {
        self.pending_requests.push(PendingRequest {
            if_type: header.if_type,
            dst_addr: header.dst_addr,
            random_id: header.random_id,
            send_time: now,
            clock_set,
        });
        out.push(OutboundChassisRequest { header, payload });
    }

    fn simple(&mut self, now: Instant, msg_type: MsgType, out: &mut Vec<OutboundChassisRequest>) {
        let rand = self.next_random_id();
        let header = ChassisHeader::request(self.if_type, msg_type.code(), self.addr, rand);
        self.enqueue(now, header, Vec::new(), None, out);
    }

    /// Runs the per-device tick: ages out dead devices, drops stale
    /// pendings into loss stats, and issues the standard poll set.
    pub fn check_timeouts(&mut self, now: Instant, job_is_active: bool, timeouts: &NodeTimeouts) -> (TimeoutOutcome, Vec<OutboundChassisRequest>) {
        let mut out = Vec::new();

        if now.saturating_duration_since(self.cha_state_recv_time) > timeouts.node_total_lifetime {
            return (TimeoutOutcome::TimedOut, out);
        }

        let still_pending = |send_time: Instant| now.saturating_duration_since(send_time) < timeouts.packet_wait_timeout;
        let mut remaining = Vec::new();
        for req in self.pending_requests.drain(..) {
            if still_pending(req.send_time) {
                remaining.push(req);
            } else {
                self.stats.rx.push((now, 1));
            }
        }
        self.pending_requests = remaining;
        self.stats.prune(now);

        if self.pending_requests.len() > 10 {
            log::warn!("{:?}:{} too many pending requests", self.if_type, self.addr);
        }

        if now.saturating_duration_since(self.cha_state_recv_time) > timeouts.packet_lifetime {
            self.simple(now, MsgType::CntlStatReq, &mut out);
        }

        if !job_is_active {
            if self.srm_fat_state.is_none() && self.srm_state.is_some() {
                self.simple(now, MsgType::SrmFatReq, &mut out);
            }

            let srm_stale = self.srm_state.is_none()
                || self
                    .srm_state_recv_time
                    .map(|t| now.saturating_duration_since(t) > timeouts.packet_lifetime)
                    .unwrap_or(true);
            if srm_stale {
                self.simple(now, MsgType::SrmStatReq, &mut out);
            }

            if let Some(srm) = &self.srm_state {
                if !self.was_in_stopped_state {
                    if srm.acq_running {
                        self.simple(now, MsgType::SrmStopReq, &mut out);
                    } else {
                        self.was_in_stopped_state = true;
                    }
                }
            }

            let discovery_stale = self.discovery_state.is_none()
                || self
                    .discovery_state_recv_time
                    .map(|t| now.saturating_duration_since(t) > timeouts.packet_lifetime)
                    .unwrap_or(true);
            if discovery_stale {
                self.simple(now, MsgType::CntlNodesBcReq, &mut out);
            }
        }

        (TimeoutOutcome::Ok, out)
    }

    pub fn is_active_dev(&self, active_adc_config: &AdcConfig) -> bool {
        match (&self.srm_state, &self.srm_serial) {
            (Some(srm), Some(_)) => srm.acq_running && srm.adc_sync_ok && srm.adc_params == *active_adc_config,
            _ => false,
        }
    }

    pub fn run_if_necessary(&mut self, now: Instant, true_time: f64, active_adc_config: &AdcConfig, out: &mut Vec<OutboundChassisRequest>) {
        let Some(srm) = &self.srm_state else { return };
        if self.srm_serial.is_none() || !srm.pps_present || self.appended_unix_time.is_none() {
            return;
        }
        if !self.cha_state.chassis_time_valid || !self.cha_state.sync_ok {
            return;
        }
        if srm.acq_running {
            return;
        }
        log::info!("{:?}:{} SRM run at {true_time}", self.if_type, self.addr);
        let payload = SrmRunPayload {
            use_chassis_time: true,
            use_chassis_coord: false,
            cmd_send_time: true_time as u32,
            ignore_pps: false,
            height: 0,
            lat: 0,
            lon: 0,
            adc_params: *active_adc_config,
        }
        .to_bytes();
        let rand = self.next_random_id();
        let header = ChassisHeader::request(self.if_type, MsgType::SrmRunReq.code(), self.addr, rand);
        self.enqueue(now, header, payload, None, out);
    }

    pub fn stop_if_necessary(&mut self, now: Instant, true_time: f64, out: &mut Vec<OutboundChassisRequest>) {
        let Some(srm) = &self.srm_state else { return };
        if !srm.acq_running {
            return;
        }
        log::info!("{:?}:{} SRM stop at {true_time}", self.if_type, self.addr);
        self.simple(now, MsgType::SrmStopReq, out);
    }

    pub fn sync_if_necessary(&mut self, now: Instant, true_unix_time: f64, out: &mut Vec<OutboundChassisRequest>) {
        if self.appended_unix_time.is_some() {
            return;
        }
        if !self.cha_state.inpt_pps_valid {
            return;
        }
        let second = true_unix_time as u64;
        let phase = true_unix_time.fract();
        let payload = ClockSetRequest { second: second as u32 }.to_bytes().to_vec();
        let rand = self.next_random_id();
        let header = ChassisHeader::request(self.if_type, MsgType::CntlClkSetReq.code(), self.addr, rand);
        self.enqueue(now, header, payload, Some((second, phase)), out);
    }

    /// Matches `response` against `pending_requests` by `(if_type, addr,
    /// random_id)`, applying it if and only if a match was found.
    pub fn apply_response(&mut self, now: Instant, src_if_type: IfType, src_addr: NodeAddr, random_id: u8, frame: codec::ChassisFrame, nak: NakCode) -> bool {
        let idx = self
            .pending_requests
            .iter()
            .position(|r| r.if_type == src_if_type && r.dst_addr == src_addr && r.random_id == random_id);
        let Some(idx) = idx else { return false };
        let req = self.pending_requests.remove(idx);
        self.stats.rx.push((now, 0));
        self.stats.lats.push((now, now.saturating_duration_since(req.send_time).as_secs_f64() * 1000.0));

        if nak.is_error() {
            log::warn!("{:?}:{} NAK {:?}", self.if_type, self.addr, nak);
            return true;
        }

        match frame {
            codec::ChassisFrame::ChaStatus(resp) => {
                self.cha_state = resp;
                self.cha_state_recv_time = now;
            }
            codec::ChassisFrame::SrmStatus(resp) => {
                self.srm_state = Some(resp);
                self.srm_state_recv_time = Some(now);
            }
            codec::ChassisFrame::Discovery(resp) => {
                self.discovery_state = Some(resp);
                self.discovery_state_recv_time = Some(now);
            }
            codec::ChassisFrame::SrmTable(resp) => {
                self.srm_serial = Some(resp.serial);
                self.srm_fat_state = Some(resp);
            }
            codec::ChassisFrame::ClockSet(resp) => {
                if let (Some(phase_ns), Some((second, req_phase))) = (resp.phase_ns, req.clock_set) {
                    let req_phase_ms = (req_phase * 1000.0) as i64;
                    let resp_phase_ms = (phase_ns / 1_000_000) as i64;
                    let diff = (req_phase_ms - resp_phase_ms).abs();
                    if diff < 100 {
                        self.synced = true;
                        self.appended_unix_time = Some(second);
                    } else {
                        self.synced = false;
                        self.appended_unix_time = None;
                    }
                }
            }
            codec::ChassisFrame::SrmRunAck | codec::ChassisFrame::SrmStopAck => {}
            _ => {}
        }
        true
    }

    /// Health digest consumed by the (out-of-scope) monitoring façade:
    /// battery color coding, GPS fix color coding, and loss/latency over the
    /// retained 60 s window.
    pub fn health_digest(&self, now: Instant) -> DeviceHealth {
        let mut stats_copy = DeviceStats {
            rx: self.stats.rx.clone(),
            lats: self.stats.lats.clone(),
        };
        stats_copy.prune(now);
        DeviceHealth {
            full_addr: self.full_addr,
            batt_color: batt_color(self.cha_state.batt_vin[0]),
            gps_color: gps_color(self.cha_state.gps.num_sv),
            synced: self.synced,
            loss_rate: stats_copy.loss_rate(),
            mean_latency_ms: stats_copy.mean_latency_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthColor {
    Green,
    Yellow,
    Red,
}

fn batt_color(volts: f32) -> HealthColor {
    if volts > 15.0 {
        HealthColor::Green
    } else if volts > 14.0 {
        HealthColor::Yellow
    } else {
        HealthColor::Red
    }
}

fn gps_color(num_sv: u32) -> HealthColor {
    if num_sv >= 4 {
        HealthColor::Green
    } else if num_sv >= 3 {
        HealthColor::Yellow
    } else {
        HealthColor::Red
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceHealth {
    pub full_addr: FullAddr,
    pub batt_color: HealthColor,
    pub gps_color: HealthColor,
    pub synced: bool,
    pub loss_rate: f64,
    pub mean_latency_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chassis::control::GpsFix;

    fn sample_state() -> ChaStatusResponse {
        ChaStatusResponse {
            batt_vin: [14.5, 14.0],
            gps: GpsFix { fix: [1, 0, 0, 0], num_sv: 5 },
            inpt_pps_valid: true,
            sync_src_gps: true,
            wifi_link0_ok: true,
            wifi_link1_ok: false,
            ethernet_ok: true,
            mode_lr: false,
            mode_seabed: false,
            chassis_time_valid: true,
            sync_ok: true,
            peer_mac: [0; 6],
            serial: Serial([1; 8]),
            comment: String::new(),
        }
    }

    #[test]
    fn request_response_matches_by_random_id_not_order() {
        let now = Instant::now();
        let mut dev = ChassisDevice::new(IfType::Local, 1, Serial([1; 8]), sample_state(), now);
        let mut out = Vec::new();
        dev.simple(now, MsgType::CntlStatReq, &mut out); // random_id 0
        dev.simple(now, MsgType::CntlStatReq, &mut out); // random_id 1
        assert_eq!(dev.pending_requests.len(), 2);

        let applied = dev.apply_response(
            now,
            IfType::Local,
            1,
            1,
            codec::ChassisFrame::ChaStatus(sample_state()),
            NakCode::NoError,
        );
        assert!(applied);
        assert_eq!(dev.pending_requests.len(), 1);
        assert_eq!(dev.pending_requests[0].random_id, 0);
    }

    #[test]
    fn stale_cha_state_is_timed_out() {
        let now = Instant::now();
        let old = now - Duration::from_secs(20);
        let mut dev = ChassisDevice::new(IfType::Local, 1, Serial([1; 8]), sample_state(), old);
        let (outcome, _) = dev.check_timeouts(now, false, &NodeTimeouts::default());
        assert!(matches!(outcome, TimeoutOutcome::TimedOut));
    }

    #[test]
    fn clock_sync_within_100ms_marks_synced() {
        let now = Instant::now();
        let mut dev = ChassisDevice::new(IfType::Local, 1, Serial([1; 8]), sample_state(), now);
        let mut out = Vec::new();
        dev.sync_if_necessary(now, 1_700_000_000.321, &mut out);
        assert_eq!(out.len(), 1);

        let applied = dev.apply_response(
            now,
            IfType::Local,
            1,
            0,
            codec::ChassisFrame::ClockSet(crate::protocol::chassis::control::ClockSetResponse {
                phase_ns: Some(320_000_000),
            }),
            NakCode::NoError,
        );
        assert!(applied);
        assert!(dev.synced);
        assert_eq!(dev.appended_unix_time, Some(1_700_000_000));
    }

    #[test]
    fn clock_sync_beyond_100ms_stays_unsynced() {
        let now = Instant::now();
        let mut dev = ChassisDevice::new(IfType::Local, 1, Serial([1; 8]), sample_state(), now);
        let mut out = Vec::new();
        dev.sync_if_necessary(now, 1_700_000_000.321, &mut out);

        dev.apply_response(
            now,
            IfType::Local,
            1,
            0,
            codec::ChassisFrame::ClockSet(crate::protocol::chassis::control::ClockSetResponse {
                phase_ns: Some(100_000_000),
            }),
            NakCode::NoError,
        );
        assert!(!dev.synced);
        assert_eq!(dev.appended_unix_time, None);
    }
}
