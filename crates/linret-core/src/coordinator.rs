//! Coordinator: the single-threaded event loop owning the device registry.
//!
//! Discovery, per-device polling, request/response correlation, clock sync,
//! acquisition control, job scheduling, and CS request translation all run
//! from `Coordinator::tick`, called once per inbound-queue wakeup.

use std::time::{Duration, Instant};

use crate::adc::AdcConfig;
use crate::config::Config;
use crate::device::{NodeTimeouts, OutboundChassisRequest};
use crate::protocol::chassis::control::ChaStatusResponse;
use crate::protocol::chassis::header::ChassisHeader;
use crate::protocol::chassis::{codec, MsgType};
use crate::protocol::cs::header::{CsHeader, PacketType};
use crate::protocol::cs::request::{AcqState, CsRequest};
use crate::protocol::cs::response::{ack_nak_response, AckCode, ChaStatusSummary, NodeIdListResponse};
use crate::protocol::cs::SerialMinter;
use crate::registry::DeviceRegistry;
use crate::stream::{Job, JobNotification};
use crate::types::{CsDevType, FullAddr, IfType, NodeAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqMode {
    Idle,
    Run,
    Stop,
}

/// Counters the (out-of-scope) monitoring façade would read, emitted at
/// least once a second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreStats {
    pub queue_full_drops: u64,
    pub invalid_packets_dropped: u64,
    pub rx_packets_dropped: u64,
    pub cs_rx_packet_errors: u64,
    pub n_devices: usize,
}

struct ProbePending {
    if_type: IfType,
    addr: NodeAddr,
    random_id: u8,
    send_time: Instant,
}

const PROBE_TIMEOUT: Duration = Duration::from_millis(150);

pub struct Coordinator {
    pub registry: DeviceRegistry,
    serial_minter: SerialMinter,
    config: Config,
    pub adc_config: AdcConfig,
    pub acq_mode: AcqMode,
    probe_pending: Vec<ProbePending>,
    probe_random_id: u8,
    last_discover: Option<Instant>,
    last_acq_second: Option<u64>,
    last_scheduled_second: Option<u32>,
    stats: CoreStats,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        let serial_minter = SerialMinter::new(config.lr_number);
        let adc_config = config.latest_adc_config().unwrap_or_else(|| {
            AdcConfig::new(crate::adc::DataRate::Dr500, [true; 4], [crate::adc::GainCode::Gain1; 4])
        });
        Coordinator {
            registry: DeviceRegistry::new(),
            serial_minter,
            config,
            adc_config,
            acq_mode: AcqMode::Idle,
            probe_pending: Vec::new(),
            probe_random_id: 0,
            last_discover: None,
            last_acq_second: None,
            last_scheduled_second: None,
            stats: CoreStats::default(),
        }
    }

    pub fn stats(&self) -> CoreStats {
        CoreStats {
            n_devices: self.registry.len(),
            ..self.stats
        }
    }

    fn next_probe_random_id(&mut self) -> u8 {
        let id = self.probe_random_id;
        self.probe_random_id = self.probe_random_id.wrapping_add(1);
        id
    }

    fn probe(&mut self, if_type: IfType, addr: NodeAddr, now: Instant) -> OutboundChassisRequest {
        let rand = self.next_probe_random_id();
        self.probe_pending.push(ProbePending { if_type, addr, random_id: rand, send_time: now });
        let header = ChassisHeader::request(if_type, MsgType::CntlStatReq.code(), addr, rand);
        OutboundChassisRequest { header, payload: Vec::new() }
    }

    /// Drops probes that never got an answer within `packet_wait_timeout`.
    fn sweep_probes(&mut self, now: Instant) {
        let timeout = Duration::from_secs_f64(self.config.node_timeouts.packet_wait_timeout);
        self.probe_pending.retain(|p| now.saturating_duration_since(p.send_time) < timeout);
    }

    /// While no job is active, probes the first missing address on each
    /// configured interface.
    pub fn discover(&mut self, now: Instant, job_active: bool) -> Vec<OutboundChassisRequest> {
        if job_active {
            return Vec::new();
        }
        let period = Duration::from_secs_f64(self.config.nodes_discover_period);
        if self.last_discover.map(|t| now.saturating_duration_since(t) < period).unwrap_or(false) {
            return Vec::new();
        }
        self.last_discover = Some(now);
        self.sweep_probes(now);

        let mut out = Vec::new();
        for if_type in IfType::ALL {
            let max_addr = self.config.max_addr(if_type);
            if max_addr == 0 {
                continue;
            }
            let present = self.registry.present_addrs(if_type);
            if let Some(addr) = (1..=max_addr).find(|a| !present.contains(a)) {
                out.push(self.probe(if_type, addr, now));
            }
        }
        out
    }

    /// Runs each device's `check_timeouts`, dropping the stale ones.
    pub fn sweep_device_timeouts(&mut self, now: Instant, job_active: bool) -> Vec<OutboundChassisRequest> {
        let timeouts = NodeTimeouts {
            node_total_lifetime: Duration::from_secs_f64(self.config.node_timeouts.node_total_lifetime),
            packet_wait_timeout: Duration::from_secs_f64(self.config.node_timeouts.packet_wait_timeout),
            packet_lifetime: Duration::from_secs_f64(self.config.node_timeouts.packet_lifetime),
        };
        self.registry.sweep_timeouts(now, job_active, &timeouts)
    }

    pub fn sync_devices(&mut self, now: Instant, true_unix_time: f64) -> Vec<OutboundChassisRequest> {
        let mut out = Vec::new();
        for (_, dev) in self.registry.iter_mut() {
            dev.sync_if_necessary(now, true_unix_time, &mut out);
        }
        out
    }

    /// Only acts when the true-time fractional second is in `[0.4, 0.6]`,
    /// at most once per second.
    pub fn acquisition_control(&mut self, now: Instant, true_unix_time: f64) -> Vec<OutboundChassisRequest> {
        if self.acq_mode == AcqMode::Idle {
            return Vec::new();
        }
        let frac = true_unix_time.fract();
        if !(0.4..=0.6).contains(&frac) {
            return Vec::new();
        }
        let second = true_unix_time as u64;
        if self.last_acq_second == Some(second) {
            return Vec::new();
        }
        self.last_acq_second = Some(second);

        let mut out = Vec::new();
        let adc_config = self.adc_config;
        for (_, dev) in self.registry.iter_mut() {
            match self.acq_mode {
                AcqMode::Run => dev.run_if_necessary(now, true_unix_time, &adc_config, &mut out),
                AcqMode::Stop => dev.stop_if_necessary(now, true_unix_time, &mut out),
                AcqMode::Idle => unreachable!(),
            }
        }
        out
    }

    /// Every whole second advance, groups currently-active devices by
    /// interface and constructs a job. Still computed (for the sweep's
    /// bookkeeping) even when `auto_request_data` is disabled, but only
    /// returned when it is, matching the reference's "planned but not
    /// dispatched" behavior.
    pub fn schedule_job(&mut self, now: Instant, true_unix_time: f64) -> Option<Job> {
        let second = true_unix_time.floor() as u32;
        if self.last_scheduled_second == Some(second) {
            return None;
        }
        self.last_scheduled_second = Some(second);

        let mut by_iface: std::collections::BTreeMap<IfType, Vec<(NodeAddr, crate::types::Serial)>> = std::collections::BTreeMap::new();
        for (_, dev) in self.registry.iter() {
            if dev.is_active_dev(&self.adc_config) {
                if let Some(srm_serial) = dev.srm_serial {
                    by_iface.entry(dev.if_type).or_default().push((dev.addr, srm_serial));
                }
            }
        }
        if by_iface.is_empty() {
            return None;
        }
        let job = Job::new(second, self.adc_config, by_iface.into_iter().collect(), now);
        if !self.config.auto_request_data {
            log::info!("job at {second} planned but not dispatched (auto_request_data=false)");
            return None;
        }
        Some(job)
    }

    pub fn on_job_notification(&mut self, notif: JobNotification) {
        match notif {
            JobNotification::Active(ts) => log::debug!("stream job {ts} active"),
            JobNotification::Finished(ts) => log::debug!("stream job {ts} finished"),
        }
    }

    /// Processes one inbound chassis `(header, payload)`, correlating it
    /// against either a registered device's pending requests or an
    /// in-flight discovery probe.
    pub fn handle_chassis_frame(&mut self, now: Instant, header: ChassisHeader, payload: &[u8]) -> Vec<OutboundChassisRequest> {
        let frame = match codec::decode(header.clone(), payload) {
            Ok(f) => f,
            Err(_) => {
                self.stats.invalid_packets_dropped += 1;
                return Vec::new();
            }
        };

        let full_addr = FullAddr::new(header.if_type, header.src_addr);
        if let Some(dev) = self.registry.get_mut(full_addr) {
            let applied = dev.apply_response(now, header.if_type, header.src_addr, header.random_id, frame, header.nak_code);
            if !applied {
                self.stats.rx_packets_dropped += 1;
            }
            return Vec::new();
        }

        let Some(idx) = self
            .probe_pending
            .iter()
            .position(|p| p.if_type == header.if_type && p.addr == header.src_addr && p.random_id == header.random_id)
        else {
            self.stats.rx_packets_dropped += 1;
            return Vec::new();
        };
        self.probe_pending.remove(idx);

        if header.nak_code.is_error() {
            return Vec::new();
        }
        let codec::ChassisFrame::ChaStatus(state) = frame else {
            return Vec::new();
        };
        self.register_discovered(header.if_type, header.src_addr, state, now)
    }

    fn register_discovered(&mut self, if_type: IfType, addr: NodeAddr, state: ChaStatusResponse, now: Instant) -> Vec<OutboundChassisRequest> {
        let dev_type = if if_type == IfType::Local { CsDevType::ChaLr } else { CsDevType::ChaRn };
        let serial = self.serial_minter.mint(dev_type, if_type, addr);
        self.registry.create(if_type, addr, serial, state, now);
        log::info!("{if_type:?}:{addr} discovered, serial={}", serial.hex());

        let max_addr = self.config.max_addr(if_type);
        let next_addr = addr + 1;
        if next_addr <= max_addr && !self.registry.contains(if_type, next_addr) {
            vec![self.probe(if_type, next_addr, now)]
        } else {
            Vec::new()
        }
    }

    /// Translates one upstream CS request into a response `(header,
    /// payload)`. Every request either gets a specific response or an
    /// ACK/NAK.
    pub fn handle_cs_request(&mut self, header: &CsHeader, req: CsRequest, now: Instant, true_unix_time: Option<f64>) -> (CsHeader, Vec<u8>) {
        match req {
            CsRequest::NodeIdList { dev_type } => {
                let devs = self.registry.known_serials(dev_type);
                let resp_hdr = header.response_header(PacketType::NodeIdListResponse, None);
                (resp_hdr, NodeIdListResponse { devs }.to_bytes())
            }
            CsRequest::LrState => {
                let resp_hdr = header.response_header(PacketType::LrStateResponse, None);
                (resp_hdr, self.serial_minter.mint_lr().as_bytes().to_vec())
            }
            CsRequest::SrmState | CsRequest::ChaState | CsRequest::ChaLrState => {
                self.respond_device_state(header, req)
            }
            CsRequest::SetConfig(cfg) => {
                self.adc_config = cfg;
                self.config.set_latest_adc_config(cfg);
                ack_nak_response(header, AckCode::Ack, None)
            }
            CsRequest::AcqControl { run } => {
                self.acq_mode = match run {
                    AcqState::Running => AcqMode::Run,
                    AcqState::Idle => AcqMode::Stop,
                };
                // Force an immediate re-evaluation on the next tick rather
                // than waiting for the once-per-second throttle to roll over.
                self.last_acq_second = None;
                let _ = (now, true_unix_time);
                ack_nak_response(header, AckCode::Ack, None)
            }
        }
    }

    fn respond_device_state(&mut self, header: &CsHeader, req: CsRequest) -> (CsHeader, Vec<u8>) {
        let dst = header.dst_serial;
        let Some(dev) = self.registry.find_by_cha_serial(dst) else {
            self.stats.cs_rx_packet_errors += 1;
            let resp_type = PacketType::AckNakResponse;
            let resp_hdr = header.response_header(resp_type, None);
            return (resp_hdr, vec![AckCode::Nak as u8]);
        };
        let resp_type = match req {
            CsRequest::SrmState => PacketType::SrmStateResponse,
            CsRequest::ChaState => PacketType::ChaStateResponse,
            CsRequest::ChaLrState => PacketType::ChaLrStateResponse,
            _ => unreachable!(),
        };
        let summary = ChaStatusSummary {
            acq_running: dev.srm_state.as_ref().map(|s| s.acq_running).unwrap_or(false),
            temperature: dev.srm_state.as_ref().map(|s| s.temperature).unwrap_or(0),
            humidity: dev.srm_state.as_ref().map(|s| s.humidity).unwrap_or(0),
            pps_present: dev.srm_state.as_ref().map(|s| s.pps_present).unwrap_or(false),
            adc_config: dev.srm_state.as_ref().map(|s| s.adc_params).unwrap_or(self.adc_config),
        };
        let resp_hdr = header.response_header(resp_type, None);
        (resp_hdr, summary.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::{DataRate, GainCode};
    use crate::protocol::chassis::control::{GpsFix, SrmStatusResponse};
    use crate::protocol::chassis::header::NakCode;
    use crate::types::Serial;

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

    fn coordinator_with_max_local(n: u8) -> Coordinator {
        let mut config = Config::default();
        config.max_nodes_per_interface.insert(IfType::Local.name().to_string(), n);
        Coordinator::new(config)
    }

    #[test]
    fn discovery_probes_first_missing_address_and_follows_up() {
        let mut coord = coordinator_with_max_local(2);
        let now = Instant::now();
        let out = coord.discover(now, false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].header.dst_addr, 1);

        let ack_header = ChassisHeader {
            if_type: IfType::Local,
            chunk_n: 0,
            chunk_sz: ChaStatusResponse::PAYLOAD_SZ as u16,
            random_id: out[0].header.random_id,
            src_addr: 1,
            dst_addr: 0,
            msg_type: MsgType::CntlStatAck.code(),
            nak_code: NakCode::NoError,
        };
        let payload = sample_state().to_bytes();
        let followups = coord.handle_chassis_frame(now, ack_header, &payload);
        assert_eq!(coord.registry.len(), 1);
        assert_eq!(followups.len(), 1);
        assert_eq!(followups[0].header.dst_addr, 2);
    }

    #[test]
    fn request_response_matches_by_id_third_unmatched_is_dropped() {
        let mut coord = coordinator_with_max_local(1);
        let now = Instant::now();

        // Register the device first via a successful probe.
        let discover = coord.discover(now, false);
        let ack_header = ChassisHeader {
            if_type: IfType::Local,
            chunk_n: 0,
            chunk_sz: ChaStatusResponse::PAYLOAD_SZ as u16,
            random_id: discover[0].header.random_id,
            src_addr: 1,
            dst_addr: 0,
            msg_type: MsgType::CntlStatAck.code(),
            nak_code: NakCode::NoError,
        };
        coord.handle_chassis_frame(now, ack_header, &sample_state().to_bytes());

        // A freshly registered device has neither srm_state nor
        // discovery_state yet, so one timeout sweep queues exactly two
        // requests: SRM_STAT_REQ and CNTL_NODES_BC_REQ, each with its own
        // random id.
        let reqs = coord.sweep_device_timeouts(now, false);
        assert_eq!(reqs.len(), 2);
        let srm_id = reqs.iter().find(|r| r.header.msg_type == MsgType::SrmStatReq.code()).unwrap().header.random_id;
        let disc_id = reqs.iter().find(|r| r.header.msg_type == MsgType::CntlNodesBcReq.code()).unwrap().header.random_id;
        assert_ne!(srm_id, disc_id);

        let srm_payload = SrmStatusResponse {
            acq_running: false,
            adc_sync_ok: true,
            pps_present: true,
            sd_ok: true,
            sd_record_running: false,
            temperature: 20,
            humidity: 40,
            adc_params: AdcConfig::new(DataRate::Dr500, [true; 4], [GainCode::Gain1; 4]),
        }
        .to_bytes();
        let srm_header = ChassisHeader {
            if_type: IfType::Local,
            chunk_n: 0,
            chunk_sz: srm_payload.len() as u16,
            random_id: srm_id,
            src_addr: 1,
            dst_addr: 0,
            msg_type: MsgType::SrmStatAck.code(),
            nak_code: NakCode::NoError,
        };
        coord.handle_chassis_frame(now, srm_header, &srm_payload);

        let disc_payload = vec![0u8; 16 * 8];
        let disc_header = ChassisHeader {
            if_type: IfType::Local,
            chunk_n: 0,
            chunk_sz: disc_payload.len() as u16,
            random_id: disc_id,
            src_addr: 1,
            dst_addr: 0,
            msg_type: MsgType::CntlNodesBcAck.code(),
            nak_code: NakCode::NoError,
        };
        coord.handle_chassis_frame(now, disc_header, &disc_payload);

        // Both pending ids matched: nothing dropped yet.
        assert_eq!(coord.stats().rx_packets_dropped, 0);

        // A third response carrying an id neither request used.
        let unmatched_header = ChassisHeader {
            if_type: IfType::Local,
            chunk_n: 0,
            chunk_sz: srm_payload.len() as u16,
            random_id: 9,
            src_addr: 1,
            dst_addr: 0,
            msg_type: MsgType::SrmStatAck.code(),
            nak_code: NakCode::NoError,
        };
        coord.handle_chassis_frame(now, unmatched_header, &srm_payload);
        assert_eq!(coord.stats().rx_packets_dropped, 1);
    }

    #[test]
    fn set_config_always_acks() {
        let mut coord = coordinator_with_max_local(1);
        let cfg = AdcConfig::new(crate::adc::DataRate::Dr1000, [true; 4], [crate::adc::GainCode::Gain2; 4]);
        let header = CsHeader {
            cs_cmd_type: PacketType::CmdSetConfig,
            session_id: 1,
            src_serial: Serial([9; 8]),
            dst_serial: Serial([1; 8]),
            payload_length: 4,
        };
        let (resp_hdr, payload) = coord.handle_cs_request(&header, CsRequest::SetConfig(cfg), Instant::now(), None);
        assert_eq!(resp_hdr.cs_cmd_type, PacketType::AckNakResponse);
        assert_eq!(payload, vec![AckCode::Ack as u8]);
        assert_eq!(coord.adc_config, cfg);
    }

    #[test]
    fn unknown_device_state_request_is_nak() {
        let mut coord = coordinator_with_max_local(1);
        let header = CsHeader {
            cs_cmd_type: PacketType::ChaStateRequest,
            session_id: 1,
            src_serial: Serial([9; 8]),
            dst_serial: Serial([42; 8]),
            payload_length: 0,
        };
        let (resp_hdr, payload) = coord.handle_cs_request(&header, CsRequest::ChaState, Instant::now(), None);
        assert_eq!(resp_hdr.cs_cmd_type, PacketType::AckNakResponse);
        assert_eq!(payload, vec![AckCode::Nak as u8]);
        assert_eq!(coord.stats().cs_rx_packet_errors, 1);
    }
}
