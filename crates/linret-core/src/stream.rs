//! StreamEngine: a bounded job queue and the per-interface sub-job state
//! machine that drives scheduled bulk-data collection.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use crate::adc::AdcConfig;
use crate::hal::{PersistedRecord, Sink};
use crate::protocol::chassis::header::ChassisHeader;
use crate::protocol::chassis::stream::{bitmask_read, bitmask_set, PacketBitmask, StreamFeedbackPayload, StreamStartPayload};
use crate::protocol::chassis::{codec, MsgType};
use crate::types::{IfType, NodeAddr, Serial};

pub const QUEUE_CAPACITY: usize = 25;
const START_ACK_TIMEOUT: Duration = Duration::from_millis(200);
const DATA_TIMEOUT: Duration = Duration::from_millis(1500);
const STOP_ACK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubJobState {
    Inactive,
    WaitStartAck,
    WaitData,
    WaitStopAck,
    Finished,
}

/// One interface's worth of a `Job`: the nodes expected to stream on it and
/// the reassembly state for their packets.
pub struct SubJob {
    pub if_type: IfType,
    nodes: Vec<(NodeAddr, Serial)>,
    ppn: u32,
    expected: PacketBitmask,
    received: PacketBitmask,
    fragments: BTreeMap<u32, Vec<u8>>,
    state: SubJobState,
    state_entered_at: Instant,
    request_id: u8,
    persisted: bool,
}

impl SubJob {
    fn new(if_type: IfType, nodes: Vec<(NodeAddr, Serial)>, ppn: u32, now: Instant) -> Self {
        let mut expected = [0u32; 13];
        for (addr, _) in nodes.iter() {
            for k in 0..ppn {
                bitmask_set(&mut expected, (*addr as u32 - 1) * ppn + k);
            }
        }
        SubJob {
            if_type,
            nodes,
            ppn,
            expected,
            received: [0u32; 13],
            fragments: BTreeMap::new(),
            state: SubJobState::Inactive,
            state_entered_at: now,
            request_id: 0,
            persisted: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.expected == self.received
    }

    fn next_request_id(&mut self) -> u8 {
        let id = self.request_id;
        self.request_id = self.request_id.wrapping_add(1);
        id
    }

    fn enter(&mut self, state: SubJobState, now: Instant) {
        self.state = state;
        self.state_entered_at = now;
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state_entered_at)
    }

    /// Global packet index for `(addr, packet_n)`: `(addr - 1) * ppn +
    /// packet_n`, matching the wire protocol's own indexing regardless of
    /// which addresses on this interface are actually occupied. The node
    /// must be a member of this sub-job.
    fn global_index(&self, addr: NodeAddr, packet_n: u32) -> Option<u32> {
        if !self.nodes.iter().any(|(a, _)| *a == addr) {
            return None;
        }
        Some((addr as u32 - 1) * self.ppn + packet_n)
    }

    pub fn ingest(&mut self, addr: NodeAddr, packet_n: u32, payload: &[u8]) {
        let Some(global_idx) = self.global_index(addr, packet_n) else { return };
        bitmask_set(&mut self.received, global_idx);
        self.fragments.entry(global_idx).or_insert_with(|| payload.to_vec());
        if matches!(self.state, SubJobState::WaitStartAck) {
            self.state = SubJobState::WaitData;
        }
    }

    pub fn on_start_ack(&mut self, now: Instant) {
        if matches!(self.state, SubJobState::WaitStartAck) {
            self.enter(SubJobState::WaitData, now);
        }
    }

    pub fn on_stop_ack(&mut self, now: Instant) {
        if matches!(self.state, SubJobState::WaitStopAck) {
            self.enter(SubJobState::Finished, now);
        }
    }

    /// Advances the state machine by one tick, returning any request the
    /// caller should send.
    fn tick(&mut self, now: Instant, timestamp: u32, adc_code: u32) -> Option<(ChassisHeader, Vec<u8>)> {
        match self.state {
            SubJobState::Inactive => {
                self.enter(SubJobState::WaitStartAck, now);
                Some(self.emit_start(timestamp, adc_code))
            }
            SubJobState::WaitStartAck => {
                if self.elapsed(now) > START_ACK_TIMEOUT {
                    self.enter(SubJobState::WaitStopAck, now);
                    Some(self.emit_stop())
                } else {
                    Some(self.emit_start(timestamp, adc_code))
                }
            }
            SubJobState::WaitData => {
                if self.is_complete() {
                    self.enter(SubJobState::WaitStopAck, now);
                    Some(self.emit_stop())
                } else if self.elapsed(now) > DATA_TIMEOUT {
                    self.enter(SubJobState::WaitStopAck, now);
                    Some(self.emit_stop())
                } else {
                    Some(self.emit_feedback(timestamp))
                }
            }
            SubJobState::WaitStopAck => {
                if self.elapsed(now) > STOP_ACK_TIMEOUT {
                    self.enter(SubJobState::Finished, now);
                }
                Some(self.emit_stop())
            }
            SubJobState::Finished => None,
        }
    }

    fn broadcast_header(&mut self, msg_type: MsgType) -> ChassisHeader {
        let rand = self.next_request_id();
        ChassisHeader::request(self.if_type, msg_type.code(), 0, rand)
    }

    fn emit_start(&mut self, timestamp: u32, adc_code: u32) -> (ChassisHeader, Vec<u8>) {
        let expected = self.expected;
        let header = self.broadcast_header(MsgType::StreamStart);
        let payload = StreamStartPayload { timestamp, packets: expected, adc_code }.to_bytes();
        (header, payload)
    }

    fn emit_feedback(&mut self, timestamp: u32) -> (ChassisHeader, Vec<u8>) {
        let received = self.received;
        let header = self.broadcast_header(MsgType::StreamFb);
        let payload = StreamFeedbackPayload { timestamp, packets: received }.to_bytes();
        (header, payload)
    }

    fn emit_stop(&mut self) -> (ChassisHeader, Vec<u8>) {
        let header = self.broadcast_header(MsgType::StreamStop);
        (header, Vec::new())
    }

    /// Concatenates each fully-received node's `ppn` fragments in index
    /// order. Nodes that never completed are skipped and logged.
    fn assemble(&self, timestamp_ns: i64, adc_params: &AdcConfig) -> Vec<PersistedRecord> {
        let mut out = Vec::new();
        for (addr, serial) in self.nodes.iter() {
            let base = (*addr as u32 - 1) * self.ppn;
            let mut data = Vec::new();
            let mut complete = true;
            for k in 0..self.ppn {
                match self.fragments.get(&(base + k)) {
                    Some(bytes) => data.extend_from_slice(bytes),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                out.push(PersistedRecord {
                    serial: *serial,
                    time_start_ns: timestamp_ns,
                    samples_count: self.ppn,
                    frequency_code: adc_params.frequency_code(),
                    channels_bitmask: adc_params.channel_bitmask(),
                    gain_bitmask: adc_params.gain_bitmask(),
                    data,
                });
            } else {
                log::warn!("{:?}:{} incomplete stream record dropped", self.if_type, addr);
            }
        }
        out
    }
}

pub struct Job {
    pub timestamp: u32,
    pub adc_params: AdcConfig,
    pub subjobs: BTreeMap<IfType, SubJob>,
}

impl Job {
    pub fn new(timestamp: u32, adc_params: AdcConfig, nodes_by_iface: Vec<(IfType, Vec<(NodeAddr, Serial)>)>, now: Instant) -> Self {
        let ppn = adc_params.packets_per_node();
        let subjobs = nodes_by_iface
            .into_iter()
            .map(|(if_type, nodes)| (if_type, SubJob::new(if_type, nodes, ppn, now)))
            .collect();
        Job { timestamp, adc_params, subjobs }
    }

    fn is_finished(&self) -> bool {
        self.subjobs.values().all(|s| matches!(s.state, SubJobState::Finished))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobNotification {
    Active(u32),
    Finished(u32),
}

pub struct StreamEngine {
    queue: VecDeque<Job>,
    active: Option<Job>,
    last_finish: Option<Instant>,
    pub queue_full_drops: u64,
    delay_before_request: Duration,
    delay_between_requests: Duration,
}

impl StreamEngine {
    pub fn new(delay_before_request: Duration, delay_between_requests: Duration) -> Self {
        StreamEngine {
            queue: VecDeque::new(),
            active: None,
            last_finish: None,
            queue_full_drops: 0,
            delay_before_request,
            delay_between_requests,
        }
    }

    pub fn push_job(&mut self, job: Job) {
        if self.queue.len() >= QUEUE_CAPACITY {
            self.queue_full_drops += 1;
            log::warn!("stream job queue full, dropping timestamp={}", job.timestamp);
            return;
        }
        self.queue.push_back(job);
    }

    /// Advances the active job (if any) or pops the head when its delay has
    /// elapsed, returning outbound chassis requests, any sink writes due,
    /// and a notification for the Coordinator.
    pub fn tick(&mut self, now: Instant, now_true: f64, sink: &mut dyn Sink) -> (Vec<(ChassisHeader, Vec<u8>)>, Option<JobNotification>) {
        if self.active.is_none() {
            let Some(head) = self.queue.front() else {
                return (Vec::new(), None);
            };
            let age_ok = now_true - head.timestamp as f64 >= self.delay_before_request.as_secs_f64();
            let spacing_ok = self
                .last_finish
                .map(|t| now.saturating_duration_since(t) >= self.delay_between_requests)
                .unwrap_or(true);
            if !age_ok || !spacing_ok {
                return (Vec::new(), None);
            }
            self.active = self.queue.pop_front();
            return self.advance(now, sink, true);
        }
        self.advance(now, sink, false)
    }

    fn advance(&mut self, now: Instant, sink: &mut dyn Sink, just_activated: bool) -> (Vec<(ChassisHeader, Vec<u8>)>, Option<JobNotification>) {
        let Some(job) = self.active.as_mut() else {
            return (Vec::new(), None);
        };
        let timestamp = job.timestamp;
        let adc_code = u32::from_le_bytes(job.adc_params.to_srm_bytes());
        let mut actions = Vec::new();
        for subjob in job.subjobs.values_mut() {
            if let Some(action) = subjob.tick(now, timestamp, adc_code) {
                actions.push(action);
            }
        }

        if job.is_finished() {
            self.persist(sink, timestamp);
            self.last_finish = Some(now);
            self.active = None;
            return (actions, Some(JobNotification::Finished(timestamp)));
        }

        if just_activated {
            return (actions, Some(JobNotification::Active(timestamp)));
        }
        (actions, None)
    }

    fn persist(&mut self, sink: &mut dyn Sink, timestamp: u32) {
        let Some(job) = self.active.as_mut() else { return };
        for subjob in job.subjobs.values_mut() {
            if subjob.persisted {
                continue;
            }
            let records = subjob.assemble(timestamp as i64 * 1_000_000_000, &job.adc_params);
            if !records.is_empty() {
                if let Err(e) = sink.insert_many(&records) {
                    log::warn!("sink insert_many failed for job {timestamp}: {e}");
                }
                for record in &records {
                    if let Err(e) = sink.upsert_max(record.serial, record.time_start_ns) {
                        log::warn!("sink upsert_max failed for serial {}: {e}", record.serial.hex());
                    }
                }
            }
            subjob.persisted = true;
        }
    }

    pub fn active_timestamp(&self) -> Option<u32> {
        self.active.as_ref().map(|j| j.timestamp)
    }

    /// Hands a decoded chassis frame's stream-bit-set payload to the right
    /// sub-job. No-op if there is no active job or no matching interface.
    pub fn handle_frame(&mut self, now: Instant, if_type: IfType, frame: codec::ChassisFrame) {
        let Some(job) = self.active.as_mut() else { return };
        let Some(subjob) = job.subjobs.get_mut(&if_type) else { return };
        match frame {
            codec::ChassisFrame::StreamStartAck => subjob.on_start_ack(now),
            codec::ChassisFrame::StreamStopAck => subjob.on_stop_ack(now),
            codec::ChassisFrame::StreamData { node_id, packet_n, payload } => {
                subjob.ingest(node_id, packet_n, &payload);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::{DataRate, GainCode};
    use crate::error::LinretError;

    #[derive(Default)]
    struct MemSink {
        inserted: Vec<PersistedRecord>,
        maxes: Vec<(Serial, i64)>,
    }

    impl Sink for MemSink {
        fn insert_many(&mut self, records: &[PersistedRecord]) -> Result<(), LinretError> {
            self.inserted.extend(records.iter().cloned());
            Ok(())
        }

        fn upsert_max(&mut self, serial: Serial, time_start_ns: i64) -> Result<(), LinretError> {
            self.maxes.push((serial, time_start_ns));
            Ok(())
        }
    }

    fn one_channel_config() -> AdcConfig {
        AdcConfig::new(DataRate::Dr500, [true, false, false, false], [GainCode::Gain1; 4])
    }

    #[test]
    fn happy_path_single_node_completes_and_persists() {
        let cfg = one_channel_config();
        assert_eq!(cfg.packets_per_node(), 1);
        let now = Instant::now();
        let job = Job::new(
            1_700_000_000,
            cfg,
            vec![(IfType::Local, vec![(1, Serial([1; 8]))])],
            now,
        );
        let mut engine = StreamEngine::new(Duration::from_millis(0), Duration::from_millis(0));
        engine.push_job(job);
        let mut sink = MemSink::default();

        let (actions, notif) = engine.tick(now, 1_700_000_010.0, &mut sink);
        assert_eq!(actions.len(), 1);
        assert_eq!(notif, Some(JobNotification::Active(1_700_000_000)));

        engine.handle_frame(now, IfType::Local, codec::ChassisFrame::StreamData {
            node_id: 1,
            packet_n: 0,
            payload: b"\x00".to_vec(),
        });

        let (actions, notif) = engine.tick(now, 1_700_000_010.0, &mut sink);
        assert_eq!(actions.len(), 1); // STOP emitted
        assert!(notif.is_none());

        engine.handle_frame(now, IfType::Local, codec::ChassisFrame::StreamStopAck);
        let (_actions, notif) = engine.tick(now, 1_700_000_010.0, &mut sink);
        assert_eq!(notif, Some(JobNotification::Finished(1_700_000_000)));
        assert_eq!(sink.inserted.len(), 1);
        let record = &sink.inserted[0];
        assert_eq!(record.serial, Serial([1; 8]));
        assert_eq!(record.time_start_ns, 1_700_000_000_000_000_000);
        assert_eq!(record.data, b"\x00".to_vec());
        assert_eq!(sink.maxes, vec![(Serial([1; 8]), 1_700_000_000_000_000_000)]);
    }

    #[test]
    fn global_index_uses_node_address_not_list_position() {
        // A node at addr=2 (addr=1 having timed out) must land at packet
        // indices ppn..2*ppn, not 0..ppn, so the bitmask matches what the
        // chassis itself derives from `(node_id-1) * ppn + packet_n`.
        let cfg = one_channel_config();
        assert_eq!(cfg.packets_per_node(), 1);
        let now = Instant::now();
        let job = Job::new(1_700_000_200, cfg, vec![(IfType::Local, vec![(2, Serial([2; 8]))])], now);
        let mut engine = StreamEngine::new(Duration::from_millis(0), Duration::from_millis(0));
        engine.push_job(job);
        let mut sink = MemSink::default();

        let (actions, _) = engine.tick(now, 1_700_000_210.0, &mut sink); // -> START
        let (_, start_payload) = &actions[0];
        let start = crate::protocol::chassis::stream::StreamStartPayload::from_bytes(start_payload).unwrap();
        assert!(bitmask_read(&start.packets, 1));
        assert!(!bitmask_read(&start.packets, 0));

        engine.handle_frame(now, IfType::Local, codec::ChassisFrame::StreamData {
            node_id: 2,
            packet_n: 0,
            payload: b"\xAB".to_vec(),
        });
        engine.tick(now, 1_700_000_210.0, &mut sink); // -> STOP
        engine.handle_frame(now, IfType::Local, codec::ChassisFrame::StreamStopAck);
        engine.tick(now, 1_700_000_210.0, &mut sink);

        assert_eq!(sink.inserted.len(), 1);
        assert_eq!(sink.inserted[0].data, b"\xAB".to_vec());
    }

    #[test]
    fn selective_repeat_feedback_covers_received_set_only() {
        let cfg = AdcConfig::new(DataRate::Dr1000, [true, true, true, false], [GainCode::Gain1; 4]);
        assert_eq!(cfg.packets_per_node(), 6);
        let now = Instant::now();
        let job = Job::new(1_700_000_100, cfg, vec![(IfType::Local, vec![(1, Serial([1; 8]))])], now);
        let mut engine = StreamEngine::new(Duration::from_millis(0), Duration::from_millis(0));
        engine.push_job(job);
        let mut sink = MemSink::default();

        engine.tick(now, 1_700_000_110.0, &mut sink); // -> START
        for k in [0u32, 1, 3, 4, 5] {
            engine.handle_frame(now, IfType::Local, codec::ChassisFrame::StreamData {
                node_id: 1,
                packet_n: k,
                payload: vec![k as u8],
            });
        }

        let (actions, notif) = engine.tick(now, 1_700_000_110.0, &mut sink);
        assert!(notif.is_none());
        let (_, feedback_payload) = &actions[0];
        let fb = StreamFeedbackPayload::from_bytes(feedback_payload).unwrap();
        for k in [0u32, 1, 3, 4, 5] {
            assert!(bitmask_read(&fb.packets, k));
        }
        assert!(!bitmask_read(&fb.packets, 2));

        engine.handle_frame(now, IfType::Local, codec::ChassisFrame::StreamData {
            node_id: 1,
            packet_n: 2,
            payload: vec![2],
        });
        let (actions, _) = engine.tick(now, 1_700_000_110.0, &mut sink);
        // Complete now: expect the STOP emission (empty payload).
        assert!(actions[0].1.is_empty());
    }

    #[test]
    fn queue_beyond_capacity_drops_and_counts() {
        let cfg = one_channel_config();
        let mut engine = StreamEngine::new(Duration::from_secs(0), Duration::from_secs(0));
        let now = Instant::now();
        for i in 0..QUEUE_CAPACITY + 1 {
            engine.push_job(Job::new(i as u32, cfg, vec![], now));
        }
        assert_eq!(engine.queue_full_drops, 1);
    }
}
