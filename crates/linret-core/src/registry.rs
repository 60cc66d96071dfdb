//! The device registry: owns every known `ChassisDevice`, keyed by
//! `full_addr`. Lives entirely on the Coordinator's thread.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::device::{ChassisDevice, NodeTimeouts, OutboundChassisRequest, TimeoutOutcome};
use crate::protocol::chassis::control::ChaStatusResponse;
use crate::types::{CsDevType, FullAddr, IfType, NodeAddr, Serial};

#[derive(Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<FullAddr, ChassisDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry { devices: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, full_addr: FullAddr) -> Option<&ChassisDevice> {
        self.devices.get(&full_addr)
    }

    pub fn get_mut(&mut self, full_addr: FullAddr) -> Option<&mut ChassisDevice> {
        self.devices.get_mut(&full_addr)
    }

    pub fn contains(&self, if_type: IfType, addr: NodeAddr) -> bool {
        self.devices.contains_key(&FullAddr::new(if_type, addr))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FullAddr, &ChassisDevice)> {
        self.devices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&FullAddr, &mut ChassisDevice)> {
        self.devices.iter_mut()
    }

    /// Addresses currently present on a given interface.
    pub fn present_addrs(&self, if_type: IfType) -> Vec<NodeAddr> {
        self.devices
            .keys()
            .filter(|fa| fa.if_type() == if_type)
            .map(|fa| fa.addr())
            .collect()
    }

    /// `full_addr` range that spans exactly one interface, for a contiguous
    /// iteration of a single `if_type` without the `BTreeMap` leaking its
    /// neighbors (the composite key already sorts by interface first).
    pub fn devices_on(&self, if_type: IfType) -> impl Iterator<Item = &ChassisDevice> {
        self.devices.values().filter(move |d| d.if_type == if_type)
    }

    /// Registers a device on its first valid status acknowledgment.
    pub fn create(&mut self, if_type: IfType, addr: NodeAddr, cha_serial: Serial, initial_state: ChaStatusResponse, now: Instant) -> FullAddr {
        let full_addr = FullAddr::new(if_type, addr);
        self.devices
            .entry(full_addr)
            .or_insert_with(|| ChassisDevice::new(if_type, addr, cha_serial, initial_state, now));
        full_addr
    }

    /// Runs the per-device timeout sweep, dropping devices whose last valid
    /// status exceeds `node_total_lifetime`, and returns the union of
    /// outbound requests the survivors issued.
    pub fn sweep_timeouts(&mut self, now: Instant, job_is_active: bool, timeouts: &NodeTimeouts) -> Vec<OutboundChassisRequest> {
        let mut out = Vec::new();
        let mut dead = Vec::new();
        for (full_addr, dev) in self.devices.iter_mut() {
            let (outcome, mut reqs) = dev.check_timeouts(now, job_is_active, timeouts);
            out.append(&mut reqs);
            if matches!(outcome, TimeoutOutcome::TimedOut) {
                dead.push(*full_addr);
            }
        }
        for full_addr in dead {
            log::info!("{:?} timed out, removing", full_addr);
            self.devices.remove(&full_addr);
        }
        out
    }

    /// Serials known for a given CS device class, used to answer
    /// `node-id-list` CS requests.
    pub fn known_serials(&self, dev_type: CsDevType) -> Vec<Serial> {
        self.devices
            .values()
            .filter_map(|d| match dev_type {
                CsDevType::ChaLr if d.if_type == IfType::Local => Some(d.cha_serial),
                CsDevType::ChaRn if d.if_type != IfType::Local => Some(d.cha_serial),
                CsDevType::Srm => d.srm_serial,
                _ => None,
            })
            .collect()
    }

    pub fn find_by_cha_serial(&self, serial: Serial) -> Option<&ChassisDevice> {
        self.devices.values().find(|d| d.cha_serial == serial)
    }

    pub fn find_by_cha_serial_mut(&mut self, serial: Serial) -> Option<&mut ChassisDevice> {
        self.devices.values_mut().find(|d| d.cha_serial == serial)
    }
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
    fn create_is_idempotent_per_full_addr() {
        let mut reg = DeviceRegistry::new();
        let now = Instant::now();
        reg.create(IfType::Local, 1, Serial([1; 8]), sample_state(), now);
        reg.create(IfType::Local, 1, Serial([2; 8]), sample_state(), now);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(FullAddr::new(IfType::Local, 1)).unwrap().cha_serial, Serial([1; 8]));
    }

    #[test]
    fn stale_device_is_swept() {
        let mut reg = DeviceRegistry::new();
        let old = Instant::now();
        reg.create(IfType::Local, 1, Serial([1; 8]), sample_state(), old);
        let later = old + std::time::Duration::from_secs(20);
        reg.sweep_timeouts(later, false, &NodeTimeouts::default());
        assert!(reg.is_empty());
    }

    #[test]
    fn present_addrs_restricted_to_interface() {
        let mut reg = DeviceRegistry::new();
        let now = Instant::now();
        reg.create(IfType::Local, 1, Serial([1; 8]), sample_state(), now);
        reg.create(IfType::Wifi0, 2, Serial([2; 8]), sample_state(), now);
        assert_eq!(reg.present_addrs(IfType::Local), vec![1]);
        assert_eq!(reg.present_addrs(IfType::Wifi0), vec![2]);
    }
}
