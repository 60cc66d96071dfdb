//! Device identity types: interface enumeration, per-interface address, and
//! the composite registry key.

use crate::error::LinretError;

/// The chassis-facing interface a device is reachable on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum IfType {
    Driver = 1,
    Local = 2,
    Wifi0 = 3,
    Wifi1 = 4,
    Wired0 = 5,
    Wired1 = 6,
}

impl IfType {
    pub const ALL: [IfType; 5] = [
        IfType::Local,
        IfType::Wifi0,
        IfType::Wifi1,
        IfType::Wired0,
        IfType::Wired1,
    ];

    pub fn name(self) -> &'static str {
        match self {
            IfType::Driver => "DRIVER",
            IfType::Local => "LOCAL",
            IfType::Wifi0 => "WIFI_0",
            IfType::Wifi1 => "WIFI_1",
            IfType::Wired0 => "WIRED_0",
            IfType::Wired1 => "WIRED_1",
        }
    }
}

impl TryFrom<u8> for IfType {
    type Error = LinretError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(IfType::Driver),
            2 => Ok(IfType::Local),
            3 => Ok(IfType::Wifi0),
            4 => Ok(IfType::Wifi1),
            5 => Ok(IfType::Wired0),
            6 => Ok(IfType::Wired1),
            _ => Err(LinretError::InvalidEnumValue),
        }
    }
}

/// Per-interface address, valid in `[1, max_per_iface]`.
pub type NodeAddr = u8;

/// Composite registry key: `(if_type << 8) | addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FullAddr(pub u16);

impl FullAddr {
    pub fn new(if_type: IfType, addr: NodeAddr) -> Self {
        FullAddr(((if_type as u16) << 8) | addr as u16)
    }

    pub fn if_type(self) -> IfType {
        IfType::try_from((self.0 >> 8) as u8).expect("full_addr always built from a valid IfType")
    }

    pub fn addr(self) -> NodeAddr {
        (self.0 & 0xFF) as u8
    }
}

/// An 8-byte opaque device serial, used at the CS protocol boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Serial(pub [u8; 8]);

impl Serial {
    pub const BROADCAST: Serial = Serial([0xFF; 8]);

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// The class of device a CS-facing serial identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CsDevType {
    Any,
    Lr,
    Srm,
    ChaLr,
    ChaRn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_addr_round_trips_iface_and_addr() {
        let fa = FullAddr::new(IfType::Wired0, 7);
        assert_eq!(fa.if_type(), IfType::Wired0);
        assert_eq!(fa.addr(), 7);
    }

    #[test]
    fn full_addr_packs_as_documented() {
        let fa = FullAddr::new(IfType::Local, 3);
        assert_eq!(fa.0, (2u16 << 8) | 3);
    }
}
