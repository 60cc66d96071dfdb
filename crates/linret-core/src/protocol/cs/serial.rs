//! Synthesizes CS-facing device serials.
//!
//! The original assigns these through a process-wide singleton
//! (`SN_EMULATOR`). There is exactly one component that ever needs to mint a
//! serial — the Coordinator, when it first registers a device — so this is
//! an explicit value constructed once at startup and owned there, not a
//! global.

use crate::types::{CsDevType, IfType, NodeAddr, Serial};

#[derive(Debug, Clone)]
pub struct SerialMinter {
    lr_number: u8,
    vendor_prefix: [u8; 4],
}

impl SerialMinter {
    pub fn new(lr_number: u8) -> Self {
        SerialMinter {
            lr_number,
            vendor_prefix: *b"EMU_",
        }
    }

    fn dev_type_code(dev: CsDevType) -> u8 {
        match dev {
            CsDevType::Any => 0,
            CsDevType::Lr => 0x1,
            CsDevType::Srm => 0x2,
            CsDevType::ChaLr => 0x21,
            CsDevType::ChaRn => 0x22,
        }
    }

    /// Mirrors `SN_EMULATOR.generate`: `b'0'`-shifted ASCII digits for the LR
    /// number, interface type, and address, packed after the vendor prefix
    /// and device-type byte.
    pub fn mint(&self, dev: CsDevType, if_type: IfType, addr: NodeAddr) -> Serial {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&self.vendor_prefix);
        bytes[4] = b'0'.wrapping_add(self.lr_number);
        bytes[5] = Self::dev_type_code(dev);
        bytes[6] = b'0'.wrapping_add(if_type as u8);
        bytes[7] = b'0'.wrapping_add(addr);
        Serial(bytes)
    }

    pub fn mint_lr(&self) -> Serial {
        self.mint(CsDevType::Lr, IfType::Local, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_is_deterministic_for_same_identity() {
        let minter = SerialMinter::new(1);
        let a = minter.mint(CsDevType::ChaLr, IfType::Local, 1);
        let b = minter.mint(CsDevType::ChaLr, IfType::Local, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn mint_distinguishes_address() {
        let minter = SerialMinter::new(1);
        let a = minter.mint(CsDevType::ChaRn, IfType::Wired0, 1);
        let b = minter.mint(CsDevType::ChaRn, IfType::Wired0, 2);
        assert_ne!(a, b);
    }
}
