//! The downstream chassis protocol: header, message-type codes, and the
//! payload codecs for control/status/discovery/clock-sync and streaming.

pub mod codec;
pub mod control;
pub mod header;
pub mod stream;

pub use header::{ChassisHeader, NakCode, HEADER_SZ};

use header::msg_bits;

/// Named message-type codes. Values are the raw on-wire byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    LrHandshakeReq,
    LrHandshakeAck,
    LrDriverStatusReq,
    LrDriverStatusAck,
    SrvcLog,
    EchoReq,
    EchoAck,
    Discovery,
    StreamStart,
    StreamStartAck,
    StreamFb,
    StreamData,
    StreamStop,
    StreamStopAck,
    SrmRunReq,
    SrmRunAck,
    SrmStopReq,
    SrmStopAck,
    SrmFatReq,
    SrmFatAck,
    SrmStatReq,
    SrmStatAck,
    CntlRebootReq,
    CntlRebootAck,
    CntlStatReq,
    CntlStatAck,
    CntlNodesBcReq,
    CntlNodesBcAck,
    CntlSrmReq,
    CntlSrmAck,
    CntlSetParams,
    CntlSetParamsAck,
    CntlClkSetReq,
    CntlClkSetAck,
}

impl MsgType {
    pub fn code(self) -> u8 {
        use MsgType::*;
        match self {
            LrHandshakeReq => 1,
            LrHandshakeAck => 1 | msg_bits::ACK,
            LrDriverStatusReq => 2,
            LrDriverStatusAck => 2 | msg_bits::ACK,
            SrvcLog => msg_bits::ACK,
            EchoReq => 6,
            EchoAck => 6 | msg_bits::ACK,
            Discovery => 7 | msg_bits::ACK,
            StreamStart => msg_bits::STR,
            StreamStartAck => msg_bits::STR | msg_bits::ACK,
            StreamFb => msg_bits::STR | 1,
            StreamData => msg_bits::STR | 2 | msg_bits::ACK,
            StreamStop => msg_bits::STR | 3,
            StreamStopAck => msg_bits::STR | 3 | msg_bits::ACK,
            SrmRunReq => msg_bits::SRM,
            SrmRunAck => msg_bits::SRM | msg_bits::ACK,
            SrmStopReq => msg_bits::SRM | 1,
            SrmStopAck => msg_bits::SRM | 1 | msg_bits::ACK,
            SrmFatReq => msg_bits::SRM | 2,
            SrmFatAck => msg_bits::SRM | 2 | msg_bits::ACK,
            SrmStatReq => msg_bits::SRM | 3,
            SrmStatAck => msg_bits::SRM | 3 | msg_bits::ACK,
            CntlRebootReq => msg_bits::CTL,
            CntlRebootAck => msg_bits::CTL | msg_bits::ACK,
            CntlStatReq => msg_bits::CTL | 1,
            CntlStatAck => msg_bits::CTL | 1 | msg_bits::ACK,
            CntlNodesBcReq => msg_bits::CTL | 2,
            CntlNodesBcAck => msg_bits::CTL | 2 | msg_bits::ACK,
            CntlSrmReq => msg_bits::CTL | 3,
            CntlSrmAck => msg_bits::CTL | 3 | msg_bits::ACK,
            CntlSetParams => msg_bits::CTL | 4,
            CntlSetParamsAck => msg_bits::CTL | 4 | msg_bits::ACK,
            CntlClkSetReq => msg_bits::CTL | 5,
            CntlClkSetAck => msg_bits::CTL | 5 | msg_bits::ACK,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        use MsgType::*;
        Some(match code {
            1 => LrHandshakeReq,
            c if c == (1 | msg_bits::ACK) => LrHandshakeAck,
            2 => LrDriverStatusReq,
            c if c == (2 | msg_bits::ACK) => LrDriverStatusAck,
            c if c == msg_bits::ACK => SrvcLog,
            6 => EchoReq,
            c if c == (6 | msg_bits::ACK) => EchoAck,
            c if c == (7 | msg_bits::ACK) => Discovery,
            c if c == msg_bits::STR => StreamStart,
            c if c == (msg_bits::STR | msg_bits::ACK) => StreamStartAck,
            c if c == (msg_bits::STR | 1) => StreamFb,
            c if c == (msg_bits::STR | 2 | msg_bits::ACK) => StreamData,
            c if c == (msg_bits::STR | 3) => StreamStop,
            c if c == (msg_bits::STR | 3 | msg_bits::ACK) => StreamStopAck,
            c if c == msg_bits::SRM => SrmRunReq,
            c if c == (msg_bits::SRM | msg_bits::ACK) => SrmRunAck,
            c if c == (msg_bits::SRM | 1) => SrmStopReq,
            c if c == (msg_bits::SRM | 1 | msg_bits::ACK) => SrmStopAck,
            c if c == (msg_bits::SRM | 2) => SrmFatReq,
            c if c == (msg_bits::SRM | 2 | msg_bits::ACK) => SrmFatAck,
            c if c == (msg_bits::SRM | 3) => SrmStatReq,
            c if c == (msg_bits::SRM | 3 | msg_bits::ACK) => SrmStatAck,
            c if c == msg_bits::CTL => CntlRebootReq,
            c if c == (msg_bits::CTL | msg_bits::ACK) => CntlRebootAck,
            c if c == (msg_bits::CTL | 1) => CntlStatReq,
            c if c == (msg_bits::CTL | 1 | msg_bits::ACK) => CntlStatAck,
            c if c == (msg_bits::CTL | 2) => CntlNodesBcReq,
            c if c == (msg_bits::CTL | 2 | msg_bits::ACK) => CntlNodesBcAck,
            c if c == (msg_bits::CTL | 3) => CntlSrmReq,
            c if c == (msg_bits::CTL | 3 | msg_bits::ACK) => CntlSrmAck,
            c if c == (msg_bits::CTL | 4) => CntlSetParams,
            c if c == (msg_bits::CTL | 4 | msg_bits::ACK) => CntlSetParamsAck,
            c if c == (msg_bits::CTL | 5) => CntlClkSetReq,
            c if c == (msg_bits::CTL | 5 | msg_bits::ACK) => CntlClkSetAck,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_codes_match_spec() {
        assert_eq!(MsgType::LrHandshakeReq.code(), 0x01);
        assert_eq!(MsgType::CntlStatReq.code(), 0x21);
        assert_eq!(MsgType::CntlStatAck.code(), 0xA1);
        assert_eq!(MsgType::CntlNodesBcReq.code(), 0x22);
        assert_eq!(MsgType::CntlClkSetReq.code(), 0x25);
        assert_eq!(MsgType::SrmRunReq.code(), 0x10);
        assert_eq!(MsgType::SrmStopReq.code(), 0x11);
        assert_eq!(MsgType::SrmFatReq.code(), 0x12);
        assert_eq!(MsgType::SrmStatReq.code(), 0x13);
        assert_eq!(MsgType::StreamStart.code(), 0x08);
        assert_eq!(MsgType::StreamFb.code(), 0x09);
        assert_eq!(MsgType::StreamData.code(), 0x8A);
        assert_eq!(MsgType::StreamStop.code(), 0x0B);
    }

    #[test]
    fn code_round_trips_through_from_code() {
        for mt in [
            MsgType::LrHandshakeReq,
            MsgType::CntlStatAck,
            MsgType::SrmRunReq,
            MsgType::StreamData,
        ] {
            assert_eq!(MsgType::from_code(mt.code()), Some(mt));
        }
    }
}
