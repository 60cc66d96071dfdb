//! ADC configuration value object.
//!
//! Carried across three wire forms: the CS command payload (`<BBH`: rate
//! code, channel bitmask, gain bitmask), the SRM run payload (a single packed
//! `u32`), and the JSON config file. Equality is defined on the packed SRM
//! code, matching the original's `__eq__`.

use crate::bitcursor::{BitReader, BitWriter};
use crate::error::LinretError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRate {
    Dr500,
    Dr1000,
    Dr2000,
}

impl DataRate {
    pub fn hz(self) -> u32 {
        match self {
            DataRate::Dr500 => 500,
            DataRate::Dr1000 => 1000,
            DataRate::Dr2000 => 2000,
        }
    }

    pub fn from_hz(hz: u32) -> Result<Self, LinretError> {
        match hz {
            500 => Ok(DataRate::Dr500),
            1000 => Ok(DataRate::Dr1000),
            2000 => Ok(DataRate::Dr2000),
            _ => Err(LinretError::InvalidEnumValue),
        }
    }

    /// 3-bit code used on the CS wire (`CS_ADC_DR_CODE`).
    fn cs_code(self) -> u8 {
        match self {
            DataRate::Dr2000 => 4,
            DataRate::Dr1000 => 5,
            DataRate::Dr500 => 6,
        }
    }

    fn from_cs_code(code: u8) -> Result<Self, LinretError> {
        match code {
            4 => Ok(DataRate::Dr2000),
            5 => Ok(DataRate::Dr1000),
            6 => Ok(DataRate::Dr500),
            _ => Err(LinretError::InvalidEnumValue),
        }
    }

    /// 2-bit code used on the SRM wire (`SRM_DATARATE`).
    fn srm_code(self) -> u32 {
        match self {
            DataRate::Dr500 => 0,
            DataRate::Dr1000 => 1,
            DataRate::Dr2000 => 2,
        }
    }

    fn from_srm_code(code: u32) -> Result<Self, LinretError> {
        match code {
            0 => Ok(DataRate::Dr500),
            1 => Ok(DataRate::Dr1000),
            2 => Ok(DataRate::Dr2000),
            _ => Err(LinretError::InvalidEnumValue),
        }
    }
}

/// `CS_GAIN_CODE`: non-sequential codes, so it needs an explicit mapping
/// rather than a straight numeric cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainCode {
    Gain1,
    Gain2,
    Gain4,
    Gain8,
    Gain16,
    Gain32,
    Gain64,
}

impl GainCode {
    fn code(self) -> u32 {
        match self {
            GainCode::Gain1 => 0,
            GainCode::Gain2 => 1,
            GainCode::Gain4 => 2,
            GainCode::Gain8 => 4,
            GainCode::Gain16 => 5,
            GainCode::Gain32 => 6,
            GainCode::Gain64 => 7,
        }
    }

    fn from_code(code: u32) -> Result<Self, LinretError> {
        match code {
            0 => Ok(GainCode::Gain1),
            1 => Ok(GainCode::Gain2),
            2 => Ok(GainCode::Gain4),
            4 => Ok(GainCode::Gain8),
            5 => Ok(GainCode::Gain16),
            6 => Ok(GainCode::Gain32),
            7 => Ok(GainCode::Gain64),
            _ => Err(LinretError::InvalidEnumValue),
        }
    }

    pub fn from_u8(v: u8) -> Result<Self, LinretError> {
        Self::from_code(v as u32)
    }

    pub fn as_u8(self) -> u8 {
        self.code() as u8
    }
}

/// Four-channel ADC configuration: X, Y, Z, H.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcConfig {
    pub datarate: DataRate,
    pub ch_mask: [bool; 4],
    pub gains: [GainCode; 4],
}

impl AdcConfig {
    pub fn new(datarate: DataRate, ch_mask: [bool; 4], gains: [GainCode; 4]) -> Self {
        AdcConfig {
            datarate,
            ch_mask,
            gains,
        }
    }

    pub fn active_channels(&self) -> u32 {
        self.ch_mask.iter().filter(|&&c| c).count() as u32
    }

    /// Samples-per-node throughput pressure used to size streaming windows.
    pub fn packets_per_node(&self) -> u32 {
        self.datarate.hz() * 3 * self.active_channels() / 1500
    }

    /// The CS-wire datarate code, persisted alongside a stream record as its
    /// `frequency` field.
    pub fn frequency_code(&self) -> u8 {
        self.datarate.cs_code()
    }

    /// Channel enable bits, persisted alongside a stream record as its
    /// `channels` bitmask.
    pub fn channel_bitmask(&self) -> u8 {
        self.ch_mask.iter().enumerate().fold(0u8, |acc, (i, &on)| if on { acc | (1 << i) } else { acc })
    }

    /// 4x4-bit gain codes packed into a `u16`, persisted alongside a stream
    /// record as its `gain` bitmask.
    pub fn gain_bitmask(&self) -> u16 {
        let mut w = BitWriter::new();
        for i in 0..4 {
            w.write(self.gains[i].code(), 4);
        }
        w.as_u16()
    }

    /// `<BBH`: rate byte, channel-bitmask byte (1 bit/channel), gain-bitmask
    /// u16 (4 bits/channel), little-endian.
    pub fn to_cs_bytes(&self) -> [u8; 4] {
        let mut ch_w = BitWriter::new();
        let mut gain_w = BitWriter::new();
        for i in 0..4 {
            ch_w.write(self.ch_mask[i] as u32, 1);
            gain_w.write(self.gains[i].code(), 4);
        }
        let mut out = [0u8; 4];
        out[0] = self.datarate.cs_code();
        out[1] = ch_w.as_u16() as u8;
        out[2..4].copy_from_slice(&gain_w.as_u16().to_le_bytes());
        out
    }

    pub fn from_cs_bytes(bytes: &[u8]) -> Result<Self, LinretError> {
        if bytes.len() < 4 {
            return Err(LinretError::BufferTooShort);
        }
        let datarate = DataRate::from_cs_code(bytes[0])?;
        let mut ch_r = BitReader::from_u16(bytes[1] as u16);
        let mut gain_r = BitReader::from_u16(u16::from_le_bytes([bytes[2], bytes[3]]));
        let mut ch_mask = [false; 4];
        let mut gains = [GainCode::Gain1; 4];
        for i in 0..4 {
            ch_mask[i] = ch_r.read(1)? != 0;
            gains[i] = GainCode::from_code(gain_r.read(4)?)?;
        }
        Ok(AdcConfig::new(datarate, ch_mask, gains))
    }

    /// `<L`: 2-bit rate, 14 reserved bits, 4x1-bit channel enables, 4x3-bit
    /// gains, packed LSB-first into a single little-endian `u32`.
    pub fn to_srm_bytes(&self) -> [u8; 4] {
        self.srm_code().to_le_bytes()
    }

    fn srm_code(&self) -> u32 {
        let mut w = BitWriter::new();
        w.write(self.datarate.srm_code(), 2);
        w.write(0, 14);
        for i in 0..4 {
            w.write(self.ch_mask[i] as u32, 1);
        }
        for i in 0..4 {
            w.write(self.gains[i].code(), 3);
        }
        w.as_u32()
    }

    pub fn from_srm_bytes(bytes: &[u8]) -> Result<Self, LinretError> {
        if bytes.len() < 4 {
            return Err(LinretError::BufferTooShort);
        }
        let code = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let mut r = BitReader::from_u32(code);
        let datarate = DataRate::from_srm_code(r.read(2)?)?;
        r.read(14)?;
        let mut ch_mask = [false; 4];
        for slot in ch_mask.iter_mut() {
            *slot = r.read(1)? != 0;
        }
        let mut gains = [GainCode::Gain1; 4];
        for slot in gains.iter_mut() {
            *slot = GainCode::from_code(r.read(3)?)?;
        }
        Ok(AdcConfig::new(datarate, ch_mask, gains))
    }

    pub fn from_json(v: &serde_json::Value) -> Result<Self, LinretError> {
        let datarate = v
            .get("datarate")
            .and_then(|x| x.as_u64())
            .map(|x| x as u32)
            .unwrap_or(500);
        let datarate = DataRate::from_hz(datarate)?;

        let ch_mask_in = v
            .get("ch_mask")
            .and_then(|x| x.as_array())
            .cloned()
            .unwrap_or_else(|| vec![1.into(), 1.into(), 1.into(), 1.into()]);
        let mut ch_mask = [true; 4];
        for (i, slot) in ch_mask.iter_mut().enumerate() {
            *slot = ch_mask_in.get(i).and_then(|x| x.as_u64()).unwrap_or(1) != 0;
        }

        let gains_in = v
            .get("gains")
            .and_then(|x| x.as_array())
            .cloned()
            .unwrap_or_else(|| vec![0.into(); 4]);
        let mut gains = [GainCode::Gain1; 4];
        for (i, slot) in gains.iter_mut().enumerate() {
            let code = gains_in.get(i).and_then(|x| x.as_u64()).unwrap_or(0) as u8;
            *slot = GainCode::from_u8(code)?;
        }

        Ok(AdcConfig::new(datarate, ch_mask, gains))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "datarate": self.datarate.hz(),
            "ch_mask": self.ch_mask.map(|c| c as u8),
            "gains": self.gains.map(|g| g.as_u8()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AdcConfig {
        AdcConfig::new(
            DataRate::Dr1000,
            [true, true, false, true],
            [
                GainCode::Gain1,
                GainCode::Gain4,
                GainCode::Gain1,
                GainCode::Gain32,
            ],
        )
    }

    #[test]
    fn cs_bytes_round_trip() {
        let cfg = sample();
        let bytes = cfg.to_cs_bytes();
        assert_eq!(AdcConfig::from_cs_bytes(&bytes).unwrap(), cfg);
    }

    #[test]
    fn srm_bytes_round_trip() {
        let cfg = sample();
        let bytes = cfg.to_srm_bytes();
        assert_eq!(AdcConfig::from_srm_bytes(&bytes).unwrap(), cfg);
    }

    #[test]
    fn json_round_trip() {
        let cfg = sample();
        let v = cfg.to_json();
        assert_eq!(AdcConfig::from_json(&v).unwrap(), cfg);
    }

    #[test]
    fn packets_per_node_matches_formula() {
        let cfg = sample();
        assert_eq!(cfg.packets_per_node(), 1000 * 3 * 3 / 1500);
    }

    #[test]
    fn json_defaults_match_original() {
        let cfg = AdcConfig::from_json(&serde_json::json!({})).unwrap();
        assert_eq!(cfg.datarate, DataRate::Dr500);
        assert_eq!(cfg.ch_mask, [true; 4]);
        assert_eq!(cfg.gains, [GainCode::Gain1; 4]);
    }
}
