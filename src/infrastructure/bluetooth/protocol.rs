//! Blue Light Meter Protocol
//!
//! Identifiers, advertisement signature and packet formats of the RFduino
//! light meter, plus the text formats exchanged with polling clients.

use crate::domain::light::{compute_lux, IntegrationTime};
use crate::error::ParameterError;
use anyhow::Result;
use std::fmt::Write as _;
use std::time::Duration;
use uuid::Uuid;

/// RFduino GATT service
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x00002220_0000_1000_8000_00805f9b34fb);

/// Measurement characteristic, read by the driver
pub const READ_CHAR_UUID: Uuid = Uuid::from_u128(0x00002221_0000_1000_8000_00805f9b34fb);

/// Configuration characteristic, written by the driver
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x00002222_0000_1000_8000_00805f9b34fb);

/// Both markers must appear in the decoded advertisement payload.
pub const VENDOR_MARKER: &str = "RFduino";
pub const PRODUCT_MARKER: &str = "BlueL";

/// Scanning stops after this long.
pub const SCAN_PERIOD: Duration = Duration::from_secs(10);

/// Largest value that fits a write at the minimum ATT MTU.
pub const MAX_WRITE_LEN: usize = 20;

/// First byte of every measurement update.
pub const UPDATE_VERSION: u8 = 0x11;

/// Decode advertisement bytes as text, replacing invalid sequences.
pub fn decode_payload(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

pub fn matches_signature(decoded: &str) -> bool {
    decoded.contains(VENDOR_MARKER) && decoded.contains(PRODUCT_MARKER)
}

/// Format a characteristic value for polling clients.
///
/// `[0xAB, 0x01]` becomes `"blm: AB 01 "`; an empty value is `"nodata:"`.
pub fn format_value(value: &[u8]) -> String {
    if value.is_empty() {
        return "nodata:".to_string();
    }
    let mut out = String::with_capacity(5 + value.len() * 3);
    out.push_str("blm: ");
    for byte in value {
        let _ = write!(out, "{:02X} ", byte);
    }
    out
}

/// Parse space-separated hex tokens into signed bytes.
///
/// Each token is read as a 16-bit hex number and truncated to its low byte,
/// so `80`..`FF` come out negative and `1FF` wraps to `-1`.
pub fn parse_parameters(par: &str) -> Result<Vec<i8>, ParameterError> {
    let tokens: Vec<&str> = par.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(ParameterError::Empty);
    }
    tokens
        .into_iter()
        .map(|token| {
            i16::from_str_radix(token, 16)
                .map(|v| v as i8)
                .map_err(|_| ParameterError::InvalidToken {
                    token: token.to_string(),
                })
        })
        .collect()
}

/// Wire representation of signed parameter bytes.
pub fn to_wire(bytes: &[i8]) -> Vec<u8> {
    bytes.iter().map(|&b| b as u8).collect()
}

/// One measurement update sent by the meter.
///
/// # Packet Structure (9 bytes)
///
/// ```text
/// [0]   : Version (0x11)
/// [1]   : Run counter
/// [2-3] : Channel 0 (u16 little-endian)
/// [4-5] : Channel 1 (u16 little-endian)
/// [6]   : Mode (bits 0-1 integration time, bit 4 high gain)
/// [7-8] : Manual integration time in ms (u16 little-endian)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterUpdate {
    pub run: u8,
    pub ch0: u16,
    pub ch1: u16,
    pub integration: IntegrationTime,
    pub high_gain: bool,
}

impl MeterUpdate {
    pub const LEN: usize = 9;

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::LEN {
            return Err(anyhow::anyhow!("Invalid update size: {}", bytes.len()));
        }
        if bytes[0] != UPDATE_VERSION {
            return Err(anyhow::anyhow!("Unknown update version: {:#04X}", bytes[0]));
        }
        let mode = bytes[6];
        let manual_ms = u16::from_le_bytes([bytes[7], bytes[8]]);
        Ok(Self {
            run: bytes[1],
            ch0: u16::from_le_bytes([bytes[2], bytes[3]]),
            ch1: u16::from_le_bytes([bytes[4], bytes[5]]),
            integration: IntegrationTime::from_mode(mode, manual_ms),
            high_gain: mode & IntegrationTime::HIGH_GAIN != 0,
        })
    }

    pub fn lux(&self) -> f64 {
        compute_lux(self.ch0, self.ch1, self.integration, self.high_gain)
    }
}

/// Sensor configuration pushed to the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterConfig {
    pub integration: IntegrationTime,
    pub high_gain: bool,
}

impl MeterConfig {
    pub fn to_bytes(&self) -> [u8; 3] {
        let mut mode = self.integration.mode_bits();
        if self.high_gain {
            mode |= IntegrationTime::HIGH_GAIN;
        }
        let ms = match self.integration {
            IntegrationTime::Manual(ms) => ms,
            _ => 0,
        };
        let [lsb, msb] = ms.to_le_bytes();
        [mode, lsb, msb]
    }

    /// Parameter string accepted by `MeterService::set_parameters`.
    pub fn to_parameters(&self) -> String {
        let [mode, lsb, msb] = self.to_bytes();
        format!("{:x} {:x} {:x}", mode, lsb, msb)
    }
}

/// Parsed form of the service's data string.
#[derive(Debug, Clone, PartialEq)]
pub enum DataLine {
    Initializing,
    Blm(Vec<u8>),
    Lux(f32),
    NoLux,
    NoData,
}

impl DataLine {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let tag = parts.next().unwrap_or_default();
        match tag {
            "initializing:" => Ok(Self::Initializing),
            "nolux:" => Ok(Self::NoLux),
            "nodata:" => Ok(Self::NoData),
            "lux:" => {
                let value = parts
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("Missing lux value"))?;
                Ok(Self::Lux(value.parse()?))
            }
            "blm:" => {
                let bytes = parts
                    .map(|t| u8::from_str_radix(t, 16))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Blm(bytes))
            }
            other => Err(anyhow::anyhow!("Unexpected data line: {:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids() {
        assert_eq!(
            READ_CHAR_UUID.to_string(),
            "00002221-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            WRITE_CHAR_UUID.to_string(),
            "00002222-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            SERVICE_UUID.to_string(),
            "00002220-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_signature() {
        let payload = b"\x02\x01\x06\x08\x09RFduino\x10\xffBlueLightMeter";
        assert!(matches_signature(&decode_payload(payload)));
        assert!(!matches_signature("RFduino only"));
        assert!(!matches_signature("BlueLightMeter only"));
    }

    #[test]
    fn test_invalid_utf8_still_checked() {
        let mut payload = vec![0xff, 0xfe, 0xc3];
        payload.extend_from_slice(b"RFduino BlueL");
        assert!(matches_signature(&decode_payload(&payload)));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&[0xAB, 0x01]), "blm: AB 01 ");
        assert_eq!(format_value(&[]), "nodata:");
    }

    #[test]
    fn test_parse_parameters() {
        assert_eq!(parse_parameters("01 FF 0A").unwrap(), vec![1, -1, 10]);
        assert_eq!(to_wire(&[1, -1, 10]), vec![0x01, 0xFF, 0x0A]);
    }

    #[test]
    fn test_parse_parameters_truncates_to_signed_byte() {
        // Values at or above 0x80 wrap into negative bytes.
        assert_eq!(parse_parameters("80").unwrap(), vec![-128]);
        // Wider tokens keep only their low byte.
        assert_eq!(parse_parameters("1FF").unwrap(), vec![-1]);
        assert_eq!(parse_parameters("102").unwrap(), vec![2]);
    }

    #[test]
    fn test_parse_parameters_rejects_garbage() {
        assert_eq!(parse_parameters("   "), Err(ParameterError::Empty));
        assert_eq!(
            parse_parameters("01 zz"),
            Err(ParameterError::InvalidToken {
                token: "zz".to_string()
            })
        );
        assert!(parse_parameters("FFFF").is_err());
    }

    #[test]
    fn test_parse_update() {
        let bytes = [0x11, 7, 0xE8, 0x03, 0xFA, 0x00, 0x12, 0x00, 0x00];
        let update = MeterUpdate::parse(&bytes).unwrap();
        assert_eq!(update.run, 7);
        assert_eq!(update.ch0, 1000);
        assert_eq!(update.ch1, 250);
        assert_eq!(update.integration, IntegrationTime::Ms402);
        assert!(update.high_gain);
        assert!(update.lux() > 0.0);
    }

    #[test]
    fn test_parse_update_rejects_short_or_unknown() {
        assert!(MeterUpdate::parse(&[0x11, 0, 0]).is_err());
        assert!(MeterUpdate::parse(&[0x12, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_config_parameters() {
        let config = MeterConfig {
            integration: IntegrationTime::Manual(666),
            high_gain: true,
        };
        assert_eq!(config.to_bytes(), [0x13, 0x9A, 0x02]);
        assert_eq!(config.to_parameters(), "13 9a 2");
        assert_eq!(
            to_wire(&parse_parameters(&config.to_parameters()).unwrap()),
            config.to_bytes().to_vec()
        );
    }

    #[test]
    fn test_data_line() {
        assert_eq!(DataLine::parse("initializing:").unwrap(), DataLine::Initializing);
        assert_eq!(DataLine::parse("nolux:").unwrap(), DataLine::NoLux);
        assert_eq!(DataLine::parse("lux: 12.5").unwrap(), DataLine::Lux(12.5));
        assert_eq!(
            DataLine::parse("blm: AB 01 ").unwrap(),
            DataLine::Blm(vec![0xAB, 0x01])
        );
        assert!(DataLine::parse("status: x").is_err());
    }
}
