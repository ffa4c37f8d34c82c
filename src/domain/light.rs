//! TSL2561 light-to-lux conversion for meter readings.

/// Integration time selected by the low two bits of the meter mode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationTime {
    Ms13_7,
    Ms101,
    Ms402,
    /// Manual integration, time given in milliseconds.
    Manual(u16),
}

impl IntegrationTime {
    pub const HIGH_GAIN: u8 = 1 << 4;

    /// Decode from the mode byte and the manual integration time.
    pub fn from_mode(mode: u8, manual_ms: u16) -> Self {
        match mode & 0x3 {
            0 => Self::Ms13_7,
            1 => Self::Ms101,
            2 => Self::Ms402,
            _ => Self::Manual(manual_ms),
        }
    }

    /// Low two bits of the mode byte.
    pub fn mode_bits(self) -> u8 {
        match self {
            Self::Ms13_7 => 0,
            Self::Ms101 => 1,
            Self::Ms402 => 2,
            Self::Manual(_) => 3,
        }
    }

    pub fn millis(self) -> f64 {
        match self {
            Self::Ms13_7 => 13.7,
            Self::Ms101 => 101.0,
            Self::Ms402 => 402.0,
            Self::Manual(ms) => f64::from(ms),
        }
    }
}

/// Compute lux from the two photodiode channels.
///
/// Returns -1.0 when a channel saturated and 0.0 when a channel read zero.
pub fn compute_lux(ch0: u16, ch1: u16, integration: IntegrationTime, high_gain: bool) -> f64 {
    if ch0 == 0xffff || ch1 == 0xffff {
        return -1.0;
    }
    if ch0 == 0 || ch1 == 0 {
        return 0.0;
    }
    let ms = integration.millis();
    if ms <= 0.0 {
        return 0.0;
    }

    let ratio = f64::from(ch1) / f64::from(ch0);
    let mut d0 = f64::from(ch0) * 402.0 / ms;
    let mut d1 = f64::from(ch1) * 402.0 / ms;
    if !high_gain {
        d0 *= 16.0;
        d1 *= 16.0;
    }

    if ratio < 0.5 {
        0.0304 * d0 - 0.062 * d0 * ratio.powf(1.4)
    } else if ratio < 0.61 {
        0.0224 * d0 - 0.031 * d1
    } else if ratio < 0.80 {
        0.0128 * d0 - 0.0153 * d1
    } else if ratio < 1.30 {
        0.00146 * d0 - 0.00112 * d1
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturation_and_darkness() {
        assert_eq!(compute_lux(0xffff, 10, IntegrationTime::Ms402, true), -1.0);
        assert_eq!(compute_lux(10, 0xffff, IntegrationTime::Ms402, true), -1.0);
        assert_eq!(compute_lux(0, 10, IntegrationTime::Ms402, true), 0.0);
    }

    #[test]
    fn test_low_ratio_band() {
        // ratio 0.25 at 402ms high gain: no channel scaling
        let lux = compute_lux(1000, 250, IntegrationTime::Ms402, true);
        let expected = 0.0304 * 1000.0 - 0.062 * 1000.0 * 0.25f64.powf(1.4);
        assert!((lux - expected).abs() < 1e-9);
    }

    #[test]
    fn test_low_gain_scales_by_sixteen() {
        let hi = compute_lux(1000, 700, IntegrationTime::Ms402, true);
        let lo = compute_lux(1000, 700, IntegrationTime::Ms402, false);
        assert!((lo - hi * 16.0).abs() < 1e-6);
    }

    #[test]
    fn test_high_ratio_is_zero() {
        assert_eq!(compute_lux(100, 200, IntegrationTime::Ms101, true), 0.0);
    }

    #[test]
    fn test_mode_decoding() {
        assert_eq!(IntegrationTime::from_mode(0x12, 0), IntegrationTime::Ms402);
        assert_eq!(
            IntegrationTime::from_mode(0x03, 666),
            IntegrationTime::Manual(666)
        );
        assert_eq!(IntegrationTime::Manual(666).mode_bits(), 3);
    }
}
