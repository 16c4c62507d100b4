use crate::error::{LinkError, Result};
use crate::{ADC_MAX, ADC_REFERENCE_VOLTS, ADC_SCALE};
use std::fmt;
use std::str::FromStr;

/// One quantized analog value in the 10-bit ADC domain [0, 1023]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sample(u16);

impl Sample {
    /// Create a sample, rejecting values above `ADC_MAX`
    pub fn new(value: u16) -> Result<Self> {
        if value > ADC_MAX {
            return Err(LinkError::InvalidSample(value as u32));
        }
        Ok(Self(value))
    }

    /// Quantize a normalized amplitude: `adc = round((a + 1) * 511.5)`
    ///
    /// Amplitudes outside [-1.0, 1.0] are clipped first; NaN maps to mid-scale.
    pub fn from_amplitude(amplitude: f32) -> Self {
        let clipped = if amplitude.is_nan() {
            0.0
        } else {
            amplitude.clamp(-1.0, 1.0)
        };
        let adc = ((clipped + 1.0) * ADC_SCALE).round() as u16;
        Self(adc.min(ADC_MAX))
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// Inverse mapping: `amplitude = adc / 511.5 - 1`
    pub fn to_amplitude(self) -> f32 {
        adc_to_amplitude(self.0)
    }
}

impl TryFrom<u32> for Sample {
    type Error = LinkError;

    fn try_from(value: u32) -> Result<Self> {
        if value > ADC_MAX as u32 {
            return Err(LinkError::InvalidSample(value));
        }
        Ok(Self(value as u16))
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn adc_to_amplitude(adc: u16) -> f32 {
    adc as f32 / ADC_SCALE - 1.0
}

pub fn adc_to_volts(adc: u16) -> f32 {
    adc as f32 * ADC_REFERENCE_VOLTS / ADC_MAX as f32
}

/// Quantize a whole signal
pub fn quantize(amplitudes: &[f32]) -> Vec<Sample> {
    amplitudes.iter().map(|&a| Sample::from_amplitude(a)).collect()
}

/// Filter running on the device, chosen once per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Bypass,
    Fir,
    Iir,
}

impl FilterMode {
    pub const ALL: [FilterMode; 3] = [FilterMode::Bypass, FilterMode::Fir, FilterMode::Iir];

    /// Single-character selector the device expects
    pub fn selector(self) -> char {
        match self {
            FilterMode::Bypass => '0',
            FilterMode::Fir => '1',
            FilterMode::Iir => '2',
        }
    }

    pub fn from_selector(c: char) -> Option<Self> {
        match c {
            '0' => Some(FilterMode::Bypass),
            '1' => Some(FilterMode::Fir),
            '2' => Some(FilterMode::Iir),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterMode::Bypass => "bypass",
            FilterMode::Fir => "fir",
            FilterMode::Iir => "iir",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterMode {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bypass" | "0" => Ok(FilterMode::Bypass),
            "fir" | "1" => Ok(FilterMode::Fir),
            "iir" | "2" => Ok(FilterMode::Iir),
            other => Err(LinkError::InvalidConfig(format!(
                "unknown filter mode '{}' (expected bypass, fir or iir)",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_range_checked() {
        assert!(Sample::new(0).is_ok());
        assert!(Sample::new(1023).is_ok());
        assert!(matches!(Sample::new(1024), Err(LinkError::InvalidSample(1024))));
        assert!(Sample::try_from(70_000u32).is_err());
    }

    #[test]
    fn test_amplitude_mapping_endpoints() {
        assert_eq!(Sample::from_amplitude(-1.0).value(), 0);
        assert_eq!(Sample::from_amplitude(1.0).value(), 1023);
        assert_eq!(Sample::from_amplitude(0.0).value(), 512);
    }

    #[test]
    fn test_amplitude_mapping_clips() {
        assert_eq!(Sample::from_amplitude(-3.5).value(), 0);
        assert_eq!(Sample::from_amplitude(7.0).value(), 1023);
        assert_eq!(Sample::from_amplitude(f32::NAN).value(), 512);
    }

    #[test]
    fn test_inverse_mapping_close() {
        for a in [-0.9f32, -0.25, 0.0, 0.3, 0.75] {
            let back = Sample::from_amplitude(a).to_amplitude();
            assert!((back - a).abs() < 1.0 / ADC_SCALE, "{} -> {}", a, back);
        }
    }

    #[test]
    fn test_volts() {
        assert!((adc_to_volts(1023) - 5.0).abs() < 1e-6);
        assert_eq!(adc_to_volts(0), 0.0);
    }

    #[test]
    fn test_filter_mode_parse_and_selector() {
        assert_eq!("FIR".parse::<FilterMode>().unwrap(), FilterMode::Fir);
        assert_eq!("2".parse::<FilterMode>().unwrap(), FilterMode::Iir);
        assert!("lowpass".parse::<FilterMode>().is_err());
        for mode in FilterMode::ALL {
            assert_eq!(FilterMode::from_selector(mode.selector()), Some(mode));
        }
    }
}
