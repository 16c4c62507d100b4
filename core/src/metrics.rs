use crate::sample::{adc_to_amplitude, adc_to_volts};

/// Peak level used when preparing filtered audio for listening
pub const PLAYBACK_PEAK: f32 = 0.8;

/// Before/after comparison of a streamed signal, in volts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityReport {
    pub samples: usize,
    /// Variance of the input voltage (V²)
    pub input_power: f64,
    /// Variance of the output voltage (V²)
    pub output_power: f64,
    /// `10·log10(input_power / output_power)`, 0 when the output is flat
    pub power_reduction_db: f64,
    /// RMS of the input-output voltage difference
    pub rms_difference: f64,
}

impl QualityReport {
    /// Compare equal-length ADC sequences; extra samples in the longer one are ignored
    pub fn measure(entrada: &[u16], salida: &[u16]) -> Self {
        let n = entrada.len().min(salida.len());
        let input: Vec<f64> = entrada[..n].iter().map(|&v| adc_to_volts(v) as f64).collect();
        let output: Vec<f64> = salida[..n].iter().map(|&v| adc_to_volts(v) as f64).collect();

        let input_power = variance(&input);
        let output_power = variance(&output);
        let power_reduction_db = if output_power > 0.0 && input_power > 0.0 {
            10.0 * (input_power / output_power).log10()
        } else {
            0.0
        };

        let rms_difference = if n == 0 {
            0.0
        } else {
            let sum: f64 = input.iter().zip(&output).map(|(a, b)| (a - b).powi(2)).sum();
            (sum / n as f64).sqrt()
        };

        Self {
            samples: n,
            input_power,
            output_power,
            power_reduction_db,
            rms_difference,
        }
    }
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// ADC values back to normalized amplitudes
pub fn to_amplitudes(adc: &[u16]) -> Vec<f32> {
    adc.iter().map(|&v| adc_to_amplitude(v)).collect()
}

/// Scale so the largest magnitude equals `peak`; silence is returned unchanged
pub fn normalize_peak(samples: &[f32], peak: f32) -> Vec<f32> {
    let max = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if max == 0.0 {
        return samples.to_vec();
    }
    samples.iter().map(|s| s / max * peak).collect()
}
