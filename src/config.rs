use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::errors::Error;

/// On-disk layout of an interleaved I/Q recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    Int8Iq,
    Uint8Iq,
    Float32Iq,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Int8Iq | SampleFormat::Uint8Iq => 2,
            SampleFormat::Float32Iq => 8,
        }
    }
}

impl FromStr for SampleFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "int8_iq" => Ok(SampleFormat::Int8Iq),
            "uint8_iq" => Ok(SampleFormat::Uint8Iq),
            "float32_iq" => Ok(SampleFormat::Float32Iq),
            other => Err(Error::ConfigInvalid(format!(
                "unknown sample format: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SampleFormat::Int8Iq => "int8_iq",
            SampleFormat::Uint8Iq => "uint8_iq",
            SampleFormat::Float32Iq => "float32_iq",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sample_rate_hz: f64,
    pub sample_format: SampleFormat,
    pub center_frequency_hz: f64,
    /// Doppler half-range once a fix exists; doubled while cold.
    pub acquisition_doppler_range_hz: f64,
    pub acquisition_doppler_step_hz: f64,
    pub acquisition_threshold_ratio: f64,
    /// Non-coherent integration length, in 1 ms blocks.
    pub acquisition_integration_ms: usize,
    pub max_concurrent_tracked_svs: usize,
    pub pll_bandwidth_hz: f64,
    pub dll_bandwidth_hz: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate_hz: 2.046e6,
            sample_format: SampleFormat::Int8Iq,
            center_frequency_hz: 1.57542e9,
            acquisition_doppler_range_hz: 5000.0,
            acquisition_doppler_step_hz: 200.0,
            acquisition_threshold_ratio: 2.5,
            acquisition_integration_ms: 10,
            max_concurrent_tracked_svs: 10,
            pll_bandwidth_hz: 10.0,
            dll_bandwidth_hz: 1.0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_rate_hz < 2.046e6 {
            return Err(Error::ConfigInvalid(format!(
                "sample_rate_hz must be >= 2.046e6, got {}",
                self.sample_rate_hz
            )));
        }
        if (self.center_frequency_hz - 1.57542e9).abs() > 1.0e6 {
            return Err(Error::ConfigInvalid(format!(
                "center_frequency_hz {} is not GPS L1",
                self.center_frequency_hz
            )));
        }
        if self.acquisition_doppler_step_hz <= 0.0
            || self.acquisition_doppler_range_hz < self.acquisition_doppler_step_hz
        {
            return Err(Error::ConfigInvalid(
                "acquisition Doppler range/step inconsistent".into(),
            ));
        }
        if self.acquisition_threshold_ratio <= 1.0 {
            return Err(Error::ConfigInvalid(
                "acquisition_threshold_ratio must exceed 1.0".into(),
            ));
        }
        if self.acquisition_integration_ms == 0 {
            return Err(Error::ConfigInvalid(
                "acquisition_integration_ms must be >= 1".into(),
            ));
        }
        if self.max_concurrent_tracked_svs == 0 || self.max_concurrent_tracked_svs > 32 {
            return Err(Error::ConfigInvalid(format!(
                "max_concurrent_tracked_svs out of range: {}",
                self.max_concurrent_tracked_svs
            )));
        }
        if self.pll_bandwidth_hz <= 0.0 || self.dll_bandwidth_hz <= 0.0 {
            return Err(Error::ConfigInvalid("loop bandwidths must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn undersampled_config_rejected() {
        let cfg = Config {
            sample_rate_hz: 1.0e6,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn threshold_must_exceed_unity() {
        let cfg = Config {
            acquisition_threshold_ratio: 0.9,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sample_format_parses() {
        assert_eq!(
            "float32_iq".parse::<SampleFormat>().unwrap(),
            SampleFormat::Float32Iq
        );
        assert!("complex128".parse::<SampleFormat>().is_err());
    }
}
