use gnss_rs::sv::SV;
use rustfft::num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// One window of baseband samples handed to a pipeline stage. `ts_sec` is
/// the receiver time of the first sample of the last code period in the
/// window; `sample_index` is its absolute index since start of stream.
#[derive(Default, Clone)]
pub struct IQSample {
    pub iq_vec: Vec<Complex64>,
    pub ts_sec: f64,
    pub sample_index: u64,
}

/// Output of a successful acquisition search, used to seed a channel.
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionResult {
    pub sv: SV,
    pub doppler_hz: f64,
    /// Code phase of the PRN start within one code period, in samples.
    pub code_phase: usize,
    /// Peak power over the best peak in any other Doppler bin.
    pub peak_ratio: f64,
    pub sample_index: u64,
}

/// A navigation fix: ECEF position, receiver clock bias and dilution of
/// precision figures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fix {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub clock_bias_m: f64,
    pub hdop: f64,
    pub vdop: f64,
    pub pdop: f64,
    pub tow_sec: f64,
    pub num_svs: usize,
}

/// Per-SV observation snapshot handed to the solver: the LNAV transmit
/// time of the latest code-epoch boundary and the receiver sample index
/// that boundary landed on.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub sv: SV,
    pub tow_tx_sec: f64,
    pub rx_sample: f64,
    pub doppler_hz: f64,
    pub cn0: f64,
}
