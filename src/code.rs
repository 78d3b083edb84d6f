use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

use crate::constants::{CHIP_RATE_HZ, CODE_PERIOD_SEC, NUM_GPS_SATS};
use crate::gold_code;

/// PRN replicas resampled to the receiver sample rate, with their forward
/// FFTs, computed once at startup. The acquirer correlates against the
/// FFTs; the channels correlate against the time-domain replicas.
pub struct Code {
    fs: f64,
    samples_per_code: usize,
    replicas: Vec<Vec<Complex64>>,
    replica_ffts: Vec<Vec<Complex64>>,
}

impl Code {
    pub fn new(fs: f64) -> Self {
        let samples_per_code = (fs * CODE_PERIOD_SEC) as usize;
        let mut fft_planner: FftPlanner<f64> = FftPlanner::new();
        let fft_fw = fft_planner.plan_fft_forward(samples_per_code);

        let mut replicas = Vec::with_capacity(NUM_GPS_SATS);
        let mut replica_ffts = Vec::with_capacity(NUM_GPS_SATS);

        for prn in 1..=NUM_GPS_SATS {
            let replica = Self::resample(&gold_code::prn_chips(prn), fs, samples_per_code);
            let mut fft = replica.clone();
            fft_fw.process(&mut fft);
            replicas.push(replica);
            replica_ffts.push(fft);
        }

        Self {
            fs,
            samples_per_code,
            replicas,
            replica_ffts,
        }
    }

    fn resample(chips: &[i8], fs: f64, samples_per_code: usize) -> Vec<Complex64> {
        (0..samples_per_code)
            .map(|i| {
                let chip = (i as f64 * CHIP_RATE_HZ / fs) as usize % chips.len();
                Complex64::new(chips[chip] as f64, 0.0)
            })
            .collect()
    }

    pub fn fs(&self) -> f64 {
        self.fs
    }

    pub fn samples_per_code(&self) -> usize {
        self.samples_per_code
    }

    pub fn replica(&self, prn: usize) -> &[Complex64] {
        &self.replicas[prn - 1]
    }

    pub fn replica_fft(&self, prn: usize) -> &[Complex64] {
        &self.replica_ffts[prn - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replica_doubles_chips_at_two_samples_per_chip() {
        let code = Code::new(2.046e6);
        assert_eq!(code.samples_per_code(), 2046);

        let chips = gold_code::prn_chips(9);
        let replica = code.replica(9);
        for (i, r) in replica.iter().enumerate() {
            assert_eq!(r.re, chips[i / 2] as f64);
            assert_eq!(r.im, 0.0);
        }
    }

    #[test]
    fn replica_covers_full_code_at_fractional_ratio() {
        // 2.5 MHz is not an integer multiple of the chip rate
        let code = Code::new(2.5e6);
        let n = code.samples_per_code();
        assert_eq!(n, 2500);

        let replica = code.replica(1);
        assert_eq!(replica.len(), n);
        // last sample still maps inside the code period
        let last_chip = ((n - 1) as f64 * CHIP_RATE_HZ / 2.5e6) as usize;
        assert!(last_chip < 1023);
        assert!(replica.iter().all(|c| c.re.abs() == 1.0));
    }
}
