//! Synthetic baseband generation for the unit tests. Not compiled into
//! the release library.

use rustfft::num_complex::Complex64;

use crate::constants::{CHIP_RATE_HZ, CODE_PERIODS_PER_BIT, L1CA_HZ, PI, PRN_CODE_LEN};
use crate::gold_code;

/// Generate `num_ms` milliseconds of clean baseband carrying `prn`,
/// delayed by `code_phase` samples, on a Doppler-shifted carrier. The
/// code rate is slaved to the carrier the way a real SV's chip clock is.
/// `bits` are 20 ms data bits (±1) starting at the code-phase epoch; an
/// empty slice means an unmodulated carrier.
pub fn synth_signal(
    prn: usize,
    fs: f64,
    doppler_hz: f64,
    code_phase: usize,
    num_ms: usize,
    amplitude: f64,
    bits: &[i8],
) -> Vec<Complex64> {
    let chips = gold_code::prn_chips(prn);
    let samples_per_code = (fs * 0.001) as usize;
    let total = num_ms * samples_per_code;
    let code_rate = CHIP_RATE_HZ * (1.0 + doppler_hz / L1CA_HZ);
    let chips_per_bit = (CODE_PERIODS_PER_BIT * PRN_CODE_LEN) as i64;

    (0..total)
        .map(|i| {
            let t = i as f64 / fs;
            let tc = (i as f64 - code_phase as f64) / fs;
            let chip_count = (tc * code_rate).floor() as i64;
            let chip = chips[chip_count.rem_euclid(PRN_CODE_LEN as i64) as usize] as f64;

            let bit = if bits.is_empty() {
                1.0
            } else {
                let bit_idx = chip_count.div_euclid(chips_per_bit);
                bits[bit_idx.rem_euclid(bits.len() as i64) as usize] as f64
            };

            let arg = 2.0 * PI * doppler_hz * t;
            Complex64::new(arg.cos(), arg.sin()) * (amplitude * chip * bit)
        })
        .collect()
}

/// Deterministic standard-normal source (LCG + Box-Muller), so noisy
/// tests stay reproducible without a rand dependency.
pub struct Randn {
    state: u64,
}

impl Randn {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn uniform(&mut self) -> f64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.state >> 11) as f64) / ((1u64 << 53) as f64)
    }

    pub fn next(&mut self) -> f64 {
        let u1 = self.uniform().max(1e-12);
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }
}

/// Add complex white noise of the given per-component sigma.
pub fn add_noise(iq_vec: &mut [Complex64], sigma: f64, seed: u64) {
    let mut rng = Randn::new(seed);
    for iq in iq_vec.iter_mut() {
        *iq += Complex64::new(sigma * rng.next(), sigma * rng.next());
    }
}
