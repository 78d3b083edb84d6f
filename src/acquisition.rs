use colored::Colorize;
use gnss_rs::sv::SV;
use rustfft::FftPlanner;

use crate::code::Code;
use crate::constants::CHIP_RATE_HZ;
use crate::types::{AcquisitionResult, IQSample};
use crate::util::{calc_correlation, doppler_shift, get_max_with_idx};

/// Parallel code-phase search: one Doppler bin sweep over a multi-block
/// window, non-coherent integration across the 1 ms blocks. Pure over the
/// window; the orchestrator retries failed SVs with fresh windows.
pub struct Acquisition {
    fft_planner: FftPlanner<f64>,
    pub doppler_range_hz: f64,
    pub doppler_step_hz: f64,
    pub threshold_ratio: f64,
}

impl Acquisition {
    pub fn new(doppler_range_hz: f64, doppler_step_hz: f64, threshold_ratio: f64) -> Self {
        Self {
            fft_planner: FftPlanner::new(),
            doppler_range_hz,
            doppler_step_hz,
            threshold_ratio,
        }
    }

    /// Non-coherent correlation power vs code phase for one Doppler bin.
    /// Carrier phase is kept continuous across the 1 ms blocks so each
    /// block's wipe-off lines up with the same hypothetical carrier.
    fn integrate_bin(&mut self, code: &Code, sv: SV, window: &IQSample, doppler_hz: f64) -> Vec<f64> {
        let n = code.samples_per_code();
        let fs = code.fs();
        let num_blocks = window.iq_vec.len() / n;
        let mut power = vec![0f64; n];

        for blk in 0..num_blocks {
            let mut block = window.iq_vec[blk * n..(blk + 1) * n].to_vec();
            let phase_cycles = doppler_hz * (blk * n) as f64 / fs;
            doppler_shift(&mut block, doppler_hz, phase_cycles, fs);

            let corr = calc_correlation(
                &mut self.fft_planner,
                &block,
                code.replica_fft(sv.prn as usize),
            );
            for (p, c) in power.iter_mut().zip(&corr) {
                *p += c.norm_sqr();
            }
        }
        power
    }

    /// Search the (Doppler, code phase) plane for one SV. The detection
    /// metric is the global peak over the strongest cell outside the
    /// peak's one-chip code-phase neighborhood; Doppler leakage into
    /// neighboring bins sits at the same code phase and must not count
    /// as a competing peak.
    pub fn try_acquire(&mut self, code: &Code, sv: SV, window: &IQSample) -> Option<AcquisitionResult> {
        let n = code.samples_per_code();
        let num_bins = (2.0 * self.doppler_range_hz / self.doppler_step_hz) as usize + 1;

        let powers: Vec<Vec<f64>> = (0..num_bins)
            .map(|i| {
                let doppler_hz = -self.doppler_range_hz + i as f64 * self.doppler_step_hz;
                self.integrate_bin(code, sv, window, doppler_hz)
            })
            .collect();

        let mut best_bin = 0;
        let mut best_phase = 0;
        let mut best_power = 0.0;
        for (i, profile) in powers.iter().enumerate() {
            let (phase, peak) = get_max_with_idx(profile);
            if peak > best_power {
                best_bin = i;
                best_phase = phase;
                best_power = peak;
            }
        }

        // runner-up over every cell farther than one chip from the peak
        let exclusion = (code.fs() / CHIP_RATE_HZ).ceil() as usize;
        let mut runner_up = 0.0f64;
        for profile in &powers {
            for (j, &p) in profile.iter().enumerate() {
                let dist = j.abs_diff(best_phase);
                if dist.min(n - dist) > exclusion && p > runner_up {
                    runner_up = p;
                }
            }
        }
        if runner_up <= 0.0 {
            return None;
        }

        let ratio = best_power / runner_up;
        let doppler_hz = -self.doppler_range_hz + best_bin as f64 * self.doppler_step_hz;
        log::debug!(
            "{}: acq sweep: dopp={:5.0} phase={:4} ratio={:.2}",
            sv,
            doppler_hz,
            best_phase,
            ratio
        );

        if ratio < self.threshold_ratio {
            return None;
        }

        let result = AcquisitionResult {
            sv,
            doppler_hz,
            code_phase: best_phase,
            peak_ratio: ratio,
            sample_index: window.sample_index,
        };
        log::info!(
            "{}: {} dopp={:5.0} code_phase={:4} ratio={}",
            sv,
            "ACQUIRED".green(),
            result.doppler_hz,
            result.code_phase,
            format!("{:.2}", ratio).green(),
        );
        Some(result)
    }
}
