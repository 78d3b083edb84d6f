use std::collections::VecDeque;

use colored::Colorize;
use gnss_rs::sv::SV;
use rustfft::num_complex::Complex64;

use crate::code::Code;
use crate::config::Config;
use crate::constants::{CHIP_RATE_HZ, CODE_PERIOD_SEC, L1CA_HZ, PRN_CODE_LEN};
use crate::event::{ChannelErrorKind, Event};
use crate::navigation::Navigation;
use crate::types::{AcquisitionResult, Observation};
use crate::util::doppler_shift;

/// Early/late correlator spacing from the prompt, in chips.
const SP_CORR: f64 = 0.5;
/// Frequency pull-in time before the Costas loop takes over.
const T_PULLIN: f64 = 0.5;
/// Wide/narrow FLL bandwidths during pull-in (Hz).
const B_FLL_WIDE: f64 = 10.0;
const B_FLL_NARROW: f64 = 2.0;
/// Non-coherent integration span of the DLL discriminator, in epochs.
const DLL_EPOCHS: usize = 10;

/// Lock detector: mean(|I|)^2 / mean(Q^2) over this many epochs.
const LOCK_WINDOW_EPOCHS: usize = 200;
const LOCK_RATIO_MIN: f64 = 2.0;
/// Failing the detector for this long demotes the channel.
const LOCK_FAIL_LIMIT_SEC: f64 = 2.0;
/// A channel that never passes the detector is given this long.
const PULLIN_DEADLINE_SEC: f64 = 1.5;

const PROMPT_HISTORY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    PullIn,
    Locked,
    Unlocked,
}

#[derive(Default)]
struct Tracking {
    doppler_hz: f64,
    /// Offset of the code epoch boundary on the receiver sample grid.
    code_off_sec: f64,
    /// Accumulated Doppler, in carrier cycles.
    adr_cycles: f64,
    err_phase: f64,
    sum_corr_e: f64,
    sum_corr_l: f64,
    cn0: f64,
    lock_i: f64,
    lock_q2: f64,
    lock_window: usize,
    lock_ratio: f64,
    lock_fail_sec: f64,
}

/// One tracked SV: carrier and code NCOs, their loop filters, the lock
/// state machine and the LNAV decoder fed by the prompt correlator.
pub struct Channel {
    pub sv: SV,
    fs: f64,
    samples_per_code: usize,
    spacing_samples: usize,
    replica: Vec<Complex64>,
    pll_bandwidth_hz: f64,
    dll_bandwidth_hz: f64,

    pub state: State,
    pub ts_sec: f64,
    num_epochs: u64,
    pullin_epochs: u64,
    last_sample_index: Option<u64>,
    last_rx_sample: f64,

    trk: Tracking,
    prompt_hist: VecDeque<Complex64>,
    pub nav: Navigation,
    events: Vec<Event>,
}

impl Channel {
    pub fn new(code: &Code, cfg: &Config, acq: &AcquisitionResult) -> Self {
        let fs = code.fs();
        Self {
            sv: acq.sv,
            fs,
            samples_per_code: code.samples_per_code(),
            spacing_samples: ((SP_CORR * fs / CHIP_RATE_HZ).round() as usize).max(1),
            replica: code.replica(acq.sv.prn as usize).to_vec(),
            pll_bandwidth_hz: cfg.pll_bandwidth_hz,
            dll_bandwidth_hz: cfg.dll_bandwidth_hz,
            state: State::PullIn,
            ts_sec: 0.0,
            num_epochs: 0,
            pullin_epochs: 0,
            last_sample_index: None,
            last_rx_sample: 0.0,
            trk: Tracking {
                doppler_hz: acq.doppler_hz,
                code_off_sec: acq.code_phase as f64 / fs,
                ..Default::default()
            },
            prompt_hist: VecDeque::with_capacity(PROMPT_HISTORY),
            nav: Navigation::new(acq.sv),
            events: Vec::new(),
        }
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn cn0(&self) -> f64 {
        self.trk.cn0
    }

    pub fn doppler_hz(&self) -> f64 {
        self.trk.doppler_hz
    }

    /// Consume one code period. `iq_window` spans two code periods, the
    /// second starting at absolute `sample_index`.
    pub fn process_samples(&mut self, iq_window: &[Complex64], sample_index: u64, ts_sec: f64) {
        assert_eq!(iq_window.len(), 2 * self.samples_per_code);
        if let Some(last) = self.last_sample_index {
            assert!(
                sample_index > last,
                "{}: samples out of order: {} after {}",
                self.sv,
                sample_index,
                last
            );
        }
        self.last_sample_index = Some(sample_index);
        self.ts_sec = ts_sec;

        if self.state != State::Unlocked {
            self.track_epoch(iq_window, sample_index);
        }
    }

    /// Advance the NCOs by one code period and return the window offset
    /// of the next code boundary. The code rate is slaved to the carrier
    /// (chip clock and carrier come from the same SV oscillator).
    fn update_nco(&mut self, sample_index: u64) -> (usize, f64) {
        let tau = CODE_PERIOD_SEC;
        let n = self.samples_per_code;

        self.trk.adr_cycles += self.trk.doppler_hz * tau;
        self.trk.code_off_sec -= self.trk.doppler_hz / L1CA_HZ * tau;

        let mut code_off = (self.trk.code_off_sec * self.fs) % n as f64;
        if code_off < 0.0 {
            code_off += n as f64;
        }
        let code_idx = (code_off as usize).min(n - 1);

        // carrier phase at the slice start, in cycles
        let phi = self.trk.adr_cycles + self.trk.doppler_hz * code_idx as f64 / self.fs;

        self.last_rx_sample = (sample_index - n as u64) as f64 + code_off;
        (code_idx, phi)
    }

    fn correlate(
        &self,
        window: &[Complex64],
        code_idx: usize,
        phi: f64,
    ) -> (Complex64, Complex64, Complex64) {
        let n = self.samples_per_code;
        let mut signal = window[code_idx..code_idx + n].to_vec();
        doppler_shift(&mut signal, self.trk.doppler_hz, phi, self.fs);

        let d = self.spacing_samples;
        let mut prompt = Complex64::default();
        let mut early = Complex64::default();
        let mut late = Complex64::default();
        for j in 0..n {
            let s = signal[j];
            prompt += s * self.replica[j];
            early += s * self.replica[(j + d) % n];
            late += s * self.replica[(j + n - d) % n];
        }
        let scale = n as f64;
        (prompt / scale, early / scale, late / scale)
    }

    /// Cross/dot frequency discriminator over the last two prompts.
    fn run_fll(&mut self) {
        if self.prompt_hist.len() < 2 {
            return;
        }
        let c1 = self.prompt_hist[self.prompt_hist.len() - 1];
        let c2 = self.prompt_hist[self.prompt_hist.len() - 2];
        let dot = c1.re * c2.re + c1.im * c2.im;
        let cross = c1.re * c2.im - c1.im * c2.re;
        if dot == 0.0 {
            return;
        }

        let b = if (self.pullin_epochs as f64) * CODE_PERIOD_SEC < T_PULLIN / 2.0 {
            B_FLL_WIDE
        } else {
            B_FLL_NARROW
        };
        let err_freq = (cross / dot).atan() / (2.0 * crate::constants::PI);
        self.trk.doppler_hz -= b / 0.25 * err_freq;
    }

    /// Costas discriminator, insensitive to the data-bit sign.
    fn run_pll(&mut self, prompt: Complex64) {
        if prompt.re == 0.0 {
            return;
        }
        let err_phase = (prompt.im / prompt.re).atan() / (2.0 * crate::constants::PI);
        let w = self.pll_bandwidth_hz / 0.53;
        self.trk.doppler_hz +=
            1.4 * w * (err_phase - self.trk.err_phase) + w * w * err_phase * CODE_PERIOD_SEC;
        self.trk.err_phase = err_phase;
    }

    /// Normalized non-coherent early-late discriminator, integrated over
    /// DLL_EPOCHS periods.
    fn run_dll(&mut self, early: Complex64, late: Complex64) {
        self.trk.sum_corr_e += early.norm();
        self.trk.sum_corr_l += late.norm();
        if self.num_epochs % DLL_EPOCHS as u64 != DLL_EPOCHS as u64 - 1 {
            return;
        }

        let e = self.trk.sum_corr_e;
        let l = self.trk.sum_corr_l;
        self.trk.sum_corr_e = 0.0;
        self.trk.sum_corr_l = 0.0;
        if e + l == 0.0 {
            return;
        }
        let err_sec = (e - l) / (e + l) / 2.0 * CODE_PERIOD_SEC / PRN_CODE_LEN as f64;
        self.trk.code_off_sec -=
            self.dll_bandwidth_hz / 0.25 * err_sec * CODE_PERIOD_SEC * DLL_EPOCHS as f64;
    }

    /// C/N0 from the narrowband SNR of the last 20 prompts, smoothed.
    fn update_cn0(&mut self) {
        if self.num_epochs % 20 != 19 || self.prompt_hist.len() < 20 {
            return;
        }
        let tail = self.prompt_hist.len() - 20;
        let n = 20.0;
        let p_sig = {
            let sum: f64 = self.prompt_hist.iter().skip(tail).map(|c| c.re.abs()).sum();
            (sum / n).powi(2)
        };
        let p_tot: f64 = self.prompt_hist.iter().skip(tail).map(|c| c.norm_sqr()).sum::<f64>() / n;
        if p_tot <= p_sig {
            return;
        }
        let snr = p_sig / (p_tot - p_sig);
        let cn0 = 10.0 * snr.log10() - 10.0 * CODE_PERIOD_SEC.log10();
        self.trk.cn0 += 0.5 * (cn0 - self.trk.cn0);
    }

    fn update_lock_detector(&mut self, prompt: Complex64) {
        // |I| folds out the data-bit sign, which would average I to zero
        self.trk.lock_i += prompt.re.abs();
        self.trk.lock_q2 += prompt.im * prompt.im;
        self.trk.lock_window += 1;
        if self.trk.lock_window < LOCK_WINDOW_EPOCHS {
            return;
        }

        let mean_i = self.trk.lock_i / LOCK_WINDOW_EPOCHS as f64;
        let mean_q2 = self.trk.lock_q2 / LOCK_WINDOW_EPOCHS as f64;
        self.trk.lock_ratio = if mean_q2 > 0.0 {
            mean_i * mean_i / mean_q2
        } else {
            f64::INFINITY
        };
        self.trk.lock_i = 0.0;
        self.trk.lock_q2 = 0.0;
        self.trk.lock_window = 0;

        let window_sec = LOCK_WINDOW_EPOCHS as f64 * CODE_PERIOD_SEC;
        let pullin_sec = self.pullin_epochs as f64 * CODE_PERIOD_SEC;

        match self.state {
            State::PullIn => {
                if pullin_sec >= T_PULLIN && self.trk.lock_ratio >= LOCK_RATIO_MIN {
                    self.state = State::Locked;
                    log::info!(
                        "{}: {} cn0={:.1} dopp={:5.0} ts={:.3}",
                        self.sv,
                        "LOCK".green(),
                        self.trk.cn0,
                        self.trk.doppler_hz,
                        self.ts_sec
                    );
                    self.events.push(Event::Locked {
                        sv: self.sv,
                        cn0: self.trk.cn0,
                    });
                } else if pullin_sec >= PULLIN_DEADLINE_SEC {
                    self.demote();
                }
            }
            State::Locked => {
                if self.trk.lock_ratio < LOCK_RATIO_MIN {
                    self.trk.lock_fail_sec += window_sec;
                    if self.trk.lock_fail_sec >= LOCK_FAIL_LIMIT_SEC {
                        self.demote();
                    }
                } else {
                    self.trk.lock_fail_sec = 0.0;
                }
            }
            State::Unlocked => {}
        }
    }

    fn demote(&mut self) {
        log::warn!(
            "{}: {} cn0={:.1} ts={:.3}",
            self.sv,
            "LOST".red(),
            self.trk.cn0,
            self.ts_sec
        );
        self.state = State::Unlocked;
        self.events.push(Event::ChannelError {
            sv: self.sv,
            kind: ChannelErrorKind::LockLost,
        });
        self.events.push(Event::Unlocked { sv: self.sv });
    }

    fn track_epoch(&mut self, window: &[Complex64], sample_index: u64) {
        let (code_idx, phi) = self.update_nco(sample_index);
        let (prompt, early, late) = self.correlate(window, code_idx, phi);

        self.prompt_hist.push_back(prompt);
        if self.prompt_hist.len() > PROMPT_HISTORY {
            self.prompt_hist.pop_front();
        }

        if self.state == State::PullIn
            && (self.pullin_epochs as f64) * CODE_PERIOD_SEC < T_PULLIN
        {
            self.run_fll();
        } else {
            self.run_pll(prompt);
        }
        self.run_dll(early, late);
        self.update_cn0();
        self.update_lock_detector(prompt);

        if self.state == State::Locked {
            self.nav.process_prompt(prompt, self.num_epochs, self.ts_sec);
            self.events.append(&mut self.nav.take_events());
        }

        self.num_epochs += 1;
        if self.state == State::PullIn {
            self.pullin_epochs += 1;
        }
    }

    /// Snapshot for the solver: LNAV transmit time of the latest code
    /// boundary against the receiver sample it landed on.
    pub fn observation(&self) -> Option<Observation> {
        if self.state != State::Locked || self.num_epochs == 0 {
            return None;
        }
        let tow_base = self.nav.tow_base_sec?;
        let latest_epoch = self.num_epochs - 1;
        let tow_tx_sec =
            tow_base + (latest_epoch as i64 - self.nav.tow_epoch as i64) as f64 * CODE_PERIOD_SEC;
        Some(Observation {
            sv: self.sv,
            tow_tx_sec,
            rx_sample: self.last_rx_sample,
            doppler_hz: self.trk.doppler_hz,
            cn0: self.trk.cn0,
        })
    }
}
