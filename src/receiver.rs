use std::collections::{HashMap, VecDeque};

use colored::Colorize;
use gnss_rs::constellation::Constellation;
use gnss_rs::sv::SV;
use rayon::prelude::*;
use rustfft::num_complex::Complex64;

use crate::acquisition::Acquisition;
use crate::channel::{Channel, State};
use crate::code::Code;
use crate::config::Config;
use crate::constants::NUM_GPS_SATS;
use crate::ephemeris::Ephemeris;
use crate::errors::Error;
use crate::event::{ChannelErrorKind, Event, EventSink};
use crate::recording::IQRecording;
use crate::solver;
use crate::types::{Fix, IQSample};

/// One acquisition attempt is scheduled this many code periods apart.
const ACQ_PERIOD_EPOCHS: u64 = 20;
/// Fix attempts are rate limited to once a second.
const FIX_PERIOD_SEC: f64 = 1.0;

/// The orchestrator: owns the sample source, the acquisition engine and
/// the per-SV channels, routes every code period of samples through the
/// pipeline and publishes what happens.
pub struct Receiver {
    cfg: Config,
    code: Code,
    recording: IQRecording,
    acquisition: Acquisition,
    channels: HashMap<SV, Channel>,
    /// Latest validated ephemeris per SV, replaced on issue-of-data change.
    ephemerides: HashMap<SV, Ephemeris>,

    /// Rolling window for acquisition, `acquisition_integration_ms` long.
    acq_buffer: VecDeque<Complex64>,
    /// Two code periods of samples; the second is the current epoch.
    window: Vec<Complex64>,
    epoch: u64,
    sample_index: u64,
    ts_sec: f64,

    next_acq_prn: usize,
    last_fix_ts: f64,
    has_fix: bool,
    num_fixes: usize,
    latest_fix: Option<Fix>,
    events: EventSink,
}

impl Receiver {
    pub fn new(cfg: Config, recording: IQRecording, events: EventSink) -> Result<Self, Error> {
        cfg.validate()?;
        let code = Code::new(cfg.sample_rate_hz);
        let acquisition = Acquisition::new(
            cfg.acquisition_doppler_range_hz,
            cfg.acquisition_doppler_step_hz,
            cfg.acquisition_threshold_ratio,
        );
        Ok(Self {
            cfg,
            code,
            recording,
            acquisition,
            channels: HashMap::new(),
            ephemerides: HashMap::new(),
            acq_buffer: VecDeque::new(),
            window: Vec::new(),
            epoch: 0,
            sample_index: 0,
            ts_sec: 0.0,
            next_acq_prn: 1,
            last_fix_ts: 0.0,
            has_fix: false,
            num_fixes: 0,
            latest_fix: None,
            events,
        })
    }

    pub fn num_fixes(&self) -> usize {
        self.num_fixes
    }

    pub fn latest_fix(&self) -> Option<Fix> {
        self.latest_fix
    }

    pub fn ephemerides(&self) -> &HashMap<SV, Ephemeris> {
        &self.ephemerides
    }

    /// Consume one code period of samples and run every pipeline stage
    /// that is due. Errors other than source exhaustion do not occur here;
    /// SV-local trouble stays inside the channels.
    pub fn process_step(&mut self) -> Result<(), Error> {
        let n = self.code.samples_per_code();
        self.fetch_samples(n)?;

        self.try_acquisition();

        // every channel gets the same two-period window; the per-SV loops
        // are independent once seeded
        let window = std::mem::take(&mut self.window);
        let (sample_index, ts_sec) = (self.sample_index, self.ts_sec);
        self.channels
            .par_iter_mut()
            .for_each(|(_, ch)| ch.process_samples(&window, sample_index, ts_sec));
        self.window = window;

        self.reap_channels();
        self.harvest_ephemerides();

        if self.ts_sec - self.last_fix_ts >= FIX_PERIOD_SEC {
            self.last_fix_ts = self.ts_sec;
            self.try_fix();
        }
        Ok(())
    }

    pub fn run(&mut self, max_duration_sec: Option<f64>) -> Result<(), Error> {
        loop {
            if let Some(limit) = max_duration_sec {
                if self.ts_sec >= limit {
                    return Ok(());
                }
            }
            match self.process_step() {
                Ok(()) => {}
                Err(Error::SampleSourceExhausted { samples_read }) => {
                    log::info!("sample source dry after {} samples", samples_read);
                    if self.num_fixes > 0 {
                        return Ok(());
                    }
                    return Err(Error::SampleSourceExhausted { samples_read });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fetch_samples(&mut self, n: usize) -> Result<(), Error> {
        if self.window.is_empty() {
            self.window = self.recording.read_samples(2 * n)?;
            self.epoch = 1;
        } else {
            let fresh = self.recording.read_samples(n)?;
            self.window.drain(..n);
            self.window.extend_from_slice(&fresh);
            self.epoch += 1;
        }
        self.sample_index = self.epoch * n as u64;
        self.ts_sec = self.sample_index as f64 / self.cfg.sample_rate_hz;

        let acq_len = self.cfg.acquisition_integration_ms * n;
        self.acq_buffer.extend(self.window[n..].iter().copied());
        while self.acq_buffer.len() > acq_len {
            self.acq_buffer.pop_front();
        }
        Ok(())
    }

    /// Round-robin one untracked PRN through the acquirer, a widened
    /// Doppler net as long as no fix bounds the oscillator offset.
    fn try_acquisition(&mut self) {
        let acq_len = self.cfg.acquisition_integration_ms * self.code.samples_per_code();
        if self.channels.len() >= self.cfg.max_concurrent_tracked_svs
            || self.acq_buffer.len() < acq_len
            || self.epoch % ACQ_PERIOD_EPOCHS != 0
        {
            return;
        }

        let Some(sv) = self.pick_acquisition_candidate() else {
            return;
        };

        self.acquisition.doppler_range_hz = if self.has_fix {
            self.cfg.acquisition_doppler_range_hz
        } else {
            2.0 * self.cfg.acquisition_doppler_range_hz
        };

        let window = IQSample {
            iq_vec: self.acq_buffer.iter().cloned().collect(),
            ts_sec: self.ts_sec,
            sample_index: self.sample_index,
        };

        match self.acquisition.try_acquire(&self.code, sv, &window) {
            Some(result) => {
                self.events.publish(
                    self.ts_sec,
                    Event::Acquired {
                        sv,
                        doppler_hz: result.doppler_hz,
                        code_phase: result.code_phase,
                        peak_ratio: result.peak_ratio,
                    },
                );
                self.channels
                    .insert(sv, Channel::new(&self.code, &self.cfg, &result));
            }
            None => {
                self.events.publish(
                    self.ts_sec,
                    Event::ChannelError {
                        sv,
                        kind: ChannelErrorKind::AcquisitionFailed,
                    },
                );
            }
        }
    }

    fn pick_acquisition_candidate(&mut self) -> Option<SV> {
        for _ in 0..NUM_GPS_SATS {
            let prn = self.next_acq_prn;
            self.next_acq_prn = self.next_acq_prn % NUM_GPS_SATS + 1;
            let sv = SV::new(Constellation::GPS, prn as u8);
            if !self.channels.contains_key(&sv) {
                return Some(sv);
            }
        }
        None
    }

    /// Publish channel events and release the slots of demoted SVs.
    fn reap_channels(&mut self) {
        let ts = self.ts_sec;
        let mut dead = Vec::new();
        for (sv, ch) in self.channels.iter_mut() {
            for ev in ch.take_events() {
                self.events.publish(ts, ev);
            }
            if ch.state == State::Unlocked {
                dead.push(*sv);
            }
        }
        for sv in dead {
            self.channels.remove(&sv);
        }
    }

    fn harvest_ephemerides(&mut self) {
        for (sv, ch) in self.channels.iter() {
            if !ch.nav.eph.ready() {
                continue;
            }
            let fresh = ch.nav.eph;
            let replace = match self.ephemerides.get(sv) {
                Some(stored) => stored.iode != fresh.iode,
                None => true,
            };
            if replace {
                self.ephemerides.insert(*sv, fresh);
            }
        }
    }

    fn try_fix(&mut self) {
        let candidates: Vec<_> = self
            .channels
            .values()
            .filter(|ch| ch.nav.eph.ready())
            .filter_map(|ch| ch.observation().map(|obs| (obs, ch.nav.eph)))
            .collect();
        if candidates.len() < 4 {
            return;
        }

        log::info!(
            "t={:.3} -- {} with {} SVs",
            self.ts_sec,
            "attempting fix".yellow(),
            candidates.len()
        );
        match solver::solve(&candidates, self.cfg.sample_rate_hz) {
            Ok(fix) => {
                self.has_fix = true;
                self.num_fixes += 1;
                self.latest_fix = Some(fix);
                self.events.publish(self.ts_sec, Event::Fix(fix));
            }
            Err(e) => {
                // a bad fix cycle never tears the pipeline down
                log::warn!("fix skipped: {}", e);
            }
        }
    }
}
