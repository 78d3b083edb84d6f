use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use colored::Colorize;
use gnss_rs::sv::SV;
use serde::{Deserialize, Serialize};

use crate::constants::{
    EARTH_MU, EARTH_ROTATION_RATE, P2_19, P2_29, P2_31, P2_33, P2_43, P2_5, P2_55, RELATIVISTIC_F,
    SC2RAD, SECS_PER_WEEK,
};
use crate::errors::Error;
use crate::util::{getbits, getbits2, getbitu, getbitu2};

/// Broadcast clock and Keplerian orbit parameters for one SV, collected
/// from LNAV subframes 1-3. Valid for about two hours around `toe`.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct Ephemeris {
    pub sv: SV,
    pub week: u32,
    pub tow: u32,

    // subframe 1: clock
    pub iodc: u32,
    pub sva: u32,
    pub svh: u32,
    pub tgd: f64,
    pub toc: u32,
    pub f0: f64,
    pub f1: f64,
    pub f2: f64,

    // subframes 2/3: orbit
    pub iode: u32,
    pub crs: f64,
    pub deln: f64,
    pub m0: f64,
    pub cuc: f64,
    pub ecc: f64,
    pub cus: f64,
    pub sqrt_a: f64,
    pub toe: u32,
    pub fit: u32,
    pub cic: f64,
    pub omg0: f64,
    pub cis: f64,
    pub i0: f64,
    pub crc: f64,
    pub omg: f64,
    pub omg_dot: f64,
    pub i_dot: f64,

    // collection bookkeeping, not broadcast fields
    pub have_sf1: bool,
    pub have_sf2: bool,
    pub have_sf3: bool,
    iode_sf2: u32,
    iode_sf3: u32,
}

impl Ephemeris {
    pub fn new(sv: SV) -> Self {
        Self {
            sv,
            ..Default::default()
        }
    }

    pub fn decode_subframe1(&mut self, buf: &[u8]) {
        self.tow = getbitu(buf, 30, 17) * 6;
        self.week = getbitu(buf, 60, 10) + 2048;
        self.sva = getbitu(buf, 72, 4);
        self.svh = getbitu(buf, 76, 6);
        self.iodc = getbitu2(buf, 82, 2, 210, 8);
        self.tgd = getbits(buf, 196, 8) as f64 * P2_31;
        self.toc = getbitu(buf, 218, 16) * 16;
        self.f2 = getbits(buf, 240, 8) as f64 * P2_55;
        self.f1 = getbits(buf, 248, 16) as f64 * P2_43;
        self.f0 = getbits(buf, 270, 22) as f64 * P2_31;
        self.have_sf1 = true;

        log::info!(
            "{}: {} week={} sva={} svh={} iodc={} tgd={:+e} toc={} a0={:+e} a1={:+e} a2={:+e}",
            self.sv,
            "subframe-1".blue(),
            self.week,
            self.sva,
            self.svh,
            self.iodc,
            self.tgd,
            self.toc,
            self.f0,
            self.f1,
            self.f2
        );
    }

    pub fn decode_subframe2(&mut self, buf: &[u8]) {
        self.tow = getbitu(buf, 30, 17) * 6;
        self.iode_sf2 = getbitu(buf, 60, 8);
        self.crs = getbits(buf, 68, 16) as f64 * P2_5;
        self.deln = getbits(buf, 90, 16) as f64 * P2_43 * SC2RAD;
        self.m0 = getbits2(buf, 106, 8, 120, 24) as f64 * P2_31 * SC2RAD;
        self.cuc = getbits(buf, 150, 16) as f64 * P2_29;
        self.ecc = getbitu2(buf, 166, 8, 180, 24) as f64 * P2_33;
        self.cus = getbits(buf, 210, 16) as f64 * P2_29;
        self.sqrt_a = getbitu2(buf, 226, 8, 240, 24) as f64 * P2_19;
        self.toe = getbitu(buf, 270, 16) * 16;
        self.fit = getbitu(buf, 286, 1);
        self.have_sf2 = true;

        log::info!(
            "{}: {} iode={} sqrt_a={:.6} ecc={:+e} m0={:+e} deln={:+e} toe={}",
            self.sv,
            "subframe-2".blue(),
            self.iode_sf2,
            self.sqrt_a,
            self.ecc,
            self.m0,
            self.deln,
            self.toe,
        );
    }

    pub fn decode_subframe3(&mut self, buf: &[u8]) {
        self.tow = getbitu(buf, 30, 17) * 6;
        self.cic = getbits(buf, 60, 16) as f64 * P2_29;
        self.omg0 = getbits2(buf, 76, 8, 90, 24) as f64 * P2_31 * SC2RAD;
        self.cis = getbits(buf, 120, 16) as f64 * P2_29;
        self.i0 = getbits2(buf, 136, 8, 150, 24) as f64 * P2_31 * SC2RAD;
        self.crc = getbits(buf, 180, 16) as f64 * P2_5;
        self.omg = getbits2(buf, 196, 8, 210, 24) as f64 * P2_31 * SC2RAD;
        self.omg_dot = getbits(buf, 240, 24) as f64 * P2_43 * SC2RAD;
        self.iode_sf3 = getbitu(buf, 270, 8);
        self.i_dot = getbits(buf, 278, 14) as f64 * P2_43 * SC2RAD;
        self.have_sf3 = true;

        log::info!(
            "{}: {} iode={} omg0={:+e} i0={:+e} omg={:+e} omgd={:+e} idot={:+e}",
            self.sv,
            "subframe-3".blue(),
            self.iode_sf3,
            self.omg0,
            self.i0,
            self.omg,
            self.omg_dot,
            self.i_dot
        );
    }

    /// All three subframes collected with a consistent issue-of-data.
    /// A subframe-2/3 IODE mismatch means the set straddles an ephemeris
    /// cutover and must be recollected.
    pub fn validate(&mut self) -> Result<bool, Error> {
        if !(self.have_sf1 && self.have_sf2 && self.have_sf3) {
            return Ok(false);
        }
        if self.iode_sf2 != self.iode_sf3 {
            let err = Error::EphemerisInconsistent {
                sv: self.sv,
                iode2: self.iode_sf2,
                iode3: self.iode_sf3,
            };
            // keep the freshest subframes: drop whichever pair is stale
            if self.iode_sf2 < self.iode_sf3 {
                self.have_sf2 = false;
            } else {
                self.have_sf3 = false;
            }
            return Err(err);
        }
        self.iode = self.iode_sf2;
        Ok(true)
    }

    pub fn ready(&self) -> bool {
        self.have_sf1 && self.have_sf2 && self.have_sf3 && self.iode_sf2 == self.iode_sf3
    }

    /// SV clock offset from GPS system time at transmit time `t` (TOW
    /// seconds), including the relativistic eccentricity term, excluding
    /// the group delay (the solver applies TGD per signal).
    pub fn clock_correction(&self, t: f64) -> f64 {
        let dt = wrap_week(t - self.toc as f64);
        let ek = self.eccentric_anomaly(wrap_week(t - self.toe as f64));
        let dt_rel = RELATIVISTIC_F * self.ecc * self.sqrt_a * ek.sin();
        self.f0 + self.f1 * dt + self.f2 * dt * dt + dt_rel
    }

    fn eccentric_anomaly(&self, tk: f64) -> f64 {
        let a = self.sqrt_a * self.sqrt_a;
        let n0 = (EARTH_MU / (a * a * a)).sqrt();
        let n = n0 + self.deln;
        let mk = self.m0 + n * tk;

        let mut ek = mk;
        for _ in 0..30 {
            let prev = ek;
            ek -= (ek - self.ecc * ek.sin() - mk) / (1.0 - self.ecc * ek.cos());
            if (ek - prev).abs() < 1e-12 {
                break;
            }
        }
        ek
    }

    /// ECEF position at transmit time `t` (TOW seconds), IS-GPS-200
    /// table 20-IV.
    pub fn position_ecef(&self, t: f64) -> [f64; 3] {
        let tk = wrap_week(t - self.toe as f64);
        let a = self.sqrt_a * self.sqrt_a;

        let ek = self.eccentric_anomaly(tk);
        let vk = ((1.0 - self.ecc * self.ecc).sqrt() * ek.sin()).atan2(ek.cos() - self.ecc);

        let phi_k = vk + self.omg;
        let duk = self.cus * (2.0 * phi_k).sin() + self.cuc * (2.0 * phi_k).cos();
        let drk = self.crs * (2.0 * phi_k).sin() + self.crc * (2.0 * phi_k).cos();
        let dik = self.cis * (2.0 * phi_k).sin() + self.cic * (2.0 * phi_k).cos();

        let uk = phi_k + duk;
        let rk = a * (1.0 - self.ecc * ek.cos()) + drk;
        let ik = self.i0 + self.i_dot * tk + dik;

        let xp = rk * uk.cos();
        let yp = rk * uk.sin();

        let omega_k = self.omg0 + (self.omg_dot - EARTH_ROTATION_RATE) * tk
            - EARTH_ROTATION_RATE * self.toe as f64;

        [
            xp * omega_k.cos() - yp * ik.cos() * omega_k.sin(),
            xp * omega_k.sin() + yp * ik.cos() * omega_k.cos(),
            yp * ik.sin(),
        ]
    }
}

fn wrap_week(mut dt: f64) -> f64 {
    let half = SECS_PER_WEEK as f64 / 2.0;
    if dt > half {
        dt -= SECS_PER_WEEK as f64;
    } else if dt < -half {
        dt += SECS_PER_WEEK as f64;
    }
    dt
}

/// Persist the latest ephemeris set. JSON keeps every field as-is, so the
/// round trip is exact.
pub fn dump_ephemerides(path: &Path, ephs: &HashMap<SV, Ephemeris>) -> Result<(), Error> {
    let file = File::create(path)?;
    let list: Vec<&Ephemeris> = ephs.values().collect();
    serde_json::to_writer_pretty(BufWriter::new(file), &list)?;
    Ok(())
}

pub fn load_ephemerides(path: &Path) -> Result<HashMap<SV, Ephemeris>, Error> {
    let file = File::open(path)?;
    let list: Vec<Ephemeris> = serde_json::from_reader(BufReader::new(file))?;
    Ok(list.into_iter().map(|e| (e.sv, e)).collect())
}
