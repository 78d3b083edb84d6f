use serde::{Deserialize, Serialize};

use crate::constants::{
    P2_11, P2_19, P2_20, P2_21, P2_23, P2_24, P2_27, P2_30, P2_38, P2_50, SC2RAD,
};
use crate::util::{getbits, getbits2, getbitu};

/// Reduced-precision orbit of one SV from the subframe 4/5 almanac pages.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct Almanac {
    pub prn: u32,
    pub svh: u32,
    pub svconf: u32,
    pub ecc: f64,
    pub toas: u32,
    pub delta_i: f64,
    pub omg_dot: f64,
    pub sqrt_a: f64,
    pub omg0: f64,
    pub omg: f64,
    pub m0: f64,
    pub f0: f64,
    pub f1: f64,
    pub week: u32,
}

impl Almanac {
    pub fn decode(&mut self, buf: &[u8], prn: u32) {
        self.prn = prn;
        self.ecc = getbitu(buf, 68, 16) as f64 * P2_21;
        self.toas = getbitu(buf, 90, 8) * 4096;
        self.delta_i = getbits(buf, 98, 16) as f64 * P2_19 * SC2RAD;
        self.omg_dot = getbits(buf, 120, 16) as f64 * P2_38 * SC2RAD;
        self.svh = getbitu(buf, 136, 8);
        self.sqrt_a = getbitu(buf, 150, 24) as f64 * P2_11;
        self.omg0 = getbits(buf, 180, 24) as f64 * P2_23 * SC2RAD;
        self.omg = getbits(buf, 210, 24) as f64 * P2_23 * SC2RAD;
        self.m0 = getbits(buf, 240, 24) as f64 * P2_23 * SC2RAD;
        self.f0 = getbits2(buf, 270, 8, 289, 3) as f64 * P2_20;
        self.f1 = getbits(buf, 278, 11) as f64 * P2_38;
    }
}

/// Klobuchar ionosphere model coefficients, subframe 4 page 18.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct IonoParams {
    pub alpha: [f64; 4],
    pub beta: [f64; 4],
}

impl IonoParams {
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            alpha: [
                getbits(buf, 68, 8) as f64 * P2_30,
                getbits(buf, 76, 8) as f64 * P2_27,
                getbits(buf, 90, 8) as f64 * P2_24,
                getbits(buf, 98, 8) as f64 * P2_24,
            ],
            beta: [
                getbits(buf, 106, 8) as f64 * 2.0_f64.powi(11),
                getbits(buf, 120, 8) as f64 * 2.0_f64.powi(14),
                getbits(buf, 128, 8) as f64 * 2.0_f64.powi(16),
                getbits(buf, 136, 8) as f64 * 2.0_f64.powi(16),
            ],
        }
    }
}

/// UTC offset parameters, subframe 4 page 18.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct UtcParams {
    pub a0: f64,
    pub a1: f64,
    pub tot: u32,
    pub wnt: u32,
    pub dt_ls: i32,
}

impl UtcParams {
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            a0: getbits2(buf, 180, 24, 210, 8) as f64 * P2_30,
            a1: getbits(buf, 150, 24) as f64 * P2_50,
            tot: getbitu(buf, 218, 8) * 4096,
            wnt: getbitu(buf, 226, 8),
            dt_ls: getbits(buf, 240, 8),
        }
    }
}

/// Almanac state shared by all channels: one slot per PRN plus the
/// ionosphere/UTC terms from page 18.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlmanacSet {
    pub entries: Vec<Almanac>,
    pub iono: Option<IonoParams>,
    pub utc: Option<UtcParams>,
}

impl Default for AlmanacSet {
    fn default() -> Self {
        Self {
            entries: vec![Almanac::default(); 32],
            iono: None,
            utc: None,
        }
    }
}

impl AlmanacSet {
    /// Subframe 4: almanac for SVs 25-32 plus the special pages (18 =
    /// iono/UTC, 25 = SV configuration and health).
    pub fn decode_subframe4(&mut self, buf: &[u8]) {
        let data_id = getbitu(buf, 60, 2);
        let svid = getbitu(buf, 62, 6);
        if data_id != 1 {
            return;
        }

        match svid {
            25..=32 => self.entries[svid as usize - 1].decode(buf, svid),
            56 => {
                // page 18
                self.iono = Some(IonoParams::decode(buf));
                self.utc = Some(UtcParams::decode(buf));
            }
            63 => {
                // page 25: health summary for SVs 25-32
                const SVH_POS: [u32; 8] = [228, 240, 246, 252, 258, 270, 276, 282];
                for (i, &pos) in SVH_POS.iter().enumerate() {
                    self.entries[24 + i].svh = getbitu(buf, pos, 6);
                }
            }
            _ => {}
        }
    }

    /// Subframe 5: almanac for SVs 1-24; page 25 carries the almanac
    /// reference time/week and health for SVs 1-24.
    pub fn decode_subframe5(&mut self, buf: &[u8]) {
        let data_id = getbitu(buf, 60, 2);
        let svid = getbitu(buf, 62, 6);
        if data_id != 1 {
            return;
        }

        match svid {
            1..=24 => self.entries[svid as usize - 1].decode(buf, svid),
            51 => {
                let toas = getbitu(buf, 68, 8) * 4096;
                let week = getbitu(buf, 76, 8) + 2048;
                const SVH_POS: [u32; 24] = [
                    90, 96, 102, 108, 120, 126, 132, 138, 150, 156, 162, 168, 180, 186, 192, 198,
                    210, 216, 222, 228, 240, 246, 252, 258,
                ];
                for (i, &pos) in SVH_POS.iter().enumerate() {
                    self.entries[i].svh = getbitu(buf, pos, 6);
                }
                for alm in self.entries.iter_mut() {
                    alm.toas = toas;
                    alm.week = week;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setbitu(buf: &mut [u8], pos: u32, len: u32, value: u32) {
        for i in 0..len {
            let bit = (value >> (len - 1 - i)) & 1;
            let p = pos + i;
            if bit == 1 {
                buf[(p / 8) as usize] |= 1 << (7 - p % 8);
            }
        }
    }

    #[test]
    fn subframe5_almanac_page_fills_entry() {
        let mut buf = [0u8; 38];
        setbitu(&mut buf, 60, 2, 1); // data id
        setbitu(&mut buf, 62, 6, 7); // svid 7
        setbitu(&mut buf, 68, 16, 0x0400);
        setbitu(&mut buf, 90, 8, 100);
        setbitu(&mut buf, 150, 24, 0xA0_0000);

        let mut set = AlmanacSet::default();
        set.decode_subframe5(&buf);

        let alm = &set.entries[6];
        assert_eq!(alm.prn, 7);
        assert_eq!(alm.toas, 409_600);
        assert_eq!(alm.ecc, 0x0400 as f64 * P2_21);
        assert_eq!(alm.sqrt_a, 0xA0_0000 as f64 * P2_11);
    }

    #[test]
    fn page18_yields_iono_and_utc() {
        let mut buf = [0u8; 38];
        setbitu(&mut buf, 60, 2, 1);
        setbitu(&mut buf, 62, 6, 56);
        setbitu(&mut buf, 68, 8, 0x12); // alpha0 raw
        setbitu(&mut buf, 240, 8, 18); // leap seconds

        let mut set = AlmanacSet::default();
        set.decode_subframe4(&buf);

        let iono = set.iono.expect("iono decoded");
        assert_eq!(iono.alpha[0], 0x12 as f64 * P2_30);
        assert_eq!(set.utc.expect("utc decoded").dt_ls, 18);
    }
}
