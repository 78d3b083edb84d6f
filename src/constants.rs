pub const PI: f64 = std::f64::consts::PI;

pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
pub const L1CA_HZ: f64 = 1.57542e9;
pub const CHIP_RATE_HZ: f64 = 1.023e6;

pub const PRN_CODE_LEN: usize = 1023;
pub const NUM_GPS_SATS: usize = 32;
pub const CODE_PERIOD_SEC: f64 = 0.001;

/// 20 code periods per LNAV bit, 50 bps.
pub const CODE_PERIODS_PER_BIT: usize = 20;
pub const BITS_PER_SUBFRAME: usize = 300;
pub const SUBFRAME_SEC: f64 = 6.0;

pub const SECS_PER_WEEK: u32 = 7 * 24 * 60 * 60;

/// WGS-84 earth gravitational constant (m^3/s^2).
pub const EARTH_MU: f64 = 3.986005e14;
/// WGS-84 earth rotation rate (rad/s).
pub const EARTH_ROTATION_RATE: f64 = 7.2921151467e-5;
/// Relativistic clock correction constant (s/sqrt(m)).
pub const RELATIVISTIC_F: f64 = -4.442807633e-10;

/// Semicircles to radians.
pub const SC2RAD: f64 = PI;

// LNAV scale factors, power-of-two steps from IS-GPS-200.
pub const P2_5: f64 = 0.03125;
pub const P2_11: f64 = 4.882812500000000e-04;
pub const P2_19: f64 = 1.907348632812500e-06;
pub const P2_20: f64 = 9.536743164062500e-07;
pub const P2_21: f64 = 4.768371582031250e-07;
pub const P2_23: f64 = 1.192092895507810e-07;
pub const P2_24: f64 = 5.960464477539063e-08;
pub const P2_27: f64 = 7.450580596923828e-09;
pub const P2_29: f64 = 1.862645149230957e-09;
pub const P2_30: f64 = 9.313225746154785e-10;
pub const P2_31: f64 = 4.656612873077393e-10;
pub const P2_33: f64 = 1.164153218269348e-10;
pub const P2_38: f64 = 3.637978807091713e-12;
pub const P2_43: f64 = 1.136868377216160e-13;
pub const P2_50: f64 = 8.881784197001252e-16;
pub const P2_55: f64 = 2.775557561562891e-17;
