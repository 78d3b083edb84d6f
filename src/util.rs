use rustfft::num_complex::Complex64;
use rustfft::FftPlanner;

use crate::constants::PI;

/// Unsigned bit field starting at bit `pos` (MSB-first) of a packed buffer.
pub fn getbitu(buf: &[u8], pos: u32, len: u32) -> u32 {
    let mut bits: u32 = 0;
    for i in pos..pos + len {
        bits = (bits << 1) | ((buf[(i / 8) as usize] >> (7 - i % 8)) as u32 & 1);
    }
    bits
}

/// Signed (two's complement) bit field.
pub fn getbits(buf: &[u8], pos: u32, len: u32) -> i32 {
    let bits = getbitu(buf, pos, len);
    if len == 0 || len >= 32 || bits & (1 << (len - 1)) == 0 {
        return bits as i32;
    }
    (bits | (u32::MAX << len)) as i32
}

/// Unsigned field split across two positions, first part in the high bits.
pub fn getbitu2(buf: &[u8], p1: u32, l1: u32, p2: u32, l2: u32) -> u32 {
    (getbitu(buf, p1, l1) << l2) + getbitu(buf, p2, l2)
}

/// Signed field split across two positions; the sign lives in the first part.
pub fn getbits2(buf: &[u8], p1: u32, l1: u32, p2: u32, l2: u32) -> i32 {
    ((getbits(buf, p1, l1) as i64 * (1i64 << l2)) + getbitu(buf, p2, l2) as i64) as i32
}

/// Pack one-bit-per-byte symbols into a byte buffer, MSB-first.
pub fn pack_bits(syms: &[u8], out: &mut [u8]) {
    for b in out.iter_mut() {
        *b = 0;
    }
    for (i, &s) in syms.iter().enumerate() {
        out[i / 8] |= (s & 1) << (7 - i % 8);
    }
}

/// Parity of the set bits of a word.
pub fn xor_bits(word: u32) -> u8 {
    (word.count_ones() & 1) as u8
}

pub fn hex_str(buf: &[u8], nbits: usize) -> String {
    buf[..(nbits + 7) / 8]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// True when `bits` equals `pattern` (both one bit per byte).
pub fn bmatch_n(pattern: &[u8], bits: &[u8]) -> bool {
    pattern.iter().zip(bits).all(|(&p, &b)| p == b)
}

/// True when `bits` equals the inverse of `pattern`.
pub fn bmatch_r(pattern: &[u8], bits: &[u8]) -> bool {
    pattern.iter().zip(bits).all(|(&p, &b)| p != b)
}

/// Mix a window by `exp(-j 2 pi (f t + phase))`. `phase_cycles` is the
/// carrier phase at the first sample, in cycles.
pub fn doppler_shift(iq_vec: &mut [Complex64], freq_hz: f64, phase_cycles: f64, fs: f64) {
    for (n, iq) in iq_vec.iter_mut().enumerate() {
        let arg = -2.0 * PI * (freq_hz * n as f64 / fs + phase_cycles);
        *iq *= Complex64::new(arg.cos(), arg.sin());
    }
}

/// Circular correlation against a replica given in the frequency domain:
/// IFFT(FFT(x) * conj(C)). Output is scaled by 1/N the way rustfft leaves
/// round trips unscaled.
pub fn calc_correlation(
    fft_planner: &mut FftPlanner<f64>,
    iq_vec: &[Complex64],
    prn_code_fft: &[Complex64],
) -> Vec<Complex64> {
    let n = iq_vec.len();
    assert_eq!(n, prn_code_fft.len());

    let mut v = iq_vec.to_vec();
    fft_planner.plan_fft_forward(n).process(&mut v);

    for (x, c) in v.iter_mut().zip(prn_code_fft) {
        *x *= c.conj();
    }

    fft_planner.plan_fft_inverse(n).process(&mut v);
    for x in v.iter_mut() {
        *x /= n as f64;
    }
    v
}

pub fn get_max_with_idx(v: &[f64]) -> (usize, f64) {
    let mut idx = 0;
    let mut max = f64::MIN;
    for (i, &x) in v.iter().enumerate() {
        if x > max {
            max = x;
            idx = i;
        }
    }
    (idx, max)
}

pub fn pretty_print(n: u64) -> String {
    if n >= 1 << 30 {
        format!("{:.1} GB", n as f64 / (1u64 << 30) as f64)
    } else if n >= 1 << 20 {
        format!("{:.1} MB", n as f64 / (1u64 << 20) as f64)
    } else if n >= 1 << 10 {
        format!("{:.1} KB", n as f64 / (1u64 << 10) as f64)
    } else {
        format!("{} B", n)
    }
}
