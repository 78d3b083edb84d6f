use once_cell::sync::Lazy;

use crate::constants::{NUM_GPS_SATS, PRN_CODE_LEN};

/// G2 output taps per PRN, from IS-GPS-200 table 3-I (1-based stages).
const PRN_TO_G2_TAP: [(usize, usize); NUM_GPS_SATS] = [
    (2, 6),
    (3, 7),
    (4, 8),
    (5, 9),
    (1, 9),
    (2, 10),
    (1, 8),
    (2, 9),
    (3, 10),
    (2, 3),
    (3, 4),
    (5, 6),
    (6, 7),
    (7, 8),
    (8, 9),
    (9, 10),
    (1, 4),
    (2, 5),
    (3, 6),
    (4, 7),
    (5, 8),
    (6, 9),
    (1, 3),
    (4, 6),
    (5, 7),
    (6, 8),
    (7, 9),
    (8, 10),
    (1, 6),
    (2, 7),
    (3, 8),
    (4, 9),
];

static CODES: Lazy<Vec<Vec<u8>>> = Lazy::new(|| {
    (1..=NUM_GPS_SATS).map(gen_code).collect()
});

/// The 1023-chip C/A code of one SV as 0/1 chips. G1 feedback 1+x^3+x^10,
/// G2 feedback 1+x^2+x^3+x^6+x^8+x^9+x^10, both seeded all-ones; the SV
/// code is G1 output xor two G2 stages.
pub fn gen_code(prn: usize) -> Vec<u8> {
    assert!((1..=NUM_GPS_SATS).contains(&prn), "bad PRN {}", prn);
    let (t1, t2) = PRN_TO_G2_TAP[prn - 1];

    let mut g1 = [1u8; 10];
    let mut g2 = [1u8; 10];
    let mut chips = Vec::with_capacity(PRN_CODE_LEN);

    for _ in 0..PRN_CODE_LEN {
        chips.push(g1[9] ^ g2[t1 - 1] ^ g2[t2 - 1]);

        let f1 = g1[2] ^ g1[9];
        let f2 = g2[1] ^ g2[2] ^ g2[5] ^ g2[7] ^ g2[8] ^ g2[9];
        g1.rotate_right(1);
        g2.rotate_right(1);
        g1[0] = f1;
        g2[0] = f2;
    }
    chips
}

/// Cached chips for one SV, ±1-valued (chip bit 1 maps to +1).
pub fn prn_chips(prn: usize) -> Vec<i8> {
    CODES[prn - 1]
        .iter()
        .map(|&c| if c == 1 { 1i8 } else { -1i8 })
        .collect()
}
