use colored::Colorize;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3, Vector4};

use crate::constants::{EARTH_ROTATION_RATE, SPEED_OF_LIGHT};
use crate::ephemeris::Ephemeris;
use crate::errors::Error;
use crate::types::{Fix, Observation};

const MAX_ITER: usize = 10;
const CONVERGENCE_M: f64 = 1.0e-4;
const MAX_CONDITION: f64 = 1.0e6;
/// Nominal signal transit time pinning the receiver epoch; whatever it is
/// off by lands in the estimated clock bias.
const NOMINAL_TRANSIT_SEC: f64 = 68.802e-3;

// WGS-84 ellipsoid
const WGS84_A: f64 = 6378137.0;
const WGS84_F: f64 = 1.0 / 298.257223563;

#[derive(Debug, Clone, Copy)]
pub struct Dops {
    pub hdop: f64,
    pub vdop: f64,
    pub pdop: f64,
}

/// Rotate an ECEF position into the reception-epoch frame: the Earth
/// turns under the signal while it is in flight.
fn sagnac_rotate(pos: [f64; 3], transit_sec: f64) -> [f64; 3] {
    let theta = EARTH_ROTATION_RATE * transit_sec;
    let (sin_t, cos_t) = theta.sin_cos();
    [
        cos_t * pos[0] + sin_t * pos[1],
        -sin_t * pos[0] + cos_t * pos[1],
        pos[2],
    ]
}

fn ecef_to_geodetic(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let lon = y.atan2(x);
    let p = (x * x + y * y).sqrt();

    let mut lat = (z / (p * (1.0 - e2))).atan();
    let mut height = 0.0;
    for _ in 0..8 {
        let sin_lat = lat.sin();
        let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        height = p / lat.cos() - n;
        lat = (z / (p * (1.0 - e2 * n / (n + height)))).atan();
    }
    (lat, lon, height)
}

/// Iterative linearized least squares over (x, y, z, b). Pure geometry:
/// the pseudoranges handed in are already corrected for SV clock, TGD and
/// earth rotation. Returns the state, the DOPs and the iteration count.
pub(crate) fn least_squares(
    sv_pos: &[[f64; 3]],
    pseudoranges: &[f64],
) -> Result<(Vector4<f64>, Dops, usize), Error> {
    let n = sv_pos.len();
    assert!(n >= 4, "solver needs at least 4 SVs, got {}", n);
    assert_eq!(n, pseudoranges.len());

    let mut x = Vector4::zeros();

    for iter in 0..MAX_ITER {
        let mut h = DMatrix::from_element(n, 4, 0.0);
        let mut v = DVector::from_element(n, 0.0);

        for i in 0..n {
            let p = Vector3::<f64>::new(sv_pos[i][0] - x[0], sv_pos[i][1] - x[1], sv_pos[i][2] - x[2]);
            let range = p.norm();
            v[i] = pseudoranges[i] - range - x[3];
            for j in 0..3 {
                h[(i, j)] = -p[j] / range;
            }
            h[(i, 3)] = 1.0;
        }

        let svd = h.clone().svd(false, false);
        let s_max = svd.singular_values.iter().cloned().fold(f64::MIN, f64::max);
        let s_min = svd.singular_values.iter().cloned().fold(f64::MAX, f64::min);
        let cond = s_max / s_min;
        if !cond.is_finite() || cond > MAX_CONDITION {
            return Err(Error::GeometrySingular { cond });
        }

        let q = (h.tr_mul(&h))
            .try_inverse()
            .ok_or(Error::GeometrySingular { cond })?;
        let dx = &q * h.tr_mul(&v);
        x += Vector4::new(dx[0], dx[1], dx[2], dx[3]);

        if dx.norm() < CONVERGENCE_M {
            let dops = compute_dops(&q, x[0], x[1], x[2]);
            return Ok((x, dops, iter + 1));
        }
    }

    Err(Error::GeometrySingular { cond: f64::INFINITY })
}

fn compute_dops(q: &DMatrix<f64>, x: f64, y: f64, z: f64) -> Dops {
    let pdop = (q[(0, 0)] + q[(1, 1)] + q[(2, 2)]).sqrt();

    let (lat, lon, _) = ecef_to_geodetic(x, y, z);
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    // rows: east, north, up
    let r = Matrix3::new(
        -sin_lon,
        cos_lon,
        0.0,
        -sin_lat * cos_lon,
        -sin_lat * sin_lon,
        cos_lat,
        cos_lat * cos_lon,
        cos_lat * sin_lon,
        sin_lat,
    );
    let q3 = Matrix3::new(
        q[(0, 0)],
        q[(0, 1)],
        q[(0, 2)],
        q[(1, 0)],
        q[(1, 1)],
        q[(1, 2)],
        q[(2, 0)],
        q[(2, 1)],
        q[(2, 2)],
    );
    let q_enu = r * q3 * r.transpose();

    Dops {
        hdop: (q_enu[(0, 0)] + q_enu[(1, 1)]).sqrt(),
        vdop: q_enu[(2, 2)].sqrt(),
        pdop,
    }
}

/// Full navigation solution from per-SV observations and their
/// ephemerides: transmit-time reconstruction, SV positions and clock
/// corrections, earth-rotation compensation, then least squares.
pub fn solve(observations: &[(Observation, Ephemeris)], fs: f64) -> Result<Fix, Error> {
    if observations.len() < 4 {
        return Err(Error::InternalInvariant(format!(
            "solver invoked with {} SVs",
            observations.len()
        )));
    }

    // common receive epoch: the latest code boundary any SV reported,
    // with every transmit time extrapolated onto it
    let rx_common = observations
        .iter()
        .map(|(o, _)| o.rx_sample)
        .fold(f64::MIN, f64::max);
    let t_tx: Vec<f64> = observations
        .iter()
        .map(|(o, _)| o.tow_tx_sec + (rx_common - o.rx_sample) / fs)
        .collect();

    let t_ref = t_tx.iter().cloned().fold(f64::MIN, f64::max);

    let mut sv_pos = Vec::with_capacity(observations.len());
    let mut pr = Vec::with_capacity(observations.len());
    for ((_, eph), &t) in observations.iter().zip(&t_tx) {
        let dt_sv = eph.clock_correction(t);
        sv_pos.push(eph.position_ecef(t - dt_sv));
        // raw pseudorange plus SV clock and group delay corrections
        pr.push(SPEED_OF_LIGHT * (t_ref + NOMINAL_TRANSIT_SEC - t + dt_sv - eph.tgd));
    }

    // two passes: the transit times (and with them the earth-rotation
    // correction) are refined once a position estimate exists
    let mut transit: Vec<f64> = vec![NOMINAL_TRANSIT_SEC; sv_pos.len()];
    let mut solution = None;
    for _ in 0..2 {
        let rotated: Vec<[f64; 3]> = sv_pos
            .iter()
            .zip(&transit)
            .map(|(&p, &tau)| sagnac_rotate(p, tau))
            .collect();
        let (x, dops, iters) = least_squares(&rotated, &pr)?;
        for (i, p) in rotated.iter().enumerate() {
            let dx = p[0] - x[0];
            let dy = p[1] - x[1];
            let dz = p[2] - x[2];
            transit[i] = (dx * dx + dy * dy + dz * dz).sqrt() / SPEED_OF_LIGHT;
        }
        solution = Some((x, dops, iters));
    }
    let (x, dops, iters) = solution.unwrap();

    let fix = Fix {
        x: x[0],
        y: x[1],
        z: x[2],
        clock_bias_m: x[3],
        hdop: dops.hdop,
        vdop: dops.vdop,
        pdop: dops.pdop,
        tow_sec: t_ref + NOMINAL_TRANSIT_SEC - x[3] / SPEED_OF_LIGHT,
        num_svs: observations.len(),
    };
    log::warn!(
        "{}: x={:.1} y={:.1} z={:.1} b={:.1} hdop={:.2} svs={} iters={}",
        "FIX".green(),
        fix.x,
        fix.y,
        fix.z,
        fix.clock_bias_m,
        fix.hdop,
        fix.num_svs,
        iters
    );
    Ok(fix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_signal::Randn;
    use gnss_rs::constellation::Constellation;
    use gnss_rs::sv::SV;

    /// User near Lake Geneva, SVs spread over the sky at orbit radius.
    fn test_geometry() -> ([f64; 3], Vec<[f64; 3]>) {
        let user = [4_325_070.0, 565_447.0, 4_638_620.0];
        let r_orbit = 26_560_000.0;
        let dirs: [[f64; 3]; 5] = [
            [0.3, 0.1, 0.95],
            [0.7, 0.4, 0.59],
            [-0.5, 0.6, 0.62],
            [0.2, -0.7, 0.68],
            [-0.3, -0.4, 0.87],
        ];
        let sv_pos = dirs
            .iter()
            .map(|d| {
                let norm = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
                let u = [d[0] / norm, d[1] / norm, d[2] / norm];
                // push out along the direction until on the orbit shell
                let dot = user[0] * u[0] + user[1] * u[1] + user[2] * u[2];
                let user_r2 = user.iter().map(|c| c * c).sum::<f64>();
                let t = -dot + (dot * dot + r_orbit * r_orbit - user_r2).sqrt();
                [user[0] + t * u[0], user[1] + t * u[1], user[2] + t * u[2]]
            })
            .collect();
        (user, sv_pos)
    }

    fn range(a: &[f64; 3], b: &[f64; 3]) -> f64 {
        ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
    }

    #[test]
    fn recovers_position_and_clock_bias_noise_free() {
        let (user, sv_pos) = test_geometry();
        let b_true = 123_456.0;
        let pr: Vec<f64> = sv_pos.iter().map(|s| range(s, &user) + b_true).collect();

        let (x, _, iters) = least_squares(&sv_pos, &pr).expect("solvable");
        assert!(iters <= 8, "took {} iterations", iters);
        for (est, truth) in x.iter().take(3).zip(&user) {
            assert!((est - truth).abs() < 1e-3);
        }
        assert!((x[3] - b_true).abs() < 1e-3);
    }

    #[test]
    fn tolerates_gaussian_range_noise() {
        let (user, sv_pos) = test_geometry();
        let b_true = -89_000.0;
        let sigma = 10.0;
        let mut rng = Randn::new(42);
        let pr: Vec<f64> = sv_pos
            .iter()
            .map(|s| range(s, &user) + b_true + sigma * rng.next())
            .collect();

        let (x, dops, _) = least_squares(&sv_pos, &pr).expect("solvable");
        let pos_err = ((x[0] - user[0]).powi(2)
            + (x[1] - user[1]).powi(2)
            + (x[2] - user[2]).powi(2))
        .sqrt();
        assert!(
            pos_err < 3.0 * sigma * dops.pdop,
            "err {:.1} m vs pdop {:.2}",
            pos_err,
            dops.pdop
        );
        assert!((x[3] - b_true).abs() < 3.0 * sigma * dops.pdop);
    }

    #[test]
    fn collapsed_geometry_is_singular() {
        let (user, sv_pos) = test_geometry();
        // every SV in (almost) the same spot
        let base = sv_pos[0];
        let squeezed: Vec<[f64; 3]> = (0..4)
            .map(|i| [base[0] + i as f64, base[1], base[2]])
            .collect();
        let pr: Vec<f64> = squeezed.iter().map(|s| range(s, &user)).collect();

        assert!(matches!(
            least_squares(&squeezed, &pr),
            Err(Error::GeometrySingular { .. })
        ));
    }

    #[test]
    fn dop_components_are_consistent() {
        let (user, sv_pos) = test_geometry();
        let pr: Vec<f64> = sv_pos.iter().map(|s| range(s, &user)).collect();
        let (_, dops, _) = least_squares(&sv_pos, &pr).expect("solvable");

        assert!(dops.hdop > 0.0 && dops.vdop > 0.0);
        // PDOP is rotation invariant: hdop^2 + vdop^2 == pdop^2
        let recomposed = (dops.hdop * dops.hdop + dops.vdop * dops.vdop).sqrt();
        assert!((recomposed - dops.pdop).abs() < 1e-9);
    }

    #[test]
    fn full_solve_applies_sagnac_and_sv_clock() {
        let fs = 2.046e6;
        let (user, _) = test_geometry();
        let t_recv = 350_000.0; // TOW of the true reception epoch

        // circular orbits spread in node/anomaly, one clock offset each
        let mut observations = Vec::new();
        for (k, (omg0_deg, m0_deg)) in
            [(10.0, 20.0), (80.0, 60.0), (150.0, 100.0), (220.0, 30.0), (300.0, 70.0)]
                .iter()
                .enumerate()
        {
            let sv = SV::new(Constellation::GPS, k as u8 + 1);
            let mut eph = Ephemeris::new(sv);
            eph.sqrt_a = 5153.6;
            eph.toe = 345_600;
            eph.toc = 345_600;
            eph.i0 = 0.96;
            eph.omg0 = omg0_deg * std::f64::consts::PI / 180.0;
            eph.m0 = m0_deg * std::f64::consts::PI / 180.0;
            eph.f0 = 2.0e-5 * (k as f64 - 2.0);
            eph.have_sf1 = true;
            eph.have_sf2 = true;
            eph.have_sf3 = true;

            // true transmit time: fixed point of tau = |rot(sv) - user| / c
            let mut tau = NOMINAL_TRANSIT_SEC;
            let mut t_tx_sys = t_recv - tau;
            for _ in 0..6 {
                let pos = eph.position_ecef(t_tx_sys);
                let rot = sagnac_rotate(pos, tau);
                tau = range(&rot, &user) / SPEED_OF_LIGHT;
                t_tx_sys = t_recv - tau;
            }
            // the SV stamps its broadcast with its own (offset) clock
            let t_tx_sv = t_tx_sys + eph.clock_correction(t_tx_sys);

            observations.push((
                Observation {
                    sv,
                    tow_tx_sec: t_tx_sv,
                    rx_sample: 1_000_000.0,
                    doppler_hz: 0.0,
                    cn0: 45.0,
                },
                eph,
            ));
        }

        let fix = solve(&observations, fs).expect("fix");
        let pos_err = ((fix.x - user[0]).powi(2)
            + (fix.y - user[1]).powi(2)
            + (fix.z - user[2]).powi(2))
        .sqrt();
        assert!(pos_err < 1.0, "position error {:.3} m", pos_err);

        // the receiver epoch was pinned at t_ref + nominal transit; the
        // estimated bias must absorb exactly the difference to t_recv
        let t_ref = observations
            .iter()
            .map(|(o, _)| o.tow_tx_sec)
            .fold(f64::MIN, f64::max);
        let b_expected = SPEED_OF_LIGHT * (t_ref + NOMINAL_TRANSIT_SEC - t_recv);
        assert!(
            (fix.clock_bias_m - b_expected).abs() < 1.0,
            "bias {:.3} vs {:.3}",
            fix.clock_bias_m,
            b_expected
        );
        assert!((fix.tow_sec - t_recv).abs() * SPEED_OF_LIGHT < 1.0);
    }

    #[test]
    fn geodetic_conversion_round_trip() {
        let lat = 46.5f64.to_radians();
        let lon = 6.6f64.to_radians();
        let h = 372.0;
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let n = WGS84_A / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        let x = (n + h) * lat.cos() * lon.cos();
        let y = (n + h) * lat.cos() * lon.sin();
        let z = (n * (1.0 - e2) + h) * lat.sin();

        let (lat2, lon2, h2) = ecef_to_geodetic(x, y, z);
        assert!((lat2 - lat).abs() < 1e-9);
        assert!((lon2 - lon).abs() < 1e-12);
        assert!((h2 - h).abs() < 1e-3);
    }
}
