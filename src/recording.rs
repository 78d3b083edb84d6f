use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use colored::Colorize;
use rustfft::num_complex::Complex64;

use crate::config::SampleFormat;
use crate::errors::Error;
use crate::util::pretty_print;

const BUFFER_SIZE: usize = 256 * 1024;

/// Sample source over a recorded interleaved I/Q file. Samples come out
/// strictly in order; indices are implicit in `samples_read`.
pub struct IQRecording {
    pub file_path: PathBuf,
    format: SampleFormat,
    reader: BufReader<File>,
    samples_read: u64,
}

impl IQRecording {
    pub fn open(file_path: &Path, format: SampleFormat) -> Result<Self, Error> {
        let file = File::open(file_path)?;
        log::info!(
            "{}: {} samples of {}",
            file_path.display(),
            pretty_print(file.metadata()?.len() / format.bytes_per_sample() as u64).bold(),
            format,
        );
        Ok(Self {
            file_path: file_path.to_path_buf(),
            format,
            reader: BufReader::with_capacity(BUFFER_SIZE, file),
            samples_read: 0,
        })
    }

    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }

    /// Read exactly `num_samples` complex samples. A short file yields
    /// `SampleSourceExhausted` with the running total.
    pub fn read_samples(&mut self, num_samples: usize) -> Result<Vec<Complex64>, Error> {
        let mut raw = vec![0u8; num_samples * self.format.bytes_per_sample()];
        self.reader.read_exact(&mut raw).map_err(|_| {
            Error::SampleSourceExhausted {
                samples_read: self.samples_read,
            }
        })?;

        let iq_vec: Vec<Complex64> = match self.format {
            SampleFormat::Int8Iq => raw
                .chunks_exact(2)
                .map(|c| {
                    Complex64::new(c[0] as i8 as f64 / 128.0, c[1] as i8 as f64 / 128.0)
                })
                .collect(),
            SampleFormat::Uint8Iq => raw
                .chunks_exact(2)
                .map(|c| {
                    Complex64::new(
                        (c[0] as f64 - 127.5) / 127.5,
                        (c[1] as f64 - 127.5) / 127.5,
                    )
                })
                .collect(),
            SampleFormat::Float32Iq => raw
                .chunks_exact(8)
                .map(|c| {
                    let i = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                    let q = f32::from_le_bytes([c[4], c[5], c[6], c[7]]);
                    Complex64::new(i as f64, q as f64)
                })
                .collect(),
        };

        self.samples_read += iq_vec.len() as u64;
        Ok(iq_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn int8_pairs_scale_to_unit_range() {
        let path = temp_file("gps_rcv_int8.bin", &[127, 0x80, 0, 64]);
        let mut rec = IQRecording::open(&path, SampleFormat::Int8Iq).unwrap();
        let v = rec.read_samples(2).unwrap();
        assert!((v[0].re - 127.0 / 128.0).abs() < 1e-12);
        assert!((v[0].im + 1.0).abs() < 1e-12);
        assert!((v[1].im - 0.5).abs() < 1e-12);
        assert_eq!(rec.samples_read(), 2);
    }

    #[test]
    fn uint8_pairs_center_on_zero() {
        let path = temp_file("gps_rcv_uint8.bin", &[255, 0, 128, 127]);
        let mut rec = IQRecording::open(&path, SampleFormat::Uint8Iq).unwrap();
        let v = rec.read_samples(2).unwrap();
        assert!((v[0].re - 1.0).abs() < 1e-12);
        assert!((v[0].im + 1.0).abs() < 1e-12);
        assert!(v[1].re.abs() < 0.01 && v[1].im.abs() < 0.01);
    }

    #[test]
    fn float32_pairs_pass_through() {
        let mut bytes = Vec::new();
        for x in [0.25f32, -0.5, 1.0, 0.0] {
            bytes.extend_from_slice(&x.to_le_bytes());
        }
        let path = temp_file("gps_rcv_f32.bin", &bytes);
        let mut rec = IQRecording::open(&path, SampleFormat::Float32Iq).unwrap();
        let v = rec.read_samples(2).unwrap();
        assert_eq!(v[0], Complex64::new(0.25, -0.5));
        assert_eq!(v[1], Complex64::new(1.0, 0.0));
    }

    #[test]
    fn exhaustion_reports_samples_read() {
        let path = temp_file("gps_rcv_short.bin", &[0u8; 6]);
        let mut rec = IQRecording::open(&path, SampleFormat::Int8Iq).unwrap();
        rec.read_samples(2).unwrap();
        match rec.read_samples(2) {
            Err(Error::SampleSourceExhausted { samples_read }) => assert_eq!(samples_read, 2),
            other => panic!("expected exhaustion, got {:?}", other.map(|v| v.len())),
        }
    }
}
