/*! Raw IQ sample formats and conversion to complex float.

Three interleaved encodings are accepted from SDR hosts and capture
files. Everything downstream of the ingest adapter works on
`Complex` (f32 pairs).

| format | element | conversion |
|--------|---------|------------|
| ci8    | 1 byte  | `x / 128.0` |
| ci16   | 2 bytes little endian | arithmetic shift right 8, then as ci8 |
| cf32   | 4 byte little endian float | passthrough |
*/
use crate::{Complex, Float, kernels};

/// Tagged IQ encoding of a raw byte block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// Interleaved signed bytes.
    Ci8,
    /// Interleaved little endian signed 16 bit.
    Ci16,
    /// Interleaved little endian 32 bit floats.
    Cf32,
}

impl SampleFormat {
    /// Bytes per complex sample.
    #[must_use]
    pub fn sample_size(&self) -> usize {
        match self {
            SampleFormat::Ci8 => 2,
            SampleFormat::Ci16 => 4,
            SampleFormat::Cf32 => 8,
        }
    }

    /// Guess the format from a file name extension, if recognizable.
    #[must_use]
    pub fn from_extension(path: &str) -> Option<SampleFormat> {
        let ext = path.rsplit('.').next()?;
        match ext {
            "ci8" | "cs8" | "c8" => Some(SampleFormat::Ci8),
            "ci16" | "cs16" | "c16" => Some(SampleFormat::Ci16),
            "cf32" | "fc32" | "c32" | "cfile" => Some(SampleFormat::Cf32),
            _ => None,
        }
    }
}

/// One block of samples handed from ingest to the detector.
pub struct SampleBatch {
    /// Converted samples.
    pub samples: Vec<Complex>,
}

impl SampleBatch {
    /// Convert a raw byte block. The block length must be a multiple
    /// of the sample size.
    #[must_use]
    pub fn from_bytes(format: SampleFormat, bytes: &[u8]) -> SampleBatch {
        let n = bytes.len() / format.sample_size();
        let mut samples = vec![Complex::default(); n];
        match format {
            SampleFormat::Ci8 => {
                kernels::ci8_to_complex(&bytes[..n * 2], &mut samples);
            }
            SampleFormat::Ci16 => {
                // Sign preserving shift down to 8 significant bits,
                // then the ci8 scale.
                const SCALE: Float = 1.0 / 128.0;
                for (o, quad) in samples.iter_mut().zip(bytes.chunks_exact(4)) {
                    let i = i16::from_le_bytes([quad[0], quad[1]]) >> 8;
                    let q = i16::from_le_bytes([quad[2], quad[3]]) >> 8;
                    *o = Complex::new(Float::from(i as i8) * SCALE, Float::from(q as i8) * SCALE);
                }
            }
            SampleFormat::Cf32 => {
                for (o, oct) in samples.iter_mut().zip(bytes.chunks_exact(8)) {
                    let i = Float::from_le_bytes([oct[0], oct[1], oct[2], oct[3]]);
                    let q = Float::from_le_bytes([oct[4], oct[5], oct[6], oct[7]]);
                    *o = Complex::new(i, q);
                }
            }
        }
        SampleBatch { samples }
    }

    /// Number of complex samples in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
