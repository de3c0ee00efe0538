/*! Artifacts handed between pipeline stages.

Ownership is linear: the detector builds a [`BurstData`], exactly one
downmix worker consumes it and may build a [`DownmixFrame`], and the
demodulator consumes that and may build a [`DemodFrame`]. Nothing is
shared; each stage's output owns a fresh buffer sized to what actually
survived.
*/
use crate::{Complex, Float};

/// Propagation direction of a burst, decided by the sync correlator
/// and possibly overridden by the unique word check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Satellite to terminal.
    Downlink,
    /// Terminal to satellite.
    Uplink,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Direction::Downlink => write!(f, "DL"),
            Direction::Uplink => write!(f, "UL"),
        }
    }
}

/// Immutable descriptor of one detected burst.
#[derive(Clone, Debug)]
pub struct BurstInfo {
    /// Monotone burst id. Always a multiple of 10; the low decimal
    /// digit is reserved for downstream sub-ids.
    pub id: u64,
    /// Absolute sample index where extraction starts (detection point
    /// minus the pre-burst allowance).
    pub start: u64,
    /// Absolute sample index where the burst was last seen active.
    pub last_active: u64,
    /// Absolute sample index where the burst ended.
    pub stop: u64,
    /// FFT bin (fftshifted, so 0 is the most negative frequency) the
    /// burst was detected in.
    pub center_bin: usize,
    /// Estimated SNR above the noise floor, dB.
    pub magnitude: Float,
    /// Estimated noise floor, dBFS/Hz.
    pub noise: Float,
}

/// A completed burst carved out of the detector's sample history.
pub struct BurstData {
    /// Detection metadata.
    pub info: BurstInfo,
    /// SDR tuner center frequency, Hz.
    pub center_frequency: f64,
    /// Input sample rate, samples per second.
    pub sample_rate: f64,
    /// FFT size that produced the detection.
    pub fft_size: usize,
    /// Wall clock nanoseconds of the first sample in `samples`.
    pub timestamp_ns: u64,
    /// Complex samples covering the burst plus pre/post allowance.
    pub samples: Vec<Complex>,
}

/// A burst that survived every downmix gate, aligned to its unique
/// word.
pub struct DownmixFrame {
    /// Burst id, carried through.
    pub id: u64,
    /// Wall clock nanoseconds of the first sample (the start of the
    /// unique word).
    pub timestamp_ns: u64,
    /// Refined carrier frequency after coarse and fine CFO, Hz.
    pub center_frequency: f64,
    /// Output sample rate, samples per second.
    pub sample_rate: f64,
    /// Samples per symbol at the output rate.
    pub sps: Float,
    /// Direction guessed by the sync correlator.
    pub direction: Direction,
    /// Detection magnitude, dB above noise floor.
    pub magnitude: Float,
    /// Detection noise floor, dBFS/Hz.
    pub noise: Float,
    /// Sub-sample timing correction from the correlation peak.
    pub timing_offset: Float,
    /// Samples from the unique word onward.
    pub samples: Vec<Complex>,
}

/// Terminal artifact: one demodulated frame.
pub struct DemodFrame {
    /// Burst id, carried through.
    pub id: u64,
    /// Wall clock nanoseconds of the unique word start.
    pub timestamp_ns: u64,
    /// Carrier frequency including the PLL residual, Hz.
    pub center_frequency: f64,
    /// Direction after the unique word check.
    pub direction: Direction,
    /// Detection magnitude, dB above noise floor.
    pub magnitude: Float,
    /// Detection noise floor, dBFS/Hz.
    pub noise: Float,
    /// Percentage of symbols within ±22° of a constellation axis.
    pub confidence: u32,
    /// Mean amplitude of the symbol samples.
    pub level: Float,
    /// Total demodulated symbols, unique word included.
    pub n_symbols: usize,
    /// Symbols after the unique word.
    pub n_payload: usize,
    /// Demodulated bits, two per symbol, MSB first.
    pub bits: Vec<u8>,
}

impl DemodFrame {
    /// Bits as an ASCII '0'/'1' string for the RAW output line.
    #[must_use]
    pub fn bits_string(&self) -> String {
        self.bits.iter().map(|b| if *b == 0 { '0' } else { '1' }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_formatting() {
        assert_eq!(Direction::Downlink.to_string(), "DL");
        assert_eq!(Direction::Uplink.to_string(), "UL");
    }

    #[test]
    fn bits_string() {
        let f = DemodFrame {
            id: 10,
            timestamp_ns: 0,
            center_frequency: 1.626e9,
            direction: Direction::Downlink,
            magnitude: 20.0,
            noise: -100.0,
            confidence: 99,
            level: 0.5,
            n_symbols: 2,
            n_payload: 0,
            bits: vec![0, 0, 1, 1],
        };
        assert_eq!(f.bits_string(), "0011");
    }
}
