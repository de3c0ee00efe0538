/*! FIR filtering and filter tap generators.

The `Fir` engine runs real taps against complex or real signals, with
an optional decimating stride. Taps are stored reversed and zero
padded to a multiple of eight so the SIMD dot kernels never need a
tail loop of their own.

Generators:
* [`low_pass`]: windowed sinc (Blackman-Harris), unity DC gain.
* [`root_raised_cosine`]: the α=0.4 matched filter for Iridium QPSK.
* [`raised_cosine`]: pulse shaper for the sync templates.
* [`box_filter`]: uniform moving average for power smoothing.
*/
use crate::window::WindowType;
use crate::{Complex, Float, kernels};

const PI: Float = std::f64::consts::PI as Float;

/// FIR filter with real taps.
pub struct Fir {
    /// Reversed taps, zero padded to a multiple of eight.
    taps: Vec<Float>,
    ntaps: usize,
}

impl Fir {
    /// Create a new filter from taps in natural order.
    #[must_use]
    pub fn new(taps: &[Float]) -> Self {
        let ntaps = taps.len();
        let mut rev: Vec<Float> = taps.iter().copied().rev().collect();
        rev.resize(ntaps.next_multiple_of(8), 0.0);
        Self { taps: rev, ntaps }
    }

    /// Number of (unpadded) taps.
    #[must_use]
    pub fn ntaps(&self) -> usize {
        self.ntaps
    }

    /// Group delay in samples, for symmetric taps.
    #[must_use]
    pub fn group_delay(&self) -> usize {
        (self.ntaps - 1) / 2
    }

    fn out_len(&self, n: usize, decim: usize) -> usize {
        let padded = self.taps.len();
        if n < padded { 0 } else { (n - padded) / decim + 1 }
    }

    /// Filter a complex signal. Valid-mode convolution: the output is
    /// shorter than the input by the (padded) filter length minus one.
    #[must_use]
    pub fn filter_complex(&self, input: &[Complex]) -> Vec<Complex> {
        self.filter_complex_decim(input, 1)
    }

    /// Filter and decimate a complex signal in one pass.
    #[must_use]
    pub fn filter_complex_decim(&self, input: &[Complex], decim: usize) -> Vec<Complex> {
        assert!(decim > 0);
        let n = self.out_len(input.len(), decim);
        (0..n)
            .map(|k| kernels::dot_complex(&input[k * decim..], &self.taps))
            .collect()
    }

    /// Filter a real signal.
    #[must_use]
    pub fn filter_real(&self, input: &[Float]) -> Vec<Float> {
        let n = self.out_len(input.len(), 1);
        (0..n)
            .map(|k| kernels::dot_real(&input[k..], &self.taps))
            .collect()
    }
}

/// Generate windowed sinc low pass taps with unity DC gain.
///
/// The tap count follows from the transition width and the
/// Blackman-Harris attenuation, like GNU Radio's firdes.
#[must_use]
pub fn low_pass(samp_rate: Float, cutoff: Float, twidth: Float) -> Vec<Float> {
    let attenuation = WindowType::BlackmanHarris.max_attenuation();
    let ntaps = {
        let t = (attenuation * samp_rate / (22.0 * twidth)) as usize;
        if t % 2 == 0 { t + 1 } else { t }
    };
    let window = WindowType::BlackmanHarris.make_window(ntaps).0;
    let m = (ntaps - 1) / 2;
    let fwt0 = 2.0 * PI * cutoff / samp_rate;
    let mut taps = vec![Float::default(); ntaps];
    for (nm, tap) in taps.iter_mut().enumerate() {
        let n = nm as i64 - m as i64;
        let nf = n as Float;
        *tap = if n == 0 {
            fwt0 / PI * window[nm]
        } else {
            ((nf * fwt0).sin() / (nf * PI)) * window[nm]
        };
    }
    let gain: Float = taps.iter().sum();
    taps.iter_mut().for_each(|t| *t /= gain);
    taps
}

/// Root raised cosine taps, energy normalized.
///
/// `t` runs in symbol periods; the two singular points of the closed
/// form (t = 0 and t = ±1/(4α)) use their analytic limits.
#[must_use]
pub fn root_raised_cosine(alpha: Float, ntaps: usize, sps: Float) -> Vec<Float> {
    let mid = (ntaps - 1) as Float / 2.0;
    let mut taps: Vec<Float> = (0..ntaps)
        .map(|i| {
            let t = (i as Float - mid) / sps;
            let singular = 1.0 / (4.0 * alpha);
            if t == 0.0 {
                1.0 + alpha * (4.0 / PI - 1.0)
            } else if (t.abs() - singular).abs() < 1e-6 {
                let x = PI / (4.0 * alpha);
                alpha / (2.0f32).sqrt() * ((1.0 + 2.0 / PI) * x.sin() + (1.0 - 2.0 / PI) * x.cos())
            } else {
                let num = (PI * t * (1.0 - alpha)).sin() + 4.0 * alpha * t * (PI * t * (1.0 + alpha)).cos();
                let den = PI * t * (1.0 - (4.0 * alpha * t) * (4.0 * alpha * t));
                num / den
            }
        })
        .collect();
    let energy: Float = taps.iter().map(|t| t * t).sum::<Float>().sqrt();
    taps.iter_mut().for_each(|t| *t /= energy);
    taps
}

/// Raised cosine taps, unit peak.
///
/// Cascading two RRC filters is equivalent to one of these; it is used
/// directly to shape the sync correlation templates.
#[must_use]
pub fn raised_cosine(alpha: Float, ntaps: usize, sps: Float) -> Vec<Float> {
    let mid = (ntaps - 1) as Float / 2.0;
    (0..ntaps)
        .map(|i| {
            let t = (i as Float - mid) / sps;
            let singular = 1.0 / (2.0 * alpha);
            if (t.abs() - singular).abs() < 1e-6 {
                PI / 4.0 * sinc(singular)
            } else {
                sinc(t) * (PI * alpha * t).cos() / (1.0 - (2.0 * alpha * t) * (2.0 * alpha * t))
            }
        })
        .collect()
}

fn sinc(t: Float) -> Float {
    if t == 0.0 { 1.0 } else { (PI * t).sin() / (PI * t) }
}

/// Uniform box filter summing to one.
#[must_use]
pub fn box_filter(len: usize) -> Vec<Float> {
    assert!(len > 0);
    vec![1.0 / len as Float; len]
}
