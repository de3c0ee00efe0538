/*! FFT plan cache and small spectrum helpers.

Wraps `rustfft`. Every pipeline thread owns its own `FftCache`; plans
are `Arc<dyn Fft>` values that never cross threads, so no planner lock
exists anywhere. The reference design serialized plan creation behind
a process wide mutex because its FFT library had a global planner;
`rustfft`'s planner is a plain value and the constraint dissolves into
ownership.

Forward transforms are unnormalized; [`FftCache::inverse`] folds the
`1/n` in.
*/
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rustfft::FftPlanner;

use crate::{Complex, Float};

/// Per-owner cache of FFT plans, keyed by length and direction.
pub struct FftCache {
    planner: FftPlanner<Float>,
    forward: HashMap<usize, Arc<dyn rustfft::Fft<Float>>>,
    inverse: HashMap<usize, Arc<dyn rustfft::Fft<Float>>>,
}

impl FftCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            forward: HashMap::new(),
            inverse: HashMap::new(),
        }
    }

    /// In-place forward FFT.
    pub fn forward(&mut self, buf: &mut [Complex]) {
        let plan = self
            .forward
            .entry(buf.len())
            .or_insert_with(|| self.planner.plan_fft_forward(buf.len()))
            .clone();
        plan.process(buf);
    }

    /// In-place inverse FFT, normalized by `1/n`.
    pub fn inverse(&mut self, buf: &mut [Complex]) {
        let plan = self
            .inverse
            .entry(buf.len())
            .or_insert_with(|| self.planner.plan_fft_inverse(buf.len()))
            .clone();
        plan.process(buf);
        let f = 1.0 / buf.len() as Float;
        buf.iter_mut().for_each(|s| *s *= f);
    }
}

impl Default for FftCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Load FFT planner wisdom.
///
/// `rustfft` keeps no on-disk state, so this is a compatibility no-op;
/// hosts written against FFTW-style planners may call it freely.
pub fn load_wisdom<P: AsRef<Path>>(_path: P) {}

/// Save FFT planner wisdom. No-op, see [`load_wisdom`].
pub fn save_wisdom<P: AsRef<Path>>(_path: P) {}

/// Three point quadratic interpolation around a peak.
///
/// Returns the sub-bin offset in `[-0.5, 0.5]` of the true maximum
/// relative to `peak`, given the magnitudes at `peak - 1`, `peak`,
/// `peak + 1`. Off-edge peaks return zero.
#[must_use]
pub fn quadratic_peak_offset(mags: &[Float], peak: usize) -> Float {
    if peak == 0 || peak + 1 >= mags.len() {
        return 0.0;
    }
    let a = mags[peak - 1];
    let b = mags[peak];
    let c = mags[peak + 1];
    let den = a - 2.0 * b + c;
    if den == 0.0 {
        return 0.0;
    }
    let d = 0.5 * (a - c) / den;
    d.clamp(-0.5, 0.5)
}

/// Index of the largest magnitude in a complex slice.
#[must_use]
pub fn peak_index(buf: &[Complex]) -> usize {
    let mut best = 0;
    let mut best_mag = 0.0;
    for (i, s) in buf.iter().enumerate() {
        let m = s.norm_sqr();
        if m > best_mag {
            best_mag = m;
            best = i;
        }
    }
    best
}
