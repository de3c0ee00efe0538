/*! Complex phase rotator.

Frequency shifts a signal by multiplying each sample with a unit
modulus phasor that advances by a fixed increment. Repeated complex
multiplies let the phasor magnitude drift, so it is renormalized every
few thousand samples.
*/
use crate::{Complex, Float};

const RENORM_INTERVAL: u32 = 5000;

/// A unit modulus rotator with a fixed phase increment per sample.
pub struct Rotator {
    phase: Complex,
    incr: Complex,
    counter: u32,
}

impl Rotator {
    /// Create a rotator shifting by `freq` cycles per sample.
    ///
    /// A positive `freq` rotates counterclockwise; to mix a signal
    /// down by `f` Hz at rate `r`, pass `-f / r`.
    #[must_use]
    pub fn new(freq: Float) -> Self {
        let w = 2.0 * std::f32::consts::PI * freq;
        Self {
            phase: Complex::new(1.0, 0.0),
            incr: Complex::new(w.cos(), w.sin()),
            counter: 0,
        }
    }

    /// Rotate one sample.
    #[inline]
    pub fn rotate(&mut self, s: Complex) -> Complex {
        let out = s * self.phase;
        self.phase *= self.incr;
        self.counter += 1;
        if self.counter == RENORM_INTERVAL {
            self.counter = 0;
            self.phase /= self.phase.norm();
        }
        out
    }

    /// Rotate a buffer in place.
    pub fn rotate_buf(&mut self, buf: &mut [Complex]) {
        for s in buf.iter_mut() {
            *s = self.rotate(*s);
        }
    }

    /// Current phasor, for tests and diagnostics.
    #[must_use]
    pub fn phase(&self) -> Complex {
        self.phase
    }
}
