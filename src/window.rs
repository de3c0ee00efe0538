/*! Window functions

All functions are periodic, not symmetric.

<https://en.wikipedia.org/wiki/Window_function>
<https://en.wikipedia.org/wiki/Spectral_leakage>

The detector windows its FFT frames with Blackman; the windowed-sinc
low pass generator uses Blackman-Harris.

# Example

```
use iridium_rx::window::WindowType;
let taps = WindowType::Blackman.make_window(64).0;
assert_eq!(taps.len(), 64);
```
*/
use crate::Float;

const PI: Float = std::f64::consts::PI as Float;

/// Peak value of the Blackman window, used to rescale so that a
/// windowed sine peak reads as the signal amplitude.
pub const BLACKMAN_PEAK: Float = 0.42;

/// Equivalent noise bandwidth of the Blackman window, relative to a
/// rectangular window of the same length.
pub const BLACKMAN_ENBW: Float = 1.72;

/// Window type.
///
/// See <https://en.wikipedia.org/wiki/Window_function>
pub enum WindowType {
    /// Blackman window.
    Blackman,

    /// Blackman-Harris window.
    BlackmanHarris,
}

impl WindowType {
    /// Return max attenuation.
    #[must_use]
    pub fn max_attenuation(&self) -> Float {
        match self {
            WindowType::Blackman => 74.0,
            WindowType::BlackmanHarris => 92.0,
        }
    }

    /// Make a window of a dynamic type.
    #[must_use]
    pub fn make_window(&self, ntaps: usize) -> Window {
        match self {
            WindowType::Blackman => blackman(ntaps),
            WindowType::BlackmanHarris => blackman_harris(ntaps),
        }
    }
}

/// Window functions are "weights" used for applying filters and other
/// operations.
///
/// <https://en.wikipedia.org/wiki/Window_function>
pub struct Window(pub Vec<Float>);

impl Window {
    /// Scale every weight, e.g. by `1/0.42` so that the Blackman peak
    /// becomes one.
    #[must_use]
    pub fn scaled(mut self, f: Float) -> Window {
        self.0.iter_mut().for_each(|w| *w *= f);
        self
    }
}

/// Create Blackman window.
///
/// <https://en.wikipedia.org/wiki/Window_function#Blackman_window>
fn blackman(m: usize) -> Window {
    // Blackman's "not very serious proposal" magic value: 0.16.
    const A: Float = 0.16;

    let a0 = (1.0 - A) / 2.0;
    let a1 = 0.5;
    let a2 = A / 2.0;

    let mut b = Vec::with_capacity(m);
    for n in 0..m {
        let n = n as Float;
        let m = m as Float;

        let t1 = 2.0 * PI * n / m;
        let t2 = 4.0 * PI * n / m;
        b.push(a0 - a1 * t1.cos() + a2 * t2.cos());
    }
    Window(b)
}

/// Create Blackman-Harris window.
///
/// <https://en.wikipedia.org/wiki/Window_function#Blackman%E2%80%93Harris_window>
fn blackman_harris(m: usize) -> Window {
    const A0: Float = 0.35875;
    const A1: Float = 0.48829;
    const A2: Float = 0.14128;
    const A3: Float = 0.01168;

    let mut b = Vec::with_capacity(m);
    for n in 0..m {
        let n = n as Float;
        let m = m as Float;

        let t1 = 2.0 * PI * n / m;
        let t2 = 4.0 * PI * n / m;
        let t3 = 6.0 * PI * n / m;
        b.push(A0 - A1 * t1.cos() + A2 * t2.cos() - A3 * t3.cos());
    }
    Window(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blackman_peak() {
        // Periodic window of even length peaks at exactly m/2, with
        // value a0 + a1 + a2 = 1.
        let w = WindowType::Blackman.make_window(256).0;
        assert!((w[128] - 1.0).abs() < 1e-6);
        assert!(w[0].abs() < 1e-6);
    }

    #[test]
    fn blackman_scaled() {
        let w = WindowType::Blackman
            .make_window(64)
            .scaled(1.0 / BLACKMAN_PEAK);
        assert!((w.0[32] - 1.0 / BLACKMAN_PEAK).abs() < 1e-4);
    }

    #[test]
    fn blackman_harris_shape() {
        let w = WindowType::BlackmanHarris.make_window(128).0;
        // Symmetric around the midpoint (periodic form: w[n] == w[m-n]).
        for n in 1..64 {
            assert!((w[n] - w[128 - n]).abs() < 1e-5);
        }
        assert!((w[64] - 1.0).abs() < 1e-5);
    }
}
