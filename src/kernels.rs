/*! Vector kernels used by the detector, downmixer, and demodulator.

Every kernel has a portable scalar implementation, and the hot ones
additionally have an AVX2+FMA version selected once at runtime. The
scalar loops are written so that the compiler can autovectorize them on
targets without the hand written path.

`Complex` is `num_complex::Complex<f32>`, i.e. `#[repr(C)]` re/im
pairs, so a `&[Complex]` may be reinterpreted as interleaved `f32`
pairs for the SIMD loads.
*/
use crate::{Complex, Float};

#[cfg(target_arch = "x86_64")]
use std::sync::OnceLock;

#[cfg(target_arch = "x86_64")]
fn have_avx2() -> bool {
    static AVX2: OnceLock<bool> = OnceLock::new();
    *AVX2.get_or_init(|| {
        std::is_x86_feature_detected!("avx2") && std::is_x86_feature_detected!("fma")
    })
}

#[cfg(not(target_arch = "x86_64"))]
#[allow(dead_code)]
fn have_avx2() -> bool {
    false
}

/// Per-bin squared magnitude.
///
/// `out` must be at least as long as `input`.
pub fn mag2(input: &[Complex], out: &mut [Float]) {
    assert!(out.len() >= input.len());
    #[cfg(target_arch = "x86_64")]
    if have_avx2() {
        // SAFETY: AVX2 presence checked above; slice lengths checked.
        unsafe { mag2_avx2(input, out) };
        return;
    }
    mag2_scalar(input, out);
}

fn mag2_scalar(input: &[Complex], out: &mut [Float]) {
    for (o, s) in out.iter_mut().zip(input.iter()) {
        *o = s.norm_sqr();
    }
}

/// Swap spectrum halves and compute per-bin squared magnitude in one
/// pass, so that bin 0 of the output is the most negative frequency.
///
/// `input` must have even length; `out` must be at least as long.
pub fn fftshift_mag2(input: &[Complex], out: &mut [Float]) {
    let n = input.len();
    assert_eq!(n % 2, 0);
    assert!(out.len() >= n);
    let half = n / 2;
    mag2(&input[half..], &mut out[..half]);
    mag2(&input[..half], &mut out[half..n]);
}

/// Multiply a complex buffer by a real window, in place.
pub fn mul_window(buf: &mut [Complex], window: &[Float]) {
    assert!(window.len() >= buf.len());
    #[cfg(target_arch = "x86_64")]
    if have_avx2() {
        // SAFETY: AVX2 presence checked above; slice lengths checked.
        unsafe { mul_window_avx2(buf, window) };
        return;
    }
    for (s, w) in buf.iter_mut().zip(window.iter()) {
        *s *= *w;
    }
}

/// `out[i] = input[i]² · window[i]`.
///
/// Squaring a DQPSK signal folds the ±45° symbol phases away and
/// leaves a tone at twice the residual carrier offset; the window
/// bounds its spectral leakage.
pub fn square_window_into(input: &[Complex], window: &[Float], out: &mut [Complex]) {
    let n = input.len().min(window.len());
    assert!(out.len() >= n);
    #[cfg(target_arch = "x86_64")]
    if have_avx2() {
        // SAFETY: AVX2 presence checked above; slice lengths checked.
        unsafe { square_window_avx2(&input[..n], window, out) };
        return;
    }
    for i in 0..n {
        out[i] = input[i] * input[i] * window[i];
    }
}

/// Dot product of a complex signal with real taps.
///
/// `x` must be at least as long as `taps`.
pub fn dot_complex(x: &[Complex], taps: &[Float]) -> Complex {
    assert!(x.len() >= taps.len());
    #[cfg(target_arch = "x86_64")]
    if have_avx2() {
        // SAFETY: AVX2 presence checked above; slice lengths checked.
        return unsafe { dot_complex_avx2(x, taps) };
    }
    dot_complex_scalar(x, taps)
}

fn dot_complex_scalar(x: &[Complex], taps: &[Float]) -> Complex {
    let mut acc = Complex::default();
    for (s, t) in x.iter().zip(taps.iter()) {
        acc += *s * *t;
    }
    acc
}

/// Dot product of a real signal with real taps.
pub fn dot_real(x: &[Float], taps: &[Float]) -> Float {
    assert!(x.len() >= taps.len());
    #[cfg(target_arch = "x86_64")]
    if have_avx2() {
        // SAFETY: AVX2 presence checked above; slice lengths checked.
        return unsafe { dot_real_avx2(x, taps) };
    }
    x.iter().zip(taps.iter()).map(|(a, b)| a * b).sum()
}

/// Incremental noise baseline update: `sum += newest − oldest`.
pub fn baseline_update(sum: &mut [Float], oldest: &[Float], newest: &[Float]) {
    assert_eq!(sum.len(), oldest.len());
    assert_eq!(sum.len(), newest.len());
    for i in 0..sum.len() {
        sum[i] += newest[i] - oldest[i];
    }
}

/// Per-bin magnitude relative to the noise baseline.
///
/// Bins with a zero (or negative, after float drift) baseline yield
/// zero rather than infinity, which suppresses detection while the
/// noise history is still priming.
pub fn relative_magnitude(mag2: &[Float], baseline: &[Float], out: &mut [Float]) {
    assert_eq!(mag2.len(), baseline.len());
    assert!(out.len() >= mag2.len());
    for i in 0..mag2.len() {
        out[i] = if baseline[i] > 0.0 {
            mag2[i] / baseline[i]
        } else {
            0.0
        };
    }
}

/// Convert interleaved signed-byte IQ to complex, scale 1/128.
///
/// `bytes` must have even length; `out` must hold `bytes.len() / 2`
/// samples.
pub fn ci8_to_complex(bytes: &[u8], out: &mut [Complex]) {
    assert_eq!(bytes.len() % 2, 0);
    let n = bytes.len() / 2;
    assert!(out.len() >= n);
    #[cfg(target_arch = "x86_64")]
    if have_avx2() {
        // SAFETY: AVX2 presence checked above; slice lengths checked.
        unsafe { ci8_to_complex_avx2(bytes, out) };
        return;
    }
    ci8_to_complex_scalar(bytes, out);
}

fn ci8_to_complex_scalar(bytes: &[u8], out: &mut [Complex]) {
    const SCALE: Float = 1.0 / 128.0;
    for (o, pair) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *o = Complex::new(
            Float::from(pair[0] as i8) * SCALE,
            Float::from(pair[1] as i8) * SCALE,
        );
    }
}

/// Largest value in a slice. Returns 0.0 for an empty slice.
#[must_use]
pub fn max_float(x: &[Float]) -> Float {
    x.iter().copied().fold(0.0, Float::max)
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use super::*;
    use std::arch::x86_64::*;

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn mag2_avx2(input: &[Complex], out: &mut [Float]) {
        let n = input.len();
        let chunks = n / 8;
        let ip = input.as_ptr() as *const f32;
        let op = out.as_mut_ptr();
        for c in 0..chunks {
            // SAFETY: c * 8 + 8 <= n samples, i.e. 16 floats in bounds.
            unsafe {
                let x1 = _mm256_loadu_ps(ip.add(c * 16));
                let x2 = _mm256_loadu_ps(ip.add(c * 16 + 8));
                let s1 = _mm256_mul_ps(x1, x1);
                let s2 = _mm256_mul_ps(x2, x2);
                // hadd interleaves 128-bit lanes; the pd permute puts
                // the magnitudes back in sample order.
                let h = _mm256_hadd_ps(s1, s2);
                let h = _mm256_castpd_ps(_mm256_permute4x64_pd(_mm256_castps_pd(h), 0xD8));
                _mm256_storeu_ps(op.add(c * 8), h);
            }
        }
        mag2_scalar(&input[chunks * 8..], &mut out[chunks * 8..n]);
    }

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn mul_window_avx2(buf: &mut [Complex], window: &[Float]) {
        let n = buf.len();
        let chunks = n / 4;
        let bp = buf.as_mut_ptr() as *mut f32;
        let wp = window.as_ptr();
        // SAFETY: index vector is a constant.
        let dup = unsafe { _mm256_setr_epi32(0, 0, 1, 1, 2, 2, 3, 3) };
        for c in 0..chunks {
            // SAFETY: c * 4 + 4 <= n samples (8 floats) and window
            // is at least n long.
            unsafe {
                let x = _mm256_loadu_ps(bp.add(c * 8));
                let w4 = _mm_loadu_ps(wp.add(c * 4));
                let w = _mm256_permutevar8x32_ps(_mm256_castps128_ps256(w4), dup);
                _mm256_storeu_ps(bp.add(c * 8), _mm256_mul_ps(x, w));
            }
        }
        for i in chunks * 4..n {
            buf[i] *= window[i];
        }
    }

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn square_window_avx2(
        input: &[Complex],
        window: &[Float],
        out: &mut [Complex],
    ) {
        let n = input.len();
        let chunks = n / 4;
        let ip = input.as_ptr() as *const f32;
        let wp = window.as_ptr();
        let op = out.as_mut_ptr() as *mut f32;
        // SAFETY: index vector is a constant.
        let dup = unsafe { _mm256_setr_epi32(0, 0, 1, 1, 2, 2, 3, 3) };
        for c in 0..chunks {
            // SAFETY: c * 4 + 4 <= n samples for input and out; window
            // is at least n long.
            unsafe {
                let x = _mm256_loadu_ps(ip.add(c * 8));
                // (a + bi)² = a² − b² + 2abi, via the addsub idiom.
                let re_dup = _mm256_moveldup_ps(x);
                let im_dup = _mm256_movehdup_ps(x);
                let swapped = _mm256_permute_ps(x, 0b1011_0001);
                let t1 = _mm256_mul_ps(re_dup, x);
                let t2 = _mm256_mul_ps(im_dup, swapped);
                let sq = _mm256_addsub_ps(t1, t2);
                let w4 = _mm_loadu_ps(wp.add(c * 4));
                let w = _mm256_permutevar8x32_ps(_mm256_castps128_ps256(w4), dup);
                _mm256_storeu_ps(op.add(c * 8), _mm256_mul_ps(sq, w));
            }
        }
        for i in chunks * 4..n {
            out[i] = input[i] * input[i] * window[i];
        }
    }

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn dot_complex_avx2(x: &[Complex], taps: &[Float]) -> Complex {
        let nt = taps.len();
        let chunks = nt / 4;
        let xp = x.as_ptr() as *const f32;
        let tp = taps.as_ptr();
        // SAFETY: index vector is a constant.
        let dup = unsafe { _mm256_setr_epi32(0, 0, 1, 1, 2, 2, 3, 3) };
        // SAFETY: zero vector.
        let mut acc = unsafe { _mm256_setzero_ps() };
        for c in 0..chunks {
            // SAFETY: c * 4 + 4 <= nt <= x.len().
            unsafe {
                let xv = _mm256_loadu_ps(xp.add(c * 8));
                let t4 = _mm_loadu_ps(tp.add(c * 4));
                let tv = _mm256_permutevar8x32_ps(_mm256_castps128_ps256(t4), dup);
                acc = _mm256_fmadd_ps(xv, tv, acc);
            }
        }
        let mut lanes = [0.0f32; 8];
        // SAFETY: lanes is 8 floats.
        unsafe { _mm256_storeu_ps(lanes.as_mut_ptr(), acc) };
        let mut re = lanes[0] + lanes[2] + lanes[4] + lanes[6];
        let mut im = lanes[1] + lanes[3] + lanes[5] + lanes[7];
        for i in chunks * 4..nt {
            re += x[i].re * taps[i];
            im += x[i].im * taps[i];
        }
        Complex::new(re, im)
    }

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn dot_real_avx2(x: &[Float], taps: &[Float]) -> Float {
        let nt = taps.len();
        let chunks = nt / 8;
        let xp = x.as_ptr();
        let tp = taps.as_ptr();
        // SAFETY: zero vector.
        let mut acc = unsafe { _mm256_setzero_ps() };
        for c in 0..chunks {
            // SAFETY: c * 8 + 8 <= nt <= x.len().
            unsafe {
                let xv = _mm256_loadu_ps(xp.add(c * 8));
                let tv = _mm256_loadu_ps(tp.add(c * 8));
                acc = _mm256_fmadd_ps(xv, tv, acc);
            }
        }
        let mut lanes = [0.0f32; 8];
        // SAFETY: lanes is 8 floats.
        unsafe { _mm256_storeu_ps(lanes.as_mut_ptr(), acc) };
        let mut sum: f32 = lanes.iter().sum();
        for i in chunks * 8..nt {
            sum += x[i] * taps[i];
        }
        sum
    }

    #[target_feature(enable = "avx2,fma")]
    pub(super) unsafe fn ci8_to_complex_avx2(bytes: &[u8], out: &mut [Complex]) {
        let n = bytes.len() / 2;
        let chunks = bytes.len() / 8;
        let bp = bytes.as_ptr();
        let op = out.as_mut_ptr() as *mut f32;
        // SAFETY: constant vector.
        let scale = unsafe { _mm256_set1_ps(1.0 / 128.0) };
        for c in 0..chunks {
            // SAFETY: c * 8 + 8 <= bytes.len(); out holds n >= c*4+4
            // samples, i.e. 8 floats.
            unsafe {
                let b = _mm_loadl_epi64(bp.add(c * 8) as *const __m128i);
                let i32s = _mm256_cvtepi8_epi32(b);
                let f = _mm256_cvtepi32_ps(i32s);
                _mm256_storeu_ps(op.add(c * 8), _mm256_mul_ps(f, scale));
            }
        }
        ci8_to_complex_scalar(&bytes[chunks * 8..], &mut out[chunks * 4..n]);
    }
}

#[cfg(target_arch = "x86_64")]
use avx2::*;
