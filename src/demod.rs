/*! Symbol recovery: one `DownmixFrame` in, one `DemodFrame` out.

The frame arrives aligned to the unique word at `sps` samples per
symbol. Recovery runs:

* decimation to one sample per symbol, by default with a Gardner
  timing error detector driving a PI loop over cubic interpolation,
  alternatively plain nearest neighbor picking;
* a first order PLL that tracks out the residual carrier;
* hard QPSK decisions with an end of frame detector;
* the unique word check, hard first, then a soft angular rescue;
* DQPSK differential decoding into bits.

A frame that fails the unique word entirely is rejected; that is the
common case for false detections and costs nothing downstream.
*/
use log::{debug, trace};

use crate::burst::{DemodFrame, Direction, DownmixFrame};
use crate::iridium;
use crate::{Complex, Float};

/// PLL bandwidth exponent.
const PLL_ALPHA: Float = 0.2;
/// Gardner proportional gain.
const GARDNER_KP: f64 = 0.02;
/// Gardner integral gain.
const GARDNER_KI: f64 = 2e-4;
/// Confidence counts symbols within this angle of an axis, radians
/// (±22°).
const CONFIDENCE_LIMIT: Float = 22.0 * std::f32::consts::PI / 180.0;
/// Hard unique word check tolerates this many symbol errors.
const UW_HARD_LIMIT: u32 = 2;
/// Soft rescue accepts a total angular error up to this, in units of
/// a quarter turn.
const UW_SOFT_LIMIT: Float = 3.0;
/// Differential symbol to output mapping.
const DQPSK_MAP: [u8; 4] = [0, 2, 3, 1];

/// How symbols are picked out of the oversampled frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimingRecovery {
    /// Gardner TED with cubic interpolation.
    #[default]
    Gardner,
    /// Fixed stride, nearest sample.
    NearestNeighbor,
}

/// Demodulator configuration.
#[derive(Clone, Debug, Default)]
pub struct DemodConfig {
    /// Timing recovery mode.
    pub timing: TimingRecovery,
}

/// The symbol recovery stage. Stateless across frames.
pub struct Demodulator {
    config: DemodConfig,
}

impl Demodulator {
    /// Create a demodulator.
    #[must_use]
    pub fn new(config: DemodConfig) -> Self {
        Self { config }
    }

    /// Demodulate one frame. `None` means the unique word did not
    /// verify in either direction.
    pub fn process(&self, frame: DownmixFrame) -> Option<DemodFrame> {
        let mut symbols = match self.config.timing {
            TimingRecovery::Gardner => gardner_decimate(&frame.samples, frame.sps, frame.timing_offset),
            TimingRecovery::NearestNeighbor => nearest_decimate(&frame.samples, frame.sps),
        };
        truncate_at_end_of_frame(&mut symbols);
        if symbols.len() < iridium::UW_LEN {
            trace!("frame {}: only {} symbols", frame.id, symbols.len());
            return None;
        }

        // PLL: rotate each symbol by the running estimate, decide,
        // and drag the estimate towards the decision.
        let mut est = Complex::new(1.0, 0.0);
        let mut total_phase: f64 = 0.0;
        let mut rotated = Vec::with_capacity(symbols.len());
        let mut decided = Vec::with_capacity(symbols.len());
        let mut confident = 0usize;
        let mut level_sum: Float = 0.0;
        for (i, s) in symbols.iter().enumerate() {
            let r = s * est;
            let sym = hard_decision(r);
            let ideal = iridium::constellation_point(sym);
            let err = ideal.conj() * r;
            let ang = err.im.atan2(err.re);
            let step = PLL_ALPHA * ang;
            est *= Complex::new(step.cos(), -step.sin());
            total_phase += f64::from(step);
            if ang.abs() <= CONFIDENCE_LIMIT {
                confident += 1;
            }
            level_sum += r.norm();
            rotated.push(r);
            decided.push(sym);
            // Keep the phasor honest over long frames.
            if i % 64 == 63 {
                est /= est.norm();
            }
        }

        let direction = check_unique_word(&decided, &rotated, frame.direction, frame.id)?;

        // Differential decode, bits MSB first.
        let mut bits = Vec::with_capacity(decided.len() * 2);
        let mut prev = 0u8;
        for s in &decided {
            let d = DQPSK_MAP[usize::from((s + 4 - prev) % 4)];
            bits.push(d >> 1);
            bits.push(d & 1);
            prev = *s;
        }

        let n_symbols = decided.len();
        let duration_s = n_symbols as f64 / f64::from(iridium::SYMBOLS_PER_SECOND);
        let center_frequency =
            frame.center_frequency + total_phase / duration_s / (2.0 * std::f64::consts::PI);
        let confidence = (100 * confident / n_symbols) as u32;
        trace!(
            "frame {}: {direction}, {n_symbols} symbols, {confidence}%",
            frame.id
        );
        Some(DemodFrame {
            id: frame.id,
            timestamp_ns: frame.timestamp_ns,
            center_frequency,
            direction,
            magnitude: frame.magnitude,
            noise: frame.noise,
            confidence,
            level: level_sum / n_symbols as Float,
            n_symbols,
            n_payload: n_symbols - iridium::UW_LEN,
            bits,
        })
    }
}

/// Catmull-Rom interpolation at a fractional position.
fn cubic(samples: &[Complex], pos: f64) -> Complex {
    let i = pos.floor() as usize;
    let t = (pos - pos.floor()) as Float;
    let at = |idx: i64| -> Complex {
        let idx = idx.clamp(0, samples.len() as i64 - 1) as usize;
        samples[idx]
    };
    let p0 = at(i as i64 - 1);
    let p1 = at(i as i64);
    let p2 = at(i as i64 + 1);
    let p3 = at(i as i64 + 2);
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (p2 - p0) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (3.0 * p1 - p0 - 3.0 * p2 + p3) * t3)
}

/// Gardner timing recovery at one sample per symbol.
///
/// The error `Re{(prev − cur) · conj(mid)}` is zero when the midpoint
/// sample falls on the transition; a PI loop nudges the fractional
/// position, at most half a sample per symbol.
fn gardner_decimate(samples: &[Complex], sps: Float, timing_offset: Float) -> Vec<Complex> {
    let sps = f64::from(sps);
    let mut pos = f64::from(timing_offset).max(0.0);
    let mut out = Vec::with_capacity(samples.len() / sps as usize + 1);
    let mut prev: Option<Complex> = None;
    let mut integrator = 0.0f64;
    while (pos as usize) + 2 < samples.len() {
        let cur = cubic(samples, pos);
        let mut adjust = 0.0;
        if let Some(p) = prev {
            let mid = cubic(samples, pos - sps / 2.0);
            let err = f64::from(((p - cur) * mid.conj()).re).clamp(-1.0, 1.0);
            integrator += GARDNER_KI * err;
            adjust = (GARDNER_KP * err + integrator).clamp(-0.5, 0.5);
        }
        out.push(cur);
        prev = Some(cur);
        pos += sps + adjust;
    }
    out
}

/// Nearest neighbor decimation at a fixed stride.
fn nearest_decimate(samples: &[Complex], sps: Float) -> Vec<Complex> {
    let stride = sps.round() as usize;
    samples.iter().step_by(stride.max(1)).copied().collect()
}

/// Truncate once the signal has clearly ended: after the running peak
/// magnitude, three consecutive symbols below an eighth of it.
fn truncate_at_end_of_frame(symbols: &mut Vec<Complex>) {
    let mut peak: Float = 0.0;
    let mut low_run = 0;
    for i in 0..symbols.len() {
        let m = symbols[i].norm();
        if m > peak {
            peak = m;
        }
        if peak > 0.0 && m < peak / 8.0 {
            low_run += 1;
            if low_run == 3 {
                symbols.truncate(i - 2);
                return;
            }
        } else {
            low_run = 0;
        }
    }
}

/// Map a sample to its QPSK quadrant: 45° → 0, 135° → 1, 225° → 2,
/// 315° → 3.
fn hard_decision(s: Complex) -> u8 {
    let ang = s.im.atan2(s.re);
    ((ang / std::f32::consts::FRAC_PI_2).floor() as i32).rem_euclid(4) as u8
}

/// Symbol distance with the QPSK reflection: a difference of three
/// quadrants is really one.
fn uw_symbol_distance(a: u8, b: u8) -> u32 {
    match (a + 4 - b) % 4 {
        0 => 0,
        2 => 2,
        _ => 1,
    }
}

fn wrap_angle(a: Float) -> Float {
    let mut a = a;
    while a > std::f32::consts::PI {
        a -= 2.0 * std::f32::consts::PI;
    }
    while a < -std::f32::consts::PI {
        a += 2.0 * std::f32::consts::PI;
    }
    a
}

/// Verify the unique word against both directions.
///
/// The hard check counts symbol errors; if that fails both ways, the
/// soft rescue compares total angular error against the expected UW
/// phases, in quarter turns. The winning direction overrides the
/// downmix guess.
fn check_unique_word(
    decided: &[u8],
    rotated: &[Complex],
    guess: Direction,
    id: u64,
) -> Option<Direction> {
    let candidates = [
        (Direction::Downlink, &iridium::UW_DOWNLINK),
        (Direction::Uplink, &iridium::UW_UPLINK),
    ];

    let mut best: Option<(Direction, u32)> = None;
    for (dir, uw) in candidates {
        let errs: u32 = decided
            .iter()
            .zip(uw.iter())
            .map(|(d, u)| uw_symbol_distance(*d, *u))
            .sum();
        if errs <= UW_HARD_LIMIT && best.as_ref().is_none_or(|(_, e)| errs < *e) {
            best = Some((dir, errs));
        }
    }
    if let Some((dir, _)) = best {
        return Some(dir);
    }

    // Soft rescue on the raw angles.
    let mut soft: Option<(Direction, Float)> = None;
    for (dir, uw) in candidates {
        let err: Float = rotated
            .iter()
            .zip(uw.iter())
            .map(|(r, u)| {
                let expect = iridium::symbol_phase(*u);
                wrap_angle(r.im.atan2(r.re) - expect).abs() / std::f32::consts::FRAC_PI_2
            })
            .sum();
        if soft.as_ref().is_none_or(|(_, e)| err < *e) {
            soft = Some((dir, err));
        }
    }
    match soft {
        Some((dir, err)) if err <= UW_SOFT_LIMIT => {
            debug!("frame {id}: hard UW failed, soft rescue as {dir} with error {err:.2}");
            if dir != guess {
                debug!("frame {id}: direction override {guess} -> {dir}");
            }
            Some(dir)
        }
        _ => {
            trace!("frame {id}: unique word not found");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_from_symbols(symbols: &[u8], direction: Direction, sps: usize) -> DownmixFrame {
        // Rectangular pulses: good enough for timing loops that only
        // need stable magnitudes, and exact for hard decisions.
        let samples: Vec<Complex> = symbols
            .iter()
            .flat_map(|s| std::iter::repeat_n(iridium::constellation_point(*s), sps))
            .collect();
        DownmixFrame {
            id: 40,
            timestamp_ns: 5_000,
            center_frequency: 1.6262e9,
            sample_rate: 250_000.0,
            sps: sps as Float,
            direction,
            magnitude: 25.0,
            noise: -100.0,
            timing_offset: 0.0,
            samples,
        }
    }

    fn dl_symbols(payload: &[u8]) -> Vec<u8> {
        let mut v = iridium::UW_DOWNLINK.to_vec();
        v.extend_from_slice(payload);
        v
    }

    /// Reference differential decode, straight from the definition.
    fn expected_bits(symbols: &[u8]) -> Vec<u8> {
        let mut prev = 0u8;
        let mut bits = Vec::new();
        for s in symbols {
            let d = DQPSK_MAP[usize::from((s + 4 - prev) % 4)];
            bits.push(d >> 1);
            bits.push(d & 1);
            prev = *s;
        }
        bits
    }

    #[test]
    fn clean_downlink_frame() {
        let payload: Vec<u8> = (0..130).map(|i| ((i * 3 + 1) % 4) as u8).collect();
        let symbols = dl_symbols(&payload);
        let demod = Demodulator::new(DemodConfig::default());
        let got = demod
            .process(frame_from_symbols(&symbols, Direction::Downlink, 10))
            .expect("frame");
        assert_eq!(got.direction, Direction::Downlink);
        assert_eq!(got.n_symbols, symbols.len());
        assert_eq!(got.n_payload, payload.len());
        assert_eq!(got.confidence, 100);
        assert!((got.level - 1.0).abs() < 0.05);
        assert_eq!(got.bits, expected_bits(&symbols));
        assert_eq!(got.id, 40);
    }

    #[test]
    fn nearest_neighbor_mode() {
        let payload: Vec<u8> = (0..50).map(|i| ((i * 5 + 2) % 4) as u8).collect();
        let symbols = dl_symbols(&payload);
        let demod = Demodulator::new(DemodConfig {
            timing: TimingRecovery::NearestNeighbor,
        });
        let got = demod
            .process(frame_from_symbols(&symbols, Direction::Downlink, 10))
            .expect("frame");
        assert_eq!(got.bits, expected_bits(&symbols));
    }

    #[test]
    fn uw_hamming_two_accepted_three_soft_rescued() {
        let payload: Vec<u8> = (0..60).map(|i| ((i * 3) % 4) as u8).collect();
        let demod = Demodulator::new(DemodConfig::default());

        // Two UW symbols nudged one quadrant: hard check passes.
        let mut symbols = dl_symbols(&payload);
        symbols[1] = (symbols[1] + 1) % 4;
        symbols[5] = (symbols[5] + 3) % 4;
        let got = demod.process(frame_from_symbols(&symbols, Direction::Downlink, 10));
        assert!(got.is_some(), "hamming distance 2 must pass the hard check");

        // Three symbol errors: hard fails. Two full quadrant nudges
        // plus one 80° twist keep the total soft error just under the
        // rescue limit.
        let mut symbols = dl_symbols(&payload);
        for i in [1, 5] {
            symbols[i] = (symbols[i] + 1) % 4;
        }
        let mut frame = frame_from_symbols(&symbols, Direction::Downlink, 10);
        let twist = 80.0 * std::f32::consts::PI / 180.0;
        let rot = Complex::new(twist.cos(), twist.sin());
        for s in &mut frame.samples[80..90] {
            *s *= rot;
        }
        let got = demod.process(frame);
        assert!(got.is_some(), "hamming distance 3 should soft rescue");

        // Four nudges: beyond both checks.
        let mut symbols = dl_symbols(&payload);
        for i in [1, 5, 8, 10] {
            symbols[i] = (symbols[i] + 1) % 4;
        }
        let got = demod.process(frame_from_symbols(&symbols, Direction::Downlink, 10));
        assert!(got.is_none(), "hamming distance 4 must be rejected");
    }

    #[test]
    fn direction_override() {
        // Uplink unique word, but the downmixer guessed downlink.
        let payload: Vec<u8> = (0..60).map(|i| ((i * 7) % 4) as u8).collect();
        let mut symbols = iridium::UW_UPLINK.to_vec();
        symbols.extend_from_slice(&payload);
        let demod = Demodulator::new(DemodConfig::default());
        let got = demod
            .process(frame_from_symbols(&symbols, Direction::Downlink, 10))
            .expect("frame");
        assert_eq!(got.direction, Direction::Uplink);
    }

    #[test]
    fn end_of_frame_truncation() {
        let payload: Vec<u8> = (0..40).map(|i| ((i + 1) % 4) as u8).collect();
        let symbols = dl_symbols(&payload);
        let mut frame = frame_from_symbols(&symbols, Direction::Downlink, 10);
        // Tack on five near-dead symbols.
        frame
            .samples
            .extend(std::iter::repeat_n(Complex::new(1e-4, 0.0), 50));
        let demod = Demodulator::new(DemodConfig::default());
        let got = demod.process(frame).expect("frame");
        assert_eq!(got.n_symbols, symbols.len());
    }

    #[test]
    fn residual_cfo_is_tracked_and_reported() {
        // A slow residual rotation: 0.004 cycles per symbol = 100 Hz
        // at 25 kBd. The PLL should follow and the reported center
        // frequency should move towards it.
        let payload: Vec<u8> = (0..200).map(|i| ((i * 3 + 2) % 4) as u8).collect();
        let symbols = dl_symbols(&payload);
        let mut frame = frame_from_symbols(&symbols, Direction::Downlink, 10);
        let cycles_per_sample = 100.0 / 250_000.0;
        for (i, s) in frame.samples.iter_mut().enumerate() {
            let ph = 2.0 * std::f32::consts::PI * cycles_per_sample * i as Float;
            *s *= Complex::new(ph.cos(), ph.sin());
        }
        let demod = Demodulator::new(DemodConfig::default());
        let got = demod.process(frame).expect("frame");
        assert_eq!(got.bits, expected_bits(&symbols));
        let residual = got.center_frequency - 1.6262e9;
        assert!(
            (residual - 100.0).abs() < 40.0,
            "reported residual {residual} Hz"
        );
        assert!(got.confidence >= 90);
    }

    #[test]
    fn gardner_converges_on_offset_sampling() {
        // Start sampling 4 samples off center; with rectangular
        // pulses every sample in the symbol is exact, so decisions
        // must still be perfect and the loop must not run away.
        let payload: Vec<u8> = (0..80).map(|i| ((i * 3 + 1) % 4) as u8).collect();
        let symbols = dl_symbols(&payload);
        let mut frame = frame_from_symbols(&symbols, Direction::Downlink, 10);
        frame.timing_offset = 0.4;
        let demod = Demodulator::new(DemodConfig::default());
        let got = demod.process(frame).expect("frame");
        assert_eq!(got.bits[..40], expected_bits(&symbols)[..40]);
    }

    #[test]
    fn hard_decision_quadrants() {
        assert_eq!(hard_decision(Complex::new(1.0, 1.0)), 0);
        assert_eq!(hard_decision(Complex::new(-1.0, 1.0)), 1);
        assert_eq!(hard_decision(Complex::new(-1.0, -1.0)), 2);
        assert_eq!(hard_decision(Complex::new(1.0, -1.0)), 3);
        assert_eq!(hard_decision(Complex::new(1.0, 0.1)), 0);
        assert_eq!(hard_decision(Complex::new(0.1, -1.0)), 3);
    }

    #[test]
    fn symbol_distance_wraps() {
        assert_eq!(uw_symbol_distance(0, 0), 0);
        assert_eq!(uw_symbol_distance(3, 0), 1);
        assert_eq!(uw_symbol_distance(0, 3), 1);
        assert_eq!(uw_symbol_distance(2, 0), 2);
        assert_eq!(uw_symbol_distance(1, 2), 1);
    }
}
