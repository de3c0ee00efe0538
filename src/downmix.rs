/*! Per-burst downmix engine.

Takes one `BurstData` at the input rate and either produces one
`DownmixFrame` aligned to the unique word at the output rate, or
rejects the burst. The engine keeps no state across bursts, so the
pipeline simply runs N of them in parallel, each with its own FFT
plans and filters.

The nine steps, in order:

1. coarse carrier correction from the detection bin,
2. anti-alias filter and decimation to the output rate,
3. noise limiting low pass,
4. burst start search on the smoothed power envelope,
5. fine carrier estimation from the squared signal's spectrum,
6. fine carrier correction,
7. root raised cosine matched filter,
8. FFT correlation against the downlink and uplink sync templates,
9. phase alignment of the unique word onto the constellation.

Any gate failing along the way returns `None`; per-burst rejection is
not an error.
*/
use log::{debug, trace};

use crate::burst::{BurstData, Direction, DownmixFrame};
use crate::fft::{FftCache, peak_index, quadratic_peak_offset};
use crate::fir::{Fir, box_filter, low_pass, raised_cosine, root_raised_cosine};
use crate::iridium;
use crate::rotator::Rotator;
use crate::window::WindowType;
use crate::{Complex, Error, Float, Result, kernels};

/// RRC / RC excess bandwidth for Iridium QPSK.
const RRC_ALPHA: Float = 0.4;
/// Matched filter length in taps.
const RRC_TAPS: usize = 51;
/// Power threshold, as a fraction of the envelope peak, that marks
/// the burst start.
const START_THRESHOLD: Float = 0.28;
/// Bursts with fewer samples than this after the start search cannot
/// hold a preamble and are rejected.
const MIN_BURST_SAMPLES: usize = 100;
/// Zero padding factor for the fine carrier FFT, for sub-bin
/// resolution before interpolation.
const FINE_CFO_PAD: usize = 16;

/// Downmixer configuration.
#[derive(Clone, Debug)]
pub struct DownmixConfig {
    /// Output sample rate, samples per second.
    pub output_rate: f64,
    /// How many output-rate samples to scan for the burst start and
    /// the sync word.
    pub search_depth: usize,
    /// How much of the ramp before the detected start to keep, µs.
    pub pre_start_us: f64,
}

impl Default for DownmixConfig {
    fn default() -> Self {
        Self {
            output_rate: 250_000.0,
            search_depth: 1750,
            pre_start_us: 100.0,
        }
    }
}

struct SyncTemplate {
    direction: Direction,
    /// Template length in samples.
    sync_len: usize,
    /// Preamble length in samples.
    preamble_len: usize,
    /// FFT of the time reversed, conjugated sync waveform.
    spectrum: Vec<Complex>,
}

/// The downmix engine. One per worker thread.
pub struct Downmixer {
    config: DownmixConfig,
    sps: usize,
    fft: FftCache,
    rrc: Fir,
    noise_lpf: Fir,
    smoother: Fir,
    /// Anti-alias filter, cached per input rate.
    decim_filter: Option<(f64, Fir)>,
    corr_size: usize,
    templates: [SyncTemplate; 2],
    fine_window: Vec<Float>,
    pre_start_samples: usize,
}

impl Downmixer {
    /// Build a downmixer, including both sync templates.
    pub fn new(config: DownmixConfig) -> Result<Self> {
        let sps_f = config.output_rate / f64::from(iridium::SYMBOLS_PER_SECOND);
        if sps_f.fract() != 0.0 || sps_f < 2.0 {
            return Err(Error::Config(format!(
                "output rate {} is not an even multiple of the symbol rate",
                config.output_rate
            )));
        }
        let sps = sps_f as usize;
        let mut fft = FftCache::new();

        // The templates are raised cosine shaped: the candidate has
        // been through the receive RRC by the time it is correlated,
        // and RRC cascaded with RRC is RC.
        let rc = raised_cosine(RRC_ALPHA, RRC_TAPS, sps as Float);
        let ul_len = (iridium::PREAMBLE_UPLINK + iridium::UW_LEN) * sps;
        let corr_size = (config.search_depth + 2 * ul_len).next_power_of_two();
        let dl = make_template(Direction::Downlink, &rc, sps, corr_size, &mut fft);
        let ul = make_template(Direction::Uplink, &rc, sps, corr_size, &mut fft);

        let fine_len = {
            let t = 26 * sps;
            if t.is_power_of_two() { t } else { t.next_power_of_two() / 2 }
        };
        debug!(
            "Downmixer: sps {sps}, correlation size {corr_size}, fine CFO window {fine_len}"
        );
        Ok(Self {
            sps,
            fft,
            rrc: Fir::new(&root_raised_cosine(RRC_ALPHA, RRC_TAPS, sps as Float)),
            noise_lpf: Fir::new(&low_pass(config.output_rate as Float, 20_000.0, 10_000.0)),
            smoother: Fir::new(&box_filter(2 * sps + 1)),
            decim_filter: None,
            corr_size,
            templates: [dl, ul],
            fine_window: WindowType::Blackman.make_window(fine_len).0,
            pre_start_samples: (config.pre_start_us * config.output_rate / 1e6).round() as usize,
            config,
        })
    }

    /// Samples per symbol at the output rate.
    #[must_use]
    pub fn sps(&self) -> usize {
        self.sps
    }

    /// Run one burst through the engine.
    ///
    /// Returns `None` when any gate rejects the burst: too short, no
    /// discernible start, or no sync correlation.
    pub fn process(&mut self, burst: BurstData) -> Option<DownmixFrame> {
        let out_rate = self.config.output_rate;
        let mut ts_ns = burst.timestamp_ns as f64;
        let mut samples = burst.samples;

        // 1. Coarse carrier correction from the detection bin.
        let rel =
            (burst.info.center_bin as f64 - burst.fft_size as f64 / 2.0) / burst.fft_size as f64;
        let mut center_frequency = burst.center_frequency + rel * burst.sample_rate;
        Rotator::new(-(rel as Float)).rotate_buf(&mut samples);

        // 2. Anti-alias filter and decimate to the output rate.
        let decim = (burst.sample_rate / out_rate).round().max(1.0) as usize;
        if self
            .decim_filter
            .as_ref()
            .is_none_or(|(rate, _)| *rate != burst.sample_rate)
        {
            let taps = low_pass(
                burst.sample_rate as Float,
                0.4 * out_rate as Float,
                0.2 * out_rate as Float,
            );
            self.decim_filter = Some((burst.sample_rate, Fir::new(&taps)));
        }
        let (_, aa) = self.decim_filter.as_ref().unwrap();
        let mut sig = aa.filter_complex_decim(&samples, decim);
        ts_ns += aa.group_delay() as f64 * 1e9 / burst.sample_rate;
        drop(samples);

        // 3. Noise limiting low pass, skipped for very short bursts.
        if sig.len() > 2 * self.noise_lpf.ntaps() {
            sig = self.noise_lpf.filter_complex(&sig);
            ts_ns += self.noise_lpf.group_delay() as f64 * 1e9 / out_rate;
        }

        // 4. Find the burst start on the smoothed power envelope.
        let start = self.find_start(&sig)?;
        if sig.len() - start < MIN_BURST_SAMPLES {
            trace!("burst {}: only {} samples past start", burst.info.id, sig.len() - start);
            return None;
        }
        sig.drain(..start);
        ts_ns += start as f64 * 1e9 / out_rate;

        // 5+6. Fine carrier estimation on the squared signal, then
        // correction.
        let offset = self.fine_cfo(&sig);
        Rotator::new(-offset).rotate_buf(&mut sig);
        center_frequency += f64::from(offset) * out_rate;

        // 7. Matched filter.
        let mut sig = self.rrc.filter_complex(&sig);
        if sig.is_empty() {
            return None;
        }
        ts_ns += self.rrc.group_delay() as f64 * 1e9 / out_rate;

        // 8. Sync word correlation, both directions at once.
        let (direction, peak, corr_val, timing_offset, preamble_len, sync_len) =
            self.correlate(&sig)?;
        let preamble_start = (peak + 1).checked_sub(sync_len)?;
        let uw_start = preamble_start + preamble_len;

        // 9. Phase alignment: put the unique word on the nominal
        // constellation.
        let norm = corr_val.conj() / corr_val.norm();
        for s in sig.iter_mut() {
            *s *= norm;
        }

        // Frame extraction.
        let (min_sym, max_sym) = iridium::frame_length_gate(center_frequency);
        let avail = sig.len() - uw_start;
        if avail < min_sym * self.sps {
            trace!(
                "burst {}: {} samples from UW, need {}",
                burst.info.id,
                avail,
                min_sym * self.sps
            );
            return None;
        }
        let take = avail.min(max_sym * self.sps);
        let frame: Vec<Complex> = sig[uw_start..uw_start + take].to_vec();
        ts_ns += uw_start as f64 * 1e9 / out_rate;

        trace!(
            "burst {}: {direction}, uw at {uw_start}, {} samples, {:.0} Hz",
            burst.info.id,
            frame.len(),
            center_frequency
        );
        Some(DownmixFrame {
            id: burst.info.id,
            timestamp_ns: ts_ns as u64,
            center_frequency,
            sample_rate: out_rate,
            sps: self.sps as Float,
            direction,
            magnitude: burst.info.magnitude,
            noise: burst.info.noise,
            timing_offset,
            samples: frame,
        })
    }

    /// Step 4: first index where the smoothed power envelope crosses
    /// a fraction of its peak, pulled back by the pre-start
    /// allowance.
    fn find_start(&self, sig: &[Complex]) -> Option<usize> {
        let mut power = vec![0.0; sig.len()];
        kernels::mag2(sig, &mut power);
        let smoothed = self.smoother.filter_real(&power);
        if smoothed.is_empty() {
            return None;
        }
        let window = smoothed.len().min(self.config.search_depth);
        let max = kernels::max_float(&smoothed[..window]);
        if max <= 0.0 {
            return None;
        }
        let threshold = START_THRESHOLD * max;
        let crossing = smoothed[..window].iter().position(|p| *p >= threshold)?;
        let start = (crossing + self.smoother.group_delay())
            .saturating_sub(self.pre_start_samples);
        Some(start)
    }

    /// Step 5: squared signal FFT with zero padding and quadratic
    /// interpolation. Returns the residual offset in cycles per
    /// sample.
    fn fine_cfo(&mut self, sig: &[Complex]) -> Float {
        let l = self.fine_window.len();
        let n = l * FINE_CFO_PAD;
        let mut buf = vec![Complex::default(); n];
        let take = sig.len().min(l);
        kernels::square_window_into(&sig[..take], &self.fine_window, &mut buf[..take]);
        self.fft.forward(&mut buf);
        // Search the shifted spectrum so negative offsets are seen.
        let mut mags = vec![0.0; n];
        kernels::fftshift_mag2(&buf, &mut mags);
        let peak = mags
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(n / 2);
        let delta = quadratic_peak_offset(&mags, peak);
        // Halved because the squaring doubled every frequency.
        (peak as Float + delta - n as Float / 2.0) / n as Float / 2.0
    }

    /// Step 8: correlate against both templates, pick the direction
    /// with the stronger peak.
    #[allow(clippy::type_complexity)]
    fn correlate(
        &mut self,
        sig: &[Complex],
    ) -> Option<(Direction, usize, Complex, Float, usize, usize)> {
        let n = self.corr_size;
        let mut cand = vec![Complex::default(); n];
        let take = sig.len().min(n);
        cand[..take].copy_from_slice(&sig[..take]);
        self.fft.forward(&mut cand);

        let mut best: Option<(Direction, usize, Complex, Float, usize, usize)> = None;
        for t in &self.templates {
            if sig.len() < t.sync_len {
                continue;
            }
            let mut corr: Vec<Complex> = cand
                .iter()
                .zip(t.spectrum.iter())
                .map(|(a, b)| a * b)
                .collect();
            self.fft.inverse(&mut corr);
            // The preamble can only start within the search window,
            // i.e. the peak lies in [sync_len-1, sync_len-1+search).
            let lo = t.sync_len - 1;
            let hi = (lo + self.config.search_depth)
                .min(n)
                .min(lo + sig.len() - t.sync_len + 1);
            if lo >= hi {
                continue;
            }
            let peak = lo + peak_index(&corr[lo..hi]);
            let val = corr[peak];
            let mags: Vec<Float> = corr[peak.saturating_sub(1)..(peak + 2).min(n)]
                .iter()
                .map(|c| c.norm())
                .collect();
            let timing = if mags.len() == 3 {
                quadratic_peak_offset(&mags, 1)
            } else {
                0.0
            };
            if best
                .as_ref()
                .is_none_or(|(_, _, v, ..)| val.norm_sqr() > v.norm_sqr())
            {
                best = Some((
                    t.direction,
                    peak,
                    val,
                    timing,
                    t.preamble_len,
                    t.sync_len,
                ));
            }
        }
        best
    }
}

/// Build one direction's sync template: preamble plus unique word,
/// raised cosine shaped, time reversed, conjugated, and pre-FFT'd at
/// the correlation size.
fn make_template(
    direction: Direction,
    rc: &[Float],
    sps: usize,
    corr_size: usize,
    fft: &mut FftCache,
) -> SyncTemplate {
    let mut symbols: Vec<u8> = Vec::new();
    match direction {
        Direction::Downlink => {
            symbols.extend(std::iter::repeat_n(0, iridium::PREAMBLE_DOWNLINK));
            symbols.extend_from_slice(&iridium::UW_DOWNLINK);
        }
        Direction::Uplink => {
            // The uplink preamble alternates the two antipodal
            // points, so its square is still a clean tone for the
            // fine carrier search.
            for k in 0..iridium::PREAMBLE_UPLINK {
                symbols.push(if k % 2 == 0 { 2 } else { 0 });
            }
            symbols.extend_from_slice(&iridium::UW_UPLINK);
        }
    }
    let preamble_syms = symbols.len() - iridium::UW_LEN;
    let wave = shape_symbols(&symbols, sps, rc);
    let sync_len = wave.len();
    assert!(sync_len + 1 < corr_size);

    let mut spectrum = vec![Complex::default(); corr_size];
    for (i, s) in wave.iter().rev().enumerate() {
        spectrum[i] = s.conj();
    }
    fft.forward(&mut spectrum);
    SyncTemplate {
        direction,
        sync_len,
        preamble_len: preamble_syms * sps,
        spectrum,
    }
}

/// Pulse shape a symbol sequence: impulses at symbol centers
/// convolved with the shaping taps, same-length output so that
/// `out[k * sps]` is the center of symbol `k`.
fn shape_symbols(symbols: &[u8], sps: usize, taps: &[Float]) -> Vec<Complex> {
    let n = symbols.len() * sps;
    let delay = (taps.len() - 1) as i64 / 2;
    let mut out = vec![Complex::default(); n];
    for (k, s) in symbols.iter().enumerate() {
        let c = iridium::constellation_point(*s);
        let center = (k * sps) as i64;
        for (j, t) in taps.iter().enumerate() {
            let idx = center + j as i64 - delay;
            if idx >= 0 && (idx as usize) < n {
                out[idx as usize] += c * *t;
            }
        }
    }
    out
}
