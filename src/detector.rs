/*! Burst detector.

Scans the IQ stream with a sliding windowed FFT and tracks
frequency-localized bursts as a small state machine:

* a per-bin noise baseline is kept as a circular history of the last H
  magnitude spectra plus an incrementally maintained running sum;
* a bin whose magnitude, relative to its baseline, exceeds the
  threshold opens a burst, which masks its neighborhood against
  further openings;
* a burst stays alive while its bin neighborhood remains hot, and is
  emitted once it has been silent for the post-burst allowance or has
  outstayed the maximum burst length.

Emitted bursts carry their own copy of the samples, carved from the
detector's history ring.

The detector is single threaded; the pipeline runs exactly one.
*/
use log::{debug, trace, warn};

use crate::burst::{BurstData, BurstInfo};
use crate::fft::FftCache;
use crate::ringbuffer::RingBuffer;
use crate::window::{BLACKMAN_ENBW, BLACKMAN_PEAK, WindowType};
use crate::{Complex, Error, Float, Result, kernels};

/// Detector configuration. `new` fills in the derived defaults;
/// every field may be overridden before constructing the
/// [`Detector`].
#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Input sample rate, samples per second.
    pub sample_rate: f64,
    /// SDR tuner center frequency, Hz.
    pub center_frequency: f64,
    /// FFT size. Default: nearest power of two to a 1 ms window.
    pub fft_size: usize,
    /// Detection threshold over the noise baseline, dB.
    pub threshold_db: Float,
    /// Noise history depth H, in FFT frames.
    pub history_size: usize,
    /// Width of one burst in Hz; converted to a bin neighborhood.
    pub burst_width: f64,
    /// Maximum simultaneously active bursts before squelch.
    pub max_bursts: usize,
    /// Maximum burst length in samples.
    pub max_burst_len: usize,
    /// Samples kept before the detection point.
    pub pre_len: usize,
    /// Samples a burst may stay silent before it is closed.
    pub post_len: usize,
}

impl DetectorConfig {
    /// Defaults for a given rate and tuner frequency.
    pub fn new(sample_rate: f64, center_frequency: f64) -> Result<Self> {
        if !(sample_rate > 0.0) {
            return Err(Error::Config(format!("bad sample rate {sample_rate}")));
        }
        let fft_size = nearest_power_of_two(sample_rate / 1000.0);
        let burst_width = 40_000.0;
        Ok(Self {
            sample_rate,
            center_frequency,
            fft_size,
            threshold_db: 18.0,
            history_size: 512,
            burst_width,
            max_bursts: (0.8 * sample_rate / burst_width) as usize,
            max_burst_len: (0.090 * sample_rate) as usize,
            pre_len: 2 * fft_size,
            post_len: (0.016 * sample_rate) as usize,
        })
    }
}

fn nearest_power_of_two(x: f64) -> usize {
    let exp = x.log2().round().max(4.0) as u32;
    1usize << exp
}

/// Mutable tracker for one in-flight burst.
struct ActiveBurst {
    id: u64,
    start: u64,
    last_active: u64,
    center_bin: usize,
    magnitude: Float,
    noise: Float,
    opened_at: u64,
}

/// The burst detector. See the module docs.
pub struct Detector {
    config: DetectorConfig,
    window: Vec<Float>,
    fft: FftCache,
    ring: RingBuffer,
    pending: Vec<Complex>,
    fft_buf: Vec<Complex>,
    mag2: Vec<Float>,
    relative: Vec<Float>,
    mask: Vec<bool>,
    history: Vec<Vec<Float>>,
    history_idx: usize,
    history_filled: usize,
    baseline: Vec<Float>,
    bursts: Vec<ActiveBurst>,
    next_id: u64,
    now: u64,
    squelch_counter: u32,
    force_noise_refresh: bool,
    timestamp_base_ns: Option<u64>,
    threshold: Float,
    width_bins: usize,
    squelched: u64,
}

impl Detector {
    /// Create a detector. Fails on an invalid FFT size or an
    /// inconsistent history depth.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        let n = config.fft_size;
        if !n.is_power_of_two() || n < 16 {
            return Err(Error::Config(format!("bad FFT size {n}")));
        }
        if config.history_size < 2 {
            return Err(Error::Config(format!(
                "bad history size {}",
                config.history_size
            )));
        }
        let width_bins =
            ((config.burst_width * n as f64 / config.sample_rate).round() as usize).max(1);
        if width_bins >= n / 2 {
            return Err(Error::Config(format!(
                "burst width {} covers half the spectrum",
                config.burst_width
            )));
        }
        let threshold = (10.0f32).powf(config.threshold_db / 10.0)
            / config.history_size as Float
            / BLACKMAN_ENBW;
        let ring_len = (config.max_burst_len + config.pre_len + 2 * config.post_len + 4 * n)
            .max(2 * config.sample_rate as usize);
        let window = WindowType::Blackman
            .make_window(n)
            .scaled(1.0 / BLACKMAN_PEAK)
            .0;
        debug!(
            "Detector: fft {n}, width {width_bins} bins, threshold {:.2e}, ring {ring_len}",
            threshold
        );
        Ok(Self {
            window,
            fft: FftCache::new(),
            ring: RingBuffer::new(ring_len),
            pending: Vec::with_capacity(n),
            fft_buf: Vec::with_capacity(n),
            mag2: vec![0.0; n],
            relative: vec![0.0; n],
            mask: vec![false; n],
            history: vec![vec![0.0; n]; config.history_size],
            history_idx: 0,
            history_filled: 0,
            baseline: vec![0.0; n],
            bursts: Vec::new(),
            next_id: 10,
            now: 0,
            squelch_counter: 0,
            force_noise_refresh: false,
            timestamp_base_ns: None,
            threshold,
            width_bins,
            squelched: 0,
            config,
        })
    }

    /// Override the wall clock base, e.g. for deterministic replay.
    /// Normally it is read from the system clock on the first batch.
    pub fn set_timestamp_base(&mut self, ns: u64) {
        self.timestamp_base_ns = Some(ns);
    }

    /// Feed one batch of samples. Returns the bursts that completed
    /// within it.
    pub fn process_batch(&mut self, samples: &[Complex]) -> Vec<BurstData> {
        if self.timestamp_base_ns.is_none() {
            let ns = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
            self.timestamp_base_ns = Some(ns);
        }
        self.ring.push(samples);
        let mut out = Vec::new();
        let mut off = 0;
        while off < samples.len() {
            let need = self.config.fft_size - self.pending.len();
            let take = need.min(samples.len() - off);
            self.pending.extend_from_slice(&samples[off..off + take]);
            off += take;
            self.now += take as u64;
            if self.pending.len() == self.config.fft_size {
                self.process_frame(&mut out);
                self.pending.clear();
            }
        }
        out
    }

    /// End of stream: close out every in-flight burst.
    pub fn flush(&mut self) -> Vec<BurstData> {
        let mut out = Vec::new();
        for b in std::mem::take(&mut self.bursts) {
            self.emit(b, &mut out);
        }
        out
    }

    /// Bursts discarded by squelch so far.
    #[must_use]
    pub fn squelched(&self) -> u64 {
        self.squelched
    }

    fn primed(&self) -> bool {
        self.history_filled == self.config.history_size
    }

    fn process_frame(&mut self, out: &mut Vec<BurstData>) {
        self.fft_buf.clear();
        self.fft_buf.extend_from_slice(&self.pending);
        kernels::mul_window(&mut self.fft_buf, &self.window);
        self.fft.forward(&mut self.fft_buf);
        kernels::fftshift_mag2(&self.fft_buf, &mut self.mag2);

        if self.primed() {
            kernels::relative_magnitude(&self.mag2, &self.baseline, &mut self.relative);
            self.track_and_open(out);
        }

        // Noise floor update. Only clean frames enter the history,
        // except that an over-long burst forces a refresh so a
        // mis-estimated floor cannot pin the detector forever.
        if self.bursts.is_empty() || self.force_noise_refresh {
            self.force_noise_refresh = false;
            let slot = &mut self.history[self.history_idx];
            kernels::baseline_update(&mut self.baseline, slot, &self.mag2);
            slot.copy_from_slice(&self.mag2);
            self.history_idx = (self.history_idx + 1) % self.config.history_size;
            if self.history_filled < self.config.history_size {
                self.history_filled += 1;
                if self.primed() {
                    debug!("Detector: noise history primed at sample {}", self.now);
                }
            }
        }
    }

    fn track_and_open(&mut self, out: &mut Vec<BurstData>) {
        let n = self.config.fft_size;
        let now = self.now;
        let w2 = self.width_bins / 2;

        // Bump bursts whose bin neighborhood is still hot. This uses
        // the unmasked relative magnitudes.
        for b in &mut self.bursts {
            let lo = b.center_bin.saturating_sub(1);
            let hi = (b.center_bin + 1).min(n - 1);
            if self.relative[lo..=hi].iter().any(|r| *r > self.threshold) {
                b.last_active = now;
            }
        }

        // Mask out the neighborhoods of active bursts, then scan the
        // interior bins for fresh peaks.
        for (r, m) in self.relative.iter_mut().zip(self.mask.iter()) {
            if *m {
                *r = 0.0;
            }
        }
        let mut peaks: Vec<(usize, Float)> = (w2.max(1)..n - w2)
            .filter(|bin| self.relative[*bin] > self.threshold)
            .map(|bin| (bin, self.relative[bin]))
            .collect();
        peaks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        // Evict finished bursts.
        let post_len = self.config.post_len as u64;
        let max_len = self.config.max_burst_len as u64;
        let mut keep = Vec::with_capacity(self.bursts.len());
        for b in std::mem::take(&mut self.bursts) {
            if b.last_active + post_len <= now {
                trace!("burst {}: silent, closing", b.id);
                self.emit(b, out);
            } else if now - b.start > max_len {
                trace!("burst {}: over length, closing", b.id);
                self.force_noise_refresh = true;
                self.emit(b, out);
            } else {
                keep.push(b);
            }
        }
        self.bursts = keep;

        // Rebuild the mask from the survivors.
        self.mask.iter_mut().for_each(|m| *m = false);
        for i in 0..self.bursts.len() {
            let bin = self.bursts[i].center_bin;
            self.mask_neighborhood(bin);
        }

        // Open new bursts on the remaining peaks, strongest first.
        for (bin, rel) in peaks {
            if self.mask[bin] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 10;
            let h = self.config.history_size as Float;
            let magnitude = 10.0 * (rel * h * BLACKMAN_ENBW).log10();
            let bin_hz = self.config.sample_rate as Float / n as Float;
            let noise = 10.0
                * (self.baseline[bin] / h / (n * n) as Float / BLACKMAN_ENBW / bin_hz).log10();
            let start = now.saturating_sub(self.config.pre_len as u64);
            trace!("burst {id}: opened at bin {bin}, {magnitude:.1} dB over {noise:.1} dBFS/Hz");
            self.bursts.push(ActiveBurst {
                id,
                start,
                last_active: start,
                center_bin: bin,
                magnitude,
                noise,
                opened_at: now,
            });
            self.mask_neighborhood(bin);
        }

        // Overload squelch: too many simultaneous bursts means the
        // noise floor is wrong. Discard everything that predates this
        // frame, and after repeated overloads distrust the floor
        // entirely.
        if self.bursts.len() > self.config.max_bursts {
            let before = self.bursts.len();
            self.bursts.retain(|b| b.opened_at == now);
            self.squelched += (before - self.bursts.len()) as u64;
            self.squelch_counter += 3;
            warn!(
                "squelch: {} bursts active (max {}), counter {}",
                before, self.config.max_bursts, self.squelch_counter
            );
            if self.squelch_counter >= 10 {
                self.squelch_counter = 0;
                self.history_filled = 0;
                self.history_idx = 0;
                self.baseline.iter_mut().for_each(|b| *b = 0.0);
                for slot in &mut self.history {
                    slot.iter_mut().for_each(|v| *v = 0.0);
                }
                warn!("squelch: noise history reset");
            }
        }
    }

    fn mask_neighborhood(&mut self, bin: usize) {
        let n = self.config.fft_size;
        let w2 = self.width_bins / 2;
        let lo = bin.saturating_sub(w2);
        let hi = (bin + w2).min(n - 1);
        for m in &mut self.mask[lo..=hi] {
            *m = true;
        }
    }

    fn emit(&mut self, b: ActiveBurst, out: &mut Vec<BurstData>) {
        let stop = self.now;
        let samples = self
            .ring
            .extract(b.start, stop + self.config.pre_len as u64);
        let first = b.start.max(self.ring.oldest());
        let base = self.timestamp_base_ns.unwrap_or(0);
        let timestamp_ns =
            base + (first as f64 * 1e9 / self.config.sample_rate) as u64;
        trace!(
            "burst {}: emitting {} samples, span {}..{}",
            b.id,
            samples.len(),
            b.start,
            stop
        );
        out.push(BurstData {
            info: BurstInfo {
                id: b.id,
                start: b.start,
                last_active: b.last_active,
                stop,
                center_bin: b.center_bin,
                magnitude: b.magnitude,
                noise: b.noise,
            },
            center_frequency: self.config.center_frequency,
            sample_rate: self.config.sample_rate,
            fft_size: self.config.fft_size,
            timestamp_ns,
            samples,
        });
    }
}
