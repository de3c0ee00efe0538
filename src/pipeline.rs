/*! The four stage receiver pipeline and its threads.

```text
ingest → [samples queue] → detector → [burst queue] → downmix ×N
       → [frame queue] → demod → sinks
```

Everything a stage needs is packaged into the pipeline context:
counters, the running flag, and the queue handles. The only piece of
state with global character is the running flag itself, which a
signal handler must be able to clear; it is still owned here and
handed out as an `Arc`.

Shutdown cascades front to back: clearing the running flag makes the
ingest close the samples queue; the detector drains, flushes its in
flight bursts, and closes the burst queue; the last downmix worker
closes the frame queue; the demodulator exits when it has drained
that. Every close wakes all waiters, so nothing hangs.
*/
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, warn};

use crate::burst::{BurstData, DownmixFrame};
use crate::demod::{DemodConfig, Demodulator};
use crate::detector::{Detector, DetectorConfig};
use crate::downmix::{DownmixConfig, Downmixer};
use crate::output::{FrameSink, stdout_sink};
use crate::queue::{AddError, Queue};
use crate::sample::{SampleBatch, SampleFormat};
use crate::source::{self, Feed};
use crate::stats::{Counters, StatsReporter};
use crate::{Error, Result};

/// Configuration for the whole pipeline.
pub struct PipelineConfig {
    /// Burst detector stage.
    pub detector: DetectorConfig,
    /// Downmix stage, replicated per worker.
    pub downmix: DownmixConfig,
    /// Symbol recovery stage.
    pub demod: DemodConfig,
    /// Downmix worker count.
    pub workers: usize,
    /// Depth of the ingest → detector queue.
    pub samples_queue_depth: usize,
    /// Depth of the detector → downmix queue.
    pub burst_queue_depth: usize,
    /// Depth of the downmix → demod queue.
    pub frame_queue_depth: usize,
    /// Tag for the RAW output lines; auto generated when `None`.
    pub file_info: Option<String>,
    /// File playback: report `srr` instead of a live burst rate.
    pub playback: bool,
    /// Stats line interval; `None` disables the stats thread.
    pub stats_interval: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::new(10_000_000.0, 1_626_000_000.0)
                .expect("default detector config is valid"),
            downmix: DownmixConfig::default(),
            demod: DemodConfig::default(),
            workers: 4,
            samples_queue_depth: 4096,
            burst_queue_depth: 2048,
            frame_queue_depth: 512,
            file_info: None,
            playback: false,
            stats_interval: Some(Duration::from_secs(1)),
        }
    }
}

/// A running pipeline.
pub struct Pipeline {
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    samples_q: Arc<Queue<SampleBatch>>,
    threads: Vec<JoinHandle<()>>,
    stats_stop: Arc<AtomicBool>,
}

impl Pipeline {
    /// Spawn all stages, writing RAW lines to stdout.
    pub fn spawn(config: PipelineConfig) -> Result<Pipeline> {
        let file_info = config.file_info.clone();
        Self::spawn_with_sinks(config, vec![Box::new(stdout_sink(file_info))])
    }

    /// Spawn all stages with an explicit set of frame sinks.
    pub fn spawn_with_sinks(
        config: PipelineConfig,
        mut sinks: Vec<Box<dyn FrameSink>>,
    ) -> Result<Pipeline> {
        // Construct every stage first so configuration errors
        // surface before any thread exists.
        let mut detector = Detector::new(config.detector.clone())?;
        let workers = config.workers.max(1);
        let mut downmixers = Vec::with_capacity(workers);
        for _ in 0..workers {
            downmixers.push(Downmixer::new(config.downmix.clone())?);
        }
        let demodulator = Demodulator::new(config.demod.clone());

        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::new());
        let samples_q = Arc::new(Queue::<SampleBatch>::new(config.samples_queue_depth));
        let burst_q = Arc::new(Queue::<BurstData>::new(config.burst_queue_depth));
        let frame_q = Arc::new(Queue::<DownmixFrame>::new(config.frame_queue_depth));
        let mut threads = Vec::new();

        // Detector thread.
        {
            let samples_q = samples_q.clone();
            let burst_q = burst_q.clone();
            let counters = counters.clone();
            threads.push(spawn_named("detector", move || {
                while let Some(batch) = samples_q.take() {
                    let bursts = detector.process_batch(&batch.samples);
                    enqueue_bursts(bursts, &burst_q, &counters);
                }
                enqueue_bursts(detector.flush(), &burst_q, &counters);
                debug!("detector: done, closing burst queue");
                burst_q.close();
            })?);
        }

        // Downmix pool. The last worker out closes the frame queue.
        let workers_left = Arc::new(AtomicUsize::new(workers));
        for (i, mut dm) in downmixers.into_iter().enumerate() {
            let burst_q = burst_q.clone();
            let frame_q = frame_q.clone();
            let counters = counters.clone();
            let workers_left = workers_left.clone();
            threads.push(spawn_named(&format!("downmix-{i}"), move || {
                while let Some(burst) = burst_q.take() {
                    if let Some(frame) = dm.process(burst) {
                        Counters::add(&counters.frames_downmixed, 1);
                        if frame_q.put(frame).is_err() {
                            break;
                        }
                    }
                }
                if workers_left.fetch_sub(1, Ordering::AcqRel) == 1 {
                    debug!("downmix: pool drained, closing frame queue");
                    frame_q.close();
                }
            })?);
        }

        // Demod thread fans decoded frames out to the sinks.
        {
            let frame_q = frame_q.clone();
            let counters = counters.clone();
            threads.push(spawn_named("demod", move || {
                while let Some(frame) = frame_q.take() {
                    if let Some(decoded) = demodulator.process(frame) {
                        Counters::add(&counters.frames_ok, 1);
                        for sink in &mut sinks {
                            sink.handle(&decoded);
                        }
                    }
                }
                debug!("demod: done");
            })?);
        }

        // Stats thread.
        let stats_stop = Arc::new(AtomicBool::new(false));
        if let Some(interval) = config.stats_interval {
            let counters = counters.clone();
            let stats_stop = stats_stop.clone();
            let samples_q2 = samples_q.clone();
            let burst_q2 = burst_q.clone();
            let frame_q2 = frame_q.clone();
            let mut reporter = StatsReporter::new(config.detector.sample_rate, config.playback);
            threads.push(spawn_named("stats", move || {
                let step = Duration::from_millis(100);
                let mut elapsed = Duration::ZERO;
                while !stats_stop.load(Ordering::Relaxed) {
                    std::thread::sleep(step);
                    elapsed += step;
                    if elapsed >= interval {
                        elapsed = Duration::ZERO;
                        let q_max = samples_q2
                            .take_max_depth()
                            .max(burst_q2.take_max_depth())
                            .max(frame_q2.take_max_depth());
                        eprintln!("{}", reporter.tick(&counters, q_max));
                    }
                }
            })?);
        }

        Ok(Pipeline {
            running,
            counters,
            samples_q,
            threads,
            stats_stop,
        })
    }

    /// The flag a signal handler should clear to stop the pipeline.
    #[must_use]
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Shared counters, for hosts that report their own stats.
    #[must_use]
    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    /// Push one raw byte block from a live source.
    ///
    /// Never blocks: a saturated samples queue sheds the batch and
    /// returns false. The bytes are converted (hence released) either
    /// way.
    pub fn push_batch(&self, format: SampleFormat, bytes: &[u8]) -> bool {
        let batch = SampleBatch::from_bytes(format, bytes);
        let n = batch.len() as u64;
        match self.samples_q.add(batch) {
            Ok(()) => {
                Counters::add(&self.counters.samples_in, n);
                true
            }
            Err((_, AddError::Full)) => {
                Counters::add(&self.counters.batches_dropped, 1);
                false
            }
            Err((_, AddError::Closed)) => false,
        }
    }

    /// Play a capture through the pipeline.
    ///
    /// Unlike [`Pipeline::push_batch`], file playback blocks on a
    /// full queue instead of shedding: a file cannot be overrun, and
    /// replaying the same capture twice must produce identical
    /// output. Closes the samples queue at EOF.
    pub fn run_reader<R: Read>(&self, reader: R, format: SampleFormat) -> Result<u64> {
        let total = source::read_batches(reader, format, |batch| {
            if !self.running.load(Ordering::Relaxed) {
                return Feed::Stop;
            }
            let n = batch.len() as u64;
            if self.samples_q.put(batch).is_ok() {
                Counters::add(&self.counters.samples_in, n);
                Feed::More
            } else {
                Feed::Stop
            }
        });
        self.samples_q.close();
        total
    }

    /// Begin shutdown: clear the running flag and close the intake.
    /// The close cascades through the stages.
    pub fn shutdown(&self) {
        debug!("pipeline: shutdown requested");
        self.running.store(false, Ordering::Relaxed);
        self.samples_q.close();
    }

    /// Wait for every stage to finish. Call after [`Pipeline::shutdown`]
    /// or after [`Pipeline::run_reader`] reached EOF.
    pub fn join(mut self) -> Result<()> {
        // The stats thread only stops when told; everything else
        // exits off the queue close cascade.
        let mut result = Ok(());
        for th in self.threads.drain(..) {
            let name = th.thread().name().unwrap_or("?").to_string();
            if name == "stats" {
                self.stats_stop.store(true, Ordering::Relaxed);
            }
            debug!("pipeline: joining {name}");
            if th.join().is_err() {
                error!("thread {name} panicked");
                result = Err(Error::msg(format!("thread {name} panicked")));
            }
        }
        let dropped = self.counters.dropped();
        if dropped > 0 {
            warn!("pipeline: shed {dropped} queue entries under load");
        }
        result
    }
}

fn enqueue_bursts(bursts: Vec<BurstData>, burst_q: &Queue<BurstData>, counters: &Counters) {
    for burst in bursts {
        Counters::add(&counters.bursts_detected, 1);
        match burst_q.add(burst) {
            Ok(()) => {}
            Err((_, AddError::Full)) => {
                Counters::add(&counters.bursts_dropped, 1);
            }
            Err((_, AddError::Closed)) => return,
        }
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::DemodFrame;
    use std::io::Cursor;
    use std::sync::Mutex;

    struct CollectSink(Arc<Mutex<Vec<(u64, usize)>>>);
    impl FrameSink for CollectSink {
        fn handle(&mut self, frame: &DemodFrame) {
            self.0.lock().unwrap().push((frame.id, frame.bits.len()));
        }
    }

    fn small_config() -> PipelineConfig {
        let mut detector = DetectorConfig::new(250_000.0, 1_626_200_000.0).unwrap();
        detector.fft_size = 256;
        detector.history_size = 16;
        PipelineConfig {
            detector,
            workers: 2,
            stats_interval: None,
            playback: true,
            ..Default::default()
        }
    }

    #[test]
    fn noise_file_produces_no_frames() {
        let pipeline = Pipeline::spawn_with_sinks(small_config(), Vec::new()).unwrap();
        // 200k samples of weak ci8 noise.
        let bytes: Vec<u8> = (0..400_000)
            .map(|i| ((i * 31 + 7) % 5) as u8) // values 0..4, tiny amplitude
            .collect();
        let total = pipeline
            .run_reader(Cursor::new(bytes), SampleFormat::Ci8)
            .unwrap();
        assert_eq!(total, 200_000);
        let counters = pipeline.counters();
        pipeline.join().unwrap();
        assert_eq!(Counters::get(&counters.frames_ok), 0);
        assert_eq!(Counters::get(&counters.samples_in), 200_000);
    }

    #[test]
    fn shutdown_without_data() {
        let pipeline = Pipeline::spawn_with_sinks(small_config(), Vec::new()).unwrap();
        pipeline.shutdown();
        pipeline.join().unwrap();
    }

    #[test]
    fn shutdown_unblocks_reader() {
        let pipeline = Arc::new(Pipeline::spawn_with_sinks(small_config(), Vec::new()).unwrap());
        let p2 = pipeline.clone();
        // An endless reader: shutdown must stop it.
        struct Endless;
        impl Read for Endless {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                for b in buf.iter_mut() {
                    *b = 0;
                }
                Ok(buf.len())
            }
        }
        let th = std::thread::spawn(move || p2.run_reader(Endless, SampleFormat::Ci8));
        std::thread::sleep(Duration::from_millis(100));
        pipeline.shutdown();
        let read = th.join().unwrap().unwrap();
        assert!(read > 0);
        Arc::into_inner(pipeline).unwrap().join().unwrap();
    }

    #[test]
    fn collect_sink_api() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::spawn_with_sinks(
            small_config(),
            vec![Box::new(CollectSink(seen.clone()))],
        )
        .unwrap();
        pipeline.shutdown();
        pipeline.join().unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }
}
