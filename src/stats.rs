/*! Pipeline counters and the once-a-second stats line.

All counters live in one [`Counters`] struct shared by `Arc`, not in
process globals; the pipeline context hands a clone to every stage.
The reporter turns them into a single stderr line per second:

```text
1717171717 i:82/s i_avg:78/s q_max:12 i_ok:64% o:53/s ok:61% ok:50/s ok_avg:62% ok:1503 ok_avg:48/s d:0
```

During file playback the live `i:<N>/s` field is replaced with
`srr:<pct>%`, the consumed sample rate relative to nominal.
*/
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Shared event counters, updated by the pipeline stages.
#[derive(Default)]
pub struct Counters {
    /// Complex samples accepted by ingest.
    pub samples_in: AtomicU64,
    /// Sample batches shed because the samples queue was full.
    pub batches_dropped: AtomicU64,
    /// Bursts emitted by the detector.
    pub bursts_detected: AtomicU64,
    /// Bursts shed because the burst queue was full.
    pub bursts_dropped: AtomicU64,
    /// Frames produced by the downmix pool.
    pub frames_downmixed: AtomicU64,
    /// Frames successfully demodulated.
    pub frames_ok: AtomicU64,
}

impl Counters {
    /// New zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump a counter.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter.
    #[must_use]
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Total shed across all queues.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        Self::get(&self.batches_dropped) + Self::get(&self.bursts_dropped)
    }
}

#[derive(Clone, Copy, Default)]
struct Snapshot {
    samples: u64,
    bursts: u64,
    downmixed: u64,
    ok: u64,
}

/// Builds the per-second stats line from counter deltas.
pub struct StatsReporter {
    start: Instant,
    last: Instant,
    prev: Snapshot,
    /// Nominal input rate, for the playback `srr` field.
    sample_rate: f64,
    playback: bool,
}

impl StatsReporter {
    /// Create a reporter. `playback` selects the `srr` variant of the
    /// input field.
    #[must_use]
    pub fn new(sample_rate: f64, playback: bool) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            prev: Snapshot::default(),
            sample_rate,
            playback,
        }
    }

    /// Produce the stats line for the interval since the last tick.
    pub fn tick(&mut self, counters: &Counters, q_max: usize) -> String {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f64().max(1e-6);
        let total_t = now.duration_since(self.start).as_secs_f64().max(1e-6);
        self.last = now;

        let cur = Snapshot {
            samples: Counters::get(&counters.samples_in),
            bursts: Counters::get(&counters.bursts_detected),
            downmixed: Counters::get(&counters.frames_downmixed),
            ok: Counters::get(&counters.frames_ok),
        };
        let prev = self.prev;
        self.prev = cur;

        let epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let input = if self.playback {
            let srr = (cur.samples - prev.samples) as f64 / dt / self.sample_rate * 100.0;
            format!("srr:{srr:.0}%")
        } else {
            format!("i:{:.0}/s", (cur.bursts - prev.bursts) as f64 / dt)
        };
        let i_avg = cur.bursts as f64 / total_t;
        let pct = |num: u64, den: u64| {
            if den == 0 { 0.0 } else { 100.0 * num as f64 / den as f64 }
        };

        format!(
            "{epoch} {input} i_avg:{i_avg:.0}/s q_max:{q_max} i_ok:{:.0}% o:{:.0}/s ok:{:.0}% ok:{:.0}/s ok_avg:{:.0}% ok:{} ok_avg:{:.0}/s d:{}",
            pct(cur.ok, cur.bursts),
            (cur.downmixed - prev.downmixed) as f64 / dt,
            pct(cur.ok - prev.ok, cur.bursts - prev.bursts),
            (cur.ok - prev.ok) as f64 / dt,
            pct(cur.ok, cur.bursts),
            cur.ok,
            cur.ok as f64 / total_t,
            counters.dropped(),
        )
    }
}
