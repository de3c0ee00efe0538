/*! Sample history ring for burst extraction.

The detector writes every input sample into this ring and, when a
burst ends, copies the burst's extent back out. Positions are absolute
sample indices since the start of the stream, so extraction does not
care how often the ring has wrapped; it only clamps to what is still
retained.

Only the detector thread touches the ring. Downstream stages get their
own copies inside `BurstData`, so nothing here is shared across
threads.
*/
use crate::Complex;

/// Fixed capacity ring of complex samples, addressed by absolute
/// sample index.
pub struct RingBuffer {
    buf: Vec<Complex>,
    /// Absolute index of the next sample to be written.
    end: u64,
}

impl RingBuffer {
    /// Create a ring retaining `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            buf: vec![Complex::default(); capacity],
            end: 0,
        }
    }

    /// Retained capacity in samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Absolute index one past the newest sample.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Absolute index of the oldest retained sample.
    #[must_use]
    pub fn oldest(&self) -> u64 {
        self.end.saturating_sub(self.buf.len() as u64)
    }

    /// Append samples, overwriting the oldest. Never blocks.
    pub fn push(&mut self, samples: &[Complex]) {
        let cap = self.buf.len();
        // If one batch exceeds the capacity only the tail survives
        // anyway.
        let skip = samples.len().saturating_sub(cap);
        for s in &samples[skip..] {
            let pos = ((self.end + skip as u64) % cap as u64) as usize;
            self.buf[pos] = *s;
            self.end += 1;
        }
        self.end += skip as u64;
    }

    /// Copy out `[start, stop)`, clamped to the retained range.
    ///
    /// A burst whose beginning has already been overwritten comes back
    /// shorter; the downstream minimum-length gate deals with it.
    #[must_use]
    pub fn extract(&self, start: u64, stop: u64) -> Vec<Complex> {
        let start = start.max(self.oldest());
        let stop = stop.min(self.end);
        if start >= stop {
            return Vec::new();
        }
        let cap = self.buf.len() as u64;
        let mut out = Vec::with_capacity((stop - start) as usize);
        for idx in start..stop {
            out.push(self.buf[(idx % cap) as usize]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Float;

    fn seq(from: usize, n: usize) -> Vec<Complex> {
        (from..from + n)
            .map(|i| Complex::new(i as Float, 0.0))
            .collect()
    }

    #[test]
    fn extract_before_wrap() {
        let mut rb = RingBuffer::new(16);
        rb.push(&seq(0, 10));
        assert_eq!(rb.end(), 10);
        assert_eq!(rb.oldest(), 0);
        let got = rb.extract(3, 7);
        assert_eq!(got, seq(3, 4));
    }

    #[test]
    fn extract_after_wrap() {
        let mut rb = RingBuffer::new(8);
        rb.push(&seq(0, 20));
        assert_eq!(rb.end(), 20);
        assert_eq!(rb.oldest(), 12);
        // Request includes overwritten history; result clamps.
        let got = rb.extract(8, 16);
        assert_eq!(got, seq(12, 4));
    }

    #[test]
    fn extract_clamps_to_end() {
        let mut rb = RingBuffer::new(8);
        rb.push(&seq(0, 4));
        let got = rb.extract(2, 100);
        assert_eq!(got, seq(2, 2));
        assert!(rb.extract(4, 4).is_empty());
        assert!(rb.extract(10, 5).is_empty());
    }

    #[test]
    fn giant_batch_keeps_tail() {
        let mut rb = RingBuffer::new(4);
        rb.push(&seq(0, 10));
        assert_eq!(rb.end(), 10);
        assert_eq!(rb.extract(0, 10), seq(6, 4));
    }
}
