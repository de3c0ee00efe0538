/*! Ingest adapter: reads raw IQ bytes and publishes sample batches.

Works over any `Read` (file, stdin, socket) and produces fixed size
batches of converted complex samples. The caller decides what to do
with each batch; the pipeline's ingest thread pushes them into the
samples queue.

A short read that leaves a partial sample at the very end of the
stream is dropped with a warning; everything else is delivered.
*/
use std::io::Read;

use log::{debug, warn};

use crate::sample::{SampleBatch, SampleFormat};
use crate::{Complex, Result};

/// Samples per published batch.
pub const BATCH_SAMPLES: usize = 32_768;

/// What the batch callback wants next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Feed {
    /// Keep reading.
    More,
    /// Stop reading, e.g. on shutdown.
    Stop,
}

/// Read the stream to the end, converting and handing off one batch
/// at a time. Returns the total number of samples delivered.
pub fn read_batches<R, F>(reader: R, format: SampleFormat, mut sink: F) -> Result<u64>
where
    R: Read,
    F: FnMut(SampleBatch) -> Feed,
{
    let mut reader = reader;
    let sample_size = format.sample_size();
    let mut buf = vec![0u8; BATCH_SAMPLES * sample_size];
    let mut filled = 0usize;
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            // EOF: deliver whole samples, drop a trailing fragment.
            let whole = filled - filled % sample_size;
            if whole != filled {
                warn!("dropping {} trailing bytes of a partial sample", filled - whole);
            }
            if whole > 0 {
                let batch = SampleBatch::from_bytes(format, &buf[..whole]);
                total += batch.len() as u64;
                let _ = sink(batch);
            }
            debug!("ingest: EOF after {total} samples");
            return Ok(total);
        }
        filled += n;
        if filled == buf.len() {
            let batch = SampleBatch::from_bytes(format, &buf);
            total += batch.len() as u64;
            filled = 0;
            if sink(batch) == Feed::Stop {
                debug!("ingest: stopped after {total} samples");
                return Ok(total);
            }
        }
    }
}

/// Generate `n` samples of a complex tone, for tests and loopback
/// checks.
#[must_use]
pub fn tone(n: usize, freq: crate::Float, amplitude: crate::Float) -> Vec<Complex> {
    (0..n)
        .map(|i| {
            let ph = 2.0 * std::f32::consts::PI * freq * i as crate::Float;
            Complex::new(ph.cos(), ph.sin()) * amplitude
        })
        .collect()
}
