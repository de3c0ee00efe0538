#![warn(missing_docs)]
/*! Standalone receiver pipeline for the Iridium L-band satellite system.

The crate ingests a continuous stream of complex IQ samples from a file
or an SDR host, finds the short RF bursts Iridium transmits, corrects
their carrier and timing offsets, demodulates the DQPSK symbols, and
emits one line of bits per frame on stdout, plus decoded frames to any
registered sinks.

# Architecture overview

Four stages, connected by bounded queues and running on their own
threads:

```text
   [ IQ ingest (ci8 / ci16 / cf32) ]
               ↓ samples queue (drop on full)
   [ Burst detector                ]
   [ windowed FFT + noise history  ]
               ↓ burst queue (drop on full)
   [ Downmix workers ×N            ]
   [ CFO, decimation, sync search  ]
               ↓ frame queue (block on full)
   [ Symbol recovery               ]
   [ Gardner, PLL, UW check, DQPSK ]
               ↓
   [ stdout RAW lines + frame sinks ]
```

Load shedding is biased towards the front: a dropped sample batch is
much cheaper than a dropped decoded frame.

# Example

Run a cf32 capture through the whole pipeline:

```no_run
use iridium_rx::detector::DetectorConfig;
use iridium_rx::pipeline::{Pipeline, PipelineConfig};
use iridium_rx::sample::SampleFormat;

let config = PipelineConfig {
    detector: DetectorConfig::new(10_000_000.0, 1_626_000_000.0)?,
    ..Default::default()
};
let pipeline = Pipeline::spawn(config)?;
let f = std::fs::File::open("capture.cf32")?;
pipeline.run_reader(f, SampleFormat::Cf32)?;
pipeline.join()?;
# Ok::<(), anyhow::Error>(())
```
*/

pub mod burst;
pub mod demod;
pub mod detector;
pub mod downmix;
pub mod fft;
pub mod fir;
pub mod iridium;
pub mod kernels;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod ringbuffer;
pub mod rotator;
pub mod sample;
pub mod source;
pub mod stats;
pub mod window;

/// Float type used. Usually f32, but not guaranteed.
pub type Float = f32;

/// Complex (I/Q) data.
pub type Complex = num_complex::Complex<Float>;

/// Receiver error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration. Fatal at construction time.
    #[error("invalid config: {0}")]
    Config(String),

    /// IO error, from file sources and sinks.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Free form error.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create a free form error from a message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Error::Msg(msg.into())
    }
}

/// Receiver result.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
pub(crate) mod tests {
    //! Test helper functions.
    use super::*;

    /// For testing, assert that two slices are almost equal.
    ///
    /// Floating point numbers are almost never exactly equal.
    pub fn assert_almost_equal_complex(left: &[Complex], right: &[Complex]) {
        assert_eq!(
            left.len(),
            right.len(),
            "\nleft: {left:?}\nright: {right:?}"
        );
        for i in 0..left.len() {
            let dist = (left[i] - right[i]).norm_sqr().sqrt();
            if dist > 0.001 {
                assert_eq!(
                    left[i], right[i],
                    "\nElement {i}:\nleft: {left:?}\nright: {right:?}"
                );
            }
        }
    }

    /// For testing, assert that two slices are almost equal.
    pub fn assert_almost_equal_float(left: &[Float], right: &[Float]) {
        assert_eq!(
            left.len(),
            right.len(),
            "\nleft: {left:?}\nright: {right:?}"
        );
        for i in 0..left.len() {
            if (left[i] - right[i]).abs() > 0.001 {
                assert_eq!(left[i], right[i], "\nleft: {left:?}\nright: {right:?}");
            }
        }
    }
}
/* vim: textwidth=80
 */
