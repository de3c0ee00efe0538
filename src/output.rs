/*! Decoded frame output: the `RAW:` text format and the sink fanout.

Every demodulated frame goes to stdout as one `RAW:` line in the
iridium-toolkit format, and to every registered [`FrameSink`]. The
sinks are how collaborators (map feeds, GSMTAP, reassemblers) attach;
the core ships only the text one.
*/
use std::io::Write;

use log::warn;

use crate::burst::DemodFrame;

/// Consumer of decoded frames. Register implementations with the
/// pipeline before spawning it.
pub trait FrameSink: Send {
    /// Called once per decoded frame, from the demodulator thread.
    fn handle(&mut self, frame: &DemodFrame);
}

/// Formats `RAW:` lines.
///
/// The time base is the first frame's timestamp truncated to whole
/// seconds, so the millisecond field starts near zero and stays
/// readable.
pub struct RawFormatter {
    file_info: Option<String>,
    base_ns: Option<u64>,
}

impl RawFormatter {
    /// Create a formatter. Without a `file_info` tag, one is
    /// generated as `i-<epoch>-t1` from the first frame.
    #[must_use]
    pub fn new(file_info: Option<String>) -> Self {
        Self {
            file_info,
            base_ns: None,
        }
    }

    /// Format one frame.
    pub fn format(&mut self, f: &DemodFrame) -> String {
        let base = *self
            .base_ns
            .get_or_insert(f.timestamp_ns / 1_000_000_000 * 1_000_000_000);
        let file_info = self
            .file_info
            .get_or_insert_with(|| format!("i-{}-t1", base / 1_000_000_000));
        let ts_ms = (f.timestamp_ns as i64 - base as i64) as f64 / 1e6;
        format!(
            "RAW: {} {:012.4} {:010} N:{:05.2}{:+06.2} I:{:011} {:3}% {:.5} {:3} {}",
            file_info,
            ts_ms,
            f.center_frequency.round() as i64,
            f.magnitude,
            f.noise,
            f.id,
            f.confidence,
            f.level,
            f.n_payload,
            f.bits_string(),
        )
    }
}

/// Sink writing `RAW:` lines to any writer, usually stdout.
pub struct RawSink<W: Write + Send> {
    w: W,
    formatter: RawFormatter,
}

impl<W: Write + Send> RawSink<W> {
    /// Create a sink around a writer.
    pub fn new(w: W, file_info: Option<String>) -> Self {
        Self {
            w,
            formatter: RawFormatter::new(file_info),
        }
    }
}

impl<W: Write + Send> FrameSink for RawSink<W> {
    fn handle(&mut self, frame: &DemodFrame) {
        let line = self.formatter.format(frame);
        if let Err(e) = writeln!(self.w, "{line}") {
            warn!("RAW sink write failed: {e}");
        }
    }
}

/// A `RAW:` sink on stdout.
#[must_use]
pub fn stdout_sink(file_info: Option<String>) -> RawSink<std::io::Stdout> {
    RawSink::new(std::io::stdout(), file_info)
}
