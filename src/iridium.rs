//! Iridium air interface constants.
//!
//! Only the parts of the protocol the receiver needs: symbol rate, the
//! two unique words that disambiguate downlink from uplink, preamble
//! lengths, and the frame length gates.

use crate::{Complex, Float};

/// Channel symbol rate, symbols per second.
pub const SYMBOLS_PER_SECOND: u32 = 25_000;

/// Length of the unique word, in symbols.
pub const UW_LEN: usize = 12;

/// Downlink unique word, as QPSK symbol indices.
pub const UW_DOWNLINK: [u8; UW_LEN] = [0, 2, 2, 2, 2, 0, 0, 0, 2, 0, 0, 2];

/// Uplink unique word, as QPSK symbol indices.
pub const UW_UPLINK: [u8; UW_LEN] = [2, 2, 0, 0, 0, 2, 0, 0, 2, 0, 2, 2];

/// Short downlink preamble length, in symbols.
pub const PREAMBLE_DOWNLINK: usize = 16;

/// Long downlink preamble length, in symbols. Only seen on some
/// simplex channels; the correlator searches with the short one.
pub const PREAMBLE_DOWNLINK_LONG: usize = 64;

/// Uplink preamble length, in symbols.
pub const PREAMBLE_UPLINK: usize = 32;

/// Frames on carriers above this frequency use the simplex length
/// gates.
pub const SIMPLEX_FREQUENCY_HZ: f64 = 1.626e9;

/// Shortest and longest valid frame, in symbols after the unique word.
///
/// Simplex channels (ring alert and messaging, above
/// [`SIMPLEX_FREQUENCY_HZ`]) carry longer frames than the normal duplex
/// band.
#[must_use]
pub fn frame_length_gate(center_frequency: f64) -> (usize, usize) {
    if center_frequency > SIMPLEX_FREQUENCY_HZ {
        (80, 444)
    } else {
        (131, 191)
    }
}

/// One QPSK constellation point, Gray-free symbol index 0..4.
///
/// Index k sits at 45° + k·90°, at unit magnitude.
#[must_use]
pub fn constellation_point(symbol: u8) -> Complex {
    let phase = symbol_phase(symbol);
    Complex::new(phase.cos(), phase.sin())
}

/// Nominal phase of a QPSK symbol index, in radians.
#[must_use]
pub fn symbol_phase(symbol: u8) -> Float {
    std::f32::consts::FRAC_PI_4 + Float::from(symbol % 4) * std::f32::consts::FRAC_PI_2
}
