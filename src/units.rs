//! Numeric helpers shared by the payload decoder and the delivery pipeline.
//!
//! Everything here is pure: hex decoding with byte reversal, linear range
//! remapping and the float <-> wire conversions used on the CAN side.

use thiserror::Error;

/// Size of an IEEE-754 single on the wire.
pub const WIRE_FLOAT_LEN: usize = 4;

// u64 holds at most 8 bytes
const MAX_INT_BYTES: usize = 8;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("malformed hex {input:?}: {reason}")]
    MalformedHex { input: String, reason: &'static str },
    #[error("degenerate range [{min}, {max}]")]
    DegenerateRange { min: f64, max: f64 },
}

impl UnitError {
    fn malformed(input: &str, reason: &'static str) -> Self {
        UnitError::MalformedHex {
            input: input.to_string(),
            reason,
        }
    }
}

/// Parse a hex string into bytes, in the order they appear.
pub fn hex_to_bytes(text: &str) -> Result<Vec<u8>, UnitError> {
    if text.is_empty() {
        return Err(UnitError::malformed(text, "empty"));
    }

    hex::decode(text).map_err(|e| {
        let reason = match e {
            hex::FromHexError::OddLength => "odd length",
            hex::FromHexError::InvalidHexCharacter { .. } => "non-hex character",
            hex::FromHexError::InvalidStringLength => "invalid length",
        };
        UnitError::malformed(text, reason)
    })
}

/// Decode `hex` as a little-endian byte sequence: the first byte is the least
/// significant one.
///
/// `"001c07"` reads as bytes `00 1c 07`, reversed to `0x071c00`.
pub fn decode_le_hex_to_int(hex: &str) -> Result<u64, UnitError> {
    let bytes = hex_to_bytes(hex)?;
    if bytes.len() > MAX_INT_BYTES {
        return Err(UnitError::malformed(hex, "wider than 64 bits"));
    }

    Ok(bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte)))
}

/// Inverse of [`decode_le_hex_to_int`]: render the low `byte_len` bytes of
/// `value` least significant first.
pub fn encode_le_int_to_hex(value: u64, byte_len: usize) -> String {
    let bytes = value.to_le_bytes();
    hex::encode(&bytes[..byte_len.min(MAX_INT_BYTES)])
}

/// Linearly map `x` from `[old_min, old_max]` onto `[new_min, new_max]`.
///
/// Either range may be given high-to-low. A reversed input range measures the
/// fraction from its upper end, a reversed output range lays the result out
/// from its upper end, so `remap(x, 50, 0, 0, 5)` falls as `x` rises. Values
/// outside the input range are extrapolated.
pub fn remap(x: f64, old_min: f64, old_max: f64, new_min: f64, new_max: f64) -> Result<f64, UnitError> {
    let (in_lo, in_hi, reverse_input) = normalize(old_min, old_max)?;
    let (out_lo, out_hi, reverse_output) = normalize(new_min, new_max)?;

    let fraction = if reverse_input {
        (in_hi - x) / (in_hi - in_lo)
    } else {
        (x - in_lo) / (in_hi - in_lo)
    };
    let portion = fraction * (out_hi - out_lo);

    Ok(if reverse_output {
        out_hi - portion
    } else {
        out_lo + portion
    })
}

fn normalize(a: f64, b: f64) -> Result<(f64, f64, bool), UnitError> {
    let lo = a.min(b);
    let hi = a.max(b);
    // min/max drop a NaN bound, collapsing the range onto the other one
    if lo == hi || !(hi - lo).is_finite() {
        return Err(UnitError::DegenerateRange { min: a, max: b });
    }
    Ok((lo, hi, lo != a))
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Encode a float for a CAN frame: IEEE-754 single, little-endian.
pub fn float_to_wire_bytes(value: f32) -> [u8; WIRE_FLOAT_LEN] {
    value.to_le_bytes()
}

/// Decode a 4-byte float field taken from a sensor payload.
///
/// Payload floats are big-endian, which is the opposite of what
/// [`float_to_wire_bytes`] produces for the bus. Both orders are kept as
/// observed on hardware; use [`frame_bytes_to_float`] to read back a frame.
pub fn wire_bytes_to_float(bytes: [u8; WIRE_FLOAT_LEN]) -> f32 {
    f32::from_be_bytes(bytes)
}

/// Little-endian inverse of [`float_to_wire_bytes`].
pub fn frame_bytes_to_float(bytes: [u8; WIRE_FLOAT_LEN]) -> f32 {
    f32::from_le_bytes(bytes)
}
