//! TPMS advertisement payload decoding.
//!
//! A payload is the manufacturer-specific data of a sensor beacon, carried as a
//! hex string. Where each field sits depends on the sensor hardware generation,
//! so decoding is always driven by a [`PayloadProfile`].

use crate::units::{self, UnitError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const PA_PER_BAR: f64 = 100_000.0;
const BAR_TO_PSI: f64 = 14.503_773_8;
const CENTI_DEGREES: f64 = 100.0;

pub const STANDARD_PROFILE: &str = "standard";
pub const COMPACT_PROFILE: &str = "compact";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("malformed payload: need {expected} hex chars, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },
    #[error("{field} field: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: UnitError,
    },
    #[error("invalid profile, {field} field {reason}")]
    InvalidProfile { field: &'static str, reason: &'static str },
}

/// Position of one field inside the payload, in hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpan {
    pub offset: usize,
    pub len: usize,
}

impl FieldSpan {
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// One past the last character, `None` if that overflows.
    pub const fn end(&self) -> Option<usize> {
        self.offset.checked_add(self.len)
    }
}

/// Field layout of one sensor hardware generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadProfile {
    /// Length of an accepted payload, in hex characters.
    pub payload_len: usize,
    pub pressure: FieldSpan,
    pub temperature: FieldSpan,
    pub battery: FieldSpan,
}

impl PayloadProfile {
    /// 16-byte advertisement read by the current sensors.
    pub const fn standard() -> Self {
        Self {
            payload_len: 32,
            pressure: FieldSpan::new(12, 6),
            temperature: FieldSpan::new(20, 4),
            battery: FieldSpan::new(28, 2),
        }
    }

    /// 15-byte advertisement of the older sensors, no trailing pad byte.
    pub const fn compact() -> Self {
        Self {
            payload_len: 30,
            ..Self::standard()
        }
    }

    /// Look up a built-in profile by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            STANDARD_PROFILE => Some(Self::standard()),
            COMPACT_PROFILE => Some(Self::compact()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.payload_len == 0 || self.payload_len % 2 != 0 {
            return Err(PayloadError::InvalidProfile {
                field: "payload",
                reason: "length must be even and non-zero",
            });
        }

        for (field, span) in self.fields() {
            if span.len == 0 || span.len % 2 != 0 {
                return Err(PayloadError::InvalidProfile {
                    field,
                    reason: "length must be even and non-zero",
                });
            }
            if span.len > 16 {
                return Err(PayloadError::InvalidProfile {
                    field,
                    reason: "wider than 64 bits",
                });
            }
            if !span.end().is_some_and(|end| end <= self.payload_len) {
                return Err(PayloadError::InvalidProfile {
                    field,
                    reason: "extends past the payload",
                });
            }
        }
        Ok(())
    }

    /// Hex characters needed to read every field.
    pub fn required_len(&self) -> usize {
        self.fields()
            .iter()
            .map(|(_, span)| span.end().unwrap_or(usize::MAX))
            .max()
            .unwrap_or(0)
    }

    fn fields(&self) -> [(&'static str, FieldSpan); 3] {
        [
            ("pressure", self.pressure),
            ("temperature", self.temperature),
            ("battery", self.battery),
        ]
    }
}

impl Default for PayloadProfile {
    fn default() -> Self {
        Self::standard()
    }
}

/// Physical values carried by one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodedReading {
    pub pressure_psi: f64,
    pub temperature_f: f64,
    pub battery_pct: u8,
}

pub fn decode_payload(payload: &str, profile: &PayloadProfile) -> Result<DecodedReading, PayloadError> {
    let required = profile.required_len();
    if payload.len() < required {
        return Err(PayloadError::MalformedPayload {
            expected: required,
            actual: payload.len(),
        });
    }

    let pressure_raw = read_field(payload, profile.pressure, "pressure")?;
    let temperature_raw = read_field(payload, profile.temperature, "temperature")?;
    let battery_raw = read_field(payload, profile.battery, "battery")?;

    // raw pressure is in pascal
    let pressure_psi = units::round_to(pressure_raw as f64 / PA_PER_BAR * BAR_TO_PSI, 2);
    let celsius = temperature_raw as f64 / CENTI_DEGREES;
    let temperature_f = units::round_to(celsius * 1.8 + 32.0, 2);
    let battery_pct = u8::try_from(battery_raw).unwrap_or(u8::MAX);

    Ok(DecodedReading {
        pressure_psi,
        temperature_f,
        battery_pct,
    })
}

fn read_field(payload: &str, span: FieldSpan, field: &'static str) -> Result<u64, PayloadError> {
    // get() instead of indexing: a non-ASCII payload may not split on these offsets
    let hex = span
        .end()
        .and_then(|end| payload.get(span.offset..end))
        .ok_or_else(|| PayloadError::Field {
            field,
            source: UnitError::MalformedHex {
                input: payload.to_string(),
                reason: "field is not on a character boundary",
            },
        })?;

    units::decode_le_hex_to_int(hex).map_err(|source| PayloadError::Field { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE_PAYLOAD: &str = "80eaca502ed8580903001c0700005f00";

    fn four_field_profile() -> PayloadProfile {
        PayloadProfile {
            payload_len: 32,
            pressure: FieldSpan::new(18, 6),
            temperature: FieldSpan::new(24, 4),
            battery: FieldSpan::new(28, 2),
        }
    }

    #[test]
    fn test_standard_profile_decode() {
        let reading = decode_payload(REFERENCE_PAYLOAD, &PayloadProfile::standard()).unwrap();

        // 580903 -> 0x030958 = 199000 -> 1.99 bar
        assert_eq!(reading.pressure_psi, 28.86);
        // 1c07 -> 0x071c = 1820 -> 18.2 C
        assert_eq!(reading.temperature_f, 64.76);
        assert_eq!(reading.battery_pct, 95);
    }

    #[test]
    fn test_four_field_profile_decode() {
        let reading = decode_payload(REFERENCE_PAYLOAD, &four_field_profile()).unwrap();

        // 001c07 -> 0x071c00 = 465920 -> 4.6592 bar
        assert_eq!(reading.pressure_psi, 67.58);
        assert_eq!(reading.temperature_f, 32.0);
        assert_eq!(reading.battery_pct, 95);
    }

    #[test]
    fn test_compact_profile_accepts_shorter_payload() {
        let compact = &REFERENCE_PAYLOAD[..30];
        let reading = decode_payload(compact, &PayloadProfile::compact()).unwrap();
        assert_eq!(reading.battery_pct, 95);

        // the standard profile only needs the fields, not the pad byte
        assert!(decode_payload(compact, &PayloadProfile::standard()).is_ok());
    }

    #[test]
    fn test_short_payload_rejected() {
        let result = decode_payload("80eaca502ed858", &PayloadProfile::standard());
        assert_eq!(
            result,
            Err(PayloadError::MalformedPayload { expected: 30, actual: 14 })
        );
    }

    #[test]
    fn test_non_hex_field_rejected() {
        let mut payload = REFERENCE_PAYLOAD.to_string();
        payload.replace_range(20..22, "zz");
        let result = decode_payload(&payload, &PayloadProfile::standard());
        assert!(matches!(result, Err(PayloadError::Field { field: "temperature", .. })));
    }

    #[test]
    fn test_profile_validation() {
        assert!(PayloadProfile::standard().validate().is_ok());
        assert!(PayloadProfile::compact().validate().is_ok());
        assert!(four_field_profile().validate().is_ok());

        let mut overlong = PayloadProfile::standard();
        overlong.battery = FieldSpan::new(30, 4);
        assert!(matches!(
            overlong.validate(),
            Err(PayloadError::InvalidProfile { field: "battery", .. })
        ));

        let mut odd = PayloadProfile::standard();
        odd.pressure = FieldSpan::new(12, 5);
        assert!(odd.validate().is_err());

        let mut odd_payload = PayloadProfile::standard();
        odd_payload.payload_len = 31;
        assert!(odd_payload.validate().is_err());
    }

    #[test]
    fn test_overflowing_span_rejected() {
        let profile: PayloadProfile = serde_json::from_str(
            r#"{ "payload_len": 32,
                 "pressure": { "offset": 18446744073709551615, "len": 6 },
                 "temperature": { "offset": 20, "len": 4 },
                 "battery": { "offset": 28, "len": 2 } }"#,
        )
        .unwrap();

        assert_eq!(profile.pressure.end(), None);
        assert_eq!(
            profile.validate(),
            Err(PayloadError::InvalidProfile {
                field: "pressure",
                reason: "extends past the payload",
            })
        );
        assert!(matches!(
            decode_payload(REFERENCE_PAYLOAD, &profile),
            Err(PayloadError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(PayloadProfile::builtin("standard"), Some(PayloadProfile::standard()));
        assert_eq!(PayloadProfile::builtin("compact").map(|p| p.payload_len), Some(30));
        assert!(PayloadProfile::builtin("gen3").is_none());
    }
}
