//! Frame codec for the watch's notification protocol.
//!
//! Frames travel as raw bytes over the notify characteristic and are handled
//! here as uppercase hex strings. A frame looks like
//! `[header:2B][opcode:2B][length:2B][payload][checksum:2B]`.
//!
//! Two payload shapes are understood:
//!
//! - **Battery** frames start with `DA86` and carry the level at hex `[8:12]`.
//!   They are not checksummed.
//! - **Vitals** frames carry heart rate, blood pressure, oxygen and glucose at
//!   fixed payload offsets and must pass the CRC-16 check first.
//!
//! The checksum is CRC-16/ARC (reflected polynomial `0xA001`, seed `0`) over the
//! whole frame body, written on the wire with its two bytes swapped.

use std::fmt::Write as _;
use std::ops::Range;

use thiserror::Error;

use crate::types::{BatteryReading, BloodPressure, VitalsSample};

/// Prefix reserved for battery frames.
pub const BATTERY_FRAME_PREFIX: &str = "DA86";

/// Shortest vitals frame accepted: 6 bytes.
pub const MIN_VITALS_FRAME_HEX: usize = 12;

/// Shortest battery frame accepted, in hex characters.
pub const MIN_BATTERY_FRAME_HEX: usize = 10;

/// Payload length below which the watch is still measuring.
pub const MIN_VITALS_PAYLOAD_HEX: usize = 44;

const CHECKSUM_HEX_LEN: usize = 4;
const DECLARED_LENGTH: Range<usize> = 4..8;
const PAYLOAD_OFFSET: usize = 8;
const BATTERY_LEVEL: Range<usize> = 8..12;

const HEART_RATE: Range<usize> = 38..40;
const SYSTOLIC: Range<usize> = 40..42;
const DIASTOLIC: Range<usize> = 42..44;
const BLOOD_OXYGEN: Range<usize> = 44..46;
const BLOOD_GLUCOSE: Range<usize> = 56..58;

const CRC16_POLY: u16 = 0xA001;

/// Why a frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame is shorter than the minimum for its type.
    #[error("Frame too short: {len} hex characters, need at least {min}")]
    TooShort {
        /// Length received.
        len: usize,
        /// Minimum length for this frame type.
        min: usize,
    },

    /// The trailing checksum does not match the frame body.
    #[error("CRC verification failed: computed {computed}, received {received}")]
    ChecksumMismatch {
        /// Checksum computed over the body, in wire order.
        computed: String,
        /// Checksum carried by the frame.
        received: String,
    },

    /// The watch has not finished measuring; the payload is partial.
    #[error("Measuring vitals: payload is {len} hex characters")]
    Incomplete {
        /// Payload length received.
        len: usize,
    },

    /// A field is missing or is not valid hexadecimal.
    #[error("Error parsing {field}: {value:?}")]
    ValueParse {
        /// Field being parsed.
        field: &'static str,
        /// Raw text that failed to parse.
        value: String,
    },
}

impl DecodeError {
    /// Returns `true` for conditions that are part of normal operation.
    ///
    /// A partial payload just means the next poll will carry the reading.
    #[inline]
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::Incomplete { .. })
    }

    fn parse(field: &'static str, value: &str) -> Self {
        Self::ValueParse {
            field,
            value: value.to_string(),
        }
    }
}

/// Which decoder a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Battery level frame (`DA86...`).
    Battery,
    /// Anything else is treated as vitals.
    Vitals,
}

impl FrameKind {
    /// Classify a hex frame by its prefix.
    #[must_use]
    pub fn of(hex: &str) -> Self {
        if hex.starts_with(BATTERY_FRAME_PREFIX) {
            Self::Battery
        } else {
            Self::Vitals
        }
    }
}

/// A successfully decoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Telemetry {
    /// Battery frame.
    Battery(BatteryReading),
    /// Vitals frame.
    Vitals(VitalsSample),
}

/// Decode a notification, dispatching on its frame type.
///
/// # Errors
///
/// Returns the decoder's [`DecodeError`] for the frame type.
pub fn decode_frame(hex: &str) -> Result<Telemetry, DecodeError> {
    match FrameKind::of(hex) {
        FrameKind::Battery => decode_battery(hex).map(Telemetry::Battery),
        FrameKind::Vitals => decode_vitals(hex).map(Telemetry::Vitals),
    }
}

/// CRC-16/ARC over `bytes`.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |mut crc, &byte| {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ CRC16_POLY
            } else {
                crc >> 1
            };
        }
        crc
    })
}

/// Render a checksum the way it appears on the wire: 4 uppercase hex digits
/// with the byte pairs exchanged (`0x1234` becomes `"3412"`).
#[must_use]
pub fn byte_swap16(value: u16) -> String {
    format!("{:04X}", value.swap_bytes())
}

/// Check `received` (wire order, any case) against the checksum of `payload`.
#[must_use]
pub fn verify(payload: &[u8], received: &str) -> bool {
    byte_swap16(checksum(payload)).eq_ignore_ascii_case(received)
}

/// Uppercase hex rendering of raw notification bytes.
#[must_use]
pub fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02X}");
        out
    })
}

/// Parse a hex string into bytes.
///
/// # Errors
///
/// Returns [`DecodeError::ValueParse`] for odd-length or non-hex input.
pub fn decode_hex(hex: &str) -> Result<Vec<u8>, DecodeError> {
    // from_str_radix alone would accept a leading '+'
    if hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::parse("hex", hex));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            let pair = &hex[i..i + 2];
            u8::from_str_radix(pair, 16).map_err(|_| DecodeError::parse("hex", pair))
        })
        .collect()
}

/// Append the wire checksum to a frame body.
///
/// # Errors
///
/// Returns [`DecodeError::ValueParse`] if `body` is not valid hex.
pub fn seal_frame(body: &str) -> Result<String, DecodeError> {
    let bytes = decode_hex(body)?;
    Ok(format!("{}{}", body.to_ascii_uppercase(), byte_swap16(checksum(&bytes))))
}

/// Decode a vitals frame.
///
/// # Errors
///
/// - [`DecodeError::TooShort`] for frames under 6 bytes
/// - [`DecodeError::ChecksumMismatch`] when the CRC does not validate
/// - [`DecodeError::Incomplete`] while the watch is still measuring
/// - [`DecodeError::ValueParse`] for malformed hex or missing fields
pub fn decode_vitals(hex: &str) -> Result<VitalsSample, DecodeError> {
    if hex.len() < MIN_VITALS_FRAME_HEX {
        return Err(DecodeError::TooShort {
            len: hex.len(),
            min: MIN_VITALS_FRAME_HEX,
        });
    }
    if !hex.is_ascii() {
        return Err(DecodeError::parse("frame", hex));
    }

    let (data, received) = hex.split_at(hex.len() - CHECKSUM_HEX_LEN);
    let body = decode_hex(data)?;
    let computed = byte_swap16(checksum(&body));
    if !computed.eq_ignore_ascii_case(received) {
        return Err(DecodeError::ChecksumMismatch {
            computed,
            received: received.to_string(),
        });
    }

    let declared = hex_field(data, "declared length", DECLARED_LENGTH)?;
    let payload = &data[PAYLOAD_OFFSET..];
    tracing::trace!(declared, actual = payload.len() / 2, "vitals frame payload");

    if payload.len() < MIN_VITALS_PAYLOAD_HEX {
        return Err(DecodeError::Incomplete { len: payload.len() });
    }

    Ok(VitalsSample {
        heart_rate: hex_field(payload, "heart rate", HEART_RATE)?,
        blood_pressure: BloodPressure {
            systolic: hex_field(payload, "systolic", SYSTOLIC)?,
            diastolic: hex_field(payload, "diastolic", DIASTOLIC)?,
        },
        blood_oxygen: hex_field(payload, "blood oxygen", BLOOD_OXYGEN)?,
        blood_glucose: hex_field(payload, "blood glucose", BLOOD_GLUCOSE)?,
        battery_level: None,
        wear_status: None,
    })
}

/// Decode a battery frame. The level is read from hex `[8:12]`, truncated to
/// whatever the frame actually carries.
///
/// # Errors
///
/// - [`DecodeError::TooShort`] for frames under 10 hex characters
/// - [`DecodeError::ValueParse`] when the level is not hex
pub fn decode_battery(hex: &str) -> Result<BatteryReading, DecodeError> {
    if hex.len() < MIN_BATTERY_FRAME_HEX {
        return Err(DecodeError::TooShort {
            len: hex.len(),
            min: MIN_BATTERY_FRAME_HEX,
        });
    }
    let end = hex.len().min(BATTERY_LEVEL.end);
    let battery_level = hex_field(hex, "battery level", BATTERY_LEVEL.start..end)?;
    Ok(BatteryReading { battery_level })
}

fn hex_field(hex: &str, field: &'static str, range: Range<usize>) -> Result<u32, DecodeError> {
    let raw = hex.get(range).ok_or_else(|| DecodeError::parse(field, ""))?;
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::parse(field, raw));
    }
    u32::from_str_radix(raw, 16).map_err(|_| DecodeError::parse(field, raw))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a sealed vitals frame with the given readings.
    pub(crate) fn vitals_frame(hr: u8, systolic: u8, diastolic: u8, spo2: u8, glucose: u8) -> String {
        let mut payload = "00".repeat(29);
        payload.replace_range(38..40, &format!("{hr:02X}"));
        payload.replace_range(40..42, &format!("{systolic:02X}"));
        payload.replace_range(42..44, &format!("{diastolic:02X}"));
        payload.replace_range(44..46, &format!("{spo2:02X}"));
        payload.replace_range(56..58, &format!("{glucose:02X}"));
        seal_frame(&format!("DA8D{:04X}{payload}", payload.len() / 2)).unwrap()
    }

    /// Build a battery frame reporting `level`.
    pub(crate) fn battery_frame(level: u16) -> String {
        format!("DA860200{level:04X}C3A1")
    }

    #[test]
    fn test_checksum_known_vectors() {
        // CRC-16/ARC check value
        assert_eq!(checksum(b"123456789"), 0xBB3D);
        assert_eq!(checksum(&[]), 0x0000);
    }

    #[test]
    fn test_checksum_matches_protocol_commands() {
        let cases = [
            "DA0D0000AADB",
            "DA060000DB19",
            "DA0101000009EF",
            "DA700700112131415161717B2D",
            "DA0E060001010101010144BE",
            "DA310600000000000164FD49",
            "DAF00100003B13",
        ];
        for frame in cases {
            let (body, crc) = frame.split_at(frame.len() - 4);
            assert!(verify(&decode_hex(body).unwrap(), crc), "{frame}");
        }
    }

    #[test]
    fn test_byte_swap() {
        assert_eq!(byte_swap16(0x1234), "3412");
        assert_eq!(byte_swap16(0x00AB), "AB00");
        assert_eq!(byte_swap16(0xBB3D), "3DBB");
    }

    #[test]
    fn test_verify_round_trip_and_case() {
        for body in [&b""[..], b"\x00", b"\xDA\x0D\x00\x00", b"vitalgate frame body"] {
            assert!(verify(body, &byte_swap16(checksum(body))));
        }
        let crc = byte_swap16(checksum(b"\xDA\x86")).to_ascii_lowercase();
        assert!(verify(b"\xDA\x86", &crc));
        assert!(!verify(b"\xDA\x86", "0000"));
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(encode_hex(&[0xDA, 0x0D, 0x00, 0x0f]), "DA0D000F");
        assert_eq!(decode_hex("da0D").unwrap(), vec![0xDA, 0x0D]);
        assert!(matches!(decode_hex("ABC"), Err(DecodeError::ValueParse { .. })));
        assert!(matches!(decode_hex("ZZ"), Err(DecodeError::ValueParse { .. })));
        assert!(matches!(decode_hex("+F"), Err(DecodeError::ValueParse { .. })));
        assert!(matches!(decode_hex("0-"), Err(DecodeError::ValueParse { .. })));
    }

    #[test]
    fn test_decode_vitals_fields() {
        let sample = decode_vitals(&vitals_frame(72, 118, 76, 97, 6)).unwrap();
        assert_eq!(sample.heart_rate, 72);
        assert_eq!(sample.blood_pressure.to_string(), "118/76");
        assert_eq!(sample.blood_oxygen, 97);
        assert_eq!(sample.blood_glucose, 6);
        assert_eq!(sample.battery_level, None);
        assert_eq!(sample.wear_status, None);
    }

    #[test]
    fn test_decode_vitals_too_short() {
        for frame in ["", "DA", "DA0D00", "DA0D0000AAD"] {
            assert!(
                matches!(decode_vitals(frame), Err(DecodeError::TooShort { .. })),
                "{frame:?}"
            );
        }
    }

    #[test]
    fn test_decode_vitals_checksum_mismatch() {
        let mut frame = vitals_frame(72, 118, 76, 97, 6);
        let len = frame.len();
        frame.replace_range(len - 4.., "0000");
        assert!(matches!(
            decode_vitals(&frame),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_vitals_incomplete_is_expected() {
        let frame = seal_frame(&format!("DA8D0010{}", "00".repeat(16))).unwrap();
        let err = decode_vitals(&frame).unwrap_err();
        assert_eq!(err, DecodeError::Incomplete { len: 32 });
        assert!(err.is_expected());
    }

    #[test]
    fn test_decode_vitals_missing_glucose_is_parse_error() {
        // 23 payload bytes: past the "still measuring" cut-off but short of glucose
        let frame = seal_frame(&format!("DA8D0017{}", "48".repeat(23))).unwrap();
        let err = decode_vitals(&frame).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::ValueParse {
                field: "blood glucose",
                ..
            }
        ));
        assert!(!err.is_expected());
    }

    #[test]
    fn test_decode_vitals_rejects_non_hex() {
        assert!(matches!(
            decode_vitals("DA0D0000XXYY1234"),
            Err(DecodeError::ValueParse { .. })
        ));
        assert!(matches!(
            decode_vitals("DA0D0000é12345"),
            Err(DecodeError::ValueParse { .. })
        ));
        assert!(matches!(
            decode_vitals("DA8D+0010000"),
            Err(DecodeError::ValueParse { .. })
        ));
    }

    #[test]
    fn test_decode_battery() {
        assert_eq!(
            decode_battery(&battery_frame(45)).unwrap(),
            BatteryReading { battery_level: 45 }
        );
        // truncated level field is still read
        assert_eq!(decode_battery("DA8602000F").unwrap().battery_level, 0x0F);
        assert!(matches!(
            decode_battery("DA86020"),
            Err(DecodeError::TooShort { len: 7, min: 10 })
        ));
        assert!(matches!(
            decode_battery("DA860200ZZZZ"),
            Err(DecodeError::ValueParse { .. })
        ));
        assert!(matches!(
            decode_battery("DA860200+02D"),
            Err(DecodeError::ValueParse { .. })
        ));
    }

    #[test]
    fn test_frame_dispatch() {
        assert_eq!(FrameKind::of("DA8600000000"), FrameKind::Battery);
        assert_eq!(FrameKind::of("DA0D0000AADB"), FrameKind::Vitals);
        assert!(matches!(
            decode_frame(&battery_frame(80)),
            Ok(Telemetry::Battery(BatteryReading { battery_level: 80 }))
        ));
        assert!(matches!(
            decode_frame(&vitals_frame(60, 110, 70, 99, 4)),
            Ok(Telemetry::Vitals(VitalsSample { heart_rate: 60, .. }))
        ));
    }
}
