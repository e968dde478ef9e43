//! Decoding of completed monitor results.
//!
//! A result buffer holds, per selected counter, a 4-byte group id, a 4-byte
//! counter id and the value. The value always starts at byte 8 and its width
//! depends on the counter's declared type. The driver writes into host
//! memory, so every field is native-endian.

use std::fmt;

use thiserror::Error;

use super::{CounterId, CounterType};

/// Size of the group id + counter id header preceding each value.
pub const RESULT_HEADER_SIZE: usize = 8;

/// Errors that can occur while decoding a result buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no data from counter")]
    NoData,

    #[error("result too short: {size} bytes, need {need}")]
    Truncated { size: usize, need: usize },

    #[error("unknown counter type: {raw:#x}")]
    UnknownCounterType { raw: u32 },
}

impl DecodeError {
    /// Short label for metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoData => "no_data",
            Self::Truncated { .. } => "truncated",
            Self::UnknownCounterType { .. } => "unknown_type",
        }
    }
}

/// A counter value in the representation its declared type selects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CounterValue {
    UnsignedInt64(u64),
    Percentage(f32),
    UnsignedInt(u32),
    Float(f32),
}

impl CounterValue {
    /// Lossy numeric view used for gauges.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::UnsignedInt64(v) => v as f64,
            Self::Percentage(v) | Self::Float(v) => f64::from(v),
            Self::UnsignedInt(v) => f64::from(v),
        }
    }
}

impl fmt::Display for CounterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsignedInt64(v) => write!(f, "{v}"),
            Self::UnsignedInt(v) => write!(f, "{v}"),
            Self::Percentage(v) | Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// One decoded sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleResult {
    pub id: CounterId,
    pub value: CounterValue,
}

/// Decode the first counter entry of a monitor result.
pub fn decode(data: &[u8], declared_type: CounterType) -> Result<SampleResult, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::NoData);
    }

    let width = declared_type
        .value_width()
        .ok_or(DecodeError::UnknownCounterType {
            raw: declared_type.raw(),
        })?;

    let need = RESULT_HEADER_SIZE + width;
    if data.len() < need {
        return Err(DecodeError::Truncated {
            size: data.len(),
            need,
        });
    }

    let id = CounterId {
        group: read_u32(data, 0),
        counter: read_u32(data, 4),
    };

    let value = match declared_type {
        CounterType::UnsignedInt64 => CounterValue::UnsignedInt64(read_u64(data, 8)),
        CounterType::Percentage => CounterValue::Percentage(f32::from_bits(read_u32(data, 8))),
        CounterType::UnsignedInt => CounterValue::UnsignedInt(read_u32(data, 8)),
        CounterType::Float => CounterValue::Float(f32::from_bits(read_u32(data, 8))),
        CounterType::Unknown(raw) => return Err(DecodeError::UnknownCounterType { raw }),
    };

    Ok(SampleResult { id, value })
}

// ---------------------------------------------------------------------------
// Byte-reading helpers. Callers check the length first.
// ---------------------------------------------------------------------------

#[inline(always)]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(read_fixed::<4>(data, offset))
}

#[inline(always)]
fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_ne_bytes(read_fixed::<8>(data, offset))
}

#[inline(always)]
fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    if let Some(src) = data.get(offset..offset + N) {
        out.copy_from_slice(src);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(group: u32, counter: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.extend_from_slice(&group.to_ne_bytes());
        buf.extend_from_slice(&counter.to_ne_bytes());
        buf
    }

    #[test]
    fn test_decode_u64_reads_bytes_8_to_16() {
        let mut data = header(3, 11);
        data.extend_from_slice(&0x0123_4567_89AB_CDEFu64.to_ne_bytes());
        // Trailing entry for a second counter must not be touched.
        data.extend_from_slice(&[0xFF; 12]);

        let sample = decode(&data, CounterType::UnsignedInt64).unwrap();
        assert_eq!(sample.id, CounterId::new(3, 11));
        assert_eq!(sample.value, CounterValue::UnsignedInt64(0x0123_4567_89AB_CDEF));
    }

    #[test]
    fn test_decode_counter_id_at_byte_4() {
        // The counter id sits right after the group id, not one element
        // of the value's width further.
        let mut data = header(0xAAAA_AAAA, 0x0000_0042);
        data.extend_from_slice(&7u64.to_ne_bytes());

        let sample = decode(&data, CounterType::UnsignedInt64).unwrap();
        assert_eq!(sample.id.group, 0xAAAA_AAAA);
        assert_eq!(sample.id.counter, 0x42);
        assert_eq!(sample.value, CounterValue::UnsignedInt64(7));
    }

    #[test]
    fn test_decode_u32() {
        let mut data = header(1, 2);
        data.extend_from_slice(&4_000_000_000u32.to_ne_bytes());

        let sample = decode(&data, CounterType::UnsignedInt).unwrap();
        assert_eq!(sample.value, CounterValue::UnsignedInt(4_000_000_000));
        assert_eq!(sample.value.to_string(), "4000000000");
    }

    #[test]
    fn test_decode_percentage_and_float() {
        let mut data = header(1, 2);
        data.extend_from_slice(&87.5f32.to_ne_bytes());

        let pct = decode(&data, CounterType::Percentage).unwrap();
        assert_eq!(pct.value, CounterValue::Percentage(87.5));
        assert_eq!(pct.value.to_string(), "87.5");

        let float = decode(&data, CounterType::Float).unwrap();
        assert_eq!(float.value, CounterValue::Float(87.5));
    }

    #[test]
    fn test_decode_empty_is_no_data() {
        assert_eq!(
            decode(&[], CounterType::UnsignedInt64),
            Err(DecodeError::NoData)
        );
        // No-data takes precedence over an unknown type.
        assert_eq!(decode(&[], CounterType::Unknown(9)), Err(DecodeError::NoData));
    }

    #[test]
    fn test_decode_truncated() {
        let mut data = header(1, 2);
        data.extend_from_slice(&[0u8; 4]);

        assert_eq!(
            decode(&data, CounterType::UnsignedInt64),
            Err(DecodeError::Truncated { size: 12, need: 16 })
        );
        assert_eq!(
            decode(&data[..6], CounterType::UnsignedInt),
            Err(DecodeError::Truncated { size: 6, need: 12 })
        );
    }

    #[test]
    fn test_decode_unknown_type_does_not_guess_width() {
        let mut data = header(1, 2);
        data.extend_from_slice(&5u64.to_ne_bytes());

        assert_eq!(
            decode(&data, CounterType::Unknown(0x1404)),
            Err(DecodeError::UnknownCounterType { raw: 0x1404 })
        );
    }

    #[test]
    fn test_counter_value_display() {
        assert_eq!(CounterValue::UnsignedInt64(u64::MAX).to_string(), "18446744073709551615");
        assert_eq!(CounterValue::Float(0.25).to_string(), "0.25");
    }
}
