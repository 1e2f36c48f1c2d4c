//! Network-time wire codec.
//!
//! The beacon timestamp is the only on-wire layout carried by a Class B
//! beacon in this simulator. It is a fixed-size field regardless of the
//! value being encoded.
//!
//! ## Field Format
//!
//! | Field     | Size (bytes) | Description                                        |
//! |-----------|--------------|----------------------------------------------------|
//! | time_ms   | 8            | Milliseconds since network epoch, big-endian `u64` |
//!
//! Encoding truncates towards zero to whole milliseconds, so the codec is
//! lossy below 1 ms. Values already aligned to a millisecond survive an
//! encode/decode cycle exactly.

use crate::{BeaconError, NetworkTime};

/// Size of the encoded timestamp field in bytes.
pub const TIMESTAMP_FIELD_LEN: usize = 8;

/// Returns the serialized size of the timestamp field.
///
/// This is fixed by the wire format and never depends on the value or
/// the host platform.
pub const fn serialized_size() -> usize {
    TIMESTAMP_FIELD_LEN
}

// ============================================================================
// Encoding Functions
// ============================================================================

/// Encode a network time into the 8-byte big-endian millisecond field.
pub fn encode_timestamp(time: NetworkTime) -> [u8; TIMESTAMP_FIELD_LEN] {
    time.as_millis().to_be_bytes()
}

/// Encode a network time into the start of `buf`.
///
/// Returns the number of bytes written.
pub fn encode_timestamp_into(time: NetworkTime, buf: &mut [u8]) -> Result<usize, BeaconError> {
    if buf.len() < TIMESTAMP_FIELD_LEN {
        return Err(BeaconError::BufferTooShort {
            needed: TIMESTAMP_FIELD_LEN,
            actual: buf.len(),
        });
    }
    buf[..TIMESTAMP_FIELD_LEN].copy_from_slice(&encode_timestamp(time));
    Ok(TIMESTAMP_FIELD_LEN)
}

// ============================================================================
// Decoding Functions
// ============================================================================

/// Decode a network time from the first 8 bytes of `data`.
///
/// Trailing bytes are ignored. Values above `u64::MAX / 1000` ms do not fit
/// a microsecond [`NetworkTime`] and fail with [`BeaconError::Range`].
pub fn decode_timestamp(data: &[u8]) -> Result<NetworkTime, BeaconError> {
    let field: [u8; TIMESTAMP_FIELD_LEN] = data
        .get(..TIMESTAMP_FIELD_LEN)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(BeaconError::BufferTooShort {
            needed: TIMESTAMP_FIELD_LEN,
            actual: data.len(),
        })?;
    let millis = u64::from_be_bytes(field);
    NetworkTime::from_millis(millis)
        .ok_or_else(|| BeaconError::range(format!("{millis} ms exceeds the in-memory time range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        let time = NetworkTime::from_secs_f64(12345.678).unwrap();
        let field = encode_timestamp(time);
        assert_eq!(time.as_millis(), 12_345_678);
        assert_eq!(field, [0x00, 0x00, 0x00, 0x00, 0x00, 0xBC, 0x61, 0x4E]);

        let decoded = decode_timestamp(&field).unwrap();
        assert_eq!(decoded.as_secs_f64(), 12345.678);
    }

    #[test]
    fn test_millisecond_aligned_values_are_exact() {
        for millis in [0u64, 1, 999, 1_000, 128_000, 1_234_567_890_123, u64::MAX / 1_000] {
            let time = NetworkTime::from_millis(millis).unwrap();
            let decoded = decode_timestamp(&encode_timestamp(time)).unwrap();
            assert_eq!(decoded, time, "millis={millis}");
        }
    }

    #[test]
    fn test_sub_millisecond_precision_is_truncated() {
        let time = NetworkTime::from_secs_f64(1.0009).unwrap();
        let decoded = decode_timestamp(&encode_timestamp(time)).unwrap();
        assert_eq!(decoded.as_millis(), 1_000);
        assert!((time.as_secs_f64() - decoded.as_secs_f64()).abs() < 0.001);
        assert!(decoded <= time);
    }

    #[test]
    fn test_quantization_error_below_one_millisecond() {
        let mut secs = 0.0;
        while secs < 500.0 {
            let time = NetworkTime::from_secs_f64(secs).unwrap();
            let decoded = decode_timestamp(&encode_timestamp(time)).unwrap();
            let err = (decoded.as_secs_f64() - time.as_secs_f64()).abs();
            assert!(err < 0.001, "secs={secs} err={err}");
            secs += 0.3337;
        }
    }

    #[test]
    fn test_field_size_is_fixed() {
        assert_eq!(serialized_size(), 8);
        assert_eq!(encode_timestamp(NetworkTime::ZERO).len(), 8);
        let big = NetworkTime::from_millis(u64::MAX / 1_000).unwrap();
        assert_eq!(encode_timestamp(big).len(), 8);
    }

    #[test]
    fn test_encode_into_short_buffer() {
        let mut buf = [0u8; 4];
        let err = encode_timestamp_into(NetworkTime::ZERO, &mut buf).unwrap_err();
        assert_eq!(err, BeaconError::BufferTooShort { needed: 8, actual: 4 });

        let mut buf = [0xFFu8; 10];
        let written = encode_timestamp_into(NetworkTime::from_secs(2).unwrap(), &mut buf).unwrap();
        assert_eq!(written, 8);
        assert_eq!(&buf[..8], &2_000u64.to_be_bytes());
        assert_eq!(&buf[8..], &[0xFF, 0xFF]);
    }

    #[test]
    fn test_decode_short_buffer() {
        let err = decode_timestamp(&[0x00, 0x01]).unwrap_err();
        assert!(matches!(err, BeaconError::BufferTooShort { needed: 8, actual: 2 }));
    }

    #[test]
    fn test_decode_out_of_range() {
        let err = decode_timestamp(&u64::MAX.to_be_bytes()).unwrap_err();
        assert!(matches!(err, BeaconError::Range(_)));
    }
}
