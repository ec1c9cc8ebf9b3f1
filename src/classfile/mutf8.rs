//! Modified UTF-8, the string encoding of `CONSTANT_Utf8` entries.
//!
//! It differs from standard UTF-8 in two ways: `U+0000` is written as the two bytes
//! `0xC0 0x80`, and supplementary characters are written as two separately encoded
//! surrogates (three bytes each) instead of one four-byte sequence.

use crate::Result;

/// Encode a Rust string into modified UTF-8.
#[must_use]
pub fn encode(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8 bytes into a Rust string.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for truncated sequences, invalid lead bytes, or
/// surrogates that do not pair up. Such strings are legal in a class file but can not be
/// represented as a Rust `String`; callers that only need to carry the bytes through should
/// keep the raw form instead.
pub fn decode(bytes: &[u8]) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let lead = bytes[i];
        let unit = match lead {
            0x01..=0x7F => {
                i += 1;
                u16::from(lead)
            }
            0xC0..=0xDF => {
                let second = continuation(bytes, i + 1)?;
                i += 2;
                (u16::from(lead & 0x1F) << 6) | second
            }
            0xE0..=0xEF => {
                let second = continuation(bytes, i + 1)?;
                let third = continuation(bytes, i + 2)?;
                i += 3;
                (u16::from(lead & 0x0F) << 12) | (second << 6) | third
            }
            _ => {
                return Err(malformed_error!(
                    "Invalid modified UTF-8 lead byte 0x{:02X} at {}",
                    lead,
                    i
                ))
            }
        };
        units.push(unit);
    }

    String::from_utf16(&units).map_err(|_| malformed_error!("Unpaired surrogate in Utf8 constant"))
}

fn continuation(bytes: &[u8], index: usize) -> Result<u16> {
    match bytes.get(index) {
        Some(byte) if byte & 0xC0 == 0x80 => Ok(u16::from(byte & 0x3F)),
        Some(byte) => Err(malformed_error!(
            "Invalid modified UTF-8 continuation byte 0x{:02X} at {}",
            byte,
            index
        )),
        None => Err(malformed_error!("Truncated modified UTF-8 sequence")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_is_identity() {
        assert_eq!(encode("java/lang/Object"), b"java/lang/Object");
        assert_eq!(decode(b"registerHit").unwrap(), "registerHit");
    }

    #[test]
    fn nul_uses_two_bytes() {
        assert_eq!(encode("a\0b"), [b'a', 0xC0, 0x80, b'b']);
        assert_eq!(decode(&[b'a', 0xC0, 0x80, b'b']).unwrap(), "a\0b");
    }

    #[test]
    fn supplementary_characters_use_surrogates() {
        let encoded = encode("\u{1F600}");
        assert_eq!(encoded, [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(decode(&encoded).unwrap(), "\u{1F600}");
    }

    #[test]
    fn two_and_three_byte_forms() {
        let value = "caf\u{E9} \u{20AC}";
        assert_eq!(decode(&encode(value)).unwrap(), value);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode(&[0x00]).is_err());
        assert!(decode(&[0xC3]).is_err());
        assert!(decode(&[0xE2, 0x82, 0x41]).is_err());
        assert!(decode(&[0xF0, 0x9F, 0x98, 0x80]).is_err());
        // lone high surrogate
        assert!(decode(&[0xED, 0xA0, 0xBD]).is_err());
    }
}
