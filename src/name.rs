//! Compressed/UTF-16LE name encoding, shared by key nodes and value keys.
//!
//! A registry name is stored either as one byte per code unit ("compressed",
//! really Latin-1/extended-ASCII) when every code unit of the name fits in
//! `U+0000..=U+00FF`, or as UTF-16LE otherwise. Unlike the string values
//! decoded in [`crate::value`], names are not null-terminated: the record's
//! length field is authoritative, so trailing NUL bytes are significant data,
//! not padding.

use crate::error::{RegistryError, Result};
use encoding_rs::UTF_16LE;

/// Decodes a key or value name from its on-disk bytes.
///
/// `compressed` selects one-byte-per-code-unit (Latin-1) decoding; otherwise
/// the bytes are UTF-16LE. No trailing-NUL trimming is performed: embedded or
/// trailing NUL code units are part of the name.
pub fn decode_name(data: &[u8], compressed: bool, offset: u32) -> Result<String> {
    if compressed {
        Ok(data.iter().map(|&b| b as char).collect())
    } else {
        if data.len() % 2 != 0 {
            return Err(RegistryError::InvalidUtf16 { offset });
        }
        let (decoded, _encoding, had_errors) = UTF_16LE.decode(data);
        if had_errors {
            return Err(RegistryError::InvalidUtf16 { offset });
        }
        Ok(decoded.into_owned())
    }
}

/// Encodes a name to on-disk bytes, choosing the compressed form when every
/// UTF-16 code unit of `name` fits in a single byte.
///
/// Returns `(bytes, is_compressed)`.
pub fn encode_name(name: &str) -> (Vec<u8>, bool) {
    let units: Vec<u16> = name.encode_utf16().collect();
    if units.iter().all(|&u| u <= 0x00FF) {
        let bytes = units.iter().map(|&u| u as u8).collect();
        (bytes, true)
    } else {
        let mut bytes = Vec::with_capacity(units.len() * 2);
        for unit in units {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        (bytes, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_roundtrip() {
        let (bytes, compressed) = encode_name("abcd_\u{E4}\u{F6}\u{FC}\u{DF}");
        assert!(compressed);
        let decoded = decode_name(&bytes, true, 0).unwrap();
        assert_eq!(decoded, "abcd_\u{E4}\u{F6}\u{FC}\u{DF}");
    }

    #[test]
    fn utf16_roundtrip_for_non_latin1() {
        let (bytes, compressed) = encode_name("weird\u{2122}");
        assert!(!compressed);
        let decoded = decode_name(&bytes, false, 0).unwrap();
        assert_eq!(decoded, "weird\u{2122}");
    }

    #[test]
    fn embedded_and_trailing_nul_preserved() {
        let name = "zero\0key";
        let (bytes, compressed) = encode_name(name);
        assert!(compressed);
        let decoded = decode_name(&bytes, true, 0).unwrap();
        assert_eq!(decoded, name);
    }

    #[test]
    fn empty_name() {
        let (bytes, compressed) = encode_name("");
        assert!(bytes.is_empty());
        assert!(compressed);
        assert_eq!(decode_name(&bytes, true, 0).unwrap(), "");
    }
}
