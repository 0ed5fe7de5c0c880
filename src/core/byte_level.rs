//! GPT-2 byte-level alphabet.
//!
//! Serialized GPT-2 vocabularies and merge files do not store raw bytes.
//! Each byte is written as one printable Unicode character so that the files
//! stay readable and whitespace-separated. This module holds that bijection;
//! only the loader in [`super::vocab`] uses it; the tokenizer itself works on
//! raw bytes.
//!
//! # Mapping
//!
//! - Bytes 33-126 (`!` to `~`) map to themselves
//! - Bytes 161-172 (`¡` to `¬`) map to themselves
//! - Bytes 174-255 (`®` to `ÿ`) map to themselves
//! - The other 68 bytes (0-32, 127-160, 173) map, in byte order, to U+0100
//!   onwards
//!
//! ```ignore
//! // Space (0x20) maps to 'Ġ' (U+0120)
//! assert_eq!(byte_level_encode(b" hello"), "Ġhello");
//! assert_eq!(byte_level_decode("Ġhello").unwrap(), b" hello");
//! ```

use rustc_hash::FxHashMap;
use std::sync::LazyLock;

/// Byte to character table, indexed by byte value.
static BYTE_TO_CHAR: LazyLock<[char; 256]> = LazyLock::new(|| {
    let mut mapping = ['\0'; 256];
    let mut printable = [false; 256];

    for b in (33u8..=126).chain(161u8..=172).chain(174u8..=255) {
        printable[b as usize] = true;
        mapping[b as usize] = b as char;
    }

    // Shifted characters start at U+0100, which are all valid scalar values.
    let mut shifted = ('\u{0100}'..).take(68);
    for b in 0..256 {
        if !printable[b] {
            if let Some(ch) = shifted.next() {
                mapping[b] = ch;
            }
        }
    }

    mapping
});

/// Character to byte table (inverse of `BYTE_TO_CHAR`).
static CHAR_TO_BYTE: LazyLock<FxHashMap<char, u8>> = LazyLock::new(|| {
    BYTE_TO_CHAR
        .iter()
        .enumerate()
        .map(|(byte, &ch)| (ch, byte as u8))
        .collect()
});

/// Encode raw bytes as their byte-level string.
#[inline]
pub fn byte_level_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| BYTE_TO_CHAR[b as usize]).collect()
}

/// Decode a byte-level string back to raw bytes.
///
/// Returns `Err` with the first character that is not part of the alphabet.
#[inline]
pub fn byte_level_decode(text: &str) -> Result<Vec<u8>, char> {
    text.chars()
        .map(|ch| CHAR_TO_BYTE.get(&ch).copied().ok_or(ch))
        .collect()
}

/// Byte-level character for one byte value.
#[inline]
pub fn byte_level_char(byte: u8) -> char {
    BYTE_TO_CHAR[byte as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_mapping_is_bijective() {
        let seen: HashSet<char> = (0u8..=255).map(byte_level_char).collect();
        assert_eq!(seen.len(), 256);
        assert_eq!(CHAR_TO_BYTE.len(), 256);
    }

    #[test]
    fn test_roundtrip_every_byte() {
        for b in 0u8..=255 {
            let encoded = byte_level_encode(&[b]);
            assert_eq!(byte_level_decode(&encoded), Ok(vec![b]), "byte {}", b);
        }
    }

    #[test]
    fn test_shifted_characters() {
        assert_eq!(byte_level_char(0), '\u{0100}');
        assert_eq!(byte_level_char(b' '), 'Ġ');
        assert_eq!(byte_level_char(b'\n'), 'Ċ');
        // 173 (soft hyphen) is the last shifted byte
        assert_eq!(byte_level_char(173), '\u{0143}');
    }

    #[test]
    fn test_printable_preserved() {
        for b in 33u8..=126 {
            assert_eq!(byte_level_char(b), b as char);
        }
        assert_eq!(byte_level_char(0xFF), 'ÿ');
    }

    #[test]
    fn test_encode_multibyte_text() {
        let original = "héllo wörld";
        let encoded = byte_level_encode(original.as_bytes());
        assert!(!encoded.contains(' '));
        let decoded = byte_level_decode(&encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), original);
    }

    #[test]
    fn test_decode_rejects_foreign_character() {
        assert_eq!(byte_level_decode("ok\u{4E16}"), Err('\u{4E16}'));
    }
}
