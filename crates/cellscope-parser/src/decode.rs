use std::char::REPLACEMENT_CHARACTER;

use crate::model::{DecodedSource, SourceFile};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16_BE_BOM: &[u8] = &[0xFE, 0xFF];
pub(crate) const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
pub(crate) const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, Clone, Copy)]
enum Utf16Order {
    Little,
    Big,
}

pub(crate) fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC)
}

pub(crate) fn is_ole(bytes: &[u8]) -> bool {
    bytes.starts_with(OLE_MAGIC)
}

/// Decode source bytes to text. Zip containers are left undecoded because
/// only the xlsx reader looks at them.
pub(crate) fn decode<'a>(source: &SourceFile<'a>) -> DecodedSource<'a> {
    let mut warnings = Vec::new();
    let bytes = source.bytes;

    let text = if is_zip(bytes) {
        String::new()
    } else if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        warnings.push("removed UTF-8 byte-order mark".to_string());
        decode_utf8(rest, &mut warnings)
    } else if let Some(rest) = bytes.strip_prefix(UTF16_LE_BOM) {
        warnings.push("decoded UTF-16 (little-endian) text".to_string());
        decode_utf16(rest, Utf16Order::Little, &mut warnings)
    } else if let Some(rest) = bytes.strip_prefix(UTF16_BE_BOM) {
        warnings.push("decoded UTF-16 (big-endian) text".to_string());
        decode_utf16(rest, Utf16Order::Big, &mut warnings)
    } else if looks_like_bare_utf16_le(bytes) {
        warnings.push("decoded UTF-16 (little-endian) text without byte-order mark".to_string());
        decode_utf16(bytes, Utf16Order::Little, &mut warnings)
    } else {
        decode_utf8(bytes, &mut warnings)
    };

    DecodedSource {
        name: source.name,
        bytes,
        text,
        warnings,
    }
}

fn decode_utf8(bytes: &[u8], warnings: &mut Vec<String>) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            let replaced = text.matches(REPLACEMENT_CHARACTER).count();
            warnings.push(format!(
                "replaced {replaced} invalid byte sequence(s) while decoding text"
            ));
            text
        }
    }
}

fn decode_utf16(bytes: &[u8], order: Utf16Order, warnings: &mut Vec<String>) -> String {
    let units = bytes.chunks_exact(2).map(|pair| match order {
        Utf16Order::Little => u16::from_le_bytes([pair[0], pair[1]]),
        Utf16Order::Big => u16::from_be_bytes([pair[0], pair[1]]),
    });
    let mut replaced = 0usize;
    let text: String = char::decode_utf16(units)
        .map(|unit| {
            unit.unwrap_or_else(|_| {
                replaced += 1;
                REPLACEMENT_CHARACTER
            })
        })
        .collect();
    if replaced > 0 || bytes.len() % 2 != 0 {
        warnings.push(format!(
            "replaced {replaced} invalid UTF-16 sequence(s) while decoding text"
        ));
    }
    text
}

/// ASCII text stored as UTF-16LE has a NUL in every odd byte position.
fn looks_like_bare_utf16_le(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(64)];
    head.len() >= 8
        && head.chunks_exact(2).all(|pair| pair[0] != 0 && pair[1] == 0)
}
