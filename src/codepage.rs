//! Windows code page decoding for MAPI `String8` properties.
//!
//! MS-OXTNEF does not always say which code page a `String8` property was
//! encoded with. This crate resolves the open question the way documented
//! in `DESIGN.md`: prefer `PR_MESSAGE_CODEPAGE` (tag `0x3FFD`) when the
//! message carries it, otherwise assume Windows-1252.

use encoding_rs::Encoding;

/// Decode `bytes` (without its length prefix) as `codepage`, falling back to
/// Windows-1252 when the code page is absent or not recognized.
///
/// Trailing NUL bytes are stripped before decoding, matching how MAPI
/// `String8` values are conventionally NUL-terminated within their declared
/// length.
pub fn decode_string8(bytes: &[u8], codepage: Option<u32>) -> String {
    let bytes = strip_trailing_nul(bytes);
    if bytes.is_empty() {
        return String::new();
    }
    let encoding = codepage
        .and_then(codepage_to_encoding)
        .unwrap_or(encoding_rs::WINDOWS_1252);
    encoding.decode(bytes).0.into_owned()
}

#[inline]
fn strip_trailing_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

/// Map a Windows code page identifier to its `encoding_rs` encoding.
///
/// Covers the code pages in common circulation in legacy mail clients; an
/// unrecognized id returns `None` so the caller can fall back to
/// Windows-1252 itself.
fn codepage_to_encoding(codepage: u32) -> Option<&'static Encoding> {
    match codepage {
        437 => Some(encoding_rs::IBM866),
        874 => Some(encoding_rs::WINDOWS_874),
        1250 => Some(encoding_rs::WINDOWS_1250),
        1251 => Some(encoding_rs::WINDOWS_1251),
        1252 => Some(encoding_rs::WINDOWS_1252),
        1253 => Some(encoding_rs::WINDOWS_1253),
        1254 => Some(encoding_rs::WINDOWS_1254),
        1255 => Some(encoding_rs::WINDOWS_1255),
        1256 => Some(encoding_rs::WINDOWS_1256),
        1257 => Some(encoding_rs::WINDOWS_1257),
        1258 => Some(encoding_rs::WINDOWS_1258),
        932 => Some(encoding_rs::SHIFT_JIS),
        936 => Some(encoding_rs::GBK),
        949 => Some(encoding_rs::EUC_KR),
        950 => Some(encoding_rs::BIG5),
        20932 => Some(encoding_rs::EUC_JP),
        54936 => Some(encoding_rs::GB18030),
        28592 => Some(encoding_rs::ISO_8859_2),
        28595 => Some(encoding_rs::ISO_8859_5),
        28596 => Some(encoding_rs::ISO_8859_6),
        28597 => Some(encoding_rs::ISO_8859_7),
        28598 => Some(encoding_rs::ISO_8859_8),
        28605 => Some(encoding_rs::ISO_8859_15),
        10000 => Some(encoding_rs::MACINTOSH),
        1200 => Some(encoding_rs::UTF_16LE),
        1201 => Some(encoding_rs::UTF_16BE),
        65001 => Some(encoding_rs::UTF_8),
        _ => None,
    }
}

/// Decode a MAPI `Unicode` (UTF-16LE) property value.
pub fn decode_unicode(bytes: &[u8]) -> String {
    let (text, _, _) = encoding_rs::UTF_16LE.decode(bytes);
    text.trim_end_matches('\u{0}').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_windows_1252() {
        assert_eq!(decode_string8(b"Caf\xe9", None), "Caf\u{e9}");
    }

    #[test]
    fn honors_declared_codepage() {
        // 0x82 0xA0 is U+3042 (Japanese HIRAGANA LETTER A) in Shift-JIS.
        let bytes = [0x82, 0xA0];
        assert_eq!(decode_string8(&bytes, Some(932)), "\u{3042}");
    }

    #[test]
    fn strips_trailing_nul() {
        assert_eq!(decode_string8(b"hi\0\0", Some(1252)), "hi");
    }

    #[test]
    fn decodes_unicode_utf16le() {
        let bytes = [0x48, 0x00, 0x69, 0x00, 0x00, 0x00];
        assert_eq!(decode_unicode(&bytes), "Hi");
    }
}
