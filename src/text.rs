//! Legacy cell decoding.
//!
//! Shamela tables store text as UTF-16LE, CP1256 or UTF-8 depending on the
//! tool that produced them, and some cells went through a wrong-codepage
//! round trip before they were stored. [`TextNormalizer`] turns any raw cell
//! into clean text and never fails: undecodable input becomes an empty
//! string.

use std::borrow::Cow;

use encoding_rs::{UTF_16LE, UTF_8, WINDOWS_1256};

use crate::patterns::{ARABIC_RE, INTEGER_RE};
use crate::source::CellValue;

/// Byte streams shorter than this are never treated as UTF-16.
pub const UTF16_MIN_BYTES: usize = 16;
/// Share of zero odd-indexed bytes above which a stream is treated as UTF-16LE.
pub const UTF16_NULL_RATIO: f64 = 0.25;

/// Glyph the legacy corpus stores in place of the tatweel (U+0640).
pub const TATWEEL_STAND_IN: char = '\u{06A9}';

/// Decoder for raw legacy cells.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    /// Character substitutions applied after decoding, in order.
    pub glyph_fixes: Vec<(char, char)>,
    /// Minimum share of high-Latin characters before a mojibake repair is attempted.
    pub mojibake_ratio: f64,
    /// Minimum number of high-Latin characters before a mojibake repair is attempted.
    pub mojibake_min_chars: usize,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self {
            glyph_fixes: vec![(TATWEEL_STAND_IN, '\u{0640}')],
            mojibake_ratio: 0.2,
            mojibake_min_chars: 4,
        }
    }
}

impl TextNormalizer {
    /// Decode any cell into clean text.
    pub fn decode(&self, value: &CellValue) -> String {
        let text: Cow<'_, str> = match value {
            CellValue::Null => return String::new(),
            CellValue::Text(s) => Cow::Borrowed(s.as_str()),
            CellValue::Bytes(b) => Cow::Owned(decode_bytes(b)),
            CellValue::Int(n) => Cow::Owned(n.to_string()),
            CellValue::Real(f) => Cow::Owned(f.to_string()),
        };

        let text = self.fix_mojibake(&text);
        let mut out: String = text.chars().filter(|&c| c != '\0').collect();
        for &(from, to) in &self.glyph_fixes {
            if out.contains(from) {
                out = out.replace(from, &to.to_string());
            }
        }
        out
    }

    /// Repair Arabic text that was decoded as Latin-1.
    ///
    /// Text that already contains Arabic is returned unchanged, as is text
    /// whose reinterpretation under the legacy codepage yields no Arabic.
    pub fn fix_mojibake<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if ARABIC_RE.is_match(value) {
            return Cow::Borrowed(value);
        }

        let total = value.chars().count();
        let high = value
            .chars()
            .filter(|c| ('\u{00C0}'..='\u{00FF}').contains(c))
            .count();
        let threshold = self
            .mojibake_min_chars
            .max((total as f64 * self.mojibake_ratio) as usize);
        if high < threshold {
            return Cow::Borrowed(value);
        }

        let raw: Vec<u8> = value.chars().map(|c| (c as u32 & 0xFF) as u8).collect();
        // The legacy tools wrote Arabic as CP1256.
        let (decoded, _) = WINDOWS_1256.decode_without_bom_handling(&raw);
        if ARABIC_RE.is_match(&decoded) {
            Cow::Owned(decoded.into_owned())
        } else {
            Cow::Borrowed(value)
        }
    }
}

/// Decode a raw byte cell, trying UTF-16LE, the legacy codepage, then UTF-8.
pub fn decode_bytes(bytes: &[u8]) -> String {
    if looks_like_utf16(bytes)
        && let Some(text) = UTF_16LE.decode_without_bom_handling_and_without_replacement(bytes)
    {
        return text.into_owned();
    }

    for encoding in [WINDOWS_1256, UTF_8] {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            return text.into_owned();
        }
    }

    log::debug!("dropping undecodable {}-byte cell", bytes.len());
    String::new()
}

fn looks_like_utf16(bytes: &[u8]) -> bool {
    if bytes.len() < UTF16_MIN_BYTES {
        return false;
    }
    let zeros = bytes.iter().skip(1).step_by(2).filter(|&&b| b == 0).count();
    zeros as f64 / (bytes.len() as f64 / 2.0).max(1.0) > UTF16_NULL_RATIO
}

/// Map Arabic-indic and extended Arabic-indic digits to ASCII.
pub fn digits_to_ascii(value: &str) -> Cow<'_, str> {
    if !value.chars().any(is_indic_digit) {
        return Cow::Borrowed(value);
    }
    Cow::Owned(
        value
            .chars()
            .map(|c| match c {
                '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
                '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
                other => other,
            })
            .collect(),
    )
}

fn is_indic_digit(c: char) -> bool {
    matches!(c, '\u{0660}'..='\u{0669}' | '\u{06F0}'..='\u{06F9}')
}

/// Read a cell as an integer.
///
/// Integers, integral reals, and text made only of (possibly Arabic-indic)
/// digits qualify; everything else is `None`.
pub fn to_int(value: &CellValue) -> Option<i64> {
    match value {
        CellValue::Int(n) => Some(*n),
        CellValue::Real(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
        CellValue::Text(s) if INTEGER_RE.is_match(s) => digits_to_ascii(s.trim()).parse().ok(),
        _ => None,
    }
}
