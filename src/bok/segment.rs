//! Content segmentation.
//!
//! Legacy rows hold either ready-made HTML or plain text in which headings
//! and numbered items are often run together on one line. [`segment`] turns
//! a row into chunks of `<p>` paragraphs; each chunk later becomes a page.

use std::borrow::Cow;

use crate::patterns::{
    BASMALA_HEADING_RE, BLOCK_MARKUP_RE, HEADING_RE, NUMBERED_LINE_RE, NUMBERED_SPLIT_RE,
    TAFSIR_BREAK_RE,
};
use crate::util::{escape_xml, strip_tags_and_ws};

/// Lines at least this many characters long are checked for run-together numbered items.
pub const LONG_LINE_LEN: usize = 220;
/// A long line is only resplit if that yields at least this many parts.
pub const MIN_SPLIT_PARTS: usize = 2;

/// Ordered paragraph fragments that stay on one page.
pub type Chunk = Vec<String>;

/// True if the text already carries block-level markup.
pub fn looks_like_html(text: &str) -> bool {
    BLOCK_MARKUP_RE.is_match(text)
}

/// Surah or surah-commentary heading.
pub fn is_heading(text: &str) -> bool {
    HEADING_RE.is_match(text)
}

/// Split plain text into trimmed, non-empty logical lines.
pub fn split_plain_text(raw: &str) -> Vec<String> {
    let text = raw.replace('\0', "").replace("\r\n", "\n").replace('\r', "\n");
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let text = BASMALA_HEADING_RE.replace_all(text, "بسم الله الرحمن الرحيم\n${1}");
    let text = break_before_tafsir(&text);

    let mut out = Vec::new();
    for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
        if line.chars().count() < LONG_LINE_LEN {
            out.push(line.to_string());
            continue;
        }
        let parts = split_numbered(line);
        if parts.len() >= MIN_SPLIT_PARTS {
            out.extend(parts);
        } else {
            out.push(line.to_string());
        }
    }
    out
}

/// Put an inline `تفسير سورة` heading on its own line.
fn break_before_tafsir(text: &str) -> Cow<'_, str> {
    let mut out = String::new();
    let mut last = 0;
    for m in TAFSIR_BREAK_RE.find_iter(text) {
        let spaced = text[m.end()..].chars().next().is_some_and(char::is_whitespace);
        if m.start() == 0 || !spaced {
            continue;
        }
        let heading = m.as_str().trim_start();
        out.push_str(&text[last..m.start()]);
        out.push('\n');
        last = m.end() - heading.len();
    }
    if last == 0 {
        return Cow::Borrowed(text);
    }
    out.push_str(&text[last..]);
    Cow::Owned(out)
}

/// Split a line in front of every numbered item.
fn split_numbered(line: &str) -> Vec<String> {
    let mut cuts = Vec::new();
    let mut pos = 0;
    while let Some(m) = NUMBERED_SPLIT_RE.find_at(line, pos) {
        cuts.push(m.start());
        let step = line[m.start()..].chars().next().map_or(1, char::len_utf8);
        pos = m.start() + step;
        if pos >= line.len() {
            break;
        }
    }
    cuts.push(line.len());

    let mut parts = Vec::new();
    let mut start = 0;
    for cut in cuts {
        let part = line[start..cut].trim();
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        start = cut;
    }
    parts
}

/// Render text as `<p>` paragraphs; HTML input passes through as one fragment.
pub fn to_html_paragraphs(text: &str) -> Vec<String> {
    let raw = text.replace('\0', "");
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if looks_like_html(raw) {
        return vec![raw.to_string()];
    }
    let parts = split_plain_text(raw);
    if parts.is_empty() {
        return vec![paragraph(raw)];
    }
    parts.iter().map(|p| paragraph(p)).collect()
}

fn paragraph(text: &str) -> String {
    format!("<p>{}</p>", escape_xml(text))
}

/// Split a row into page-sized chunks.
///
/// Without `split_numbered`, or for HTML input, the row is a single chunk.
/// Otherwise a new chunk starts at every heading or numbered line.
pub fn segment(raw: &str, split_numbered: bool) -> Vec<Chunk> {
    if !split_numbered || looks_like_html(raw) {
        let paras = to_html_paragraphs(raw);
        return if paras.is_empty() { Vec::new() } else { vec![paras] };
    }

    let mut chunks: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in split_plain_text(raw) {
        if !current.is_empty() && (is_heading(&line) || NUMBERED_LINE_RE.is_match(&line)) {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
        .into_iter()
        .map(|lines| lines.iter().map(|l| paragraph(l)).collect())
        .collect()
}

/// Index of the first chunk that opens with a heading, else 0.
pub fn anchor_chunk_index(chunks: &[Chunk]) -> usize {
    chunks
        .iter()
        .position(|chunk| {
            chunk
                .first()
                .is_some_and(|first| is_heading(&strip_tags_and_ws(first)))
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_line() -> String {
        format!("1 - {} 2 - {}", "ا".repeat(120), "ب".repeat(120))
    }

    #[test]
    fn test_html_is_one_chunk() {
        let raw = "<p>one</p><p>two</p>";
        assert_eq!(segment(raw, true), vec![vec![raw.to_string()]]);
        assert_eq!(segment(raw, false), vec![vec![raw.to_string()]]);
    }

    #[test]
    fn test_plain_lines_are_escaped() {
        let paras = to_html_paragraphs("a < b\r\n\r\nc & d");
        assert_eq!(paras, vec!["<p>a &lt; b</p>", "<p>c &amp; d</p>"]);
    }

    #[test]
    fn test_empty_row() {
        assert!(segment("  \0 ", false).is_empty());
        assert!(to_html_paragraphs("").is_empty());
    }

    #[test]
    fn test_long_line_resplit() {
        let parts = split_plain_text(&numbered_line());
        assert_eq!(parts.len(), 2);
        assert!(parts[0].starts_with("1 - "));
        assert!(parts[1].starts_with("2 - "));
    }

    #[test]
    fn test_short_line_not_resplit() {
        let parts = split_plain_text("1 - a 2 - b");
        assert_eq!(parts, vec!["1 - a 2 - b"]);
    }

    #[test]
    fn test_basmala_break() {
        let parts = split_plain_text("بسم الله الرحمن الرحيم سورة الفاتحة");
        assert_eq!(parts, vec!["بسم الله الرحمن الرحيم", "سورة الفاتحة"]);
    }

    #[test]
    fn test_tafsir_break() {
        let parts = split_plain_text("كلام سابق تفسير سورة البقرة");
        assert_eq!(parts, vec!["كلام سابق", "تفسير سورة البقرة"]);
        // A trailing heading with nothing after it stays inline.
        assert_eq!(split_plain_text("كلام تفسير سورة"), vec!["كلام تفسير سورة"]);
    }

    #[test]
    fn test_split_numbered_chunks() {
        let chunks = segment(&numbered_line(), true);
        assert_eq!(chunks.len(), 2);
        assert!(segment(&numbered_line(), false).len() == 1);
    }

    #[test]
    fn test_heading_starts_chunk() {
        let chunks = segment("مقدمة\nسورة البقرة\nنص", true);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1][0], "<p>سورة البقرة</p>");
        assert_eq!(anchor_chunk_index(&chunks), 1);
    }

    #[test]
    fn test_anchor_defaults_to_first_chunk() {
        let chunks = segment("a\nb", true);
        assert_eq!(anchor_chunk_index(&chunks), 0);
    }
}
