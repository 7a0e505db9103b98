//! Cached regex patterns for legacy text cleanup and package repair.
//!
//! Uses LazyLock to compile patterns once on first use.

use regex_lite::Regex;
use std::sync::LazyLock;

// === Text classification ===

/// Any character in the basic Arabic block.
pub static ARABIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{0600}-\u{06FF}]").unwrap());

/// Block-level markup that marks a cell as already being HTML.
pub static BLOCK_MARKUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</?(p|br|div|span|h[1-6]|font)\b").unwrap());

/// Void elements that strict XML parsers need self-closed.
pub static VOID_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)<(br|hr|img|input|meta|link|area|base|col|embed|source|track|wbr)((?:\s[^>]*?)?)\s*/?>",
    )
    .unwrap()
});

/// Any tag.
pub static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Runs of whitespace, including no-break spaces.
pub static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\u{00A0}]+").unwrap());

/// A cell that is nothing but a (possibly Arabic-indic) integer.
pub static INTEGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[0-9\u{0660}-\u{0669}\u{06F0}-\u{06F9}]+\s*$").unwrap()
});

// === Segmentation ===

/// Position where a numbered item is jammed into the middle of a line.
///
/// The match starts at the whitespace (or line start) preceding the counter.
pub static NUMBERED_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|[\s\u{00A0}])(?:[0-9]{1,4}|[\u{0660}-\u{0669}]{1,4}|[\u{06F0}-\u{06F9}]{1,4})\s*[-\u{2013}\u{2014}]\s+",
    )
    .unwrap()
});

/// A line that starts with a short counter followed by a dash.
pub static NUMBERED_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9\u{0660}-\u{0669}\u{06F0}-\u{06F9}]{1,4}\s*[-\u{2013}\u{2014}]\s+").unwrap()
});

/// Surah / surah-commentary heading.
pub static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:تفسير\s+سورة|سورة)\s+").unwrap());

/// Basmala immediately followed by a heading on the same line.
pub static BASMALA_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"بسم الله الرحمن الرحيم\s+(سورة|تفسير\s+سورة)").unwrap()
});

/// Whitespace run in front of an inline commentary heading.
///
/// Callers must check that whitespace follows the match.
pub static TAFSIR_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+تفسير\s+سورة").unwrap());

/// Volume filler rows in a TOC table.
pub static VOLUME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^الجزء\s+").unwrap());

/// Contents of the first paragraph of a page body.
pub static FIRST_PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<p[^>]*>(.*?)</p>").unwrap());

/// Legacy database file extensions.
pub static SOURCE_EXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(bok|mdb|accdb|json)$").unwrap());

// === Package repair ===

/// Manifest ids / spine idrefs that carry a page number.
pub static PAGE_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^page_(\d+)$").unwrap());
