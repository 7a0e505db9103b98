//! Shared helpers: text decoding, XML escaping, and the two generic
//! structural algorithms (level nesting and keyed in-place reordering).

use std::borrow::Cow;

use chrono::{SecondsFormat, Utc};
use regex_lite::Captures;

use crate::patterns::{TAG_RE, VOID_TAG_RE, WS_RE};

fn time_seed_nanos() -> u64 {
    Utc::now().timestamp_nanos_opt().map_or(0x5eed, |n| n as u64)
}

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.mmmZ`, the form `dcterms:modified` expects.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Random-looking v4 UUID for the NCX `dtb:uid`. Not cryptographic.
pub fn uuid_v4() -> String {
    let mut state = time_seed_nanos();
    let mut bytes = [0u8; 16];
    for byte in &mut bytes {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        *byte = (state >> 56) as u8;
    }
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Value of `encoding="..."` in a leading XML declaration.
fn declared_encoding(bytes: &[u8]) -> Option<&'static encoding_rs::Encoding> {
    let head = &bytes[..bytes.len().min(100)];
    let decl = &head[memchr::memmem::find(head, b"<?xml")?..];
    let end = memchr::memmem::find(decl, b"?>").unwrap_or(decl.len());
    let decl = &decl[..end];
    let at = memchr::memmem::find(decl, b"encoding=")? + "encoding=".len();
    let quote = *decl.get(at)?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let value = &decl[at + 1..];
    let value = &value[..memchr::memchr(quote, value)?];
    encoding_rs::Encoding::for_label(value)
}

/// Decode package document bytes.
///
/// UTF-8 (BOM stripped) is tried first, then the encoding named in the XML
/// declaration, then CP1256, which is what legacy Arabic packages use.
pub fn decode_xml(bytes: &[u8]) -> Cow<'_, str> {
    let body = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(body) {
        return Cow::Borrowed(text);
    }
    let encoding = declared_encoding(body).unwrap_or(encoding_rs::WINDOWS_1256);
    let (text, _, _) = encoding.decode(body);
    Cow::Owned(text.into_owned())
}

/// Escape the five reserved XML characters.
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Self-close HTML void elements (`<br>` → `<br />`) so the fragment is well-formed XML.
pub fn close_void_tags(html: &str) -> Cow<'_, str> {
    VOID_TAG_RE.replace_all(html, |caps: &Captures<'_>| {
        format!("<{}{} />", &caps[1], caps[2].trim_end())
    })
}

/// Drop all tags and collapse whitespace.
pub fn strip_tags_and_ws(html: &str) -> String {
    let text = TAG_RE.replace_all(html, " ");
    WS_RE.replace_all(&text, " ").trim().to_string()
}

// ============================================================================
// Level nesting
// ============================================================================

/// A node that owns an ordered list of children of its own type.
pub trait TreeNode: Sized {
    fn children_mut(&mut self) -> &mut Vec<Self>;
}

/// Nest a flat, level-annotated sequence into a forest.
///
/// An item at level `L` closes every open node with level `>= L` and is
/// attached under the nearest remaining open node (or at the root).
/// Missing or non-positive levels count as level 1.
pub fn nest_by_level<S, T, L, M>(items: impl IntoIterator<Item = S>, level_of: L, mut make: M) -> Vec<T>
where
    T: TreeNode,
    L: Fn(&S) -> Option<i64>,
    M: FnMut(S) -> T,
{
    let mut roots: Vec<T> = Vec::new();
    let mut open: Vec<(i64, T)> = Vec::new();

    fn close<T: TreeNode>(open: &mut Vec<(i64, T)>, roots: &mut Vec<T>) {
        if let Some((_, node)) = open.pop() {
            match open.last_mut() {
                Some((_, parent)) => parent.children_mut().push(node),
                None => roots.push(node),
            }
        }
    }

    for item in items {
        let level = level_of(&item).filter(|l| *l > 0).unwrap_or(1);
        while open.last().is_some_and(|(open_level, _)| *open_level >= level) {
            close(&mut open, &mut roots);
        }
        open.push((level, make(item)));
    }
    while !open.is_empty() {
        close(&mut open, &mut roots);
    }
    roots
}

// ============================================================================
// Keyed reorder
// ============================================================================

/// Stably sort the items that have a key, leaving every other item in place.
///
/// Keyed items are sorted among themselves and written back into the slots
/// keyed items occupied. Returns true if anything moved.
pub fn reorder_keyed<T, K, F>(items: &mut Vec<T>, key: F) -> bool
where
    K: Ord,
    F: Fn(&T) -> Option<K>,
{
    let keyed: Vec<(usize, K)> = items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| key(item).map(|k| (i, k)))
        .collect();
    if keyed.len() < 2 {
        return false;
    }

    let mut ranked: Vec<usize> = (0..keyed.len()).collect();
    ranked.sort_by(|a, b| keyed[*a].1.cmp(&keyed[*b].1));

    let mut source: Vec<usize> = (0..items.len()).collect();
    for (rank, &(slot, _)) in keyed.iter().enumerate() {
        source[slot] = keyed[ranked[rank]].0;
    }
    if source.iter().enumerate().all(|(i, &s)| i == s) {
        return false;
    }

    let mut taken: Vec<Option<T>> = items.drain(..).map(Some).collect();
    items.extend(source.iter().filter_map(|&s| taken[s].take()));
    true
}

// ============================================================================
// Tests
// ============================================================================
