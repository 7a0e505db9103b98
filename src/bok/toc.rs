//! Table of contents construction.
//!
//! The TOC table is parsed into flat [`TocEntry`] rows, mapped onto the
//! generated pages and nested by level. When the table is missing or yields
//! nothing usable, headings found on the pages are used, and failing that,
//! one entry per page.

use std::collections::{HashMap, HashSet};

use super::pages::anchor_id;
use super::select::TocColumns;
use crate::book::{Page, TocNode};
use crate::patterns::{FIRST_PARAGRAPH_RE, VOLUME_RE};
use crate::source::Table;
use crate::text::{TextNormalizer, to_int};
use crate::util::{nest_by_level, strip_tags_and_ws};

use super::segment::is_heading;

/// Longest first-paragraph text accepted as an automatic TOC title.
pub const MAX_AUTO_TOC_TITLE_LEN: usize = 100;

/// One row of the TOC table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    /// Id of the content row (or page) the entry starts at.
    pub start: i64,
    pub text: String,
    pub level: Option<i64>,
}

/// Parse the TOC table.
///
/// Volume filler rows and exact duplicates are dropped, and levels are
/// shifted so the smallest one becomes 1.
pub fn parse_raw_toc(table: &Table, cols: &TocColumns, normalizer: &TextNormalizer) -> Vec<TocEntry> {
    let mut items = Vec::new();
    let mut seen = HashSet::new();

    for row in 0..table.row_count() {
        let text = normalizer.decode(table.cell(&cols.text, row)).trim().to_string();
        let start = to_int(table.cell(&cols.start, row));
        let level = cols.level.as_deref().and_then(|c| to_int(table.cell(c, row)));
        let Some(start) = start else { continue };
        if text.is_empty() || VOLUME_RE.is_match(&text) {
            continue;
        }
        if !seen.insert((start, level, text.clone())) {
            continue;
        }
        items.push(TocEntry { start, text, level });
    }

    if let Some(min) = items.iter().filter_map(|e| e.level).min()
        && min != 1
    {
        let shift = 1 - min;
        for entry in &mut items {
            if let Some(level) = entry.level.as_mut() {
                *level += shift;
            }
        }
    }

    log::debug!("parsed {} toc entries", items.len());
    items
}

/// Point TOC entries at pages and nest them.
///
/// Entries whose start row produced no page are dropped; start 0 means the
/// first page. A `سورة` entry is upgraded to its `تفسير سورة` form when that
/// text opens the target row.
pub fn map_toc(
    entries: &[TocEntry],
    id_to_page: &HashMap<i64, usize>,
    id_to_snippet: &HashMap<i64, String>,
) -> Vec<TocNode> {
    let mut items: Vec<(TocNode, Option<i64>)> = Vec::new();
    let mut seen = HashSet::new();

    for entry in entries {
        let target = match id_to_page.get(&entry.start) {
            Some(&page) => page,
            None if entry.start == 0 => 1,
            None => continue,
        };

        let mut text = entry.text.clone();
        if text.starts_with("سورة ") {
            let commentary = format!("تفسير {text}");
            let snippet = id_to_snippet.get(&entry.start).map_or("", String::as_str);
            if snippet.contains(&commentary) {
                text = commentary;
            }
        }

        if !seen.insert((target, entry.level, text.clone())) {
            continue;
        }
        let anchor = if entry.start == 0 {
            String::new()
        } else {
            anchor_id(entry.start)
        };
        items.push((TocNode::new(text, target).with_anchor(anchor), entry.level));
    }

    if items.iter().all(|(_, level)| level.is_none()) {
        items.sort_by_key(|(node, _)| node.target_page);
        return items.into_iter().map(|(node, _)| node).collect();
    }
    nest_by_level(items, |(_, level)| *level, |(node, _)| node)
}

/// Headings found in the first paragraph of each page.
pub fn auto_toc(pages: &[Page]) -> Vec<TocNode> {
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();
    for page in pages {
        let Some(caps) = FIRST_PARAGRAPH_RE.captures(&page.body) else {
            continue;
        };
        let text = strip_tags_and_ws(&caps[1]);
        if text.is_empty() || text.chars().count() > MAX_AUTO_TOC_TITLE_LEN {
            continue;
        }
        if is_heading(&text) && seen.insert(text.clone()) {
            nodes.push(TocNode::new(text, page.page_number));
        }
    }
    nodes
}

/// One entry per page, labelled with the source page number.
pub fn page_toc(pages: &[Page]) -> Vec<TocNode> {
    pages
        .iter()
        .map(|p| TocNode::new(format!("صفحة {}", p.page), p.page_number))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::CellValue;
    use proptest::prelude::*;

    fn cols() -> TocColumns {
        TocColumns {
            text: "tit".into(),
            start: "id".into(),
            level: Some("lvl".into()),
        }
    }

    fn entry(start: i64, text: &str, level: Option<i64>) -> TocEntry {
        TocEntry {
            start,
            text: text.into(),
            level,
        }
    }

    #[test]
    fn test_parse_drops_volumes_and_duplicates() {
        let table = Table::from_rows(
            ["id", "tit", "lvl"],
            vec![
                vec![1.into(), "الجزء الأول".into(), 0.into()],
                vec![2.into(), "باب".into(), 0.into()],
                vec![2.into(), "باب".into(), 0.into()],
                vec![3.into(), "فصل".into(), 1.into()],
                vec![CellValue::Null, "بلا بداية".into(), 1.into()],
            ],
        );
        let items = parse_raw_toc(&table, &cols(), &TextNormalizer::default());
        assert_eq!(
            items,
            vec![entry(2, "باب", Some(1)), entry(3, "فصل", Some(2))]
        );
    }

    #[test]
    fn test_parse_shifts_high_levels_down() {
        let table = Table::from_rows(
            ["id", "tit", "lvl"],
            vec![vec![1.into(), "a".into(), 3.into()], vec![2.into(), "b".into(), 4.into()]],
        );
        let levels: Vec<_> = parse_raw_toc(&table, &cols(), &TextNormalizer::default())
            .iter()
            .map(|e| e.level)
            .collect();
        assert_eq!(levels, vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_map_nests_by_level() {
        let entries = vec![
            entry(1, "a", Some(1)),
            entry(2, "b", Some(2)),
            entry(3, "c", Some(2)),
            entry(4, "d", Some(1)),
        ];
        let id_to_page = HashMap::from([(1, 1), (2, 2), (3, 3), (4, 4)]);
        let toc = map_toc(&entries, &id_to_page, &HashMap::new());
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].children.len(), 2);
        assert!(toc[1].children.is_empty());
        assert_eq!(toc[0].anchor.as_deref(), Some("toc_1"));
    }

    #[test]
    fn test_map_flat_sorted_by_page() {
        let entries = vec![entry(2, "b", None), entry(0, "start", None), entry(9, "gone", None)];
        let id_to_page = HashMap::from([(2, 5)]);
        let toc = map_toc(&entries, &id_to_page, &HashMap::new());
        let targets: Vec<_> = toc.iter().map(|n| (n.text.as_str(), n.target_page)).collect();
        assert_eq!(targets, vec![("start", 1), ("b", 5)]);
        assert_eq!(toc[0].anchor, None);
    }

    #[test]
    fn test_map_prefers_commentary_heading() {
        let entries = vec![entry(7, "سورة الفاتحة", None)];
        let id_to_page = HashMap::from([(7, 3)]);
        let snippets = HashMap::from([(7, "تفسير سورة الفاتحة\nنص".to_string())]);
        let toc = map_toc(&entries, &id_to_page, &snippets);
        assert_eq!(toc[0].text, "تفسير سورة الفاتحة");
    }

    #[test]
    fn test_auto_and_page_toc() {
        let pages = vec![
            Page::new(1, "<div><p>سورة الفاتحة</p></div>"),
            Page::new(2, "<div><p>نص عادي</p></div>"),
            Page::new(3, "<div><p>سورة الفاتحة</p></div>"),
        ];
        let auto = auto_toc(&pages);
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].target_page, 1);

        let fallback = page_toc(&pages);
        assert_eq!(fallback.len(), 3);
        assert_eq!(fallback[2].text, "صفحة 0");
    }

    proptest! {
        #[test]
        fn prop_nesting_preserves_entries(levels in prop::collection::vec(1i64..5, 0..40)) {
            let entries: Vec<_> = levels
                .iter()
                .enumerate()
                .map(|(i, &l)| entry(i as i64 + 1, &format!("e{i}"), Some(l)))
                .collect();
            let id_to_page: HashMap<i64, usize> =
                (1..=levels.len()).map(|i| (i as i64, i)).collect();
            let toc = map_toc(&entries, &id_to_page, &HashMap::new());
            let total: usize = toc.iter().map(TocNode::subtree_size).sum();
            prop_assert_eq!(total, levels.len());
        }
    }
}
