//! Content rows to pages.

use std::collections::{HashMap, HashSet};

use super::segment::{anchor_chunk_index, segment, to_html_paragraphs};
use super::select::{ContentColumns, Metadata};
use crate::book::Page;
use crate::source::Table;
use crate::text::{TextNormalizer, to_int};
use crate::util::{close_void_tags, escape_xml, strip_tags_and_ws};

/// Number of leading paragraphs kept as a row's snippet.
pub const SNIPPET_LINES: usize = 2;

/// Pages plus the lookups the TOC builder needs.
#[derive(Debug, Clone, Default)]
pub struct PageBuild {
    pub pages: Vec<Page>,
    /// Row id → `page_number` of the page holding its anchor, else of the
    /// first page of the first row with that id.
    pub id_to_page: HashMap<i64, usize>,
    /// Row id → first lines of the row, tags stripped.
    pub id_to_snippet: HashMap<i64, String>,
}

/// Anchor id for a TOC start row.
pub fn anchor_id(row_id: i64) -> String {
    format!("toc_{row_id}")
}

fn footer(part: &str, page: Option<i64>) -> String {
    let mut bits = Vec::new();
    if !part.is_empty() {
        bits.push(format!("الجزء: {part}"));
    }
    if let Some(page) = page.filter(|p| *p != 0) {
        bits.push(format!("الصفحة: {page}"));
    }
    bits.join(" - ")
}

/// Turn content rows into pages, one page per chunk.
///
/// The first row whose id is in `toc_starts` gets an anchor at the start of
/// its first heading chunk, and that chunk is recorded in `id_to_page`. Other
/// ids map to the first page they appear on.
pub fn build_pages(
    table: &Table,
    cols: &ContentColumns,
    toc_starts: &HashSet<i64>,
    split_numbered: bool,
    normalizer: &TextNormalizer,
) -> PageBuild {
    let mut out = PageBuild::default();
    let mut anchored: HashSet<i64> = HashSet::new();

    for row in 0..table.row_count() {
        let raw = normalizer.decode(table.cell(&cols.text, row));
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let id = cols.id.as_deref().and_then(|c| to_int(table.cell(c, row)));
        let page = cols.page.as_deref().and_then(|c| to_int(table.cell(c, row)));
        let part_cell = cols.part.as_deref().map(|c| table.cell(c, row));
        let part = part_cell.and_then(to_int);
        let part_label = match (part, part_cell) {
            (Some(n), _) => n.to_string(),
            (None, Some(cell)) => normalizer.decode(cell).trim().to_string(),
            (None, None) => String::new(),
        };

        let chunks = segment(raw, split_numbered);
        if chunks.is_empty() {
            continue;
        }

        let toc_start = id.filter(|id| toc_starts.contains(id) && anchored.insert(*id));
        let anchor_chunk = if toc_start.is_some() {
            anchor_chunk_index(&chunks)
        } else {
            0
        };
        let footer = footer(&part_label, page);

        for (index, paras) in chunks.iter().enumerate() {
            let mut body = String::from("<div>");
            if let Some(start) = toc_start
                && index == anchor_chunk
            {
                body.push_str(&format!("<a id=\"{}\"></a>", anchor_id(start)));
            }
            body.push_str(&paras.concat());
            body.push_str("</div>");
            if !footer.is_empty() {
                body.push_str(&format!("<div class=\"text-center\">{footer}</div>"));
            }

            let page_number = out.pages.len() + 1;
            out.pages.push(Page {
                page_number,
                page: page.unwrap_or(0),
                part,
                body: close_void_tags(&body).into_owned(),
            });

            match (toc_start, id) {
                (Some(start), _) if index == anchor_chunk => {
                    out.id_to_page.insert(start, page_number);
                }
                (None, Some(id)) if !toc_starts.contains(&id) => {
                    out.id_to_page.entry(id).or_insert(page_number);
                }
                _ => {}
            }
        }

        if let Some(id) = id {
            out.id_to_snippet.entry(id).or_insert_with(|| {
                chunks
                    .iter()
                    .flatten()
                    .take(SNIPPET_LINES)
                    .map(|p| strip_tags_and_ws(p))
                    .collect::<Vec<_>>()
                    .join("\n")
                    .trim()
                    .to_string()
            });
        }
    }

    log::debug!("built {} pages from {} rows", out.pages.len(), table.row_count());
    out
}

/// Book card body: title, author line and card text.
pub fn about_html(meta: &Metadata) -> String {
    let card = if meta.card.is_empty() {
        String::new()
    } else {
        close_void_tags(&to_html_paragraphs(&meta.card).concat()).into_owned()
    };
    let author = if meta.author.is_empty() {
        String::new()
    } else {
        format!("<p>المؤلف: {}</p>", escape_xml(&meta.author))
    };
    format!(
        "<div>\n<h1>{}</h1>\n{}\n{}\n</div>",
        escape_xml(&meta.title),
        author,
        card
    )
}
