//! Table and column selection.
//!
//! Every choice is a [`RuleChain`]: named rules tried in priority order, the
//! first hit wins. Adding a heuristic means adding a rule.

use log::debug;

use super::Heuristics;
use crate::error::{Error, Result};
use crate::source::{CellValue, LegacySource, Table, TableCatalog};
use crate::text::{TextNormalizer, to_int};

type Pick<'a, C> = Box<dyn Fn(&C) -> Option<String> + 'a>;

/// Named rules evaluated in order; the first `Some` wins.
pub struct RuleChain<'a, C: ?Sized> {
    what: &'static str,
    rules: Vec<(&'static str, Pick<'a, C>)>,
}

impl<'a, C: ?Sized> RuleChain<'a, C> {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            rules: Vec::new(),
        }
    }

    pub fn rule(mut self, name: &'static str, pick: impl Fn(&C) -> Option<String> + 'a) -> Self {
        self.rules.push((name, Box::new(pick)));
        self
    }

    pub fn first_match(&self, ctx: &C) -> Option<String> {
        for (name, pick) in &self.rules {
            if let Some(hit) = pick(ctx) {
                debug!("{}: rule '{}' picked {:?}", self.what, name, hit);
                return Some(hit);
            }
        }
        debug!("{}: no rule matched", self.what);
        None
    }
}

/// The tables a conversion reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSelection {
    pub content: String,
    pub toc: Option<String>,
}

/// Book-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: String,
    pub author: String,
    pub card: String,
}

/// Columns of the content table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentColumns {
    pub text: String,
    pub id: Option<String>,
    pub page: Option<String>,
    pub part: Option<String>,
}

/// Columns of the TOC table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocColumns {
    pub text: String,
    pub start: String,
    pub level: Option<String>,
}

/// `name` without its first character, if that character is `prefix` in any case.
fn strip_prefix_ci(name: &str, prefix: char) -> Option<&str> {
    let first = name.chars().next()?;
    first
        .to_lowercase()
        .eq(prefix.to_lowercase())
        .then(|| &name[first.len_utf8()..])
}

fn has_prefix(name: &str, prefix: char) -> bool {
    strip_prefix_ci(name, prefix).is_some()
}

/// Largest table with the prefix; ties go to the first in catalog order.
fn largest_with_prefix(catalog: &TableCatalog, prefix: char) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for table in catalog.tables.iter().filter(|t| has_prefix(&t.name, prefix)) {
        if best.is_none_or(|(_, rows)| table.row_count > rows) {
            best = Some((&table.name, table.row_count));
        }
    }
    best.map(|(name, _)| name.to_string())
}

/// Pick the content and TOC tables.
pub fn select_tables(catalog: &TableCatalog, h: &Heuristics) -> Result<TableSelection> {
    let content = RuleChain::new("content table")
        .rule("largest prefixed table", |c: &TableCatalog| {
            largest_with_prefix(c, h.content_prefix)
        })
        .first_match(catalog)
        .ok_or_else(|| Error::SourceStructure("could not find a content table".into()))?;

    let toc = RuleChain::new("toc table")
        .rule("matching suffix", |c: &TableCatalog| {
            let suffix = strip_prefix_ci(&content, h.content_prefix)?;
            let want = format!("{}{}", h.toc_prefix, suffix);
            c.contains(&want).then_some(want)
        })
        .rule("largest prefixed table", |c: &TableCatalog| {
            largest_with_prefix(c, h.toc_prefix)
        })
        .first_match(catalog);

    Ok(TableSelection { content, toc })
}

/// Case-insensitive exact key match, then substring match.
fn synonym_chain<'a>(what: &'static str, synonyms: &'a [String]) -> RuleChain<'a, [String]> {
    RuleChain::new(what)
        .rule("exact synonym", move |cols: &[String]| {
            cols.iter()
                .find(|c| synonyms.iter().any(|s| c.to_lowercase() == *s))
                .cloned()
        })
        .rule("contains synonym", move |cols: &[String]| {
            cols.iter()
                .find(|c| {
                    let lower = c.to_lowercase();
                    synonyms.iter().any(|s| lower.contains(s.as_str()))
                })
                .cloned()
        })
}

fn first_value(table: &Table, column: &str, normalizer: &TextNormalizer) -> String {
    normalizer.decode(table.cell(column, 0)).trim().to_string()
}

/// Read title, author and card text.
///
/// The card falls back to any table with a card column; the title falls back
/// to `source_name` without its extension.
pub fn extract_metadata<S: LegacySource + ?Sized>(
    source: &S,
    catalog: &TableCatalog,
    source_name: &str,
    h: &Heuristics,
) -> Result<Metadata> {
    let normalizer = &h.normalizer;
    let mut meta = Metadata::default();

    let meta_table = h
        .metadata_tables
        .iter()
        .find(|name| catalog.contains(name.as_str()));
    if let Some(name) = meta_table {
        let table = source.rows(name)?;
        let pick = |what: &'static str, synonyms: &[String]| {
            synonym_chain(what, synonyms)
                .first_match(table.columns())
                .map(|col| first_value(&table, &col, normalizer))
                .unwrap_or_default()
        };
        meta.title = pick("title column", h.title_keys.as_slice());
        meta.author = pick("author column", h.author_keys.as_slice());
        meta.card = pick("card column", h.card_keys.as_slice());
    }

    if meta.card.is_empty() {
        let token = h.card_fallback_token.as_str();
        let holder = catalog
            .tables
            .iter()
            .find(|t| t.columns.iter().any(|c| c.to_lowercase().contains(token)));
        if let Some(info) = holder {
            let table = source.rows(&info.name)?;
            let column = table
                .columns()
                .iter()
                .find(|c| c.to_lowercase().contains(token))
                .cloned();
            if let Some(column) = column {
                meta.card = first_value(&table, &column, normalizer);
            }
        }
    }

    if meta.title.is_empty() {
        meta.title = crate::patterns::SOURCE_EXT_RE
            .replace(source_name, "")
            .into_owned();
    }
    meta.title = meta.title.trim().to_string();
    Ok(meta)
}

/// First column holding a text cell within the probed rows.
fn first_text_column(table: &Table, probe_rows: usize) -> Option<String> {
    table
        .columns()
        .iter()
        .find(|c| table.column(c).iter().take(probe_rows).any(CellValue::is_text))
        .cloned()
}

fn named(name: &str) -> impl Fn(&Table) -> Option<String> + '_ {
    move |t: &Table| t.has_column(name).then(|| name.to_string())
}

fn containing(token: &str) -> impl Fn(&Table) -> Option<String> + '_ {
    move |t: &Table| {
        t.columns()
            .iter()
            .find(|c| c.to_lowercase().contains(token))
            .cloned()
    }
}

fn max_int(table: &Table, column: &str, rows: usize) -> i64 {
    table
        .column(column)
        .iter()
        .take(rows)
        .filter_map(to_int)
        .max()
        .unwrap_or(0)
}

/// Pick the text, id, page and part columns of the content table.
pub fn content_columns(table: &Table, h: &Heuristics) -> Result<ContentColumns> {
    let text = RuleChain::new("text column")
        .rule("named", named(&h.text_column))
        .rule("first text-bearing", |t: &Table| {
            first_text_column(t, h.text_probe_rows)
        })
        .first_match(table)
        .ok_or_else(|| Error::SourceStructure("no text column in the content table".into()))?;

    let id = RuleChain::new("id column")
        .rule("named", named(&h.id_column))
        .first_match(table);

    let page = RuleChain::new("page column")
        .rule("named", named(&h.page_column))
        .rule("contains", containing(&h.page_column))
        .first_match(table)
        .map(|page| {
            if !table.has_column(&h.hno_column) {
                return page;
            }
            let max_hno = max_int(table, &h.hno_column, h.preview_rows);
            let max_page = max_int(table, &page, h.preview_rows);
            if max_hno > 50.max(max_page + 50) {
                debug!("page column: using {} (max {max_hno} vs {max_page})", h.hno_column);
                h.hno_column.clone()
            } else {
                page
            }
        });

    let part = RuleChain::new("part column")
        .rule("named", named(&h.part_column))
        .rule("contains", containing(&h.part_column))
        .first_match(table);

    Ok(ContentColumns {
        text,
        id,
        page,
        part,
    })
}

/// Pick the TOC table columns; `None` if there is no text or start column.
pub fn toc_columns(table: &Table, h: &Heuristics) -> Option<TocColumns> {
    let text = RuleChain::new("toc text column")
        .rule("named", named(&h.toc_text_column))
        .rule("first text-bearing", |t: &Table| {
            first_text_column(t, h.text_probe_rows)
        })
        .first_match(table)?;

    let start = h
        .toc_start_columns
        .iter()
        .fold(RuleChain::new("toc start column"), |chain, name| {
            chain.rule("named", named(name))
        })
        .first_match(table)?;

    let level = h
        .toc_level_columns
        .iter()
        .fold(RuleChain::new("toc level column"), |chain, name| {
            chain.rule("named", named(name))
        })
        .first_match(table);

    Some(TocColumns { text, start, level })
}
