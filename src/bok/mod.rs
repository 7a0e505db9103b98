//! Shamela `.bok` synthesis.
//!
//! A legacy source is a handful of loosely named tables: one content table
//! (`b<N>`), usually a TOC table (`t<N>`) and a metadata table. This module
//! picks the tables and columns, turns content rows into pages, builds the
//! table of contents and writes the result as an EPUB package.
//!
//! ```no_run
//! use bokpub::bok::{BuildOptions, build_package};
//! use bokpub::source::JsonSource;
//!
//! let source = JsonSource::open("book.json").unwrap();
//! let options = BuildOptions::new().with_force_rtl(true);
//! build_package(&source, "book.bok", "book.epub", &options).unwrap();
//! ```

pub mod pages;
pub mod segment;
pub mod select;
pub mod toc;

use std::collections::HashSet;
use std::path::Path;

use crate::book::EpubBook;
use crate::epub::{set_rtl_in_place, write_epub};
use crate::error::Result;
use crate::source::LegacySource;
use crate::text::TextNormalizer;

pub use select::{ContentColumns, Metadata, TableSelection, TocColumns};
pub use toc::TocEntry;

/// Table names, column synonyms and probe sizes used to make sense of a
/// legacy source.
///
/// The defaults are tuned against the Shamela corpus.
#[derive(Debug, Clone)]
pub struct Heuristics {
    /// First letter of content table names.
    pub content_prefix: char,
    /// First letter of TOC table names.
    pub toc_prefix: char,
    /// Tables searched, in order, for title/author/card.
    pub metadata_tables: Vec<String>,
    pub title_keys: Vec<String>,
    pub author_keys: Vec<String>,
    pub card_keys: Vec<String>,
    /// Column-name fragment identifying a card column in any table.
    pub card_fallback_token: String,
    pub text_column: String,
    pub id_column: String,
    pub page_column: String,
    /// Alternative page numbering, preferred when it runs far past `page`.
    pub hno_column: String,
    pub part_column: String,
    pub toc_text_column: String,
    pub toc_start_columns: Vec<String>,
    pub toc_level_columns: Vec<String>,
    /// Rows inspected when comparing page columns.
    pub preview_rows: usize,
    /// Rows inspected when looking for a text-bearing column.
    pub text_probe_rows: usize,
    pub normalizer: TextNormalizer,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for Heuristics {
    fn default() -> Self {
        Self {
            content_prefix: 'b',
            toc_prefix: 't',
            metadata_tables: strings(&["Main", "main"]),
            title_keys: strings(&["title", "book", "bk", "name"]),
            author_keys: strings(&["author", "auth"]),
            card_keys: strings(&["betaka", "card", "about"]),
            card_fallback_token: "betaka".into(),
            text_column: "nass".into(),
            id_column: "id".into(),
            page_column: "page".into(),
            hno_column: "hno".into(),
            part_column: "part".into(),
            toc_text_column: "tit".into(),
            toc_start_columns: strings(&["id", "page"]),
            toc_level_columns: strings(&["lvl", "level"]),
            preview_rows: 80,
            text_probe_rows: 50,
            normalizer: TextNormalizer::default(),
        }
    }
}

/// Options for [`build_package`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Put the navigation document in the spine.
    pub include_toc_page: bool,
    /// Start a new page at headings and numbered lines inside a row.
    pub split_numbered: bool,
    /// Run the right-to-left mutator on the written package.
    pub force_rtl: bool,
    /// Deflate level; `None` uses the zip default.
    pub compression_level: Option<i64>,
    pub heuristics: Heuristics,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_include_toc_page(mut self, include_toc_page: bool) -> Self {
        self.include_toc_page = include_toc_page;
        self
    }

    pub fn with_split_numbered(mut self, split_numbered: bool) -> Self {
        self.split_numbered = split_numbered;
        self
    }

    pub fn with_force_rtl(mut self, force_rtl: bool) -> Self {
        self.force_rtl = force_rtl;
        self
    }

    pub fn with_compression_level(mut self, level: Option<i64>) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_heuristics(mut self, heuristics: Heuristics) -> Self {
        self.heuristics = heuristics;
        self
    }
}

/// Build an [`EpubBook`] from a legacy source.
///
/// `source_name` is the original file name; it supplies the title when the
/// source has none.
pub fn synthesize<S: LegacySource + ?Sized>(
    source: &S,
    source_name: &str,
    options: &BuildOptions,
) -> Result<EpubBook> {
    let h = &options.heuristics;
    let catalog = source.catalog();
    let selection = select::select_tables(&catalog, h)?;
    log::debug!(
        "content table {}, toc table {:?}",
        selection.content,
        selection.toc
    );

    let meta = select::extract_metadata(source, &catalog, source_name, h)?;
    let content = source.rows(&selection.content)?;
    let cols = select::content_columns(&content, h)?;
    log::debug!("content columns: {cols:?}");

    let mut raw_toc = Vec::new();
    if let Some(name) = &selection.toc {
        let table = source.rows(name)?;
        match select::toc_columns(&table, h) {
            Some(toc_cols) => raw_toc = toc::parse_raw_toc(&table, &toc_cols, &h.normalizer),
            None => log::debug!("toc table {name} has no usable columns"),
        }
    }

    let toc_starts: HashSet<i64> = raw_toc.iter().map(|e| e.start).collect();
    let build = pages::build_pages(
        &content,
        &cols,
        &toc_starts,
        options.split_numbered,
        &h.normalizer,
    );

    let mut toc = toc::map_toc(&raw_toc, &build.id_to_page, &build.id_to_snippet);
    if toc.is_empty() {
        log::debug!("toc table gave no entries, scanning page headings");
        toc = toc::auto_toc(&build.pages);
    }
    if toc.is_empty() {
        log::debug!("no headings found, one toc entry per page");
        toc = toc::page_toc(&build.pages);
    }

    Ok(EpubBook {
        about_html: pages::about_html(&meta),
        title: meta.title,
        author: meta.author,
        pages: build.pages,
        toc,
    })
}

/// Synthesize a book from `source` and write it to `dest`.
pub fn build_package<S: LegacySource + ?Sized>(
    source: &S,
    source_name: &str,
    dest: impl AsRef<Path>,
    options: &BuildOptions,
) -> Result<EpubBook> {
    let dest = dest.as_ref();
    let book = synthesize(source, source_name, options)?;
    write_epub(
        &book,
        dest,
        options.include_toc_page,
        options.compression_level,
    )?;
    log::info!(
        "{}: {} pages, {} top-level toc entries",
        dest.display(),
        book.pages.len(),
        book.toc.len()
    );
    if options.force_rtl {
        set_rtl_in_place(dest)?;
    }
    Ok(book)
}

/// Convert a JSON table export at `input` into a package at `dest`.
#[cfg(feature = "json")]
pub fn convert_path(
    input: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    options: &BuildOptions,
) -> Result<EpubBook> {
    let input = input.as_ref();
    let source = crate::source::JsonSource::open(input)?;
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    build_package(&source, &name, dest, options)
}
