//! # bokpub
//!
//! Build EPUB packages from Shamela `.bok` tables, and repair existing EPUB
//! archives in place.
//!
//! ## Features
//!
//! - Decode legacy CP1256 / UTF-16 cells, including double-encoded text
//! - Pick content, TOC and metadata tables by heuristic rules
//! - Split long rows into pages and build a nested table of contents
//! - Write EPUB 3 packages with an NCX and a right-to-left spine
//! - Repair duplicated or mis-cased manifest entries and broken spines
//! - Flatten nested TOCs and force right-to-left layout, idempotently
//!
//! ## Quick Start
//!
//! ```no_run
//! use bokpub::{BuildOptions, MemorySource, Table, build_package};
//!
//! let source = MemorySource::new().with_table(
//!     "b1",
//!     Table::from_rows(["id", "nass", "page"], vec![vec![1.into(), "نص".into(), 1.into()]]),
//! );
//! build_package(&source, "book.bok", "book.epub", &BuildOptions::new()).unwrap();
//! ```
//!
//! ## Fixing packages
//!
//! ```no_run
//! use bokpub::{RepairOptions, fix_in_place};
//!
//! let options = RepairOptions::new().with_flatten_toc(true).with_force_rtl(true);
//! let report = fix_in_place("book.epub", &options).unwrap();
//! println!("changed: {}", report.changed());
//! ```

pub mod bok;
pub mod book;
pub mod epub;
pub mod error;
pub(crate) mod patterns;
pub mod source;
pub mod text;
pub(crate) mod util;

pub use bok::{BuildOptions, Heuristics, build_package, synthesize};
pub use book::{EpubBook, Page, TocNode};
pub use epub::{
    FixReport, PackageContainer, RepairOptions, fix_in_place, flatten_toc_in_place,
    repair_in_place, set_rtl_in_place, write_epub,
};
pub use error::{Error, Result};
pub use source::{CellValue, LegacySource, MemorySource, Table};
pub use text::TextNormalizer;

#[cfg(feature = "json")]
pub use bok::convert_path;
#[cfg(feature = "json")]
pub use source::JsonSource;
