//! EPUB packages: writing new ones and fixing existing ones in place.
//!
//! Every in-place operation goes through [`archive::rewrite_in_place`], so a
//! package is either fully rewritten or left untouched, and a call that
//! changes nothing does not touch the file.

pub mod archive;
pub mod flatten;
pub mod repair;
pub mod rtl;
pub mod tree;
mod writer;

use std::path::Path;

pub use archive::{Entry, PackageContainer};
pub use flatten::{flatten, flatten_toc_in_place};
pub use repair::{repair, repair_in_place};
pub use rtl::{set_rtl, set_rtl_in_place};
pub use writer::{build_container, write_epub};

use crate::error::Result;

/// Steps run by [`fix_in_place`] after the manifest/spine repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairOptions {
    /// Flatten `toc.ncx` and `nav.xhtml`.
    pub flatten_toc: bool,
    /// Set right-to-left progression and stylesheet direction.
    pub force_rtl: bool,
}

impl RepairOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flatten_toc(mut self, flatten_toc: bool) -> Self {
        self.flatten_toc = flatten_toc;
        self
    }

    pub fn with_force_rtl(mut self, force_rtl: bool) -> Self {
        self.force_rtl = force_rtl;
        self
    }
}

/// What [`fix_in_place`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixReport {
    pub repaired: bool,
    pub flattened: bool,
    pub rtl_changed: bool,
}

impl FixReport {
    pub fn changed(&self) -> bool {
        self.repaired || self.flattened || self.rtl_changed
    }
}

/// Repair the package at `path`, then optionally flatten its TOC and make
/// it right-to-left, in a single atomic rewrite.
pub fn fix_in_place(path: impl AsRef<Path>, options: &RepairOptions) -> Result<FixReport> {
    let mut report = FixReport::default();
    archive::rewrite_in_place(path.as_ref(), None, |container| {
        report.repaired = repair(container)?;
        if options.flatten_toc {
            report.flattened = flatten(container)?;
        }
        if options.force_rtl {
            report.rtl_changed = set_rtl(container)?;
        }
        Ok(report.changed())
    })?;
    Ok(report)
}
