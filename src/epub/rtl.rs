//! Right-to-left page progression.

use std::path::Path;

use memchr::memmem;

use super::archive::{PackageContainer, rewrite_in_place};
use super::repair::OpfDocument;
use crate::error::Result;

/// Rule prepended to stylesheets that lack one.
pub const RTL_CSS_PREFIX: &[u8] = b"* {direction: rtl !important;}\n";

const RTL_DIRECTIVE: &[u8] = b"direction: rtl !important";
/// Leading bytes of a stylesheet searched for an existing directive.
const CSS_SNIFF_LEN: usize = 300;
const PROGRESSION_ATTR: &str = "page-progression-direction";

/// True if the start of `css` already forces right-to-left.
pub fn has_rtl_directive(css: &[u8]) -> bool {
    let head = css[..css.len().min(CSS_SNIFF_LEN)].to_ascii_lowercase();
    memmem::find(&head, RTL_DIRECTIVE).is_some()
}

/// Set right-to-left progression on the spine and force it in every
/// stylesheet. Returns whether anything changed.
pub fn set_rtl(container: &mut PackageContainer) -> Result<bool> {
    let Some(mut opf) = OpfDocument::locate(container) else {
        log::warn!("no usable package document, direction not set");
        return Ok(false);
    };

    let mut opf_changed = false;
    if let Some(path) = opf.doc.root.find_path(|e| e.is("spine"))
        && let Some(spine) = opf.doc.root.at_path_mut(&path)
        && spine.attr(PROGRESSION_ATTR).as_deref() != Some("rtl")
    {
        spine.set_attr(PROGRESSION_ATTR, "rtl");
        opf_changed = true;
    }

    let stylesheets: Vec<String> = container
        .unique_names()
        .into_iter()
        .filter(|n| n.ends_with(".css"))
        .map(str::to_string)
        .collect();
    let mut css_changed = 0usize;
    for name in stylesheets {
        let Some(entry) = container.get(&name) else {
            continue;
        };
        if has_rtl_directive(&entry.data) {
            continue;
        }
        let mut data = RTL_CSS_PREFIX.to_vec();
        data.extend_from_slice(&entry.data);
        container.put(&name, data);
        css_changed += 1;
    }

    opf.store(container, opf_changed);
    log::debug!(
        "{}: spine changed={opf_changed}, {css_changed} stylesheet(s) updated",
        opf.path
    );
    Ok(opf_changed || css_changed > 0)
}

/// Apply [`set_rtl`] to the package at `path` in place.
pub fn set_rtl_in_place(path: impl AsRef<Path>) -> Result<bool> {
    rewrite_in_place(path.as_ref(), None, set_rtl)
}
