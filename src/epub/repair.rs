//! Manifest and spine repair for existing packages.
//!
//! The package document is located, its manifest is deduplicated and
//! corrected against the archive's actual entry names, and the spine is
//! cleaned up to match. Page-numbered items are put in numeric order.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use percent_encoding::percent_decode_str;

use super::archive::{PackageContainer, rewrite_in_place};
use super::tree::{Document, Element, Node};
use crate::error::Result;
use crate::patterns::PAGE_ID_RE;
use crate::util::reorder_keyed;

/// Front-matter ids added to the spine, in insertion order.
pub const FRONT_MATTER_IDS: [&str; 3] = ["titlepage", "intro", "book_info"];

/// Spine idref prefix marking the first content page.
const PAGE_IDREF_PREFIX: &str = "page_";

/// The package document picked from a container.
#[derive(Debug, Clone)]
pub struct OpfDocument {
    /// Archive name of the entry it was read from.
    pub path: String,
    pub doc: Document,
    /// The entry's bytes as read.
    pub source: Vec<u8>,
}

impl OpfDocument {
    /// Pick the last `.opf` entry that parses and has both a manifest and a
    /// spine. Repeated names are all considered, latest first.
    pub fn locate(container: &PackageContainer) -> Option<Self> {
        for entry in container.entries().iter().rev() {
            if !entry.name.ends_with(".opf") {
                continue;
            }
            match Document::parse(&entry.data) {
                Ok(doc)
                    if doc.root.find_path(|e| e.is("manifest")).is_some()
                        && doc.root.find_path(|e| e.is("spine")).is_some() =>
                {
                    log::debug!("using package document {}", entry.name);
                    return Some(Self {
                        path: entry.name.clone(),
                        doc,
                        source: entry.data.clone(),
                    });
                }
                Ok(_) => log::warn!("{}: no manifest or spine, skipped", entry.name),
                Err(err) => log::warn!("{}: skipped: {err}", entry.name),
            }
        }
        None
    }

    /// Directory of the document inside the archive (`""` at the root).
    pub fn dir(&self) -> &str {
        parent_dir(&self.path)
    }

    /// Write the document back under its name. Unchanged documents keep
    /// their source bytes, which also replaces any later broken copy.
    pub fn store(&self, container: &mut PackageContainer, changed: bool) {
        let bytes = if changed {
            self.doc.to_bytes()
        } else {
            self.source.clone()
        };
        container.put(&self.path, bytes);
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Collapse `.` and `..` segments of an archive path.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Resolves manifest hrefs against the archive's entry names.
#[derive(Debug)]
pub struct HrefResolver<'a> {
    opf_dir: &'a str,
    names: HashSet<&'a str>,
    by_lower: HashMap<String, Vec<&'a str>>,
}

impl<'a> HrefResolver<'a> {
    pub fn new(opf_dir: &'a str, names: impl IntoIterator<Item = &'a str>) -> Self {
        let names: HashSet<&str> = names.into_iter().collect();
        let mut by_lower: HashMap<String, Vec<&str>> = HashMap::new();
        for name in &names {
            by_lower.entry(name.to_lowercase()).or_default().push(name);
        }
        Self {
            opf_dir,
            names,
            by_lower,
        }
    }

    /// Archive paths an href may refer to, plus its fragment.
    fn candidates<'h>(&self, href: &'h str) -> (Vec<String>, Option<&'h str>) {
        let (base, frag) = match href.split_once('#') {
            Some((base, frag)) => (base, Some(frag)),
            None => (href, None),
        };
        let base = base.strip_prefix("./").unwrap_or(base);
        let decoded = percent_decode_str(base).decode_utf8().ok();

        let mut bases: Vec<&str> = vec![base];
        if let Some(decoded) = decoded.as_deref()
            && decoded != base
        {
            bases.push(decoded);
        }

        let mut out: Vec<String> = Vec::new();
        for base in bases {
            if !self.opf_dir.is_empty() {
                let joined = if base.starts_with('/') {
                    base.to_string()
                } else {
                    format!("{}/{base}", self.opf_dir)
                };
                push_unique(&mut out, normalize_path(&joined));
            }
            push_unique(&mut out, normalize_path(base));
        }
        (out, frag)
    }

    /// The archive entry an href points at, if any.
    pub fn resolve(&self, href: &str) -> Option<String> {
        let (candidates, _) = self.candidates(href);
        candidates
            .into_iter()
            .find(|c| self.names.contains(c.as_str()))
    }

    pub fn exists(&self, href: &str) -> bool {
        self.resolve(href).is_some()
    }

    /// Corrected href for one that only matches an entry case-insensitively.
    ///
    /// Returns `None` when the href already resolves or no candidate has
    /// exactly one case-insensitive match.
    pub fn fix_case(&self, href: &str) -> Option<String> {
        let (candidates, frag) = self.candidates(href);
        if candidates.iter().any(|c| self.names.contains(c.as_str())) {
            return None;
        }
        for candidate in &candidates {
            let Some([actual]) = self.by_lower.get(&candidate.to_lowercase()).map(Vec::as_slice) else {
                continue;
            };
            let actual: &str = actual;
            let rel = match actual.strip_prefix(self.opf_dir).and_then(|r| r.strip_prefix('/')) {
                Some(rel) if !self.opf_dir.is_empty() => rel,
                _ => actual,
            };
            let rel = rel.strip_prefix("./").unwrap_or(rel);
            let fixed = match frag {
                Some(frag) if !frag.is_empty() => format!("{rel}#{frag}"),
                _ => rel.to_string(),
            };
            return (fixed != href).then_some(fixed);
        }
        None
    }

    /// True if any candidate path lies under a `text/` directory.
    pub fn is_content_path(&self, href: &str) -> bool {
        let (candidates, _) = self.candidates(href);
        candidates
            .iter()
            .any(|c| format!("/{c}").to_lowercase().contains("/text/"))
    }
}

fn push_unique(out: &mut Vec<String>, value: String) {
    if !out.contains(&value) {
        out.push(value);
    }
}

/// Qualified name for a new child, reusing the parent's prefix.
fn sibling_name(parent: &str, local: &str) -> String {
    match parent.split_once(':') {
        Some((prefix, _)) => format!("{prefix}:{local}"),
        None => local.to_string(),
    }
}

/// Remove the given children along with the whitespace that follows each.
fn remove_children(parent: &mut Element, doomed: &HashSet<usize>) {
    if doomed.is_empty() {
        return;
    }
    let mut drop_ws = false;
    let children = std::mem::take(&mut parent.children);
    for (i, node) in children.into_iter().enumerate() {
        if doomed.contains(&i) {
            drop_ws = true;
            continue;
        }
        if drop_ws && matches!(&node, Node::Raw(raw) if raw.trim().is_empty()) {
            drop_ws = false;
            continue;
        }
        drop_ws = false;
        parent.children.push(node);
    }
}

fn page_key(node: &Node, local: &str, attr: &str) -> Option<u64> {
    match node {
        Node::Element(e) if e.is(local) => {
            let value = e.attr(attr)?;
            let caps = PAGE_ID_RE.captures(&value)?;
            caps[1].parse().ok()
        }
        _ => None,
    }
}

fn non_empty_attr<'e>(element: &'e Element, key: &str) -> Option<Cow<'e, str>> {
    element.attr(key).filter(|v| !v.is_empty())
}

/// Deduplicate and correct manifest items. Returns the surviving id → href
/// map and whether anything changed.
fn normalize_manifest(
    manifest: &mut Element,
    resolver: &HrefResolver<'_>,
) -> (HashMap<String, Option<String>>, bool) {
    let mut changed = false;
    let mut by_id: HashMap<String, usize> = HashMap::new();
    let mut doomed: HashSet<usize> = HashSet::new();

    for i in 0..manifest.children.len() {
        let Node::Element(item) = &mut manifest.children[i] else {
            continue;
        };
        if !item.is("item") {
            continue;
        }
        let Some(id) = non_empty_attr(item, "id").map(Cow::into_owned) else {
            continue;
        };
        let href = non_empty_attr(item, "href").map(Cow::into_owned);
        if let Some(href) = href
            && let Some(fixed) = resolver.fix_case(&href)
        {
            log::debug!("manifest item {id}: href {href} -> {fixed}");
            item.set_attr("href", &fixed);
            changed = true;
        }
        let current_ok = non_empty_attr(item, "href").is_some_and(|h| resolver.exists(&h));

        let Some(&prev) = by_id.get(&id) else {
            by_id.insert(id, i);
            continue;
        };
        let prev_ok = match &manifest.children[prev] {
            Node::Element(e) => non_empty_attr(e, "href").is_some_and(|h| resolver.exists(&h)),
            Node::Raw(_) => false,
        };
        log::debug!("manifest item {id} is duplicated");
        if prev_ok && !current_ok {
            doomed.insert(i);
        } else {
            doomed.insert(prev);
            by_id.insert(id, i);
        }
        changed = true;
    }

    let mut kept: HashMap<String, Option<String>> = HashMap::new();
    for (id, i) in by_id {
        let href = match &manifest.children[i] {
            Node::Element(e) => non_empty_attr(e, "href").map(Cow::into_owned),
            Node::Raw(_) => None,
        };
        if let Some(h) = href.as_deref()
            && !resolver.exists(h)
            && resolver.is_content_path(h)
        {
            log::warn!("dropping manifest item {id}: {h} is not in the archive");
            doomed.insert(i);
            changed = true;
            continue;
        }
        kept.insert(id, href);
    }

    remove_children(manifest, &doomed);
    if reorder_keyed(&mut manifest.children, |n| page_key(n, "item", "id")) {
        changed = true;
    }
    (kept, changed)
}

/// Drop spine itemrefs with a missing, repeated or unknown idref. Returns
/// the idrefs kept.
fn normalize_spine(
    spine: &mut Element,
    manifest: &HashMap<String, Option<String>>,
) -> (HashSet<String>, bool) {
    let mut seen = HashSet::new();
    let mut doomed = HashSet::new();
    for (i, node) in spine.children.iter().enumerate() {
        let Node::Element(itemref) = node else { continue };
        if !itemref.is("itemref") {
            continue;
        }
        match non_empty_attr(itemref, "idref") {
            Some(idref) if manifest.contains_key(idref.as_ref()) && !seen.contains(idref.as_ref()) => {
                seen.insert(idref.into_owned());
            }
            idref => {
                log::debug!("dropping spine itemref {:?}", idref.as_deref());
                doomed.insert(i);
            }
        }
    }
    let changed = !doomed.is_empty();
    remove_children(spine, &doomed);
    (seen, changed)
}

/// Insert missing front matter ahead of the first page itemref.
fn prepend_front_matter(
    spine: &mut Element,
    manifest: &HashMap<String, Option<String>>,
    seen: &mut HashSet<String>,
    resolver: &HrefResolver<'_>,
) -> bool {
    let mut at = spine
        .children
        .iter()
        .position(|n| {
            matches!(n, Node::Element(e) if e.is("itemref")
                && e.attr("idref").is_some_and(|r| r.starts_with(PAGE_IDREF_PREFIX)))
        })
        .unwrap_or(spine.children.len());

    let mut changed = false;
    for id in FRONT_MATTER_IDS {
        if seen.contains(id) {
            continue;
        }
        let Some(Some(href)) = manifest.get(id) else {
            continue;
        };
        if !resolver.exists(href) {
            continue;
        }
        let itemref = Element::empty(sibling_name(&spine.name, "itemref")).with_attr("idref", id);
        spine.children.insert(at, Node::Element(itemref));
        at += 1;
        seen.insert(id.to_string());
        changed = true;
    }
    changed
}

/// Repair the package document inside `container`.
///
/// Returns whether the document changed. A container without a usable
/// package document is left alone.
pub fn repair(container: &mut PackageContainer) -> Result<bool> {
    let Some(mut opf) = OpfDocument::locate(container) else {
        log::warn!("no usable package document, nothing to repair");
        return Ok(false);
    };

    let changed = {
        let resolver = HrefResolver::new(parent_dir(&opf.path), container.names());
        let root = &mut opf.doc.root;

        let (Some(manifest_path), Some(spine_path)) = (
            root.find_path(|e| e.is("manifest")),
            root.find_path(|e| e.is("spine")),
        ) else {
            return Ok(false);
        };

        let (manifest, mut changed) = match root.at_path_mut(&manifest_path) {
            Some(element) => normalize_manifest(element, &resolver),
            None => return Ok(false),
        };
        let Some(spine) = root.at_path_mut(&spine_path) else {
            return Ok(false);
        };
        let (mut seen, spine_changed) = normalize_spine(spine, &manifest);
        changed |= spine_changed;
        changed |= prepend_front_matter(spine, &manifest, &mut seen, &resolver);
        changed |= reorder_keyed(&mut spine.children, |n| page_key(n, "itemref", "idref"));
        changed
    };

    opf.store(container, changed);
    log::debug!("{}: repaired={changed}", opf.path);
    Ok(changed)
}

/// Repair the package at `path` in place.
pub fn repair_in_place(path: impl AsRef<Path>) -> Result<bool> {
    rewrite_in_place(path.as_ref(), None, repair)
}
