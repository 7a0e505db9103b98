//! Table of contents flattening.
//!
//! Some readers only cope with a single-level TOC. The NCX `navMap` is
//! linearized in pre-order and renumbered, and the navigation document's
//! nested lists are lifted into their parent list.

use std::path::Path;

use super::archive::{PackageContainer, rewrite_in_place};
use super::tree::{Document, Element, Node};
use crate::error::Result;

const NCX_SUFFIX: &str = "toc.ncx";
const NAV_SUFFIX: &str = "nav.xhtml";

fn is_blank(node: &Node) -> bool {
    matches!(node, Node::Raw(raw) if raw.trim().is_empty())
}

/// True if no `navPoint` nests another and the ids and play order are
/// already sequential.
fn ncx_is_flat(nav_map: &Element) -> bool {
    nav_map
        .elements()
        .filter(|e| e.is("navPoint"))
        .enumerate()
        .all(|(i, point)| {
            let n = (i + 1).to_string();
            point.child("navPoint").is_none()
                && point.attr("id").as_deref() == Some(format!("num_{n}").as_str())
                && point.attr("playOrder").as_deref() == Some(n.as_str())
        })
}

/// Replace the children of `nav_map` with its navPoints in pre-order,
/// renumbered from 1. Other children of the map are kept in front.
fn linearize(nav_map: &mut Element) {
    let mut kept = Vec::new();
    let mut top = Vec::new();
    for node in std::mem::take(&mut nav_map.children) {
        match node {
            Node::Element(e) if e.is("navPoint") => top.push(e),
            node if is_blank(&node) => {}
            node => kept.push(node),
        }
    }

    let mut stack: Vec<Element> = top.into_iter().rev().collect();
    let mut points = Vec::new();
    while let Some(point) = stack.pop() {
        let mut nested = Vec::new();
        let mut children = Vec::new();
        for node in point.children {
            match node {
                Node::Element(e) if e.is("navPoint") => nested.push(e),
                node if is_blank(&node) => {}
                node => children.push(node),
            }
        }
        let n = points.len() + 1;
        points.push(Node::Element(Element {
            name: point.name,
            attrs: vec![
                ("id".to_string(), format!("num_{n}")),
                ("playOrder".to_string(), n.to_string()),
            ],
            children,
            self_closing: false,
        }));
        stack.extend(nested.into_iter().rev());
    }

    kept.extend(points);
    nav_map.children = kept;
}

/// Flatten an NCX document. Returns `None` if it is already flat or has no
/// `navMap`.
pub fn flatten_ncx(data: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut doc = Document::parse(data)?;
    let Some(path) = doc.root.find_path(|e| e.is("navMap")) else {
        return Ok(None);
    };
    let Some(nav_map) = doc.root.at_path_mut(&path) else {
        return Ok(None);
    };
    if ncx_is_flat(nav_map) {
        return Ok(None);
    }
    linearize(nav_map);
    Ok(Some(doc.to_bytes()))
}

fn is_toc_nav(nav: &Element) -> bool {
    nav.attr("role").as_deref() == Some("doc-toc")
        || nav.attr("id").as_deref() == Some("toc")
        || nav.attr("epub:type").as_deref() == Some("toc")
        || nav
            .attr("class")
            .is_some_and(|c| c.split_whitespace().any(|t| t == "toc"))
}

fn has_nested_list(li: &Element) -> bool {
    li.is("li") && li.child("ol").is_some()
}

/// Detach the first nested `ol` of `li` and return its `li` children.
fn take_nested_items(li: &mut Element) -> Option<Vec<Node>> {
    let pos = li
        .children
        .iter()
        .position(|n| matches!(n, Node::Element(e) if e.is("ol")))?;
    match li.children.remove(pos) {
        Node::Element(ol) => Some(
            ol.children
                .into_iter()
                .filter(|n| matches!(n, Node::Element(e) if e.is("li")))
                .collect(),
        ),
        Node::Raw(_) => None,
    }
}

/// Flatten the TOC list of a navigation document. Returns `None` if there
/// is nothing to lift.
pub fn flatten_nav(data: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut doc = Document::parse(data)?;
    let root = &mut doc.root;
    let Some(nav_path) = root
        .find_path(|e| e.is("nav") && is_toc_nav(e))
        .or_else(|| root.find_path(|e| e.is("nav")))
    else {
        return Ok(None);
    };
    let Some(ol_rel) = root.at_path(&nav_path).and_then(|nav| nav.find_path(|e| e.is("ol"))) else {
        return Ok(None);
    };
    let ol_path: Vec<usize> = nav_path.iter().chain(&ol_rel).copied().collect();

    let mut changed = false;
    loop {
        // The last such item in document order holds no further nesting.
        let Some(li_rel) = root
            .at_path(&ol_path)
            .and_then(|ol| ol.find_paths(has_nested_list).pop())
        else {
            break;
        };
        let Some((&li_index, parent_rel)) = li_rel.split_last() else {
            break;
        };
        let parent_path: Vec<usize> = ol_path.iter().chain(parent_rel).copied().collect();
        let Some(parent) = root.at_path_mut(&parent_path) else {
            break;
        };
        let lifted = match parent.children.get_mut(li_index) {
            Some(Node::Element(li)) => take_nested_items(li),
            _ => None,
        };
        let Some(lifted) = lifted else {
            break;
        };
        let at = li_index + 1;
        parent.children.splice(at..at, lifted);
        changed = true;
    }

    Ok(changed.then(|| doc.to_bytes()))
}

/// Flatten the NCX and navigation document found in `container`.
///
/// Documents that fail to parse are left as they are.
pub fn flatten(container: &mut PackageContainer) -> Result<bool> {
    let names = container.unique_names();
    let ncx = names.iter().find(|n| n.ends_with(NCX_SUFFIX)).map(|n| n.to_string());
    let nav = names.iter().find(|n| n.ends_with(NAV_SUFFIX)).map(|n| n.to_string());
    if ncx.is_none() && nav.is_none() {
        log::debug!("no navigation documents to flatten");
        return Ok(false);
    }

    let mut changed = false;
    let jobs: [(Option<String>, fn(&[u8]) -> Result<Option<Vec<u8>>>); 2] =
        [(ncx, flatten_ncx), (nav, flatten_nav)];
    for (name, flatten_one) in jobs {
        let Some(name) = name else { continue };
        let Some(entry) = container.get(&name) else {
            continue;
        };
        match flatten_one(&entry.data) {
            Ok(Some(bytes)) => {
                log::debug!("{name}: flattened");
                container.put(&name, bytes);
                changed = true;
            }
            Ok(None) => log::debug!("{name}: already flat"),
            Err(err) => log::warn!("{name}: left unchanged: {err}"),
        }
    }
    Ok(changed)
}

/// Flatten the TOC of the package at `path` in place.
pub fn flatten_toc_in_place(path: impl AsRef<Path>) -> Result<bool> {
    rewrite_in_place(path.as_ref(), None, flatten)
}
