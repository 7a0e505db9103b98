//! Minimal mutable XML tree for package documents.
//!
//! Elements keep their name and attributes; everything else (text, comments,
//! declarations, entity references) is kept as the exact source slice. Raw
//! attribute values stay escaped, so writing an untouched tree reproduces its
//! markup, and parse → write is a fixed point.

use std::borrow::Cow;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::escape::{escape, unescape};

use crate::error::{Error, Result};
use crate::util::decode_xml;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    /// Verbatim markup: text, comments, PIs, CDATA, references.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Qualified name as written (`dc:title`).
    pub name: String,
    /// Attribute name → escaped value, in source order.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Written as `<x/>` while it has no children.
    pub self_closing: bool,
}

/// A parsed document: one root element plus whatever surrounds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub prolog: Vec<Node>,
    pub root: Element,
    pub epilog: Vec<Node>,
}

/// Local part of a qualified name.
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn malformed(pos: u64, what: impl std::fmt::Display) -> Error {
    Error::MalformedDocument(format!("{what} at byte {pos}"))
}

fn element_from(start: &BytesStart<'_>, pos: u64) -> Result<Element> {
    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| malformed(pos, e))?
        .to_string();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| malformed(pos, e))?;
        let key = std::str::from_utf8(attr.key.as_ref()).map_err(|e| malformed(pos, e))?;
        let value = std::str::from_utf8(&attr.value).map_err(|e| malformed(pos, e))?;
        attrs.push((key.to_string(), value.to_string()));
    }
    Ok(Element {
        name,
        attrs,
        children: Vec::new(),
        self_closing: false,
    })
}

impl Document {
    /// Parse document bytes; any syntax error or unbalanced tag is reported
    /// as [`Error::MalformedDocument`].
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = decode_xml(bytes);
        Self::parse_str(&text)
    }

    pub fn parse_str(src: &str) -> Result<Self> {
        let mut reader = Reader::from_str(src);
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root: Option<Element> = None;
        let mut open: Vec<Element> = Vec::new();

        loop {
            let start = reader.buffer_position();
            let event = reader.read_event().map_err(|e| malformed(start, e))?;
            let end = reader.buffer_position();

            let finished = match event {
                Event::Start(e) => {
                    if root.is_some() && open.is_empty() {
                        return Err(malformed(start, "second root element"));
                    }
                    open.push(element_from(&e, start)?);
                    None
                }
                Event::Empty(e) => {
                    let mut element = element_from(&e, start)?;
                    element.self_closing = true;
                    Some(element)
                }
                Event::End(_) => match open.pop() {
                    Some(element) => Some(element),
                    None => return Err(malformed(start, "unexpected end tag")),
                },
                Event::Eof => break,
                _ => {
                    let raw = src
                        .get(start as usize..end as usize)
                        .ok_or_else(|| malformed(start, "bad event bounds"))?;
                    let node = Node::Raw(raw.to_string());
                    match open.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None if root.is_none() => prolog.push(node),
                        None => epilog.push(node),
                    }
                    None
                }
            };

            if let Some(element) = finished {
                match open.last_mut() {
                    Some(parent) => parent.children.push(Node::Element(element)),
                    None if root.is_none() => root = Some(element),
                    None => return Err(malformed(start, "second root element")),
                }
            }
        }

        if !open.is_empty() {
            return Err(malformed(reader.buffer_position(), "unclosed element"));
        }
        let root = root.ok_or_else(|| malformed(0, "no root element"))?;
        Ok(Self {
            prolog,
            root,
            epilog,
        })
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        for node in &self.prolog {
            write_node(&mut out, node);
        }
        write_element(&mut out, &self.root);
        for node in &self.epilog {
            write_node(&mut out, node);
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_xml().into_bytes()
    }
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Element(e) => write_element(out, e),
        Node::Raw(raw) => out.push_str(raw),
    }
}

fn write_start_tag(out: &mut String, element: &Element) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&value.replace('"', "&quot;"));
        out.push('"');
    }
}

/// Serialize an element without recursion.
fn write_element(out: &mut String, root: &Element) {
    enum Step<'a> {
        Open(&'a Element),
        Raw(&'a str),
        Close(&'a str),
    }

    let mut stack = vec![Step::Open(root)];
    while let Some(step) = stack.pop() {
        match step {
            Step::Open(element) => {
                write_start_tag(out, element);
                if element.children.is_empty() && element.self_closing {
                    out.push_str("/>");
                    continue;
                }
                out.push('>');
                stack.push(Step::Close(&element.name));
                for child in element.children.iter().rev() {
                    stack.push(match child {
                        Node::Element(e) => Step::Open(e),
                        Node::Raw(raw) => Step::Raw(raw),
                    });
                }
            }
            Step::Raw(raw) => out.push_str(raw),
            Step::Close(name) => {
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
        }
    }
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Empty element written as `<x/>`.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            self_closing: true,
            ..Self::new(name)
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn is(&self, local: &str) -> bool {
        self.local_name() == local
    }

    /// Unescaped attribute value, matched by exact name.
    pub fn attr(&self, key: &str) -> Option<Cow<'_, str>> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| unescape(v).unwrap_or(Cow::Borrowed(v.as_str())))
    }

    /// Unescaped attribute value, matched by local name.
    pub fn attr_local(&self, key: &str) -> Option<Cow<'_, str>> {
        self.attrs
            .iter()
            .find(|(k, _)| local_name(k) == key)
            .map(|(_, v)| unescape(v).unwrap_or(Cow::Borrowed(v.as_str())))
    }

    pub fn set_attr(&mut self, key: &str, value: &str) {
        let escaped = escape(value).into_owned();
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = escaped,
            None => self.attrs.push((key.to_string(), escaped)),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Raw(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Raw(_) => None,
        })
    }

    /// First direct child with the local name.
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.is(local))
    }

    /// Child-index path to the first descendant (pre-order, self excluded)
    /// matching `pred`.
    pub fn find_path(&self, pred: impl Fn(&Element) -> bool) -> Option<Vec<usize>> {
        let mut stack: Vec<(&Element, Vec<usize>)> = vec![(self, Vec::new())];
        while let Some((element, path)) = stack.pop() {
            if !path.is_empty() && pred(element) {
                return Some(path);
            }
            for (i, child) in element.children.iter().enumerate().rev() {
                if let Node::Element(e) = child {
                    let mut child_path = path.clone();
                    child_path.push(i);
                    stack.push((e, child_path));
                }
            }
        }
        None
    }

    /// Paths to every descendant matching `pred`, in document order.
    pub fn find_paths(&self, pred: impl Fn(&Element) -> bool) -> Vec<Vec<usize>> {
        let mut found = Vec::new();
        let mut stack: Vec<(&Element, Vec<usize>)> = vec![(self, Vec::new())];
        while let Some((element, path)) = stack.pop() {
            if !path.is_empty() && pred(element) {
                found.push(path.clone());
            }
            for (i, child) in element.children.iter().enumerate().rev() {
                if let Node::Element(e) = child {
                    let mut child_path = path.clone();
                    child_path.push(i);
                    stack.push((e, child_path));
                }
            }
        }
        found
    }

    /// First descendant (pre-order) matching `pred`.
    pub fn find(&self, pred: impl Fn(&Element) -> bool) -> Option<&Element> {
        let path = self.find_path(pred)?;
        self.at_path(&path)
    }

    pub fn at_path(&self, path: &[usize]) -> Option<&Element> {
        let mut current = self;
        for &i in path {
            current = match current.children.get(i)? {
                Node::Element(e) => e,
                Node::Raw(_) => return None,
            };
        }
        Some(current)
    }

    pub fn at_path_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut current = self;
        for &i in path {
            current = match current.children.get_mut(i)? {
                Node::Element(e) => e,
                Node::Raw(_) => return None,
            };
        }
        Some(current)
    }

    /// Unescaped text of all descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<&Node> = self.children.iter().rev().collect();
        while let Some(node) = stack.pop() {
            match node {
                Node::Element(e) => stack.extend(e.children.iter().rev()),
                Node::Raw(raw) => {
                    if let Some(cdata) = raw
                        .strip_prefix("<![CDATA[")
                        .and_then(|r| r.strip_suffix("]]>"))
                    {
                        out.push_str(cdata);
                    } else if !raw.starts_with('<') {
                        out.push_str(&unescape(raw).unwrap_or(Cow::Borrowed(raw.as_str())));
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- generated -->
<package xmlns="http://www.idpf.org/2007/opf" version='3.0'>
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>A &amp; B</dc:title></metadata>
  <manifest>
    <item id="a" href="text/a.xhtml" media-type="application/xhtml+xml" />
  </manifest>
  <spine><itemref idref="a"/></spine>
</package>
"#;

    #[test]
    fn test_round_trip_is_fixed_point() {
        let doc = Document::parse_str(OPF).unwrap();
        let once = doc.to_xml();
        let twice = Document::parse_str(&once).unwrap().to_xml();
        assert_eq!(once, twice);
        assert!(once.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!-- generated -->"));
        assert!(once.contains("<dc:title>A &amp; B</dc:title>"));
    }

    #[test]
    fn test_attr_escaping() {
        let mut doc = Document::parse_str(OPF).unwrap();
        let path = doc.root.find_path(|e| e.is("item")).unwrap();
        let item = doc.root.at_path_mut(&path).unwrap();
        assert_eq!(item.attr("href").as_deref(), Some("text/a.xhtml"));
        item.set_attr("href", "a&b.xhtml");
        assert!(doc.to_xml().contains(r#"href="a&amp;b.xhtml""#));
        let reparsed = Document::parse_str(&doc.to_xml()).unwrap();
        let item = reparsed.root.find(|e| e.is("item")).unwrap();
        assert_eq!(item.attr("href").as_deref(), Some("a&b.xhtml"));
    }

    #[test]
    fn test_text_and_local_names() {
        let doc = Document::parse_str(OPF).unwrap();
        let title = doc.root.find(|e| e.is("title")).unwrap();
        assert_eq!(title.name, "dc:title");
        assert_eq!(title.text(), "A & B");
        assert_eq!(doc.root.attr("version").as_deref(), Some("3.0"));
    }

    #[test]
    fn test_malformed_inputs() {
        for bad in [
            "<a><b></a>",
            "<a>",
            "",
            "just text",
            "<a/><b/>",
            "<a><!-- open",
            "<a b=\"1></a>",
        ] {
            let err = Document::parse_str(bad).unwrap_err();
            assert_eq!(err.kind(), "malformed-document", "{bad:?}");
        }
    }

    #[test]
    fn test_self_closing_gains_children() {
        let mut doc = Document::parse_str("<spine/>").unwrap();
        doc.root.children.push(Node::Element(Element::empty("itemref").with_attr("idref", "x")));
        assert_eq!(doc.to_xml(), r#"<spine><itemref idref="x"/></spine>"#);
    }

    #[test]
    fn test_find_is_preorder() {
        let doc = Document::parse_str("<r><a><ol id='1'><ol id='2'/></ol></a><ol id='3'/></r>").unwrap();
        let first = doc.root.find(|e| e.is("ol")).unwrap();
        assert_eq!(first.attr("id").as_deref(), Some("1"));
        let all = doc.root.find_paths(|e| e.is("ol"));
        assert_eq!(all, vec![vec![0, 0], vec![0, 0, 0], vec![1]]);
    }
}
