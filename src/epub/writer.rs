use std::collections::HashMap;
use std::path::Path;

use zip::CompressionMethod;

use super::archive::{EPUB_MEDIA_TYPE, Entry, MIMETYPE, PackageContainer, write_atomically};
use crate::book::{EpubBook, Page, TocNode};
use crate::error::Result;
use crate::util::{close_void_tags, escape_xml, utc_timestamp, uuid_v4};

/// Stylesheet shared by every generated document.
pub const BASE_CSS: &str = "*{direction: rtl}\nbody{line-height:1.7;margin:1.5rem;color:#1f1f1f}\n.text-center,h1,h2,h3{text-align:center}";

/// Identifier written to `dc:identifier`.
pub const BOOK_IDENTIFIER: &str = "urn:shamela_bok:0";

const CARD_LABEL: &str = "بطاقة الكتاب";
const INDEX_LABEL: &str = "فهرس الموضوعات";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml" />
  </rootfiles>
</container>
"#;

/// Write an [`EpubBook`] to disk.
///
/// The archive is assembled in memory and moved into place atomically, so a
/// failed write never leaves a partial file at `path`.
pub fn write_epub(
    book: &EpubBook,
    path: &Path,
    include_toc_page: bool,
    compression_level: Option<i64>,
) -> Result<()> {
    let container = build_container(book, include_toc_page);
    write_atomically(path, &container.to_bytes(compression_level)?)
}

/// File name (under `OEBPS/text/`) for each page, in `page_number` order.
fn page_files(pages: &[&Page]) -> Vec<(usize, String)> {
    let width = pages
        .last()
        .map_or(2, |p| p.page_number.to_string().len() + 1);
    pages
        .iter()
        .map(|p| {
            let prefix = match p.part {
                Some(part) => format!("page_{part}_"),
                None => "page_".to_string(),
            };
            (
                p.page_number,
                format!("{prefix}{:0width$}.xhtml", p.page_number),
            )
        })
        .collect()
}

/// Assemble every package entry in its final order.
pub fn build_container(book: &EpubBook, include_toc_page: bool) -> PackageContainer {
    let pages = book.sorted_pages();
    let files = page_files(&pages);
    let hrefs: HashMap<usize, String> = files
        .iter()
        .map(|(n, f)| (*n, format!("text/{f}")))
        .collect();
    let href_of =
        |page_number: usize| -> String { hrefs.get(&page_number).cloned().unwrap_or_default() };

    let mut container = PackageContainer::new();
    container.push(Entry::new(MIMETYPE, EPUB_MEDIA_TYPE, CompressionMethod::Stored));

    let deflated = |name: &str, data: String| Entry::new(name, data, CompressionMethod::Deflated);
    container.push(deflated("META-INF/container.xml", CONTAINER_XML.to_string()));
    container.push(deflated("OEBPS/styles.css", BASE_CSS.to_string()));
    for (page, (_, file)) in pages.iter().zip(&files) {
        container.push(deflated(
            &format!("OEBPS/text/{file}"),
            render_page(&book.title, &page.body),
        ));
    }
    container.push(deflated("OEBPS/info.xhtml", render_info(&book.about_html)));
    container.push(deflated("OEBPS/nav.xhtml", render_nav(&book.title, &book.toc, &href_of)));
    container.push(deflated(
        "OEBPS/toc.ncx",
        render_ncx(&book.title, &book.toc, &href_of, &uuid_v4()),
    ));
    container.push(deflated(
        "OEBPS/content.opf",
        render_opf(book, &files, include_toc_page, &utc_timestamp()),
    ));

    log::debug!("assembled {} entries for {} pages", container.len(), pages.len());
    container
}

fn render_page(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" lang="ar" dir="rtl">
  <head>
    <meta charset="utf-8" />
    <title>{}</title>
    <link rel="stylesheet" href="../styles.css" />
  </head>
  <body>
    {}
  </body>
</html>
"#,
        escape_xml(title),
        body
    )
}

fn render_info(about_html: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" lang="ar" dir="rtl">
  <head>
    <meta charset="utf-8" />
    <title>{CARD_LABEL}</title>
    <link rel="stylesheet" href="styles.css" />
  </head>
  <body>
    {}
  </body>
</html>
"#,
        close_void_tags(about_html)
    )
}

fn entry_href(node: &TocNode, href_of: &dyn Fn(usize) -> String) -> String {
    let mut href = href_of(node.target_page);
    if let Some(anchor) = &node.anchor {
        href.push('#');
        href.push_str(anchor);
    }
    escape_xml(&href)
}

/// Nested `<ol>` list for the navigation document, built without recursion.
fn render_nav_list(toc: &[TocNode], href_of: &dyn Fn(usize) -> String) -> String {
    enum Step<'a> {
        Item(&'a TocNode),
        Close(&'static str),
    }

    let mut out = String::from("<ol>");
    out.push_str(&format!("<li><a href=\"info.xhtml\">{CARD_LABEL}</a></li>"));
    out.push_str(&format!("<li><a href=\"nav.xhtml\">{INDEX_LABEL}</a></li>"));

    let mut stack: Vec<Step<'_>> = toc.iter().rev().map(Step::Item).collect();
    while let Some(step) = stack.pop() {
        match step {
            Step::Item(node) => {
                out.push_str(&format!(
                    "<li><a href=\"{}\">{}</a>",
                    entry_href(node, href_of),
                    escape_xml(&node.text)
                ));
                stack.push(Step::Close("</li>"));
                if !node.children.is_empty() {
                    out.push_str("<ol>");
                    stack.push(Step::Close("</ol>"));
                    stack.extend(node.children.iter().rev().map(Step::Item));
                }
            }
            Step::Close(tag) => out.push_str(tag),
        }
    }
    out.push_str("</ol>");
    out
}

fn render_nav(title: &str, toc: &[TocNode], href_of: &dyn Fn(usize) -> String) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" lang="ar" dir="rtl">
  <head>
    <meta charset="utf-8" />
    <title>{}</title>
    <link rel="stylesheet" href="styles.css" />
  </head>
  <body>
    <nav epub:type="toc" id="toc">
      <h1>{INDEX_LABEL}</h1>
      {}
    </nav>
  </body>
</html>
"#,
        escape_xml(title),
        render_nav_list(toc, href_of)
    )
}

fn toc_depth(toc: &[TocNode]) -> usize {
    let mut depth = 0;
    let mut stack: Vec<(&TocNode, usize)> = toc.iter().map(|n| (n, 1)).collect();
    while let Some((node, d)) = stack.pop() {
        depth = depth.max(d);
        stack.extend(node.children.iter().map(|c| (c, d + 1)));
    }
    depth.max(1)
}

/// `playOrder` of the first generated `navPoint`, after the card and index.
const FIRST_PLAY_ORDER: usize = 3;

/// `navPoint` tree for the NCX, numbered in pre-order.
fn render_nav_points(toc: &[TocNode], href_of: &dyn Fn(usize) -> String) -> String {
    enum Step<'a> {
        Point(&'a TocNode),
        Close,
    }

    let mut out = String::new();
    let mut index = 0;
    let mut stack: Vec<Step<'_>> = toc.iter().rev().map(Step::Point).collect();
    while let Some(step) = stack.pop() {
        match step {
            Step::Point(node) => {
                out.push_str(&format!(
                    "<navPoint id=\"nav_{index}\" playOrder=\"{}\"><navLabel><text>{}</text></navLabel><content src=\"{}\"/>",
                    index + FIRST_PLAY_ORDER,
                    escape_xml(&node.text),
                    entry_href(node, href_of)
                ));
                index += 1;
                stack.push(Step::Close);
                stack.extend(node.children.iter().rev().map(Step::Point));
            }
            Step::Close => out.push_str("</navPoint>"),
        }
    }
    out
}

fn render_ncx(title: &str, toc: &[TocNode], href_of: &dyn Fn(usize) -> String, uid: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta content="{}" name="dtb:uid"/>
    <meta content="{}" name="dtb:depth"/>
    <meta content="0" name="dtb:totalPageCount"/>
    <meta content="0" name="dtb:maxPageNumber"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
    <navPoint id="info" playOrder="1">
      <navLabel><text>{CARD_LABEL}</text></navLabel>
      <content src="info.xhtml"/>
    </navPoint>
    <navPoint id="nav" playOrder="2">
      <navLabel><text>{INDEX_LABEL}</text></navLabel>
      <content src="nav.xhtml"/>
    </navPoint>
    {}
  </navMap>
</ncx>
"#,
        escape_xml(uid),
        toc_depth(toc),
        escape_xml(title),
        render_nav_points(toc, href_of)
    )
}

fn render_opf(
    book: &EpubBook,
    files: &[(usize, String)],
    include_toc_page: bool,
    modified: &str,
) -> String {
    let creator = if book.author.is_empty() {
        String::new()
    } else {
        format!("<dc:creator>{}</dc:creator>", escape_xml(&book.author))
    };
    let manifest: String = files
        .iter()
        .map(|(n, file)| {
            format!(
                "<item id=\"p{n}\" href=\"text/{}\" media-type=\"application/xhtml+xml\" />",
                escape_xml(file)
            )
        })
        .collect();
    let spine: String = files
        .iter()
        .map(|(n, _)| format!("<itemref idref=\"p{n}\" />"))
        .collect();
    let nav_ref = if include_toc_page {
        "<itemref idref=\"nav\" />"
    } else {
        ""
    };

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="bookid" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="bookid">{BOOK_IDENTIFIER}</dc:identifier>
    <dc:title>{}</dc:title>
    {creator}
    <dc:publisher>Shamela (.bok)</dc:publisher>
    <dc:language>ar</dc:language>
    <meta property="dcterms:modified">{}</meta>
  </metadata>
  <manifest>
    <item id="info" href="info.xhtml" media-type="application/xhtml+xml" />
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav" />
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml" />
    <item id="css" href="styles.css" media-type="text/css" />
    {manifest}
  </manifest>
  <spine toc="ncx" page-progression-direction="rtl">
    {nav_ref}
    {spine}
  </spine>
</package>
"#,
        escape_xml(&book.title),
        escape_xml(modified)
    )
}
