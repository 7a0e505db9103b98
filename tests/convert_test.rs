//! End-to-end synthesis of packages from in-memory legacy sources.

mod common;

use bokpub::epub::tree::Document;
use bokpub::{BuildOptions, CellValue, MemorySource, Table, build_package, repair_in_place, synthesize};
use common::{entry, read_zip};
use proptest::prelude::*;
use tempfile::TempDir;
use zip::CompressionMethod;

fn three_row_source() -> MemorySource {
    MemorySource::new()
        .with_table(
            "Main",
            Table::from_rows(
                ["bkname", "auth", "betaka"],
                vec![vec!["تفسير مختصر".into(), "المؤلف".into(), "بطاقة الكتاب".into()]],
            ),
        )
        .with_table(
            "b12",
            Table::from_rows(
                ["id", "nass", "page", "part"],
                vec![
                    vec![1.into(), "سورة الفاتحة\nالحمد لله رب العالمين".into(), 1.into(), 1.into()],
                    vec![2.into(), "نص الصفحة الثانية".into(), 2.into(), 1.into()],
                    vec![3.into(), "سورة البقرة\nالم".into(), 3.into(), 1.into()],
                ],
            ),
        )
        .with_table(
            "t12",
            Table::from_rows(
                ["id", "tit", "lvl"],
                vec![
                    vec![1.into(), "سورة الفاتحة".into(), 1.into()],
                    vec![3.into(), "سورة البقرة".into(), 1.into()],
                ],
            ),
        )
}

#[test]
fn test_three_rows_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.epub");
    let options = BuildOptions::new().with_force_rtl(true);
    let book = build_package(&three_row_source(), "tafsir.bok", &path, &options).unwrap();
    assert_eq!(book.pages.len(), 3);
    assert_eq!(book.toc.len(), 2);

    let entries = read_zip(&path);
    assert_eq!(entries[0].0, "mimetype");
    assert_eq!(entries[0].1, b"application/epub+zip");
    assert_eq!(entries[0].2, CompressionMethod::Stored);

    let documents = entries.iter().filter(|e| e.0.ends_with(".xhtml")).count();
    assert!(documents >= 4, "expected pages, info and nav, got {documents}");

    let opf = Document::parse(entry(&entries, "OEBPS/content.opf")).unwrap();
    let spine = opf.root.find(|e| e.is("spine")).unwrap();
    assert_eq!(spine.attr("page-progression-direction").as_deref(), Some("rtl"));
    assert_eq!(spine.elements().filter(|e| e.is("itemref")).count(), 3);
    let title = opf.root.find(|e| e.is("title")).unwrap();
    assert_eq!(title.text(), "تفسير مختصر");

    let ncx = Document::parse(entry(&entries, "OEBPS/toc.ncx")).unwrap();
    let labels: Vec<String> = ncx
        .root
        .find_paths(|e| e.is("navLabel"))
        .iter()
        .filter_map(|p| ncx.root.at_path(p).map(|e| e.text()))
        .collect();
    assert_eq!(labels, ["بطاقة الكتاب", "فهرس الموضوعات", "سورة الفاتحة", "سورة البقرة"]);

    let nav = String::from_utf8(entry(&entries, "OEBPS/nav.xhtml").to_vec()).unwrap();
    assert!(nav.contains("#toc_3"));

    let css = entry(&entries, "OEBPS/styles.css");
    assert!(css.starts_with(b"* {direction: rtl !important;}\n"));

    let info = String::from_utf8(entry(&entries, "OEBPS/info.xhtml").to_vec()).unwrap();
    assert!(info.contains("المؤلف: المؤلف"));
}

#[test]
fn test_numbered_row_anchors_its_heading_chunk() {
    let intro = "الحمد لله ".repeat(5);
    let numbered = format!("1 - {} 2 - {}", "ا".repeat(136), "ب".repeat(136));
    let long = format!("مقدمة\nسورة الفاتحة\n{numbered}");
    let short = "خاتمة قصير";
    assert_eq!(intro.chars().count(), 50);
    assert_eq!(long.chars().count(), 300);
    assert_eq!(short.chars().count(), 10);

    let source = MemorySource::new()
        .with_table(
            "b1",
            Table::from_rows(
                ["id", "nass"],
                vec![
                    vec![1.into(), intro.as_str().into()],
                    vec![2.into(), long.as_str().into()],
                    vec![3.into(), short.into()],
                ],
            ),
        )
        .with_table(
            "t1",
            Table::from_rows(
                ["id", "tit", "lvl"],
                vec![
                    vec![1.into(), "المقدمة".into(), 1.into()],
                    vec![2.into(), "سورة الفاتحة".into(), 1.into()],
                ],
            ),
        );

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.epub");
    let options = BuildOptions::new().with_split_numbered(true).with_force_rtl(true);
    let book = build_package(&source, "x.bok", &path, &options).unwrap();
    // Row 2 opens with an untitled paragraph, then the heading, then one page per item.
    assert_eq!(book.pages.len(), 6);
    assert_eq!(book.toc.len(), 2);

    let entries = read_zip(&path);
    let pages = entries.iter().filter(|e| e.0.starts_with("OEBPS/text/")).count();
    assert_eq!(pages, 6);

    let opf = Document::parse(entry(&entries, "OEBPS/content.opf")).unwrap();
    let spine = opf.root.find(|e| e.is("spine")).unwrap();
    assert_eq!(spine.attr("page-progression-direction").as_deref(), Some("rtl"));

    let nav = String::from_utf8(entry(&entries, "OEBPS/nav.xhtml").to_vec()).unwrap();
    assert!(nav.contains("text/page_01.xhtml#toc_1"), "{nav}");
    assert!(nav.contains("text/page_03.xhtml#toc_2"), "{nav}");

    let page = |n: &str| {
        String::from_utf8(entry(&entries, &format!("OEBPS/text/page_{n}.xhtml")).to_vec()).unwrap()
    };
    assert!(page("03").contains("id=\"toc_2\""));
    assert!(!page("02").contains("toc_2"));
}

#[test]
fn test_generated_package_needs_no_repair() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.epub");
    build_package(&three_row_source(), "tafsir.bok", &path, &BuildOptions::new()).unwrap();
    let before = std::fs::read(&path).unwrap();
    assert!(!repair_in_place(&path).unwrap());
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn test_failed_build_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("book.epub");
    let source = MemorySource::new().with_table("t1", Table::new(["id", "tit"]));
    let err = build_package(&source, "x.bok", &path, &BuildOptions::new()).unwrap_err();
    assert_eq!(err.kind(), "source-structure");
    assert!(!path.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_split_numbered_makes_more_pages() {
    let text = "مقدمة\nسورة الفاتحة\nنص\nسورة البقرة\nنص";
    let source = MemorySource::new().with_table(
        "b1",
        Table::from_rows(["id", "nass"], vec![vec![1.into(), text.into()]]),
    );
    let plain = synthesize(&source, "x.bok", &BuildOptions::new()).unwrap();
    let split = synthesize(&source, "x.bok", &BuildOptions::new().with_split_numbered(true)).unwrap();
    assert_eq!(plain.pages.len(), 1);
    assert_eq!(split.pages.len(), 3);
    // Headings become the automatic TOC.
    let toc: Vec<_> = split.toc.iter().map(|n| (n.text.as_str(), n.target_page)).collect();
    assert_eq!(toc, [("سورة الفاتحة", 2), ("سورة البقرة", 3)]);
}

proptest! {
    #[test]
    fn prop_page_numbers_are_contiguous(
        rows in prop::collection::vec(prop::option::of("[a-z ]{0,12}"), 0..30)
    ) {
        let table = Table::from_rows(
            ["id", "nass"],
            rows.iter()
                .enumerate()
                .map(|(i, text)| {
                    let cell = text.clone().map(CellValue::from).unwrap_or(CellValue::Null);
                    vec![CellValue::Int(i as i64 + 1), cell]
                })
                .collect::<Vec<_>>(),
        );
        let source = MemorySource::new().with_table("b1", table);
        let book = synthesize(&source, "x.bok", &BuildOptions::new()).unwrap();
        let numbers: Vec<usize> = book.pages.iter().map(|p| p.page_number).collect();
        let expected: Vec<usize> = (1..=book.pages.len()).collect();
        prop_assert_eq!(numbers, expected);
        let non_blank = rows.iter().flatten().filter(|t| !t.trim().is_empty()).count();
        prop_assert_eq!(book.pages.len(), non_blank);
    }
}
