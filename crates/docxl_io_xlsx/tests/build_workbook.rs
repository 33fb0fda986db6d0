use std::io::{Cursor, Read};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use calamine::{Data, Reader, Xlsx, open_workbook_from_rs};
use docxl_io_xlsx::{XlsxBuildError, XlsxDocumentWriter, build_workbook_base64, parse_document};
use pretty_assertions::assert_eq;
use quick_xml::events::Event;
use serde_json::{Value, json};

fn build_bytes(document: &Value) -> Vec<u8> {
    let encoded = build_workbook_base64(&document.to_string()).unwrap();
    BASE64_ENGINE.decode(encoded).unwrap()
}

fn open_xlsx(bytes: &[u8]) -> Xlsx<Cursor<Vec<u8>>> {
    open_workbook_from_rs(Cursor::new(bytes.to_vec())).unwrap()
}

fn read_part(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut text = String::new();
    file.read_to_string(&mut text).unwrap();
    text
}

fn has_part(bytes: &[u8], name: &str) -> bool {
    let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    archive.file_names().any(|val| val == name)
}

/// `(attribute, value)` pairs of every element named `tag` in `xml`.
fn read_elements(xml: &str, tag: &[u8]) -> Vec<Vec<(String, String)>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut l_elements = Vec::new();
    loop {
        match reader.read_event().unwrap() {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == tag => {
                let l_attrs = e
                    .attributes()
                    .map(|attr| {
                        let attr = attr.unwrap();
                        (
                            String::from_utf8(attr.key.as_ref().to_vec()).unwrap(),
                            attr.unescape_value().unwrap().into_owned(),
                        )
                    })
                    .collect();
                l_elements.push(l_attrs);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    l_elements
}

fn read_attr<'a>(element: &'a [(String, String)], key: &str) -> Option<&'a str> {
    element
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, val)| val.as_str())
}

fn read_cell_style(sheet_xml: &str, cell: &str) -> Option<String> {
    read_elements(sheet_xml, b"c")
        .into_iter()
        .find(|element| read_attr(element, "r") == Some(cell))
        .and_then(|element| read_attr(&element, "s").map(ToString::to_string))
}

#[test]
fn test_scenario_styled_formula_row() {
    let document = json!({
        "style": {
            "DEFAULT_STYLE": {"CustomNumFmt": ""},
            "style1": {
                "Font": {"Bold": true},
                "Border": {"left": {"Style": 1, "Color": "000000"}},
                "CustomNumFmt": "0.00",
            },
        },
        "content": {
            "Sheet1": {
                "Header": [["A", "B"]],
                "Data": [[["x", "style1"], ["=SUM(A1:A2)", "style1"]]],
            },
        },
    });
    let bytes = build_bytes(&document);

    let mut workbook = open_xlsx(&bytes);
    assert_eq!(workbook.sheet_names(), vec!["Sheet1".to_string()]);
    let range = workbook.worksheet_range("Sheet1").unwrap();
    assert_eq!(range.get_value((0, 0)), Some(&Data::String("A".to_string())));
    assert_eq!(range.get_value((1, 0)), Some(&Data::String("x".to_string())));
    let formulas = workbook.worksheet_formula("Sheet1").unwrap();
    assert_eq!(formulas.get_value((1, 1)).map(String::as_str), Some("SUM(A1:A2)"));

    let sheet_xml = read_part(&bytes, "xl/worksheets/sheet1.xml");
    let style_a2 = read_cell_style(&sheet_xml, "A2");
    assert!(style_a2.is_some());
    assert_eq!(style_a2, read_cell_style(&sheet_xml, "B2"));
    assert_ne!(style_a2, read_cell_style(&sheet_xml, "A1"));
}

#[test]
fn test_shared_style_index_across_cells() {
    let document = json!({
        "style": {"hl": {"Fill": {"Type": "pattern", "Color": ["FFFF00"], "Pattern": 1}, "CustomNumFmt": ""}},
        "content": {
            "S": {
                "Data": [
                    [["a", "hl"], ["b", "hl"]],
                    [["c", "hl"], 3],
                ],
            },
        },
    });
    let bytes = build_bytes(&document);
    let sheet_xml = read_part(&bytes, "xl/worksheets/sheet1.xml");
    let style_a1 = read_cell_style(&sheet_xml, "A1");
    assert!(style_a1.is_some());
    assert_eq!(style_a1, read_cell_style(&sheet_xml, "B1"));
    assert_eq!(style_a1, read_cell_style(&sheet_xml, "A2"));
    assert_ne!(style_a1, read_cell_style(&sheet_xml, "B2"));
}

#[test]
fn test_missing_sheet_fails_before_write() {
    let text = json!({
        "sheet_order": ["S1", "S2"],
        "content": {"S2": {"Data": [["x"]]}},
    })
    .to_string();
    let err = build_workbook_base64(&text).unwrap_err();
    assert!(matches!(err, XlsxBuildError::UnknownSheet(ref name) if name == "S1"));
    assert!(err.is_input_error());
}

#[test]
fn test_unknown_style_is_fatal() {
    let text = json!({"content": {"S": {"Data": [[["x", "nope"]]]}}}).to_string();
    let err = build_workbook_base64(&text).unwrap_err();
    assert!(matches!(err, XlsxBuildError::UnknownStyle(ref name) if name == "nope"));
}

#[test]
fn test_non_ascii_color_is_input_error() {
    let text = json!({
        "style": {"bad": {"Font": {"Color": "a\u{20ac}bcde"}, "CustomNumFmt": ""}},
        "content": {"S": {"Data": [[["x", "bad"]]]}},
    })
    .to_string();
    let err = build_workbook_base64(&text).unwrap_err();
    assert!(matches!(err, XlsxBuildError::InvalidValue { .. }));
    assert!(err.is_input_error());
}

#[test]
fn test_malformed_merge_and_filter_ranges_are_skipped() {
    let document = json!({
        "content": {
            "S": {
                "Data": [["a", "b"], ["c", "d"]],
                "MergeCells": [["A0", "B1"], ["A2", "B2"]],
                "AutoFilter": ["ZZ"],
            },
        },
    });
    let document = parse_document(&document.to_string()).unwrap();
    let mut writer = XlsxDocumentWriter::default();
    let bytes = writer.build(&document).unwrap();
    assert_eq!(writer.report().warnings.len(), 2);

    let sheet_xml = read_part(&bytes, "xl/worksheets/sheet1.xml");
    let l_merges = read_elements(&sheet_xml, b"mergeCell");
    assert_eq!(l_merges.len(), 1);
    assert_eq!(read_attr(&l_merges[0], "ref"), Some("A2:B2"));
    assert!(read_elements(&sheet_xml, b"autoFilter").is_empty());
}

#[test]
fn test_unlisted_default_sheet_keeps_its_slot() {
    let document = json!({
        "sheet_order": ["A"],
        "content": {"Sheet1": {"Data": [["ignored"]]}, "A": {"Data": [["kept"]]}},
    });
    let mut workbook = open_xlsx(&build_bytes(&document));
    assert_eq!(
        workbook.sheet_names(),
        vec!["Sheet1".to_string(), "A".to_string()]
    );
    let range = workbook.worksheet_range("A").unwrap();
    assert_eq!(range.get_value((0, 0)), Some(&Data::String("kept".to_string())));
    let range = workbook.worksheet_range("Sheet1").unwrap();
    assert!(range.is_empty());
}

#[test]
fn test_sheet_order_and_default_slot() {
    let document = json!({
        "sheet_order": ["B", "Sheet1", "A"],
        "content": {"A": {}, "B": {}, "Sheet1": {}},
    });
    let workbook = open_xlsx(&build_bytes(&document));
    assert_eq!(
        workbook.sheet_names(),
        vec!["Sheet1".to_string(), "B".to_string(), "A".to_string()]
    );

    let document = json!({
        "sheet_order": ["Report", "Raw"],
        "content": {"Raw": {}, "Report": {}},
    });
    let workbook = open_xlsx(&build_bytes(&document));
    assert_eq!(
        workbook.sheet_names(),
        vec!["Report".to_string(), "Raw".to_string()]
    );
}

#[test]
fn test_random_access_grouped_rows() {
    let document = json!({
        "content": {
            "S": {
                "WriterEngine": "NormalWriter",
                "Data": [["a"], ["b"], ["c"], ["d"]],
                "GroupedRow": [{"start_row": 1, "end_row": 3, "outline_level": 1, "hidden": false}],
            },
        },
    });
    let bytes = build_bytes(&document);
    let sheet_xml = read_part(&bytes, "xl/worksheets/sheet1.xml");
    let l_rows = read_elements(&sheet_xml, b"row");
    for element in &l_rows {
        let row = read_attr(element, "r").unwrap();
        let level = read_attr(element, "outlineLevel");
        if ["1", "2", "3"].contains(&row) {
            assert_eq!(level, Some("1"), "row {row}");
            assert_eq!(read_attr(element, "hidden"), None, "row {row}");
        } else {
            assert_eq!(level, None, "row {row}");
        }
    }
}

#[test]
fn test_no_style_matches_noop_styles() {
    let document_bare = json!({
        "content": {"S": {"NoStyle": true, "Data": [["a", 1.5, true], [null, "b"]]}},
    });
    let document_styled = json!({
        "style": {"noop": {"CustomNumFmt": ""}},
        "content": {
            "S": {
                "Data": [
                    [["a", "noop"], [1.5, "noop"], [true, "noop"]],
                    [null, ["b", "noop"]],
                ],
            },
        },
    });
    let mut workbook_bare = open_xlsx(&build_bytes(&document_bare));
    let mut workbook_styled = open_xlsx(&build_bytes(&document_styled));
    let range_bare = workbook_bare.worksheet_range("S").unwrap();
    let range_styled = workbook_styled.worksheet_range("S").unwrap();
    assert_eq!(range_bare.start(), range_styled.start());
    assert_eq!(range_bare.end(), range_styled.end());
    let l_bare: Vec<Data> = range_bare.cells().map(|(_, _, val)| val.clone()).collect();
    let l_styled: Vec<Data> = range_styled.cells().map(|(_, _, val)| val.clone()).collect();
    assert_eq!(l_bare, l_styled);
}

#[test]
fn test_empty_cell_resolves_to_default_style_in_both_engines() {
    for engine in ["StreamWriter", "NormalWriter"] {
        let document = json!({
            "style": {"DEFAULT_STYLE": {"Font": {"Italic": true}, "CustomNumFmt": ""}},
            "content": {"S": {"WriterEngine": engine, "Data": [[[], "x"]]}},
        });
        let bytes = build_bytes(&document);
        let sheet_xml = read_part(&bytes, "xl/worksheets/sheet1.xml");
        let style_a1 = read_cell_style(&sheet_xml, "A1");
        assert!(style_a1.is_some(), "{engine}");
        assert_eq!(style_a1, read_cell_style(&sheet_xml, "B1"), "{engine}");
        let mut workbook = open_xlsx(&bytes);
        let range = workbook.worksheet_range("S").unwrap();
        assert_eq!(range.get_value((0, 1)), Some(&Data::String("x".to_string())));
    }
}

#[test]
fn test_pivot_over_committed_data() {
    let document = json!({
        "content": {
            "Data": {
                "Header": [["Region", "Amount"]],
                "Data": [["East", 10], ["West", 5], ["East", 7]],
                "PivotTable": [{
                    "DataRange": "Data!A1:B4",
                    "PivotTableRange": "Data!E1:F4",
                    "Rows": [{"Data": "Region"}],
                    "Data": [{"Data": "Amount", "Subtotal": "Sum"}],
                    "RowGrandTotals": true,
                }],
            },
        },
    });
    let document = parse_document(&document.to_string()).unwrap();
    let mut writer = XlsxDocumentWriter::default();
    let bytes = writer.build(&document).unwrap();
    assert_eq!(writer.report().n_pivot_tables, 1);

    assert!(has_part(&bytes, "xl/pivotTables/pivotTable1.xml"));
    assert!(has_part(&bytes, "xl/pivotCache/pivotCacheRecords1.xml"));
    let cache = read_part(&bytes, "xl/pivotCache/pivotCacheDefinition1.xml");
    assert!(cache.contains(r#"<s v="East"/><s v="West"/>"#));
    assert!(cache.contains(r#"ref="A1:B4" sheet="Data""#));

    let workbook_xml = read_part(&bytes, "xl/workbook.xml");
    let l_caches = read_elements(&workbook_xml, b"pivotCache");
    assert_eq!(l_caches.len(), 1);
    assert_eq!(read_attr(&l_caches[0], "cacheId"), Some("1"));

    let sheet_rels = read_part(&bytes, "xl/worksheets/_rels/sheet1.xml.rels");
    assert!(sheet_rels.contains("../pivotTables/pivotTable1.xml"));
    let content_types = read_part(&bytes, "[Content_Types].xml");
    assert!(content_types.contains("/xl/pivotTables/pivotTable1.xml"));

    // Cell data is still readable after the package rewrite.
    let mut workbook = open_xlsx(&bytes);
    let range = workbook.worksheet_range("Data").unwrap();
    assert_eq!(range.get_value((3, 0)), Some(&Data::String("East".to_string())));
}

#[test]
fn test_pivot_on_unknown_column_is_skipped() {
    let document = json!({
        "content": {
            "Data": {
                "Header": [["Region", "Amount"]],
                "Data": [["East", 10]],
                "PivotTable": [{
                    "DataRange": "Data!A1:B2",
                    "PivotTableRange": "Data!E1:F4",
                    "Rows": [{"Data": "Country"}],
                }],
            },
        },
    });
    let document = parse_document(&document.to_string()).unwrap();
    let mut writer = XlsxDocumentWriter::default();
    let bytes = writer.build(&document).unwrap();
    let report = writer.report();
    assert_eq!(report.n_pivot_tables, 0);
    assert_eq!(report.warnings.len(), 1);
    assert!(!has_part(&bytes, "xl/pivotTables/pivotTable1.xml"));
}

#[test]
fn test_table_header_from_committed_cells() {
    let document = json!({
        "content": {
            "S": {
                "Header": [["Name", "Score"]],
                "Data": [["a", 1], ["b", 2]],
                "Table": [{"range": "A1:B3", "name": "Scores", "style_name": "TableStyleMedium9"}],
            },
        },
    });
    let bytes = build_bytes(&document);
    let table_xml = read_part(&bytes, "xl/tables/table1.xml");
    let l_columns = read_elements(&table_xml, b"tableColumn");
    let l_names: Vec<&str> = l_columns
        .iter()
        .filter_map(|element| read_attr(element, "name"))
        .collect();
    assert_eq!(l_names, vec!["Name", "Score"]);
    assert!(table_xml.contains(r#"name="TableStyleMedium9""#));
}

#[test]
fn test_workbook_protection_and_core_properties() {
    let document = json!({
        "file_props": {"Title": "Quarterly", "Language": "en-US", "Revision": "3"},
        "protection": {"algorithm": "XOR", "password": "abc", "lock_structure": true},
        "content": {"S": {"Data": [["x"]]}},
    });
    let bytes = build_bytes(&document);

    let workbook_xml = read_part(&bytes, "xl/workbook.xml");
    let l_protection = read_elements(&workbook_xml, b"workbookProtection");
    assert_eq!(l_protection.len(), 1);
    assert!(read_attr(&l_protection[0], "workbookPassword").is_some());
    assert_eq!(read_attr(&l_protection[0], "lockStructure"), Some("1"));
    assert!(workbook_xml.find("<workbookProtection") < workbook_xml.find("<bookViews"));

    let core = read_part(&bytes, "docProps/core.xml");
    assert!(core.contains("<dc:title>Quarterly</dc:title>"));
    assert!(core.contains("<dc:language>en-US</dc:language>"));
    assert!(core.contains("<cp:revision>3</cp:revision>"));
}

#[test]
fn test_split_panes_rewrite_sheet_view() {
    let document = json!({
        "content": {
            "S": {
                "Data": [["x"]],
                "Panes": {"split": true, "x_split": 3000, "y_split": 1500, "top_left_cell": "C4"},
            },
        },
    });
    let bytes = build_bytes(&document);
    let sheet_xml = read_part(&bytes, "xl/worksheets/sheet1.xml");
    let l_panes = read_elements(&sheet_xml, b"pane");
    assert_eq!(l_panes.len(), 1);
    assert_eq!(read_attr(&l_panes[0], "state"), Some("split"));
    assert_eq!(read_attr(&l_panes[0], "xSplit"), Some("3000"));
    assert_eq!(read_attr(&l_panes[0], "ySplit"), Some("1500"));
    assert_eq!(read_attr(&l_panes[0], "topLeftCell"), Some("C4"));
}

#[test]
fn test_hidden_sheet_after_first() {
    let document = json!({
        "sheet_order": ["Main", "Lookup"],
        "content": {"Main": {}, "Lookup": {"SheetVisible": false}},
    });
    let bytes = build_bytes(&document);
    let workbook_xml = read_part(&bytes, "xl/workbook.xml");
    let l_sheets = read_elements(&workbook_xml, b"sheet");
    assert_eq!(read_attr(&l_sheets[0], "state"), None);
    assert_eq!(read_attr(&l_sheets[1], "state"), Some("hidden"));
}
