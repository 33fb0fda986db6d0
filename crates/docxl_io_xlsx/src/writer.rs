//! Document orchestrator: JSON text in, base64 xlsx text out.
//!
//! One [`XlsxDocumentWriter`] owns one build. It parses the whole document
//! before touching a workbook, then walks the planned sheet slots, realizes
//! pivot tables from the committed ledger, saves, post-processes the package
//! and encodes.

use std::collections::BTreeSet;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use rust_xlsxwriter::{DocProperties, Workbook, Worksheet};
use serde_json::{Map, Value};

use crate::chart::insert_chart_placements;
use crate::conf::{
    C_DEFAULT_SHEET_NAME, C_KEY_CONTENT, C_KEY_ENGINE, C_KEY_FILE_PROPS, C_KEY_PROTECTION,
    C_KEY_SHEET_ORDER, C_KEY_STYLE, SpecXlsxBuildOptions, derive_default_xlsx_build_options,
};
use crate::engine::{
    RandomAccessSheetWriter, SheetWriter, StreamingSheetWriter, WorkbookLedger, populate_sheet,
};
use crate::error::{Result, XlsxBuildError};
use crate::mapper::{
    EnumFieldSetter, SpecField, cast_map, cast_str, derive_field_path, derive_index_path,
    get_list_value, get_map_value, get_str_value, map_fields,
};
use crate::package::{SpecPackagePlan, rewrite_package};
use crate::pivot::{derive_pivot_parts, parse_sheet_range};
use crate::sheet::{
    apply_auto_filters, apply_comments, apply_data_validations, apply_outline_groups,
    apply_panes, derive_table, parse_sheet, parse_table_range,
};
use crate::spec::{
    EnumWriteEngine, SpecCellRange, SpecDocProperties, SpecDocument, SpecPivotTable, SpecSheet,
    SpecSheetReport, SpecTable, SpecWorkbookProtection, SpecXlsxBuildReport,
};
use crate::style::{StyleRegistry, build_style_registry};

////////////////////////////////////////////////////////////////////////////////
// #region DocumentParsing

/// Build document metadata from `file_props`.
pub fn build_doc_properties(map: &Map<String, Value>, path: &str) -> Result<SpecDocProperties> {
    let l_fields = vec![
        SpecField::new(
            "Category",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.category = v),
        ),
        SpecField::new(
            "ContentStatus",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.content_status = v),
        ),
        SpecField::new(
            "Created",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.created = v),
        ),
        SpecField::new(
            "Creator",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.creator = v),
        ),
        SpecField::new(
            "Description",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.description = v),
        ),
        SpecField::new(
            "Identifier",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.identifier = v),
        ),
        SpecField::new(
            "Keywords",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.keywords = v),
        ),
        SpecField::new(
            "LastModifiedBy",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.last_modified_by = v),
        ),
        SpecField::new(
            "Modified",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.modified = v),
        ),
        SpecField::new(
            "Revision",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.revision = v),
        ),
        SpecField::new(
            "Subject",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.subject = v),
        ),
        SpecField::new(
            "Title",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.title = v),
        ),
        SpecField::new(
            "Language",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.language = v),
        ),
        SpecField::new(
            "Version",
            EnumFieldSetter::Str(|p: &mut SpecDocProperties, v: String| p.version = v),
        ),
    ];
    let mut doc_props = SpecDocProperties::default();
    map_fields(&mut doc_props, map, &l_fields, path)?;
    Ok(doc_props)
}

/// Build workbook protection from `protection`.
pub fn build_workbook_protection(
    map: &Map<String, Value>,
    path: &str,
) -> Result<SpecWorkbookProtection> {
    let l_fields = vec![
        SpecField::new(
            "algorithm",
            EnumFieldSetter::Str(|p: &mut SpecWorkbookProtection, v: String| p.algorithm = v),
        ),
        SpecField::new(
            "password",
            EnumFieldSetter::Str(|p: &mut SpecWorkbookProtection, v: String| p.password = v),
        ),
        SpecField::new(
            "lock_structure",
            EnumFieldSetter::Bool(|p: &mut SpecWorkbookProtection, v: bool| p.lock_structure = v),
        ),
        SpecField::new(
            "lock_windows",
            EnumFieldSetter::Bool(|p: &mut SpecWorkbookProtection, v: bool| p.lock_windows = v),
        ),
    ];
    let mut protection = SpecWorkbookProtection::default();
    map_fields(&mut protection, map, &l_fields, path)?;
    Ok(protection)
}

fn is_protection_empty(protection: &SpecWorkbookProtection) -> bool {
    protection.password.is_empty() && !protection.lock_structure && !protection.lock_windows
}

/// Parse the input text into a document.
///
/// Every check that can fail on input runs here, before any workbook exists:
/// kinds of the declared keys, sheet names listed in `sheet_order` and every
/// reachable sheet spec.
pub fn parse_document(text: &str) -> Result<SpecDocument> {
    let root: Value = serde_json::from_str(text)?;
    let map_root = cast_map(&root, "$")?;
    let mut document = SpecDocument::default();

    if let Some(map_styles) = get_map_value(map_root, C_KEY_STYLE, "")? {
        document.styles = map_styles.clone();
    }
    if let Some(map_props) = get_map_value(map_root, C_KEY_FILE_PROPS, "")? {
        document.file_props = build_doc_properties(map_props, C_KEY_FILE_PROPS)?;
    }
    if let Some(map_protection) = get_map_value(map_root, C_KEY_PROTECTION, "")? {
        document.protection = Some(build_workbook_protection(map_protection, C_KEY_PROTECTION)?);
    }

    let engine = get_str_value(map_root, C_KEY_ENGINE, "")?;
    if !engine.is_empty() {
        document.engine = Some(EnumWriteEngine::parse(&engine).ok_or_else(|| {
            XlsxBuildError::invalid(C_KEY_ENGINE, format!("unknown writer engine `{engine}`"))
        })?);
    }

    let empty = Map::new();
    let map_content = get_map_value(map_root, C_KEY_CONTENT, "")?.unwrap_or(&empty);
    document.sheet_names_content = map_content.keys().cloned().collect();

    let l_order_raw = get_list_value(map_root, C_KEY_SHEET_ORDER, "")?;
    if l_order_raw.is_empty() {
        document.sheet_order = map_content.keys().cloned().collect();
    } else {
        let mut set_seen = BTreeSet::new();
        for (idx, value) in l_order_raw.iter().enumerate() {
            let path = derive_index_path(C_KEY_SHEET_ORDER, idx);
            let name = cast_str(value, &path)?;
            if !set_seen.insert(name.clone()) {
                return Err(XlsxBuildError::invalid(path, format!("duplicate sheet `{name}`")));
            }
            document.sheet_order.push(name);
        }
    }

    for name in &document.sheet_order {
        let value = map_content
            .get(name)
            .ok_or_else(|| XlsxBuildError::UnknownSheet(name.clone()))?;
        let sheet = parse_sheet(name, value, &derive_field_path(C_KEY_CONTENT, name))?;
        document.sheets.insert(name.clone(), sheet);
    }
    Ok(document)
}

/// Order sheets into workbook slots.
///
/// Slot 0 is the default `Sheet1` slot. When `content` holds a sheet literally
/// named `Sheet1`, that name keeps slot 0, even if `sheet_order` leaves it out;
/// otherwise the first listed sheet takes it over. The rest keep their listed
/// order.
pub fn plan_sheet_slots(l_sheet_order: &[String], set_content: &BTreeSet<String>) -> Vec<String> {
    let mut l_slots = Vec::with_capacity(l_sheet_order.len() + 1);
    if set_content.contains(C_DEFAULT_SHEET_NAME) {
        l_slots.push(C_DEFAULT_SHEET_NAME.to_string());
    }
    l_slots.extend(
        l_sheet_order
            .iter()
            .filter(|name| name.as_str() != C_DEFAULT_SHEET_NAME)
            .cloned(),
    );
    l_slots
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DocumentWriter

struct SpecQueuedPivot {
    path: String,
    spec: SpecPivotTable,
}

/// Single-use workbook builder for one document.
pub struct XlsxDocumentWriter {
    options: SpecXlsxBuildOptions,
    report: SpecXlsxBuildReport,
}

impl Default for XlsxDocumentWriter {
    fn default() -> Self {
        Self::new(derive_default_xlsx_build_options())
    }
}

impl XlsxDocumentWriter {
    pub fn new(options: SpecXlsxBuildOptions) -> Self {
        Self {
            options,
            report: SpecXlsxBuildReport::default(),
        }
    }

    /// Return a snapshot of the build report.
    pub fn report(&self) -> SpecXlsxBuildReport {
        self.report.clone()
    }

    fn derive_engine(&self, document: &SpecDocument, sheet: &SpecSheet) -> EnumWriteEngine {
        sheet
            .engine
            .or(document.engine)
            .unwrap_or(self.options.engine_default)
    }

    /// Reject documents whose grouping would be lost on a streaming sheet.
    fn validate(&self, document: &SpecDocument) -> Result<()> {
        if !self.options.if_strict_grouping {
            return Ok(());
        }
        for name in &document.sheet_order {
            let Some(sheet) = document.sheets.get(name) else {
                return Err(XlsxBuildError::UnknownSheet(name.clone()));
            };
            if sheet.has_grouping() && self.derive_engine(document, sheet) == EnumWriteEngine::Streaming
            {
                let key = if sheet.grouped_row.is_empty() {
                    "GroupedCol"
                } else {
                    "GroupedRow"
                };
                return Err(XlsxBuildError::invalid(
                    derive_field_path(&derive_field_path(C_KEY_CONTENT, name), key),
                    "outline grouping requires the random-access engine",
                ));
            }
        }
        Ok(())
    }

    /// Build the workbook and return the post-processed xlsx bytes.
    pub fn build(&mut self, document: &SpecDocument) -> Result<Vec<u8>> {
        self.validate(document)?;
        let registry = build_style_registry(&document.styles, &mut self.report)?;

        let mut workbook = Workbook::new();
        let mut plan = SpecPackagePlan::default();
        apply_doc_properties(&mut workbook, &document.file_props, &mut plan);
        if let Some(protection) = &document.protection
            && !is_protection_empty(protection)
        {
            plan.protection = Some(protection.clone());
        }

        let l_slots = plan_sheet_slots(&document.sheet_order, &document.sheet_names_content);
        // Unlisted `Sheet1` keeps its slot and stays empty.
        let sheet_default = SpecSheet::new(C_DEFAULT_SHEET_NAME);
        let mut l_sheets = Vec::with_capacity(l_slots.len());
        for name in &l_slots {
            let sheet = match document.sheets.get(name) {
                Some(sheet) => sheet,
                None if name == C_DEFAULT_SHEET_NAME => &sheet_default,
                None => return Err(XlsxBuildError::UnknownSheet(name.clone())),
            };
            l_sheets.push(sheet);
        }

        let set_sources: BTreeSet<String> = l_sheets
            .iter()
            .flat_map(|sheet| sheet.pivot_table.iter())
            .filter_map(|pivot| parse_sheet_range(&pivot.data_range, "").ok())
            .map(|(sheet_name, _)| sheet_name)
            .collect();
        let mut ledger = WorkbookLedger::new(set_sources);

        let mut l_pivots = Vec::new();
        for (idx, sheet) in l_sheets.iter().enumerate() {
            let path = derive_field_path(C_KEY_CONTENT, &sheet.name);
            let engine = self.derive_engine(document, sheet);
            let n_rows_written = self.write_sheet(
                &mut workbook,
                sheet,
                idx,
                engine,
                &registry,
                &mut ledger,
                &mut plan,
            )?;
            self.report.sheets.push(SpecSheetReport {
                sheet_name: sheet.name.clone(),
                engine,
                n_rows_written,
            });

            let path_pivots = derive_field_path(&path, "PivotTable");
            l_pivots.extend(sheet.pivot_table.iter().enumerate().map(|(idx_pivot, spec)| {
                SpecQueuedPivot {
                    path: derive_index_path(&path_pivots, idx_pivot),
                    spec: spec.clone(),
                }
            }));
        }

        let set_slots: BTreeSet<&str> = l_slots.iter().map(String::as_str).collect();
        for pivot in &l_pivots {
            match derive_pivot_parts(&pivot.spec, plan.l_pivots.len() + 1, &ledger, &pivot.path) {
                Ok(parts) if set_slots.contains(parts.sheet_name.as_str()) => {
                    plan.l_pivots.push(parts);
                    self.report.n_pivot_tables += 1;
                }
                Ok(parts) => self.report.warn(format!(
                    "{}: pivot table skipped: target sheet `{}` is not written",
                    pivot.path, parts.sheet_name
                )),
                Err(err) => self
                    .report
                    .warn(format!("{}: pivot table skipped: {err}", pivot.path)),
            }
        }

        let bytes = workbook.save_to_buffer()?;
        let bytes = rewrite_package(bytes, &plan, &mut self.report)?;
        log::debug!(
            "built workbook: {} sheets, {} pivot tables, {} warnings",
            self.report.sheets.len(),
            self.report.n_pivot_tables,
            self.report.warnings.len()
        );
        Ok(bytes)
    }

    /// Parse, build and base64-encode in one call.
    pub fn build_base64(&mut self, text: &str) -> Result<String> {
        let document = parse_document(text)?;
        let bytes = self.build(&document)?;
        Ok(BASE64_ENGINE.encode(bytes))
    }

    #[allow(clippy::too_many_arguments)]
    fn write_sheet(
        &mut self,
        workbook: &mut Workbook,
        sheet: &SpecSheet,
        idx_slot: usize,
        engine: EnumWriteEngine,
        registry: &StyleRegistry,
        ledger: &mut WorkbookLedger,
        plan: &mut SpecPackagePlan,
    ) -> Result<usize> {
        let path = derive_field_path(C_KEY_CONTENT, &sheet.name);
        let report = &mut self.report;
        for msg in &sheet.skipped {
            report.warn(msg);
        }
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sheet.name.as_str())?;

        insert_chart_placements(
            worksheet,
            &sheet.chart,
            &derive_field_path(&path, "Chart"),
            report,
        );
        apply_data_validations(
            worksheet,
            &sheet.data_validation,
            &derive_field_path(&path, "DataValidation"),
            report,
        );
        apply_comments(
            worksheet,
            &sheet.comment,
            &derive_field_path(&path, "Comment"),
            report,
        );
        if let Some(panes) = &sheet.panes
            && let Some(split_pane) = apply_panes(
                worksheet,
                &sheet.name,
                panes,
                &derive_field_path(&path, "Panes"),
                report,
            )
        {
            plan.l_split_panes.push(split_pane);
        }
        apply_auto_filters(
            worksheet,
            &sheet.auto_filter,
            &derive_field_path(&path, "AutoFilter"),
            report,
        );

        let path_tables = derive_field_path(&path, "Table");
        let mut l_tables = Vec::with_capacity(sheet.table.len());
        for (idx, spec) in sheet.table.iter().enumerate() {
            let path_table = derive_index_path(&path_tables, idx);
            match parse_table_range(spec, &path_table) {
                Ok(range) => {
                    ledger.watch_row(&sheet.name, range.row_first);
                    l_tables.push((path_table, spec, range));
                }
                Err(err) => report.warn(format!("{path_table}: table skipped: {err}")),
            }
        }

        let n_rows_written = match engine {
            EnumWriteEngine::Streaming => {
                let mut writer = StreamingSheetWriter::new(worksheet, &sheet.name, registry, ledger);
                populate_sheet(&mut writer, sheet, registry, &path, report)?;
                if sheet.has_grouping() {
                    report.warn(format!(
                        "{path}: outline grouping dropped on a streaming sheet"
                    ));
                }
                let n_rows = writer.finish()?;
                attach_tables(&mut writer, &l_tables, registry, report);
                n_rows
            }
            EnumWriteEngine::RandomAccess => {
                let mut writer =
                    RandomAccessSheetWriter::new(worksheet, &sheet.name, registry, ledger);
                populate_sheet(&mut writer, sheet, registry, &path, report)?;
                apply_outline_groups(&mut writer, sheet, &path, report);
                let n_rows = writer.finish()?;
                attach_tables(&mut writer, &l_tables, registry, report);
                n_rows
            }
        };
        ledger.commit(&sheet.name);

        if !sheet.visible {
            apply_visibility(worksheet, idx_slot, &path, report);
        }
        log::debug!(
            "sheet `{}`: {} engine, {} rows",
            sheet.name,
            engine.as_str(),
            n_rows_written
        );
        Ok(n_rows_written)
    }
}

/// Apply native metadata; fields the encoder lacks go to the package pass.
fn apply_doc_properties(
    workbook: &mut Workbook,
    doc_props: &SpecDocProperties,
    plan: &mut SpecPackagePlan,
) {
    let properties = DocProperties::new()
        .set_title(doc_props.title.as_str())
        .set_subject(doc_props.subject.as_str())
        .set_author(doc_props.creator.as_str())
        .set_keywords(doc_props.keywords.as_str())
        .set_comment(doc_props.description.as_str())
        .set_category(doc_props.category.as_str())
        .set_status(doc_props.content_status.as_str());
    workbook.set_properties(&properties);
    if doc_props.has_package_fields() {
        plan.doc_props = Some(doc_props.clone());
    }
}

fn attach_tables<W: SheetWriter>(
    writer: &mut W,
    l_tables: &[(String, &SpecTable, SpecCellRange)],
    registry: &StyleRegistry,
    report: &mut SpecXlsxBuildReport,
) {
    for (path, spec, range) in l_tables {
        let sheet_name = writer.sheet_name().to_string();
        let result = derive_table(spec, range, &sheet_name, writer.ledger(), registry, path, report)
            .and_then(|table| writer.attach_table(range, &table));
        if let Err(err) = result {
            report.warn(format!("{path}: table skipped: {err}"));
        }
    }
}

/// Hide a sheet. The first slot stays visible: it is the active sheet.
fn apply_visibility(
    worksheet: &mut Worksheet,
    idx_slot: usize,
    path: &str,
    report: &mut SpecXlsxBuildReport,
) {
    if idx_slot == 0 {
        report.warn(format!(
            "{path}.SheetVisible: the first sheet is active and stays visible"
        ));
        return;
    }
    worksheet.set_hidden(true);
}

/// Build a workbook from document text and return it as base64 text.
pub fn build_workbook_base64(text: &str) -> Result<String> {
    XlsxDocumentWriter::default().build_base64(text)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn derive_names(l_names: &[&str]) -> Vec<String> {
        l_names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_plan_sheet_slots() {
        let set_content: BTreeSet<String> = derive_names(&["A", "B"]).into_iter().collect();
        assert_eq!(
            plan_sheet_slots(&derive_names(&["A", "B"]), &set_content),
            derive_names(&["A", "B"])
        );

        let set_content: BTreeSet<String> =
            derive_names(&["A", "B", "Sheet1"]).into_iter().collect();
        assert_eq!(
            plan_sheet_slots(&derive_names(&["A", "Sheet1", "B"]), &set_content),
            derive_names(&["Sheet1", "A", "B"])
        );
        assert_eq!(
            plan_sheet_slots(&derive_names(&["A"]), &set_content),
            derive_names(&["Sheet1", "A"])
        );
        assert!(plan_sheet_slots(&[], &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_parse_document_defaults_order_to_content() {
        let text = json!({
            "content": {"Zeta": {"Data": [["z"]]}, "Alpha": {}},
        })
        .to_string();
        let document = parse_document(&text).unwrap();
        assert_eq!(document.sheet_order, derive_names(&["Zeta", "Alpha"]));
        assert_eq!(document.sheets.len(), 2);
    }

    #[test]
    fn test_parse_document_rejects_unknown_sheet() {
        let text = json!({
            "sheet_order": ["S1", "S2"],
            "content": {"S2": {}},
        })
        .to_string();
        let err = parse_document(&text).unwrap_err();
        assert!(matches!(err, XlsxBuildError::UnknownSheet(ref name) if name == "S1"));
        assert!(err.is_input_error());
    }

    #[test]
    fn test_parse_document_rejects_wrong_kinds() {
        let err = parse_document(r#"{"content": []}"#).unwrap_err();
        assert!(matches!(err, XlsxBuildError::Schema { ref path, .. } if path == "content"));

        let err = parse_document("[1, 2]").unwrap_err();
        assert!(matches!(err, XlsxBuildError::Schema { .. }));

        let err = parse_document("{not json").unwrap_err();
        assert!(matches!(err, XlsxBuildError::Parse(_)));
    }

    #[test]
    fn test_parse_document_file_props_and_protection() {
        let text = json!({
            "file_props": {"Title": "Report", "Language": "en-US"},
            "protection": {"algorithm": "SHA-256", "password": "pw", "lock_structure": true},
            "content": {},
        })
        .to_string();
        let document = parse_document(&text).unwrap();
        assert_eq!(document.file_props.title, "Report");
        assert!(document.file_props.has_package_fields());
        let protection = document.protection.unwrap();
        assert_eq!(protection.algorithm, "SHA-256");
        assert!(protection.lock_structure);
        assert!(!protection.lock_windows);
    }

    #[test]
    fn test_build_rejects_grouping_on_streaming_sheet() {
        let text = json!({
            "content": {"S": {"GroupedRow": [{"start_row": 1, "outline_level": 1}]}},
        })
        .to_string();
        let document = parse_document(&text).unwrap();
        let err = XlsxDocumentWriter::default().build(&document).unwrap_err();
        assert!(matches!(err, XlsxBuildError::InvalidValue { ref path, .. } if path == "content.S.GroupedRow"));
    }

    #[test]
    fn test_build_drops_grouping_when_not_strict() {
        let text = json!({
            "content": {"S": {"Data": [["a"]], "GroupedRow": [{"start_row": 1, "outline_level": 1}]}},
        })
        .to_string();
        let document = parse_document(&text).unwrap();
        let mut writer = XlsxDocumentWriter::new(SpecXlsxBuildOptions {
            if_strict_grouping: false,
            ..SpecXlsxBuildOptions::default()
        });
        writer.build(&document).unwrap();
        let report = writer.report();
        assert_eq!(report.sheets.len(), 1);
        assert_eq!(report.sheets[0].n_rows_written, 1);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_build_reports_engine_per_sheet() {
        let text = json!({
            "engine": "NormalWriter",
            "content": {
                "A": {"Data": [["a"], ["b"]]},
                "B": {"WriterEngine": "StreamWriter", "Header": [["h"]]},
            },
        })
        .to_string();
        let document = parse_document(&text).unwrap();
        let mut writer = XlsxDocumentWriter::default();
        writer.build(&document).unwrap();
        let report = writer.report();
        assert_eq!(
            report.sheets,
            vec![
                SpecSheetReport {
                    sheet_name: "A".to_string(),
                    engine: EnumWriteEngine::RandomAccess,
                    n_rows_written: 2,
                },
                SpecSheetReport {
                    sheet_name: "B".to_string(),
                    engine: EnumWriteEngine::Streaming,
                    n_rows_written: 1,
                },
            ]
        );
    }

    #[test]
    fn test_build_workbook_base64_is_zip() {
        let text = json!({"content": {"S": {"Data": [["x"]]}}}).to_string();
        let encoded = build_workbook_base64(&text).unwrap();
        let bytes = BASE64_ENGINE.decode(encoded).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }
}
